//! The committed match state: two fighters plus the frame counter.
//!
//! A `State` is logically immutable once committed to the history ring;
//! the simulation step produces the next state from the previous one, and
//! rollback overwrites whole slots. Everything in here is plain integer
//! data, cheap to copy and trivially deterministic.

use crate::fixed::Fx;
use crate::Frame;

/// Starting hit points for a freshly seeded fighter.
pub const INITIAL_HP: i32 = 100;

/// Player one's spawn position (-1.0 world units).
pub const P1_SPAWN_X: Fx = Fx::from_int(-1);

/// Player two's spawn position (+1.0 world units).
pub const P2_SPAWN_X: Fx = Fx::from_int(1);

/// Per-player simulation record.
///
/// All fields are integers; `anim` holds the 32-bit string hash of the
/// current animation name (see [`crate::hash::hash32`]). Fighters are
/// created at seed time and mutated only by the simulation step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fighter {
    /// World position, signed 16.16 fixed-point.
    pub x: Fx,
    /// Velocity per tick, signed 16.16 fixed-point.
    pub vx: Fx,
    /// Hit points, clamped to be non-negative.
    pub hp: i32,
    /// Hash of the current animation name.
    pub anim: i32,
}

impl Fighter {
    /// Creates a fighter at the given spawn position with full health and
    /// no animation.
    #[must_use]
    pub const fn spawn(x: Fx) -> Self {
        Self {
            x,
            vx: Fx::ZERO,
            hp: INITIAL_HP,
            anim: 0,
        }
    }

    /// Writes hit points, clamping at zero.
    pub fn set_hp(&mut self, hp: i32) {
        self.hp = hp.max(0);
    }
}

/// One frame's worth of match state.
///
/// The `frame` counter wraps at 2¹⁶; all comparisons against it go through
/// the wrap-aware helpers on [`Frame`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct State {
    /// The frame this state belongs to.
    pub frame: Frame,
    /// Player one.
    pub p1: Fighter,
    /// Player two.
    pub p2: Fighter,
}

impl State {
    /// The canonical seed state both peers start a match from: fighters at
    /// -1.0 and +1.0 world units, standing still, full health.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            frame: Frame::ZERO,
            p1: Fighter::spawn(P1_SPAWN_X),
            p2: Fighter::spawn(P2_SPAWN_X),
        }
    }

    /// The exact word sequence covered by the state fingerprint, in order.
    /// `hp` contributes its low 32 bits.
    pub(crate) fn hash_words(&self) -> [u32; 9] {
        [
            u32::from(self.frame.raw()),
            self.p1.x.raw() as u32,
            self.p1.vx.raw() as u32,
            self.p1.hp as u32,
            self.p1.anim as u32,
            self.p2.x.raw() as u32,
            self.p2.vx.raw() as u32,
            self.p2.hp as u32,
            self.p2.anim as u32,
        ]
    }
}

impl Default for State {
    fn default() -> Self {
        Self::initial()
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_matches_seed() {
        let s = State::initial();
        assert_eq!(s.frame, Frame::ZERO);
        assert_eq!(s.p1.x.raw(), -65536);
        assert_eq!(s.p2.x.raw(), 65536);
        assert_eq!(s.p1.vx, Fx::ZERO);
        assert_eq!(s.p2.vx, Fx::ZERO);
        assert_eq!(s.p1.hp, 100);
        assert_eq!(s.p2.hp, 100);
        assert_eq!(s.p1.anim, 0);
        assert_eq!(s.p2.anim, 0);
    }

    #[test]
    fn set_hp_clamps_at_zero() {
        let mut f = Fighter::spawn(Fx::ZERO);
        f.set_hp(-25);
        assert_eq!(f.hp, 0);
        f.set_hp(40);
        assert_eq!(f.hp, 40);
    }

    #[test]
    fn hash_words_cover_the_specified_tuple_in_order() {
        let mut s = State::initial();
        s.frame = Frame::new(7);
        s.p1.anim = -3;
        let words = s.hash_words();
        assert_eq!(words.len(), 9);
        assert_eq!(words[0], 7);
        assert_eq!(words[1], s.p1.x.raw() as u32);
        assert_eq!(words[4], (-3i32) as u32);
        assert_eq!(words[8], s.p2.anim as u32);
    }

    #[test]
    fn state_is_a_cheap_deep_copy() {
        let a = State::initial();
        let mut b = a;
        b.p1.x += Fx::ONE;
        assert_ne!(a, b);
        assert_eq!(a.p1.x, P1_SPAWN_X);
    }
}
