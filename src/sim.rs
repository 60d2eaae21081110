//! The deterministic simulation step.
//!
//! One step advances the state by exactly one frame. The ordering is
//! strict and observable: player one's VM runs and its fighter updates
//! before player two's VM runs. Changing that order changes the state both
//! peers must agree on, so it is part of the protocol, not an
//! implementation detail.

use tracing::debug;

use crate::fixed::{Fx, WALK_SPEED};
use crate::hash::hash32;
use crate::input::InputMask;
use crate::script::{Command, ScriptVm};
use crate::state::{Fighter, State};

/// Advances `state` by one frame using both players' VMs and input masks.
///
/// Per player, in order:
/// 1. the VM ticks with the upcoming frame number (as a 32-bit integer)
///    and that player's mask;
/// 2. the returned commands apply in order (`Move` sets velocity from the
///    sign of `dx`, `Anim` stores the name hash);
/// 3. an empty command list (VM error, or a script that chose silence)
///    falls back to direct input mapping: Left → `-WALK`, Right → `+WALK`,
///    otherwise stop;
/// 4. physics: `x += vx`, wrapping 32-bit.
///
/// Afterwards the frame counter increments modulo 2¹⁶. Nothing in here can
/// fail; script problems degrade to the fallback for that frame only.
pub fn advance<V: ScriptVm>(
    state: &mut State,
    vm1: &mut V,
    vm2: &mut V,
    input1: InputMask,
    input2: InputMask,
) {
    let next_frame = u32::from(state.frame.raw()) + 1;
    step_player(&mut state.p1, vm1, next_frame, input1);
    step_player(&mut state.p2, vm2, next_frame, input2);
    state.frame = state.frame.next();
}

fn step_player<V: ScriptVm>(fighter: &mut Fighter, vm: &mut V, frame: u32, input: InputMask) {
    let commands = vm.tick(frame, input);
    if commands.is_empty() {
        if let Some(err) = vm.take_last_error() {
            debug!(frame, error = %err, "script tick failed, using input fallback");
        }
        fighter.vx = direct_velocity(input);
    } else {
        for command in commands {
            match command {
                Command::Move { dx } => {
                    fighter.vx = match dx.signum() {
                        1 => WALK_SPEED,
                        -1 => -WALK_SPEED,
                        _ => Fx::ZERO,
                    };
                }
                Command::Anim { name } => {
                    fighter.anim = hash32(&name);
                }
            }
        }
    }
    fighter.x = fighter.x + fighter.vx;
}

/// The input fallback: maps held directions straight to a velocity.
fn direct_velocity(input: InputMask) -> Fx {
    if input.pressed(InputMask::LEFT) {
        -WALK_SPEED
    } else if input.pressed(InputMask::RIGHT) {
        WALK_SPEED
    } else {
        Fx::ZERO
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
    use crate::script::testing::TableVm;
    use crate::state::State;
    use crate::Frame;

    fn vms(program: &str) -> (TableVm, TableVm) {
        (TableVm::loaded(program), TableVm::loaded(program))
    }

    #[test]
    fn idle_script_keeps_fighters_in_place() {
        let mut state = State::initial();
        let (mut vm1, mut vm2) = vms("idle");
        for _ in 0..600 {
            advance(
                &mut state,
                &mut vm1,
                &mut vm2,
                InputMask::NONE,
                InputMask::NONE,
            );
        }
        assert_eq!(state.frame, Frame::new(600));
        assert_eq!(state.p1.x.raw(), -65536);
        assert_eq!(state.p2.x.raw(), 65536);
        assert_eq!(state.p1.vx, Fx::ZERO);
        assert_eq!(state.p2.vx, Fx::ZERO);
    }

    #[test]
    fn dir_walk_moves_only_the_instructed_player() {
        let mut state = State::initial();
        let (mut vm1, mut vm2) = vms("dir-walk");
        for _ in 0..60 {
            advance(
                &mut state,
                &mut vm1,
                &mut vm2,
                InputMask::RIGHT,
                InputMask::NONE,
            );
        }
        assert_eq!(state.p1.x.raw(), 917_504); // -1.0 + 60 * 0.25 = 14.0
        assert_eq!(state.p2.x.raw(), 65536);
    }

    #[test]
    fn silent_script_falls_back_to_direct_input() {
        let mut state = State::initial();
        let (mut vm1, mut vm2) = vms("silent");
        advance(
            &mut state,
            &mut vm1,
            &mut vm2,
            InputMask::LEFT,
            InputMask::RIGHT,
        );
        assert_eq!(state.p1.vx, -WALK_SPEED);
        assert_eq!(state.p2.vx, WALK_SPEED);
        advance(
            &mut state,
            &mut vm1,
            &mut vm2,
            InputMask::NONE,
            InputMask::NONE,
        );
        assert_eq!(state.p1.vx, Fx::ZERO);
        assert_eq!(state.p2.vx, Fx::ZERO);
    }

    #[test]
    fn left_takes_precedence_over_right_in_fallback() {
        assert_eq!(
            direct_velocity(InputMask::LEFT | InputMask::RIGHT),
            -WALK_SPEED
        );
    }

    #[test]
    fn anim_command_stores_the_name_hash() {
        let mut state = State::initial();
        let (mut vm1, mut vm2) = vms("counter-anim");
        advance(
            &mut state,
            &mut vm1,
            &mut vm2,
            InputMask::NONE,
            InputMask::NONE,
        );
        assert_eq!(state.p1.anim, hash32("step-1"));
        assert_eq!(state.p2.anim, hash32("step-1"));
    }

    #[test]
    fn frame_counter_wraps_at_u16() {
        let mut state = State::initial();
        state.frame = Frame::new(u16::MAX);
        let (mut vm1, mut vm2) = vms("idle");
        advance(
            &mut state,
            &mut vm1,
            &mut vm2,
            InputMask::NONE,
            InputMask::NONE,
        );
        assert_eq!(state.frame, Frame::ZERO);
    }

    #[test]
    fn player_one_ticks_before_player_two() {
        // Both VMs share the counter-anim program; each VM's counter is its
        // own, so both see tick 1. The observable ordering contract is that
        // p1's fields update from vm1 and p2's from vm2, independently.
        let mut state = State::initial();
        let mut vm1 = TableVm::loaded("counter-anim");
        let mut vm2 = TableVm::loaded("idle");
        advance(
            &mut state,
            &mut vm1,
            &mut vm2,
            InputMask::RIGHT,
            InputMask::RIGHT,
        );
        assert_eq!(state.p1.vx, WALK_SPEED);
        assert_eq!(state.p1.anim, hash32("step-1"));
        // idle ignores input entirely
        assert_eq!(state.p2.vx, Fx::ZERO);
        assert_eq!(state.p2.anim, 0);
    }
}
