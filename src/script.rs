//! The script-VM seam.
//!
//! The per-player logic program is executed by a VM the embedder supplies;
//! the core treats it as a black box behind [`ScriptVm`]. The contract
//! exists entirely in service of determinism: given the same source, the
//! same accumulated scope, and the same `(frame, input)` arguments, `tick`
//! must return the same commands on every peer, every run.
//!
//! The VM may keep persistent per-instance scope across ticks; that scope
//! is part of the deterministic state, which is why each simulation runs
//! two independent instances (one per player) and why the rollback engine
//! snapshots the scope alongside every committed frame.

use smallvec::SmallVec;

use crate::input::InputMask;

/// Commands a script may emit for its player in one tick. This is the
/// stable public surface between scripts and the simulation; unknown
/// commands are ignored at the VM boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sets the target horizontal direction. `dx` is interpreted as a
    /// sign: ≥ 1 walks right, 0 stops, ≤ -1 walks left.
    Move {
        /// Sign-interpreted direction.
        dx: i32,
    },
    /// Switches the animation to the hash of `name`.
    Anim {
        /// Animation name; stored in the state as its 32-bit string hash.
        name: String,
    },
}

/// Per-tick command list. Scripts rarely emit more than a couple of
/// commands, so these stay on the stack.
pub type CommandList = SmallVec<[Command; 4]>;

/// Contract a script VM must satisfy for deterministic co-simulation.
///
/// Implementations MUST NOT give scripts access to wall-clock time,
/// randomness, or I/O; any of those would silently desync the peers.
pub trait ScriptVm {
    /// An opaque, cloneable snapshot of the VM's mutable scope. The
    /// rollback engine stores one per player per committed frame and
    /// restores it before replaying.
    type Scope: Clone;

    /// Compiles a program whose entry point is `tick(frame, inputMask)`.
    /// Returns `false` on compile error; the error text is retrievable
    /// via [`take_last_error`](Self::take_last_error). Loading resets the
    /// VM's scope.
    fn load_source(&mut self, source: &[u8]) -> bool;

    /// Takes the most recent compile or runtime error, if any.
    fn take_last_error(&mut self) -> Option<String>;

    /// Executes one frame of logic. A call with the same (script, scope,
    /// frame, input) must return the same commands. An erroring tick
    /// returns an empty list; the simulation falls back to direct input
    /// mapping for that frame.
    fn tick(&mut self, frame: u32, input: InputMask) -> CommandList;

    /// Produces a fresh VM that, after [`load_source`](Self::load_source)
    /// of the same source, behaves identically to a freshly seeded VM.
    /// Used to instantiate the two per-player instances from the global VM.
    #[must_use]
    fn fresh(&self) -> Self
    where
        Self: Sized;

    /// Captures the current mutable scope.
    fn snapshot(&self) -> Self::Scope;

    /// Restores a previously captured scope.
    fn restore(&mut self, scope: &Self::Scope);
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
    use smallvec::smallvec;

    #[test]
    fn command_lists_stay_inline_for_typical_sizes() {
        let cmds: CommandList = smallvec![
            Command::Move { dx: 1 },
            Command::Anim {
                name: "walk".to_owned()
            },
        ];
        assert!(!cmds.spilled());
    }

    #[test]
    fn commands_compare_structurally() {
        assert_eq!(Command::Move { dx: 1 }, Command::Move { dx: 1 });
        assert_ne!(Command::Move { dx: 1 }, Command::Move { dx: -1 });
        assert_ne!(
            Command::Anim {
                name: "walk".to_owned()
            },
            Command::Anim {
                name: "idle".to_owned()
            }
        );
    }
}
