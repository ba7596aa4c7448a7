// SPDX-License-Identifier: AGPL-3.0-only

//! The task lifecycle state machine.
//!
//! Prior C sources tracked this as a bare `int`; here every transition goes
//! through [`State::transition`], which is the single place that knows
//! which edges are legal.

use std::fmt;

/// A task's point in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State
{
    /// The task's underlying resource (e.g. a map entry's source
    /// directory) has disappeared or changed kind; the task cannot run
    /// again without being recreated.
    Invalid,
    /// No child is running; the task can be started.
    Idle,
    /// Waiting in a queue for a concurrency slot.
    Queued,
    /// Fork/exec is in progress.
    Starting,
    /// A child is running and pipes, if any, are open.
    Running,
    /// A stop sequence (signal escalation) is in progress.
    Stopping,
    /// The child exited with status 0.
    Stopped,
    /// The child was killed, could not be reaped, or exited abnormally in
    /// a way with no clean interpretation.
    Dead,
    /// A long-lived task (e.g. a scan) completed a unit of work cleanly
    /// and is ready to be reset to `Idle` by its scheduler.
    Finished,
    /// The child exited with a non-zero status.
    Failed,
}

impl State
{
    /// Whether the task currently owns a live pid and any pipes it asked
    /// for, per the universal invariant in the governing spec.
    pub fn has_live_child(self) -> bool
    {
        matches!(self, State::Starting | State::Running | State::Stopping)
    }

    /// Whether this is one of the states a poll/stop can resolve into.
    pub fn is_terminal(self) -> bool
    {
        matches!(self, State::Stopped | State::Dead | State::Finished | State::Failed)
    }

    /// Validate and perform a transition, returning the prior state.
    ///
    /// Panics on an illegal edge: every caller in this crate is expected
    /// to only ever request transitions the state machine allows, so a
    /// violation here is a programming error, not a runtime condition.
    pub fn transition(&mut self, to: State) -> State
    {
        assert!(self.can_transition(to), "illegal task transition {self:?} -> {to:?}");
        std::mem::replace(self, to)
    }

    fn can_transition(self, to: State) -> bool
    {
        use State::*;
        matches!(
            (self, to),
            (Idle, Starting)
            | (Idle, Queued)
            | (Queued, Starting)
            | (Queued, Idle)
            | (Starting, Running)
            | (Starting, Dead)
            | (Running, Stopping)
            | (Running, Stopped)
            | (Running, Failed)
            | (Running, Dead)
            | (Stopping, Stopped)
            | (Stopping, Failed)
            | (Stopping, Dead)
            | (Stopped, Idle)
            | (Failed, Idle)
            | (Dead, Idle)
            | (Finished, Idle)
            | (Running, Finished)
            | (Stopped, Finished)
            | (Stopped, Failed)
            | (_, Invalid)
        )
    }
}

impl fmt::Display for State
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        let s = match self {
            State::Invalid  => "invalid",
            State::Idle     => "idle",
            State::Queued   => "queued",
            State::Starting => "starting",
            State::Running  => "running",
            State::Stopping => "stopping",
            State::Stopped  => "stopped",
            State::Dead     => "dead",
            State::Finished => "finished",
            State::Failed   => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn idle_to_starting_is_legal()
    {
        let mut s = State::Idle;
        let prior = s.transition(State::Starting);
        assert_eq!(prior, State::Idle);
        assert_eq!(s, State::Starting);
    }

    #[test]
    #[should_panic(expected = "illegal task transition")]
    fn idle_to_stopped_is_illegal()
    {
        let mut s = State::Idle;
        s.transition(State::Stopped);
    }

    #[test]
    fn any_state_can_become_invalid()
    {
        for mut s in [State::Idle, State::Running, State::Failed, State::Finished] {
            s.transition(State::Invalid);
            assert_eq!(s, State::Invalid);
        }
    }

    #[test]
    fn terminal_states_round_trip_to_idle()
    {
        for terminal in [State::Stopped, State::Failed, State::Dead, State::Finished] {
            let mut s = terminal;
            s.transition(State::Idle);
            assert_eq!(s, State::Idle);
        }
    }
}
