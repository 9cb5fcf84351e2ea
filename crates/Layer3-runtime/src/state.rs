//! Resource lifecycle state machine
//!
//! ```text
//! created ──start──► running ──stop──► stopped ──start──► running
//!                      │  ▲
//!                 pause│  │resume
//!                      ▼  │
//!                    paused
//!
//! running ──save_state──► saved ──restore_state──► running
//!
//! {created, stopped, paused, saved} ──remove──► removed
//! ```

use harbor_foundation::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Created,
    Running,
    Stopped,
    Paused,
    Saved,
    Removed,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Saved => "saved",
            Self::Removed => "removed",
        }
    }

    pub fn all() -> &'static [ResourceState] {
        &[
            Self::Created,
            Self::Running,
            Self::Stopped,
            Self::Paused,
            Self::Saved,
            Self::Removed,
        ]
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether `transition` is legal from this state
    pub fn allows(&self, transition: Transition) -> bool {
        transition.sources().contains(self)
    }

    /// Guarded transition: the next state, or a state conflict for `name`
    pub fn next(&self, name: &str, transition: Transition) -> Result<ResourceState> {
        if self.allows(transition) {
            Ok(transition.target())
        } else {
            Err(Error::state_conflict(name, self, transition.as_str()))
        }
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-driven lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Start,
    Stop,
    Pause,
    Resume,
    SaveState,
    RestoreState,
    Remove,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::SaveState => "save_state",
            Self::RestoreState => "restore_state",
            Self::Remove => "remove",
        }
    }

    /// States from which this transition may be taken
    pub fn sources(&self) -> &'static [ResourceState] {
        use ResourceState::*;
        match self {
            Self::Start => &[Created, Stopped],
            Self::Stop | Self::Pause | Self::SaveState => &[Running],
            Self::Resume => &[Paused],
            Self::RestoreState => &[Saved],
            Self::Remove => &[Created, Stopped, Paused, Saved],
        }
    }

    pub fn target(&self) -> ResourceState {
        match self {
            Self::Start | Self::Resume | Self::RestoreState => ResourceState::Running,
            Self::Stop => ResourceState::Stopped,
            Self::Pause => ResourceState::Paused,
            Self::SaveState => ResourceState::Saved,
            Self::Remove => ResourceState::Removed,
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TRANSITIONS: [Transition; 7] = [
        Transition::Start,
        Transition::Stop,
        Transition::Pause,
        Transition::Resume,
        Transition::SaveState,
        Transition::RestoreState,
        Transition::Remove,
    ];

    #[test]
    fn test_start_only_from_created_or_stopped() {
        for state in ResourceState::all() {
            let ok = state.next("a", Transition::Start).is_ok();
            assert_eq!(
                ok,
                matches!(state, ResourceState::Created | ResourceState::Stopped),
                "start from {state}"
            );
        }
    }

    #[test]
    fn test_double_start_conflicts() {
        let running = ResourceState::Created.next("a", Transition::Start).unwrap();
        let err = running.next("a", Transition::Start).unwrap_err();
        assert_eq!(err.kind(), "state_conflict");
        assert_eq!(err.to_string(), "Cannot start 'a': resource is running");
    }

    #[test]
    fn test_remove_never_from_running() {
        assert!(!ResourceState::Running.allows(Transition::Remove));
        for state in [
            ResourceState::Created,
            ResourceState::Stopped,
            ResourceState::Paused,
            ResourceState::Saved,
        ] {
            assert_eq!(state.next("a", Transition::Remove).unwrap(), ResourceState::Removed);
        }
    }

    #[test]
    fn test_pause_resume_and_save_restore_cycles() {
        let s = ResourceState::Running;
        let paused = s.next("a", Transition::Pause).unwrap();
        assert_eq!(paused.next("a", Transition::Resume).unwrap(), ResourceState::Running);

        let saved = s.next("a", Transition::SaveState).unwrap();
        assert!(saved.next("a", Transition::Resume).is_err());
        assert_eq!(
            saved.next("a", Transition::RestoreState).unwrap(),
            ResourceState::Running
        );
    }

    #[test]
    fn test_removed_is_terminal() {
        for t in ALL_TRANSITIONS {
            assert!(!ResourceState::Removed.allows(t));
        }
    }
}
