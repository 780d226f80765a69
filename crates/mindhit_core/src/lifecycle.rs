//! crates/mindhit_core/src/lifecycle.rs
//!
//! The session state machine. Every status change in the system is checked against
//! this table before it reaches storage.

use crate::domain::SessionStatus;
use std::fmt;

/// A request to move a session from one status to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionAction {
    Pause,
    Resume,
    Stop,
    /// The worker committed a mindmap.
    Complete,
    /// The worker gave up, or the sweeper reaped an abandoned recording.
    Fail,
    /// A user asked for a fresh mindmap of a finished session.
    Regenerate,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Pause => "pause",
            SessionAction::Resume => "resume",
            SessionAction::Stop => "stop",
            SessionAction::Complete => "complete",
            SessionAction::Fail => "fail",
            SessionAction::Regenerate => "regenerate",
        }
    }

    /// Statuses from which this action is legal.
    pub fn sources(&self) -> &'static [SessionStatus] {
        use SessionStatus::*;
        match self {
            SessionAction::Pause => &[Recording],
            SessionAction::Resume => &[Paused],
            SessionAction::Stop => &[Recording, Paused],
            SessionAction::Complete => &[Processing],
            SessionAction::Fail => &[Recording, Paused, Processing],
            SessionAction::Regenerate => &[Completed, Failed],
        }
    }

    pub fn target(&self) -> SessionStatus {
        match self {
            SessionAction::Pause => SessionStatus::Paused,
            SessionAction::Resume => SessionStatus::Recording,
            SessionAction::Stop => SessionStatus::Processing,
            SessionAction::Complete => SessionStatus::Completed,
            SessionAction::Fail => SessionStatus::Failed,
            SessionAction::Regenerate => SessionStatus::Processing,
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} a session that is {from}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub action: SessionAction,
}

/// Validates `action` against the current status and returns the new status.
pub fn transition(
    from: SessionStatus,
    action: SessionAction,
) -> Result<SessionStatus, InvalidTransition> {
    if action.sources().contains(&from) {
        Ok(action.target())
    } else {
        Err(InvalidTransition { from, action })
    }
}

/// True if any action leads from `from` to `to`.
pub fn is_legal(from: SessionStatus, to: SessionStatus) -> bool {
    ALL_ACTIONS
        .iter()
        .any(|a| a.target() == to && a.sources().contains(&from))
}

pub const ALL_ACTIONS: [SessionAction; 6] = [
    SessionAction::Pause,
    SessionAction::Resume,
    SessionAction::Stop,
    SessionAction::Complete,
    SessionAction::Fail,
    SessionAction::Regenerate,
];
