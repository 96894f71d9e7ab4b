use std::fmt;
use std::ops::BitOr;
use uuid::Uuid;

pub type JobId = Uuid;

/// Completion code of a job that finished without error.
pub const NO_ERROR: u32 = 0;
/// Reserved completion code of a job that was killed.
pub const KILLED_JOB_ERROR: u32 = 1;
/// First completion code available to concrete job kinds.
pub const USER_DEFINED_ERROR: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Killed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::NotStarted => "not-started",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// Optional abilities a job advertises on top of start/complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Capabilities {
    bits: u8,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities { bits: 0 };
    pub const KILLABLE: Capabilities = Capabilities { bits: 0b01 };
    pub const SUSPENDABLE: Capabilities = Capabilities { bits: 0b10 };

    pub fn contains(self, other: Capabilities) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn is_killable(self) -> bool {
        self.contains(Self::KILLABLE)
    }

    pub fn is_suspendable(self) -> bool {
        self.contains(Self::SUSPENDABLE)
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities { bits: self.bits | rhs.bits }
    }
}

/// Whether killing a compound job announces its result to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KillMode {
    /// Reach `Killed` without emitting `CompoundEvent::Finished`.
    #[default]
    Quietly,
    EmitResult,
}

/// The single completion notification every job delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub error: u32,
    pub error_text: String,
}

impl Completion {
    pub fn success() -> Self {
        Self { error: NO_ERROR, error_text: String::new() }
    }

    pub fn failure(error: u32, error_text: impl Into<String>) -> Self {
        Self { error, error_text: error_text.into() }
    }

    pub fn killed() -> Self {
        Self::failure(KILLED_JOB_ERROR, "killed")
    }

    pub fn is_error(&self) -> bool {
        self.error != NO_ERROR
    }

    pub fn into_result(self) -> Result<(), crate::core::error::JobError> {
        if self.is_error() {
            Err(crate::core::error::JobError::new(self.error, self.error_text))
        } else {
            Ok(())
        }
    }
}

impl From<Result<(), crate::core::error::JobError>> for Completion {
    fn from(r: Result<(), crate::core::error::JobError>) -> Self {
        match r {
            Ok(()) => Completion::success(),
            Err(e) => Completion::failure(e.code, e.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::JobError;

    #[test]
    fn capabilities_combine() {
        let caps = Capabilities::KILLABLE | Capabilities::SUSPENDABLE;
        assert!(caps.is_killable());
        assert!(caps.is_suspendable());
        assert!(!Capabilities::NONE.is_killable());
        assert!(Capabilities::NONE.contains(Capabilities::NONE));
    }

    #[test]
    fn completion_result_conversion() {
        assert_eq!(Completion::success().into_result(), Ok(()));
        let c = Completion::from(Err::<(), _>(JobError::new(7, "seven")));
        assert_eq!(c.error, 7);
        assert_eq!(c.into_result().unwrap_err().text, "seven");
        assert!(Completion::killed().is_error());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::NotStarted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Killed.is_terminal());
        assert_eq!(JobStatus::Succeeded.to_string(), "succeeded");
    }
}
