use crate::core::model::{JobId, KILLED_JOB_ERROR};

/// A nonzero job completion.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("job failed with error {code}: {text}")]
pub struct JobError {
    pub code: u32,
    pub text: String,
}

impl JobError {
    pub fn new(code: u32, text: impl Into<String>) -> Self {
        Self { code, text: text.into() }
    }

    pub fn killed() -> Self {
        Self::new(KILLED_JOB_ERROR, "killed")
    }

    pub fn is_killed(&self) -> bool {
        self.code == KILLED_JOB_ERROR
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompoundJobError {
    #[error("compound job has already been started")]
    AlreadyStarted,

    #[error("job is already tracked as subjob {0}")]
    DuplicateSubjob(JobId),

    #[error("a compound job cannot be its own subjob")]
    SelfSubjob,

    #[error("job is not a subjob of this compound job")]
    SubjobNotFound,

    #[error("compound job must be started from within a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Job(#[from] JobError),
}
