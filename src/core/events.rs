use crate::core::model::{Completion, JobId, JobStatus};

/// What a job tells whoever started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNotification {
    Percent(u32),
    InfoMessage(String),
    Result(Completion),
}

/// A notification tagged with the job that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub job_id: JobId,
    pub notification: JobNotification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompoundEvent {
    StatusChanged { status: JobStatus },
    SubjobStarted { index: usize, job_id: JobId, name: String },
    SubjobFinished { index: usize, job_id: JobId, error: u32 },
    Percent { percent: u32 },
    InfoMessage { job_id: JobId, message: String },
    Suspended,
    Resumed,
    Finished(Completion),
    /// A notification that did not come from the active subjob.
    ContractViolation { job_id: JobId, detail: String },
}
