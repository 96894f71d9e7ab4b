//! Sequential compound jobs: run independently asynchronous jobs one at a
//! time and observe them as a single job.

pub mod core;
pub mod logging;
pub mod plugins;

pub use crate::core::config::CompoundJobConfig;
pub use crate::core::engine::SequentialCompoundJob;
pub use crate::core::error::{CompoundJobError, JobError};
pub use crate::core::events::{CompoundEvent, Envelope, JobNotification};
pub use crate::core::job::{Job, JobReporter};
pub use crate::core::model::{
    Capabilities, Completion, JobId, JobStatus, KillMode, KILLED_JOB_ERROR, NO_ERROR, USER_DEFINED_ERROR,
};
pub use crate::core::task::{FnTask, Task, TaskContext, TaskJob};
