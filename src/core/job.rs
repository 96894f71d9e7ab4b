use crate::core::error::JobError;
use crate::core::events::{Envelope, JobNotification};
use crate::core::model::{Capabilities, Completion, JobId};
use tokio::sync::mpsc;

/// A unit of asynchronous work.
///
/// `start` must return immediately and arrange for exactly one
/// [`JobReporter::emit_result`] to happen later, even on success. Jobs that
/// advertise [`Capabilities::KILLABLE`] accept `kill` requests; an accepted
/// kill still ends in exactly one completion, usually with
/// [`crate::core::model::KILLED_JOB_ERROR`].
pub trait Job: Send + Sync {
    fn name(&self) -> &str {
        "job"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn start(&self, reporter: JobReporter);

    /// Returns whether the cancellation was accepted, not whether it is done.
    fn kill(&self) -> bool {
        false
    }

    fn suspend(&self) -> bool {
        false
    }

    fn resume(&self) -> bool {
        false
    }

    /// Identity of the compound job behind this handle, if it is one.
    fn compound_id(&self) -> Option<JobId> {
        None
    }
}

/// The notification channel handed to a job when it is started.
#[derive(Debug, Clone)]
pub struct JobReporter {
    job_id: JobId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl JobReporter {
    pub(crate) fn new(job_id: JobId, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { job_id, tx }
    }

    /// A reporter that is not attached to a compound job, plus the receiving end.
    pub fn channel(job_id: JobId) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(job_id, tx), rx)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Whether whoever started the job has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn set_percent(&self, percent: u32) {
        self.send(JobNotification::Percent(percent.min(100)));
    }

    pub fn info_message(&self, message: impl Into<String>) {
        self.send(JobNotification::InfoMessage(message.into()));
    }

    pub fn emit_result(&self, completion: Completion) {
        self.send(JobNotification::Result(completion));
    }

    pub fn finish(&self, result: Result<(), JobError>) {
        self.emit_result(result.into());
    }

    fn send(&self, notification: JobNotification) {
        let envelope = Envelope { job_id: self.job_id, notification };
        if self.tx.send(envelope).is_err() {
            tracing::trace!(job = %self.job_id, "notification dropped, nobody is listening");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn reporter_tags_notifications() {
        let id = Uuid::new_v4();
        let (reporter, mut rx) = JobReporter::channel(id);

        reporter.set_percent(250);
        reporter.info_message("hello");
        reporter.finish(Err(JobError::new(7, "boom")));

        let e = rx.recv().await.unwrap();
        assert_eq!(e.job_id, id);
        assert_eq!(e.notification, JobNotification::Percent(100));
        assert_eq!(rx.recv().await.unwrap().notification, JobNotification::InfoMessage("hello".into()));
        assert_eq!(
            rx.recv().await.unwrap().notification,
            JobNotification::Result(Completion::failure(7, "boom"))
        );
    }

    #[test]
    fn reporter_survives_closed_channel() {
        let (reporter, rx) = JobReporter::channel(Uuid::new_v4());
        assert!(!reporter.is_closed());
        drop(rx);
        assert!(reporter.is_closed());
        reporter.emit_result(Completion::success());
    }
}
