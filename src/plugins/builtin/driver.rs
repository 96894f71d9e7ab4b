use async_trait::async_trait;
use crate::core::error::JobError;
use crate::core::task::{Task, TaskContext};
use std::time::Duration;

const SLEEP_TICKS: u32 = 10;

/// Sleeps in ten slices, reporting progress and honouring suspension between them.
pub struct SleepTask {
    name: String,
    duration: Duration,
}

impl SleepTask {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self { name: name.into(), duration }
    }
}

#[async_trait]
impl Task for SleepTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<(), JobError> {
        let slice = self.duration / SLEEP_TICKS;
        for tick in 1..=SLEEP_TICKS {
            ctx.checkpoint().await;
            tokio::time::sleep(slice).await;
            ctx.set_percent(tick * 100 / SLEEP_TICKS);
        }
        Ok(())
    }
}

pub struct FailTask {
    name: String,
    code: u32,
    text: String,
}

impl FailTask {
    pub fn new(name: impl Into<String>, code: u32, text: impl Into<String>) -> Self {
        Self { name: name.into(), code, text: text.into() }
    }
}

#[async_trait]
impl Task for FailTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &TaskContext) -> Result<(), JobError> {
        Err(JobError::new(self.code, self.text.clone()))
    }
}

pub struct EchoTask {
    name: String,
    message: String,
}

impl EchoTask {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }
}

#[async_trait]
impl Task for EchoTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<(), JobError> {
        ctx.info_message(self.message.clone());
        ctx.set_percent(100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::JobNotification;
    use crate::core::job::{Job, JobReporter};
    use crate::core::model::Completion;
    use crate::core::task::TaskJob;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn sleep_reports_ten_steps() {
        let job = TaskJob::new(SleepTask::new("sleep:100", Duration::from_millis(100)));
        let (reporter, mut rx) = JobReporter::channel(Uuid::new_v4());
        job.start(reporter);

        let mut percents = vec![];
        loop {
            match rx.recv().await.expect("channel closed").notification {
                JobNotification::Percent(p) => percents.push(p),
                JobNotification::Result(c) => {
                    assert_eq!(c, Completion::success());
                    break;
                }
                JobNotification::InfoMessage(_) => {}
            }
        }
        assert_eq!(percents, (1..=10).map(|t| t * 10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn echo_forwards_message() {
        let job = TaskJob::new(EchoTask::new("echo:hi", "hi"));
        let (reporter, mut rx) = JobReporter::channel(Uuid::new_v4());
        job.start(reporter);
        assert_eq!(rx.recv().await.unwrap().notification, JobNotification::InfoMessage("hi".into()));
    }
}
