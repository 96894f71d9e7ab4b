use async_trait::async_trait;
use crate::core::error::JobError;
use crate::core::model::USER_DEFINED_ERROR;
use crate::core::task::{Task, TaskContext};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

pub const PROCESS_SPAWN_ERROR: u32 = USER_DEFINED_ERROR;
pub const PROCESS_EXIT_ERROR: u32 = USER_DEFINED_ERROR + 1;

/// Runs `shell -c command`; every stdout line becomes an info message.
///
/// The child is killed when the task's future is dropped.
pub struct ProcessTask {
    name: String,
    shell: String,
    command: String,
    env: HashMap<String, String>,
}

impl ProcessTask {
    pub fn new(name: impl Into<String>, shell: impl Into<String>, command: impl Into<String>) -> Self {
        Self { name: name.into(), shell: shell.into(), command: command.into(), env: HashMap::new() }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

#[async_trait]
impl Task for ProcessTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<(), JobError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&self.command)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| JobError::new(PROCESS_SPAWN_ERROR, format!("spawn {}: {e}", self.shell)))?;
        tracing::debug!(command = %self.command, pid = ?child.id(), "process started");

        let stderr_task = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        if let Some(out) = child.stdout.take() {
            let mut out = BufReader::new(out);
            let mut line = Vec::new();
            loop {
                line.clear();
                match out.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        ctx.info_message(text.trim_end_matches(|c: char| c == '\n' || c == '\r'));
                    }
                    Err(e) => {
                        tracing::debug!(command = %self.command, error = %e, "stdout read failed");
                        break;
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| JobError::new(PROCESS_SPAWN_ERROR, format!("wait for `{}`: {e}", self.command)))?;

        let stderr = match stderr_task {
            Some(t) => t.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            ctx.set_percent(100);
            Ok(())
        } else {
            Err(JobError::new(
                PROCESS_EXIT_ERROR,
                format!("`{}` {}: {}", self.command, status, stderr.trim()),
            ))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::events::JobNotification;
    use crate::core::job::{Job, JobReporter};
    use crate::core::model::{Completion, KILLED_JOB_ERROR};
    use crate::core::task::TaskJob;
    use std::time::Duration;
    use uuid::Uuid;

    async fn collect(rx: &mut tokio::sync::mpsc::UnboundedReceiver<crate::core::events::Envelope>) -> (Vec<String>, Completion) {
        let mut lines = vec![];
        loop {
            let n = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timeout")
                .expect("channel closed");
            match n.notification {
                JobNotification::InfoMessage(m) => lines.push(m),
                JobNotification::Result(c) => return (lines, c),
                JobNotification::Percent(_) => {}
            }
        }
    }

    #[tokio::test]
    async fn stdout_becomes_info_messages() {
        let job = TaskJob::new(ProcessTask::new("p", "sh", "echo one; echo two"));
        let (reporter, mut rx) = JobReporter::channel(Uuid::new_v4());
        job.start(reporter);

        let (lines, result) = collect(&mut rx).await;
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(result, Completion::success());
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let job = TaskJob::new(ProcessTask::new("p", "sh", "echo bad >&2; exit 3"));
        let (reporter, mut rx) = JobReporter::channel(Uuid::new_v4());
        job.start(reporter);

        let (_, result) = collect(&mut rx).await;
        assert_eq!(result.error, PROCESS_EXIT_ERROR);
        assert!(result.error_text.contains("bad"), "{}", result.error_text);
    }

    #[tokio::test]
    async fn invalid_utf8_output_is_drained() {
        let job = TaskJob::new(ProcessTask::new(
            "p",
            "sh",
            "printf '\\377\\n'; head -c 300000 /dev/zero; echo; printf 'bad \\377\\n' >&2; echo done",
        ));
        let (reporter, mut rx) = JobReporter::channel(Uuid::new_v4());
        job.start(reporter);

        let (lines, result) = collect(&mut rx).await;
        assert_eq!(result, Completion::success());
        assert_eq!(lines.first().map(String::as_str), Some("\u{FFFD}"));
        assert_eq!(lines.last().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn env_is_passed() {
        let env = HashMap::from([("SEQJOB_TEST".to_string(), "42".to_string())]);
        let job = TaskJob::new(ProcessTask::new("p", "sh", "echo $SEQJOB_TEST").with_env(env));
        let (reporter, mut rx) = JobReporter::channel(Uuid::new_v4());
        job.start(reporter);

        let (lines, _) = collect(&mut rx).await;
        assert_eq!(lines, vec!["42".to_string()]);
    }

    #[tokio::test]
    async fn kill_stops_process() {
        let job = TaskJob::new(ProcessTask::new("p", "sh", "sleep 30"));
        let (reporter, mut rx) = JobReporter::channel(Uuid::new_v4());
        job.start(reporter);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(job.kill());

        let (_, result) = collect(&mut rx).await;
        assert_eq!(result.error, KILLED_JOB_ERROR);
    }

    #[tokio::test]
    async fn missing_shell_fails_to_spawn() {
        let job = TaskJob::new(ProcessTask::new("p", "/nonexistent/shell", "true"));
        let (reporter, mut rx) = JobReporter::channel(Uuid::new_v4());
        job.start(reporter);

        let (_, result) = collect(&mut rx).await;
        assert_eq!(result.error, PROCESS_SPAWN_ERROR);
    }
}
