use async_trait::async_trait;
use crate::core::job::Job;
use crate::core::model::Capabilities;
use crate::core::task::TaskJob;
use crate::plugins::builtin::driver::{EchoTask, FailTask, SleepTask};
use crate::plugins::registry::{ResolveContext, StepInput, StepResolver};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

/// `sleep:<ms>`, `fail:<code>[:<text>]` and `echo:<text>`.
pub struct BuiltinResolver;

impl BuiltinResolver {
    pub fn new() -> Self { Self }
}

#[async_trait]
impl StepResolver for BuiltinResolver {
    fn name(&self) -> &'static str { "builtin" }

    fn can_handle(&self, input: &StepInput) -> u8 {
        match input.kind_and_body().0 {
            Some("sleep" | "fail" | "echo") => 80,
            _ => 0,
        }
    }

    async fn resolve(&self, input: &StepInput, _ctx: &ResolveContext) -> anyhow::Result<Arc<dyn Job>> {
        let name = input.raw.clone();
        let job: Arc<dyn Job> = match input.kind_and_body() {
            (Some("sleep"), ms) => {
                let ms: u64 = ms.trim().parse().with_context(|| format!("invalid sleep duration: {ms}"))?;
                Arc::new(
                    TaskJob::new(SleepTask::new(name, Duration::from_millis(ms)))
                        .with_capabilities(Capabilities::KILLABLE | Capabilities::SUSPENDABLE),
                )
            }
            (Some("fail"), rest) => {
                let (code, text) = rest.split_once(':').unwrap_or((rest, "failed"));
                let code: u32 = code.trim().parse().with_context(|| format!("invalid error code: {code}"))?;
                if code == 0 {
                    anyhow::bail!("fail step needs a nonzero code");
                }
                Arc::new(TaskJob::new(FailTask::new(name, code, text)))
            }
            (Some("echo"), text) => Arc::new(TaskJob::new(EchoTask::new(name, text))),
            _ => anyhow::bail!("not a builtin step: {}", input.raw),
        };
        Ok(job)
    }
}

