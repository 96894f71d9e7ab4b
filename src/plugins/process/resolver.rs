use async_trait::async_trait;
use crate::core::job::Job;
use crate::core::task::TaskJob;
use crate::plugins::process::driver::ProcessTask;
use crate::plugins::registry::{ResolveContext, StepInput, StepResolver};
use std::collections::HashMap;
use std::sync::Arc;

pub const ENV_OPTION_PREFIX: &str = "env.";

/// `sh:<command>`, and any step without a known kind.
pub struct ProcessResolver;

impl ProcessResolver {
    pub fn new() -> Self { Self }
}

#[async_trait]
impl StepResolver for ProcessResolver {
    fn name(&self) -> &'static str { "process" }

    fn can_handle(&self, input: &StepInput) -> u8 {
        match input.kind_and_body() {
            (Some("sh"), _) => 80,
            (None, body) if !body.trim().is_empty() => 10,
            _ => 0,
        }
    }

    async fn resolve(&self, input: &StepInput, ctx: &ResolveContext) -> anyhow::Result<Arc<dyn Job>> {
        let command = match input.kind_and_body() {
            (Some("sh"), body) | (None, body) => body.trim(),
            _ => anyhow::bail!("not a shell step: {}", input.raw),
        };
        if command.is_empty() {
            anyhow::bail!("empty shell command");
        }

        let env: HashMap<String, String> = input
            .options
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(ENV_OPTION_PREFIX).map(|k| (k.to_string(), v.clone())))
            .collect();

        let task = ProcessTask::new(input.raw.clone(), ctx.shell.clone(), command).with_env(env);
        Ok(Arc::new(TaskJob::new(task)))
    }
}
