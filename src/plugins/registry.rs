use async_trait::async_trait;
use crate::core::config::CompoundJobConfig;
use crate::core::job::Job;
use clap::{ArgMatches, Command};
use std::collections::HashMap;
use std::sync::Arc;

/// One step as typed on the command line, e.g. `sleep:500` or `sh:make test`.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub raw: String,
    pub options: HashMap<String, String>,
}

impl StepInput {
    /// Splits `kind:rest`; bare steps have no kind.
    pub fn kind_and_body(&self) -> (Option<&str>, &str) {
        match self.raw.split_once(':') {
            Some((kind, body)) if !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphanumeric()) => {
                (Some(kind), body)
            }
            _ => (None, self.raw.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub shell: String,
}

#[async_trait]
pub trait StepResolver: Send + Sync {
    fn name(&self) -> &'static str;
    /// 0 = cannot handle; higher wins.
    fn can_handle(&self, input: &StepInput) -> u8;
    async fn resolve(&self, input: &StepInput, ctx: &ResolveContext) -> anyhow::Result<Arc<dyn Job>>;
}

#[derive(Debug, Clone)]
pub struct RunCliConfig {
    pub options: HashMap<String, String>,
    pub resolve_ctx: ResolveContext,
    pub compound: CompoundJobConfig,
}

impl Default for RunCliConfig {
    fn default() -> Self {
        Self {
            options: HashMap::new(),
            resolve_ctx: ResolveContext { shell: "sh".to_string() },
            compound: CompoundJobConfig::default(),
        }
    }
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_run_command(&self, cmd: Command) -> Command;
    fn apply_run_matches(&self, matches: &ArgMatches, cfg: &mut RunCliConfig) -> anyhow::Result<()>;
}

pub struct PluginRegistry {
    resolvers: Vec<Box<dyn StepResolver>>,
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self { resolvers: vec![], cli_plugins: vec![] };

        reg.resolvers.push(Box::new(crate::plugins::builtin::resolver::BuiltinResolver::new()));
        reg.resolvers.push(Box::new(crate::plugins::process::resolver::ProcessResolver::new()));

        reg.cli_plugins.push(Box::new(crate::plugins::process::cli::ProcessCliPlugin::new()));
        reg
    }

    pub fn augment_run_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_run_command(c))
    }

    pub fn apply_run_matches(&self, matches: &ArgMatches, cfg: &mut RunCliConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            p.apply_run_matches(matches, cfg)?;
        }
        Ok(())
    }

    pub fn best_resolver(&self, input: &StepInput) -> Option<&dyn StepResolver> {
        self.resolvers
            .iter()
            .map(|r| (r.can_handle(input), r.as_ref()))
            .max_by_key(|(c, _)| *c)
            .and_then(|(c, r)| if c == 0 { None } else { Some(r) })
    }

    pub async fn resolve(&self, input: &StepInput, ctx: &ResolveContext) -> anyhow::Result<Arc<dyn Job>> {
        let resolver = self
            .best_resolver(input)
            .ok_or_else(|| anyhow::anyhow!("no resolver for step: {}", input.raw))?;
        tracing::debug!(step = %input.raw, resolver = resolver.name(), "resolving step");
        resolver.resolve(input, ctx).await
    }
}
