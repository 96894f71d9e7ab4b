use crate::plugins::process::resolver::ENV_OPTION_PREFIX;
use crate::plugins::registry::{CliPlugin, RunCliConfig};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub struct ProcessCliPlugin;

impl ProcessCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl CliPlugin for ProcessCliPlugin {
    fn name(&self) -> &'static str {
        "process"
    }

    fn augment_run_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("process_shell")
                .long("shell")
                .help_heading("PROCESS")
                .help("Shell used to run command steps (invoked as <shell> -c <command>)")
                .default_value("sh")
                .num_args(1),
        )
        .arg(
            Arg::new("process_env")
                .long("env")
                .help_heading("PROCESS")
                .help("Extra environment variable for command steps (repeatable), e.g. --env RUST_LOG=debug")
                .action(ArgAction::Append)
                .num_args(1),
        )
    }

    fn apply_run_matches(&self, matches: &ArgMatches, cfg: &mut RunCliConfig) -> anyhow::Result<()> {
        if let Some(shell) = matches.get_one::<String>("process_shell") {
            cfg.resolve_ctx.shell = shell.clone();
        }

        if let Some(values) = matches.get_many::<String>("process_env") {
            for kv in values {
                let (k, v) = kv
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("invalid env format: {}", kv))?;
                cfg.options.insert(format!("{ENV_OPTION_PREFIX}{}", k.trim()), v.to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shell_and_env() {
        let plugin = ProcessCliPlugin::new();
        let cmd = plugin.augment_run_command(Command::new("run"));
        let m = cmd
            .try_get_matches_from(["run", "--shell", "bash", "--env", "A=1", "--env", "B=x=y"])
            .unwrap();

        let mut cfg = RunCliConfig::default();
        plugin.apply_run_matches(&m, &mut cfg).unwrap();
        assert_eq!(cfg.resolve_ctx.shell, "bash");
        assert_eq!(cfg.options.get("env.A").map(String::as_str), Some("1"));
        assert_eq!(cfg.options.get("env.B").map(String::as_str), Some("x=y"));
    }

    #[test]
    fn rejects_malformed_env() {
        let plugin = ProcessCliPlugin::new();
        let m = plugin
            .augment_run_command(Command::new("run"))
            .try_get_matches_from(["run", "--env", "NOPE"])
            .unwrap();
        assert!(plugin.apply_run_matches(&m, &mut RunCliConfig::default()).is_err());
    }
}
