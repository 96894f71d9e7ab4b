use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use futures::stream::{self, Stream, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use seqjob::plugins::registry::{PluginRegistry, RunCliConfig, StepInput};
use seqjob::{CompoundEvent, Completion, KillMode, SequentialCompoundJob};
use tokio::sync::broadcast;

const INTERRUPTED_EXIT_CODE: i32 = 130;

fn build_cli(registry: &PluginRegistry) -> Command {
    let run = Command::new("run")
        .about("Run steps one after another as a single job")
        .arg(
            Arg::new("steps")
                .help("Steps: sh:<command>, sleep:<ms>, fail:<code>[:<text>], echo:<text>, or a bare shell command")
                .action(ArgAction::Append)
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new("keep_going")
                .long("keep-going")
                .help("Keep running after a failed step; the first failure is reported at the end")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("event_capacity")
                .long("event-capacity")
                .help("Capacity of the progress event channel")
                .default_value("256")
                .num_args(1),
        )
        .arg(
            Arg::new("log_json")
                .long("log-json")
                .help("Write logs to stderr as JSON")
                .action(ArgAction::SetTrue),
        );

    let run = registry.augment_run_command(run);

    Command::new("seqjob")
        .about("Sequential compound job runner")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(run)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = PluginRegistry::with_defaults();
    let matches = build_cli(&registry).get_matches();

    let Some(("run", m)) = matches.subcommand() else {
        return Ok(());
    };

    seqjob::logging::init("warn", m.get_flag("log_json"));

    let mut cfg = RunCliConfig::default();
    cfg.compound.abort_on_subjob_error = !m.get_flag("keep_going");
    if let Some(s) = m.get_one::<String>("event_capacity") {
        cfg.compound.event_capacity = s.parse().context("invalid --event-capacity")?;
    }
    registry.apply_run_matches(m, &mut cfg)?;

    let compound = SequentialCompoundJob::with_config("seqjob", cfg.compound.clone());
    let steps: Vec<String> = m
        .get_many::<String>("steps")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();

    for raw in steps {
        let input = StepInput { raw, options: cfg.options.clone() };
        let job = registry
            .resolve(&input, &cfg.resolve_ctx)
            .await
            .with_context(|| format!("resolve step `{}`", input.raw))?;
        compound.add_subjob(job)?;
    }

    let ui_task = tokio::spawn(render(compound.subscribe(), compound.subjob_count()));
    compound.start()?;

    let interrupts = Box::pin(stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    }));
    let Some(completion) = wait_or_interrupt(&compound, interrupts).await else {
        eprintln!("interrupted again, exiting");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    };

    let _ = ui_task.await;

    let elapsed = compound.elapsed().map(|d| format!("{:.1}s", d.as_secs_f64())).unwrap_or_default();
    println!("Job {}: {} ({})", compound.id(), compound.status(), elapsed);

    if completion.is_error() {
        eprintln!("error {}: {}", completion.error, completion.error_text);
        std::process::exit(exit_code(&completion));
    }
    Ok(())
}

/// Waits for the job. The first interrupt kills it; a second one gives up and
/// returns `None`.
async fn wait_or_interrupt<S>(compound: &SequentialCompoundJob, mut interrupts: S) -> Option<Completion>
where
    S: Stream<Item = ()> + Unpin,
{
    let wait = compound.wait();
    tokio::pin!(wait);
    let mut presses = 0u32;
    loop {
        tokio::select! {
            c = &mut wait => return Some(c),
            Some(()) = interrupts.next() => {
                presses += 1;
                if presses > 1 {
                    return None;
                }
                tracing::warn!("interrupted, killing the running step");
                if !compound.kill(KillMode::EmitResult) {
                    eprintln!("the running step cannot be killed; press Ctrl-C again to exit");
                }
            }
        }
    }
}

async fn render(mut rx: broadcast::Receiver<CompoundEvent>, total: usize) {
    let mp = MultiProgress::new();
    let overall = mp.add(ProgressBar::new(100));
    overall.set_style(
        ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {pos:>3}% {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    overall.set_prefix("[seqjob]");

    loop {
        let evt = match rx.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                let _ = mp.println(format!("[WARN] dropped {} progress events", n));
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match evt {
            CompoundEvent::SubjobStarted { index, name, .. } => {
                overall.set_message(format!("[{}/{}] {}", index + 1, total, name));
            }
            CompoundEvent::SubjobFinished { index, error, .. } => {
                let outcome = if error == 0 { "ok".to_string() } else { format!("failed ({})", error) };
                let _ = mp.println(format!("[STEP {}/{}] {}", index + 1, total, outcome));
            }
            CompoundEvent::Percent { percent } => overall.set_position(u64::from(percent)),
            CompoundEvent::InfoMessage { message, .. } => {
                let _ = mp.println(format!("  {}", message));
            }
            CompoundEvent::Suspended => overall.set_message("suspended"),
            CompoundEvent::Resumed => overall.set_message("resumed"),
            CompoundEvent::ContractViolation { job_id, detail } => {
                let _ = mp.println(format!("[WARN] {}: {}", job_id, detail));
            }
            CompoundEvent::Finished(_) => {}
            CompoundEvent::StatusChanged { status } => {
                if status.is_terminal() {
                    overall.finish_with_message(status.to_string());
                    break;
                }
            }
        }
    }
}

fn exit_code(completion: &Completion) -> i32 {
    completion.error.clamp(1, 255) as i32
}
