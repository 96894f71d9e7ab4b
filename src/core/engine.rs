use crate::core::config::CompoundJobConfig;
use crate::core::error::{CompoundJobError, JobError};
use crate::core::events::{CompoundEvent, Envelope, JobNotification};
use crate::core::job::{Job, JobReporter};
use crate::core::model::*;
use crate::core::percent::{finished_percent, running_percent, PercentTracker};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct Subjob {
    id: JobId,
    name: String,
    // Read once when the job is added.
    capabilities: Capabilities,
    job: Arc<dyn Job>,
}

impl Subjob {
    fn is(&self, ptr: *const ()) -> bool {
        Arc::as_ptr(&self.job).cast::<()>() == ptr
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillState {
    Idle,
    /// `kill()` is calling into this subjob with the lock released.
    Forwarding(JobId),
    /// The active subjob accepted; its completion ends the job as `Killed`.
    Pending(KillMode),
}

/// A subjob start, made once the core lock has been released.
#[must_use]
struct StartCall {
    job: Arc<dyn Job>,
    reporter: JobReporter,
}

impl StartCall {
    fn run(self) {
        self.job.start(self.reporter);
    }
}

struct Core {
    status: JobStatus,
    subjobs: Vec<Subjob>,
    index: usize,
    abort_on_subjob_error: bool,
    first_failure: Option<Completion>,
    completion: Option<Completion>,
    percent: PercentTracker,
    kill: KillState,
    suspended: bool,
    // The subjob at `index` is due but held back by a suspension.
    start_deferred: bool,
    upstream: Option<JobReporter>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl Core {
    fn active(&self) -> Option<&Subjob> {
        if self.status != JobStatus::Running || self.start_deferred {
            return None;
        }
        self.subjobs.get(self.index)
    }
}

struct Shared {
    id: JobId,
    name: String,
    core: Mutex<Core>,
    events: broadcast::Sender<CompoundEvent>,
    status_tx: watch::Sender<JobStatus>,
    inbox_tx: mpsc::UnboundedSender<Envelope>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

/// Runs its subjobs one after another and reports them as a single job.
///
/// Every state transition happens under one lock, either while processing a
/// subjob notification on the driver task or inside `start`/`kill`/`suspend`/
/// `resume`. Whichever reaches the lock first decides a kill/completion race.
/// Calls into subjobs are made with the lock released, so a subjob may read
/// the compound job from its own `start` or `kill`.
///
/// The driver task only holds a weak reference: once every handle is dropped
/// the job is abandoned and its driver stops.
#[derive(Clone)]
pub struct SequentialCompoundJob {
    shared: Arc<Shared>,
}

impl SequentialCompoundJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CompoundJobConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CompoundJobConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (status_tx, _) = watch::channel(JobStatus::NotStarted);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let core = Core {
            status: JobStatus::NotStarted,
            subjobs: vec![],
            index: 0,
            abort_on_subjob_error: config.abort_on_subjob_error,
            first_failure: None,
            completion: None,
            percent: PercentTracker::default(),
            kill: KillState::Idle,
            suspended: false,
            start_deferred: false,
            upstream: None,
            started_at: None,
            finished_at: None,
        };

        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                name: name.into(),
                core: Mutex::new(core),
                events,
                status_tx,
                inbox_tx,
                inbox_rx: Mutex::new(Some(inbox_rx)),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompoundEvent> {
        self.shared.events.subscribe()
    }

    pub fn set_abort_on_subjob_error(&self, abort: bool) {
        self.shared.lock().abort_on_subjob_error = abort;
    }

    pub fn abort_on_subjob_error(&self) -> bool {
        self.shared.lock().abort_on_subjob_error
    }

    /// Appends `job`; returns the id its notifications will carry.
    pub fn add_subjob(&self, job: Arc<dyn Job>) -> Result<JobId, CompoundJobError> {
        if job.compound_id() == Some(self.shared.id) {
            warn!(compound = %self.shared.id, "compound job added to itself");
            return Err(CompoundJobError::SelfSubjob);
        }
        let name = job.name().to_string();
        let capabilities = job.capabilities();

        let mut core = self.shared.lock();
        if core.status != JobStatus::NotStarted {
            warn!(compound = %self.shared.id, status = %core.status, "add_subjob after start rejected");
            return Err(CompoundJobError::AlreadyStarted);
        }
        let ptr = Arc::as_ptr(&job).cast::<()>();
        if let Some(existing) = core.subjobs.iter().find(|s| s.is(ptr)) {
            return Err(CompoundJobError::DuplicateSubjob(existing.id));
        }

        let id = Uuid::new_v4();
        debug!(compound = %self.shared.id, subjob = %id, name = %name, "subjob added");
        core.subjobs.push(Subjob { id, name, capabilities, job });
        Ok(id)
    }

    pub fn remove_subjob<J: Job + ?Sized>(&self, job: &Arc<J>) -> Result<JobId, CompoundJobError> {
        let mut core = self.shared.lock();
        if core.status != JobStatus::NotStarted {
            warn!(compound = %self.shared.id, status = %core.status, "remove_subjob after start rejected");
            return Err(CompoundJobError::AlreadyStarted);
        }
        let ptr = Arc::as_ptr(job).cast::<()>();
        let pos = core
            .subjobs
            .iter()
            .position(|s| s.is(ptr))
            .ok_or(CompoundJobError::SubjobNotFound)?;
        Ok(core.subjobs.remove(pos).id)
    }

    pub fn clear_subjobs(&self) -> Result<(), CompoundJobError> {
        let mut core = self.shared.lock();
        if core.status != JobStatus::NotStarted {
            warn!(compound = %self.shared.id, status = %core.status, "clear_subjobs after start rejected");
            return Err(CompoundJobError::AlreadyStarted);
        }
        core.subjobs.clear();
        Ok(())
    }

    /// Freezes the sequence and starts the first subjob.
    ///
    /// With no subjobs the job succeeds right here. Otherwise a driver task is
    /// spawned on the current tokio runtime.
    pub fn start(&self) -> Result<(), CompoundJobError> {
        self.launch(None)
    }

    /// Asks the active subjob to cancel.
    ///
    /// `true` means the cancellation was accepted; the job becomes `Killed`
    /// once that subjob reports completion. Repeated calls while a kill is
    /// pending return `true` without contacting the subjob again. If the
    /// subjob's completion is processed while its `kill` is still running,
    /// the completion wins and this returns `false`.
    pub fn kill(&self, mode: KillMode) -> bool {
        self.request_kill(mode)
    }

    pub async fn kill_and_wait(&self, mode: KillMode) -> bool {
        if !self.kill(mode) {
            return false;
        }
        self.wait().await;
        self.status() == JobStatus::Killed
    }

    pub fn suspend(&self) -> bool {
        self.suspend_active()
    }

    pub fn resume(&self) -> bool {
        self.resume_active()
    }

    /// Resolves once the job is terminal.
    pub async fn wait(&self) -> Completion {
        let mut status = self.shared.status_tx.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = status.wait_for(|s| s.is_terminal()).await;
        self.completion()
            .unwrap_or_else(|| Completion::failure(USER_DEFINED_ERROR, "compound job ended without a result"))
    }

    pub async fn exec(&self) -> Result<(), CompoundJobError> {
        self.start()?;
        self.wait().await.into_result().map_err(CompoundJobError::from)
    }

    pub fn status(&self) -> JobStatus {
        self.shared.lock().status
    }

    pub fn percent(&self) -> u32 {
        self.shared.lock().percent.current()
    }

    pub fn error(&self) -> u32 {
        self.shared.lock().completion.as_ref().map_or(NO_ERROR, |c| c.error)
    }

    pub fn error_text(&self) -> String {
        self.shared
            .lock()
            .completion
            .as_ref()
            .map(|c| c.error_text.clone())
            .unwrap_or_default()
    }

    pub fn completion(&self) -> Option<Completion> {
        self.shared.lock().completion.clone()
    }

    pub fn result(&self) -> Option<Result<(), JobError>> {
        self.completion().map(Completion::into_result)
    }

    pub fn subjob_count(&self) -> usize {
        self.shared.lock().subjobs.len()
    }

    pub fn subjob_ids(&self) -> Vec<JobId> {
        self.shared.lock().subjobs.iter().map(|s| s.id).collect()
    }

    /// Position of the active (or next-to-run) subjob.
    pub fn current_index(&self) -> usize {
        self.shared.lock().index
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.lock().suspended
    }

    pub fn elapsed(&self) -> Option<Duration> {
        let core = self.shared.lock();
        let started = core.started_at?;
        Some(core.finished_at.unwrap_or_else(Instant::now).duration_since(started))
    }

    fn launch(&self, upstream: Option<JobReporter>) -> Result<(), CompoundJobError> {
        let shared = &self.shared;
        let mut core = shared.lock();
        if core.status != JobStatus::NotStarted {
            return Err(CompoundJobError::AlreadyStarted);
        }

        if core.subjobs.is_empty() {
            debug!(compound = %shared.id, "no subjobs, finishing in start()");
            core.upstream = upstream;
            core.started_at = Some(Instant::now());
            shared.finish(&mut core, Completion::success(), JobStatus::Succeeded, true);
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CompoundJobError::NoRuntime)?;
        let inbox = shared
            .inbox_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(CompoundJobError::AlreadyStarted)?;

        core.upstream = upstream;
        core.started_at = Some(Instant::now());
        core.index = 0;
        info!(compound = %shared.id, name = %shared.name, subjobs = core.subjobs.len(), "starting compound job");
        shared.set_status(&mut core, JobStatus::Running);
        let first = shared.start_current(&mut core);
        let status = shared.status_tx.subscribe();
        drop(core);

        runtime.spawn(Shared::drive(Arc::downgrade(shared), shared.id, inbox, status));
        if let Some(call) = first {
            call.run();
        }
        Ok(())
    }

    fn request_kill(&self, mode: KillMode) -> bool {
        let shared = &self.shared;
        let (id, job) = {
            let mut core = shared.lock();
            if core.status != JobStatus::Running {
                debug!(compound = %shared.id, status = %core.status, "kill ignored");
                return false;
            }
            match core.kill {
                KillState::Pending(_) => {
                    debug!(compound = %shared.id, "kill already requested");
                    return true;
                }
                KillState::Forwarding(id) => {
                    debug!(compound = %shared.id, subjob = %id, "kill already being forwarded");
                    return false;
                }
                KillState::Idle => {}
            }
            if core.start_deferred {
                debug!(compound = %shared.id, "killing compound job suspended between subjobs");
                shared.finish(&mut core, Completion::killed(), JobStatus::Killed, mode == KillMode::EmitResult);
                return true;
            }

            let Some(active) = core.active() else {
                return false;
            };
            if !active.capabilities.is_killable() {
                debug!(compound = %shared.id, subjob = %active.id, "active subjob is not killable");
                return false;
            }
            let (id, job) = (active.id, Arc::clone(&active.job));
            core.kill = KillState::Forwarding(id);
            (id, job)
        };

        debug!(compound = %shared.id, subjob = %id, "killing running subjob");
        let accepted = job.kill();

        let mut core = shared.lock();
        if core.kill != KillState::Forwarding(id) {
            debug!(compound = %shared.id, subjob = %id, "subjob finished before its kill was recorded");
            return false;
        }
        if accepted {
            core.kill = KillState::Pending(mode);
            true
        } else {
            debug!(compound = %shared.id, subjob = %id, "subjob declined to be killed");
            core.kill = KillState::Idle;
            false
        }
    }

    fn suspend_active(&self) -> bool {
        let shared = &self.shared;
        let (id, job) = {
            let core = shared.lock();
            if core.suspended || core.kill != KillState::Idle {
                return false;
            }
            let Some(active) = core.active() else {
                return false;
            };
            if !active.capabilities.is_suspendable() {
                debug!(compound = %shared.id, subjob = %active.id, "active subjob is not suspendable");
                return false;
            }
            (active.id, Arc::clone(&active.job))
        };

        if !job.suspend() {
            debug!(compound = %shared.id, subjob = %id, "active subjob could not be suspended");
            return false;
        }

        let mut core = shared.lock();
        if core.suspended || core.active().map(|s| s.id) != Some(id) {
            debug!(compound = %shared.id, subjob = %id, "subjob moved on while being suspended");
            return false;
        }
        core.suspended = true;
        shared.emit(CompoundEvent::Suspended);
        true
    }

    fn resume_active(&self) -> bool {
        let shared = &self.shared;
        let job = {
            let mut core = shared.lock();
            if core.status != JobStatus::Running || !core.suspended {
                return false;
            }
            if core.start_deferred {
                let next = shared.resume_sequence(&mut core);
                drop(core);
                if let Some(call) = next {
                    call.run();
                }
                return true;
            }
            let Some(active) = core.active() else {
                return false;
            };
            Arc::clone(&active.job)
        };

        if !job.resume() {
            debug!(compound = %shared.id, "active subjob could not be resumed");
            return false;
        }

        let mut core = shared.lock();
        if core.status != JobStatus::Running || !core.suspended {
            return false;
        }
        // The subjob may have finished meanwhile, leaving the next one deferred.
        let next = shared.resume_sequence(&mut core);
        drop(core);
        if let Some(call) = next {
            call.run();
        }
        true
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CompoundEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn drive(
        shared: Weak<Shared>,
        id: JobId,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
        mut status: watch::Receiver<JobStatus>,
    ) {
        loop {
            tokio::select! {
                envelope = inbox.recv() => {
                    let Some(envelope) = envelope else { break };
                    let Some(shared) = shared.upgrade() else { break };
                    if shared.handle(envelope) {
                        break;
                    }
                }
                changed = status.changed() => {
                    // Killed while suspended between subjobs, or every handle is gone.
                    if changed.is_err() || status.borrow_and_update().is_terminal() {
                        break;
                    }
                }
            }
        }
        debug!(compound = %id, "driver stopped");
    }

    /// Returns whether the job is now terminal.
    fn handle(&self, envelope: Envelope) -> bool {
        let mut core = self.lock();
        let next = self.dispatch(&mut core, envelope);
        let terminal = core.status.is_terminal();
        drop(core);
        if let Some(call) = next {
            call.run();
        }
        terminal
    }

    fn dispatch(&self, core: &mut Core, envelope: Envelope) -> Option<StartCall> {
        let Envelope { job_id, notification } = envelope;
        if core.status != JobStatus::Running {
            debug!(compound = %self.id, subjob = %job_id, "notification after finish ignored");
            return None;
        }

        let is_active = core.active().is_some_and(|s| s.id == job_id);
        if !is_active {
            match notification {
                JobNotification::Result(_) => {
                    let detail = "result from a subjob that is not running";
                    warn!(compound = %self.id, subjob = %job_id, "{detail}");
                    self.emit(CompoundEvent::ContractViolation { job_id, detail: detail.to_string() });
                }
                _ => debug!(compound = %self.id, subjob = %job_id, "ignoring notification from an inactive subjob"),
            }
            return None;
        }

        match notification {
            JobNotification::Percent(percent) => {
                let total = running_percent(core.index, percent, core.subjobs.len());
                debug!(compound = %self.id, subjob_percent = percent, total, "subjob percent");
                self.set_percent(core, total);
                None
            }
            JobNotification::InfoMessage(message) => {
                if let Some(up) = &core.upstream {
                    up.info_message(message.clone());
                }
                self.emit(CompoundEvent::InfoMessage { job_id, message });
                None
            }
            JobNotification::Result(completion) => self.subjob_finished(core, job_id, completion),
        }
    }

    fn subjob_finished(&self, core: &mut Core, job_id: JobId, completion: Completion) -> Option<StartCall> {
        let index = core.index;
        let total = core.subjobs.len();
        self.emit(CompoundEvent::SubjobFinished { index, job_id, error: completion.error });

        match std::mem::replace(&mut core.kill, KillState::Idle) {
            KillState::Pending(mode) => {
                debug!(compound = %self.id, subjob = %job_id, error = completion.error, "killed subjob finished");
                self.finish(core, Completion::killed(), JobStatus::Killed, mode == KillMode::EmitResult);
                return None;
            }
            KillState::Forwarding(_) => {
                debug!(compound = %self.id, subjob = %job_id, "subjob finished while a kill was being forwarded");
            }
            KillState::Idle => {}
        }

        let reached = index + 1;
        debug!(compound = %self.id, subjob = %job_id, error = completion.error, "subjob {} of {} finished", reached, total);
        self.set_percent(core, finished_percent(reached, total));

        if completion.is_error() {
            if core.abort_on_subjob_error {
                debug!(compound = %self.id, error = completion.error, text = %completion.error_text, "aborting on subjob error");
                self.finish(core, completion, JobStatus::Failed, true);
                return None;
            }
            match &core.first_failure {
                None => core.first_failure = Some(completion),
                Some(_) => debug!(compound = %self.id, error = completion.error, "later subjob failure tolerated"),
            }
        }

        if reached == total {
            match core.first_failure.take() {
                Some(failure) => self.finish(core, failure, JobStatus::Failed, true),
                None => self.finish(core, Completion::success(), JobStatus::Succeeded, true),
            }
            return None;
        }

        core.index = reached;
        self.start_current(core)
    }

    /// Clears the suspension and starts a subjob that was held back by it.
    fn resume_sequence(&self, core: &mut Core) -> Option<StartCall> {
        core.suspended = false;
        self.emit(CompoundEvent::Resumed);
        if core.start_deferred {
            self.start_current(core)
        } else {
            None
        }
    }

    fn start_current(&self, core: &mut Core) -> Option<StartCall> {
        let index = core.index;
        let total = core.subjobs.len();
        let Some(subjob) = core.subjobs.get(index) else {
            warn!(compound = %self.id, index, total, "no subjob at current index");
            return None;
        };
        let (id, name, job) = (subjob.id, subjob.name.clone(), Arc::clone(&subjob.job));

        if core.suspended {
            debug!(compound = %self.id, subjob = %id, "suspended, deferring next subjob");
            core.start_deferred = true;
            return None;
        }
        core.start_deferred = false;

        debug!(compound = %self.id, subjob = %id, "starting subjob {} of {}: {}", index + 1, total, name);
        self.emit(CompoundEvent::SubjobStarted { index, job_id: id, name });
        Some(StartCall { job, reporter: JobReporter::new(id, self.inbox_tx.clone()) })
    }

    fn set_percent(&self, core: &mut Core, percent: u32) {
        if let Some(p) = core.percent.advance(percent) {
            self.emit(CompoundEvent::Percent { percent: p });
            if let Some(up) = &core.upstream {
                up.set_percent(p);
            }
        }
    }

    fn set_status(&self, core: &mut Core, status: JobStatus) {
        core.status = status;
        self.status_tx.send_replace(status);
        self.emit(CompoundEvent::StatusChanged { status });
    }

    fn finish(&self, core: &mut Core, completion: Completion, status: JobStatus, announce: bool) {
        if status == JobStatus::Succeeded {
            self.set_percent(core, 100);
        }
        core.suspended = false;
        core.start_deferred = false;
        core.kill = KillState::Idle;
        core.finished_at = Some(Instant::now());
        core.completion = Some(completion.clone());

        info!(
            compound = %self.id,
            name = %self.name,
            %status,
            error = completion.error,
            text = %completion.error_text,
            "compound job finished"
        );
        self.set_status(core, status);
        if announce {
            self.emit(CompoundEvent::Finished(completion.clone()));
        }
        if let Some(up) = core.upstream.take() {
            up.emit_result(completion);
        }
    }
}

impl Job for SequentialCompoundJob {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::KILLABLE | Capabilities::SUSPENDABLE
    }

    fn compound_id(&self) -> Option<JobId> {
        Some(self.shared.id)
    }

    fn start(&self, reporter: JobReporter) {
        if let Err(e) = self.launch(Some(reporter.clone())) {
            warn!(compound = %self.shared.id, "start as subjob failed: {e}");
            reporter.emit_result(Completion::failure(USER_DEFINED_ERROR, e.to_string()));
        }
    }

    fn kill(&self) -> bool {
        self.request_kill(KillMode::EmitResult)
    }

    fn suspend(&self) -> bool {
        self.suspend_active()
    }

    fn resume(&self) -> bool {
        self.resume_active()
    }
}

impl fmt::Debug for SequentialCompoundJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("SequentialCompoundJob")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("status", &core.status)
            .field("index", &core.index)
            .field("subjobs", &core.subjobs.len())
            .finish()
    }
}
