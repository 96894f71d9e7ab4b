use crate::core::error::JobError;
use crate::core::job::{Job, JobReporter};
use crate::core::model::{Capabilities, Completion, USER_DEFINED_ERROR};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};

/// Async work that [`TaskJob`] turns into a [`Job`].
#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> &str {
        "task"
    }

    async fn run(&self, ctx: &TaskContext) -> Result<(), JobError>;
}

/// Handle a running task uses to report progress and honour suspension.
#[derive(Clone)]
pub struct TaskContext {
    reporter: JobReporter,
    suspended: watch::Receiver<bool>,
}

impl TaskContext {
    pub fn set_percent(&self, percent: u32) {
        self.reporter.set_percent(percent);
    }

    pub fn info_message(&self, message: impl Into<String>) {
        self.reporter.info_message(message);
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspended.borrow()
    }

    /// Waits while the job is suspended.
    pub async fn checkpoint(&self) {
        let mut rx = self.suspended.clone();
        let _ = rx.wait_for(|suspended| !*suspended).await;
    }
}

#[derive(Default)]
struct TaskState {
    started: bool,
    cancel: Option<oneshot::Sender<()>>,
    suspend: Option<watch::Sender<bool>>,
}

/// Runs a [`Task`] on the tokio runtime when started.
///
/// Killing drops the task's future at its next await point and completes the
/// job with `KILLED_JOB_ERROR`.
pub struct TaskJob<T: Task> {
    task: Arc<T>,
    capabilities: Capabilities,
    state: Mutex<TaskState>,
}

impl<T: Task> TaskJob<T> {
    pub fn new(task: T) -> Self {
        Self {
            task: Arc::new(task),
            capabilities: Capabilities::KILLABLE,
            state: Mutex::new(TaskState::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskJob<FnTask> {
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self::new(FnTask::new(name, f))
    }
}

impl<T: Task> Job for TaskJob<T> {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn start(&self, reporter: JobReporter) {
        let mut state = self.lock();
        if state.started {
            tracing::warn!(job = %reporter.job_id(), name = self.task.name(), "task job started twice");
            return;
        }
        state.started = true;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            reporter.emit_result(Completion::failure(USER_DEFINED_ERROR, "no tokio runtime to run the task on"));
            return;
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (suspend_tx, suspend_rx) = watch::channel(false);
        state.cancel = Some(cancel_tx);
        state.suspend = Some(suspend_tx);

        let ctx = TaskContext { reporter: reporter.clone(), suspended: suspend_rx };
        let task = Arc::clone(&self.task);
        runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                Ok(()) = cancel_rx => Err(JobError::killed()),
                r = task.run(&ctx) => r,
            };
            reporter.finish(result);
        });
    }

    fn kill(&self) -> bool {
        if !self.capabilities.is_killable() {
            return false;
        }
        match self.lock().cancel.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    fn suspend(&self) -> bool {
        if !self.capabilities.is_suspendable() {
            return false;
        }
        match &self.lock().suspend {
            Some(tx) if !tx.is_closed() && !*tx.borrow() => {
                tx.send_replace(true);
                true
            }
            _ => false,
        }
    }

    fn resume(&self) -> bool {
        match &self.lock().suspend {
            Some(tx) if *tx.borrow() => {
                tx.send_replace(false);
                true
            }
            _ => false,
        }
    }
}

type TaskFn = dyn Fn(TaskContext) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync;

/// A [`Task`] built from a closure.
pub struct FnTask {
    name: String,
    f: Box<TaskFn>,
}

impl FnTask {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self { name: name.into(), f: Box::new(move |ctx| f(ctx).boxed()) }
    }
}

#[async_trait]
impl Task for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<(), JobError> {
        (self.f)(ctx.clone()).await
    }
}
