#![allow(dead_code)]

use seqjob::{Capabilities, CompoundEvent, Completion, Job, JobReporter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// A subjob the test drives by hand.
pub struct ManualJob {
    name: String,
    capabilities: Capabilities,
    kill_accepted: AtomicBool,
    reporter: Mutex<Option<JobReporter>>,
    starts: AtomicUsize,
    kills: AtomicUsize,
    suspends: AtomicUsize,
    resumes: AtomicUsize,
    start_log: Option<Arc<Mutex<Vec<String>>>>,
}

impl ManualJob {
    pub fn new(name: &str) -> Arc<Self> {
        Self::build(name, Capabilities::NONE, true, None)
    }

    pub fn killable(name: &str, kill_accepted: bool) -> Arc<Self> {
        Self::build(name, Capabilities::KILLABLE, kill_accepted, None)
    }

    pub fn suspendable(name: &str) -> Arc<Self> {
        Self::build(name, Capabilities::KILLABLE | Capabilities::SUSPENDABLE, true, None)
    }

    pub fn logged(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Self::build(name, Capabilities::NONE, true, Some(Arc::clone(log)))
    }

    fn build(name: &str, capabilities: Capabilities, kill_accepted: bool, start_log: Option<Arc<Mutex<Vec<String>>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            capabilities,
            kill_accepted: AtomicBool::new(kill_accepted),
            reporter: Mutex::new(None),
            starts: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            suspends: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            start_log,
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn suspends(&self) -> usize {
        self.suspends.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn set_kill_accepted(&self, accepted: bool) {
        self.kill_accepted.store(accepted, Ordering::SeqCst);
    }

    /// Whether the compound job stopped listening to this subjob.
    pub fn reporter_closed(&self) -> bool {
        self.reporter().is_closed()
    }

    fn reporter(&self) -> JobReporter {
        self.reporter
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| panic!("{} was never started", self.name))
    }

    pub fn percent(&self, percent: u32) {
        self.reporter().set_percent(percent);
    }

    pub fn info(&self, message: &str) {
        self.reporter().info_message(message);
    }

    pub fn finish(&self, error: u32, text: &str) {
        self.reporter().emit_result(Completion::failure(error, text));
    }

    pub fn succeed(&self) {
        self.reporter().emit_result(Completion::success());
    }
}

impl Job for ManualJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn start(&self, reporter: JobReporter) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.start_log {
            log.lock().unwrap().push(self.name.clone());
        }
        *self.reporter.lock().unwrap() = Some(reporter);
    }

    fn kill(&self) -> bool {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.kill_accepted.load(Ordering::SeqCst)
    }

    fn suspend(&self) -> bool {
        self.suspends.fetch_add(1, Ordering::SeqCst);
        self.capabilities.is_suspendable()
    }

    fn resume(&self) -> bool {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.capabilities.is_suspendable()
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<CompoundEvent>) -> CompoundEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout waiting for compound event")
        .expect("event channel closed")
}

/// Skips events until one matches.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<CompoundEvent>, mut pred: F) -> CompoundEvent
where
    F: FnMut(&CompoundEvent) -> bool,
{
    loop {
        let evt = next_event(rx).await;
        if pred(&evt) {
            return evt;
        }
    }
}

pub async fn wait_started(rx: &mut broadcast::Receiver<CompoundEvent>, index: usize) {
    wait_for_event(rx, |e| matches!(e, CompoundEvent::SubjobStarted { index: i, .. } if *i == index)).await;
}

/// Events published until the job is terminal, inclusive.
pub async fn drain_until_terminal(rx: &mut broadcast::Receiver<CompoundEvent>) -> Vec<CompoundEvent> {
    let mut events = vec![];
    loop {
        let evt = next_event(rx).await;
        let done = matches!(&evt, CompoundEvent::StatusChanged { status } if status.is_terminal());
        events.push(evt);
        if done {
            // Finished follows StatusChanged when it is announced.
            while let Ok(evt) = rx.try_recv() {
                events.push(evt);
            }
            return events;
        }
    }
}

pub fn percents(events: &[CompoundEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            CompoundEvent::Percent { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}
