#[derive(Debug, Clone)]
pub struct CompoundJobConfig {
    /// Stop at the first failing subjob instead of running the rest.
    pub abort_on_subjob_error: bool,
    /// Capacity of the observer broadcast channel.
    pub event_capacity: usize,
}

impl Default for CompoundJobConfig {
    fn default() -> Self {
        Self { abort_on_subjob_error: true, event_capacity: 256 }
    }
}
