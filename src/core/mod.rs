pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod model;
pub mod percent;
pub mod task;
