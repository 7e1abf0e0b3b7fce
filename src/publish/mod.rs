//! Video publishing: the job state machine, readiness polling and the
//! orchestrator that drives every platform through them.

mod job;
mod orchestrator;
mod poll;
mod tracker;

pub use job::{JobState, PublishJob, PublishRequest, PublishResult, PublishStatus, MAX_CAPTION_CHARS};
pub use orchestrator::PublishOrchestrator;
pub use poll::Backoff;
pub use tracker::{JobTracker, TrackedJob};
