pub mod builder;
pub mod controller;
pub mod heartbeat;
pub mod job;

pub use builder::{build_controller, open_sqlite_store, Components};
pub use controller::{ControllerSettings, JobController, JobOutcome, JobRunner};
pub use heartbeat::{Heartbeat, LeaseLost};
pub use job::{Asset, JobStatus, MediaKind, ProcessingJob};
