//! Migration engine: per-item pipeline, batch scheduler, run state machine
//! and the control facade the API and CLI drive.

pub mod control;
pub mod machine;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod state;

pub use control::{MigrationControl, RequeueReport, StartReport};
pub use machine::{StartOutcome, TransitionError};
pub use pipeline::ItemPipeline;
pub use scheduler::{BatchScheduler, SchedulerConfig};
pub use source::{FetchError, FetchedMedia, MediaSource, SourceFetcher};
pub use state::{ItemResolution, StateHandle};
