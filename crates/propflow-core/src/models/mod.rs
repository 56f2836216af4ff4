pub mod classification;
pub mod media;
pub mod progress;
pub mod run;

pub use classification::{Classification, RawClassification, RoomLabel};
pub use media::{ItemUpdate, MediaItem, MediaStatus, MediaType, StatusCounts};
pub use progress::BatchProgress;
pub use run::{MigrationRun, RunState};
