pub mod resume;
pub mod scope;
pub mod service;
pub mod session;
pub mod sync;
pub mod updates;

pub use resume::MediaElement;
pub use scope::TrackingScope;
pub use service::{ProgressHandle, ProgressService, SessionSnapshot};
pub use session::{FlushReason, MediaEvent, PlaybackSession};
pub use sync::{ProgressCache, ProgressSynchronizer};
pub use updates::{ProgressUpdate, ProgressUpdates};
