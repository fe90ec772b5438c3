//! Pipeline orchestration: lifecycle, streaming loop and file playback

pub mod playback;
pub mod session;
pub mod state;

pub use playback::{run_playback, PlaybackEnd, PlaybackReport};
pub use session::{SessionEnd, SessionReport, SessionStats, Step, StreamingSession};
pub use state::{Lifecycle, PipelineState};
