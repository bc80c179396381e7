//! Playback clock shared between the audio and video consumers

mod clock;

pub use clock::{SharedClock, SyncMonitor, SyncSnapshot, DRIFT_THRESHOLD_MS};
