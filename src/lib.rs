//! avsession - real-time media session
//!
//! Decodes one input on a dedicated thread and fans the frames out to a
//! synchronized audio/video playback path and a re-encoding path.

pub mod buffer;
pub mod config;
pub mod container;
pub mod convert;
pub mod error;
pub mod media;
pub mod playback;
pub mod record;
pub mod session;
pub mod source;
pub mod sync;

pub use error::{Result, SessionError, SinkError};
pub use session::{Collaborators, Session, SessionDescriptors, SessionState, SessionStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
