//! Configuration: command line and TOML file

mod args;
mod file;

pub use args::{Args, Command};
pub use file::{
    BufferSection, ConfigError, PlaybackSection, ReaderSection, RecordingSection, SessionConfig,
    SessionOptions, LOCAL_CONFIG_FILE,
};
