//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// avsession - real-time media session
///
/// Play a media input with synchronized audio and video while optionally
/// re-encoding it to a file.
#[derive(Parser, Debug)]
#[command(name = "avsession")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Configuration file (default: avsession.toml or user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Play an input, optionally recording it
    Play {
        /// Input locator: an .avr file or synth:[key=value,...]
        input: String,

        /// Re-encode the input to this .avr file while playing
        #[arg(short, long)]
        record: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<f64>,

        /// Do not render video
        #[arg(long)]
        no_video: bool,

        /// Do not play audio
        #[arg(long)]
        no_audio: bool,
    },

    /// Show stream information of an input
    Probe {
        /// Input locator
        input: String,
    },

    /// Write a sample configuration file
    Config {
        /// Output path (default: print to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Args {
    /// Get the log level from verbose/quiet flags, falling back to `configured`
    pub fn log_level(&self, configured: &str) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        match self.verbose {
            0 => configured.parse().unwrap_or(tracing::Level::INFO),
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_play() {
        let args = Args::parse_from([
            "avsession",
            "play",
            "synth:seconds=2",
            "--record",
            "out.avr",
            "-s",
            "1.5",
            "--no-video",
        ]);
        assert_eq!(
            args.command,
            Command::Play {
                input: "synth:seconds=2".to_string(),
                record: Some(PathBuf::from("out.avr")),
                seconds: Some(1.5),
                no_video: true,
                no_audio: false,
            }
        );
    }

    #[test]
    fn test_log_level() {
        let args = Args::parse_from(["avsession", "probe", "in.avr"]);
        assert_eq!(args.log_level("warn"), tracing::Level::WARN);
        assert_eq!(args.log_level("nonsense"), tracing::Level::INFO);

        let args = Args::parse_from(["avsession", "-vv", "probe", "in.avr"]);
        assert_eq!(args.log_level("warn"), tracing::Level::TRACE);

        let args = Args::parse_from(["avsession", "probe", "in.avr", "-q"]);
        assert_eq!(args.log_level("debug"), tracing::Level::ERROR);
    }
}
