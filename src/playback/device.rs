//! Audio output devices

use crate::error::{Result, SessionError};
use crate::media::AudioDescriptor;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Callback filling one period of interleaved output samples
pub type PullCallback = Box<dyn FnMut(&mut [u8]) + Send>;

/// Stream parameters requested from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputParams {
    pub descriptor: AudioDescriptor,
    /// Samples per channel requested by each callback
    pub period_samples: usize,
}

impl OutputParams {
    pub fn period_bytes(&self) -> usize {
        self.descriptor.bytes_for_samples(self.period_samples)
    }

    pub fn period_duration(&self) -> Duration {
        Duration::from_secs_f64(self.period_samples as f64 / self.descriptor.sample_rate.max(1) as f64)
    }
}

/// Something that can open audio output streams
pub trait AudioDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Open a stream that calls `callback` once per period after `start`
    fn open(&self, params: OutputParams, callback: PullCallback) -> Result<Box<dyn AudioStream>>;
}

/// An open output stream
pub trait AudioStream: Send {
    fn start(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Device driven by a timer thread instead of sound hardware
///
/// Each stream gets a thread that invokes the callback once per period at
/// real-time pace and discards the samples. Useful for headless playback
/// and for exercising the real-time pull path.
#[derive(Debug, Default, Clone)]
pub struct ClockedAudioDevice;

impl ClockedAudioDevice {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDevice for ClockedAudioDevice {
    fn name(&self) -> &str {
        "clocked"
    }

    fn open(&self, params: OutputParams, callback: PullCallback) -> Result<Box<dyn AudioStream>> {
        params.descriptor.validate()?;
        if params.period_samples == 0 {
            return Err(SessionError::setup("audio output", "period size is zero"));
        }
        Ok(Box::new(ClockedStream::spawn(params, callback)?))
    }
}

/// Command sent to the clock thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamCommand {
    Start,
    Pause,
    Resume,
    Stop,
}

struct ClockedStream {
    command_tx: Sender<StreamCommand>,
    handle: Option<JoinHandle<()>>,
}

impl ClockedStream {
    fn spawn(params: OutputParams, callback: PullCallback) -> Result<Self> {
        let (command_tx, command_rx) = bounded(8);
        let handle = thread::Builder::new()
            .name("audio-clock".to_string())
            .spawn(move || clock_thread(params, callback, command_rx))?;

        debug!(
            "Opened clocked audio stream: {}, {} samples/period",
            params.descriptor, params.period_samples
        );
        Ok(Self {
            command_tx,
            handle: Some(handle),
        })
    }

    fn send(&self, command: StreamCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| SessionError::setup("audio output", "clock thread has exited"))
    }
}

impl AudioStream for ClockedStream {
    fn start(&mut self) -> Result<()> {
        self.send(StreamCommand::Start)
    }

    fn pause(&mut self) -> Result<()> {
        self.send(StreamCommand::Pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.send(StreamCommand::Resume)
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let _ = self.command_tx.send(StreamCommand::Stop);
        if handle.join().is_err() {
            error!("Audio clock thread panicked");
        }
        Ok(())
    }
}

impl Drop for ClockedStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn clock_thread(params: OutputParams, mut callback: PullCallback, commands: Receiver<StreamCommand>) {
    let period = params.period_duration();
    let mut buffer = vec![0u8; params.period_bytes()];
    let mut playing = false;
    let mut next_tick = Instant::now();
    let mut periods: u64 = 0;

    info!("Audio clock thread started ({:?} period)", period);

    loop {
        let command = if playing {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match commands.recv_timeout(wait) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(StreamCommand::Start) | Some(StreamCommand::Resume) => {
                if !playing {
                    playing = true;
                    next_tick = Instant::now();
                }
            }
            Some(StreamCommand::Pause) => playing = false,
            Some(StreamCommand::Stop) => break,
            None => {
                callback(&mut buffer);
                periods += 1;
                next_tick += period;

                // Fell behind by more than a period, resynchronize instead of bursting
                let now = Instant::now();
                if now > next_tick + period {
                    warn!("Audio clock fell behind, skipping ahead");
                    next_tick = now;
                }
            }
        }
    }

    info!("Audio clock thread stopped after {} periods", periods);
}
