//! Audio frames and the capture side of the loop.
//!
//! `AudioSource` is the contract the engine reads from. `CpalSource` is the
//! microphone implementation: the cpal stream lives on its own thread (cpal
//! `Stream` is !Send on some platforms) and fixed-size frames are handed over
//! a bounded channel.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One fixed-size block of mono samples as delivered by the capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Zero-filled frame, used in place of a failed read.
    pub fn silent(frame_size: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; frame_size], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Nominal duration: `len / sample_rate`.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Root mean square level of the frame.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

/// Capability contract for anything that delivers fixed-size frames.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;

    /// Frame size in samples.
    fn frame_size(&self) -> usize;

    fn start(&mut self) -> VoiceResult<()>;

    /// Blocking read of the next frame. Transient read failures yield a
    /// zero-filled frame so the loop keeps running.
    fn read_frame(&mut self) -> VoiceResult<AudioFrame>;

    /// Stop the stream. Idempotent.
    fn stop(&mut self) -> VoiceResult<()>;

    /// Release device resources. Idempotent.
    fn release(&mut self) -> VoiceResult<()>;
}

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Frame size in samples (default: 512, 32ms at 16kHz)
    pub frame_size: usize,

    /// Frames queued between the device callback and the reader before new
    /// frames are dropped (default: 64, about 2s at 16kHz/512)
    pub queue_frames: usize,

    /// How long `read_frame` waits before substituting a silent frame
    pub read_timeout: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 512,
            queue_frames: 64,
            read_timeout: Duration::from_millis(500),
        }
    }
}

/// Microphone source backed by the default cpal input device.
pub struct CpalSource {
    config: AudioConfig,
    frame_rx: Option<Receiver<Vec<f32>>>,
    stop_flag: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    capture_thread: Option<JoinHandle<()>>,
    released: bool,
}

impl CpalSource {
    pub fn new(config: AudioConfig) -> VoiceResult<Self> {
        if config.sample_rate == 0 || config.frame_size == 0 {
            return Err(VoiceError::Config(format!(
                "sample rate and frame size must be non-zero (got {}Hz / {} samples)",
                config.sample_rate, config.frame_size
            )));
        }
        Ok(Self {
            config,
            frame_rx: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            capture_thread: None,
            released: false,
        })
    }

    /// Frames dropped because the reader fell behind (e.g. during a reply).
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }

    fn is_running(&self) -> bool {
        self.capture_thread.is_some()
    }
}

/// Build and play the input stream. Runs on the capture thread.
fn open_input_stream(
    config: &AudioConfig,
    frame_tx: SyncSender<Vec<f32>>,
    dropped: Arc<AtomicU64>,
) -> VoiceResult<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::Stream("No input device available".to_string()))?;

    info!(
        device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
        sample_rate = config.sample_rate,
        frame_size = config.frame_size,
        "Opening input device"
    );

    let default_config = device.default_input_config()?;
    debug!("Default input config: {:?}", default_config);

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let frame_size = config.frame_size;
    let mut pending = Vec::with_capacity(frame_size);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                pending.push(sample);
                if pending.len() == frame_size {
                    let frame = std::mem::replace(&mut pending, Vec::with_capacity(frame_size));
                    match frame_tx.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            }
        },
        move |err| {
            warn!("Audio stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

impl AudioSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.config.frame_size
    }

    fn start(&mut self) -> VoiceResult<()> {
        if self.released {
            return Err(VoiceError::Stream("audio source already released".to_string()));
        }
        if self.is_running() {
            return Ok(());
        }

        let (frame_tx, frame_rx) = mpsc::sync_channel(self.config.queue_frames.max(1));
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();
        self.stop_flag.store(false, Ordering::SeqCst);

        let config = self.config.clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let dropped = Arc::clone(&self.dropped);

        let handle = thread::Builder::new()
            .name("parla-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(&config, frame_tx, dropped) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while !stop_flag.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
                debug!("Capture thread exiting");
            })?;

        let ready = ready_rx
            .recv()
            .map_err(|_| VoiceError::Stream("capture thread exited during startup".to_string()))?;
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        self.frame_rx = Some(frame_rx);
        self.capture_thread = Some(handle);
        info!("Audio capture started");
        Ok(())
    }

    fn read_frame(&mut self) -> VoiceResult<AudioFrame> {
        let rx = self
            .frame_rx
            .as_ref()
            .ok_or_else(|| VoiceError::Stream("Stream not started".to_string()))?;

        match rx.recv_timeout(self.config.read_timeout) {
            Ok(samples) => Ok(AudioFrame::new(samples, self.config.sample_rate)),
            Err(RecvTimeoutError::Timeout) => {
                warn!("Audio read timed out, substituting silence");
                Ok(AudioFrame::silent(self.config.frame_size, self.config.sample_rate))
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Audio stream disconnected, substituting silence");
                let frame = AudioFrame::silent(self.config.frame_size, self.config.sample_rate);
                // Pace the loop at real time instead of spinning.
                thread::sleep(frame.duration());
                Ok(frame)
            }
        }
    }

    fn stop(&mut self) -> VoiceResult<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.frame_rx = None;
        if let Some(handle) = self.capture_thread.take() {
            handle
                .join()
                .map_err(|_| VoiceError::Stream("capture thread panicked".to_string()))?;
            info!(dropped_frames = self.dropped_frames(), "Audio capture stopped");
        }
        Ok(())
    }

    fn release(&mut self) -> VoiceResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.stop()
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
