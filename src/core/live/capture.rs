//! Microphone capture.
//!
//! The input device is behind [`AudioInput`]. Reading happens on a dedicated
//! worker thread so a blocking device never stalls the session loop; frames
//! cross into the async side through a bounded channel and are dropped when
//! the loop falls behind.
//!
//! Captured audio is never routed to the output device.

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::base::{LiveError, LiveResult};
use super::messages::ClientMessage;
use crate::utils::pcm::downmix_to_mono;

/// Frames buffered between the worker and the session loop.
const CAPTURE_CHANNEL_CAPACITY: usize = 32;

/// What the session asks the platform for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl CaptureRequest {
    /// Mono capture at `sample_rate` with echo cancellation and noise
    /// suppression requested.
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Capture device.
pub trait AudioInput: Send + 'static {
    /// Open the device. Returns the sample rate actually granted, which may
    /// differ from the request. Failures are [`LiveError::MediaAccess`].
    fn open(&mut self, request: &CaptureRequest) -> LiveResult<u32>;

    /// Fill `frame` with up to `max_samples` mono samples.
    ///
    /// Blocks until a frame is available. Returns `Ok(false)` at end of
    /// stream.
    fn read_frame(&mut self, frame: &mut Vec<f32>, max_samples: usize) -> LiveResult<bool>;

    /// Human-readable device name.
    fn label(&self) -> String {
        "microphone".to_string()
    }
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    pub sequence: u64,
    pub samples: Vec<f32>,
}

enum WorkerControl {
    Stop,
}

/// Background thread that reads frames from an [`AudioInput`].
pub struct CaptureWorker {
    control: Option<std_mpsc::Sender<WorkerControl>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Start reading `frame_size`-sample frames into `frames`.
    pub fn spawn(
        mut input: Box<dyn AudioInput>,
        frame_size: usize,
        frames: mpsc::Sender<CaptureFrame>,
    ) -> LiveResult<Self> {
        if frame_size == 0 {
            return Err(LiveError::AudioPipeline(
                "capture frame size must be non-zero".to_string(),
            ));
        }
        let (control_tx, control_rx) = std_mpsc::channel::<WorkerControl>();

        let thread = std::thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || {
                let mut sequence: u64 = 0;
                let mut dropped: u64 = 0;
                let mut buffer = Vec::with_capacity(frame_size);
                loop {
                    match control_rx.try_recv() {
                        Ok(WorkerControl::Stop) | Err(std_mpsc::TryRecvError::Disconnected) => {
                            break;
                        }
                        Err(std_mpsc::TryRecvError::Empty) => {}
                    }

                    buffer.clear();
                    match input.read_frame(&mut buffer, frame_size) {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::debug!("Capture stream ended");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("Capture read failed: {}", e);
                            break;
                        }
                    }

                    let frame = CaptureFrame {
                        sequence,
                        samples: std::mem::take(&mut buffer),
                    };
                    sequence += 1;
                    match frames.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            dropped += 1;
                            tracing::trace!(dropped, "Capture frame dropped, session loop busy");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                    buffer.reserve(frame_size);
                }
                tracing::debug!(frames = sequence, dropped, "Capture worker stopped");
            })
            .map_err(|e| LiveError::AudioPipeline(format!("cannot start capture worker: {e}")))?;

        Ok(Self {
            control: Some(control_tx),
            thread: Some(thread),
        })
    }

    /// Ask the worker to stop after its current read.
    pub fn stop(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(WorkerControl::Stop);
        }
        // Detached: a blocked read finishes on its own and the thread exits.
        self.thread.take();
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture side of a running session.
pub struct CapturePipeline {
    sample_rate: u32,
    label: String,
    frames: mpsc::Receiver<CaptureFrame>,
    worker: CaptureWorker,
    open: bool,
}

impl CapturePipeline {
    /// Open `input`, then start the worker.
    ///
    /// Open failures surface as [`LiveError::MediaAccess`]; a worker that
    /// cannot start is [`LiveError::AudioPipeline`].
    pub fn attach(
        mut input: Box<dyn AudioInput>,
        request: CaptureRequest,
        frame_size: usize,
    ) -> LiveResult<Self> {
        let label = input.label();
        let sample_rate = input.open(&request).map_err(|e| match e {
            LiveError::MediaAccess(_) => e,
            other => LiveError::MediaAccess(other.to_string()),
        })?;
        if sample_rate == 0 {
            return Err(LiveError::AudioPipeline(
                "device reported a zero sample rate".to_string(),
            ));
        }
        if sample_rate != request.sample_rate {
            tracing::info!(
                requested = request.sample_rate,
                granted = sample_rate,
                "Capturing at the device rate"
            );
        }

        let (tx, frames) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let worker = CaptureWorker::spawn(input, frame_size, tx)?;
        tracing::info!(device = %label, sample_rate, frame_size, "Microphone attached");

        Ok(Self {
            sample_rate,
            label,
            frames,
            worker,
            open: true,
        })
    }

    /// Rate the device actually captures at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether frames may still arrive.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Next captured frame, or `None` once the device stream ended.
    pub async fn next_frame(&mut self) -> Option<CaptureFrame> {
        let frame = self.frames.recv().await;
        if frame.is_none() {
            self.open = false;
        }
        frame
    }

    /// Forward a frame upstream if the gate is open.
    ///
    /// Frames are only sent while the session is active, the microphone is
    /// not muted and an outbound channel exists. Returns whether the frame
    /// was sent.
    pub fn forward(
        &self,
        frame: &CaptureFrame,
        active: bool,
        muted: bool,
        outbound: Option<&mpsc::Sender<ClientMessage>>,
    ) -> bool {
        if !active || muted {
            return false;
        }
        let Some(outbound) = outbound else {
            return false;
        };
        match outbound.try_send(ClientMessage::audio(&frame.samples, self.sample_rate)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(sequence = frame.sequence, "Outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the worker and release the device.
    pub fn detach(&mut self) {
        self.worker.stop();
        self.frames.close();
        self.open = false;
        tracing::debug!(device = %self.label, "Microphone released");
    }
}

// =============================================================================
// WAV file input
// =============================================================================

/// Plays a WAV file as if it were a microphone.
///
/// Multi-channel files are downmixed. Reads are paced to real time unless
/// pacing is disabled.
pub struct WavFileInput {
    path: PathBuf,
    reader: Option<hound::WavReader<std::io::BufReader<std::fs::File>>>,
    channels: u16,
    sample_rate: u32,
    paced: bool,
    next_deadline: Option<Instant>,
}

impl WavFileInput {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            channels: 1,
            sample_rate: 0,
            paced: true,
            next_deadline: None,
        }
    }

    /// Read as fast as the consumer allows.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn read_interleaved(&mut self, count: usize) -> LiveResult<Vec<f32>> {
        let reader = self.reader.as_mut().ok_or(LiveError::NotConnected)?;
        let spec = reader.spec();
        let samples: Result<Vec<f32>, hound::Error> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().take(count).collect(),
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .take(count)
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect()
            }
        };
        samples.map_err(|e| LiveError::AudioPipeline(format!("WAV read failed: {e}")))
    }
}

impl AudioInput for WavFileInput {
    fn open(&mut self, request: &CaptureRequest) -> LiveResult<u32> {
        let reader = hound::WavReader::open(&self.path).map_err(|e| {
            LiveError::MediaAccess(format!("{}: {e}", self.path.display()))
        })?;
        let spec = reader.spec();
        self.channels = spec.channels.max(1);
        self.sample_rate = spec.sample_rate;
        self.reader = Some(reader);
        tracing::debug!(
            path = %self.path.display(),
            channels = spec.channels,
            requested_channels = request.channels,
            sample_rate = spec.sample_rate,
            "Opened WAV input"
        );
        Ok(spec.sample_rate)
    }

    fn read_frame(&mut self, frame: &mut Vec<f32>, max_samples: usize) -> LiveResult<bool> {
        let interleaved = self.read_interleaved(max_samples * usize::from(self.channels))?;
        if interleaved.is_empty() {
            return Ok(false);
        }
        let mono = downmix_to_mono(&interleaved, self.channels);

        if self.paced && self.sample_rate > 0 {
            let period = Duration::from_secs_f64(mono.len() as f64 / f64::from(self.sample_rate));
            let deadline = self.next_deadline.unwrap_or_else(Instant::now) + period;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            self.next_deadline = Some(deadline);
        }

        frame.extend_from_slice(&mono);
        Ok(true)
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }
}
