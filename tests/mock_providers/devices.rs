//! Audio device doubles
//!
//! [`ScriptedInput`] yields exactly the frames a test feeds it.
//! [`ManualOutput`] has a clock the test sets and sources that only finish
//! when the test says so.

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use waav_live::core::live::{
    AudioBuffer, AudioInput, AudioOutput, CaptureRequest, ScheduledSource,
};
use waav_live::{AudioDevices, LiveError, LiveResult};

// =============================================================================
// Microphone
// =============================================================================

/// Microphone fed by the test over a channel. Ends when the feeder is dropped.
pub struct ScriptedInput {
    frames: std_mpsc::Receiver<Vec<f32>>,
    granted_rate: Option<u32>,
    fail_open: bool,
}

impl AudioInput for ScriptedInput {
    fn open(&mut self, request: &CaptureRequest) -> LiveResult<u32> {
        if self.fail_open {
            return Err(LiveError::MediaAccess("permission denied".to_string()));
        }
        Ok(self.granted_rate.unwrap_or(request.sample_rate))
    }

    fn read_frame(&mut self, frame: &mut Vec<f32>, max_samples: usize) -> LiveResult<bool> {
        match self.frames.recv() {
            Ok(samples) => {
                frame.extend(samples.into_iter().take(max_samples));
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn label(&self) -> String {
        "scripted".to_string()
    }
}

// =============================================================================
// Speaker
// =============================================================================

/// One source started on a [`ManualOutput`].
pub struct StartedSource {
    pub at: f64,
    pub samples: usize,
    done: Option<oneshot::Sender<()>>,
    stop: oneshot::Receiver<()>,
}

#[derive(Default)]
struct ManualState {
    now: f64,
    resumed: usize,
    started: Vec<StartedSource>,
}

/// Test-side view of a [`ManualOutput`].
#[derive(Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn set_now(&self, now: f64) {
        self.state.lock().now = now;
    }

    pub fn started(&self) -> usize {
        self.state.lock().started.len()
    }

    pub fn start_times(&self) -> Vec<f64> {
        self.state.lock().started.iter().map(|s| s.at).collect()
    }

    pub fn resumed(&self) -> usize {
        self.state.lock().resumed
    }

    /// Let source `index` finish naturally.
    pub fn finish(&self, index: usize) {
        let mut state = self.state.lock();
        if let Some(done) = state.started[index].done.take() {
            let _ = done.send(());
        }
    }

    /// Whether the scheduler stopped or released source `index`.
    pub fn is_stopped(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        !matches!(
            state.started[index].stop.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

pub struct ManualOutput {
    sample_rate: u32,
    clock: ManualClock,
}

impl ManualOutput {
    pub fn new(sample_rate: u32, clock: ManualClock) -> Self {
        Self { sample_rate, clock }
    }
}

impl AudioOutput for ManualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        self.clock.state.lock().now
    }

    fn resume(&mut self) -> LiveResult<()> {
        self.clock.state.lock().resumed += 1;
        Ok(())
    }

    fn start(&mut self, buffer: AudioBuffer, at: f64) -> LiveResult<ScheduledSource> {
        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.clock.state.lock().started.push(StartedSource {
            at,
            samples: buffer.samples.len(),
            done: Some(done_tx),
            stop: stop_rx,
        });
        Ok(ScheduledSource {
            completion: done_rx,
            stop: stop_tx,
        })
    }
}

// =============================================================================
// Device source
// =============================================================================

/// Hands out one scripted microphone and manual speaker per session.
pub struct MockDevices {
    feeds: Mutex<Vec<std_mpsc::Receiver<Vec<f32>>>>,
    pub clock: ManualClock,
    granted_rate: Option<u32>,
    fail_microphone: bool,
    fail_speaker: bool,
}

impl MockDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None, false, false))
    }

    /// Microphone that reports `rate` regardless of the request.
    pub fn with_granted_rate(rate: u32) -> Arc<Self> {
        Arc::new(Self::build(Some(rate), false, false))
    }

    /// Microphone access is denied.
    pub fn without_microphone() -> Arc<Self> {
        Arc::new(Self::build(None, true, false))
    }

    /// Speaker cannot be opened.
    pub fn without_speaker() -> Arc<Self> {
        Arc::new(Self::build(None, false, true))
    }

    fn build(granted_rate: Option<u32>, fail_microphone: bool, fail_speaker: bool) -> Self {
        Self {
            feeds: Mutex::new(Vec::new()),
            clock: ManualClock::default(),
            granted_rate,
            fail_microphone,
            fail_speaker,
        }
    }

    /// Feeder for the microphone of the next session.
    pub fn microphone_feed(&self) -> std_mpsc::Sender<Vec<f32>> {
        let (tx, rx) = std_mpsc::channel();
        self.feeds.lock().push(rx);
        tx
    }
}

impl AudioDevices for MockDevices {
    fn microphone(&self) -> LiveResult<Box<dyn AudioInput>> {
        let frames = {
            let mut feeds = self.feeds.lock();
            if feeds.is_empty() {
                // Nobody feeds this one: it ends right away
                std_mpsc::channel().1
            } else {
                feeds.remove(0)
            }
        };
        Ok(Box::new(ScriptedInput {
            frames,
            granted_rate: self.granted_rate,
            fail_open: self.fail_microphone,
        }))
    }

    fn speaker(&self, sample_rate: u32) -> LiveResult<Box<dyn AudioOutput>> {
        if self.fail_speaker {
            return Err(LiveError::AudioPipeline("no output device".to_string()));
        }
        Ok(Box::new(ManualOutput::new(sample_rate, self.clock.clone())))
    }
}
