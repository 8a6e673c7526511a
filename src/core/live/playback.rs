//! Gapless playback of synthesized audio chunks.
//!
//! Chunks are scheduled back to back on the output clock. A running cursor
//! holds the time at which the next chunk starts; it only moves backwards when
//! playback is interrupted, and then only to the current clock time.
//!
//! The output device is behind [`AudioOutput`]. [`PacedOutput`] is a
//! clock-driven implementation that forwards each chunk to a sink when it
//! starts playing, which the CLI uses to record the conversation.

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use std::collections::HashMap;
use std::future::pending;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until};

use super::base::{LiveError, LiveResult};
use crate::utils::pcm::decode_pcm16_base64;

// =============================================================================
// Output Device
// =============================================================================

/// Decoded mono audio ready to schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Handles for one scheduled source.
pub struct ScheduledSource {
    /// Resolves when the source finished playing naturally
    pub completion: oneshot::Receiver<()>,
    /// Send (or drop) to stop the source early
    pub stop: oneshot::Sender<()>,
}

/// Playback device with its own clock, in seconds.
pub trait AudioOutput: Send {
    /// Native sample rate of the device.
    fn sample_rate(&self) -> u32;

    /// Current device time.
    fn now(&self) -> f64;

    /// Wake the device if the platform suspended it.
    fn resume(&mut self) -> LiveResult<()>;

    /// Schedule `buffer` to start at device time `at`.
    fn start(&mut self, buffer: AudioBuffer, at: f64) -> LiveResult<ScheduledSource>;
}

// =============================================================================
// Scheduler
// =============================================================================

/// One scheduled chunk.
#[derive(Debug)]
pub struct AudioSourceHandle {
    pub id: u64,
    pub start: f64,
    pub duration: f64,
    stop: Option<oneshot::Sender<()>>,
}

impl AudioSourceHandle {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Queues audio chunks end to end and tracks what is still audible.
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    sample_rate: u32,
    cursor: f64,
    playing: HashMap<u64, AudioSourceHandle>,
    completions: FuturesUnordered<BoxFuture<'static, Option<u64>>>,
    next_id: u64,
}

impl PlaybackScheduler {
    /// `sample_rate` is the rate inbound payloads are encoded at.
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32) -> Self {
        let cursor = output.now();
        Self {
            output,
            sample_rate,
            cursor,
            playing: HashMap::new(),
            completions: FuturesUnordered::new(),
            next_id: 0,
        }
    }

    /// Start time of the next chunk.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of chunks scheduled or playing.
    pub fn playing_len(&self) -> usize {
        self.playing.len()
    }

    pub fn is_idle(&self) -> bool {
        self.playing.is_empty()
    }

    /// Decode and schedule one base64 PCM16 chunk.
    ///
    /// Returns the source id. Failures are logged and reported as `None`.
    pub fn enqueue(&mut self, payload: &str) -> Option<u64> {
        match self.try_enqueue(payload) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Dropping audio chunk: {}", e);
                None
            }
        }
    }

    /// Decode and schedule one chunk, returning the failure instead of
    /// logging it.
    pub fn try_enqueue(&mut self, payload: &str) -> LiveResult<u64> {
        let samples =
            decode_pcm16_base64(payload).map_err(|e| LiveError::Playback(e.to_string()))?;
        let buffer = AudioBuffer {
            samples,
            sample_rate: self.sample_rate,
        };
        let duration = buffer.duration();

        if let Err(e) = self.output.resume() {
            tracing::debug!("Output resume failed: {}", e);
        }

        let start = self.cursor.max(self.output.now());
        let source = self.output.start(buffer, start)?;

        let id = self.next_id;
        self.next_id += 1;
        self.cursor = start + duration;

        let completion = source.completion;
        self.completions
            .push(Box::pin(async move { completion.await.ok().map(|_| id) }));
        self.playing.insert(
            id,
            AudioSourceHandle {
                id,
                start,
                duration,
                stop: Some(source.stop),
            },
        );

        tracing::trace!(source_id = id, start, duration, "Audio chunk scheduled");
        Ok(id)
    }

    /// Stop every chunk, forget them and pull the cursor back to now.
    ///
    /// Returns how many chunks were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.playing.len();
        for handle in self.playing.values_mut() {
            handle.stop();
        }
        self.playing.clear();
        self.completions = FuturesUnordered::new();
        self.cursor = self.output.now();
        if stopped > 0 {
            tracing::debug!(stopped, "Playback interrupted");
        }
        stopped
    }

    /// Wait for the next chunk to finish naturally.
    ///
    /// Resolves with `true` when that completion emptied the playing set.
    /// Stopped chunks never complete. Cancel safe.
    pub async fn finished(&mut self) -> bool {
        loop {
            match self.completions.next().await {
                Some(Some(id)) => {
                    if self.playing.remove(&id).is_some() {
                        tracing::trace!(source_id = id, "Audio chunk finished");
                        return self.playing.is_empty();
                    }
                }
                Some(None) => {}
                None => pending::<()>().await,
            }
        }
    }
}

// =============================================================================
// Clock-paced output
// =============================================================================

/// A chunk that started playing on a [`PacedOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlayedChunk {
    pub at: f64,
    pub samples: Vec<f32>,
}

/// Output driven by the tokio clock.
///
/// Each scheduled chunk waits for its start time, is handed to the sink, then
/// completes after its duration unless stopped first.
pub struct PacedOutput {
    sample_rate: u32,
    epoch: Instant,
    suspended: bool,
    sink: Option<mpsc::UnboundedSender<PlayedChunk>>,
}

impl PacedOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            epoch: Instant::now(),
            suspended: true,
            sink: None,
        }
    }

    /// Forward every chunk to `sink` as it starts playing.
    pub fn with_sink(mut self, sink: mpsc::UnboundedSender<PlayedChunk>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl AudioOutput for PacedOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn resume(&mut self) -> LiveResult<()> {
        if self.suspended {
            self.suspended = false;
            tracing::debug!("Output resumed");
        }
        Ok(())
    }

    fn start(&mut self, buffer: AudioBuffer, at: f64) -> LiveResult<ScheduledSource> {
        if !at.is_finite() {
            return Err(LiveError::Playback(format!("invalid start time {at}")));
        }
        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let starts_at = self.epoch + Duration::from_secs_f64(at.max(0.0));
        let duration = Duration::from_secs_f64(buffer.duration());
        let sink = self.sink.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = &mut stop_rx => return,
                _ = sleep_until(starts_at) => {}
            }
            if let Some(sink) = sink {
                let _ = sink.send(PlayedChunk {
                    at,
                    samples: buffer.samples,
                });
            }
            tokio::select! {
                _ = &mut stop_rx => {}
                _ = sleep(duration) => {
                    let _ = done_tx.send(());
                }
            }
        });

        Ok(ScheduledSource {
            completion: done_rx,
            stop: stop_tx,
        })
    }
}

/// Write every played chunk to a mono 16-bit WAV file.
///
/// Chunks are placed at their scheduled time; gaps are filled with silence.
/// The writer runs on its own thread and finalizes the file when the sender
/// side is dropped.
pub fn spawn_wav_recorder(
    path: &Path,
    sample_rate: u32,
) -> LiveResult<(
    mpsc::UnboundedSender<PlayedChunk>,
    std::thread::JoinHandle<()>,
)> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| LiveError::AudioPipeline(format!("cannot create recording: {e}")))?;
    let (tx, mut rx) = mpsc::unbounded_channel::<PlayedChunk>();

    let handle = std::thread::Builder::new()
        .name("wav-recorder".to_string())
        .spawn(move || {
            let mut written: u64 = 0;
            while let Some(chunk) = rx.blocking_recv() {
                let offset = (chunk.at * f64::from(sample_rate)).round() as u64;
                while written < offset {
                    if writer.write_sample(0i16).is_err() {
                        return;
                    }
                    written += 1;
                }
                for sample in chunk.samples {
                    let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
                    if let Err(e) = writer.write_sample(value) {
                        tracing::warn!("Recording write failed: {}", e);
                        return;
                    }
                    written += 1;
                }
            }
            if let Err(e) = writer.finalize() {
                tracing::warn!("Recording finalize failed: {}", e);
            }
        })
        .map_err(|e| LiveError::AudioPipeline(format!("cannot start recorder: {e}")))?;

    Ok((tx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::pcm::encode_pcm16_base64;
    use std::sync::{Arc, Mutex};

    /// Output with a hand-driven clock.
    #[derive(Default)]
    struct ManualClock {
        now: f64,
        started: Vec<(f64, f64)>,
        completions: Vec<Option<oneshot::Sender<()>>>,
        stops: Vec<oneshot::Receiver<()>>,
        resumes: usize,
    }

    #[derive(Clone, Default)]
    struct ManualOutput(Arc<Mutex<ManualClock>>);

    impl ManualOutput {
        fn set_now(&self, now: f64) {
            self.0.lock().unwrap().now = now;
        }

        fn complete(&self, index: usize) {
            if let Some(tx) = self.0.lock().unwrap().completions[index].take() {
                let _ = tx.send(());
            }
        }

        fn was_stopped(&self, index: usize) -> bool {
            let mut clock = self.0.lock().unwrap();
            !matches!(
                clock.stops[index].try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            )
        }

        fn started(&self) -> Vec<(f64, f64)> {
            self.0.lock().unwrap().started.clone()
        }
    }

    impl AudioOutput for ManualOutput {
        fn sample_rate(&self) -> u32 {
            24_000
        }

        fn now(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn resume(&mut self) -> LiveResult<()> {
            self.0.lock().unwrap().resumes += 1;
            Ok(())
        }

        fn start(&mut self, buffer: AudioBuffer, at: f64) -> LiveResult<ScheduledSource> {
            let (done_tx, done_rx) = oneshot::channel();
            let (stop_tx, stop_rx) = oneshot::channel();
            let mut clock = self.0.lock().unwrap();
            clock.started.push((at, buffer.duration()));
            clock.completions.push(Some(done_tx));
            clock.stops.push(stop_rx);
            Ok(ScheduledSource {
                completion: done_rx,
                stop: stop_tx,
            })
        }
    }

    fn chunk(seconds: f64) -> String {
        let samples = vec![0.1f32; (seconds * 24_000.0) as usize];
        encode_pcm16_base64(&samples)
    }

    #[test]
    fn test_chunks_play_back_to_back() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()), 24_000);

        scheduler.enqueue(&chunk(0.5)).unwrap();
        scheduler.enqueue(&chunk(0.25)).unwrap();

        let started = output.started();
        assert_eq!(started[0].0, 0.0);
        assert!((started[1].0 - 0.5).abs() < 1e-9);
        assert!((scheduler.cursor() - 0.75).abs() < 1e-9);
        assert_eq!(scheduler.playing_len(), 2);
    }

    #[test]
    fn test_late_chunk_starts_now_not_in_the_past() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()), 24_000);
        scheduler.enqueue(&chunk(0.5)).unwrap();

        output.set_now(2.0);
        scheduler.enqueue(&chunk(0.5)).unwrap();
        assert_eq!(output.started()[1].0, 2.0);
        assert!((scheduler.cursor() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_cursor_never_regresses_without_interrupt() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()), 24_000);
        let mut last = scheduler.cursor();
        for step in 0..10 {
            output.set_now(f64::from(step) * 0.1);
            scheduler.enqueue(&chunk(0.05)).unwrap();
            assert!(scheduler.cursor() >= last);
            last = scheduler.cursor();
        }
    }

    #[test]
    fn test_interrupt_stops_everything_and_resets_cursor() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()), 24_000);
        for _ in 0..3 {
            scheduler.enqueue(&chunk(1.0)).unwrap();
        }
        output.set_now(0.4);

        assert_eq!(scheduler.interrupt(), 3);
        assert_eq!(scheduler.playing_len(), 0);
        assert_eq!(scheduler.cursor(), 0.4);
        for index in 0..3 {
            assert!(output.was_stopped(index));
        }

        scheduler.enqueue(&chunk(0.5)).unwrap();
        assert_eq!(output.started()[3].0, 0.4);
    }

    #[test]
    fn test_bad_payload_is_swallowed() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()), 24_000);
        assert!(scheduler.enqueue("%%%").is_none());
        assert!(scheduler.enqueue("").is_none());
        assert!(matches!(
            scheduler.try_enqueue("AAE"),
            Err(LiveError::Playback(_))
        ));
        assert_eq!(scheduler.playing_len(), 0);
        assert_eq!(scheduler.cursor(), 0.0);
    }

    #[test]
    fn test_enqueue_resumes_output() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()), 24_000);
        scheduler.enqueue(&chunk(0.1)).unwrap();
        assert_eq!(output.0.lock().unwrap().resumes, 1);
    }

    #[tokio::test]
    async fn test_finished_reports_drain_on_last_chunk() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()), 24_000);
        scheduler.enqueue(&chunk(0.1)).unwrap();
        scheduler.enqueue(&chunk(0.1)).unwrap();

        output.complete(0);
        assert!(!scheduler.finished().await);
        output.complete(1);
        assert!(scheduler.finished().await);
        assert!(scheduler.is_idle());
    }

    #[tokio::test]
    async fn test_stopped_chunks_never_report_completion() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()), 24_000);
        scheduler.enqueue(&chunk(0.1)).unwrap();
        scheduler.interrupt();
        output.complete(0);

        let result =
            tokio::time::timeout(Duration::from_millis(50), scheduler.finished()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_output_plays_then_completes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let output = PacedOutput::new(24_000).with_sink(tx);
        let mut scheduler = PlaybackScheduler::new(Box::new(output), 24_000);

        scheduler.enqueue(&chunk(0.5)).unwrap();
        scheduler.enqueue(&chunk(0.5)).unwrap();

        assert!(!scheduler.finished().await);
        assert!(scheduler.finished().await);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.samples.len(), 12_000);
        assert!(second.at > first.at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_output_stop_suppresses_playback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let output = PacedOutput::new(24_000).with_sink(tx);
        let mut scheduler = PlaybackScheduler::new(Box::new(output), 24_000);

        scheduler.enqueue(&chunk(0.5)).unwrap();
        scheduler.enqueue(&chunk(0.5)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.interrupt();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_wav_recorder_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let (tx, handle) = spawn_wav_recorder(&path, 24_000).unwrap();
        tx.send(PlayedChunk {
            at: 0.5,
            samples: vec![0.5; 2400],
        })
        .unwrap();
        drop(tx);
        handle.join().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.len(), 12_000 + 2400);
    }
}
