//! Live session lifecycle.
//!
//! [`SessionManager`] opens a session (transport, microphone, speaker) and
//! hands everything to a single task that owns all per-session state. That
//! task multiplexes caller commands, inbound frames, captured audio, tool-call
//! completions, playback completions and the idle deadline with
//! `tokio::select!`, so no session state needs a lock.
//!
//! State transitions are published on a `watch` channel and as
//! [`SessionEvent::StateChanged`] events:
//!
//! ```text
//! Idle -> Connecting -> Active -> Disconnecting -> Idle
//!              |            \-> Disconnecting -> Idle (device failure)
//!              \-> Idle (connect failure)
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::base::{
    DisconnectReason, LiveConfig, LiveError, LiveResult, LiveTransport, SessionEvent,
    SessionState, TransportEvent, finish_connection_task,
};
use super::capture::{AudioInput, CaptureFrame, CapturePipeline, CaptureRequest};
use super::dispatcher::InboundDispatcher;
use super::executor::{FunctionCallExecutor, ToolOutcome};
use super::gemini::build_setup;
use super::idle::IdleSupervisor;
use super::messages::ClientMessage;
use super::playback::{AudioOutput, PlaybackScheduler};
use crate::core::home::{ControlPlane, EntityDirectory};

/// Source of the audio devices for each new session.
pub trait AudioDevices: Send + Sync {
    /// Capture device. Failures should be [`LiveError::MediaAccess`].
    fn microphone(&self) -> LiveResult<Box<dyn AudioInput>>;

    /// Playback device. Failures should be [`LiveError::AudioPipeline`].
    fn speaker(&self, sample_rate: u32) -> LiveResult<Box<dyn AudioOutput>>;
}

/// Commands accepted by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Stop,
    SetMuted(bool),
}

// =============================================================================
// Session Context
// =============================================================================

/// All state of one running session, owned by the session task.
pub struct SessionContext {
    pub session_id: String,
    /// Inbound frames processed so far
    pub frames_seen: u64,
    /// User speech transcribed since the last completed turn
    pub pending_transcript: String,
    pub muted: bool,
    pub idle: IdleSupervisor,
    pub playback: PlaybackScheduler,
    pub executor: FunctionCallExecutor,
    /// Outbound channel; `None` once the session is closing
    pub outbound: Option<mpsc::Sender<ClientMessage>>,
    state: Arc<watch::Sender<SessionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        idle_timeout: Duration,
        playback: PlaybackScheduler,
        executor: FunctionCallExecutor,
        outbound: Option<mpsc::Sender<ClientMessage>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Active);
        Self {
            session_id: session_id.into(),
            frames_seen: 0,
            pending_transcript: String::new(),
            muted: false,
            idle: IdleSupervisor::new(idle_timeout),
            playback,
            executor,
            outbound,
            state: Arc::new(state),
            events,
        }
    }

    /// Publish state changes on `state` instead of a private channel.
    pub fn with_state(mut self, state: Arc<watch::Sender<SessionState>>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        publish_state(&self.state, &self.events, state);
    }

    /// Send an event to the caller. A caller that stopped listening is ignored.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// A playback completion arrived. `drained` means nothing is left playing.
    pub fn on_playback_finished(&mut self, drained: bool) {
        if drained {
            tracing::debug!(session_id = %self.session_id, "Playback drained");
            self.idle.start();
        }
    }

    /// Send the response for a finished tool call upstream.
    pub async fn finish_tool_call(&mut self, outcome: ToolOutcome) {
        let success = outcome.is_success();
        let response = self.executor.complete(outcome);
        let (id, name) = (response.id.clone(), response.name.clone());

        match &self.outbound {
            Some(outbound) => {
                if outbound
                    .send(ClientMessage::tool_response(response))
                    .await
                    .is_err()
                {
                    tracing::warn!(call_id = %id, "Tool response not sent, channel closed");
                }
            }
            None => tracing::debug!(call_id = %id, "Session closing, tool response dropped"),
        }
        self.emit(SessionEvent::ToolCallFinished { id, name, success });
    }

    /// Forward a captured frame if the session is active and unmuted.
    pub fn forward_capture(&self, capture: &CapturePipeline, frame: &CaptureFrame) -> bool {
        capture.forward(
            frame,
            self.state() == SessionState::Active,
            self.muted,
            self.outbound.as_ref(),
        )
    }
}

fn publish_state(
    state: &watch::Sender<SessionState>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    new_state: SessionState,
) {
    let previous = state.send_replace(new_state);
    if previous != new_state {
        tracing::debug!(from = %previous, to = %new_state, "Session state changed");
        let _ = events.send(SessionEvent::StateChanged(new_state));
    }
}

// =============================================================================
// Session Task
// =============================================================================

struct SessionIo {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    connection_task: Option<JoinHandle<()>>,
    capture: CapturePipeline,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

async fn run_session(mut ctx: SessionContext, mut io: SessionIo) -> DisconnectReason {
    let dispatcher = InboundDispatcher::default();
    ctx.idle.start();

    let reason = loop {
        tokio::select! {
            command = io.commands.recv() => match command {
                Some(SessionCommand::SetMuted(muted)) => {
                    tracing::debug!(session_id = %ctx.session_id, muted, "Microphone mute changed");
                    ctx.muted = muted;
                }
                Some(SessionCommand::Stop) | None => break DisconnectReason::UserRequested,
            },

            event = io.inbound.recv() => match event {
                Some(TransportEvent::Frame(text)) => {
                    if let Err(e) = dispatcher.dispatch(&mut ctx, &text) {
                        tracing::warn!(
                            session_id = %ctx.session_id,
                            seq = ctx.frames_seen,
                            "Dropping malformed frame: {}", e
                        );
                    }
                }
                Some(TransportEvent::Closed { code, reason }) => {
                    break DisconnectReason::remote_closed(code, reason);
                }
                Some(TransportEvent::Error(e)) => break DisconnectReason::StreamError(e),
                None => break DisconnectReason::StreamError("connection task ended".to_string()),
            },

            frame = io.capture.next_frame(), if io.capture.is_open() => match frame {
                Some(frame) => {
                    ctx.forward_capture(&io.capture, &frame);
                }
                None => tracing::info!(session_id = %ctx.session_id, "Microphone stream ended"),
            },

            outcome = ctx.executor.next_completed() => ctx.finish_tool_call(outcome).await,

            drained = ctx.playback.finished() => ctx.on_playback_finished(drained),

            _ = ctx.idle.expired() => {
                tracing::info!(session_id = %ctx.session_id, "Idle timeout reached");
                break DisconnectReason::IdleTimeout;
            }
        }
    };

    teardown(ctx, io, reason).await
}

/// Release everything the session holds. Runs once per session.
async fn teardown(mut ctx: SessionContext, mut io: SessionIo, reason: DisconnectReason) -> DisconnectReason {
    ctx.set_state(SessionState::Disconnecting);

    ctx.idle.clear();
    ctx.playback.interrupt();
    io.capture.detach();
    ctx.executor.clear();

    ctx.outbound = None;
    io.inbound.close();
    finish_connection_task(io.connection_task.take()).await;
    ctx.pending_transcript.clear();

    tracing::info!(
        session_id = %ctx.session_id,
        reason = %reason,
        frames = ctx.frames_seen,
        "Live session ended"
    );
    ctx.emit(SessionEvent::Disconnected(reason.clone()));
    ctx.set_state(SessionState::Idle);
    reason
}

// =============================================================================
// Session Manager
// =============================================================================

struct RunningSession {
    id: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<DisconnectReason>,
}

/// Starts and stops live sessions.
pub struct SessionManager {
    config: LiveConfig,
    transport: Arc<dyn LiveTransport>,
    control_plane: Arc<dyn ControlPlane>,
    devices: Arc<dyn AudioDevices>,
    directory: EntityDirectory,
    muted: bool,
    state: Arc<watch::Sender<SessionState>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    running: Option<RunningSession>,
}

impl SessionManager {
    pub fn new(
        config: LiveConfig,
        transport: Arc<dyn LiveTransport>,
        control_plane: Arc<dyn ControlPlane>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            control_plane,
            devices,
            directory: EntityDirectory::default(),
            muted: false,
            state: Arc::new(state),
            events_tx,
            events_rx: Some(events_rx),
            running: None,
        }
    }

    /// Devices advertised to the assistant.
    pub fn with_directory(mut self, directory: EntityDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Event stream for all sessions of this manager. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Id of the running session.
    pub fn session_id(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.id.as_str())
    }

    fn set_state(&self, state: SessionState) {
        publish_state(&self.state, &self.events_tx, state);
    }

    /// Start a session.
    ///
    /// A no-op while a session is connecting or active. Without an API key
    /// the state stays `Idle` and [`LiveError::Configuration`] is returned.
    /// Any other failure releases what was acquired and returns to `Idle`.
    pub async fn start(&mut self) -> LiveResult<()> {
        if let Some(running) = &self.running {
            if !running.task.is_finished() {
                tracing::debug!(session_id = %running.id, "Session already running");
                return Ok(());
            }
            self.wait().await;
        }
        if matches!(self.state(), SessionState::Connecting | SessionState::Active) {
            return Ok(());
        }

        let Some(api_key) = self.config.api_key.clone().filter(|k| !k.trim().is_empty()) else {
            tracing::warn!("Cannot start live session: API key missing");
            return Err(LiveError::Configuration("API key missing".to_string()));
        };

        self.set_state(SessionState::Connecting);
        let session_id = Uuid::new_v4().to_string();
        tracing::info!(session_id = %session_id, model = %self.config.model, "Starting live session");

        let instructions = self.directory.instructions(&self.config.instructions);
        let setup = build_setup(
            &self.config.model,
            &self.config.voice,
            &instructions,
            self.directory.tools(),
        );

        let connection = match tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&api_key, setup),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(self.abort_start(e)),
            Err(_) => {
                return Err(self.abort_start(LiveError::Timeout(
                    "session setup was not confirmed".to_string(),
                )));
            }
        };

        let capture = self.devices.microphone().and_then(|microphone| {
            CapturePipeline::attach(
                microphone,
                CaptureRequest::mono(self.config.input_sample_rate),
                self.config.capture_frame_size,
            )
        });
        let mut capture = match capture {
            Ok(capture) => capture,
            Err(e) => {
                self.set_state(SessionState::Disconnecting);
                connection.close().await;
                return Err(self.abort_start(e));
            }
        };

        let output = match self.devices.speaker(self.config.output_sample_rate) {
            Ok(output) => output,
            Err(e) => {
                self.set_state(SessionState::Disconnecting);
                capture.detach();
                connection.close().await;
                return Err(self.abort_start(e));
            }
        };

        let playback = PlaybackScheduler::new(output, self.config.output_sample_rate);
        let executor = FunctionCallExecutor::new(self.control_plane.clone());
        let mut ctx = SessionContext::new(
            session_id.clone(),
            self.config.idle_timeout,
            playback,
            executor,
            Some(connection.outbound),
            self.events_tx.clone(),
        )
        .with_state(self.state.clone());
        ctx.muted = self.muted;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let io = SessionIo {
            inbound: connection.inbound,
            connection_task: connection.task,
            capture,
            commands: commands_rx,
        };

        self.set_state(SessionState::Active);
        tracing::info!(
            session_id = %session_id,
            capture_rate = io.capture.sample_rate(),
            "Live session active"
        );

        let task = tokio::spawn(run_session(ctx, io));
        self.running = Some(RunningSession {
            id: session_id,
            commands: commands_tx,
            task,
        });
        Ok(())
    }

    fn abort_start(&self, error: LiveError) -> LiveError {
        tracing::warn!("Live session failed to start: {}", error);
        self.set_state(SessionState::Idle);
        error
    }

    /// Stop the running session and wait for teardown. A no-op when idle.
    pub async fn stop(&mut self) -> Option<DisconnectReason> {
        let running = self.running.as_ref()?;
        let _ = running.commands.send(SessionCommand::Stop);
        self.wait().await
    }

    /// Wait for the running session to end on its own.
    pub async fn wait(&mut self) -> Option<DisconnectReason> {
        let running = self.running.as_mut()?;
        let result = (&mut running.task).await;
        self.running = None;
        match result {
            Ok(reason) => Some(reason),
            Err(e) => {
                tracing::error!("Session task failed: {}", e);
                self.set_state(SessionState::Idle);
                None
            }
        }
    }

    /// Mute or unmute the microphone. Applies to later sessions too.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(running) = &self.running {
            let _ = running.commands.send(SessionCommand::SetMuted(muted));
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.commands.send(SessionCommand::Stop);
        }
    }
}
