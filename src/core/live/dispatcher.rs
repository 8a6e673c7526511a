//! Per-frame processing of inbound server messages.
//!
//! Each frame is handled in a fixed order:
//!
//! 1. user transcription (arms the idle timer on the first fragment of a turn)
//! 2. assistant activity (disarms the idle timer; re-arms it unless audio is
//!    about to play)
//! 3. text and reasoning parts
//! 4. tool calls
//! 5. audio chunks
//! 6. barge-in
//! 7. assistant transcription, turn completion, cancellations and go-away
//!
//! A frame that is not JSON is returned as an error for the caller to log; it
//! never ends the session.

use super::base::SessionEvent;
use super::extract::ToolCallExtractor;
use super::messages::InboundFrame;
use super::session::SessionContext;

/// What a single frame did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub tool_calls: usize,
    pub audio_chunks: usize,
    pub interrupted: bool,
    pub turn_complete: bool,
}

/// Routes inbound frames into the session context.
#[derive(Default)]
pub struct InboundDispatcher {
    extractor: ToolCallExtractor,
}

impl InboundDispatcher {
    pub fn new(extractor: ToolCallExtractor) -> Self {
        Self { extractor }
    }

    /// Process one inbound text frame.
    pub fn dispatch(
        &self,
        ctx: &mut SessionContext,
        text: &str,
    ) -> Result<FrameSummary, serde_json::Error> {
        ctx.frames_seen += 1;
        let seq = ctx.frames_seen;
        let inbound = InboundFrame::parse(text)?;
        let frame = &inbound.frame;
        let content = frame.server_content.as_ref();
        let turn = frame.model_turn();
        let mut summary = FrameSummary::default();

        if frame.setup_complete.is_some() {
            tracing::debug!(seq, "Ignoring repeated setupComplete");
        }

        // User speech
        if let Some(fragment) = content
            .and_then(|c| c.input_transcription.as_ref())
            .and_then(|t| t.text.as_deref())
            .filter(|t| !t.trim().is_empty())
        {
            let first = ctx.pending_transcript.is_empty();
            ctx.pending_transcript.push_str(fragment);
            if first {
                ctx.idle.start();
            }
            ctx.emit(SessionEvent::UserTranscript {
                fragment: fragment.to_string(),
                pending: ctx.pending_transcript.clone(),
            });
        }

        let calls = self.extractor.extract(&inbound);
        let audio: Vec<&str> = turn
            .map(|t| {
                t.parts
                    .iter()
                    .filter_map(|p| p.inline_data.as_ref())
                    .filter(|blob| blob.is_audio() && !blob.data.is_empty())
                    .map(|blob| blob.data.as_str())
                    .collect()
            })
            .unwrap_or_default();

        // Assistant activity
        if turn.is_some() || !calls.is_empty() {
            ctx.idle.clear();
            if audio.is_empty() {
                ctx.idle.start();
            }
        }

        if let Some(turn) = turn {
            for part in &turn.parts {
                let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) else {
                    continue;
                };
                if part.is_thought() {
                    ctx.emit(SessionEvent::AssistantThought(text.to_string()));
                } else {
                    ctx.emit(SessionEvent::AssistantText(text.to_string()));
                }
            }
        }

        for call in calls {
            tracing::debug!(seq, call_id = %call.id, strategy = call.source, "Tool call received");
            let id = call.id.clone();
            let name = call.name.clone();
            let duplicate = ctx.executor.execute(call);
            ctx.emit(SessionEvent::ToolCallStarted {
                id,
                name,
                duplicate,
            });
            summary.tool_calls += 1;
        }

        for payload in &audio {
            if ctx.playback.enqueue(payload).is_some() {
                summary.audio_chunks += 1;
            }
        }
        // Audio arrived but none of it is playing, so no drain will re-arm
        if !audio.is_empty() && ctx.playback.is_idle() {
            ctx.idle.start();
        }

        // Barge-in
        if content.and_then(|c| c.interrupted).unwrap_or(false) {
            ctx.playback.interrupt();
            summary.interrupted = true;
            ctx.emit(SessionEvent::Interrupted);
            if !ctx.pending_transcript.is_empty() {
                ctx.idle.start();
            }
        }

        if let Some(text) = content
            .and_then(|c| c.output_transcription.as_ref())
            .and_then(|t| t.text.as_deref())
            .filter(|t| !t.is_empty())
        {
            ctx.emit(SessionEvent::AssistantTranscript(text.to_string()));
        }

        if content.and_then(|c| c.turn_complete).unwrap_or(false) {
            ctx.pending_transcript.clear();
            summary.turn_complete = true;
            ctx.emit(SessionEvent::TurnComplete);
        }

        if let Some(cancellation) = &frame.tool_call_cancellation {
            tracing::debug!(seq, ids = ?cancellation.ids, "Server cancelled tool calls");
        }

        if let Some(go_away) = &frame.go_away {
            tracing::warn!(seq, time_left = ?go_away.time_left, "Server will close the session soon");
            ctx.emit(SessionEvent::GoAway {
                time_left: go_away.time_left.clone(),
            });
        }

        tracing::trace!(
            seq,
            tool_calls = summary.tool_calls,
            audio_chunks = summary.audio_chunks,
            "Frame processed"
        );
        Ok(summary)
    }
}
