//! # Session Actor
//!
//! One actor per live call. It owns the conversation history and the turn state,
//! and is the only code that ever mutates them.
//!
//! ## Inputs (all serialized through the mailbox):
//! - **RecognizerEvent** stream: partial/final transcripts from the recognizer
//! - **UserAudio**: caller audio routed in by the registry
//! - **TurnFinished**: the outcome of a turn task
//! - **GetHistory / GetStatus / Shutdown**: registry queries and teardown
//!
//! ## Turn State Machine:
//! ```text
//! IDLE   --final transcript-->  ACTIVE(turn n)
//! ACTIVE --caller audio------>  ACTIVE (turn n cancelled, still winding down)
//! ACTIVE --TurnFinished(n)--->  IDLE, or ACTIVE(turn n+1) when a reply is owed
//! ```
//! A turn runs as a tokio task. The actor never awaits it; the task reports back with
//! `TurnFinished`, and a report for anything but the current turn is ignored.
//!
//! ## Rust Concepts Used:
//! - **Actor trait**: `started`/`stopped` hooks run on the actor's own context
//! - **StreamHandler**: `ctx.add_stream` turns the recognizer's channel into messages
//!   handled one at a time, like any other mailbox message
//! - **`#[derive(Message)]`**: each input is a plain struct; `rtype` names the reply type
//! - **`MessageResult`**: replies with an owned value (history snapshot, status)
//! - **`Option::take`**: moves the active turn out of `self` so it can be inspected
//!   and put back without borrowing `self` twice

use crate::audio::PcmChunk;
use crate::collaborators::{Recognizer, RecognizerEvent};
use crate::session::barge_in::{BargeIn, BargeInController};
use crate::session::cancel::{ActiveTurnSlot, CancellationToken};
use crate::session::history::{ChatMessage, ConversationHistory};
use crate::session::pipeline::{InterruptCause, TurnOutcome, TurnPipeline};
use crate::session::SessionId;
use crate::state::BridgeMetrics;
use actix::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Observable session activity, broadcast to registry subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Partial { text: String },
    Final { text: String },
    TurnStarted { turn_id: u64, transcript: String },
    BargeIn { turn_id: u64 },
    TurnCompleted { turn_id: u64, response: String },
    TurnInterrupted { turn_id: u64, reason: String },
    RecognizerFailed { message: String },
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Active,
}

/// Snapshot served by `GET /api/v1/sessions/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub active_turn_id: Option<u64>,
    pub history_len: usize,
    pub turns_completed: u64,
    pub turns_interrupted: u64,
    pub created_at: DateTime<Utc>,
}

/// Caller audio routed in by the registry.
#[derive(Message)]
#[rtype(result = "()")]
pub struct UserAudio(pub PcmChunk);

#[derive(Message)]
#[rtype(result = "()")]
struct TurnFinished {
    turn_id: u64,
    outcome: TurnOutcome,
}

#[derive(Message)]
#[rtype(result = "Vec<ChatMessage>")]
pub struct GetHistory;

#[derive(Message)]
#[rtype(result = "SessionStatus")]
pub struct GetStatus;

#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

struct ActiveTurn {
    id: u64,
    token: CancellationToken,
    started_at: Instant,
    worker: JoinHandle<()>,
}

/// Everything a session actor is built from.
pub struct SessionParts {
    pub session_id: SessionId,
    pub system_prompt: String,
    pub pipeline: TurnPipeline,
    pub recognizer: Arc<dyn Recognizer>,
    pub recognizer_events: mpsc::UnboundedReceiver<RecognizerEvent>,
    pub barge_in: BargeInController,
    pub turn_slot: ActiveTurnSlot,
    pub events: broadcast::Sender<SessionEvent>,
    pub metrics: Arc<BridgeMetrics>,
    pub turn_timeout: Option<Duration>,
}

pub struct SessionActor {
    session_id: SessionId,
    history: ConversationHistory,
    active_turn: Option<ActiveTurn>,
    /// Transcript of a final that arrived during a turn and still needs a reply
    owed_reply: Option<String>,
    next_turn_id: u64,
    pipeline: TurnPipeline,
    recognizer: Arc<dyn Recognizer>,
    recognizer_events: Option<mpsc::UnboundedReceiver<RecognizerEvent>>,
    /// Feeds the recognizer, in arrival order
    audio_tx: Option<mpsc::UnboundedSender<PcmChunk>>,
    barge_in: BargeInController,
    turn_slot: ActiveTurnSlot,
    events: broadcast::Sender<SessionEvent>,
    metrics: Arc<BridgeMetrics>,
    turn_timeout: Option<Duration>,
    turns_completed: u64,
    turns_interrupted: u64,
    created_at: DateTime<Utc>,
}

impl SessionActor {
    pub fn new(parts: SessionParts) -> Self {
        Self {
            session_id: parts.session_id,
            history: ConversationHistory::new(parts.system_prompt),
            active_turn: None,
            owed_reply: None,
            next_turn_id: 1,
            pipeline: parts.pipeline,
            recognizer: parts.recognizer,
            recognizer_events: Some(parts.recognizer_events),
            audio_tx: None,
            barge_in: parts.barge_in,
            turn_slot: parts.turn_slot,
            events: parts.events,
            metrics: parts.metrics,
            turn_timeout: parts.turn_timeout,
            turns_completed: 0,
            turns_interrupted: 0,
            created_at: Utc::now(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is the normal case
        let _ = self.events.send(event);
    }

    fn on_final(&mut self, text: String, ctx: &mut Context<Self>) {
        if text.trim().is_empty() {
            debug!(session_id = %self.session_id, "Ignoring blank final transcript");
            return;
        }

        info!(session_id = %self.session_id, transcript = %text, "Final transcript");
        self.history.append_user(text.clone());
        self.emit(SessionEvent::Final { text: text.clone() });

        let active = self
            .active_turn
            .as_ref()
            .map(|turn| (turn.id, turn.token.clone()));
        match active {
            None => self.start_turn(text, ctx),
            Some((turn_id, token)) => {
                if !token.is_cancelled() {
                    token.cancel();
                    info!(session_id = %self.session_id, turn_id, "New utterance interrupts the active turn");
                    self.metrics.record_barge_in();
                    self.pipeline.transport().clear();
                    self.emit(SessionEvent::BargeIn { turn_id });
                }
                self.owed_reply = Some(text);
            }
        }
    }

    fn start_turn(&mut self, transcript: String, ctx: &mut Context<Self>) {
        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;

        let token = CancellationToken::new();
        let snapshot = self.history.snapshot();
        let pipeline = self.pipeline.clone();
        let addr = ctx.address();
        let worker_token = token.clone();

        let worker = tokio::spawn(async move {
            let outcome = pipeline.run(turn_id, snapshot, worker_token).await;
            // Dropped silently if the session has already stopped
            addr.do_send(TurnFinished { turn_id, outcome });
        });

        if let Some(timeout) = self.turn_timeout {
            ctx.run_later(timeout, move |act, _ctx| act.expire_turn(turn_id, timeout));
        }

        self.turn_slot.set(token.clone());
        self.active_turn = Some(ActiveTurn {
            id: turn_id,
            token,
            started_at: Instant::now(),
            worker,
        });
        self.metrics.record_turn_started();

        info!(session_id = %self.session_id, turn_id, "Turn started");
        self.emit(SessionEvent::TurnStarted {
            turn_id,
            transcript,
        });
    }

    fn expire_turn(&mut self, turn_id: u64, timeout: Duration) {
        if let Some(turn) = &self.active_turn {
            if turn.id == turn_id && !turn.token.is_cancelled() {
                turn.token.cancel();
                warn!(
                    session_id = %self.session_id,
                    turn_id,
                    timeout_secs = timeout.as_secs(),
                    "Turn exceeded its time limit, cancelling"
                );
            }
        }
    }
}

impl Actor for SessionActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Some(events) = self.recognizer_events.take() {
            ctx.add_stream(UnboundedReceiverStream::new(events));
        }

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        self.audio_tx = Some(audio_tx);
        tokio::spawn(forward_audio(
            self.session_id.clone(),
            self.recognizer.clone(),
            audio_rx,
        ));

        info!(session_id = %self.session_id, "Session started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(turn) = self.active_turn.take() {
            turn.token.cancel();
            if !turn.worker.is_finished() {
                debug!(session_id = %self.session_id, turn_id = turn.id, "Turn still winding down after session end");
            }
        }
        self.turn_slot.clear();
        self.audio_tx = None;
        self.emit(SessionEvent::Ended);
        info!(session_id = %self.session_id, history_len = self.history.len(), "Session stopped");
    }
}

/// Submit caller audio to the recognizer one chunk at a time.
async fn forward_audio(
    session_id: SessionId,
    recognizer: Arc<dyn Recognizer>,
    mut audio: mpsc::UnboundedReceiver<PcmChunk>,
) {
    let mut failing = false;
    while let Some(chunk) = audio.recv().await {
        match recognizer.send_audio(chunk).await {
            Ok(()) => failing = false,
            Err(err) => {
                // Log the first failure of a run, not every chunk
                if !failing {
                    warn!(session_id = %session_id, error = %err, "Recognizer rejected audio");
                }
                failing = true;
            }
        }
    }
    debug!(session_id = %session_id, "Audio forwarder stopped");
}

impl StreamHandler<RecognizerEvent> for SessionActor {
    fn handle(&mut self, event: RecognizerEvent, ctx: &mut Self::Context) {
        match event {
            RecognizerEvent::Partial(text) => {
                debug!(session_id = %self.session_id, partial = %text, "Partial transcript");
                self.emit(SessionEvent::Partial { text });
            }
            RecognizerEvent::Final(text) => self.on_final(text, ctx),
            RecognizerEvent::Error(err) => {
                error!(session_id = %self.session_id, error = %err, "Recognizer failed");
                self.emit(SessionEvent::RecognizerFailed {
                    message: err.to_string(),
                });
            }
        }
    }

    /// The recognizer closed its event stream. The session stays up until it is ended.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!(session_id = %self.session_id, "Recognizer event stream ended");
    }
}

impl Handler<UserAudio> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: UserAudio, _ctx: &mut Self::Context) {
        let UserAudio(chunk) = msg;

        if let Some(turn) = &self.active_turn {
            if self.barge_in.signal(&turn.token, &chunk) == BargeIn::Fired {
                info!(session_id = %self.session_id, turn_id = turn.id, "Barge-in: caller spoke over the response");
                self.metrics.record_barge_in();
                self.pipeline.transport().clear();
                self.emit(SessionEvent::BargeIn { turn_id: turn.id });
            }
        }

        if let Some(audio_tx) = &self.audio_tx {
            if audio_tx.send(chunk).is_err() {
                debug!(session_id = %self.session_id, "Audio forwarder gone, dropping chunk");
            }
        }
    }
}

impl Handler<TurnFinished> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: TurnFinished, ctx: &mut Self::Context) {
        let turn = match self.active_turn.take() {
            Some(turn) if turn.id == msg.turn_id => turn,
            other => {
                self.active_turn = other;
                debug!(session_id = %self.session_id, turn_id = msg.turn_id, "Ignoring report from a stale turn");
                return;
            }
        };
        self.turn_slot.clear();
        let elapsed_ms = turn.started_at.elapsed().as_millis() as u64;

        match msg.outcome {
            TurnOutcome::Completed(response) => {
                self.history.append_assistant(response.clone());
                self.turns_completed += 1;
                self.metrics.record_turn_completed();
                info!(session_id = %self.session_id, turn_id = turn.id, elapsed_ms, "Turn completed");
                self.emit(SessionEvent::TurnCompleted {
                    turn_id: turn.id,
                    response,
                });
            }
            TurnOutcome::Interrupted(cause) => {
                self.turns_interrupted += 1;
                self.metrics.record_turn_interrupted();
                match &cause {
                    InterruptCause::Cancelled => {
                        info!(session_id = %self.session_id, turn_id = turn.id, elapsed_ms, "Turn interrupted")
                    }
                    _ => {
                        warn!(session_id = %self.session_id, turn_id = turn.id, elapsed_ms, reason = %cause, "Turn failed")
                    }
                }
                self.emit(SessionEvent::TurnInterrupted {
                    turn_id: turn.id,
                    reason: cause.to_string(),
                });
            }
        }

        if let Some(transcript) = self.owed_reply.take() {
            self.start_turn(transcript, ctx);
        }
    }
}

impl Handler<GetHistory> for SessionActor {
    type Result = MessageResult<GetHistory>;

    fn handle(&mut self, _msg: GetHistory, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.history.snapshot())
    }
}

impl Handler<GetStatus> for SessionActor {
    type Result = MessageResult<GetStatus>;

    fn handle(&mut self, _msg: GetStatus, _ctx: &mut Self::Context) -> Self::Result {
        let active_turn_id = self.active_turn.as_ref().map(|turn| turn.id);
        MessageResult(SessionStatus {
            session_id: self.session_id.clone(),
            state: if active_turn_id.is_some() {
                SessionState::Active
            } else {
                SessionState::Idle
            },
            active_turn_id,
            history_len: self.history.len(),
            turns_completed: self.turns_completed,
            turns_interrupted: self.turns_interrupted,
            created_at: self.created_at,
        })
    }
}

impl Handler<Shutdown> for SessionActor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        ctx.stop();
    }
}
