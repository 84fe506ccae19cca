//! # Collaborator Interfaces
//!
//! The session orchestrator never talks to a vendor API directly. It consumes four
//! narrow capabilities, each behind a trait:
//!
//! - **Transport**: the duplex channel to the caller (we only need the outbound half)
//! - **Recognizer**: live audio in, partial/final transcript events out
//! - **Generator**: conversation history in, lazy stream of text increments out
//! - **Synthesizer**: text increments in, audio chunks out through a sink
//!
//! Concrete adapters live in `crate::providers` (network services) and
//! `crate::websocket` (the media-stream transport). Tests use the fakes in
//! `crate::session::testing`.

use crate::audio::PcmChunk;
use crate::error::{
    GenerationError, RecognitionError, SessionError, SynthesisError, TransportError,
};
use crate::session::history::ChatMessage;
use crate::session::SessionId;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound audio path to the calling party.
///
/// Must be safe to call after the peer closed: `send` fails instead of panicking.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one chunk of PCM audio to the caller.
    async fn send(&self, chunk: PcmChunk) -> Result<(), TransportError>;

    /// Whether the peer has gone away.
    fn is_closed(&self) -> bool;

    /// Drop audio the transport has buffered but not yet played. Called on barge-in.
    fn clear(&self) {}
}

/// Events emitted by a recognizer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    /// Interim text, for observability only
    Partial(String),
    /// Confirmed text for one utterance
    Final(String),
    /// The recognizer failed; no further transcripts will follow
    Error(RecognitionError),
}

/// Where a recognizer delivers its events. The receiving half is drained by the
/// owning session actor, so events never touch session state from the recognizer's task.
pub type RecognizerEvents = mpsc::UnboundedSender<RecognizerEvent>;

/// Streaming speech recognizer for one session.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Connect and begin emitting events. A failure here fails session creation.
    async fn start(&self, events: RecognizerEvents) -> Result<(), RecognitionError>;

    /// Submit one PCM chunk. Called sequentially, in arrival order.
    async fn send_audio(&self, chunk: PcmChunk) -> Result<(), RecognitionError>;

    /// Stop recognizing. Must not block; called from `SessionRegistry::end`.
    fn stop(&self);
}

/// Lazy, finite sequence of text increments.
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

/// Text generator. Cancellation is done by dropping the stream.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn stream(&self, history: Vec<ChatMessage>) -> Result<TextStream, GenerationError>;
}

/// Where a synthesizer emits audio for the current turn.
///
/// Cheap to clone, usable from any task, and still valid after `push_text` returns.
/// Emitting after the turn is over is harmless: the chunk is dropped.
#[derive(Debug, Clone)]
pub struct AudioSink {
    tx: mpsc::UnboundedSender<PcmChunk>,
}

impl AudioSink {
    /// Create a sink and the receiving end the turn relay drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PcmChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit one audio chunk. Returns `false` once the turn no longer accepts audio.
    pub fn emit(&self, chunk: PcmChunk) -> bool {
        if chunk.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(chunk).is_ok()
    }
}

/// Streaming speech synthesizer for one session.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize one text increment, emitting its audio through `sink` in order.
    async fn push_text(&self, increment: &str, sink: &AudioSink) -> Result<(), SynthesisError>;
}

/// Builds the collaborators of a new session.
pub trait CollaboratorFactory: Send + Sync {
    fn recognizer(&self, session_id: &SessionId) -> Result<Arc<dyn Recognizer>, SessionError>;

    fn synthesizer(&self, session_id: &SessionId) -> Result<Arc<dyn Synthesizer>, SessionError>;

    /// Generators are stateless between calls and may be shared by all sessions.
    fn generator(&self) -> Arc<dyn Generator>;
}
