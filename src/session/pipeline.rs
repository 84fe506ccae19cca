//! # Turn Generation Pipeline
//!
//! Runs one turn: pulls text increments from the generator, forwards each one to
//! the synthesizer, and relays the synthesized audio to the transport.
//!
//! ## Cancellation Points:
//! 1. While the generator stream is being opened
//! 2. Before every increment is accepted (and while waiting for the next one)
//! 3. While the synthesizer is working on an increment
//! 4. Before every audio chunk is relayed
//!
//! Once the token is set nothing more reaches the transport, even if the
//! synthesizer keeps emitting for a while.
//!
//! ## Failure Handling:
//! Generator and synthesizer failures end the turn as `Interrupted`; they are never
//! returned to the session as errors. Transport failures only lose the chunk that
//! failed.
//!
//! ## Rust Concepts Used:
//! - **`tokio::select!` with `biased;`**: branches are polled in order, so the
//!   cancellation branch always wins a tie with the next increment
//! - **Dropping a stream**: returning early drops the generator's stream, which is
//!   how an in-flight request is abandoned
//! - **`Arc<dyn Trait>`**: collaborators are shared, dynamically dispatched trait
//!   objects, so tests can swap in fakes
//! - **`JoinHandle`**: the relay task is awaited on success and aborted on failure

use crate::audio::PcmChunk;
use crate::collaborators::{AudioSink, Generator, Synthesizer, Transport};
use crate::error::{GenerationError, SynthesisError};
use crate::session::cancel::CancellationToken;
use crate::session::history::ChatMessage;
use crate::session::SessionId;
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a turn ended.
///
/// ## Rust Concepts:
/// - **enum with data**: `Completed` carries the full response, `Interrupted` the cause
/// - **No `Result`**: an interrupted turn is a normal outcome, not an error to propagate
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Generation finished and every audio chunk was relayed
    Completed(String),
    /// The turn was abandoned; its partial response is discarded
    Interrupted(InterruptCause),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterruptCause {
    /// Barge-in, session end or the turn watchdog set the token
    Cancelled,
    GenerationFailed(GenerationError),
    SynthesisFailed(SynthesisError),
}

impl fmt::Display for InterruptCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptCause::Cancelled => write!(f, "cancelled"),
            InterruptCause::GenerationFailed(err) => write!(f, "{}", err),
            InterruptCause::SynthesisFailed(err) => write!(f, "{}", err),
        }
    }
}

/// Counters for one turn's audio relay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub sent: usize,
    pub failed: usize,
}

/// The collaborators a session's turns run against.
///
/// Holds no reference to the session itself, so a turn that outlives its session
/// only ever touches the transport, and only while its token is unset.
#[derive(Clone)]
pub struct TurnPipeline {
    session_id: SessionId,
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    transport: Arc<dyn Transport>,
}

impl TurnPipeline {
    pub fn new(
        session_id: SessionId,
        generator: Arc<dyn Generator>,
        synthesizer: Arc<dyn Synthesizer>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            session_id,
            generator,
            synthesizer,
            transport,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run one turn against a snapshot of the conversation.
    pub async fn run(
        &self,
        turn_id: u64,
        history: Vec<ChatMessage>,
        token: CancellationToken,
    ) -> TurnOutcome {
        let (sink, audio) = AudioSink::channel();
        let relay = tokio::spawn(relay_audio(
            self.session_id.clone(),
            turn_id,
            audio,
            self.transport.clone(),
            token.clone(),
        ));

        // `sink` moves in and is dropped when generation ends, so the relay can drain
        match self.generate(history, &token, sink).await {
            Ok(response) => {
                // A barge-in while the tail of the audio is still playing interrupts too
                if let Ok(stats) = relay.await {
                    debug!(
                        session_id = %self.session_id,
                        turn_id,
                        sent = stats.sent,
                        failed = stats.failed,
                        "Turn audio relay finished"
                    );
                }
                if token.is_cancelled() {
                    TurnOutcome::Interrupted(InterruptCause::Cancelled)
                } else {
                    TurnOutcome::Completed(response)
                }
            }
            Err(InterruptCause::Cancelled) => TurnOutcome::Interrupted(InterruptCause::Cancelled),
            Err(cause) => {
                relay.abort();
                warn!(
                    session_id = %self.session_id,
                    turn_id,
                    error = %cause,
                    "Turn aborted by collaborator failure"
                );
                TurnOutcome::Interrupted(cause)
            }
        }
    }

    async fn generate(
        &self,
        history: Vec<ChatMessage>,
        token: &CancellationToken,
        sink: AudioSink,
    ) -> Result<String, InterruptCause> {
        let mut increments = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(InterruptCause::Cancelled),
            opened = self.generator.stream(history) => {
                opened.map_err(InterruptCause::GenerationFailed)?
            }
        };

        let mut response = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(InterruptCause::Cancelled),
                next = increments.next() => next,
            };

            let increment = match next {
                None => break,
                Some(Ok(increment)) => increment,
                Some(Err(err)) => return Err(InterruptCause::GenerationFailed(err)),
            };

            if token.is_cancelled() {
                return Err(InterruptCause::Cancelled);
            }

            response.push_str(&increment);

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(InterruptCause::Cancelled),
                pushed = self.synthesizer.push_text(&increment, &sink) => {
                    pushed.map_err(InterruptCause::SynthesisFailed)?
                }
            }
        }

        Ok(response)
    }
}

/// Drain one turn's synthesized audio into the transport, in emission order.
///
/// Stops as soon as the token is set; whatever is still queued is dropped with the
/// receiver. Ends normally when every sink clone has been dropped.
pub(crate) async fn relay_audio(
    session_id: SessionId,
    turn_id: u64,
    mut audio: mpsc::UnboundedReceiver<PcmChunk>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
) -> RelayStats {
    let mut stats = RelayStats::default();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            chunk = audio.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        if token.is_cancelled() {
            break;
        }

        match transport.send(chunk).await {
            Ok(()) => stats.sent += 1,
            Err(err) => {
                stats.failed += 1;
                if transport.is_closed() {
                    debug!(session_id = %session_id, turn_id, "Transport closed, dropping audio");
                } else {
                    warn!(session_id = %session_id, turn_id, error = %err, "Audio relay failed");
                }
            }
        }
    }

    stats
}
