//! # Streaming Speech Recognizer
//!
//! WebSocket client for a live transcription service. Audio goes up as binary
//! frames of 16-bit little-endian mono PCM; transcripts come back as JSON text
//! frames:
//!
//! ```json
//! {"type":"Results","is_final":true,"channel":{"alternatives":[{"transcript":"hello"}]}}
//! ```
//!
//! ## Tasks:
//! - **writer**: drains the outbound queue into the socket, in order
//! - **reader**: parses inbound frames into `RecognizerEvent`s
//!
//! `stop` queues a `CloseStream` control message so the service can flush its
//! last transcript, then the writer closes the socket.

use crate::audio::PcmChunk;
use crate::collaborators::{Recognizer, RecognizerEvent, RecognizerEvents};
use crate::config::RecognizerConfig;
use crate::error::RecognitionError;
use crate::session::SessionId;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

enum Outbound {
    Audio(PcmChunk),
    Close,
}

pub struct StreamingRecognizer {
    session_id: SessionId,
    config: RecognizerConfig,
    sample_rate: u32,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

#[derive(Deserialize)]
struct ResultsMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    channel: Option<ResultsChannel>,
}

#[derive(Deserialize)]
struct ResultsChannel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

impl StreamingRecognizer {
    pub fn new(session_id: SessionId, config: RecognizerConfig, sample_rate: u32) -> Self {
        Self {
            session_id,
            config,
            sample_rate,
            outbound: Mutex::new(None),
        }
    }

    fn listen_url(&self) -> Result<reqwest::Url, RecognitionError> {
        let mut url = reqwest::Url::parse(&self.config.url)
            .map_err(|e| RecognitionError::Connect(format!("invalid url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("model", &self.config.model)
            .append_pair("language", &self.config.language)
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", &self.sample_rate.to_string())
            .append_pair("channels", "1")
            .append_pair("interim_results", &self.config.interim_results.to_string())
            .append_pair("endpointing", &self.config.endpointing_ms.to_string())
            .append_pair("smart_format", "true");
        Ok(url)
    }

    fn outbound(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<Outbound>>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Recognizer for StreamingRecognizer {
    async fn start(&self, events: RecognizerEvents) -> Result<(), RecognitionError> {
        let mut request = self
            .listen_url()?
            .as_str()
            .into_client_request()
            .map_err(|e| RecognitionError::Connect(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|e| RecognitionError::Connect(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RecognitionError::Connect(e.to_string()))?;
        info!(session_id = %self.session_id, "Recognizer connected");

        let (mut sink, mut frames) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                let frame = match outbound {
                    Outbound::Audio(chunk) => Message::Binary(chunk),
                    Outbound::Close => Message::Text(CLOSE_STREAM.to_string()),
                };
                let closing = matches!(frame, Message::Text(_));
                if let Err(err) = sink.send(frame).await {
                    warn!(session_id = %session_id, error = %err, "Recognizer socket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
            debug!(session_id = %session_id, "Recognizer writer stopped");
        });

        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_results(&text) {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        error!(session_id = %session_id, error = %err, "Recognizer socket failed");
                        let _ = events.send(RecognizerEvent::Error(RecognitionError::Stream(
                            err.to_string(),
                        )));
                        break;
                    }
                }
            }
            debug!(session_id = %session_id, "Recognizer reader stopped");
        });

        *self.outbound() = Some(outbound_tx);
        Ok(())
    }

    async fn send_audio(&self, chunk: PcmChunk) -> Result<(), RecognitionError> {
        match self.outbound().as_ref() {
            Some(outbound) => outbound
                .send(Outbound::Audio(chunk))
                .map_err(|_| RecognitionError::NotRunning),
            None => Err(RecognitionError::NotRunning),
        }
    }

    fn stop(&self) {
        if let Some(outbound) = self.outbound().take() {
            let _ = outbound.send(Outbound::Close);
            info!(session_id = %self.session_id, "Recognizer stopping");
        }
    }
}

/// Map one inbound text frame to an event. Non-transcript frames (metadata,
/// speech-started, utterance-end) and empty transcripts map to nothing.
fn parse_results(text: &str) -> Option<RecognizerEvent> {
    let message: ResultsMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "Ignoring unrecognized recognizer frame");
            return None;
        }
    };
    if message.kind != "Results" {
        return None;
    }

    let transcript = message
        .channel?
        .alternatives
        .into_iter()
        .next()?
        .transcript;
    if transcript.is_empty() {
        return None;
    }

    Some(if message.is_final {
        RecognizerEvent::Final(transcript)
    } else {
        RecognizerEvent::Partial(transcript)
    })
}
