//! Streaming text generator for OpenAI-compatible `/chat/completions` endpoints.
//!
//! The response is a server-sent event stream. Every event's data carries one JSON
//! chunk whose `choices[0].delta.content` is the next increment; `[DONE]` ends the
//! stream.

use crate::collaborators::{Generator, TextStream};
use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use crate::session::history::ChatMessage;
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::{debug, warn};

pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

impl ChatCompletionsGenerator {
    pub fn new(client: reqwest::Client, config: GeneratorConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    async fn stream(&self, history: Vec<ChatMessage>) -> Result<TextStream, GenerationError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: &history,
            temperature: self.config.temperature,
            stream: true,
        };

        debug!(model = %self.config.model, messages = history.len(), "Requesting completion");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status(status.as_u16(), body));
        }

        Ok(content_increments(response.bytes_stream()).boxed())
    }
}

/// Turn a raw SSE body into content increments.
///
/// Event framing is left to `eventsource_stream`; each event's `data` carries one
/// JSON chunk. Chunks without content (role headers, finish markers) produce
/// nothing. A body read error is yielded once and ends the stream.
pub(crate) fn content_increments<S, B, E>(
    body: S,
) -> impl Stream<Item = Result<String, GenerationError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(body.eventsource()), false),
        |(mut events, done)| async move {
            if done {
                return None;
            }

            loop {
                match events.next().await? {
                    Ok(event) => match parse_event_data(&event.data) {
                        SseData::Done => return None,
                        SseData::Content(content) => return Some((Ok(content), (events, false))),
                        SseData::Skip => continue,
                    },
                    Err(err) => {
                        let message = match err {
                            EventStreamError::Transport(err) => err.to_string(),
                            other => other.to_string(),
                        };
                        debug!(error = %message, "Completion stream broke");
                        return Some((Err(GenerationError::Stream(message)), (events, true)));
                    }
                }
            }
        },
    )
}

enum SseData {
    Content(String),
    Done,
    Skip,
}

fn parse_event_data(data: &str) -> SseData {
    let data = data.trim();
    if data.is_empty() {
        return SseData::Skip;
    }
    if data == "[DONE]" {
        return SseData::Done;
    }

    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseData::Content)
            .unwrap_or(SseData::Skip),
        Err(err) => {
            warn!(error = %err, "Skipping malformed completion chunk");
            SseData::Skip
        }
    }
}
