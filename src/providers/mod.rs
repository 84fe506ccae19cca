//! # Network Collaborators
//!
//! Adapters that connect the session core to real speech and language services:
//!
//! - **streaming_stt**: WebSocket live transcription (`Recognizer`)
//! - **chat_completions**: OpenAI-compatible streaming chat (`Generator`)
//! - **http_tts**: HTTP streaming speech synthesis (`Synthesizer`)
//!
//! `HttpCollaborators` builds them from configuration for each new session.

pub mod chat_completions;
pub mod http_tts;
pub mod streaming_stt;

use crate::collaborators::{CollaboratorFactory, Generator, Recognizer, Synthesizer};
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::session::SessionId;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

pub use chat_completions::ChatCompletionsGenerator;
pub use http_tts::HttpStreamingSynthesizer;
pub use streaming_stt::StreamingRecognizer;

/// Collaborator factory backed by network services.
///
/// One `reqwest::Client` (and its connection pool) is shared by every session's
/// generator and synthesizer requests.
pub struct HttpCollaborators {
    config: AppConfig,
    client: reqwest::Client,
    generator: Arc<ChatCompletionsGenerator>,
}

impl HttpCollaborators {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        let generator = Arc::new(ChatCompletionsGenerator::new(
            client.clone(),
            config.generator.clone(),
        ));

        Ok(Self {
            config: config.clone(),
            client,
            generator,
        })
    }
}

impl CollaboratorFactory for HttpCollaborators {
    fn recognizer(&self, session_id: &SessionId) -> Result<Arc<dyn Recognizer>, SessionError> {
        if self.config.recognizer.api_key.is_empty() {
            return Err(SessionError::Creation(
                "recognizer API key is not configured".to_string(),
            ));
        }
        Ok(Arc::new(StreamingRecognizer::new(
            session_id.clone(),
            self.config.recognizer.clone(),
            self.config.session.sample_rate,
        )))
    }

    fn synthesizer(&self, _session_id: &SessionId) -> Result<Arc<dyn Synthesizer>, SessionError> {
        Ok(Arc::new(HttpStreamingSynthesizer::new(
            self.client.clone(),
            self.config.synthesizer.clone(),
        )))
    }

    fn generator(&self) -> Arc<dyn Generator> {
        self.generator.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_recognizer_key_fails_creation() {
        let factory = HttpCollaborators::new(&AppConfig::default()).unwrap();
        let result = factory.recognizer(&SessionId::new());
        assert!(matches!(result, Err(SessionError::Creation(_))));
    }

    #[test]
    fn test_builds_collaborators_when_configured() {
        let mut config = AppConfig::default();
        config.recognizer.api_key = "key".to_string();
        let factory = HttpCollaborators::new(&config).unwrap();

        let id = SessionId::new();
        assert!(factory.recognizer(&id).is_ok());
        assert!(factory.synthesizer(&id).is_ok());
        // Every session shares the same generator
        assert!(Arc::ptr_eq(&factory.generator(), &factory.generator()));
    }
}
