//! Streaming speech synthesizer over HTTP.
//!
//! Each text increment becomes one `POST /v1/text-to-speech/{voice}/stream` request
//! that asks for raw PCM (`output_format`, e.g. `pcm_8000`). The response body is
//! relayed chunk by chunk as it arrives. Body chunks can split a 16-bit sample, so
//! an odd trailing byte is held back and prepended to the next chunk.

use crate::audio::PcmChunk;
use crate::collaborators::{AudioSink, Synthesizer};
use crate::config::SynthesizerConfig;
use crate::error::SynthesisError;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::debug;

pub struct HttpStreamingSynthesizer {
    client: reqwest::Client,
    config: SynthesizerConfig,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

impl HttpStreamingSynthesizer {
    pub fn new(client: reqwest::Client, config: SynthesizerConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream?output_format={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id,
            self.config.output_format
        )
    }
}

#[async_trait]
impl Synthesizer for HttpStreamingSynthesizer {
    async fn push_text(&self, increment: &str, sink: &AudioSink) -> Result<(), SynthesisError> {
        if increment.trim().is_empty() {
            return Ok(());
        }

        let request = SpeechRequest {
            text: increment,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SynthesisError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status(status.as_u16(), body));
        }

        let mut body = Box::pin(response.bytes_stream());
        let mut framer = SampleFramer::default();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| SynthesisError::Stream(e.to_string()))?;
            if let Some(pcm) = framer.push(&chunk) {
                if !sink.emit(pcm) {
                    debug!("Turn stopped accepting audio, abandoning synthesis");
                    return Ok(());
                }
            }
        }

        if framer.has_remainder() {
            debug!("Synthesis ended on half a sample, dropping the last byte");
        }
        Ok(())
    }
}

/// Re-aligns an arbitrary byte stream on 16-bit sample boundaries.
#[derive(Debug, Default)]
struct SampleFramer {
    carry: Option<u8>,
}

impl SampleFramer {
    /// Returns the whole samples available so far, or `None` if there are none yet.
    fn push(&mut self, bytes: &[u8]) -> Option<PcmChunk> {
        let mut pcm = Vec::with_capacity(bytes.len() + 1);
        pcm.extend(self.carry.take());
        pcm.extend_from_slice(bytes);
        if pcm.len() % 2 == 1 {
            self.carry = pcm.pop();
        }
        (!pcm.is_empty()).then_some(pcm)
    }

    fn has_remainder(&self) -> bool {
        self.carry.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_chunks_pass_through() {
        let mut framer = SampleFramer::default();
        assert_eq!(framer.push(&[1, 2, 3, 4]), Some(vec![1, 2, 3, 4]));
        assert!(!framer.has_remainder());
    }

    #[test]
    fn test_odd_byte_is_carried_forward() {
        let mut framer = SampleFramer::default();
        assert_eq!(framer.push(&[1, 2, 3]), Some(vec![1, 2]));
        assert!(framer.has_remainder());
        assert_eq!(framer.push(&[4, 5, 6]), Some(vec![3, 4, 5, 6]));
        assert!(!framer.has_remainder());
    }

    #[test]
    fn test_single_bytes_accumulate() {
        let mut framer = SampleFramer::default();
        assert_eq!(framer.push(&[7]), None);
        assert_eq!(framer.push(&[8]), Some(vec![7, 8]));
        assert_eq!(framer.push(&[]), None);
    }

    #[test]
    fn test_endpoint_and_request_shape() {
        let synthesizer = HttpStreamingSynthesizer::new(
            reqwest::Client::new(),
            SynthesizerConfig {
                base_url: "https://tts.example.com/".to_string(),
                voice_id: "voice".to_string(),
                output_format: "pcm_8000".to_string(),
                ..crate::config::AppConfig::default().synthesizer
            },
        );
        assert_eq!(
            synthesizer.endpoint(),
            "https://tts.example.com/v1/text-to-speech/voice/stream?output_format=pcm_8000"
        );

        let json = serde_json::to_value(SpeechRequest {
            text: "Hi",
            model_id: "m",
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        })
        .unwrap();
        assert_eq!(json["text"], "Hi");
        assert_eq!(json["voice_settings"]["similarity_boost"], 0.75);
    }

    #[tokio::test]
    async fn test_blank_increment_skips_request() {
        // Unroutable base URL: any request attempt would fail
        let synthesizer = HttpStreamingSynthesizer::new(
            reqwest::Client::new(),
            SynthesizerConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                ..crate::config::AppConfig::default().synthesizer
            },
        );
        let (sink, mut audio) = AudioSink::channel();

        assert!(synthesizer.push_text("  ", &sink).await.is_ok());
        drop(sink);
        assert!(audio.recv().await.is_none());
    }
}
