//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (`HOST`, `PORT`) and provider credentials
//!    (`DEEPGRAM_API_KEY`, `OPENAI_API_KEY`, `ELEVENLABS_API_KEY`)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_SESSION__SYSTEM_PROMPT`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
///
/// ## Sections:
/// - `server`: where the HTTP/WebSocket server listens
/// - `session`: behaviour of every call session (prompt, capacity, barge-in)
/// - `recognizer` / `generator` / `synthesizer`: collaborator endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub recognizer: RecognizerConfig,
    pub generator: GeneratorConfig,
    pub synthesizer: SynthesizerConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Per-session behaviour.
///
/// ## Fields:
/// - `system_prompt`: first history entry of every conversation
/// - `max_concurrent_sessions`: registry capacity; `create` fails beyond it
/// - `sample_rate`: PCM sample rate exchanged with the transport (telephony is 8000)
/// - `barge_in_threshold`: minimum RMS (0.0 - 1.0) for a user audio chunk to count as
///   speech while a response is playing. 0.0 means every chunk interrupts.
/// - `turn_timeout_secs`: cancel a turn still running after this long (0 disables)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub system_prompt: String,
    pub max_concurrent_sessions: usize,
    pub sample_rate: u32,
    pub barge_in_threshold: f32,
    pub turn_timeout_secs: u64,
}

/// Streaming speech recognizer (WebSocket) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub endpointing_ms: u32,
    pub interim_results: bool,
}

/// OpenAI-compatible chat completions settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

/// Streaming text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    pub base_url: String,
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            session: SessionConfig {
                system_prompt: "You are a helpful assistant.".to_string(),
                max_concurrent_sessions: 10,
                sample_rate: 8000,
                barge_in_threshold: 0.0,
                turn_timeout_secs: 0,
            },
            recognizer: RecognizerConfig {
                url: "wss://api.deepgram.com/v1/listen".to_string(),
                api_key: String::new(),
                model: "nova-3".to_string(),
                language: "en-US".to_string(),
                endpointing_ms: 300,
                interim_results: true,
            },
            generator: GeneratorConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                model: "gpt-4".to_string(),
                temperature: 0.7,
            },
            synthesizer: SynthesizerConfig {
                base_url: "https://api.elevenlabs.io".to_string(),
                api_key: String::new(),
                voice_id: "TxGEqnHWrfWFTfG4DY78".to_string(),
                model_id: "eleven_turbo_v2_5".to_string(),
                output_format: "pcm_8000".to_string(),
                stability: 0.3,
                similarity_boost: 0.75,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_SESSION__BARGE_IN_THRESHOLD=0.02`: Require some energy before interrupting
    /// - `HOST=0.0.0.0` / `PORT=3000`: Deployment platform conventions
    /// - `OPENAI_API_KEY=...`: Generator credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Credentials keep their conventional names
        for (var, key) in [
            ("DEEPGRAM_API_KEY", "recognizer.api_key"),
            ("OPENAI_API_KEY", "generator.api_key"),
            ("ELEVENLABS_API_KEY", "synthesizer.api_key"),
        ] {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.session.barge_in_threshold) {
            return Err(anyhow::anyhow!(
                "Barge-in threshold must be between 0.0 and 1.0, got {}",
                self.session.barge_in_threshold
            ));
        }

        if self.session.system_prompt.trim().is_empty() {
            return Err(anyhow::anyhow!("System prompt cannot be empty"));
        }

        Ok(())
    }

    /// Copy of this configuration with every credential masked, for the config endpoint.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for key in [
            &mut copy.recognizer.api_key,
            &mut copy.generator.api_key,
            &mut copy.synthesizer.api_key,
        ] {
            if !key.is_empty() {
                *key = "***".to_string();
            }
        }
        copy
    }
}
