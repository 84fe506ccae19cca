//! # Audio Module
//!
//! Audio format handling for the telephony bridge.
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 8kHz on the telephony leg (configurable via `session.sample_rate`)
//! - **Bit Depth**: 16-bit PCM internally, 8-bit µ-law on the wire
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod codec; // µ-law ⇄ PCM16 conversion and level metering

/// One chunk of 16-bit little-endian mono PCM.
pub type PcmChunk = Vec<u8>;
