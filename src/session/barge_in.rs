//! # Barge-in Controller
//!
//! Decides whether a user audio chunk that arrives while a response is playing
//! should interrupt that response, and fires the turn's cancellation latch.
//!
//! Signalling is fire-and-forget: the controller sets the latch and returns. It
//! never waits for the pipeline to notice.

use crate::audio::codec::pcm16_rms;
use crate::session::cancel::CancellationToken;

/// Result of offering one audio chunk to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeIn {
    /// This chunk interrupted the turn
    Fired,
    /// The turn was already interrupted; nothing changed
    AlreadySignaled,
    /// The chunk was below the speech threshold
    Ignored,
}

#[derive(Debug, Clone)]
pub struct BargeInController {
    /// Minimum normalized RMS for a chunk to count as speech
    threshold: f32,
}

impl BargeInController {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Whether a chunk carries enough energy to count as the caller speaking.
    pub fn is_speech(&self, pcm: &[u8]) -> bool {
        self.threshold <= 0.0 || pcm16_rms(pcm) >= self.threshold
    }

    /// Offer one user audio chunk received during an active turn.
    pub fn signal(&self, token: &CancellationToken, pcm: &[u8]) -> BargeIn {
        if token.is_cancelled() {
            return BargeIn::AlreadySignaled;
        }
        if !self.is_speech(pcm) {
            return BargeIn::Ignored;
        }
        token.cancel();
        BargeIn::Fired
    }
}

impl Default for BargeInController {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_exactly_once() {
        let controller = BargeInController::default();
        let token = CancellationToken::new();

        assert_eq!(controller.signal(&token, &[0, 0]), BargeIn::Fired);
        for _ in 0..5 {
            assert_eq!(controller.signal(&token, &[0, 0]), BargeIn::AlreadySignaled);
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_threshold_filters_quiet_chunks() {
        let controller = BargeInController::new(0.1);
        let token = CancellationToken::new();

        let silence = vec![0u8; 320];
        assert_eq!(controller.signal(&token, &silence), BargeIn::Ignored);
        assert!(!token.is_cancelled());

        // Full-scale square wave
        let loud: Vec<u8> = (0..160).flat_map(|_| 0x7FFFi16.to_le_bytes()).collect();
        assert_eq!(controller.signal(&token, &loud), BargeIn::Fired);
    }

    #[test]
    fn test_zero_threshold_counts_every_chunk() {
        let controller = BargeInController::new(0.0);
        assert!(controller.is_speech(&[]));
        assert!(controller.is_speech(&[0, 0, 0, 0]));
    }
}
