//! # Audio Codec
//!
//! Stateless conversions between the telephony wire format and the PCM the rest of
//! the bridge works with.
//!
//! ## Formats:
//! - **Wire**: G.711 µ-law, 8-bit, 8 kHz, mono (what telephony media streams carry)
//! - **PCM**: 16-bit signed little-endian, mono (what recognizers and synthesizers use)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Encode one 16-bit sample as µ-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    magnitude = magnitude.min(ULAW_CLIP) + ULAW_BIAS;

    // Segment = position of the highest set bit above bit 7
    let mut exponent: i32 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !(sign | (exponent << 4) | mantissa) as u8
}

/// Decode one µ-law byte to a 16-bit sample.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Convert a µ-law payload into 16-bit little-endian PCM (two bytes per input byte).
pub fn ulaw_to_pcm16(data: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(data.len() * 2);
    for &byte in data {
        // Writing into a Vec cannot fail
        let _ = pcm.write_i16::<LittleEndian>(ulaw_to_linear(byte));
    }
    pcm
}

/// Convert 16-bit little-endian PCM into µ-law.
///
/// ## Errors:
/// Returns an error if the data length is odd (a half sample).
pub fn pcm16_to_ulaw(data: &[u8]) -> Result<Vec<u8>, String> {
    if data.len() % 2 != 0 {
        return Err("PCM data length must be even for 16-bit samples".to_string());
    }

    let mut cursor = Cursor::new(data);
    let mut encoded = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        encoded.push(linear_to_ulaw(sample));
    }
    Ok(encoded)
}

/// Root-mean-square level of a 16-bit PCM chunk, normalized to 0.0 - 1.0.
///
/// Used by the barge-in controller to tell speech from line noise. A trailing odd
/// byte is ignored; an empty chunk has level 0.0.
pub fn pcm16_rms(data: &[u8]) -> f32 {
    let mut cursor = Cursor::new(data);
    let mut sum_squares = 0.0f64;
    let mut count = 0usize;

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        let normalized = sample as f64 / 32768.0;
        sum_squares += normalized * normalized;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }
    (sum_squares / count as f64).sqrt() as f32
}
