//! Recoding of the controller's text bytes.
//!
//! The controller emits accented characters in its own 7-bit-hostile code
//! page. Each known byte is replaced with its ISO-8859-15 equivalent and the
//! result is decoded as ISO-8859-15. Bytes left in the C1 control range
//! (`0x80..=0x9F`) after substitution have no printable meaning and make the
//! line a lossy decode.

/// Controller byte to ISO-8859-15 byte
const SUBSTITUTIONS: [(u8, u8); 11] = [
    (0x80, 0xA4), // €
    (0x81, 0xC4), // Ä
    (0x83, 0xE9), // é
    (0x87, 0xD6), // Ö
    (0x89, 0xDC), // Ü
    (0x8B, 0xB0), // °
    (0x8C, 0xA3), // £
    (0x8E, 0xDF), // ß
    (0x91, 0xE4), // ä
    (0x97, 0xF6), // ö
    (0x99, 0xFC), // ü
];

/// Outcome of recoding one buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recoded {
    /// Decoded text, with undecodable bytes dropped
    pub text: String,

    /// Set when the buffer did not decode cleanly
    pub error: Option<DecodeError>,
}

/// A lossy decode, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Hex dump of the raw input bytes
    pub hex: String,

    /// The lossy decoded string
    pub text: String,
}

/// Apply the substitution table to every byte
pub fn substitute(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .map(|&b| {
            SUBSTITUTIONS
                .iter()
                .find(|(from, _)| *from == b)
                .map(|(_, to)| *to)
                .unwrap_or(b)
        })
        .collect()
}

/// Substitute, then decode as ISO-8859-15
pub fn recode(bytes: &[u8]) -> Recoded {
    let substituted = substitute(bytes);
    let mut text = String::with_capacity(substituted.len());
    let mut clean = true;

    for &b in &substituted {
        match decode_byte(b) {
            Some(c) => text.push(c),
            None => clean = false,
        }
    }

    let error = (!clean).then(|| DecodeError {
        hex: hex_dump(bytes),
        text: text.clone(),
    });

    Recoded { text, error }
}

fn decode_byte(b: u8) -> Option<char> {
    match b {
        0x80..=0x9F => None,
        // Positions where ISO-8859-15 differs from Latin-1
        0xA4 => Some('€'),
        0xA6 => Some('Š'),
        0xA8 => Some('š'),
        0xB4 => Some('Ž'),
        0xB8 => Some('ž'),
        0xBC => Some('Œ'),
        0xBD => Some('œ'),
        0xBE => Some('Ÿ'),
        _ => Some(char::from(b)),
    }
}

/// Lowercase hex, two digits per byte
pub fn hex_dump(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
