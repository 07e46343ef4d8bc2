//! Payload resolution.
//!
//! Turns a [`PayloadSpec`] into the byte buffer a worker publishes, and
//! renders buffers back to hex for logs and payload listings.

use std::path::PathBuf;

use crate::config::{PayloadFormat, PayloadSpec};

/// Errors raised while resolving a payload specification
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Hex payload must contain an even number of digits (found {digits})")]
    OddHexLength { digits: usize },

    #[error("Invalid hex character '{character}' at position {position}")]
    InvalidHexCharacter { character: char, position: usize },

    #[error("Unable to read payload file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve a payload specification into bytes
pub fn resolve(spec: &PayloadSpec) -> Result<Vec<u8>, PayloadError> {
    match spec.format {
        PayloadFormat::Hex => parse_hex(&spec.value),
        PayloadFormat::Text => Ok(spec.value.as_bytes().to_vec()),
        PayloadFormat::File => {
            let path = PathBuf::from(spec.value.trim());
            std::fs::read(&path).map_err(|source| PayloadError::FileRead { path, source })
        }
    }
}

/// Parse hexadecimal digits into bytes, skipping any whitespace
///
/// # Examples
/// ```
/// use trdpsim::payload::parse_hex;
///
/// assert_eq!(parse_hex("0A 0b\n0C\t0d").unwrap(), vec![0x0A, 0x0B, 0x0C, 0x0D]);
/// assert!(parse_hex("ABC").is_err());
/// assert!(parse_hex("0G").is_err());
/// ```
pub fn parse_hex(value: &str) -> Result<Vec<u8>, PayloadError> {
    let mut digits = Vec::with_capacity(value.len());
    for (position, character) in value.chars().enumerate() {
        if character.is_whitespace() {
            continue;
        }
        let digit = character
            .to_digit(16)
            .ok_or(PayloadError::InvalidHexCharacter { character, position })?;
        digits.push(digit as u8);
    }

    if digits.len() % 2 != 0 {
        return Err(PayloadError::OddHexLength { digits: digits.len() });
    }

    Ok(digits.chunks_exact(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// Space-separated lowercase hex rendering, e.g. `de ad be ef`
pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}
