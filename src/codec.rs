//! # Codec
//!
//! Conversions between hex-byte text (`"90 90 E9"`), integers and little-endian byte buffers

use std::fmt::{self, Display, Write};
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Widest integer the codec handles, in bytes
pub const MAX_WIDTH: usize = 8;

/// Encodes `value` as exactly `width` little-endian bytes
///
/// `width` must be 1, 2, 4 or 8 and `value` must fit in it.
pub fn encode_le(value: u64, width: usize) -> Result<Vec<u8>> {
    if !matches!(width, 1 | 2 | 4 | 8) {
        return Err(Error::Range(format!(
            "unsupported integer width {width}, expected 1, 2, 4 or 8"
        )));
    }
    if width < MAX_WIDTH && value >> (width * 8) != 0 {
        return Err(Error::Range(format!(
            "value {value:#x} does not fit in {width} bytes"
        )));
    }
    Ok(value.to_le_bytes()[..width].to_vec())
}

/// Decodes 1 to 8 little-endian bytes into an unsigned integer. No sign extension is performed.
pub fn decode_le(bytes: &[u8]) -> Result<u64> {
    if bytes.is_empty() || bytes.len() > MAX_WIDTH {
        return Err(Error::Range(format!(
            "cannot decode {} bytes, expected 1 to {MAX_WIDTH}",
            bytes.len()
        )));
    }
    let mut buf = [0u8; MAX_WIDTH];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

/// Parses whitespace separated hex bytes such as `"83 EC 18 53 55"`
///
/// Tokens are case-insensitive and may carry a `0x` prefix.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let bytes = text
        .split_whitespace()
        .map(parse_token)
        .collect::<Result<Vec<_>>>()?;
    if bytes.is_empty() {
        return Err(Error::Format {
            token: String::new(),
            reason: "no bytes given",
        });
    }
    Ok(bytes)
}

/// Parses a single hex byte token
fn parse_token(token: &str) -> Result<u8> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Format {
            token: token.to_owned(),
            reason: "not a hexadecimal number",
        });
    }
    // parse wide so that "100" is reported as out of range rather than malformed
    let value = u32::from_str_radix(digits, 16).map_err(|_| Error::Format {
        token: token.to_owned(),
        reason: "out of range for a byte",
    })?;
    u8::try_from(value).map_err(|_| Error::Format {
        token: token.to_owned(),
        reason: "out of range for a byte",
    })
}

/// Formats bytes as two uppercase hex digits each, separated by spaces
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        // writing to a String never fails
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Owned byte sequence that reads and writes itself as hex-byte text
///
/// Used wherever byte sequences come from configuration, so that profiles can spell
/// patches the same way they appear in a disassembler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexBytes(Vec<u8>);

impl HexBytes {
    /// Wraps raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Unwraps into the raw bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for HexBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl FromStr for HexBytes {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex_bytes(s).map(Self)
    }
}

impl TryFrom<String> for HexBytes {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HexBytes> for String {
    fn from(value: HexBytes) -> Self {
        value.to_string()
    }
}

impl Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hex_bytes(&self.0))
    }
}
