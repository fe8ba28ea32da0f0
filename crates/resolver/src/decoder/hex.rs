//! Hex encoding used to build obfuscated request paths.

use crate::error::ResolveError;

/// Lower-case hex of the UTF-8 bytes of `input`.
pub fn hex_encode(input: &str) -> String {
    hex::encode(input.as_bytes())
}

/// Inverse of [`hex_encode`]. Odd-length, non-hex or non-UTF-8 input is a
/// [`ResolveError::Format`].
pub fn hex_decode(input: &str) -> Result<String, ResolveError> {
    if input.len() % 2 != 0 {
        return Err(ResolveError::format(format!(
            "hex string has odd length {}",
            input.len()
        )));
    }
    let bytes = hex::decode(input).map_err(|e| ResolveError::format(format!("invalid hex: {e}")))?;
    String::from_utf8(bytes).map_err(|e| ResolveError::format(format!("hex payload is not utf-8: {e}")))
}
