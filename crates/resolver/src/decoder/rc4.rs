//! Double-RC4 id obfuscation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// RC4 keystream applied in place. Encryption and decryption are the same operation.
pub fn rc4_apply(key: &[u8], data: &mut [u8]) {
    if key.is_empty() {
        return;
    }
    let mut s: [u8; 256] = core::array::from_fn(|i| i as u8);
    let mut j: usize = 0;

    for i in 0..256 {
        j = (j + s[i] as usize + key[i % key.len()] as usize) % 256;
        s.swap(i, j);
    }

    let mut i: usize = 0;
    j = 0;
    for byte in data.iter_mut() {
        i = (i + 1) % 256;
        j = (j + s[i] as usize) % 256;
        s.swap(i, j);
        *byte ^= s[(s[i] as usize + s[j] as usize) % 256];
    }
}

/// RC4 with `first_key`, then with `second_key`, base64 encoded with `/`
/// replaced by `_` so the token can sit in a URL path.
pub fn double_rc4_token(input: &[u8], first_key: &[u8], second_key: &[u8]) -> String {
    let mut data = input.to_vec();
    rc4_apply(first_key, &mut data);
    rc4_apply(second_key, &mut data);
    STANDARD.encode(&data).replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rc4_reference_vector() {
        let mut data = b"Plaintext".to_vec();
        rc4_apply(b"Key", &mut data);
        assert_eq!(hex::encode(&data), "bbf316e8d940af0ad3");

        rc4_apply(b"Key", &mut data);
        assert_eq!(data, b"Plaintext");
    }

    #[test]
    fn test_double_rc4_token() {
        assert_eq!(double_rc4_token(b"abc123", b"key-one", b"key-two"), "zeh2wdHq");
    }

    #[test]
    fn test_token_is_path_safe() {
        // Raw base64 for this input is "8HhtW/Q5".
        assert_eq!(double_rc4_token(b"embed7", b"key-one", b"second"), "8HhtW_Q5");
    }
}
