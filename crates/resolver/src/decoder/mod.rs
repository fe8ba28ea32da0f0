//! Obfuscation decoders. Everything here is a pure function except the
//! script-backed paths, which go through an injected [`ScriptEvaluator`].
//!
//! [`ScriptEvaluator`]: crate::js_engine::ScriptEvaluator

pub mod aes;
pub mod hex;
pub mod index_pair;
pub mod packer;
pub mod rc4;
pub mod token;

pub use aes::{CipherPayload, KeyDerivation, aes_decrypt, encrypt_openssl_salted};
pub use hex::{hex_decode, hex_encode};
pub use index_pair::{SplitCiphertext, parse_index_pairs, split_index_pairs};
pub use packer::{find_packed_scripts, is_packed, unpack, unpack_all, unpack_native};
pub use rc4::{double_rc4_token, rc4_apply};
pub use token::derive_token;
