//! AES-256-CBC decryption for batch files (§4.5: "each file begins with a
//! 16-byte IV, followed by AES-256-CBC ciphertext; the key is delivered
//! out-of-band in the RPC's `secret_key` bytes").
//!
//! Decryption happens eagerly into a buffer rather than as a streaming
//! reader: the teacher's WAL decoder streams because a replication slot
//! is unbounded, but a Fivetran batch file is already bounded by
//! Fivetran's own file-size limits, so buffering the whole (decrypted)
//! file keeps the CSV pipeline simple.

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};

use crate::error::{ConnectorError, Result};

const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Decrypts `ciphertext` (IV-prefixed) with `key`, returning the
/// plaintext bytes with PKCS#7 padding stripped.
pub fn decrypt(path: &str, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(ConnectorError::Decrypt {
            path: path.to_string(),
            reason: format!("expected a {KEY_LEN}-byte key, got {}", key.len()),
        });
    }
    if ciphertext.len() < IV_LEN {
        return Err(ConnectorError::Decrypt {
            path: path.to_string(),
            reason: "file is shorter than the IV prefix".to_string(),
        });
    }

    let (iv, body) = ciphertext.split_at(IV_LEN);
    let mut buffer = body.to_vec();

    let decryptor = Aes256CbcDec::new(key.into(), iv.into());
    decryptor
        .decrypt_padded_mut::<cbc::cipher::block_padding::Pkcs7>(&mut buffer)
        .map(|plaintext| plaintext.to_vec())
        .map_err(|e| ConnectorError::Decrypt {
            path: path.to_string(),
            reason: e.to_string(),
        })
}
