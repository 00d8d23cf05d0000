//! Message signature and AES-CBC envelope codec.
//!
//! Key: `base64(encoding_aes_key + "=")`, 16/24/32 bytes. IV: the first 16
//! key bytes. Plaintext: `random(16) ∥ len(4, BE) ∥ payload ∥ receive_id`,
//! PKCS7-padded to a 32-byte block.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use sha1::{Digest, Sha1};

use crate::error::CryptoError;

/// The platform's key strings are not canonical base64 (the last symbol
/// carries spare bits), so decoding has to tolerate that.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// PKCS7 block size used by the platform (not the AES block size).
const PAD_BLOCK: usize = 32;
const NONCE_LEN: usize = 16;
const LEN_PREFIX: usize = 4;
const IV_LEN: usize = 16;

/// `hex(sha1(concat(sorted([token, timestamp, nonce, encrypt]))))`
pub fn signature(token: &str, timestamp: &str, nonce: &str, encrypt: &str) -> String {
    let mut parts = [token, timestamp, nonce, encrypt];
    parts.sort_unstable();
    hex::encode(Sha1::digest(parts.concat().as_bytes()))
}

/// Exact, constant-time comparison against the supplied `msg_signature`.
pub fn verify_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    encrypt: &str,
    supplied: &str,
) -> bool {
    constant_time_eq(&signature(token, timestamp, nonce, encrypt), supplied)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Decrypted envelope contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub payload: Vec<u8>,
    /// Trailing receiver id (corp id / bot id). Not validated here.
    pub receive_id: String,
}

/// Cipher state for one adapter instance.
#[derive(Clone)]
pub struct WxCrypto {
    key: Vec<u8>,
}

impl std::fmt::Debug for WxCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WxCrypto")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl WxCrypto {
    pub fn new(encoding_aes_key: &str) -> Result<Self, CryptoError> {
        let key = LENIENT
            .decode(format!("{}=", encoding_aes_key.trim()))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(CryptoError::InvalidKey(format!(
                "decoded key is {} bytes, expected 16, 24 or 32",
                key.len()
            )));
        }
        Ok(Self { key })
    }

    /// base64 ciphertext → payload + receive id.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<Envelope, CryptoError> {
        let mut buf = LENIENT.decode(ciphertext_b64.trim())?;
        if buf.is_empty() || buf.len() % 16 != 0 {
            return Err(CryptoError::Unaligned { len: buf.len() });
        }
        self.cbc_decrypt(&mut buf)?;
        let plain = pkcs7_unpad(&buf);
        open_envelope(plain)
    }

    /// payload + receive id → base64 ciphertext.
    pub fn encrypt(&self, payload: &[u8], receive_id: &str) -> Result<String, CryptoError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| CryptoError::Envelope("payload too large".into()))?;

        let mut plain =
            Vec::with_capacity(NONCE_LEN + LEN_PREFIX + payload.len() + receive_id.len() + PAD_BLOCK);
        plain.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        plain.extend_from_slice(&len.to_be_bytes());
        plain.extend_from_slice(payload);
        plain.extend_from_slice(receive_id.as_bytes());
        pkcs7_pad(&mut plain);

        Ok(LENIENT.encode(self.cbc_encrypt(&plain)?))
    }

    fn iv(&self) -> &[u8] {
        &self.key[..IV_LEN]
    }

    fn cbc_decrypt(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        let key = self.key.as_slice();
        let len = buf.len();
        let bad_key = |e: aes::cipher::InvalidLength| CryptoError::InvalidKey(e.to_string());
        let result = match key.len() {
            16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, self.iv())
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ()),
            24 => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, self.iv())
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ()),
            _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, self.iv())
                .map_err(bad_key)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ()),
        };
        result.map_err(|_| CryptoError::Unaligned { len })
    }

    fn cbc_encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.key.as_slice();
        let bad_key = |e: aes::cipher::InvalidLength| CryptoError::InvalidKey(e.to_string());
        Ok(match key.len() {
            16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, self.iv())
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<NoPadding>(plain),
            24 => cbc::Encryptor::<aes::Aes192>::new_from_slices(key, self.iv())
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<NoPadding>(plain),
            _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, self.iv())
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<NoPadding>(plain),
        })
    }
}

/// Strip PKCS7 padding. A zero pad byte, or one larger than the block or
/// the buffer, means the buffer is taken as unpadded.
pub fn pkcs7_unpad(buf: &[u8]) -> &[u8] {
    let Some(&last) = buf.last() else {
        return buf;
    };
    let pad = last as usize;
    if pad == 0 || pad > PAD_BLOCK || pad > buf.len() {
        return buf;
    }
    &buf[..buf.len() - pad]
}

fn pkcs7_pad(buf: &mut Vec<u8>) {
    let pad = PAD_BLOCK - buf.len() % PAD_BLOCK;
    buf.resize(buf.len() + pad, pad as u8);
}

/// Split `nonce(16) ∥ len(4, BE) ∥ payload ∥ receive_id`.
pub fn open_envelope(plain: &[u8]) -> Result<Envelope, CryptoError> {
    let header = NONCE_LEN + LEN_PREFIX;
    if plain.len() < header {
        return Err(CryptoError::Envelope(format!(
            "{} bytes is shorter than the header",
            plain.len()
        )));
    }

    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(&plain[NONCE_LEN..header]);
    let len = u32::from_be_bytes(len_bytes) as usize;

    let end = header
        .checked_add(len)
        .filter(|&end| end <= plain.len())
        .ok_or_else(|| {
            CryptoError::Envelope(format!(
                "declared length {len} exceeds {} available bytes",
                plain.len() - header
            ))
        })?;

    Ok(Envelope {
        payload: plain[header..end].to_vec(),
        receive_id: String::from_utf8_lossy(&plain[end..]).into_owned(),
    })
}
