// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Encrypted request bodies for admin calls carrying secrets.
//!
//! Layout: `salt[32] | 0x01 | nonce[8] | fragments`. The key is derived with
//! Argon2id from the root secret key; fragments are ChaCha20-Poly1305 sealed,
//! 16 KiB of plaintext each, the last one flagged as final.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::RngCore;
use snafu::Snafu;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 8;
const TAG_LEN: usize = 16;
const FRAGMENT_LEN: usize = 16 * 1024;
const ARGON2ID_CHACHA20POLY1305: u8 = 0x01;
const FINAL_FLAG: u8 = 0x80;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("key derivation failed: {}", msg))]
    KeyDerivation { msg: String },

    #[snafu(display("sealing payload failed"))]
    Seal,
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], Error> {
    let params = Params::new(64 * 1024, 1, 4, Some(32)).map_err(|e| Error::KeyDerivation { msg: e.to_string() })?;
    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| Error::KeyDerivation { msg: e.to_string() })?;
    Ok(key)
}

fn nonce_for(base: &[u8; NONCE_LEN], seq: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_LEN].copy_from_slice(base);
    nonce[NONCE_LEN..].copy_from_slice(&seq.to_le_bytes());
    nonce
}

/// Associated data binding every fragment to the stream: a flag byte followed
/// by the tag of an empty message sealed under sequence number zero.
fn stream_ad(cipher: &ChaCha20Poly1305, base: &[u8; NONCE_LEN]) -> Result<Vec<u8>, Error> {
    let tag = cipher
        .encrypt(Nonce::from_slice(&nonce_for(base, 0)), Payload { msg: &[], aad: &[] })
        .map_err(|_| Error::Seal)?;
    let mut ad = Vec::with_capacity(1 + TAG_LEN);
    ad.push(0);
    ad.extend_from_slice(&tag);
    Ok(ad)
}

pub fn encrypt_data(password: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut salt = [0u8; SALT_LEN];
    let mut base = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut base);
    seal(password, &salt, &base, data)
}

fn seal(password: &str, salt: &[u8; SALT_LEN], base: &[u8; NONCE_LEN], data: &[u8]) -> Result<Vec<u8>, Error> {
    let key = derive_key(password, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let mut ad = stream_ad(&cipher, base)?;

    let mut out = Vec::with_capacity(SALT_LEN + 1 + NONCE_LEN + data.len() + TAG_LEN * (data.len() / FRAGMENT_LEN + 1));
    out.extend_from_slice(salt);
    out.push(ARGON2ID_CHACHA20POLY1305);
    out.extend_from_slice(base);

    let fragments: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(FRAGMENT_LEN).collect()
    };
    let last = fragments.len() - 1;
    for (i, fragment) in fragments.into_iter().enumerate() {
        if i == last {
            ad[0] = FINAL_FLAG;
        }
        let seq = u32::try_from(i + 1).map_err(|_| Error::Seal)?;
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce_for(base, seq)),
                Payload {
                    msg: fragment,
                    aad: &ad,
                },
            )
            .map_err(|_| Error::Seal)?;
        out.extend_from_slice(&sealed);
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn open(password: &str, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < SALT_LEN + 1 + NONCE_LEN || data[SALT_LEN] != ARGON2ID_CHACHA20POLY1305 {
            return None;
        }
        let key = derive_key(password, &data[..SALT_LEN]).ok()?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let mut base = [0u8; NONCE_LEN];
        base.copy_from_slice(&data[SALT_LEN + 1..SALT_LEN + 1 + NONCE_LEN]);
        let mut ad = stream_ad(&cipher, &base).ok()?;

        let body = &data[SALT_LEN + 1 + NONCE_LEN..];
        let chunks: Vec<&[u8]> = body.chunks(FRAGMENT_LEN + TAG_LEN).collect();
        let mut out = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == chunks.len() - 1 {
                ad[0] = FINAL_FLAG;
            }
            let plain = cipher
                .decrypt(
                    Nonce::from_slice(&nonce_for(&base, i as u32 + 1)),
                    Payload { msg: chunk, aad: &ad },
                )
                .ok()?;
            out.extend_from_slice(&plain);
        }
        Some(out)
    }

    #[test]
    fn test_layout() {
        let sealed = encrypt_data("minio123", br#"{"secretKey":"s3cr3t","status":"enabled"}"#).unwrap();
        assert_eq!(sealed[SALT_LEN], ARGON2ID_CHACHA20POLY1305);
        assert_eq!(sealed.len(), SALT_LEN + 1 + NONCE_LEN + 41 + TAG_LEN);
    }

    #[test]
    fn test_open_multi_fragment() {
        let data = vec![7u8; FRAGMENT_LEN * 2 + 5];
        let sealed = encrypt_data("minio123", &data).unwrap();
        assert_eq!(open("minio123", &sealed).unwrap(), data);
        assert!(open("wrong", &sealed).is_none());
    }

    #[test]
    fn test_empty_payload_has_final_fragment() {
        let sealed = seal("pw", &[1u8; SALT_LEN], &[2u8; NONCE_LEN], b"").unwrap();
        assert_eq!(sealed.len(), SALT_LEN + 1 + NONCE_LEN + TAG_LEN);
        assert_eq!(open("pw", &sealed).unwrap(), Vec::<u8>::new());
    }
}
