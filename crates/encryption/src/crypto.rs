// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! AES-GCM primitives shared by key wrapping and the data encryption algorithm.

use std::fmt::{self, Debug, Display, Formatter};

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{Error, ErrorKind, Result};

pub(crate) const NONCE_LEN: usize = 12;
pub(crate) const TAG_LEN: usize = 16;

/// AES-GCM key sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    /// 128-bit key.
    Aes128Gcm,
    /// 256-bit key.
    Aes256Gcm,
}

impl EncryptionAlgorithm {
    /// Key length in bytes.
    pub fn key_length(&self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm => 32,
        }
    }

    /// The variant whose keys are `len` bytes long.
    pub fn for_key_length(len: usize) -> Result<Self> {
        match len {
            16 => Ok(Self::Aes128Gcm),
            32 => Ok(Self::Aes256Gcm),
            _ => Err(Error::new(
                ErrorKind::DataInvalid,
                format!("No AES-GCM variant takes {len}-byte keys"),
            )),
        }
    }
}

impl Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128Gcm => f.write_str("AES-128-GCM"),
            Self::Aes256Gcm => f.write_str("AES-256-GCM"),
        }
    }
}

/// Key bytes, zeroed on drop and never printed.
pub struct SecureKey {
    bytes: Zeroizing<Vec<u8>>,
    algorithm: EncryptionAlgorithm,
}

impl Debug for SecureKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SecureKey({})", self.algorithm)
    }
}

impl SecureKey {
    /// Wraps existing key bytes.
    ///
    /// # Errors
    /// Returns `DataInvalid` when `bytes` isn't as long as `algorithm`
    /// requires.
    pub fn new(bytes: Vec<u8>, algorithm: EncryptionAlgorithm) -> Result<Self> {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() != algorithm.key_length() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "{algorithm} takes {}-byte keys, got {} bytes",
                    algorithm.key_length(),
                    bytes.len()
                ),
            ));
        }
        Ok(Self { bytes, algorithm })
    }

    /// Draws a key from the OS random number generator.
    pub fn generate(algorithm: EncryptionAlgorithm) -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; algorithm.key_length()]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self { bytes, algorithm }
    }

    /// Variant this key is for.
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

enum Cipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// AES-GCM with a fixed key. Sealed output is `[nonce][ciphertext][tag]`.
pub struct AesGcmEncryptor {
    algorithm: EncryptionAlgorithm,
    cipher: Cipher,
}

impl Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmEncryptor")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl AesGcmEncryptor {
    /// Initializes the cipher for `key`.
    pub fn try_new(key: &SecureKey) -> Result<Self> {
        let algorithm = key.algorithm();
        let invalid_key = |e| cipher_error(ErrorKind::DataInvalid, "Invalid key", algorithm, e);
        let cipher = match algorithm {
            EncryptionAlgorithm::Aes128Gcm => {
                Cipher::Aes128(Aes128Gcm::new_from_slice(key.as_bytes()).map_err(invalid_key)?)
            }
            EncryptionAlgorithm::Aes256Gcm => {
                Cipher::Aes256(Aes256Gcm::new_from_slice(key.as_bytes()).map_err(invalid_key)?)
            }
        };
        Ok(Self { algorithm, cipher })
    }

    /// Seals `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, &nonce, aad)
    }

    /// Seals `plaintext` under `nonce`. Reusing a nonce for a different
    /// plaintext under the same key breaks confidentiality.
    pub(crate) fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_LEN],
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: plaintext,
            aad: aad.unwrap_or_default(),
        };
        let sealed = match &self.cipher {
            Cipher::Aes128(cipher) => cipher.encrypt(Nonce::from_slice(nonce), payload),
            Cipher::Aes256(cipher) => cipher.encrypt(Nonce::from_slice(nonce), payload),
        }
        .map_err(|e| {
            cipher_error(ErrorKind::Unexpected, "Encryption failed", self.algorithm, e)
        })?;

        let mut output = Vec::with_capacity(NONCE_LEN + sealed.len());
        output.extend_from_slice(nonce);
        output.extend_from_slice(&sealed);
        Ok(output)
    }

    /// Opens output of [`AesGcmEncryptor::encrypt`]. Fails with
    /// `DataInvalid` when the input is truncated or doesn't authenticate.
    pub fn decrypt(&self, sealed: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Sealed input is {} bytes, shorter than nonce and tag",
                    sealed.len()
                ),
            ));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: aad.unwrap_or_default(),
        };
        match &self.cipher {
            Cipher::Aes128(cipher) => cipher.decrypt(Nonce::from_slice(nonce), payload),
            Cipher::Aes256(cipher) => cipher.decrypt(Nonce::from_slice(nonce), payload),
        }
        .map_err(|e| {
            cipher_error(ErrorKind::DataInvalid, "Decryption failed", self.algorithm, e)
        })
    }
}

fn cipher_error<E>(
    kind: ErrorKind,
    message: &'static str,
    algorithm: EncryptionAlgorithm,
    source: E,
) -> Error
where
    E: Display + Debug + Send + Sync + 'static,
{
    Error::new(kind, message)
        .with_context("algorithm", algorithm.to_string())
        .with_source(anyhow::anyhow!(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor(algorithm: EncryptionAlgorithm) -> AesGcmEncryptor {
        AesGcmEncryptor::try_new(&SecureKey::generate(algorithm)).unwrap()
    }

    #[test]
    fn test_key_lengths() {
        assert_eq!(EncryptionAlgorithm::Aes128Gcm.key_length(), 16);
        assert_eq!(EncryptionAlgorithm::Aes256Gcm.key_length(), 32);
        assert_eq!(
            EncryptionAlgorithm::for_key_length(16).unwrap(),
            EncryptionAlgorithm::Aes128Gcm
        );
        assert_eq!(
            EncryptionAlgorithm::for_key_length(24).unwrap_err().kind(),
            ErrorKind::DataInvalid
        );
    }

    #[test]
    fn test_secure_key_length_is_validated() {
        assert!(SecureKey::new(vec![0u8; 32], EncryptionAlgorithm::Aes256Gcm).is_ok());
        assert!(SecureKey::new(vec![0u8; 16], EncryptionAlgorithm::Aes256Gcm).is_err());

        let generated = SecureKey::generate(EncryptionAlgorithm::Aes128Gcm);
        assert_eq!(generated.as_bytes().len(), 16);
        assert_eq!(format!("{generated:?}"), "SecureKey(AES-128-GCM)");
    }

    #[test]
    fn test_aad_binds_sealed_output() {
        let encryptor = encryptor(EncryptionAlgorithm::Aes256Gcm);
        let plaintext = b"wrapped data encryption key";

        let sealed = encryptor.encrypt(plaintext, Some(b"kek-path")).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + plaintext.len() + TAG_LEN);
        assert_eq!(encryptor.decrypt(&sealed, Some(b"kek-path")).unwrap(), plaintext);
        assert!(encryptor.decrypt(&sealed, Some(b"other-path")).is_err());
    }

    #[test]
    fn test_fixed_nonce_is_deterministic() {
        let encryptor = encryptor(EncryptionAlgorithm::Aes256Gcm);
        let nonce = [7u8; NONCE_LEN];

        let first = encryptor.encrypt_with_nonce(b"same", &nonce, None).unwrap();
        let second = encryptor.encrypt_with_nonce(b"same", &nonce, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..NONCE_LEN], &nonce);
    }

    #[test]
    fn test_tampered_or_truncated_input_is_rejected() {
        let encryptor = encryptor(EncryptionAlgorithm::Aes128Gcm);
        let mut sealed = encryptor.encrypt(b"Sensitive data", None).unwrap();
        sealed[NONCE_LEN] ^= 0xFF;

        let err = encryptor.decrypt(&sealed, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
        assert!(encryptor.decrypt(&[0u8; 4], None).is_err());
    }
}
