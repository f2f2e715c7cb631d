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

//! The symmetric algorithm handed to the document encryption pipeline.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{AesGcmEncryptor, EncryptionAlgorithm, NONCE_LEN, SecureKey, TAG_LEN};
use crate::keys::ProtectedDataEncryptionKey;
use crate::setting::EncryptionType;
use crate::{Error, ErrorKind, Result};

/// Identifier stored in client encryption key properties for keys usable
/// with [`DataEncryptionAlgorithm`].
pub const AEAD_AES_256_GCM_HMAC_SHA256: &str = "AEAD_AES_256_GCM_HMAC_SHA256";

const FORMAT_VERSION: u8 = 0x01;
const ENCRYPTION_KEY_INFO: &[u8] = b"client-encryption aes-256-gcm encryption key";
const NONCE_KEY_INFO: &[u8] = b"client-encryption hmac-sha256 nonce key";

/// AES-256-GCM keyed from a protected data encryption key.
///
/// Two subkeys are derived with HKDF-SHA256 from the root key: one for
/// AES-256-GCM and one for nonce derivation. Deterministic encryption uses
/// `HMAC-SHA256(nonce key, plaintext)[..12]` as nonce, randomized encryption
/// a random nonce.
///
/// Ciphertext layout: `[version][12-byte nonce][ciphertext][16-byte tag]`.
pub struct DataEncryptionAlgorithm {
    data_encryption_key: Arc<ProtectedDataEncryptionKey>,
    encryption_type: EncryptionType,
    encryptor: AesGcmEncryptor,
    nonce_key: Zeroizing<[u8; 32]>,
}

impl Debug for DataEncryptionAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEncryptionAlgorithm")
            .field("key_id", &self.data_encryption_key.name())
            .field("encryption_type", &self.encryption_type)
            .finish_non_exhaustive()
    }
}

impl DataEncryptionAlgorithm {
    /// Builds an algorithm for the given key and encryption type.
    pub fn new(
        data_encryption_key: Arc<ProtectedDataEncryptionKey>,
        encryption_type: EncryptionType,
    ) -> Result<Self> {
        let hkdf = Hkdf::<Sha256>::new(None, data_encryption_key.root_key());

        let mut encryption_key = Zeroizing::new(vec![0u8; 32]);
        hkdf.expand(ENCRYPTION_KEY_INFO, &mut encryption_key[..])
            .map_err(derivation_failed)?;
        let mut nonce_key = Zeroizing::new([0u8; 32]);
        hkdf.expand(NONCE_KEY_INFO, &mut nonce_key[..])
            .map_err(derivation_failed)?;

        let encryptor = AesGcmEncryptor::try_new(&SecureKey::new(
            encryption_key.to_vec(),
            EncryptionAlgorithm::Aes256Gcm,
        )?)?;

        Ok(Self {
            data_encryption_key,
            encryption_type,
            encryptor,
            nonce_key,
        })
    }

    /// Encryption type this algorithm was built for.
    pub fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    /// Id of the client encryption key.
    pub fn key_id(&self) -> &str {
        self.data_encryption_key.name()
    }

    /// The key this algorithm encrypts with.
    pub fn data_encryption_key(&self) -> &Arc<ProtectedDataEncryptionKey> {
        &self.data_encryption_key
    }

    /// Encrypts a serialized property value.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let sealed = match self.encryption_type {
            EncryptionType::Deterministic => {
                let nonce = self.deterministic_nonce(plaintext)?;
                self.encryptor
                    .encrypt_with_nonce(plaintext, &nonce, Some(self.aad()))?
            }
            EncryptionType::Randomized => self.encryptor.encrypt(plaintext, Some(self.aad()))?,
        };

        let mut ciphertext = Vec::with_capacity(1 + sealed.len());
        ciphertext.push(FORMAT_VERSION);
        ciphertext.extend_from_slice(&sealed);
        Ok(ciphertext)
    }

    /// Decrypts a value produced by [`DataEncryptionAlgorithm::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let Some((&version, sealed)) = ciphertext.split_first() else {
            return Err(Error::new(ErrorKind::DataInvalid, "Ciphertext is empty"));
        };
        if version != FORMAT_VERSION {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Unsupported ciphertext version: {version}"),
            ));
        }
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Ciphertext too short: expected at least {} bytes, got {}",
                    1 + NONCE_LEN + TAG_LEN,
                    ciphertext.len()
                ),
            ));
        }

        self.encryptor
            .decrypt(sealed, Some(self.aad()))
            .map_err(|e| e.with_context("key id", self.key_id().to_string()))
    }

    fn deterministic_nonce(&self, plaintext: &[u8]) -> Result<[u8; NONCE_LEN]> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.nonce_key[..])
            .map_err(derivation_failed)?;
        mac.update(&[FORMAT_VERSION]);
        mac.update(plaintext);
        let digest = mac.finalize().into_bytes();

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        Ok(nonce)
    }

    fn aad(&self) -> &[u8] {
        AEAD_AES_256_GCM_HMAC_SHA256.as_bytes()
    }
}

fn derivation_failed<E>(e: E) -> Error
where
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    Error::new(ErrorKind::Unexpected, "Failed to derive data encryption subkeys")
        .with_source(anyhow::anyhow!(e))
}
