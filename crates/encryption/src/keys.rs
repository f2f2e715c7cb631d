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

//! Key encryption keys and protected data encryption keys.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::crypto::{EncryptionAlgorithm, SecureKey};
use crate::key_properties::EncryptionKeyWrapMetadata;
use crate::key_store::KeyStoreProvider;
use crate::{Error, ErrorKind, Result};

/// A master key living in a key store, addressed through its provider.
pub struct KeyEncryptionKey {
    name: String,
    path: String,
    algorithm: String,
    provider: Arc<dyn KeyStoreProvider>,
}

impl Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEncryptionKey")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("provider", &self.provider.provider_name())
            .finish_non_exhaustive()
    }
}

impl KeyEncryptionKey {
    /// Creates a key encryption key from wrap metadata.
    ///
    /// # Errors
    /// Returns `DataInvalid` when the wrap metadata names another provider.
    pub fn try_new(
        metadata: &EncryptionKeyWrapMetadata,
        provider: Arc<dyn KeyStoreProvider>,
    ) -> Result<Self> {
        if metadata.r#type != provider.provider_name() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "The key wrap metadata type does not match the name of the configured key store provider",
            )
            .with_context("metadata type", metadata.r#type.clone())
            .with_context("provider", provider.provider_name().to_string()));
        }

        Ok(Self {
            name: metadata.name.clone(),
            path: metadata.value.clone(),
            algorithm: metadata.algorithm.clone(),
            provider,
        })
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the master key in its key store.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this key is addressed through `provider` itself, not merely a
    /// provider of the same name.
    pub fn uses_provider(&self, provider: &Arc<dyn KeyStoreProvider>) -> bool {
        Arc::ptr_eq(&self.provider, provider)
    }

    /// Wraps a data encryption key.
    pub async fn wrap(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.provider
            .wrap_key(&self.path, &self.algorithm, key)
            .await
    }

    /// Unwraps a data encryption key. This is a remote call for any real
    /// provider.
    pub async fn unwrap(&self, wrapped_key: &[u8]) -> Result<Vec<u8>> {
        self.provider
            .unwrap_key(&self.path, &self.algorithm, wrapped_key)
            .await
            .map_err(|e| e.with_context("key encryption key", self.name.clone()))
    }
}

/// An unwrapped data encryption key together with the wrapped form it was
/// obtained from.
pub struct ProtectedDataEncryptionKey {
    name: String,
    key_encryption_key: Arc<KeyEncryptionKey>,
    encrypted_value: Vec<u8>,
    root_key: SecureKey,
}

impl Debug for ProtectedDataEncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedDataEncryptionKey")
            .field("name", &self.name)
            .field("key_encryption_key", &self.key_encryption_key)
            .finish_non_exhaustive()
    }
}

impl ProtectedDataEncryptionKey {
    /// Length of the root key in bytes.
    pub const KEY_LENGTH: usize = 32;

    /// Creates a protected data encryption key from unwrapped key bytes.
    ///
    /// # Errors
    /// Returns `DataInvalid` when the unwrapped key isn't 32 bytes long.
    pub fn try_new(
        name: impl Into<String>,
        key_encryption_key: Arc<KeyEncryptionKey>,
        encrypted_value: Vec<u8>,
        unwrapped_key: Vec<u8>,
    ) -> Result<Self> {
        let name = name.into();
        if unwrapped_key.len() != Self::KEY_LENGTH {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Unwrapped data encryption key length {} doesn't match requirement {}",
                    unwrapped_key.len(),
                    Self::KEY_LENGTH
                ),
            )
            .with_context("key id", name));
        }

        Ok(Self {
            name,
            key_encryption_key,
            encrypted_value,
            root_key: SecureKey::new(unwrapped_key, EncryptionAlgorithm::Aes256Gcm)?,
        })
    }

    /// Id of the client encryption key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key encryption key this key was unwrapped with.
    pub fn key_encryption_key(&self) -> &Arc<KeyEncryptionKey> {
        &self.key_encryption_key
    }

    /// Wrapped form of the key.
    pub fn encrypted_value(&self) -> &[u8] {
        &self.encrypted_value
    }

    pub(crate) fn root_key(&self) -> &[u8] {
        self.root_key.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_store::InMemoryKeyStoreProvider;

    fn metadata(r#type: &str) -> EncryptionKeyWrapMetadata {
        EncryptionKeyWrapMetadata::new(
            r#type,
            "kek-1",
            "keys/kek-1",
            InMemoryKeyStoreProvider::WRAP_ALGORITHM,
        )
    }

    #[tokio::test]
    async fn test_key_encryption_key_round_trip() {
        let provider: Arc<dyn KeyStoreProvider> = Arc::new(
            InMemoryKeyStoreProvider::new_with_master_key("keys/kek-1", vec![3u8; 32]),
        );
        let kek = KeyEncryptionKey::try_new(
            &metadata(InMemoryKeyStoreProvider::PROVIDER_NAME),
            provider,
        )
        .unwrap();

        let wrapped = kek.wrap(&[5u8; 32]).await.unwrap();
        assert_eq!(kek.unwrap(&wrapped).await.unwrap(), vec![5u8; 32]);
        assert_eq!(kek.path(), "keys/kek-1");
    }

    #[test]
    fn test_provider_mismatch_is_rejected() {
        let provider: Arc<dyn KeyStoreProvider> = Arc::new(InMemoryKeyStoreProvider::new());
        let err = KeyEncryptionKey::try_new(&metadata("AZURE_KEY_VAULT"), provider).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
    }

    #[test]
    fn test_protected_key_length_is_validated() {
        let provider: Arc<dyn KeyStoreProvider> = Arc::new(InMemoryKeyStoreProvider::new());
        let kek = Arc::new(
            KeyEncryptionKey::try_new(
                &metadata(InMemoryKeyStoreProvider::PROVIDER_NAME),
                provider,
            )
            .unwrap(),
        );

        assert!(
            ProtectedDataEncryptionKey::try_new("cek-1", kek.clone(), vec![1], vec![0u8; 16])
                .is_err()
        );
        let key =
            ProtectedDataEncryptionKey::try_new("cek-1", kek, vec![1], vec![0u8; 32]).unwrap();
        assert_eq!(key.name(), "cek-1");
        assert_eq!(key.encrypted_value(), &[1]);
    }
}
