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

//! Key store provider trait and implementations.
//!
//! This module provides a pluggable interface for wrapping and unwrapping
//! data encryption keys with a Key Management Service (KMS).

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use http::StatusCode;
use tokio::sync::RwLock;

use crate::crypto::{AesGcmEncryptor, EncryptionAlgorithm, SecureKey};
use crate::{Error, ErrorKind, Result};

/// Trait for key store providers that wrap and unwrap data encryption keys
/// with a master key (the key encryption key).
///
/// Implementations integrate with a KMS (Azure Key Vault, AWS KMS, GCP KMS,
/// ...). Denied access to a master key must surface as
/// [`ErrorKind::Forbidden`] or carry [`StatusCode::FORBIDDEN`], which is what
/// triggers key properties refresh during resolution.
#[async_trait::async_trait]
pub trait KeyStoreProvider: Send + Sync + Debug {
    /// Name of the provider. Must match the `type` of the wrap metadata of the
    /// keys it unwraps.
    fn provider_name(&self) -> &str;

    /// Wraps a data encryption key with the master key at `master_key_path`.
    async fn wrap_key(
        &self,
        master_key_path: &str,
        algorithm: &str,
        key: &[u8],
    ) -> Result<Vec<u8>>;

    /// Unwraps a data encryption key wrapped with the master key at
    /// `master_key_path`.
    async fn unwrap_key(
        &self,
        master_key_path: &str,
        algorithm: &str,
        wrapped_key: &[u8],
    ) -> Result<Vec<u8>>;
}

/// In-memory key store provider for testing and development.
///
/// Master keys are AES-GCM keys held in memory, indexed by path. Keys can be
/// revoked to simulate a master key whose access was withdrawn.
///
/// # Security Warning
/// This implementation is for testing only. Master keys are stored in memory
/// without secure storage or access controls.
#[derive(Debug, Default)]
pub struct InMemoryKeyStoreProvider {
    /// Master keys indexed by path
    keys: RwLock<HashMap<String, Vec<u8>>>,
    /// Paths whose access has been revoked
    revoked: RwLock<HashSet<String>>,
}

impl InMemoryKeyStoreProvider {
    /// Provider name, used as the `type` of wrap metadata.
    pub const PROVIDER_NAME: &'static str = "IN_MEMORY";
    /// The only wrapping algorithm this provider understands.
    pub const WRAP_ALGORITHM: &'static str = "AES-GCM";

    /// Creates a new provider with no keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new provider with a single master key.
    pub fn new_with_master_key(path: impl Into<String>, master_key: Vec<u8>) -> Self {
        Self {
            keys: RwLock::new(HashMap::from([(path.into(), master_key)])),
            revoked: RwLock::default(),
        }
    }

    /// Adds a master key.
    pub async fn add_master_key(&self, path: impl Into<String>, master_key: Vec<u8>) {
        self.keys.write().await.insert(path.into(), master_key);
    }

    /// Denies access to the master key at `path` until it's restored.
    pub async fn revoke_master_key(&self, path: &str) {
        self.revoked.write().await.insert(path.to_string());
    }

    /// Restores access to a revoked master key.
    pub async fn restore_master_key(&self, path: &str) {
        self.revoked.write().await.remove(path);
    }

    async fn encryptor(&self, path: &str, algorithm: &str) -> Result<AesGcmEncryptor> {
        if algorithm != Self::WRAP_ALGORITHM {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Unsupported key wrap algorithm: {algorithm}"),
            )
            .with_context("provider", Self::PROVIDER_NAME));
        }

        if self.revoked.read().await.contains(path) {
            return Err(Error::new(
                ErrorKind::Forbidden,
                "Access to the master key was denied",
            )
            .with_status_code(StatusCode::FORBIDDEN)
            .with_context("key path", path));
        }

        let master_key = self.keys.read().await.get(path).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("Master key not found: {path}"))
                .with_status_code(StatusCode::NOT_FOUND)
        })?;
        let algorithm = EncryptionAlgorithm::for_key_length(master_key.len())?;
        AesGcmEncryptor::try_new(&SecureKey::new(master_key, algorithm)?)
    }
}

#[async_trait::async_trait]
impl KeyStoreProvider for InMemoryKeyStoreProvider {
    fn provider_name(&self) -> &str {
        Self::PROVIDER_NAME
    }

    async fn wrap_key(
        &self,
        master_key_path: &str,
        algorithm: &str,
        key: &[u8],
    ) -> Result<Vec<u8>> {
        let encryptor = self.encryptor(master_key_path, algorithm).await?;
        // AAD binds the wrapped key to its master key path
        encryptor.encrypt(key, Some(master_key_path.as_bytes()))
    }

    async fn unwrap_key(
        &self,
        master_key_path: &str,
        algorithm: &str,
        wrapped_key: &[u8],
    ) -> Result<Vec<u8>> {
        let encryptor = self.encryptor(master_key_path, algorithm).await?;
        encryptor
            .decrypt(wrapped_key, Some(master_key_path.as_bytes()))
            .map_err(|e| e.with_context("key path", master_key_path))
    }
}
