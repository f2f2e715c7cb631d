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

//! An in-memory control plane holding client encryption key properties.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use http::StatusCode;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::algorithm::AEAD_AES_256_GCM_HMAC_SHA256;
use crate::crypto::{EncryptionAlgorithm, SecureKey};
use crate::key_properties::{ClientEncryptionKeyProperties, EncryptionKeyWrapMetadata};
use crate::key_store::KeyStoreProvider;
use crate::keys::KeyEncryptionKey;
use crate::properties_cache::{KeyPropertiesFetcher, ReadKeyPropertiesRequest};
use crate::{Error, ErrorKind, Result};

#[derive(Debug, Clone)]
struct StoredKey {
    authoritative: ClientEncryptionKeyProperties,
    gateway: ClientEncryptionKeyProperties,
}

/// Stores client encryption key properties per database, the way a control
/// plane behind a gateway cache does.
///
/// Writes go to the authoritative copy. Reads are served from the gateway
/// copy, which only catches up when a read forces a gateway cache refresh.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    keys: RwLock<HashMap<(String, String), StoredKey>>,
    etag_sequence: AtomicU64,
    reads: AtomicUsize,
}

impl InMemoryControlPlane {
    /// Creates an empty control plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client encryption key with a fresh random data encryption
    /// key wrapped by the key encryption key `wrap_metadata` names.
    ///
    /// # Errors
    /// Returns `AlreadyExists` (status 409) when the key exists.
    pub async fn create_client_encryption_key(
        &self,
        database_id: &str,
        key_id: &str,
        wrap_metadata: EncryptionKeyWrapMetadata,
        provider: &Arc<dyn KeyStoreProvider>,
    ) -> Result<ClientEncryptionKeyProperties> {
        let id = (database_id.to_string(), key_id.to_string());
        if self.keys.read().await.contains_key(&id) {
            return Err(already_exists(database_id, key_id));
        }

        let data_encryption_key = SecureKey::generate(EncryptionAlgorithm::Aes256Gcm);
        let wrapped = KeyEncryptionKey::try_new(&wrap_metadata, provider.clone())?
            .wrap(data_encryption_key.as_bytes())
            .await?;
        let properties = ClientEncryptionKeyProperties::new(
            key_id,
            AEAD_AES_256_GCM_HMAC_SHA256,
            wrapped,
            wrap_metadata,
        )
        .with_etag(self.next_etag());

        let mut keys = self.keys.write().await;
        if keys.contains_key(&id) {
            return Err(already_exists(database_id, key_id));
        }
        keys.insert(id, StoredKey {
            authoritative: properties.clone(),
            gateway: properties.clone(),
        });
        tracing::debug!(database_id, key_id, "created client encryption key");
        Ok(properties)
    }

    /// Rewraps the data encryption key of a client encryption key with the
    /// key encryption key `wrap_metadata` names.
    ///
    /// Only the authoritative copy changes, so readers keep seeing the old
    /// properties until they force a gateway cache refresh.
    ///
    /// # Errors
    /// Fails when the key doesn't exist, or when the current key encryption
    /// key can't unwrap the data encryption key.
    pub async fn rewrap_client_encryption_key(
        &self,
        database_id: &str,
        key_id: &str,
        wrap_metadata: EncryptionKeyWrapMetadata,
        provider: &Arc<dyn KeyStoreProvider>,
    ) -> Result<ClientEncryptionKeyProperties> {
        let current = self.authoritative(database_id, key_id).await?;

        let unwrapped = KeyEncryptionKey::try_new(
            current.encryption_key_wrap_metadata(),
            provider.clone(),
        )?
        .unwrap(current.wrapped_data_encryption_key())
        .await?;
        let data_encryption_key = SecureKey::new(unwrapped, EncryptionAlgorithm::Aes256Gcm)?;
        let wrapped = KeyEncryptionKey::try_new(&wrap_metadata, provider.clone())?
            .wrap(data_encryption_key.as_bytes())
            .await?;

        let properties = ClientEncryptionKeyProperties::new(
            key_id,
            current.encryption_algorithm(),
            wrapped,
            wrap_metadata,
        )
        .with_etag(self.next_etag());
        self.write_authoritative(database_id, key_id, properties.clone())
            .await?;
        tracing::debug!(database_id, key_id, "rewrapped client encryption key");
        Ok(properties)
    }

    /// Replaces the properties of a key, or adds them, on both the
    /// authoritative and the gateway copy. The etag is assigned here.
    pub async fn upsert_key_properties(
        &self,
        database_id: &str,
        properties: ClientEncryptionKeyProperties,
    ) -> ClientEncryptionKeyProperties {
        let properties = properties.with_etag(self.next_etag());
        self.keys.write().await.insert(
            (database_id.to_string(), properties.id().to_string()),
            StoredKey {
                authoritative: properties.clone(),
                gateway: properties.clone(),
            },
        );
        properties
    }

    /// Number of reads served, failed ones included.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn authoritative(
        &self,
        database_id: &str,
        key_id: &str,
    ) -> Result<ClientEncryptionKeyProperties> {
        self.keys
            .read()
            .await
            .get(&(database_id.to_string(), key_id.to_string()))
            .map(|stored| stored.authoritative.clone())
            .ok_or_else(|| not_found(database_id, key_id))
    }

    async fn write_authoritative(
        &self,
        database_id: &str,
        key_id: &str,
        properties: ClientEncryptionKeyProperties,
    ) -> Result<()> {
        let mut keys = self.keys.write().await;
        let stored = keys
            .get_mut(&(database_id.to_string(), key_id.to_string()))
            .ok_or_else(|| not_found(database_id, key_id))?;
        stored.authoritative = properties;
        Ok(())
    }

    fn next_etag(&self) -> String {
        let sequence = self.etag_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("\"{sequence:08x}\"")
    }
}

#[async_trait::async_trait]
impl KeyPropertiesFetcher for InMemoryControlPlane {
    async fn read_key_properties(
        &self,
        request: &ReadKeyPropertiesRequest,
        cancel: &CancellationToken,
    ) -> Result<ClientEncryptionKeyProperties> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("reading key properties"));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);

        let mut keys = self.keys.write().await;
        let stored = keys
            .get_mut(&(request.database_id.clone(), request.key_id.clone()))
            .ok_or_else(|| not_found(&request.database_id, &request.key_id))?;
        if request.force_refresh_gateway_cache {
            stored.gateway = stored.authoritative.clone();
        }

        let served = &stored.gateway;
        if request.if_none_match.is_some() && served.etag() == request.if_none_match.as_deref() {
            return Err(Error::new(
                ErrorKind::NotModified,
                "Client encryption key properties have not been modified",
            )
            .with_status_code(StatusCode::NOT_MODIFIED)
            .with_context("key id", request.key_id.clone()));
        }
        Ok(served.clone())
    }
}

fn not_found(database_id: &str, key_id: &str) -> Error {
    Error::new(
        ErrorKind::NotFound,
        format!("Client encryption key {key_id} not found in database {database_id}"),
    )
    .with_status_code(StatusCode::NOT_FOUND)
}

fn already_exists(database_id: &str, key_id: &str) -> Error {
    Error::new(
        ErrorKind::AlreadyExists,
        format!("Client encryption key {key_id} already exists in database {database_id}"),
    )
    .with_status_code(StatusCode::CONFLICT)
}
