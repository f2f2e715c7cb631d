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

//! Serialized unwrapping of data encryption keys.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::cache::TtlCache;
use crate::key_properties::{ClientEncryptionKeyProperties, EncryptionKeyWrapMetadata};
use crate::key_store::KeyStoreProvider;
use crate::keys::{KeyEncryptionKey, ProtectedDataEncryptionKey};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyEncryptionKeyId {
    provider: String,
    name: String,
    path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DataEncryptionKeyId {
    key_id: String,
    key_encryption_key: KeyEncryptionKeyId,
    encrypted_value: Vec<u8>,
}

/// Get-or-create caches of key encryption keys and unwrapped data encryption
/// keys, guarded by one lock for the whole client.
///
/// Every unwrap goes to a key store, usually a remote KMS. Holding a single
/// lock while consulting and populating the caches means concurrent callers
/// never unwrap the same key twice, and at most one unwrap is in flight per
/// client, whatever the key id.
#[derive(Debug)]
pub struct KeyUnwrapCache {
    unwrap_lock: Semaphore,
    key_encryption_keys: TtlCache<KeyEncryptionKeyId, Arc<KeyEncryptionKey>>,
    data_encryption_keys: TtlCache<DataEncryptionKeyId, Arc<ProtectedDataEncryptionKey>>,
}

impl KeyUnwrapCache {
    /// Creates empty caches whose entries live for `ttl`.
    pub fn new(ttl: Duration, capacity: NonZeroUsize) -> Self {
        Self {
            unwrap_lock: Semaphore::new(1),
            key_encryption_keys: TtlCache::with_capacity(ttl, capacity),
            data_encryption_keys: TtlCache::with_capacity(ttl, capacity),
        }
    }

    /// Returns the unwrapped data encryption key described by `properties`,
    /// unwrapping it through `provider` on a cache miss.
    ///
    /// The lock is released on every exit path, cancellation included.
    pub async fn unwrap(
        &self,
        properties: &ClientEncryptionKeyProperties,
        provider: &Arc<dyn KeyStoreProvider>,
        key_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<ProtectedDataEncryptionKey>> {
        let _permit = self.acquire(cancel).await?;

        let key_encryption_key = self
            .key_encryption_key(properties.encryption_key_wrap_metadata(), provider)
            .await?;

        let cache_key = DataEncryptionKeyId {
            key_id: key_id.to_string(),
            key_encryption_key: KeyEncryptionKeyId::from_metadata(
                properties.encryption_key_wrap_metadata(),
            ),
            encrypted_value: properties.wrapped_data_encryption_key().to_vec(),
        };
        if let Some(cached) = self.data_encryption_keys.get(&cache_key).await {
            if cached.key_encryption_key().uses_provider(provider) {
                return Ok(cached);
            }
        }

        tracing::debug!(
            key_id,
            key_encryption_key = key_encryption_key.name(),
            "unwrapping data encryption key"
        );
        let unwrapped = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::cancelled("unwrapping data encryption key"));
            }
            unwrapped = key_encryption_key.unwrap(properties.wrapped_data_encryption_key()) => {
                unwrapped.map_err(|e| e.with_context("key id", key_id.to_string()))?
            }
        };

        let data_encryption_key = Arc::new(ProtectedDataEncryptionKey::try_new(
            key_id,
            key_encryption_key,
            cache_key.encrypted_value.clone(),
            unwrapped,
        )?);
        self.data_encryption_keys
            .insert(cache_key, data_encryption_key.clone())
            .await;
        Ok(data_encryption_key)
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<SemaphorePermit<'_>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled("waiting for the key unwrap lock")),
            permit = self.unwrap_lock.acquire() => Ok(permit?),
        }
    }

    async fn key_encryption_key(
        &self,
        metadata: &EncryptionKeyWrapMetadata,
        provider: &Arc<dyn KeyStoreProvider>,
    ) -> Result<Arc<KeyEncryptionKey>> {
        let id = KeyEncryptionKeyId::from_metadata(metadata);
        // Entries are keyed by metadata only; a provider swapped in by the
        // caller replaces the cached key.
        if let Some(cached) = self.key_encryption_keys.get(&id).await {
            if cached.uses_provider(provider) {
                return Ok(cached);
            }
        }

        let key_encryption_key = Arc::new(KeyEncryptionKey::try_new(metadata, provider.clone())?);
        self.key_encryption_keys
            .insert(id, key_encryption_key.clone())
            .await;
        Ok(key_encryption_key)
    }

    /// Removes expired entries.
    pub async fn evict_expired(&self) {
        self.key_encryption_keys.evict_expired().await;
        self.data_encryption_keys.evict_expired().await;
    }

    /// Removes all entries.
    pub async fn clear(&self) {
        self.key_encryption_keys.clear().await;
        self.data_encryption_keys.clear().await;
    }

    /// Number of cached data encryption keys, expired ones included.
    pub async fn cached_data_encryption_keys(&self) -> usize {
        self.data_encryption_keys.len().await
    }

    /// Closes the lock and drops all cached keys. Later unwraps fail.
    pub async fn shutdown(&self) {
        self.unwrap_lock.close();
        self.clear().await;
    }
}

impl KeyEncryptionKeyId {
    fn from_metadata(metadata: &EncryptionKeyWrapMetadata) -> Self {
        Self {
            provider: metadata.r#type.clone(),
            name: metadata.name.clone(),
            path: metadata.value.clone(),
        }
    }
}
