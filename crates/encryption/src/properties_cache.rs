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

//! Client-side cache of client encryption key properties in front of the
//! control plane.

use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::TtlCache;
use crate::key_properties::ClientEncryptionKeyProperties;
use crate::setting::ContainerRef;
use crate::Result;

/// A conditional read of client encryption key properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadKeyPropertiesRequest {
    /// Id of the client encryption key.
    pub key_id: String,
    /// Container on whose behalf the read happens.
    pub container: ContainerRef,
    /// Id of the database holding the key.
    pub database_id: String,
    /// Etag the caller already has. The control plane answers
    /// [`crate::ErrorKind::NotModified`] when it is still current.
    pub if_none_match: Option<String>,
    /// Ask the control plane to bypass its gateway cache.
    pub force_refresh_gateway_cache: bool,
}

/// Reads client encryption key properties from the control plane.
#[async_trait::async_trait]
pub trait KeyPropertiesFetcher: Send + Sync + Debug {
    /// Reads the properties named by `request`.
    ///
    /// Implementations fail with [`crate::ErrorKind::NotModified`] (status
    /// 304) when `if_none_match` equals the current etag, and with an error
    /// carrying the remote status code on any other failure. `cancel` must be
    /// honored while the read is in flight.
    async fn read_key_properties(
        &self,
        request: &ReadKeyPropertiesRequest,
        cancel: &CancellationToken,
    ) -> Result<ClientEncryptionKeyProperties>;
}

/// Caches key properties by `(database id, key id)`.
#[derive(Debug)]
pub struct KeyPropertiesCache {
    fetcher: Arc<dyn KeyPropertiesFetcher>,
    cache: TtlCache<(String, String), Arc<ClientEncryptionKeyProperties>>,
}

impl KeyPropertiesCache {
    /// Creates a cache in front of `fetcher`.
    pub fn new(
        fetcher: Arc<dyn KeyPropertiesFetcher>,
        ttl: Duration,
        capacity: NonZeroUsize,
    ) -> Self {
        Self {
            fetcher,
            cache: TtlCache::with_capacity(ttl, capacity),
        }
    }

    /// Returns the properties of a client encryption key.
    ///
    /// The cached entry is used unless either refresh flag is set. Otherwise
    /// the control plane is read with `etag_hint` as `If-None-Match`, and a
    /// successful answer replaces the cached entry. Failures are not cached.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_key_properties(
        &self,
        key_id: &str,
        container: &ContainerRef,
        database_id: &str,
        etag_hint: Option<&str>,
        force_refresh_local_cache: bool,
        force_refresh_gateway_cache: bool,
        cancel: &CancellationToken,
    ) -> Result<Arc<ClientEncryptionKeyProperties>> {
        let cache_key = (database_id.to_string(), key_id.to_string());

        if !force_refresh_local_cache && !force_refresh_gateway_cache {
            if let Some(cached) = self.cache.get(&cache_key).await {
                return Ok(cached);
            }
        }

        let request = ReadKeyPropertiesRequest {
            key_id: key_id.to_string(),
            container: container.clone(),
            database_id: database_id.to_string(),
            if_none_match: etag_hint.map(str::to_string),
            force_refresh_gateway_cache,
        };
        tracing::debug!(
            key_id,
            database_id,
            etag_hint,
            force_refresh_local_cache,
            force_refresh_gateway_cache,
            "reading client encryption key properties"
        );

        let properties = Arc::new(
            self.fetcher
                .read_key_properties(&request, cancel)
                .await
                .map_err(|e| {
                    e.with_context("key id", key_id.to_string())
                        .with_context("database", database_id.to_string())
                })?,
        );
        self.cache.insert(cache_key, properties.clone()).await;
        Ok(properties)
    }

    /// Drops the cached properties of one key.
    pub async fn invalidate(&self, database_id: &str, key_id: &str) {
        self.cache
            .remove(&(database_id.to_string(), key_id.to_string()))
            .await;
    }

    /// Removes expired entries.
    pub async fn evict_expired(&self) {
        self.cache.evict_expired().await;
    }

    /// Removes all entries.
    pub async fn clear(&self) {
        self.cache.clear().await;
    }
}
