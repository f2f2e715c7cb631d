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

//! The encryption client: the owner of the key caches and the unwrap lock.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::algorithm::DataEncryptionAlgorithm;
use crate::config::EncryptionClientConfig;
use crate::key_store::KeyStoreProvider;
use crate::properties_cache::{KeyPropertiesCache, KeyPropertiesFetcher};
use crate::resolver::{KeyResolver, ResolveOptions};
use crate::setting::EncryptionSetting;
use crate::unwrap_cache::KeyUnwrapCache;
use crate::Result;

/// Builds data encryption algorithms for encryption settings.
///
/// Each client owns its own caches and its own unwrap lock. Two clients in
/// the same process share nothing.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use client_encryption::{
///     ContainerRef, EncryptionClient, EncryptionClientConfig, EncryptionSetting,
///     EncryptionType, InMemoryControlPlane, InMemoryKeyStoreProvider,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> client_encryption::Result<()> {
/// let client = EncryptionClient::new(
///     Arc::new(InMemoryControlPlane::new()),
///     Arc::new(InMemoryKeyStoreProvider::new()),
///     EncryptionClientConfig::default(),
/// );
///
/// let setting = EncryptionSetting::try_new(
///     "cek-1",
///     EncryptionType::Deterministic,
///     ContainerRef::new("orders"),
///     "sales",
/// )?;
/// let algorithm = client
///     .build_encryption_algorithm(&setting, &CancellationToken::new())
///     .await?;
/// let ciphertext = algorithm.encrypt(b"4111 1111 1111 1111")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EncryptionClient {
    resolver: KeyResolver,
    properties_cache: Arc<KeyPropertiesCache>,
    unwrap_cache: Arc<KeyUnwrapCache>,
    config: EncryptionClientConfig,
}

impl EncryptionClient {
    /// Creates a client reading key properties through `fetcher` and
    /// unwrapping keys through `key_store_provider`.
    pub fn new(
        fetcher: Arc<dyn KeyPropertiesFetcher>,
        key_store_provider: Arc<dyn KeyStoreProvider>,
        config: EncryptionClientConfig,
    ) -> Self {
        let properties_cache = Arc::new(KeyPropertiesCache::new(
            fetcher,
            config.key_properties_cache_ttl,
            config.key_properties_cache_capacity,
        ));
        let unwrap_cache = Arc::new(KeyUnwrapCache::new(
            config.protected_key_cache_ttl,
            config.protected_key_cache_capacity,
        ));
        let resolver = KeyResolver::new(
            properties_cache.clone(),
            unwrap_cache.clone(),
            key_store_provider,
        );

        Self {
            resolver,
            properties_cache,
            unwrap_cache,
            config,
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &EncryptionClientConfig {
        &self.config
    }

    /// Builds a new algorithm for `setting`, reading key properties from the
    /// local cache when they're there.
    pub async fn build_encryption_algorithm(
        &self,
        setting: &EncryptionSetting,
        cancel: &CancellationToken,
    ) -> Result<DataEncryptionAlgorithm> {
        self.resolve_algorithm(setting, &ResolveOptions::default(), cancel)
            .await
    }

    /// Builds a new algorithm for `setting` with explicit refresh options.
    pub async fn resolve_algorithm(
        &self,
        setting: &EncryptionSetting,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> Result<DataEncryptionAlgorithm> {
        self.resolver
            .resolve_algorithm(setting, options, cancel)
            .await
    }

    /// Builds algorithms for many settings, at most `resolve_concurrency` at
    /// a time. Results are in the order of `settings`; the first failure
    /// fails the whole call.
    pub async fn build_encryption_algorithms(
        &self,
        settings: &[EncryptionSetting],
        cancel: &CancellationToken,
    ) -> Result<Vec<DataEncryptionAlgorithm>> {
        stream::iter(settings)
            .map(|setting| self.build_encryption_algorithm(setting, cancel))
            .buffered(self.config.resolve_concurrency.max(1))
            .try_collect()
            .await
    }

    /// Removes expired entries from every cache.
    ///
    /// Expired entries are never served, so this only reclaims memory. It
    /// should be called periodically by long-lived clients.
    pub async fn evict_expired(&self) {
        self.properties_cache.evict_expired().await;
        self.unwrap_cache.evict_expired().await;
    }

    /// Drops every cached key property and key.
    pub async fn clear_caches(&self) {
        self.properties_cache.clear().await;
        self.unwrap_cache.clear().await;
    }

    /// Closes the unwrap lock and drops every cache. Later resolutions that
    /// need an unwrap fail.
    pub async fn shutdown(&self) {
        tracing::debug!("shutting down encryption client");
        self.properties_cache.clear().await;
        self.unwrap_cache.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use super::*;
    use crate::control_plane::InMemoryControlPlane;
    use crate::key_properties::EncryptionKeyWrapMetadata;
    use crate::key_store::InMemoryKeyStoreProvider;
    use crate::setting::{ContainerRef, EncryptionType};
    use crate::ErrorKind;

    async fn client_with_keys(
        config: EncryptionClientConfig,
        key_ids: &[&str],
    ) -> (EncryptionClient, Arc<InMemoryControlPlane>) {
        let provider: Arc<dyn KeyStoreProvider> =
            Arc::new(InMemoryKeyStoreProvider::new_with_master_key("kek-1", vec![3u8; 32]));
        let control_plane = Arc::new(InMemoryControlPlane::new());
        for key_id in key_ids {
            control_plane
                .create_client_encryption_key(
                    "sales",
                    key_id,
                    EncryptionKeyWrapMetadata::new(
                        InMemoryKeyStoreProvider::PROVIDER_NAME,
                        "kek-1",
                        "kek-1",
                        InMemoryKeyStoreProvider::WRAP_ALGORITHM,
                    ),
                    &provider,
                )
                .await
                .unwrap();
        }
        (
            EncryptionClient::new(control_plane.clone(), provider, config),
            control_plane,
        )
    }

    fn setting(key_id: &str, encryption_type: EncryptionType) -> EncryptionSetting {
        EncryptionSetting::try_new(key_id, encryption_type, ContainerRef::new("orders"), "sales")
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_encryption_algorithm() {
        let (client, _) = client_with_keys(EncryptionClientConfig::default(), &["cek-1"]).await;

        let algorithm = client
            .build_encryption_algorithm(
                &setting("cek-1", EncryptionType::Randomized),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(algorithm.encryption_type(), EncryptionType::Randomized);
        let ciphertext = algorithm.encrypt(b"secret").unwrap();
        assert_eq!(algorithm.decrypt(&ciphertext).unwrap(), b"secret");
    }

    #[tokio::test]
    async fn test_bulk_resolution_keeps_order() {
        let config = EncryptionClientConfig::builder()
            .resolve_concurrency(2)
            .build();
        let (client, _) = client_with_keys(config, &["cek-1", "cek-2", "cek-3"]).await;
        let settings = vec![
            setting("cek-3", EncryptionType::Deterministic),
            setting("cek-1", EncryptionType::Randomized),
            setting("cek-2", EncryptionType::Deterministic),
        ];

        let algorithms = client
            .build_encryption_algorithms(&settings, &CancellationToken::new())
            .await
            .unwrap();

        let resolved: Vec<_> = algorithms
            .iter()
            .map(|a| (a.key_id().to_string(), a.encryption_type()))
            .collect();
        assert_eq!(resolved, vec![
            ("cek-3".to_string(), EncryptionType::Deterministic),
            ("cek-1".to_string(), EncryptionType::Randomized),
            ("cek-2".to_string(), EncryptionType::Deterministic),
        ]);
    }

    #[tokio::test]
    async fn test_bulk_resolution_fails_on_missing_key() {
        let (client, _) = client_with_keys(EncryptionClientConfig::default(), &["cek-1"]).await;
        let settings = vec![
            setting("cek-1", EncryptionType::Deterministic),
            setting("missing", EncryptionType::Deterministic),
        ];

        let err = client
            .build_encryption_algorithms(&settings, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_clear_caches_reads_again() {
        let (client, control_plane) =
            client_with_keys(EncryptionClientConfig::default(), &["cek-1"]).await;
        let setting = setting("cek-1", EncryptionType::Deterministic);
        let cancel = CancellationToken::new();

        client.build_encryption_algorithm(&setting, &cancel).await.unwrap();
        client.build_encryption_algorithm(&setting, &cancel).await.unwrap();
        assert_eq!(control_plane.read_count(), 1);

        client.clear_caches().await;
        client.build_encryption_algorithm(&setting, &cancel).await.unwrap();
        assert_eq!(control_plane.read_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_properties_are_read_again() {
        let config = EncryptionClientConfig::builder()
            .key_properties_cache_ttl(Duration::from_millis(10))
            .key_properties_cache_capacity(NonZeroUsize::new(4).unwrap())
            .build();
        let (client, control_plane) = client_with_keys(config, &["cek-1"]).await;
        let setting = setting("cek-1", EncryptionType::Deterministic);
        let cancel = CancellationToken::new();

        client.build_encryption_algorithm(&setting, &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        client.evict_expired().await;
        client.build_encryption_algorithm(&setting, &cancel).await.unwrap();

        assert_eq!(control_plane.read_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_fails_later_resolutions() {
        let (client, _) = client_with_keys(EncryptionClientConfig::default(), &["cek-1"]).await;
        client.shutdown().await;

        let err = client
            .build_encryption_algorithm(
                &setting("cek-1", EncryptionType::Deterministic),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }
}
