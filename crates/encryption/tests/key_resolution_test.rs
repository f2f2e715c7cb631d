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

//! Integration tests for key resolution against the in-memory control plane
//! and key store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use client_encryption::{
    ContainerRef, EncryptionClient, EncryptionClientConfig, EncryptionKeyWrapMetadata,
    EncryptionSetting, EncryptionType, ErrorKind, InMemoryControlPlane, InMemoryKeyStoreProvider,
    KeyPropertiesFetcher, KeyStoreProvider, ReadKeyPropertiesRequest, ResolveOptions, Result,
};
use client_encryption_test_utils::set_up;
use http::StatusCode;
use tokio_util::sync::CancellationToken;

const DATABASE: &str = "sales";

/// Key store that counts unwraps on top of an in-memory one.
#[derive(Debug)]
struct CountingKeyStore {
    inner: InMemoryKeyStoreProvider,
    unwraps: AtomicUsize,
}

impl CountingKeyStore {
    async fn new() -> Self {
        let inner = InMemoryKeyStoreProvider::new();
        inner.add_master_key("kek-1", vec![1u8; 32]).await;
        inner.add_master_key("kek-2", vec![2u8; 32]).await;
        Self {
            inner,
            unwraps: AtomicUsize::new(0),
        }
    }

    fn unwraps(&self) -> usize {
        self.unwraps.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl KeyStoreProvider for CountingKeyStore {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    async fn wrap_key(&self, path: &str, algorithm: &str, key: &[u8]) -> Result<Vec<u8>> {
        self.inner.wrap_key(path, algorithm, key).await
    }

    async fn unwrap_key(&self, path: &str, algorithm: &str, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.unwraps.fetch_add(1, Ordering::SeqCst);
        self.inner.unwrap_key(path, algorithm, wrapped).await
    }
}

fn wrap_metadata(kek: &str) -> EncryptionKeyWrapMetadata {
    EncryptionKeyWrapMetadata::new(
        InMemoryKeyStoreProvider::PROVIDER_NAME,
        kek,
        kek,
        InMemoryKeyStoreProvider::WRAP_ALGORITHM,
    )
}

fn setting(key_id: &str, encryption_type: EncryptionType) -> EncryptionSetting {
    EncryptionSetting::try_new(key_id, encryption_type, ContainerRef::new("orders"), DATABASE)
        .unwrap()
}

struct Environment {
    key_store: Arc<CountingKeyStore>,
    control_plane: Arc<InMemoryControlPlane>,
}

impl Environment {
    async fn new(key_ids: &[&str]) -> Self {
        set_up();
        let key_store = Arc::new(CountingKeyStore::new().await);
        let control_plane = Arc::new(InMemoryControlPlane::new());
        let provider: Arc<dyn KeyStoreProvider> = key_store.clone();
        for key_id in key_ids {
            control_plane
                .create_client_encryption_key(DATABASE, key_id, wrap_metadata("kek-1"), &provider)
                .await
                .unwrap();
        }
        Self {
            key_store,
            control_plane,
        }
    }

    fn provider(&self) -> Arc<dyn KeyStoreProvider> {
        self.key_store.clone()
    }

    fn client(&self) -> EncryptionClient {
        EncryptionClient::new(
            self.control_plane.clone(),
            self.provider(),
            EncryptionClientConfig::default(),
        )
    }
}

#[tokio::test]
async fn test_resolve_and_encrypt() {
    let env = Environment::new(&["cek-1"]).await;
    let client = env.client();
    let cancel = CancellationToken::new();

    let deterministic = client
        .build_encryption_algorithm(&setting("cek-1", EncryptionType::Deterministic), &cancel)
        .await
        .unwrap();
    let randomized = client
        .build_encryption_algorithm(&setting("cek-1", EncryptionType::Randomized), &cancel)
        .await
        .unwrap();

    assert_eq!(deterministic.encryption_type(), EncryptionType::Deterministic);
    assert_eq!(randomized.encryption_type(), EncryptionType::Randomized);
    assert_eq!(
        deterministic.encrypt(b"alice").unwrap(),
        deterministic.encrypt(b"alice").unwrap()
    );
    assert_ne!(
        randomized.encrypt(b"alice").unwrap(),
        randomized.encrypt(b"alice").unwrap()
    );

    // Same key, so either algorithm decrypts the other's output.
    let ciphertext = randomized.encrypt(b"alice").unwrap();
    assert_eq!(deterministic.decrypt(&ciphertext).unwrap(), b"alice");

    assert_eq!(env.control_plane.read_count(), 1);
    assert_eq!(env.key_store.unwraps(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolutions_unwrap_once() {
    let env = Environment::new(&["cek-1"]).await;
    let client = Arc::new(env.client());

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let client = client.clone();
            let encryption_type = if i % 2 == 0 {
                EncryptionType::Deterministic
            } else {
                EncryptionType::Randomized
            };
            tokio::spawn(async move {
                client
                    .build_encryption_algorithm(
                        &setting("cek-1", encryption_type),
                        &CancellationToken::new(),
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(env.key_store.unwraps(), 1);
}

#[tokio::test]
async fn test_rotated_key_encryption_key_is_picked_up() {
    let env = Environment::new(&["cek-1"]).await;
    let cancel = CancellationToken::new();
    let before = env
        .client()
        .build_encryption_algorithm(&setting("cek-1", EncryptionType::Deterministic), &cancel)
        .await
        .unwrap();
    let ciphertext = before.encrypt(b"alice").unwrap();

    env.control_plane
        .rewrap_client_encryption_key(DATABASE, "cek-1", wrap_metadata("kek-2"), &env.provider())
        .await
        .unwrap();
    env.key_store.inner.revoke_master_key("kek-1").await;

    // A fresh client reads the stale gateway copy, is denied, refreshes its
    // local cache, is denied again, then forces a gateway refresh.
    let reads_before = env.control_plane.read_count();
    let after = env
        .client()
        .build_encryption_algorithm(&setting("cek-1", EncryptionType::Deterministic), &cancel)
        .await
        .unwrap();

    assert_eq!(env.control_plane.read_count() - reads_before, 3);
    assert_eq!(
        after
            .data_encryption_key()
            .key_encryption_key()
            .name(),
        "kek-2"
    );
    assert_eq!(after.encrypt(b"alice").unwrap(), ciphertext);
}

#[tokio::test]
async fn test_revoked_key_without_rewrap_requires_rewrap() {
    let env = Environment::new(&["cek-1"]).await;
    env.key_store.inner.revoke_master_key("kek-1").await;

    let err = env
        .client()
        .build_encryption_algorithm(
            &setting("cek-1", EncryptionType::Randomized),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::KeyRewrapRequired);
    assert_eq!(err.status_code(), Some(StatusCode::BAD_REQUEST));
    assert!(!err.retryable());
    assert!(err.message().contains("cek-1"));
    assert!(err.message().contains(DATABASE));
    assert_eq!(env.control_plane.read_count(), 3);
}

#[tokio::test]
async fn test_forced_refresh_with_current_etag_requires_rewrap() {
    let env = Environment::new(&["cek-1"]).await;
    let client = env.client();
    let cancel = CancellationToken::new();
    client
        .build_encryption_algorithm(&setting("cek-1", EncryptionType::Randomized), &cancel)
        .await
        .unwrap();
    let current = env
        .control_plane
        .read_key_properties(
            &ReadKeyPropertiesRequest {
                key_id: "cek-1".to_string(),
                container: ContainerRef::new("orders"),
                database_id: DATABASE.to_string(),
                if_none_match: None,
                force_refresh_gateway_cache: false,
            },
            &cancel,
        )
        .await
        .unwrap();
    let etag = current.etag().unwrap().to_string();

    let options = ResolveOptions::builder()
        .etag_hint(etag)
        .force_refresh(true)
        .force_refresh_gateway_cache(true)
        .build();
    let err = client
        .resolve_algorithm(&setting("cek-1", EncryptionType::Randomized), &options, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::KeyRewrapRequired);
}

#[tokio::test]
async fn test_cancelled_resolution_leaves_client_usable() {
    let env = Environment::new(&["cek-1"]).await;
    let client = env.client();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = client
        .build_encryption_algorithm(&setting("cek-1", EncryptionType::Randomized), &cancelled)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    assert!(
        client
            .build_encryption_algorithm(
                &setting("cek-1", EncryptionType::Randomized),
                &CancellationToken::new(),
            )
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_clients_share_nothing() {
    let env = Environment::new(&["cek-1"]).await;
    let cancel = CancellationToken::new();

    for client in [env.client(), env.client()] {
        client
            .build_encryption_algorithm(&setting("cek-1", EncryptionType::Deterministic), &cancel)
            .await
            .unwrap();
    }

    assert_eq!(env.key_store.unwraps(), 2);
    assert_eq!(env.control_plane.read_count(), 2);
}
