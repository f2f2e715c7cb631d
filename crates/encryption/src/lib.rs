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

//! Client-side encryption key resolution.
//!
//! Turns an [`EncryptionSetting`] (a client encryption key id plus an
//! encryption type) into a ready-to-use [`DataEncryptionAlgorithm`]. Key
//! properties come from the control plane through a [`KeyPropertiesFetcher`],
//! wrapped data encryption keys are unwrapped by a [`KeyStoreProvider`], and
//! both results are cached by the [`EncryptionClient`].
//!
//! # Examples
//!
//! ## Resolve A Setting
//!
//! ```rust, no_run
//! use std::sync::Arc;
//!
//! use client_encryption::{
//!     ContainerRef, EncryptionClient, EncryptionClientConfig, EncryptionKeyWrapMetadata,
//!     EncryptionSetting, EncryptionType, InMemoryControlPlane, InMemoryKeyStoreProvider,
//!     KeyStoreProvider, Result,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Key store holding the master key.
//!     let provider: Arc<dyn KeyStoreProvider> = Arc::new(
//!         InMemoryKeyStoreProvider::new_with_master_key("kek-1", vec![7u8; 32]),
//!     );
//!     // Control plane holding the wrapped data encryption key.
//!     let control_plane = Arc::new(InMemoryControlPlane::new());
//!     control_plane
//!         .create_client_encryption_key(
//!             "sales",
//!             "cek-1",
//!             EncryptionKeyWrapMetadata::new("IN_MEMORY", "kek-1", "kek-1", "AES-GCM"),
//!             &provider,
//!         )
//!         .await?;
//!
//!     let client =
//!         EncryptionClient::new(control_plane, provider, EncryptionClientConfig::default());
//!     let setting = EncryptionSetting::try_new(
//!         "cek-1",
//!         EncryptionType::Deterministic,
//!         ContainerRef::new("orders"),
//!         "sales",
//!     )?;
//!     let algorithm = client
//!         .build_encryption_algorithm(&setting, &CancellationToken::new())
//!         .await?;
//!
//!     let ciphertext = algorithm.encrypt(b"4111 1111 1111 1111")?;
//!     assert_eq!(algorithm.decrypt(&ciphertext)?, b"4111 1111 1111 1111");
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

mod error;
pub use error::{Error, ErrorKind, Result};

mod algorithm;
mod cache;
mod client;
pub mod config;
mod control_plane;
mod crypto;
mod key_properties;
mod key_store;
mod keys;
mod properties_cache;
mod resolver;
mod setting;
mod unwrap_cache;

pub use algorithm::{AEAD_AES_256_GCM_HMAC_SHA256, DataEncryptionAlgorithm};
pub use cache::{DEFAULT_CACHE_CAPACITY, TtlCache};
pub use client::EncryptionClient;
pub use config::EncryptionClientConfig;
pub use control_plane::InMemoryControlPlane;
pub use crypto::{AesGcmEncryptor, EncryptionAlgorithm, SecureKey};
pub use key_properties::{ClientEncryptionKeyProperties, EncryptionKeyWrapMetadata};
pub use key_store::{InMemoryKeyStoreProvider, KeyStoreProvider};
pub use keys::{KeyEncryptionKey, ProtectedDataEncryptionKey};
pub use properties_cache::{KeyPropertiesCache, KeyPropertiesFetcher, ReadKeyPropertiesRequest};
pub use resolver::{KeyResolver, ResolveOptions};
pub use setting::{ContainerRef, EncryptionSetting, EncryptionType};
pub use unwrap_cache::KeyUnwrapCache;
