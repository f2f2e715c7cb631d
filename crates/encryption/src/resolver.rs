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

//! Resolution of encryption settings into data encryption algorithms.
//!
//! Resolution reads the key properties, then unwraps the data encryption key
//! they carry. An unwrap that is denied usually means the key encryption key
//! was rotated and the cached properties are stale, so the resolver escalates:
//! first it refreshes the local cache, then it asks the control plane to
//! refresh its gateway cache, conditioned on the etag it last saw. If the
//! gateway answers "not modified", nobody has rewrapped the key and retrying
//! can't help.

use std::sync::Arc;

use http::StatusCode;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::algorithm::{AEAD_AES_256_GCM_HMAC_SHA256, DataEncryptionAlgorithm};
use crate::key_properties::ClientEncryptionKeyProperties;
use crate::key_store::KeyStoreProvider;
use crate::keys::ProtectedDataEncryptionKey;
use crate::properties_cache::KeyPropertiesCache;
use crate::setting::EncryptionSetting;
use crate::unwrap_cache::KeyUnwrapCache;
use crate::{Error, ErrorKind, Result};

/// How a resolution reads key properties on its first attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct ResolveOptions {
    /// Etag of properties the caller already holds, sent as `If-None-Match`.
    #[builder(default, setter(strip_option, into))]
    pub etag_hint: Option<String>,
    /// Skip the local key properties cache.
    #[builder(default)]
    pub force_refresh: bool,
    /// Ask the control plane to skip its gateway cache.
    #[builder(default)]
    pub force_refresh_gateway_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Initial,
    LocalCacheRefreshed,
    GatewayCacheRefreshed,
}

#[derive(Debug)]
struct Attempt {
    stage: Stage,
    etag_hint: Option<String>,
    force_refresh: bool,
    force_refresh_gateway_cache: bool,
}

impl Attempt {
    fn first(options: &ResolveOptions) -> Self {
        let stage = if options.force_refresh_gateway_cache {
            Stage::GatewayCacheRefreshed
        } else if options.force_refresh {
            Stage::LocalCacheRefreshed
        } else {
            Stage::Initial
        };

        Self {
            stage,
            etag_hint: options.etag_hint.clone(),
            force_refresh: options.force_refresh,
            force_refresh_gateway_cache: options.force_refresh_gateway_cache,
        }
    }

    /// The attempt to make after `failed` could not be unwrapped, if any is
    /// left.
    fn escalate(&self, failed: &ClientEncryptionKeyProperties) -> Option<Self> {
        match self.stage {
            Stage::Initial => Some(Self {
                stage: Stage::LocalCacheRefreshed,
                etag_hint: None,
                force_refresh: true,
                force_refresh_gateway_cache: false,
            }),
            Stage::LocalCacheRefreshed => Some(Self {
                stage: Stage::GatewayCacheRefreshed,
                etag_hint: failed.etag().map(str::to_string),
                force_refresh: true,
                force_refresh_gateway_cache: true,
            }),
            Stage::GatewayCacheRefreshed => None,
        }
    }
}

/// Resolves encryption settings through the key properties cache and the key
/// unwrap cache.
#[derive(Debug)]
pub struct KeyResolver {
    properties_cache: Arc<KeyPropertiesCache>,
    unwrap_cache: Arc<KeyUnwrapCache>,
    key_store_provider: Arc<dyn KeyStoreProvider>,
}

impl KeyResolver {
    /// Creates a resolver.
    pub fn new(
        properties_cache: Arc<KeyPropertiesCache>,
        unwrap_cache: Arc<KeyUnwrapCache>,
        key_store_provider: Arc<dyn KeyStoreProvider>,
    ) -> Self {
        Self {
            properties_cache,
            unwrap_cache,
            key_store_provider,
        }
    }

    /// Builds a new algorithm for `setting`.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::KeyRewrapRequired`] when the key is wrapped with a
    ///   revoked key encryption key and the control plane has nothing newer.
    /// - [`ErrorKind::Forbidden`] when access is still denied after every
    ///   refresh.
    /// - Any other failure of the control plane or the key store, unchanged.
    pub async fn resolve_algorithm(
        &self,
        setting: &EncryptionSetting,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> Result<DataEncryptionAlgorithm> {
        let key = self
            .resolve_data_encryption_key(setting, options, cancel)
            .await?;
        DataEncryptionAlgorithm::new(key, setting.encryption_type())
    }

    /// Resolves the unwrapped data encryption key of `setting`.
    pub async fn resolve_data_encryption_key(
        &self,
        setting: &EncryptionSetting,
        options: &ResolveOptions,
        cancel: &CancellationToken,
    ) -> Result<Arc<ProtectedDataEncryptionKey>> {
        let key_id = setting.client_encryption_key_id();
        let database_id = setting.database_id();
        let mut attempt = Attempt::first(options);
        let mut last_access_denied: Option<Error> = None;

        loop {
            tracing::debug!(
                key_id,
                database_id,
                stage = ?attempt.stage,
                etag_hint = attempt.etag_hint.as_deref(),
                "resolving client encryption key"
            );

            let properties = match self
                .properties_cache
                .get_key_properties(
                    key_id,
                    setting.container(),
                    database_id,
                    attempt.etag_hint.as_deref(),
                    attempt.force_refresh,
                    attempt.force_refresh_gateway_cache,
                    cancel,
                )
                .await
            {
                Ok(properties) => properties,
                Err(e) if e.is_not_modified() && attempt.force_refresh_gateway_cache => {
                    return Err(rewrap_required(
                        key_id,
                        database_id,
                        last_access_denied.as_ref(),
                        e,
                    ));
                }
                Err(e) => return Err(e),
            };
            check_encryption_algorithm(&properties)?;

            let denied = match self
                .unwrap_cache
                .unwrap(&properties, &self.key_store_provider, key_id, cancel)
                .await
            {
                Ok(key) => return Ok(key),
                Err(e) if e.is_key_access_denied() => e,
                Err(e) => return Err(e),
            };

            if properties.etag() == attempt.etag_hint.as_deref() {
                tracing::debug!(
                    key_id,
                    database_id,
                    "key properties unchanged since the last denied unwrap"
                );
                return Err(denied);
            }
            let Some(next) = attempt.escalate(&properties) else {
                return Err(denied);
            };

            tracing::warn!(
                key_id,
                database_id,
                from = ?attempt.stage,
                to = ?next.stage,
                error = %denied,
                "access to the key encryption key was denied, refreshing key properties"
            );
            last_access_denied = Some(denied);
            attempt = next;
        }
    }
}

fn check_encryption_algorithm(properties: &ClientEncryptionKeyProperties) -> Result<()> {
    if properties.encryption_algorithm() != AEAD_AES_256_GCM_HMAC_SHA256 {
        return Err(Error::new(
            ErrorKind::FeatureUnsupported,
            format!(
                "Encryption algorithm {} is not supported",
                properties.encryption_algorithm()
            ),
        )
        .with_context("key id", properties.id().to_string()));
    }
    Ok(())
}

fn rewrap_required(
    key_id: &str,
    database_id: &str,
    last_access_denied: Option<&Error>,
    not_modified: Error,
) -> Error {
    let mut message = format!(
        "The client encryption key {key_id} in database {database_id} is wrapped with a key \
         encryption key that can no longer be accessed, and the control plane has no newer \
         version of it. Rewrap the client encryption key with a valid key encryption key."
    );
    if let Some(denied) = last_access_denied {
        message.push_str(&format!(" Last access failure: {}", denied.message()));
    }

    Error::new(ErrorKind::KeyRewrapRequired, message)
        .with_status_code(StatusCode::BAD_REQUEST)
        .with_retryable(false)
        .with_context("key id", key_id.to_string())
        .with_context("database", database_id.to_string())
        .with_source(not_modified)
}
