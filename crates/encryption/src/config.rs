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

//! Encryption client configuration.
//!
//! The configuration can be built with [`EncryptionClientConfig::builder`] or
//! parsed from string properties keyed by the constants below.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::{Error, ErrorKind, Result};

/// Time to live of cached key properties, in milliseconds.
pub const KEY_PROPERTIES_CACHE_TTL_MS: &str = "key-properties-cache.ttl-ms";
/// Maximum number of cached key properties.
pub const KEY_PROPERTIES_CACHE_CAPACITY: &str = "key-properties-cache.capacity";
/// Time to live of cached key encryption keys and unwrapped data encryption
/// keys, in milliseconds.
pub const PROTECTED_KEY_CACHE_TTL_MS: &str = "protected-key-cache.ttl-ms";
/// Maximum number of cached unwrapped data encryption keys.
pub const PROTECTED_KEY_CACHE_CAPACITY: &str = "protected-key-cache.capacity";
/// Maximum number of settings resolved concurrently by bulk resolution.
pub const RESOLVE_CONCURRENCY: &str = "resolve.concurrency";

const DEFAULT_KEY_PROPERTIES_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_PROTECTED_KEY_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const DEFAULT_RESOLVE_CONCURRENCY: usize = 10;

/// Configuration of an [`crate::EncryptionClient`].
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct EncryptionClientConfig {
    /// Time to live of cached key properties.
    #[builder(default = DEFAULT_KEY_PROPERTIES_CACHE_TTL)]
    pub key_properties_cache_ttl: Duration,
    /// Maximum number of cached key properties.
    #[builder(default = DEFAULT_CACHE_CAPACITY)]
    pub key_properties_cache_capacity: NonZeroUsize,
    /// Time to live of cached key encryption keys and unwrapped data
    /// encryption keys.
    #[builder(default = DEFAULT_PROTECTED_KEY_CACHE_TTL)]
    pub protected_key_cache_ttl: Duration,
    /// Maximum number of cached unwrapped data encryption keys.
    #[builder(default = DEFAULT_CACHE_CAPACITY)]
    pub protected_key_cache_capacity: NonZeroUsize,
    /// Maximum number of settings resolved concurrently by bulk resolution.
    #[builder(default = DEFAULT_RESOLVE_CONCURRENCY)]
    pub resolve_concurrency: usize,
}

impl Default for EncryptionClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EncryptionClientConfig {
    /// Parses configuration from properties. Unknown keys are ignored, and
    /// missing keys take their default.
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(ttl) = props.get(KEY_PROPERTIES_CACHE_TTL_MS) {
            cfg.key_properties_cache_ttl = parse_millis(KEY_PROPERTIES_CACHE_TTL_MS, ttl)?;
        }
        if let Some(capacity) = props.get(KEY_PROPERTIES_CACHE_CAPACITY) {
            cfg.key_properties_cache_capacity =
                parse_capacity(KEY_PROPERTIES_CACHE_CAPACITY, capacity)?;
        }
        if let Some(ttl) = props.get(PROTECTED_KEY_CACHE_TTL_MS) {
            cfg.protected_key_cache_ttl = parse_millis(PROTECTED_KEY_CACHE_TTL_MS, ttl)?;
        }
        if let Some(capacity) = props.get(PROTECTED_KEY_CACHE_CAPACITY) {
            cfg.protected_key_cache_capacity =
                parse_capacity(PROTECTED_KEY_CACHE_CAPACITY, capacity)?;
        }
        if let Some(concurrency) = props.get(RESOLVE_CONCURRENCY) {
            cfg.resolve_concurrency = parse_capacity(RESOLVE_CONCURRENCY, concurrency)?.get();
        }

        Ok(cfg)
    }
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration> {
    let millis = value
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::from(e).with_context("property", key))?;
    Ok(Duration::from_millis(millis))
}

fn parse_capacity(key: &'static str, value: &str) -> Result<NonZeroUsize> {
    let parsed = value
        .trim()
        .parse::<usize>()
        .map_err(|e| Error::from(e).with_context("property", key))?;
    NonZeroUsize::new(parsed).ok_or_else(|| {
        Error::new(
            ErrorKind::DataInvalid,
            format!("Invalid {key}: {value}. Expected a positive integer"),
        )
    })
}
