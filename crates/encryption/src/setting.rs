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

//! Encryption settings attached to schema properties.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// How a property value is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionType {
    /// Equal plaintexts produce equal ciphertexts, so the property stays
    /// usable in equality filters.
    Deterministic,
    /// Every encryption uses a fresh nonce.
    Randomized,
}

impl EncryptionType {
    /// Returns the string identifier for this encryption type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "Deterministic",
            Self::Randomized => "Randomized",
        }
    }
}

impl Display for EncryptionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deterministic" => Ok(Self::Deterministic),
            "randomized" => Ok(Self::Randomized),
            _ => Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Unsupported encryption type: {s}"),
            )),
        }
    }
}

/// Reference to the container owning an encryption setting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    container_id: String,
}

impl ContainerRef {
    /// Creates a reference to the container with the given id.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
        }
    }

    /// Container id.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }
}

/// A client encryption key plus an encryption type, for one property of a
/// container's encryption policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionSetting {
    client_encryption_key_id: String,
    encryption_type: EncryptionType,
    container: ContainerRef,
    database_id: String,
}

impl EncryptionSetting {
    /// Creates a setting.
    ///
    /// # Errors
    /// Returns `DataInvalid` when the key id or the database id is empty.
    pub fn try_new(
        client_encryption_key_id: impl Into<String>,
        encryption_type: EncryptionType,
        container: ContainerRef,
        database_id: impl Into<String>,
    ) -> Result<Self> {
        let client_encryption_key_id = client_encryption_key_id.into();
        let database_id = database_id.into();

        if client_encryption_key_id.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Client encryption key id of an encryption setting must not be empty",
            )
            .with_context("container", container.container_id()));
        }
        if database_id.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Database id of an encryption setting must not be empty",
            )
            .with_context("key id", client_encryption_key_id));
        }

        Ok(Self {
            client_encryption_key_id,
            encryption_type,
            container,
            database_id,
        })
    }

    /// Id of the client encryption key.
    pub fn client_encryption_key_id(&self) -> &str {
        &self.client_encryption_key_id
    }

    /// Requested encryption type.
    pub fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    /// Owning container.
    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    /// Id of the database holding the client encryption key.
    pub fn database_id(&self) -> &str {
        &self.database_id
    }
}
