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

//! Client encryption key properties as served by the control plane.

use serde_derive::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// Identifies the key encryption key, and the provider holding it, that a
/// data encryption key was wrapped with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncryptionKeyWrapMetadata {
    /// Name of the key store provider, e.g. `AZURE_KEY_VAULT`.
    #[serde(rename = "type")]
    pub r#type: String,
    /// Logical name of the key encryption key.
    pub name: String,
    /// Path of the master key inside the key store.
    pub value: String,
    /// Wrapping algorithm understood by the provider.
    pub algorithm: String,
}

impl EncryptionKeyWrapMetadata {
    /// Creates wrap metadata.
    pub fn new(
        r#type: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
        algorithm: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.into(),
            name: name.into(),
            value: value.into(),
            algorithm: algorithm.into(),
        }
    }
}

/// Metadata of a client encryption key: the wrapped data encryption key and
/// what it was wrapped with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEncryptionKeyProperties {
    id: String,
    encryption_algorithm: String,
    #[serde(with = "self::_serde::base64_bytes")]
    wrapped_data_encryption_key: Vec<u8>,
    #[serde(rename = "keyWrapMetadata")]
    encryption_key_wrap_metadata: EncryptionKeyWrapMetadata,
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
}

impl ClientEncryptionKeyProperties {
    /// Creates key properties.
    pub fn new(
        id: impl Into<String>,
        encryption_algorithm: impl Into<String>,
        wrapped_data_encryption_key: Vec<u8>,
        encryption_key_wrap_metadata: EncryptionKeyWrapMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            encryption_algorithm: encryption_algorithm.into(),
            wrapped_data_encryption_key,
            encryption_key_wrap_metadata,
            etag: None,
        }
    }

    /// Sets the etag.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Parses the JSON document returned by the control plane.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let properties: Self = serde_json::from_slice(bytes).map_err(|e| {
            Error::new(
                ErrorKind::DataInvalid,
                "Failed to parse client encryption key properties",
            )
            .with_context("json", String::from_utf8_lossy(bytes))
            .with_source(e)
        })?;

        if properties.wrapped_data_encryption_key.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Client encryption key properties carry an empty wrapped key",
            )
            .with_context("key id", properties.id));
        }
        Ok(properties)
    }

    /// Serializes to the control plane's JSON shape.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Key id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the data encryption algorithm this key is meant for.
    pub fn encryption_algorithm(&self) -> &str {
        &self.encryption_algorithm
    }

    /// Wrapped data encryption key bytes.
    pub fn wrapped_data_encryption_key(&self) -> &[u8] {
        &self.wrapped_data_encryption_key
    }

    /// Wrap metadata.
    pub fn encryption_key_wrap_metadata(&self) -> &EncryptionKeyWrapMetadata {
        &self.encryption_key_wrap_metadata
    }

    /// Etag of this version of the properties.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }
}

mod _serde {
    pub(super) mod base64_bytes {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD;
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&STANDARD.encode(bytes))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
            let encoded = String::deserialize(deserializer)?;
            STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_control_plane_document() {
        let json = br#"{
            "id": "cek-1",
            "encryptionAlgorithm": "AEAD_AES_256_GCM_HMAC_SHA256",
            "wrappedDataEncryptionKey": "AQIDBA==",
            "keyWrapMetadata": {
                "type": "IN_MEMORY",
                "name": "kek-1",
                "value": "keys/kek-1",
                "algorithm": "AES-GCM"
            },
            "_rid": "ignored",
            "_etag": "\"00000001\""
        }"#;

        let properties = ClientEncryptionKeyProperties::from_json(json).unwrap();
        assert_eq!(properties.id(), "cek-1");
        assert_eq!(properties.wrapped_data_encryption_key(), &[1, 2, 3, 4]);
        assert_eq!(properties.etag(), Some("\"00000001\""));
        assert_eq!(
            properties.encryption_key_wrap_metadata(),
            &EncryptionKeyWrapMetadata::new("IN_MEMORY", "kek-1", "keys/kek-1", "AES-GCM")
        );

        let serialized = String::from_utf8(properties.to_json().unwrap()).unwrap();
        assert!(serialized.contains(r#""wrappedDataEncryptionKey":"AQIDBA==""#));
        assert!(serialized.contains(r#""_etag""#));
    }

    #[test]
    fn test_parse_rejects_bad_documents() {
        let not_base64 = br#"{"id":"cek-1","encryptionAlgorithm":"x","wrappedDataEncryptionKey":"%%%",
            "keyWrapMetadata":{"type":"t","name":"n","value":"v","algorithm":"a"}}"#;
        assert_eq!(
            ClientEncryptionKeyProperties::from_json(not_base64)
                .unwrap_err()
                .kind(),
            ErrorKind::DataInvalid
        );

        let empty_key = br#"{"id":"cek-1","encryptionAlgorithm":"x","wrappedDataEncryptionKey":"",
            "keyWrapMetadata":{"type":"t","name":"n","value":"v","algorithm":"a"}}"#;
        assert_eq!(
            ClientEncryptionKeyProperties::from_json(empty_key)
                .unwrap_err()
                .kind(),
            ErrorKind::DataInvalid
        );
    }
}
