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

//! Errors returned by key resolution.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt::{self, Debug, Display, Formatter};

use http::StatusCode;

/// Result type of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies an [`Error`]. Callers branch on the kind, never on the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Anything not covered below, e.g. an internal control plane error or a
    /// closed unwrap lock. Nothing to do but report it.
    Unexpected,

    /// Key material, key properties or a ciphertext don't have the expected
    /// shape.
    DataInvalid,

    /// An encryption or key wrap algorithm this crate doesn't implement.
    FeatureUnsupported,

    /// The client encryption key or master key does not exist.
    NotFound,

    /// A client encryption key with the same id already exists.
    AlreadyExists,

    /// A conditional read found the etag it was given.
    NotModified,

    /// The key store denied access to a key encryption key, usually because
    /// it has been revoked or rotated.
    Forbidden,

    /// The client encryption key is wrapped with a key encryption key that
    /// can't be accessed, and no rewrapped version exists. Only rewrapping
    /// the key fixes this.
    KeyRewrapRequired,

    /// The caller cancelled the operation.
    Cancelled,
}

impl ErrorKind {
    /// Name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::DataInvalid => "DataInvalid",
            ErrorKind::FeatureUnsupported => "FeatureUnsupported",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::NotModified => "NotModified",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::KeyRewrapRequired => "KeyRewrapRequired",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned by every fallible operation of this crate.
///
/// Besides its [`ErrorKind`] and message, an error carries key/value context
/// added as it travels up, the remote status code when a service produced
/// it, the underlying error if any, and a backtrace when `RUST_BACKTRACE` is
/// set.
///
/// `Display` renders a single line:
///
/// ```text
/// Forbidden => Access to the master key was denied (status: 403 Forbidden, key path: kek-1): revoked
/// ```
///
/// `Debug` renders one item per line, followed by the backtrace when one was
/// captured:
///
/// ```text
/// Forbidden => Access to the master key was denied
///     status: 403 Forbidden
///     key path: kek-1
/// caused by: revoked
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<(&'static str, String)>,
    status_code: Option<StatusCode>,
    retryable: bool,
    source: Option<anyhow::Error>,
    backtrace: Backtrace,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.kind, self.message)?;

        let mut context = self.context.iter();
        if let Some((key, value)) = context.next() {
            write!(f, " ({key}: {value}")?;
            for (key, value) in context {
                write!(f, ", {key}: {value}")?;
            }
            f.write_str(")")?;
        }

        match &self.source {
            Some(source) => write!(f, ": {source}"),
            None => Ok(()),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f
                .debug_struct("Error")
                .field("kind", &self.kind)
                .field("message", &self.message)
                .field("context", &self.context)
                .field("status_code", &self.status_code)
                .field("retryable", &self.retryable)
                .field("source", &self.source)
                .field("backtrace", &self.backtrace)
                .finish();
        }

        writeln!(f, "{} => {}", self.kind, self.message)?;
        for (key, value) in &self.context {
            writeln!(f, "    {key}: {value}")?;
        }
        if let Some(source) = &self.source {
            writeln!(f, "caused by: {source:#}")?;
        }
        if self.backtrace.status() == BacktraceStatus::Captured {
            writeln!(f, "backtrace:\n{}", self.backtrace)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref())
    }
}

impl Error {
    /// Creates an error. Backtraces are only captured when enabled through
    /// the environment.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            status_code: None,
            retryable: false,
            source: None,
            backtrace: Backtrace::capture(),
        }
    }

    /// Marks whether retrying the same call may succeed.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Records the status code a remote service answered with. The status
    /// also shows up in the context.
    pub fn with_status_code(mut self, status_code: StatusCode) -> Self {
        self.status_code = Some(status_code);
        self.with_context("status", status_code.to_string())
    }

    /// Appends a context entry.
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Sets the underlying error. Setting it twice is a bug.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "error source set twice");
        self.source = Some(source.into());
        self
    }

    #[cfg(test)]
    fn with_backtrace(mut self, backtrace: Backtrace) -> Self {
        self.backtrace = backtrace;
        self
    }

    /// Kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message of the error, without context or source.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether retrying the same call may succeed.
    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// Status code of the remote service that produced the error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status_code
    }

    /// Backtrace captured at creation. Empty unless enabled through the
    /// environment.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Whether this error means access to the key encryption key was denied.
    pub fn is_key_access_denied(&self) -> bool {
        self.kind == ErrorKind::Forbidden || self.status_code == Some(StatusCode::FORBIDDEN)
    }

    /// Whether this error is a "not modified" answer to a conditional read.
    pub fn is_not_modified(&self) -> bool {
        self.kind == ErrorKind::NotModified || self.status_code == Some(StatusCode::NOT_MODIFIED)
    }

    pub(crate) fn cancelled(operation: &'static str) -> Self {
        Self::new(ErrorKind::Cancelled, "Operation was cancelled").with_context("operation", operation)
    }
}

macro_rules! define_from_err {
    ($source: path, $error_kind: path, $msg: expr) => {
        impl From<$source> for Error {
            fn from(v: $source) -> Self {
                Self::new($error_kind, $msg).with_source(v)
            }
        }
    };
}

define_from_err!(
    std::num::ParseIntError,
    ErrorKind::DataInvalid,
    "Failed to parse integer"
);
define_from_err!(
    serde_json::Error,
    ErrorKind::DataInvalid,
    "Failed to parse json document"
);
define_from_err!(
    base64::DecodeError,
    ErrorKind::DataInvalid,
    "Failed to decode base64 string"
);
define_from_err!(
    tokio::sync::AcquireError,
    ErrorKind::Unexpected,
    "Failed to acquire the key unwrap lock"
);
