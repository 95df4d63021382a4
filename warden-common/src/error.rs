// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

/// How the controller should treat a failed reconcile step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed task spec. Reported through status, never retried blindly.
    Validation,
    /// A referenced object is missing and may appear later.
    Precondition,
    /// Conflicts, not-found races and timeouts from the object store.
    Transient,
    /// Bugs and bad process configuration. Fatal to one attempt only.
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Precondition => "precondition",
            ErrorClass::Transient => "transient",
            ErrorClass::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WardenError {
    #[error("unsupported storage provider: '{0}'")]
    UnsupportedProvider(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("malformed schedule '{expr}': {reason}")]
    MalformedSchedule { expr: String, reason: String },

    #[error("secret {0} not found")]
    SecretNotFound(String),

    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("conflict writing {kind} {key}: {message}")]
    Conflict {
        kind: String,
        key: String,
        message: String,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("image {0} not found in image vector")]
    ImageNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WardenError {
    pub fn not_found(kind: impl Into<String>, key: impl fmt::Display) -> Self {
        WardenError::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, key: impl fmt::Display) -> Self {
        WardenError::AlreadyExists {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    pub fn conflict(
        kind: impl Into<String>,
        key: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        WardenError::Conflict {
            kind: kind.into(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            WardenError::UnsupportedProvider(_)
            | WardenError::InvalidSpec(_)
            | WardenError::MalformedSchedule { .. } => ErrorClass::Validation,

            WardenError::SecretNotFound(_) => ErrorClass::Precondition,

            WardenError::NotFound { .. }
            | WardenError::AlreadyExists { .. }
            | WardenError::Conflict { .. }
            | WardenError::Timeout(_) => ErrorClass::Transient,

            WardenError::ImageNotFound(_)
            | WardenError::Config(_)
            | WardenError::Internal(_)
            | WardenError::Json(_)
            | WardenError::Yaml(_)
            | WardenError::Toml(_)
            | WardenError::Io(_) => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Validation
    }

    pub fn is_validation(&self) -> bool {
        self.class() == ErrorClass::Validation
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WardenError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, WardenError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, WardenError::Conflict { .. })
    }
}
