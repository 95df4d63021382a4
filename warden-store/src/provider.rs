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

use crate::constants::*;
use std::fmt;
use warden_common::{WardenError, WardenResult};

/// Canonical storage backend, independent of how the infrastructure names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageProvider {
    S3,
    Abs,
    Gcs,
    Swift,
    Oss,
    Ocs,
    Local,
}

/// Where a provider expects its credentials inside the job container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialLayout {
    /// The secret is mounted at `/var/{prefix}etcd-backup` and the env var points there.
    Directory,
    /// The secret is mounted at `/var/.{prefix}gcp/`, the env var points at the key file in it.
    ServiceAccountFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub env_name: &'static str,
    pub layout: CredentialLayout,
}

impl ProviderCredentials {
    const fn new(env_name: &'static str, layout: CredentialLayout) -> Self {
        Self { env_name, layout }
    }

    /// Value of the credential env var, `volume_prefix` separates source from target.
    pub fn env_value(&self, volume_prefix: &str) -> String {
        match self.layout {
            CredentialLayout::Directory => format!("/var/{}etcd-backup", volume_prefix),
            CredentialLayout::ServiceAccountFile => {
                format!("/var/.{}gcp/serviceaccount.json", volume_prefix)
            }
        }
    }

    pub fn mount_path(&self, volume_prefix: &str) -> String {
        match self.layout {
            CredentialLayout::Directory => format!("/var/{}etcd-backup", volume_prefix),
            CredentialLayout::ServiceAccountFile => format!("/var/.{}gcp/", volume_prefix),
        }
    }
}

impl StorageProvider {
    pub const ALL: [StorageProvider; 7] = [
        StorageProvider::S3,
        StorageProvider::Abs,
        StorageProvider::Gcs,
        StorageProvider::Swift,
        StorageProvider::Oss,
        StorageProvider::Ocs,
        StorageProvider::Local,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            StorageProvider::S3 => "S3",
            StorageProvider::Abs => "ABS",
            StorageProvider::Gcs => "GCS",
            StorageProvider::Swift => "Swift",
            StorageProvider::Oss => "OSS",
            StorageProvider::Ocs => "OCS",
            StorageProvider::Local => "Local",
        }
    }

    /// Inverse of [`StorageProvider::code`]. Unknown codes yield `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    /// Credential wiring of the provider. `None` means the job needs no secret.
    pub fn credentials(&self) -> Option<ProviderCredentials> {
        use CredentialLayout::*;
        match self {
            StorageProvider::S3 => Some(ProviderCredentials::new(ENV_AWS_APPLICATION_CREDENTIALS, Directory)),
            StorageProvider::Abs => Some(ProviderCredentials::new(ENV_AZURE_APPLICATION_CREDENTIALS, Directory)),
            StorageProvider::Gcs => Some(ProviderCredentials::new(ENV_GOOGLE_APPLICATION_CREDENTIALS, ServiceAccountFile)),
            StorageProvider::Swift => Some(ProviderCredentials::new(ENV_OPENSTACK_APPLICATION_CREDENTIALS, Directory)),
            StorageProvider::Oss => Some(ProviderCredentials::new(ENV_ALICLOUD_APPLICATION_CREDENTIALS, Directory)),
            StorageProvider::Ocs => Some(ProviderCredentials::new(ENV_OPENSHIFT_APPLICATION_CREDENTIALS, Directory)),
            StorageProvider::Local => None,
        }
    }

    /// Map an infrastructure provider identifier to its storage backend.
    ///
    /// `Ok(None)` means no provider is configured for that store.
    pub fn from_infra(infra: Option<&str>) -> WardenResult<Option<Self>> {
        let infra = match infra {
            None | Some("") => return Ok(None),
            Some(v) => v,
        };

        let provider = match infra {
            INFRA_AWS | "S3" => StorageProvider::S3,
            INFRA_AZURE | "ABS" => StorageProvider::Abs,
            INFRA_GCP | "GCS" => StorageProvider::Gcs,
            INFRA_OPENSTACK | "Swift" => StorageProvider::Swift,
            INFRA_ALICLOUD | "OSS" => StorageProvider::Oss,
            INFRA_OPENSHIFT | "OCS" => StorageProvider::Ocs,
            "Local" | "local" => StorageProvider::Local,
            other => return Err(WardenError::UnsupportedProvider(other.to_string())),
        };
        Ok(Some(provider))
    }
}

impl fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Canonical code of an optional provider, `""` when there is none.
pub fn provider_code(provider: Option<StorageProvider>) -> &'static str {
    provider.map(|p| p.code()).unwrap_or_default()
}
