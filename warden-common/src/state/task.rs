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

use crate::state::{Condition, ConditionType, ObjectKey};
use crate::utils::DurationUnit;
use crate::{WardenError, WardenResult};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const GROUP: &str = "warden.io";
pub const VERSION: &str = "v1alpha1";
pub const API_VERSION: &str = "warden.io/v1alpha1";
pub const KIND_COPY_BACKUPS_TASK: &str = "CopyBackupsTask";

pub const LABEL_COMPONENT_KEY: &str = "app.kubernetes.io/component";
pub const LABEL_PART_OF_KEY: &str = "app.kubernetes.io/part-of";
pub const LABEL_MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_APP_NAME_KEY: &str = "app.kubernetes.io/name";
pub const LABEL_MANAGED_BY_VALUE: &str = "kv-warden";

pub const COMPONENT_COPY_BACKUPS_JOB: &str = "copy-backups-job";
pub const FINALIZER_COPY_BACKUPS_TASK: &str = "warden.io/copy-backups-task";

const JOB_NAME_SUFFIX: &str = "-worker";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Location of a backup bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    /// Infrastructure provider identifier, e.g. `aws` or `gcp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretReference>,
}

impl StoreSpec {
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref().filter(|c| !c.is_empty())
    }

    pub fn secret_name(&self) -> Option<&str> {
        self.secret_ref
            .as_ref()
            .map(|s| s.name.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WaitForFinalSnapshotSpec {
    pub enabled: bool,
    /// Duration string such as `10m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl WaitForFinalSnapshotSpec {
    pub fn timeout(&self) -> WardenResult<Option<Duration>> {
        match self.timeout.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => DurationUnit::from_str(s)
                .map(|d| Some(d.as_duration()))
                .map_err(|e| {
                    WardenError::InvalidSpec(format!(
                        "waitForFinalSnapshot.timeout {}: {}",
                        s, e
                    ))
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CopyBackupsTaskSpec {
    pub source_store: StoreSpec,
    pub target_store: StoreSpec,
    /// Only copy backups younger than this many days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backup_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backups: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_final_snapshot: Option<WaitForFinalSnapshotSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CopyBackupsTaskStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Request to copy backups from one store to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CopyBackupsTask {
    pub metadata: ObjectMeta,
    pub spec: CopyBackupsTaskSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CopyBackupsTaskStatus>,
}

impl k8s_openapi::Resource for CopyBackupsTask {
    const API_VERSION: &'static str = API_VERSION;
    const GROUP: &'static str = GROUP;
    const KIND: &'static str = KIND_COPY_BACKUPS_TASK;
    const VERSION: &'static str = VERSION;
    const URL_PATH_SEGMENT: &'static str = "copybackupstasks";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl k8s_openapi::Metadata for CopyBackupsTask {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl CopyBackupsTask {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: CopyBackupsTaskSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::from_meta(&self.metadata)
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// Name of the job that executes this task, `<task>-worker`.
    pub fn job_name(&self) -> String {
        format!("{}{}", self.name(), JOB_NAME_SUFFIX)
    }

    pub fn job_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.job_name())
    }

    pub fn default_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                LABEL_COMPONENT_KEY.to_string(),
                COMPONENT_COPY_BACKUPS_JOB.to_string(),
            ),
            (LABEL_PART_OF_KEY.to_string(), self.name().to_string()),
            (
                LABEL_MANAGED_BY_KEY.to_string(),
                LABEL_MANAGED_BY_VALUE.to_string(),
            ),
            (LABEL_APP_NAME_KEY.to_string(), self.job_name()),
        ])
    }

    pub fn as_owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: API_VERSION.to_string(),
            kind: KIND_COPY_BACKUPS_TASK.to_string(),
            name: self.name().to_string(),
            uid: self.uid().to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|x| x == finalizer))
            .unwrap_or(false)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    pub fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }

    pub fn status_mut(&mut self) -> &mut CopyBackupsTaskStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
