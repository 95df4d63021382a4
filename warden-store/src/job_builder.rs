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
use crate::provider::{provider_code, StorageProvider};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use warden_common::state::{CopyBackupsTask, StoreSpec};
use warden_common::utils::DurationUnit;
use warden_common::{WardenError, WardenResult};

/// One end of the copy. Target and source differ only by their prefixes.
#[derive(Debug, Clone, Copy)]
struct StoreSide<'a> {
    flag_prefix: &'static str,
    env_prefix: &'static str,
    volume_prefix: &'static str,
    container_env: &'static str,
    store: &'a StoreSpec,
    code: &'a str,
}

impl<'a> StoreSide<'a> {
    fn target(store: &'a StoreSpec, code: &'a str) -> Self {
        Self {
            flag_prefix: "",
            env_prefix: "",
            volume_prefix: "",
            container_env: ENV_STORAGE_CONTAINER,
            store,
            code,
        }
    }

    fn source(store: &'a StoreSpec, code: &'a str) -> Self {
        Self {
            flag_prefix: SOURCE_FLAG_PREFIX,
            env_prefix: SOURCE_ENV_PREFIX,
            volume_prefix: SOURCE_VOLUME_PREFIX,
            container_env: ENV_SOURCE_STORAGE_CONTAINER,
            store,
            code,
        }
    }

    fn volume_name(&self) -> String {
        format!("{}{}", self.volume_prefix, VOLUME_NAME_PROVIDER_BACKUP_SECRET)
    }

    // Unknown codes and cloud-neutral providers need no credentials.
    fn credentials(&self) -> Option<crate::provider::ProviderCredentials> {
        StorageProvider::from_code(self.code).and_then(|p| p.credentials())
    }

    fn push_args(&self, args: &mut Vec<String>) {
        if !self.code.is_empty() {
            args.push(format!("--{}storage-provider={}", self.flag_prefix, self.code));
        }
        if !self.store.prefix.is_empty() {
            args.push(format!("--{}store-prefix={}", self.flag_prefix, self.store.prefix));
        }
        if let Some(container) = self.store.container() {
            args.push(format!("--{}store-container={}", self.flag_prefix, container));
        }
    }

    fn push_env(&self, env: &mut Vec<EnvVar>) {
        if let Some(container) = self.store.container() {
            env.push(env_var(self.container_env, container));
        }
        if let Some(creds) = self.credentials() {
            env.push(env_var(
                format!("{}{}", self.env_prefix, creds.env_name),
                creds.env_value(self.volume_prefix),
            ));
        }
    }

    fn push_volume_mount(&self, mounts: &mut Vec<VolumeMount>) {
        if let Some(creds) = self.credentials() {
            mounts.push(VolumeMount {
                name: self.volume_name(),
                mount_path: creds.mount_path(self.volume_prefix),
                ..Default::default()
            });
        }
    }

    fn push_volume(&self, volumes: &mut Vec<Volume>) -> WardenResult<()> {
        if self.credentials().is_none() {
            return Ok(());
        }

        let secret_name = self.store.secret_name().ok_or_else(|| {
            WardenError::InvalidSpec(format!(
                "{}store with provider {} has no secretRef",
                self.flag_prefix, self.code
            ))
        })?;

        volumes.push(Volume {
            name: self.volume_name(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.to_string()),
                default_mode: Some(MODE_OWNER_READ_WRITE_GROUP_READ),
                ..Default::default()
            }),
            ..Default::default()
        });
        Ok(())
    }
}

fn env_var(name: impl Into<String>, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Builds the copy job of a task from the canonical codes of its two stores.
pub struct CopyJobBuilder<'a> {
    task: &'a CopyBackupsTask,
    source_code: String,
    target_code: String,
    image: String,
}

impl<'a> CopyJobBuilder<'a> {
    pub fn new(
        task: &'a CopyBackupsTask,
        source_code: impl Into<String>,
        target_code: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            task,
            source_code: source_code.into(),
            target_code: target_code.into(),
            image: image.into(),
        }
    }

    /// Resolve both store providers of the task, failing on unsupported identifiers.
    pub fn resolve(task: &'a CopyBackupsTask, image: impl Into<String>) -> WardenResult<Self> {
        let source = StorageProvider::from_infra(task.spec.source_store.provider.as_deref())?;
        let target = StorageProvider::from_infra(task.spec.target_store.provider.as_deref())?;
        Ok(Self::new(
            task,
            provider_code(source),
            provider_code(target),
            image,
        ))
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn target_code(&self) -> &str {
        &self.target_code
    }

    // Target first, then source.
    fn sides(&self) -> [StoreSide<'_>; 2] {
        [
            StoreSide::target(&self.task.spec.target_store, &self.target_code),
            StoreSide::source(&self.task.spec.source_store, &self.source_code),
        ]
    }

    pub fn args(&self) -> WardenResult<Vec<String>> {
        let spec = &self.task.spec;
        let mut args = vec![
            COPY_COMMAND.to_string(),
            format!("--snapstore-temp-directory={}", SNAPSTORE_TEMP_DIR),
        ];

        for side in self.sides() {
            side.push_args(&mut args);
        }

        if let Some(age) = spec.max_backup_age.filter(|x| *x != 0) {
            args.push(format!("--max-backup-age={}", age));
        }
        if let Some(max) = spec.max_backups.filter(|x| *x != 0) {
            args.push(format!("--max-backups-to-copy={}", max));
        }

        if let Some(wait) = spec.wait_for_final_snapshot.as_ref().filter(|w| w.enabled) {
            args.push("--wait-for-final-snapshot=true".to_string());
            if let Some(timeout) = wait.timeout()?.filter(|t| !t.is_zero()) {
                args.push(format!(
                    "--wait-for-final-snapshot-timeout={}",
                    DurationUnit::from(timeout).to_go_string()
                ));
            }
        }

        Ok(args)
    }

    pub fn env(&self) -> Vec<EnvVar> {
        let mut env = vec![];
        for side in self.sides() {
            side.push_env(&mut env);
        }
        env
    }

    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = vec![];
        for side in self.sides() {
            side.push_volume_mount(&mut mounts);
        }
        mounts
    }

    pub fn volumes(&self) -> WardenResult<Vec<Volume>> {
        let mut volumes = vec![];
        for side in self.sides() {
            side.push_volume(&mut volumes)?;
        }
        Ok(volumes)
    }

    pub fn build(&self) -> WardenResult<Job> {
        let labels = self.task.default_labels();

        let container = Container {
            name: CONTAINER_NAME_COPY_BACKUPS.to_string(),
            image: Some(self.image.clone()),
            image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
            args: Some(self.args()?),
            env: Some(self.env()),
            volume_mounts: Some(self.volume_mounts()),
            ..Default::default()
        };

        let pod_spec = PodSpec {
            containers: vec![container],
            restart_policy: Some(RESTART_POLICY_ON_FAILURE.to_string()),
            volumes: Some(self.volumes()?),
            ..Default::default()
        };

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(self.task.job_name()),
                namespace: Some(self.task.namespace().to_string()),
                labels: Some(labels.clone()),
                owner_references: Some(vec![self.task.as_owner_reference()]),
                ..Default::default()
            },
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(pod_spec),
                },
                ..Default::default()
            }),
            status: None,
        })
    }
}
