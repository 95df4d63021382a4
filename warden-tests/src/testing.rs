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

use chrono::Utc;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use log::info;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warden_common::conf::ControllerConf;
use warden_common::logger::Logger;
use warden_common::state::{
    CopyBackupsTask, CopyBackupsTaskSpec, ObjectKey, SecretReference, StoreSpec,
    WaitForFinalSnapshotSpec,
};
use warden_common::{WardenError, WardenResult};
use warden_controller::store::{MemoryStore, ObjectStore};
use warden_controller::task::TaskController;
use warden_store::ImageVector;

pub const TEST_NAMESPACE: &str = "default";

/// A running controller on an in-memory store.
pub struct Testing {
    pub store: Arc<MemoryStore>,
    pub conf: ControllerConf,
    pub images: ImageVector,
    pub timeout: Duration,
    pub poll_interval: Duration,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Testing {
    /// Controller tuned for tests: short polling, fast backoff.
    pub fn test_conf() -> ControllerConf {
        let mut conf = ControllerConf::default();
        conf.deletion_poll_interval = Duration::from_millis(20);
        conf.backoff_base = Duration::from_millis(10);
        conf.backoff_max = Duration::from_millis(200);
        conf
    }

    pub fn start() -> WardenResult<Self> {
        Self::with_conf(Self::test_conf(), false)
    }

    /// Start the controller, optionally with a background garbage collector.
    pub fn with_conf(conf: ControllerConf, gc: bool) -> WardenResult<Self> {
        Logger::init_default();

        let store = Arc::new(MemoryStore::new());
        let images = ImageVector::load(conf.image_vector_path.as_deref())?;
        let controller = TaskController::new(store.clone(), conf.clone(), &images)?;
        let token = CancellationToken::new();

        let mut handles = vec![];
        if gc {
            handles.push(store.spawn_garbage_collector(Duration::from_millis(20), token.clone()));
        }

        let run_token = token.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = controller.run(run_token).await {
                log::error!("task controller exited: {}", e);
            }
        }));
        info!("testing controller started");

        Ok(Self {
            store,
            conf,
            images,
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            token,
            handles,
        })
    }

    pub fn backup_restore_image(&self) -> WardenResult<String> {
        self.images.backup_restore_image()
    }

    /// A task copying between two stores of the given providers.
    pub fn new_task(
        name: &str,
        namespace: &str,
        source_provider: &str,
        target_provider: &str,
        with_optional_fields: bool,
    ) -> CopyBackupsTask {
        let store = |provider: &str, prefix: &str, secret: &str| StoreSpec {
            provider: Some(provider.to_string()),
            prefix: prefix.to_string(),
            container: Some(format!("{}-container", prefix)),
            secret_ref: Some(SecretReference {
                name: secret.to_string(),
                namespace: None,
            }),
        };

        let mut spec = CopyBackupsTaskSpec {
            source_store: store(source_provider, "source", "source-etcd-backup"),
            target_store: store(target_provider, "target", "target-etcd-backup"),
            ..Default::default()
        };
        if with_optional_fields {
            spec.max_backup_age = Some(7);
            spec.max_backups = Some(42);
            spec.wait_for_final_snapshot = Some(WaitForFinalSnapshotSpec {
                enabled: true,
                timeout: Some("10m".to_string()),
            });
        }

        CopyBackupsTask::new(name, namespace, spec)
    }

    pub async fn create_task(&self, task: &CopyBackupsTask) -> WardenResult<CopyBackupsTask> {
        self.store.create(task).await
    }

    /// Create an empty secret for every name, skipping the ones that already exist.
    pub async fn create_secrets(&self, namespace: &str, names: &[&str]) -> WardenResult<()> {
        for name in names {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                string_data: Some(BTreeMap::from([("bucketName".to_string(), "x".to_string())])),
                ..Default::default()
            };
            match self.store.create(&secret).await {
                Err(e) if !e.is_already_exists() => return Err(e),
                _ => (),
            }
        }
        Ok(())
    }

    /// Job status with a single true condition.
    pub fn job_status(type_: &str, reason: &str, message: &str) -> JobStatus {
        let now = Time(Utc::now());
        JobStatus {
            conditions: Some(vec![JobCondition {
                type_: type_.to_string(),
                status: "True".to_string(),
                reason: Some(reason.to_string()).filter(|x| !x.is_empty()),
                message: Some(message.to_string()).filter(|x| !x.is_empty()),
                last_probe_time: Some(now.clone()),
                last_transition_time: Some(now),
            }]),
            ..Default::default()
        }
    }

    pub async fn set_job_status(&self, key: &ObjectKey, status: JobStatus) -> WardenResult<Job> {
        let mut job: Job = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| WardenError::not_found("Job", key))?;
        job.status = Some(status);
        self.store.update_status(&job).await
    }

    /// Poll `f` until it yields a value or the timeout passes.
    pub async fn wait_for<T, F, Fut>(&self, what: &str, mut f: F) -> WardenResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WardenResult<Option<T>>>,
    {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if let Some(v) = f().await? {
                return Ok(v);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WardenError::Timeout(format!("waiting for {}", what)));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn wait_for_object<T>(&self, key: &ObjectKey) -> WardenResult<T>
    where
        T: warden_controller::store::StoreObject,
    {
        let store = self.store.clone();
        self.wait_for(&format!("{} {}", T::KIND, key), || {
            let store = store.clone();
            let key = key.clone();
            async move { store.get::<T>(&key).await }
        })
        .await
    }

    pub async fn wait_for_deleted<T>(&self, key: &ObjectKey) -> WardenResult<()>
    where
        T: warden_controller::store::StoreObject,
    {
        let store = self.store.clone();
        self.wait_for(&format!("deletion of {} {}", T::KIND, key), || {
            let store = store.clone();
            let key = key.clone();
            async move {
                let obj = store.get::<T>(&key).await?;
                Ok(if obj.is_none() { Some(()) } else { None })
            }
        })
        .await
    }

    pub async fn stop(self) {
        self.token.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
