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

use crate::store::{
    add_finalizer, remove_finalizer, retry_on_conflict, DeletionPropagation, ObjectStore,
};
use crate::task::phase::{job_conditions, task_condition_type};
use crate::task::TaskPhase;
use chrono::Utc;
use k8s_openapi::api::batch::v1::{Job, JobCondition};
use k8s_openapi::api::core::v1::Secret;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use warden_common::conf::ControllerConf;
use warden_common::state::{
    find_condition, remove_condition, set_condition, upsert_condition, Condition,
    ConditionStatus, ConditionType, CopyBackupsTask, ObjectKey, StoreSpec,
    FINALIZER_COPY_BACKUPS_TASK,
};
use warden_common::{WardenError, WardenResult};
use warden_store::{CopyJobBuilder, ImageVector, StorageProvider};

pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_SECRET_NOT_FOUND: &str = "SecretNotFound";

/// What the controller should do with a task after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration),
}

impl Action {
    pub fn requeue_now() -> Self {
        Action::RequeueAfter(Duration::ZERO)
    }
}

/// Drives one copy backups task towards its job and mirrors the job outcome into task status.
///
/// Every call recomputes from the stored task and job, nothing is kept between calls.
pub struct TaskReconciler<S> {
    store: Arc<S>,
    conf: ControllerConf,
    image: String,
}

impl<S: ObjectStore> TaskReconciler<S> {
    pub fn new(store: Arc<S>, conf: ControllerConf, images: &ImageVector) -> WardenResult<Self> {
        let image = images.backup_restore_image()?;
        Ok(Self { store, conf, image })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn conf(&self) -> &ControllerConf {
        &self.conf
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> WardenResult<Action> {
        let task = match self.store.get::<CopyBackupsTask>(key).await? {
            Some(v) => v,
            None => {
                debug!("task {} is gone", key);
                return Ok(Action::Done);
            }
        };

        let job = match self.store.get::<Job>(&task.job_key()).await? {
            Some(job) if !is_controlled_by(&task, &job) => {
                if task.is_being_deleted() {
                    // not ours to delete
                    None
                } else {
                    return Err(WardenError::conflict(
                        "Job",
                        task.job_key(),
                        format!("not controlled by task {}", key),
                    ));
                }
            }
            job => job,
        };

        let phase = TaskPhase::of(&task, job.as_ref());
        debug!("reconcile task {} in phase {}", key, phase);

        match (phase, job) {
            (TaskPhase::Deleting, job) => self.reconcile_delete(&task, job).await,
            (TaskPhase::Pending, _) | (_, None) => self.create_job(task).await,
            (phase, Some(job)) => self.sync_status(&task, &job, phase).await,
        }
    }

    async fn create_job(&self, task: CopyBackupsTask) -> WardenResult<Action> {
        let key = task.key();
        let task = add_finalizer(self.store.as_ref(), &task, FINALIZER_COPY_BACKUPS_TASK).await?;

        let job = match self.build_job(&task) {
            Ok(v) => v,
            Err(e) if e.is_validation() => {
                warn!("task {} has an invalid spec: {}", key, e);
                self.set_blocked(&key, REASON_INVALID_SPEC, e.to_string()).await?;
                return Ok(Action::Done);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.check_secrets(&task).await {
            if matches!(e, WardenError::SecretNotFound(_)) {
                self.set_blocked(&key, REASON_SECRET_NOT_FOUND, e.to_string()).await?;
            }
            return Err(e);
        }

        // Give up if the task changed while the job was being prepared.
        let latest = self.store.get::<CopyBackupsTask>(&key).await?;
        let unchanged = latest.as_ref().is_some_and(|x| {
            x.resource_version() == task.resource_version() && !x.is_being_deleted()
        });
        if !unchanged {
            debug!("task {} changed during job creation, requeue", key);
            return Ok(Action::requeue_now());
        }

        let job = match self.store.create(&job).await {
            Ok(v) => {
                info!("created job {} for task {}", task.job_key(), key);
                v
            }
            Err(e) if e.is_already_exists() => {
                debug!("job {} already exists", task.job_key());
                match self.store.get::<Job>(&task.job_key()).await? {
                    Some(v) => v,
                    None => return Ok(Action::requeue_now()),
                }
            }
            Err(e) => return Err(e),
        };

        let phase = TaskPhase::of(&task, Some(&job));
        self.sync_status(&task, &job, phase).await
    }

    fn build_job(&self, task: &CopyBackupsTask) -> WardenResult<Job> {
        CopyJobBuilder::resolve(task, self.image.as_str())?.build()
    }

    async fn check_secrets(&self, task: &CopyBackupsTask) -> WardenResult<()> {
        for store in [&task.spec.target_store, &task.spec.source_store] {
            if !needs_credentials(store)? {
                continue;
            }
            let secret_name = match store.secret_name() {
                Some(v) => v,
                None => continue,
            };
            let namespace = store
                .secret_ref
                .as_ref()
                .and_then(|s| s.namespace.as_deref())
                .filter(|ns| !ns.is_empty())
                .unwrap_or(task.namespace());

            let key = ObjectKey::new(namespace, secret_name);
            if self.store.get::<Secret>(&key).await?.is_none() {
                return Err(WardenError::SecretNotFound(key.to_string()));
            }
        }
        Ok(())
    }

    async fn sync_status(
        &self,
        task: &CopyBackupsTask,
        job: &Job,
        phase: TaskPhase,
    ) -> WardenResult<Action> {
        let observed = job_conditions(job);

        self.update_status(&task.key(), |task| {
            let generation = task.generation();
            let status = task.status_mut();
            let mut changed = remove_condition(&mut status.conditions, ConditionType::Blocked);
            let mut mapped = 0;
            for job_condition in observed {
                let existing = task_condition_type(&job_condition.type_)
                    .and_then(|t| find_condition(&status.conditions, t));
                if let Some(condition) = to_task_condition(job_condition, existing) {
                    changed |= upsert_condition(&mut status.conditions, condition);
                    mapped += 1;
                }
            }
            if mapped > 0 && status.observed_generation != Some(generation) {
                status.observed_generation = Some(generation);
                changed = true;
            }
            changed
        })
        .await?;

        if phase.is_finished() {
            Ok(Action::Done)
        } else {
            Ok(Action::RequeueAfter(self.conf.resync_interval))
        }
    }

    async fn set_blocked(&self, key: &ObjectKey, reason: &str, message: String) -> WardenResult<()> {
        let condition = Condition::new(
            ConditionType::Blocked,
            ConditionStatus::True,
            reason,
            message,
        );
        self.update_status(key, |task| {
            set_condition(&mut task.status_mut().conditions, condition.clone())
        })
        .await?;
        Ok(())
    }

    async fn reconcile_delete(
        &self,
        task: &CopyBackupsTask,
        job: Option<Job>,
    ) -> WardenResult<Action> {
        let key = task.key();
        match job {
            Some(job) if job.metadata.deletion_timestamp.is_none() => {
                info!("task {} is being deleted, delete job {}", key, task.job_key());
                match self
                    .store
                    .delete::<Job>(&task.job_key(), DeletionPropagation::Foreground)
                    .await
                {
                    Err(e) if !e.is_not_found() => return Err(e),
                    _ => (),
                }
                Ok(Action::RequeueAfter(self.conf.deletion_poll_interval))
            }

            Some(_) => {
                let since = task
                    .metadata
                    .deletion_timestamp
                    .as_ref()
                    .map(|t| Utc::now().signed_duration_since(t.0))
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or_default();
                if since > self.conf.dependent_deletion_timeout {
                    return Err(WardenError::Timeout(format!(
                        "job {} of task {} still exists {:?} after deletion",
                        task.job_key(),
                        key,
                        since
                    )));
                }
                debug!("task {} waits for job {} to be deleted", key, task.job_key());
                Ok(Action::RequeueAfter(self.conf.deletion_poll_interval))
            }

            None => {
                if task.has_finalizer(FINALIZER_COPY_BACKUPS_TASK) {
                    let store = self.store.as_ref();
                    retry_on_conflict(self.conf.status_update_retries, move || {
                        let key = key.clone();
                        async move {
                            match store.get::<CopyBackupsTask>(&key).await? {
                                Some(task) => {
                                    remove_finalizer(store, &task, FINALIZER_COPY_BACKUPS_TASK)
                                        .await?;
                                    Ok(())
                                }
                                None => Ok(()),
                            }
                        }
                    })
                    .await?;
                    info!("job of task {} is gone, released task", task.key());
                }
                Ok(Action::Done)
            }
        }
    }

    /// Read-modify-write of the task status, re-reading on conflicts.
    /// `mutate` returns whether it changed anything. Nothing is written otherwise.
    async fn update_status<F>(
        &self,
        key: &ObjectKey,
        mutate: F,
    ) -> WardenResult<Option<CopyBackupsTask>>
    where
        F: Fn(&mut CopyBackupsTask) -> bool + Send + Sync,
    {
        let store = self.store.as_ref();
        let mutate = &mutate;
        retry_on_conflict(self.conf.status_update_retries, move || async move {
            let mut task = match store.get::<CopyBackupsTask>(key).await? {
                Some(v) => v,
                None => return Ok(None),
            };
            if !mutate(&mut task) {
                return Ok(Some(task));
            }
            store.update_status(&task).await.map(Some)
        })
        .await
    }
}

fn needs_credentials(store: &StoreSpec) -> WardenResult<bool> {
    let provider = StorageProvider::from_infra(store.provider.as_deref())?;
    Ok(provider.and_then(|p| p.credentials()).is_some())
}

fn is_controlled_by(task: &CopyBackupsTask, job: &Job) -> bool {
    job.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|o| o.controller == Some(true) && o.uid == task.uid())
}

/// Copy a job condition into the task condition it maps to. Timestamps come from
/// the job; ones the job leaves unset fall back to `existing`, then to now.
fn to_task_condition(c: &JobCondition, existing: Option<&Condition>) -> Option<Condition> {
    let type_ = task_condition_type(&c.type_)?;
    let job_transition = c.last_transition_time.as_ref().map(|t| t.0);
    let transition = job_transition
        .or(existing.map(|e| e.last_transition_time))
        .unwrap_or_else(Utc::now);
    let update = c
        .last_probe_time
        .as_ref()
        .map(|t| t.0)
        .or(job_transition)
        .or(existing.map(|e| e.last_update_time))
        .unwrap_or(transition);

    Some(Condition {
        type_,
        status: ConditionStatus::parse(&c.status),
        last_update_time: update,
        last_transition_time: transition,
        reason: c.reason.clone().unwrap_or_default(),
        message: c.message.clone().unwrap_or_default(),
    })
}
