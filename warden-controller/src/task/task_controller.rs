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

use crate::queue::WorkQueue;
use crate::store::{ObjectStore, WatchEvent};
use crate::task::{Action, TaskReconciler};
use futures::future::join_all;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::Resource;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use warden_common::conf::ControllerConf;
use warden_common::state::{CopyBackupsTask, ObjectKey, API_VERSION, KIND_COPY_BACKUPS_TASK};
use warden_common::WardenResult;
use warden_store::ImageVector;

/// Feeds task keys from the watch feed into a work queue and reconciles them on a worker pool.
pub struct TaskController<S> {
    reconciler: Arc<TaskReconciler<S>>,
    queue: Arc<WorkQueue<ObjectKey>>,
    workers: usize,
}

impl<S: ObjectStore> TaskController<S> {
    pub fn new(store: Arc<S>, conf: ControllerConf, images: &ImageVector) -> WardenResult<Self> {
        let queue = Arc::new(WorkQueue::with_backoff(conf.backoff_base, conf.backoff_max));
        let workers = conf.workers.max(1);
        let reconciler = Arc::new(TaskReconciler::new(store, conf, images)?);
        Ok(Self {
            reconciler,
            queue,
            workers,
        })
    }

    /// Build a controller, loading the image vector named by the configuration.
    pub fn with_conf(store: Arc<S>, conf: ControllerConf) -> WardenResult<Self> {
        let images = ImageVector::load(conf.image_vector_path.as_deref())?;
        Self::new(store, conf, &images)
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    pub fn reconciler(&self) -> &Arc<TaskReconciler<S>> {
        &self.reconciler
    }

    /// Task key to reconcile for a watch event. Jobs map to their controlling task.
    pub fn task_key(event: &WatchEvent) -> Option<ObjectKey> {
        if event.kind == KIND_COPY_BACKUPS_TASK {
            return Some(event.key.clone());
        }
        if event.kind != Job::KIND {
            return None;
        }

        event
            .meta
            .owner_references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|o| {
                o.controller == Some(true)
                    && o.kind == KIND_COPY_BACKUPS_TASK
                    && o.api_version == API_VERSION
            })
            .map(|o| ObjectKey::new(event.key.namespace.clone(), o.name.clone()))
    }

    async fn enqueue_all(&self) -> WardenResult<()> {
        let tasks = self
            .reconciler
            .store()
            .list::<CopyBackupsTask>(None)
            .await?;
        for task in tasks {
            self.queue.add(task.key());
        }
        Ok(())
    }

    /// Reconcile `key` once and schedule what comes next.
    pub async fn process(
        reconciler: &TaskReconciler<S>,
        queue: &Arc<WorkQueue<ObjectKey>>,
        key: ObjectKey,
    ) {
        let span = tracing::info_span!("reconcile", task = %key);
        let res = reconciler.reconcile(&key).instrument(span).await;

        match res {
            Ok(Action::Done) => queue.forget(&key),
            Ok(Action::RequeueAfter(delay)) => {
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    "reconcile task {} failed ({}), retry {}: {}",
                    key,
                    e.class(),
                    queue.num_requeues(&key) + 1,
                    e
                );
                queue.add_rate_limited(key.clone());
            }
            Err(e) => {
                error!("reconcile task {} failed permanently: {}", key, e);
                queue.forget(&key);
            }
        }

        queue.done(&key);
    }

    /// Run until `token` is cancelled or the watch feed cannot be recovered.
    /// Workers finish their current reconcile before returning.
    pub async fn run(&self, token: CancellationToken) -> WardenResult<()> {
        // Subscribe before listing so no change falls in between.
        let mut events = self.reconciler.store().watch();
        self.enqueue_all().await?;

        let mut handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            let handle = tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    Self::process(&reconciler, &queue, key).await;
                }
                info!("task worker {} stopped", id);
            });
            handles.push(handle);
        }
        info!("task controller started with {} workers", self.workers);

        let mut res = Ok(());
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(key) = Self::task_key(&event) {
                            self.queue.add(key);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("watch feed lagged by {} events, resync all tasks", n);
                        if let Err(e) = self.enqueue_all().await {
                            error!("resync after lag failed, stopping: {}", e);
                            res = Err(e);
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        warn!("watch feed closed");
                        break;
                    }
                },
            }
        }

        self.queue.shutdown();
        for res in join_all(handles).await {
            if let Err(e) = res {
                error!("task worker panicked: {}", e);
            }
        }
        info!("task controller stopped");
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DeletionPropagation, MemoryStore, StoreObject, WatchEventType};
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    // Lists succeed once, then fail. Its watch feed is driven by the test.
    struct BrokenListStore {
        inner: MemoryStore,
        lists: AtomicUsize,
        events: broadcast::Sender<WatchEvent>,
    }

    #[async_trait]
    impl ObjectStore for BrokenListStore {
        async fn get<T: StoreObject>(&self, key: &ObjectKey) -> WardenResult<Option<T>> {
            self.inner.get(key).await
        }

        async fn list<T: StoreObject>(&self, namespace: Option<&str>) -> WardenResult<Vec<T>> {
            if self.lists.fetch_add(1, Ordering::SeqCst) > 0 {
                return warden_common::err_box!("list unavailable");
            }
            self.inner.list(namespace).await
        }

        async fn create<T: StoreObject>(&self, obj: &T) -> WardenResult<T> {
            self.inner.create(obj).await
        }

        async fn update<T: StoreObject>(&self, obj: &T) -> WardenResult<T> {
            self.inner.update(obj).await
        }

        async fn update_status<T: StoreObject>(&self, obj: &T) -> WardenResult<T> {
            self.inner.update_status(obj).await
        }

        async fn delete<T: StoreObject>(
            &self,
            key: &ObjectKey,
            propagation: DeletionPropagation,
        ) -> WardenResult<()> {
            self.inner.delete::<T>(key, propagation).await
        }

        fn watch(&self) -> broadcast::Receiver<WatchEvent> {
            self.events.subscribe()
        }
    }

    fn event(kind: &str, owner: Option<OwnerReference>) -> WatchEvent {
        WatchEvent {
            kind: kind.to_string(),
            key: ObjectKey::new("default", "foo-worker"),
            event_type: WatchEventType::Modified,
            meta: ObjectMeta {
                owner_references: owner.map(|o| vec![o]),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_task_key() {
        let task = CopyBackupsTask::new("foo", "default", Default::default());
        let key = TaskController::<MemoryStore>::task_key(&event(
            KIND_COPY_BACKUPS_TASK,
            None,
        ));
        assert_eq!(key, Some(ObjectKey::new("default", "foo-worker")));

        let key = TaskController::<MemoryStore>::task_key(&event(
            "Job",
            Some(task.as_owner_reference()),
        ));
        assert_eq!(key, Some(ObjectKey::new("default", "foo")));

        assert_eq!(
            TaskController::<MemoryStore>::task_key(&event("Job", None)),
            None
        );
        assert_eq!(
            TaskController::<MemoryStore>::task_key(&event(
                "Secret",
                Some(task.as_owner_reference())
            )),
            None
        );
    }

    #[tokio::test]
    async fn test_run_creates_job_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(
            TaskController::new(
                store.clone(),
                ControllerConf::default(),
                &ImageVector::embedded().unwrap(),
            )
            .unwrap(),
        );

        // listed at startup
        let task = CopyBackupsTask::new("before", "default", Default::default());
        store.create(&task).await.unwrap();

        let token = CancellationToken::new();
        let handle = {
            let controller = controller.clone();
            let token = token.clone();
            tokio::spawn(async move { controller.run(token).await })
        };

        // picked up from the watch feed
        tokio::time::sleep(Duration::from_millis(20)).await;
        let task = CopyBackupsTask::new("after", "default", Default::default());
        store.create(&task).await.unwrap();

        let keys = [
            ObjectKey::new("default", "before-worker"),
            ObjectKey::new("default", "after-worker"),
        ];
        let mut found = false;
        for _ in 0..200 {
            let mut all = true;
            for key in keys.iter() {
                all &= store.get::<Job>(key).await.unwrap().is_some();
            }
            if all {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(found);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(controller.queue().is_shutdown());
    }

    #[tokio::test]
    async fn test_failed_resync_stops_workers() {
        let (events, _) = broadcast::channel(1);
        let store = Arc::new(BrokenListStore {
            inner: MemoryStore::new(),
            lists: AtomicUsize::new(0),
            events: events.clone(),
        });
        let controller = Arc::new(
            TaskController::new(
                store,
                ControllerConf::default(),
                &ImageVector::embedded().unwrap(),
            )
            .unwrap(),
        );

        let handle = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run(CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // overflow the feed so the controller has to resync, which fails
        for _ in 0..3 {
            let _ = events.send(event("Secret", None));
        }

        let res = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_err());
        assert!(controller.queue().is_shutdown());
    }
}
