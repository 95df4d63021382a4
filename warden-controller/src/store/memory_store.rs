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
    has_finalizer, DeletionPropagation, ObjectStore, StoreObject, WatchEvent, WatchEventType,
    FINALIZER_FOREGROUND_DELETION,
};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warden_common::state::ObjectKey;
use warden_common::{err_box, WardenError, WardenResult};

const WATCH_CAPACITY: usize = 1024;
const STATUS: &str = "status";
const METADATA: &str = "metadata";

// type key and namespace/name
type ObjectId = (String, ObjectKey);

#[derive(Debug, Clone)]
struct Entry {
    kind: String,
    meta: ObjectMeta,
    // The serialized object without its metadata.
    body: Map<String, Value>,
}

impl Entry {
    fn to_object<T: StoreObject>(&self) -> WardenResult<T> {
        let mut body = self.body.clone();
        body.insert(METADATA.to_string(), serde_json::to_value(&self.meta)?);
        Ok(serde_json::from_value(Value::Object(body))?)
    }

    fn is_deleting(&self) -> bool {
        self.meta.deletion_timestamp.is_some()
    }

    fn can_be_removed(&self) -> bool {
        self.is_deleting() && self.meta.finalizers.as_ref().map_or(true, |f| f.is_empty())
    }

    fn without_status(&self) -> Map<String, Value> {
        let mut body = self.body.clone();
        body.remove(STATUS);
        body
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectId, Entry>,
    version: u64,
    writes: u64,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn live_uids(&self) -> HashSet<String> {
        self.objects
            .values()
            .filter_map(|e| e.meta.uid.clone())
            .collect()
    }
}

fn split<T: StoreObject>(obj: &T) -> WardenResult<(ObjectMeta, Map<String, Value>)> {
    let meta = obj.metadata().clone();
    let mut body = match serde_json::to_value(obj)? {
        Value::Object(map) => map,
        _ => return err_box!("{} does not serialize to an object", T::KIND),
    };
    body.remove(METADATA);
    Ok((meta, body))
}

fn normalize_finalizers(meta: &mut ObjectMeta) {
    if meta.finalizers.as_ref().is_some_and(|f| f.is_empty()) {
        meta.finalizers = None;
    }
}

fn check_version(
    kind: &str,
    key: &ObjectKey,
    stored: &ObjectMeta,
    incoming: &ObjectMeta,
) -> WardenResult<()> {
    match incoming.resource_version.as_deref() {
        Some(rv) if Some(rv) != stored.resource_version.as_deref() => Err(WardenError::conflict(
            kind,
            key,
            format!(
                "resource version {} is stale, current {}",
                rv,
                stored.resource_version.as_deref().unwrap_or_default()
            ),
        )),
        _ => Ok(()),
    }
}

/// In-memory object store emulating the cluster API server and its garbage collector.
///
/// Deletion honours finalizers. `collect_garbage` removes orphans and completes
/// foreground deletions. It runs on demand, or periodically via `spawn_garbage_collector`.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    fn lock(&self) -> WardenResult<MutexGuard<'_, Inner>> {
        match self.inner.lock() {
            Ok(v) => Ok(v),
            Err(e) => err_box!("memory store lock poisoned: {}", e),
        }
    }

    fn emit(&self, id: &ObjectId, entry: &Entry, event_type: WatchEventType) {
        let event = WatchEvent {
            kind: entry.kind.clone(),
            key: id.1.clone(),
            event_type,
            meta: entry.meta.clone(),
        };
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // Record a change of `id`: bump its version, or drop it once deletion has no finalizer left.
    fn commit(&self, inner: &mut Inner, id: &ObjectId, event_type: WatchEventType) {
        inner.writes += 1;
        let version = inner.next_version();

        let remove = match inner.objects.get_mut(id) {
            None => return,
            Some(entry) => {
                normalize_finalizers(&mut entry.meta);
                entry.meta.resource_version = Some(version);
                entry.can_be_removed()
            }
        };

        if remove {
            if let Some(entry) = inner.objects.remove(id) {
                debug!("remove {} {}", entry.kind, id.1);
                self.emit(id, &entry, WatchEventType::Deleted);
            }
        } else if let Some(entry) = inner.objects.get(id) {
            self.emit(id, entry, event_type);
        }
    }

    // Set the deletion timestamp. Returns false when the object was already deleting.
    fn mark_deleting(
        &self,
        inner: &mut Inner,
        id: &ObjectId,
        propagation: DeletionPropagation,
    ) -> bool {
        let entry = match inner.objects.get_mut(id) {
            Some(v) if !v.is_deleting() => v,
            _ => return false,
        };

        entry.meta.deletion_timestamp = Some(Time(Utc::now()));
        if propagation == DeletionPropagation::Foreground
            && !has_finalizer(&entry.meta, FINALIZER_FOREGROUND_DELETION)
        {
            entry
                .meta
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER_FOREGROUND_DELETION.to_string());
        }

        self.commit(inner, id, WatchEventType::Modified);
        true
    }

    /// Number of successful writes so far. A no-op update does not count.
    pub fn writes(&self) -> u64 {
        self.lock().map(|x| x.writes).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|x| x.objects.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One garbage collection pass, repeated until nothing changes.
    ///
    /// Dependents whose owners are all gone are deleted in the background. Owners in
    /// foreground deletion get their dependents deleted, and lose `foregroundDeletion`
    /// once no dependent blocking owner deletion is left. Returns the number of changes.
    pub fn collect_garbage(&self) -> WardenResult<usize> {
        let mut inner = self.lock()?;
        let mut changes = 0;

        loop {
            let uids = inner.live_uids();
            let mut round = 0;

            let orphans: Vec<ObjectId> = inner
                .objects
                .iter()
                .filter(|(_, e)| !e.is_deleting())
                .filter(|(_, e)| {
                    let owners = e.meta.owner_references.as_deref().unwrap_or_default();
                    !owners.is_empty() && owners.iter().all(|o| !uids.contains(&o.uid))
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in orphans {
                debug!("collect orphan {}", id.1);
                if self.mark_deleting(&mut inner, &id, DeletionPropagation::Background) {
                    round += 1;
                }
            }

            let owners: Vec<(ObjectId, String)> = inner
                .objects
                .iter()
                .filter(|(_, e)| {
                    e.is_deleting() && has_finalizer(&e.meta, FINALIZER_FOREGROUND_DELETION)
                })
                .filter_map(|(id, e)| e.meta.uid.clone().map(|uid| (id.clone(), uid)))
                .collect();

            for (owner_id, owner_uid) in owners {
                let mut blocking = 0;
                let mut to_delete = vec![];
                for (id, e) in inner.objects.iter() {
                    let owner_ref = e
                        .meta
                        .owner_references
                        .as_deref()
                        .unwrap_or_default()
                        .iter()
                        .find(|o| o.uid == owner_uid);
                    if let Some(owner_ref) = owner_ref {
                        if owner_ref.block_owner_deletion.unwrap_or(false) {
                            blocking += 1;
                        }
                        if !e.is_deleting() {
                            to_delete.push(id.clone());
                        }
                    }
                }

                for id in to_delete {
                    if self.mark_deleting(&mut inner, &id, DeletionPropagation::Background) {
                        round += 1;
                    }
                }

                if blocking == 0 {
                    if let Some(entry) = inner.objects.get_mut(&owner_id) {
                        if let Some(f) = entry.meta.finalizers.as_mut() {
                            f.retain(|x| x != FINALIZER_FOREGROUND_DELETION);
                        }
                        debug!("foreground deletion of {} {} completed", entry.kind, owner_id.1);
                        self.commit(&mut inner, &owner_id, WatchEventType::Modified);
                        round += 1;
                    }
                }
            }

            if round == 0 {
                break;
            }
            changes += round;
        }

        Ok(changes)
    }

    /// Run `collect_garbage` every `interval` until `token` is cancelled.
    pub fn spawn_garbage_collector(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            info!("garbage collector started, interval {:?}", interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = store.collect_garbage() {
                            warn!("garbage collection failed: {}", e);
                        }
                    }
                }
            }
            info!("garbage collector stopped");
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<T: StoreObject>(&self, key: &ObjectKey) -> WardenResult<Option<T>> {
        let inner = self.lock()?;
        match inner.objects.get(&(T::type_key(), key.clone())) {
            Some(entry) => Ok(Some(entry.to_object()?)),
            None => Ok(None),
        }
    }

    async fn list<T: StoreObject>(&self, namespace: Option<&str>) -> WardenResult<Vec<T>> {
        let inner = self.lock()?;
        let type_key = T::type_key();
        inner
            .objects
            .iter()
            .filter(|((t, k), _)| *t == type_key && namespace.map_or(true, |ns| k.namespace == ns))
            .map(|(_, e)| e.to_object())
            .collect()
    }

    async fn create<T: StoreObject>(&self, obj: &T) -> WardenResult<T> {
        let (mut meta, mut body) = split(obj)?;
        let key = ObjectKey::from_meta(&meta);
        if key.name.is_empty() {
            return Err(WardenError::InvalidSpec(format!("{} name is required", T::KIND)));
        }
        body.remove(STATUS);

        let id = (T::type_key(), key);
        let mut inner = self.lock()?;
        if inner.objects.contains_key(&id) {
            return Err(WardenError::already_exists(T::KIND, &id.1));
        }

        meta.uid = Some(Uuid::new_v4().to_string());
        meta.generation = Some(1);
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.deletion_timestamp = None;
        inner.objects.insert(
            id.clone(),
            Entry {
                kind: T::KIND.to_string(),
                meta,
                body,
            },
        );
        self.commit(&mut inner, &id, WatchEventType::Added);

        match inner.objects.get(&id) {
            Some(entry) => entry.to_object(),
            None => err_box!("{} {} vanished after create", T::KIND, id.1),
        }
    }

    async fn update<T: StoreObject>(&self, obj: &T) -> WardenResult<T> {
        let (meta, mut body) = split(obj)?;
        let id = (T::type_key(), ObjectKey::from_meta(&meta));

        let mut inner = self.lock()?;
        let entry = match inner.objects.get_mut(&id) {
            Some(v) => v,
            None => return Err(WardenError::not_found(T::KIND, &id.1)),
        };
        check_version(T::KIND, &id.1, &entry.meta, &meta)?;

        let mut new_meta = entry.meta.clone();
        new_meta.labels = meta.labels;
        new_meta.annotations = meta.annotations;
        new_meta.finalizers = meta.finalizers;
        new_meta.owner_references = meta.owner_references;
        normalize_finalizers(&mut new_meta);

        match entry.body.get(STATUS) {
            Some(status) => body.insert(STATUS.to_string(), status.clone()),
            None => body.remove(STATUS),
        };

        let mut spec_only = body.clone();
        spec_only.remove(STATUS);
        let spec_changed = spec_only != entry.without_status();

        if !spec_changed && new_meta == entry.meta {
            return entry.to_object();
        }

        if spec_changed {
            new_meta.generation = Some(new_meta.generation.unwrap_or_default() + 1);
        }
        entry.meta = new_meta;
        entry.body = body;
        let last = entry.clone();

        self.commit(&mut inner, &id, WatchEventType::Modified);
        match inner.objects.get(&id) {
            Some(entry) => entry.to_object(),
            // finalized by this update
            None => last.to_object(),
        }
    }

    async fn update_status<T: StoreObject>(&self, obj: &T) -> WardenResult<T> {
        let (meta, body) = split(obj)?;
        let id = (T::type_key(), ObjectKey::from_meta(&meta));

        let mut inner = self.lock()?;
        let entry = match inner.objects.get_mut(&id) {
            Some(v) => v,
            None => return Err(WardenError::not_found(T::KIND, &id.1)),
        };
        check_version(T::KIND, &id.1, &entry.meta, &meta)?;

        let status = body.get(STATUS).filter(|v| !v.is_null());
        if status == entry.body.get(STATUS) {
            return entry.to_object();
        }

        match status {
            Some(v) => entry.body.insert(STATUS.to_string(), v.clone()),
            None => entry.body.remove(STATUS),
        };
        self.commit(&mut inner, &id, WatchEventType::Modified);

        match inner.objects.get(&id) {
            Some(entry) => entry.to_object(),
            None => err_box!("{} {} vanished after status update", T::KIND, id.1),
        }
    }

    async fn delete<T: StoreObject>(
        &self,
        key: &ObjectKey,
        propagation: DeletionPropagation,
    ) -> WardenResult<()> {
        let id = (T::type_key(), key.clone());
        let mut inner = self.lock()?;
        if !inner.objects.contains_key(&id) {
            return Err(WardenError::not_found(T::KIND, key));
        }

        if self.mark_deleting(&mut inner, &id, propagation) {
            debug!("delete {} {} with {:?} propagation", T::KIND, key, propagation);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{add_finalizer, remove_finalizer};
    use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn job(name: &str, owner: Option<&Secret>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                owner_references: owner.map(|o| {
                    vec![OwnerReference {
                        api_version: "v1".to_string(),
                        kind: "Secret".to_string(),
                        name: o.metadata.name.clone().unwrap_or_default(),
                        uid: o.metadata.uid.clone().unwrap_or_default(),
                        controller: Some(true),
                        block_owner_deletion: Some(true),
                    }]
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[tokio::test]
    async fn test_create_get() {
        let store = MemoryStore::new();
        let created = store.create(&secret("s1")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.generation, Some(1));
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));

        let got: Secret = store.get(&key("s1")).await.unwrap().unwrap();
        assert_eq!(got.metadata, created.metadata);

        let err = store.create(&secret("s1")).await.unwrap_err();
        assert!(err.is_already_exists());

        // same name, different type
        store.create(&job("s1", None)).await.unwrap();
        assert_eq!(store.list::<Secret>(Some("default")).await.unwrap().len(), 1);
        assert_eq!(store.list::<Job>(None).await.unwrap().len(), 1);
        assert!(store.list::<Job>(Some("other")).await.unwrap().is_empty());
        assert!(store.get::<Job>(&key("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_optimistic_concurrency() {
        let store = MemoryStore::new();
        let created = store.create(&secret("s1")).await.unwrap();

        let mut first = created.clone();
        first.metadata.labels = Some([("a".to_string(), "1".to_string())].into());
        let updated = store.update(&first).await.unwrap();
        assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);

        let mut stale = created.clone();
        stale.metadata.labels = Some([("a".to_string(), "2".to_string())].into());
        assert!(store.update(&stale).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_noop_writes() {
        let store = MemoryStore::new();
        let created = store.create(&job("j1", None)).await.unwrap();
        let writes = store.writes();

        let same = store.update(&created).await.unwrap();
        assert_eq!(same.metadata.resource_version, created.metadata.resource_version);
        store.update_status(&created).await.unwrap();
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_status_subresource() {
        let store = MemoryStore::new();
        let mut j = job("j1", None);
        j.status = Some(JobStatus {
            active: Some(1),
            ..Default::default()
        });
        let created = store.create(&j).await.unwrap();
        assert!(created.status.is_none());

        let mut with_status = created.clone();
        with_status.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        let updated = store.update_status(&with_status).await.unwrap();
        assert!(updated.status.is_some());
        assert_eq!(updated.metadata.generation, Some(1));

        // a metadata update keeps the stored status
        let mut relabel = updated.clone();
        relabel.status = None;
        relabel.metadata.labels = Some([("x".to_string(), "y".to_string())].into());
        let relabeled = store.update(&relabel).await.unwrap();
        assert!(relabeled.status.is_some());
        assert_eq!(relabeled.metadata.generation, Some(1));

        // a spec change bumps the generation
        let mut respec = relabeled.clone();
        respec.spec = Some(Default::default());
        respec.spec.as_mut().unwrap().parallelism = Some(2);
        let respecced = store.update(&respec).await.unwrap();
        assert_eq!(respecced.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_finalizer_gated_delete() {
        let store = MemoryStore::new();
        let created = store.create(&secret("s1")).await.unwrap();
        let with_finalizer = add_finalizer(&store, &created, "test/finalizer")
            .await
            .unwrap();

        store
            .delete::<Secret>(&key("s1"), DeletionPropagation::Background)
            .await
            .unwrap();
        let deleting: Secret = store.get(&key("s1")).await.unwrap().unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());
        assert_ne!(deleting.metadata.resource_version, with_finalizer.metadata.resource_version);

        remove_finalizer(&store, &deleting, "test/finalizer")
            .await
            .unwrap();
        assert!(store.get::<Secret>(&key("s1")).await.unwrap().is_none());

        let err = store
            .delete::<Secret>(&key("s1"), DeletionPropagation::Background)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_foreground_cascade() {
        let store = MemoryStore::new();
        let owner = store.create(&secret("owner")).await.unwrap();
        store.create(&job("dependent", Some(&owner))).await.unwrap();

        store
            .delete::<Secret>(&key("owner"), DeletionPropagation::Foreground)
            .await
            .unwrap();
        let deleting: Secret = store.get(&key("owner")).await.unwrap().unwrap();
        assert!(has_finalizer(&deleting.metadata, FINALIZER_FOREGROUND_DELETION));

        assert!(store.collect_garbage().unwrap() > 0);
        assert!(store.get::<Job>(&key("dependent")).await.unwrap().is_none());
        assert!(store.get::<Secret>(&key("owner")).await.unwrap().is_none());
        assert!(store.is_empty());
        assert_eq!(store.collect_garbage().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_orphans_collected() {
        let store = MemoryStore::new();
        let owner = store.create(&secret("owner")).await.unwrap();
        store.create(&job("dependent", Some(&owner))).await.unwrap();

        store
            .delete::<Secret>(&key("owner"), DeletionPropagation::Background)
            .await
            .unwrap();
        assert!(store.get::<Job>(&key("dependent")).await.unwrap().is_some());

        store.collect_garbage().unwrap();
        assert!(store.get::<Job>(&key("dependent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_events() {
        let store = MemoryStore::new();
        let mut rx = store.watch();

        store.create(&secret("s1")).await.unwrap();
        store
            .delete::<Secret>(&key("s1"), DeletionPropagation::Background)
            .await
            .unwrap();

        let added = rx.recv().await.unwrap();
        assert_eq!(added.kind, "Secret");
        assert_eq!(added.key, key("s1"));
        assert_eq!(added.event_type, WatchEventType::Added);
        let deleted = rx.recv().await.unwrap();
        assert_eq!(deleted.event_type, WatchEventType::Deleted);
    }

    #[tokio::test]
    async fn test_spawn_garbage_collector() {
        let store = Arc::new(MemoryStore::new());
        let owner = store.create(&secret("owner")).await.unwrap();
        store.create(&job("dependent", Some(&owner))).await.unwrap();
        store
            .delete::<Secret>(&key("owner"), DeletionPropagation::Foreground)
            .await
            .unwrap();

        let token = CancellationToken::new();
        let handle = store.spawn_garbage_collector(Duration::from_millis(10), token.clone());
        for _ in 0..100 {
            if store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        handle.await.unwrap();
        assert!(store.is_empty());
    }
}
