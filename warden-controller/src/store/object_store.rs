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

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{Metadata, Resource};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tokio::sync::broadcast;
use warden_common::state::ObjectKey;
use warden_common::WardenResult;

/// Finalizer the garbage collector clears once all blocking dependents are gone.
pub const FINALIZER_FOREGROUND_DELETION: &str = "foregroundDeletion";

/// Any typed object the store can persist.
pub trait StoreObject:
    Resource + Metadata<Ty = ObjectMeta> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// `apiVersion/kind`, the type identity inside the store.
    fn type_key() -> String {
        format!("{}/{}", Self::API_VERSION, Self::KIND)
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::from_meta(self.metadata())
    }
}

impl<T> StoreObject for T where
    T: Resource
        + Metadata<Ty = ObjectMeta>
        + Serialize
        + DeserializeOwned
        + Clone
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPropagation {
    /// The object stays, carrying `foregroundDeletion`, until its blocking dependents are gone.
    Foreground,
    /// The object goes away now, dependents are collected afterwards.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Kind of the object, e.g. `Job`.
    pub kind: String,
    pub key: ObjectKey,
    pub event_type: WatchEventType,
    pub meta: ObjectMeta,
}

/// Object store with optimistic concurrency, owner based cascading deletion and a watch feed.
///
/// Writes carrying a `resource_version` are rejected with `Conflict` when it is stale.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get<T: StoreObject>(&self, key: &ObjectKey) -> WardenResult<Option<T>>;

    /// All objects of a type, optionally limited to one namespace.
    async fn list<T: StoreObject>(&self, namespace: Option<&str>) -> WardenResult<Vec<T>>;

    async fn create<T: StoreObject>(&self, obj: &T) -> WardenResult<T>;

    /// Replace metadata and spec. The stored status is kept.
    async fn update<T: StoreObject>(&self, obj: &T) -> WardenResult<T>;

    /// Replace the status subresource only.
    async fn update_status<T: StoreObject>(&self, obj: &T) -> WardenResult<T>;

    async fn delete<T: StoreObject>(
        &self,
        key: &ObjectKey,
        propagation: DeletionPropagation,
    ) -> WardenResult<()>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

fn finalizers_mut(meta: &mut ObjectMeta) -> &mut Vec<String> {
    meta.finalizers.get_or_insert_with(Vec::new)
}

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .map(|f| f.iter().any(|x| x == finalizer))
        .unwrap_or(false)
}

/// Add `finalizer` to the object, writing only when it is missing.
pub async fn add_finalizer<S, T>(store: &S, obj: &T, finalizer: &str) -> WardenResult<T>
where
    S: ObjectStore,
    T: StoreObject,
{
    if has_finalizer(obj.metadata(), finalizer) {
        return Ok(obj.clone());
    }

    let mut obj = obj.clone();
    finalizers_mut(obj.metadata_mut()).push(finalizer.to_string());
    debug!("add finalizer {} to {} {}", finalizer, T::KIND, obj.key());
    store.update(&obj).await
}

/// Remove `finalizer` from the object, writing only when it is present.
pub async fn remove_finalizer<S, T>(store: &S, obj: &T, finalizer: &str) -> WardenResult<T>
where
    S: ObjectStore,
    T: StoreObject,
{
    if !has_finalizer(obj.metadata(), finalizer) {
        return Ok(obj.clone());
    }

    let mut obj = obj.clone();
    finalizers_mut(obj.metadata_mut()).retain(|x| x != finalizer);
    debug!("remove finalizer {} from {} {}", finalizer, T::KIND, obj.key());
    store.update(&obj).await
}

/// Run `f` until it returns something other than a conflict, at most `retries + 1` times.
pub async fn retry_on_conflict<F, Fut, R>(retries: usize, mut f: F) -> WardenResult<R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WardenResult<R>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Err(e) if e.is_conflict() && attempt < retries => {
                attempt += 1;
                debug!("retry after conflict, attempt {}: {}", attempt, e);
            }
            res => return res,
        }
    }
}
