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

use crate::queue::ExponentialBackoff;
use log::debug;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct QueueState<T> {
    queue: VecDeque<T>,
    // queued or waiting to be re-queued after processing
    dirty: HashSet<T>,
    processing: HashSet<T>,
    // pending delayed add per item, only the earliest one is kept
    waiting: HashMap<T, Instant>,
    shutdown: bool,
}

/// Deduplicating work queue.
///
/// An item is queued at most once. An item added while it is being processed is
/// queued again on `done`, so one item is never handed to two workers at a time.
/// An item has at most one delayed add pending, and a direct add cancels it.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    backoff: ExponentialBackoff<T>,
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(backoff: ExponentialBackoff<T>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: HashMap::new(),
                shutdown: false,
            }),
            notify: Notify::new(),
            backoff,
        }
    }

    pub fn with_backoff(base: Duration, max: Duration) -> Self {
        Self::new(ExponentialBackoff::new(base, max))
    }

    // Queue bookkeeping never panics while holding the lock, recover the state if it does.
    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, item: T) {
        let mut state = self.state();
        state.waiting.remove(&item);
        if Self::enqueue(&mut state, item) {
            drop(state);
            self.notify.notify_one();
        }
    }

    // Returns true if the item was pushed and a worker should be woken.
    fn enqueue(state: &mut QueueState<T>, item: T) -> bool {
        if state.shutdown || state.dirty.contains(&item) {
            return false;
        }

        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return false;
        }
        state.queue.push_back(item);
        true
    }

    /// Add `item` once `delay` has elapsed. If a delayed add of `item` is already
    /// pending, the earlier of the two deadlines wins.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shutdown {
                return;
            }
            if matches!(state.waiting.get(&item), Some(pending) if *pending <= deadline) {
                return;
            }
            state.waiting.insert(item.clone(), deadline);
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.fire(item, deadline);
        });
    }

    // A timer only adds its item if it is still the pending deadline for it.
    fn fire(&self, item: T, deadline: Instant) {
        let mut state = self.state();
        if state.waiting.get(&item) != Some(&deadline) {
            return;
        }
        state.waiting.remove(&item);
        if Self::enqueue(&mut state, item) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Number of items with a delayed add pending.
    pub fn num_waiting(&self) -> usize {
        self.state().waiting.len()
    }

    /// Add `item` after its backoff delay, growing the delay on every call until `forget`.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.backoff.next(&item);
        debug!("requeue {:?} in {:?}", item, delay);
        self.add_after(item, delay);
    }

    pub fn forget(&self, item: &T) {
        self.backoff.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.backoff.failures(item)
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutdown {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `item` processed, requeueing it if it was added meanwhile.
    pub fn done(&self, item: &T) {
        let mut state = self.state();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutdown {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out items and wake every waiting worker.
    pub fn shutdown(&self) {
        {
            let mut state = self.state();
            state.shutdown = true;
            state.waiting.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state().shutdown
    }
}
