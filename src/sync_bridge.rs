//! The sync bridge: store save hook → pending change queue.
//!
//! Registered as a save hook; on every committed entity save it asks the
//! router whether any inhabited circle syncs to the cloud, and if so
//! enqueues a change record and fires the ready callback. Every save
//! produces its own queue entry, so per-entity order is preserved and
//! latest-write-wins collapsing is deliberately absent.

use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::core::model::JsonMap;
use crate::core::store::Store;
use crate::core::time::{new_event_id, now_iso};
use crate::keyring::Keyring;

#[derive(Debug, Clone)]
pub struct PendingChange {
    pub id: String,
    pub entity_id: String,
    pub entity_type: String,
    pub circle_ids: Vec<String>,
    pub payload: Value,
    pub ts: String,
}

type ChangeCallback = Box<dyn Fn(&PendingChange) + Send + Sync>;

pub struct SyncBridge {
    store: Arc<Store>,
    hook_id: u64,
    queue: Arc<Mutex<Vec<PendingChange>>>,
    callback: Arc<Mutex<Option<ChangeCallback>>>,
}

impl SyncBridge {
    /// Hook into the store. The bridge stays live until [`SyncBridge::close`].
    pub fn new(store: Arc<Store>, keyring: Keyring) -> SyncBridge {
        let queue: Arc<Mutex<Vec<PendingChange>>> = Arc::new(Mutex::new(Vec::new()));
        let callback: Arc<Mutex<Option<ChangeCallback>>> = Arc::new(Mutex::new(None));

        let hook_queue = Arc::clone(&queue);
        let hook_callback = Arc::clone(&callback);
        let hook_id = store.add_hook(Arc::new(
            move |store: &Store, entity_id: &str, entity_type: &str, data: &JsonMap| {
                let circles = match store.inhabited_circles(entity_id) {
                    Ok(circles) => circles,
                    Err(e) => {
                        eprintln!("sync bridge could not route {}: {}", entity_id, e);
                        return;
                    }
                };
                let targets: Vec<String> = circles
                    .into_iter()
                    .filter(|circle| !keyring.is_local_only(circle))
                    .collect();
                if targets.is_empty() {
                    return;
                }
                let change = PendingChange {
                    id: format!("change-{}", new_event_id().to_lowercase()),
                    entity_id: entity_id.to_string(),
                    entity_type: entity_type.to_string(),
                    circle_ids: targets,
                    payload: Value::Object(data.clone()),
                    ts: now_iso(),
                };
                hook_queue
                    .lock()
                    .expect("sync queue poisoned")
                    .push(change.clone());
                if let Some(cb) = hook_callback.lock().expect("sync callback poisoned").as_ref() {
                    cb(&change);
                }
            },
        ));

        SyncBridge {
            store,
            hook_id,
            queue,
            callback,
        }
    }

    /// Register (or clear) the change-ready callback.
    pub fn set_change_callback(&self, callback: Option<ChangeCallback>) {
        *self.callback.lock().expect("sync callback poisoned") = callback;
    }

    pub fn pending(&self) -> Vec<PendingChange> {
        self.queue.lock().expect("sync queue poisoned").clone()
    }

    /// Return and clear the queue.
    pub fn flush(&self) -> Vec<PendingChange> {
        std::mem::take(&mut *self.queue.lock().expect("sync queue poisoned"))
    }

    /// Remove the save hook; the bridge stops observing changes.
    pub fn close(&self) {
        self.store.remove_hook(self.hook_id);
    }
}
