//! Persistent upload queue (spec §11): a background worker that drains
//! a queue of files one at a time, with pause/resume/cancel/retry and
//! queue-changed notifications.
//!
//! Generalized from the teacher's `UploadManager`, stripped of the
//! encryption/thumbnailing/media-type steps it interleaved with
//! uploading. Those were specific to the teacher's vault, not to a
//! generic upload engine. What survives is the queue shape itself:
//! a `HashMap<String, Item>` plus paused/cancelled id sets guarded by
//! `tokio::sync::RwLock`, one background task draining pending items,
//! and a queue-changed notification fired after every mutation.

use crate::callbacks::ProgressCallback;
use crate::context::Context;
use crate::error::Error;
use crate::file_uploader::{upload_file, UploadOptions};
use crate::input::{FileInput, InputOverrides};
use crate::rest::{Envelope, RestTransport};
use crate::xml::XmlParser;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum ItemStatus {
    Pending,
    Uploading { progress: f64 },
    Completed,
    Failed { error: String },
    Cancelled,
    Paused,
}

#[derive(Clone, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
    pub status: ItemStatus,
    pub retry_count: u32,
}

#[derive(Clone, Serialize)]
pub struct QueueState {
    pub items: Vec<QueueItem>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
}

/// Everything needed to (re)build the `FileInput` for one queue entry.
/// Kept behind a factory, like `batch::BatchInput`, since most input
/// shapes are read-once and a retry needs a fresh one.
pub struct QueueEntry {
    pub name: String,
    pub size: Option<u64>,
    pub make_input: Box<dyn Fn() -> FileInput + Send + Sync>,
    pub overrides: InputOverrides,
    pub endpoint: String,
    pub method: String,
    pub params: Value,
}

struct QueuedWork {
    entry: QueueEntry,
    item: QueueItem,
}

/// Notified after every queue mutation (add/pause/resume/cancel/retry/
/// remove/progress/completion) so a caller can mirror state into a UI.
pub type QueueChangedCallback = Box<dyn Fn(QueueState) + Send + Sync>;

pub struct QueueManager<T: RestTransport, H: crate::adapter::HttpAdapter> {
    transport: Arc<T>,
    http: Arc<H>,
    xml_parser: Arc<dyn XmlParser>,
    context: Context,
    queue: Arc<RwLock<HashMap<String, QueuedWork>>>,
    order: Arc<RwLock<Vec<String>>>,
    paused_ids: Arc<RwLock<HashSet<String>>>,
    cancelled_ids: Arc<RwLock<HashSet<String>>>,
    is_processing: Arc<RwLock<bool>>,
    on_queue_changed: Arc<Option<QueueChangedCallback>>,
}

impl<T: RestTransport + 'static, H: crate::adapter::HttpAdapter + 'static> QueueManager<T, H> {
    pub fn new(
        transport: T,
        http: H,
        xml_parser: Arc<dyn XmlParser>,
        context: Context,
        on_queue_changed: Option<QueueChangedCallback>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            http: Arc::new(http),
            xml_parser,
            context,
            queue: Arc::new(RwLock::new(HashMap::new())),
            order: Arc::new(RwLock::new(Vec::new())),
            paused_ids: Arc::new(RwLock::new(HashSet::new())),
            cancelled_ids: Arc::new(RwLock::new(HashSet::new())),
            is_processing: Arc::new(RwLock::new(false)),
            on_queue_changed: Arc::new(on_queue_changed),
        }
    }

    pub async fn add(&self, id: impl Into<String>, entry: QueueEntry) {
        let id = id.into();
        let item = QueueItem {
            id: id.clone(),
            name: entry.name.clone(),
            size: entry.size,
            status: ItemStatus::Pending,
            retry_count: 0,
        };
        self.queue.write().await.insert(id.clone(), QueuedWork { entry, item });
        self.order.write().await.push(id);
        self.notify().await;
    }

    /// Like `add`, but generates the item id rather than taking one
    /// from the caller.
    pub async fn enqueue(&self, entry: QueueEntry) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.add(id.clone(), entry).await;
        id
    }

    pub async fn state(&self) -> QueueState {
        let order = self.order.read().await;
        let queue = self.queue.read().await;
        let items: Vec<QueueItem> = order.iter().filter_map(|id| queue.get(id)).map(|w| w.item.clone()).collect();
        let completed_count = items.iter().filter(|i| matches!(i.status, ItemStatus::Completed)).count();
        let failed_count = items.iter().filter(|i| matches!(i.status, ItemStatus::Failed { .. })).count();
        let pending_count = items.iter().filter(|i| matches!(i.status, ItemStatus::Pending)).count();
        QueueState {
            items,
            completed_count,
            failed_count,
            pending_count,
        }
    }

    pub async fn pause(&self, id: &str) {
        self.paused_ids.write().await.insert(id.to_string());
        self.set_status(id, ItemStatus::Paused).await;
        self.notify().await;
    }

    pub async fn resume(&self, id: &str) {
        self.paused_ids.write().await.remove(id);
        self.set_status(id, ItemStatus::Pending).await;
        self.notify().await;
    }

    pub async fn cancel(&self, id: &str) {
        self.cancelled_ids.write().await.insert(id.to_string());
        self.set_status(id, ItemStatus::Cancelled).await;
        self.notify().await;
    }

    /// Resets a failed item back to `Pending` without resetting its
    /// retry count, which tracks lifetime attempts across the item.
    pub async fn retry(&self, id: &str) {
        let mut queue = self.queue.write().await;
        if let Some(work) = queue.get_mut(id) {
            if matches!(work.item.status, ItemStatus::Failed { .. }) {
                work.item.status = ItemStatus::Pending;
            }
        }
        drop(queue);
        self.notify().await;
    }

    pub async fn remove(&self, id: &str) {
        self.queue.write().await.remove(id);
        self.order.write().await.retain(|x| x != id);
        self.paused_ids.write().await.remove(id);
        self.cancelled_ids.write().await.remove(id);
        self.notify().await;
    }

    pub async fn clear_finished(&self) {
        let finished: Vec<String> = {
            let queue = self.queue.read().await;
            queue
                .iter()
                .filter(|(_, w)| matches!(w.item.status, ItemStatus::Completed | ItemStatus::Failed { .. } | ItemStatus::Cancelled))
                .map(|(id, _)| id.clone())
                .collect()
        };
        let mut queue = self.queue.write().await;
        let mut order = self.order.write().await;
        for id in &finished {
            queue.remove(id);
            order.retain(|x| x != id);
        }
        drop(queue);
        drop(order);
        self.notify().await;
    }

    async fn set_status(&self, id: &str, status: ItemStatus) {
        if let Some(work) = self.queue.write().await.get_mut(id) {
            work.item.status = status;
        }
    }

    async fn notify(&self) {
        if let Some(cb) = self.on_queue_changed.as_ref() {
            cb(self.state().await);
        }
    }

    /// Starts (or no-ops if already running) the background worker
    /// that drains pending items one at a time.
    pub async fn start_processing(&self) {
        {
            if *self.is_processing.read().await {
                return;
            }
        }
        *self.is_processing.write().await = true;

        let transport = Arc::clone(&self.transport);
        let http = Arc::clone(&self.http);
        let xml_parser = Arc::clone(&self.xml_parser);
        let context = self.context.clone();
        let queue = Arc::clone(&self.queue);
        let order = Arc::clone(&self.order);
        let paused_ids = Arc::clone(&self.paused_ids);
        let cancelled_ids = Arc::clone(&self.cancelled_ids);
        let is_processing = Arc::clone(&self.is_processing);
        let on_queue_changed = Arc::clone(&self.on_queue_changed);

        tokio::spawn(async move {
            loop {
                let next_id: Option<String> = {
                    let order_guard = order.read().await;
                    let queue_guard = queue.read().await;
                    let paused = paused_ids.read().await;
                    let cancelled = cancelled_ids.read().await;
                    order_guard
                        .iter()
                        .find(|id| {
                            queue_guard
                                .get(*id)
                                .map(|w| matches!(w.item.status, ItemStatus::Pending))
                                .unwrap_or(false)
                                && !paused.contains(*id)
                                && !cancelled.contains(*id)
                        })
                        .cloned()
                };

                let Some(id) = next_id else { break };

                Self::process_item_with_retry(&queue, &cancelled_ids, &transport, &http, xml_parser.as_ref(), &context, &id).await;

                if let Some(cb) = on_queue_changed.as_ref() {
                    let order_guard = order.read().await;
                    let queue_guard = queue.read().await;
                    let items: Vec<QueueItem> = order_guard.iter().filter_map(|id| queue_guard.get(id)).map(|w| w.item.clone()).collect();
                    let completed_count = items.iter().filter(|i| matches!(i.status, ItemStatus::Completed)).count();
                    let failed_count = items.iter().filter(|i| matches!(i.status, ItemStatus::Failed { .. })).count();
                    let pending_count = items.iter().filter(|i| matches!(i.status, ItemStatus::Pending)).count();
                    cb(QueueState {
                        items,
                        completed_count,
                        failed_count,
                        pending_count,
                    });
                }
            }

            *is_processing.write().await = false;
        });
    }

    async fn process_item_with_retry(
        queue: &Arc<RwLock<HashMap<String, QueuedWork>>>,
        cancelled_ids: &Arc<RwLock<HashSet<String>>>,
        transport: &Arc<T>,
        http: &Arc<H>,
        xml_parser: &dyn XmlParser,
        context: &Context,
        id: &str,
    ) {
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if cancelled_ids.read().await.contains(id) {
                return;
            }

            if attempt > 0 {
                if let Some(work) = queue.write().await.get_mut(id) {
                    work.item.retry_count = attempt;
                }
            }

            let (input, overrides, endpoint, method, params) = {
                let queue_guard = queue.read().await;
                let Some(work) = queue_guard.get(id) else { return };
                (
                    (work.entry.make_input)(),
                    work.entry.overrides.clone(),
                    work.entry.endpoint.clone(),
                    work.entry.method.clone(),
                    work.entry.params.clone(),
                )
            };

            let queue_for_progress = Arc::clone(queue);
            let id_for_progress = id.to_string();
            let on_progress: ProgressCallback = Box::new(move |fraction| {
                let queue = Arc::clone(&queue_for_progress);
                let id = id_for_progress.clone();
                tokio::spawn(async move {
                    if let Some(work) = queue.write().await.get_mut(&id) {
                        work.item.status = ItemStatus::Uploading { progress: fraction };
                    }
                });
            });

            let result: Result<Envelope, Error> = upload_file(
                transport.as_ref(),
                http.as_ref(),
                xml_parser,
                &endpoint,
                input,
                overrides,
                &method,
                params,
                context.clone(),
                UploadOptions {
                    on_progress: Some(on_progress),
                    on_error: None,
                },
            )
            .await;

            match result {
                Ok(_) => {
                    if let Some(work) = queue.write().await.get_mut(id) {
                        work.item.status = ItemStatus::Completed;
                    }
                    return;
                }
                Err(err) => {
                    log::warn!("queue item {} failed on attempt {}: {}", id, attempt + 1, err);
                    if attempt + 1 >= MAX_RETRY_ATTEMPTS {
                        if let Some(work) = queue.write().await.get_mut(id) {
                            work.item.status = ItemStatus::Failed { error: err.to_string() };
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{HttpAdapter, HttpResponse};
    use crate::rest::RestTransport;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeTransport {
        responses: Mutex<HashMap<String, VecDeque<Envelope>>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self { responses: Mutex::new(HashMap::new()) }
        }
        fn push(&self, endpoint: &str, envelope: Envelope) {
            self.responses.lock().unwrap().entry(endpoint.to_string()).or_default().push_back(envelope);
        }
    }

    #[async_trait]
    impl RestTransport for FakeTransport {
        async fn call(&self, endpoint: &str, _method: &str, _params: Value, _ctx: &Context) -> crate::error::Result<Envelope> {
            self.responses
                .lock()
                .unwrap()
                .get_mut(endpoint)
                .and_then(|q| q.pop_front())
                .ok_or_else(|| Error::Envelope(format!("no canned response for {endpoint}")))
        }
    }

    struct FakeHttp;

    #[async_trait]
    impl HttpAdapter for FakeHttp {
        async fn http_request(
            &self,
            _url: &str,
            _method: &str,
            _headers: Vec<(String, String)>,
            _body: Vec<u8>,
        ) -> std::result::Result<HttpResponse, reqwest::Error> {
            Ok(HttpResponse { status: 200, headers: HashMap::new(), body: Bytes::new() })
        }
    }

    #[tokio::test]
    async fn queue_drains_a_single_pending_item_to_completed() {
        let transport = FakeTransport::new();
        transport.push("upload", Envelope { result: "success".to_string(), data: json!({ "PUT": "https://srv/0", "Complete": "complete-0" }) });
        transport.push("complete-0", Envelope { result: "success".to_string(), data: Value::Null });

        let manager = QueueManager::new(transport, FakeHttp, Arc::new(crate::xml::QuickXmlParser), Context::new(), None);
        manager
            .add(
                "item-1",
                QueueEntry {
                    name: "a.bin".to_string(),
                    size: Some(3),
                    make_input: Box::new(|| FileInput::Bytes(Bytes::from_static(b"abc"))),
                    overrides: InputOverrides::default(),
                    endpoint: "upload".to_string(),
                    method: "POST".to_string(),
                    params: Value::Object(serde_json::Map::new()),
                },
            )
            .await;

        manager.start_processing().await;

        for _ in 0..50 {
            let state = manager.state().await;
            if state.completed_count == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("queue item never completed");
    }

    #[tokio::test]
    async fn pausing_an_item_keeps_it_out_of_the_worker_loop() {
        let transport = FakeTransport::new();
        let manager = QueueManager::new(transport, FakeHttp, Arc::new(crate::xml::QuickXmlParser), Context::new(), None);
        manager
            .add(
                "item-1",
                QueueEntry {
                    name: "a.bin".to_string(),
                    size: Some(3),
                    make_input: Box::new(|| FileInput::Bytes(Bytes::from_static(b"abc"))),
                    overrides: InputOverrides::default(),
                    endpoint: "upload".to_string(),
                    method: "POST".to_string(),
                    params: Value::Object(serde_json::Map::new()),
                },
            )
            .await;
        manager.pause("item-1").await;

        let state = manager.state().await;
        assert!(matches!(state.items[0].status, ItemStatus::Paused));
    }
}
