//! Browser event handlers that record activity and forward vectors to the index.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::keys::{StorageKey, VectorId, ENABLED_KEY};
use crate::pinecone::{Metadata, VectorRecord, VectorSink};
use crate::reddit::{is_events_endpoint, CapturedBody, RedditAction};
use crate::records::{ApiRequestRecord, TabChange, TabSnapshot, VectorStatus};
use crate::store::{KeyValueStore, StoreExt};
use crate::vectorizer::{DocumentFields, Vectorizer};

/// How long a delete confirmation stays visible.
pub const TEMP_STATUS_TTL_MS: u64 = 3_000;

/// Confirmations shown after a vector is deleted.
pub const DELETE_CONFIRMATIONS: &[&str] = &[
    "Consider it gone. Like that time Harvey tried casual Fridays.",
    "I've made that disappear faster than Harvey's ego after losing a case.",
    "Done and done. Now that's what I call getting rid of evidence.",
    "Poof! Gone like Mike's fake Harvard degree.",
    "Memory deleted. Just like I delete Harvey's blind dates from his calendar.",
    "That's been handled. Because that's what I do.",
    "Consider it shredded. Like the time Louis tried to grow a beard.",
    "Gone. And unlike Rachel's cooking, this won't come back to haunt you.",
    "I've taken care of that. Just like I take care of everything else around here.",
];

/// Source of epoch-millisecond timestamps.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Current wall-clock time in epoch milliseconds.
pub fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

/// Result of handling a tab update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabUpdate {
    /// Neither a finished load nor a navigation.
    Ignored,
    /// Access time written; `status` is `None` when sending is disabled.
    Recorded {
        /// Stored upsert outcome.
        status: Option<VectorStatus>,
    },
}

/// Outcome of a captured Reddit events request.
#[derive(Debug, Clone, PartialEq)]
pub struct RedditCapture {
    /// Key the request record was stored under.
    pub request_key: String,
    /// Upsert outcome per relevant event; empty when sending is disabled.
    pub statuses: Vec<(VectorId, VectorStatus)>,
}

/// Wires the store, vectorizer and vector sink together.
pub struct Recorder<S, V> {
    store: S,
    sink: V,
    vectorizer: Vectorizer,
    clock: Clock,
}

impl<S, V> Recorder<S, V>
where
    S: KeyValueStore,
    V: VectorSink,
{
    /// Builds a recorder using the system clock.
    pub fn new(store: S, sink: V, vectorizer: Vectorizer) -> Self {
        Self {
            store,
            sink,
            vectorizer,
            clock: Arc::new(system_now_ms),
        }
    }

    /// Replaces the timestamp source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Underlying vector sink.
    pub fn sink(&self) -> &V {
        &self.sink
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Whether vectors are forwarded; an absent flag means enabled.
    pub fn is_enabled(&self) -> Result<bool> {
        let flag = self.store.get(ENABLED_KEY)?;
        Ok(!matches!(flag, Some(Value::Bool(false))))
    }

    /// Persists the forwarding toggle.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.store.set(ENABLED_KEY, Value::Bool(enabled))?;
        info!(enabled, "vector forwarding toggled");
        Ok(())
    }

    /// Records the activation time of a tab.
    pub fn tab_activated(&self, tab_id: u64) -> Result<u64> {
        let now = self.now();
        self.store
            .set(&StorageKey::TabAccess(tab_id).to_string(), json!(now))?;
        debug!(tab_id, now, "tab activated");
        Ok(now)
    }

    /// Handles a tab update; finished loads and navigations are recorded and sent.
    ///
    /// `page` carries scraped page text; without it the tab title is vectorized.
    pub fn tab_updated(
        &self,
        tab: &TabSnapshot,
        change: &TabChange,
        page: Option<&DocumentFields>,
    ) -> Result<TabUpdate> {
        let loaded = change.is_complete() && tab.url.is_some();
        if !loaded && change.url.is_none() {
            return Ok(TabUpdate::Ignored);
        }
        let now = self.tab_activated(tab.id)?;
        self.store
            .set_as(&StorageKey::TabInfo(tab.id).to_string(), tab)?;
        let status = self.send_tab(tab, page, now)?;
        Ok(TabUpdate::Recorded { status })
    }

    /// Upserts a tab vector and stores the outcome; `None` when forwarding is disabled.
    pub fn send_tab(
        &self,
        tab: &TabSnapshot,
        page: Option<&DocumentFields>,
        now: u64,
    ) -> Result<Option<VectorStatus>> {
        if !self.is_enabled()? {
            debug!(tab_id = tab.id, "forwarding disabled; skipping tab");
            return Ok(None);
        }
        let id = VectorId::Tab(tab.id);
        let fields = match page {
            Some(fields) => fields.clone(),
            None => DocumentFields {
                title: tab.title.clone(),
                ..DocumentFields::default()
            },
        };
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), json!("tab"));
        insert_opt(&mut metadata, "title", tab.title.as_deref());
        insert_opt(&mut metadata, "url", tab.url.as_deref());
        metadata.insert("timestamp".into(), json!(now));

        let record = VectorRecord {
            id: id.to_string(),
            values: self.vectorizer.vectorize(&fields),
            metadata,
        };
        let status = self.deliver(&id, record, now)?;
        Ok(Some(status))
    }

    /// Handles an intercepted request; only the Reddit events endpoint is recorded.
    pub fn reddit_request(
        &self,
        url: &str,
        method: &str,
        body: Option<&[u8]>,
    ) -> Result<Option<RedditCapture>> {
        if !is_events_endpoint(url) {
            return Ok(None);
        }
        let now = self.now();
        let captured = body.map(CapturedBody::decode);
        let actions = captured
            .as_ref()
            .and_then(CapturedBody::events)
            .map(|batch| batch.actions())
            .unwrap_or_default();
        // Distinct per-action timestamps keep same-kind actions in one batch apart.
        let action_timestamps: Vec<u64> = (0..actions.len() as u64).map(|i| now + i).collect();
        let record = ApiRequestRecord {
            is_api_request: true,
            url: url.to_string(),
            method: method.to_string(),
            payload: captured
                .as_ref()
                .map(CapturedBody::to_payload)
                .unwrap_or(Value::Null),
            timestamp: now,
            action_timestamps: action_timestamps.clone(),
        };
        let request_key = StorageKey::RedditRequest(now).to_string();
        self.store.set_as(&request_key, &record)?;
        info!(actions = actions.len(), "captured reddit events request");

        let mut statuses = Vec::new();
        if !actions.is_empty() && self.is_enabled()? {
            for (action, timestamp) in actions.iter().zip(action_timestamps) {
                let id = VectorId::Reddit {
                    timestamp,
                    action: action.kind,
                };
                let record = VectorRecord {
                    id: id.to_string(),
                    values: self.vectorizer.vectorize(&action.to_fields()),
                    metadata: reddit_metadata(action, timestamp),
                };
                let status = self.deliver(&id, record, timestamp)?;
                statuses.push((id, status));
            }
        }
        Ok(Some(RedditCapture {
            request_key,
            statuses,
        }))
    }

    fn deliver(&self, id: &VectorId, record: VectorRecord, now: u64) -> Result<VectorStatus> {
        let status = match self.sink.upsert(std::slice::from_ref(&record)) {
            Ok(_) => {
                info!(id = %id, "sent vector");
                VectorStatus::sent(now)
            }
            Err(err) => {
                warn!(id = %id, "failed to send vector: {err:#}");
                VectorStatus::failed(err, now)
            }
        };
        self.store.set_as(&id.status_key(), &status)?;
        Ok(status)
    }

    /// Deletes a vector and replaces its status with a temporary confirmation.
    pub fn delete(&self, id: &str) -> Result<VectorStatus> {
        self.sink
            .delete(&[id.to_string()])
            .with_context(|| format!("failed to delete {id}"))?;
        let now = self.now();
        let status_key = match VectorId::parse(id) {
            Some(parsed) => parsed.status_key(),
            None => format!("{id}_pinecone_status"),
        };
        self.store.remove(&status_key)?;
        let message = DELETE_CONFIRMATIONS[(now as usize) % DELETE_CONFIRMATIONS.len()];
        let status = VectorStatus::temporary(message, now);
        self.store.set_as(&status_key, &status)?;
        info!(id, "deleted vector");
        Ok(status)
    }

    /// Removes temporary statuses older than [`TEMP_STATUS_TTL_MS`]; returns how many.
    pub fn expire_temporary(&self) -> Result<usize> {
        let now = self.now();
        let mut removed = 0usize;
        for (key, value) in self.store.snapshot()? {
            if !matches!(StorageKey::parse(&key), Some(StorageKey::Status(_))) {
                continue;
            }
            let Ok(status) = serde_json::from_value::<VectorStatus>(value) else {
                continue;
            };
            if status.is_temp && now.saturating_sub(status.timestamp) >= TEMP_STATUS_TTL_MS {
                self.store.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn insert_opt(metadata: &mut Metadata, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        metadata.insert(key.to_string(), json!(value));
    }
}

fn reddit_metadata(action: &RedditAction, now: u64) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("type".into(), json!("reddit_action"));
    metadata.insert("action".into(), json!(action.kind.as_str()));
    metadata.insert("subreddit".into(), json!(action.subreddit));
    insert_opt(&mut metadata, "url", action.post_url.as_deref());
    insert_opt(&mut metadata, "canonical_url", action.canonical_url.as_deref());
    insert_opt(&mut metadata, "title", action.title.as_deref());
    metadata.insert("nsfw".into(), json!(action.nsfw));
    metadata.insert("timestamp".into(), json!(now));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reddit::ActionKind;
    use crate::store::MemoryStore;
    use crate::vectorizer::VectorizerConfig;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        upserts: Mutex<Vec<VectorRecord>>,
        deletes: Mutex<Vec<String>>,
        fail: bool,
    }

    impl VectorSink for RecordingSink {
        fn upsert(&self, vectors: &[VectorRecord]) -> Result<usize> {
            if self.fail {
                anyhow::bail!("Pinecone upsert request failed (503 Service Unavailable)");
            }
            self.upserts.lock().unwrap().extend_from_slice(vectors);
            Ok(vectors.len())
        }

        fn delete(&self, ids: &[String]) -> Result<()> {
            if self.fail {
                anyhow::bail!("Pinecone delete request failed (500)");
            }
            self.deletes.lock().unwrap().extend_from_slice(ids);
            Ok(())
        }
    }

    fn recorder(sink: RecordingSink, now: Arc<AtomicU64>) -> Recorder<MemoryStore, RecordingSink> {
        Recorder::new(
            MemoryStore::new(),
            sink,
            Vectorizer::new(VectorizerConfig::with_dimension(8)),
        )
        .with_clock(Arc::new(move || now.load(Ordering::SeqCst)))
    }

    fn tab(id: u64) -> TabSnapshot {
        TabSnapshot {
            id,
            window_id: Some(1),
            title: Some("Hello World".into()),
            url: Some("https://example.com/".into()),
        }
    }

    const EVENTS_URL: &str = "https://www.reddit.com/svc/shreddit/events";

    #[test]
    fn activation_writes_access_time() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(1234)));
        rec.tab_activated(9).unwrap();
        assert_eq!(rec.store().get("tab_9_access").unwrap(), Some(json!(1234)));
    }

    #[test]
    fn completed_load_is_sent_with_metadata() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(50)));
        let update = rec.tab_updated(&tab(4), &TabChange::complete(), None).unwrap();
        assert_eq!(
            update,
            TabUpdate::Recorded {
                status: Some(VectorStatus::sent(50))
            }
        );

        let upserts = rec.sink().upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].id, "tab_4");
        assert_eq!(upserts[0].values, vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(upserts[0].metadata["type"], "tab");
        assert_eq!(upserts[0].metadata["url"], "https://example.com/");
        assert_eq!(
            rec.store().get_as::<VectorStatus>("tab_4_pinecone_status").unwrap(),
            Some(VectorStatus::sent(50))
        );
        assert_eq!(rec.store().get("tab_4_access").unwrap(), Some(json!(50)));
    }

    #[test]
    fn loading_updates_are_ignored() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(1)));
        let change = TabChange {
            status: Some("loading".into()),
            url: None,
        };
        assert_eq!(rec.tab_updated(&tab(1), &change, None).unwrap(), TabUpdate::Ignored);
        assert!(rec.store().keys().unwrap().is_empty());
    }

    #[test]
    fn navigation_without_load_is_sent() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(1)));
        let change = TabChange {
            status: None,
            url: Some("https://example.com/next".into()),
        };
        let update = rec.tab_updated(&tab(2), &change, None).unwrap();
        assert!(matches!(update, TabUpdate::Recorded { status: Some(_) }));
    }

    #[test]
    fn disabled_forwarding_skips_upsert() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(1)));
        rec.set_enabled(false).unwrap();
        let update = rec.tab_updated(&tab(3), &TabChange::complete(), None).unwrap();
        assert_eq!(update, TabUpdate::Recorded { status: None });
        assert!(rec.sink().upserts.lock().unwrap().is_empty());
        assert_eq!(rec.store().get("tab_3_pinecone_status").unwrap(), None);
        rec.set_enabled(true).unwrap();
        assert!(rec.is_enabled().unwrap());
    }

    #[test]
    fn failed_upsert_records_error_status() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let rec = recorder(sink, Arc::new(AtomicU64::new(7)));
        let update = rec.tab_updated(&tab(5), &TabChange::complete(), None).unwrap();
        let TabUpdate::Recorded { status: Some(status) } = update else {
            panic!("expected a status");
        };
        assert!(!status.success);
        assert!(status.message.starts_with("Error: Pinecone upsert request failed"));
    }

    #[test]
    fn reddit_events_are_recorded_and_sent() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(1000)));
        let body = br#"{"info": [
            {"action": "click", "noun": "upvote", "subreddit": {"name": "rust"},
             "post": {"url": "/r/rust/1", "title": "Lifetimes", "nsfw": false}},
            {"action": "view", "noun": "post"}
        ]}"#;
        let capture = rec
            .reddit_request(EVENTS_URL, "POST", Some(body))
            .unwrap()
            .expect("capture");
        assert_eq!(capture.request_key, "reddit_event_1000");
        assert_eq!(capture.statuses.len(), 1);
        assert_eq!(
            capture.statuses[0].0,
            VectorId::Reddit {
                timestamp: 1000,
                action: ActionKind::Upvote
            }
        );

        let record: ApiRequestRecord = rec
            .store()
            .get_as("reddit_event_1000")
            .unwrap()
            .expect("request record");
        assert!(record.is_api_request);
        assert_eq!(record.payload["info"][0]["noun"], "upvote");

        let upserts = rec.sink().upserts.lock().unwrap();
        assert_eq!(upserts[0].id, "reddit_1000_upvote");
        assert_eq!(upserts[0].metadata["subreddit"], "rust");
        assert!(upserts[0].metadata.get("canonical_url").is_none());
        assert_eq!(
            rec.store()
                .get_as::<VectorStatus>("reddit_1000_upvote_pinecone_status")
                .unwrap(),
            Some(VectorStatus::sent(1000))
        );
    }

    #[test]
    fn other_urls_and_raw_bodies() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(3)));
        assert_eq!(
            rec.reddit_request("https://www.reddit.com/api/vote", "POST", None)
                .unwrap(),
            None
        );
        let capture = rec
            .reddit_request(EVENTS_URL, "POST", Some(b"garbage"))
            .unwrap()
            .expect("capture");
        assert!(capture.statuses.is_empty());
        let record: ApiRequestRecord = rec.store().get_as("reddit_event_3").unwrap().unwrap();
        assert_eq!(record.payload, json!("garbage"));
    }

    #[test]
    fn delete_swaps_in_temporary_status_then_expires() {
        let now = Arc::new(AtomicU64::new(100));
        let rec = recorder(RecordingSink::default(), Arc::clone(&now));
        rec.tab_updated(&tab(6), &TabChange::complete(), None).unwrap();

        let status = rec.delete("tab_6").unwrap();
        assert!(status.is_temp);
        assert!(DELETE_CONFIRMATIONS.contains(&status.message.as_str()));
        assert_eq!(*rec.sink().deletes.lock().unwrap(), vec!["tab_6".to_string()]);

        now.store(100 + TEMP_STATUS_TTL_MS - 1, Ordering::SeqCst);
        assert_eq!(rec.expire_temporary().unwrap(), 0);
        now.store(100 + TEMP_STATUS_TTL_MS, Ordering::SeqCst);
        assert_eq!(rec.expire_temporary().unwrap(), 1);
        assert_eq!(rec.store().get("tab_6_pinecone_status").unwrap(), None);
    }

    #[test]
    fn failed_delete_keeps_status() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let rec = recorder(sink, Arc::new(AtomicU64::new(1)));
        rec.store()
            .set_as("tab_8_pinecone_status", &VectorStatus::sent(1))
            .unwrap();
        assert!(rec.delete("tab_8").is_err());
        assert_eq!(
            rec.store().get_as::<VectorStatus>("tab_8_pinecone_status").unwrap(),
            Some(VectorStatus::sent(1))
        );
    }

    #[test]
    fn same_kind_actions_get_distinct_ids() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(1000)));
        let body = br#"{"info": [
            {"noun": "upvote", "subreddit": {"name": "rust"}, "post": {"url": "/a"}},
            {"noun": "screen"},
            {"noun": "upvote", "subreddit": {"name": "rust"}, "post": {"url": "/b"}}
        ]}"#;
        let capture = rec
            .reddit_request(EVENTS_URL, "POST", Some(body))
            .unwrap()
            .expect("capture");
        let ids: Vec<String> = capture.statuses.iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["reddit_1000_upvote", "reddit_1001_upvote"]);

        let upserts = rec.sink().upserts.lock().unwrap();
        assert_eq!(upserts[1].metadata["url"], "/b");
        assert_eq!(upserts[1].metadata["timestamp"], 1001);
        let record: ApiRequestRecord = rec.store().get_as("reddit_event_1000").unwrap().unwrap();
        assert_eq!(record.action_timestamps, vec![1000, 1001]);
        assert!(rec
            .store()
            .get("reddit_1001_upvote_pinecone_status")
            .unwrap()
            .is_some());
    }

    #[test]
    fn malformed_event_does_not_block_valid_ones() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(5)));
        let body = br#"{"info": [
            {"noun": "upvote", "subreddit": {"name": "rust"}, "post": {"url": "/a"}},
            {"noun": "screen", "post": {"nsfw": "false"}}
        ]}"#;
        let capture = rec
            .reddit_request(EVENTS_URL, "POST", Some(body))
            .unwrap()
            .expect("capture");
        assert_eq!(capture.statuses.len(), 1);
        assert_eq!(rec.sink().upserts.lock().unwrap().len(), 1);
    }

    #[test]
    fn disabled_forwarding_skips_reddit_upsert() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(70)));
        rec.set_enabled(false).unwrap();
        let body = br#"{"info": [{"noun": "save", "subreddit": {"name": "rust"}}]}"#;
        let capture = rec
            .reddit_request(EVENTS_URL, "POST", Some(body))
            .unwrap()
            .expect("capture");
        assert!(capture.statuses.is_empty());
        assert!(rec.sink().upserts.lock().unwrap().is_empty());
        assert_eq!(rec.store().get("reddit_70_save_pinecone_status").unwrap(), None);
        assert!(rec.store().get("reddit_event_70").unwrap().is_some());
    }

    #[test]
    fn recorded_tab_keeps_title_and_url() {
        let rec = recorder(RecordingSink::default(), Arc::new(AtomicU64::new(9)));
        rec.tab_updated(&tab(11), &TabChange::complete(), None).unwrap();
        assert_eq!(
            rec.store().get_as::<TabSnapshot>("tab_11_info").unwrap(),
            Some(tab(11))
        );
    }
}
