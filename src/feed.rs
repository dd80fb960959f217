//! Recent-activity feed assembled from stored records.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::keys::{StorageKey, VectorId};
use crate::reddit::{EventBatch, RedditAction};
use crate::records::{ApiRequestRecord, TabSnapshot, VectorStatus};
use crate::store::Entries;

/// Entries shown when no explicit limit is requested.
pub const DEFAULT_FEED_LIMIT: usize = 20;

/// What an activity entry refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    /// An open tab.
    Tab(TabSnapshot),
    /// A save or vote captured from Reddit.
    Reddit(RedditAction),
}

/// One row of the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    /// Epoch ms used for ordering.
    pub timestamp: u64,
    /// Vector id the entry is stored under remotely.
    pub vector_id: VectorId,
    /// Tab or Reddit details.
    pub activity: Activity,
    /// Last upsert/delete outcome, if any.
    pub status: Option<VectorStatus>,
}

impl ActivityEntry {
    /// Vector id when the entry was sent and can be deleted.
    pub fn deletable_id(&self) -> Option<String> {
        self.status
            .as_ref()
            .filter(|status| status.is_deletable())
            .map(|_| self.vector_id.to_string())
    }

    /// Status line as shown to the user.
    pub fn status_line(&self) -> &str {
        self.status
            .as_ref()
            .map(|status| status.message.as_str())
            .unwrap_or("Not sent to Pinecone")
    }
}

/// Builds the feed: one entry per open tab plus one per captured Reddit action,
/// newest first, truncated to `limit`. Tabs without a recorded access time use `now`.
pub fn activity_feed(
    entries: &Entries,
    open_tabs: &[TabSnapshot],
    now: u64,
    limit: usize,
) -> Vec<ActivityEntry> {
    let mut feed: Vec<ActivityEntry> = open_tabs
        .iter()
        .map(|tab| {
            let timestamp = entries
                .get(&StorageKey::TabAccess(tab.id).to_string())
                .and_then(Value::as_u64)
                .unwrap_or(now);
            let vector_id = VectorId::Tab(tab.id);
            ActivityEntry {
                timestamp,
                status: status_for(entries, &vector_id),
                vector_id,
                activity: Activity::Tab(tab.clone()),
            }
        })
        .collect();

    for (key, value) in entries {
        if !matches!(StorageKey::parse(key), Some(StorageKey::RedditRequest(_))) {
            continue;
        }
        let Ok(request) = serde_json::from_value::<ApiRequestRecord>(value.clone()) else {
            continue;
        };
        if !request.is_api_request {
            continue;
        }
        let Ok(batch) = serde_json::from_value::<EventBatch>(request.payload.clone()) else {
            continue;
        };
        for (index, action) in batch.actions().into_iter().enumerate() {
            let timestamp = request.action_timestamp(index);
            let vector_id = VectorId::Reddit {
                timestamp,
                action: action.kind,
            };
            feed.push(ActivityEntry {
                timestamp,
                status: status_for(entries, &vector_id),
                vector_id,
                activity: Activity::Reddit(action),
            });
        }
    }

    feed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    feed.truncate(limit);
    feed
}

/// Tab snapshots recorded in the store, for callers without a live browser.
///
/// Tabs with only an access time come back with just their id.
pub fn known_tabs(entries: &Entries) -> Vec<TabSnapshot> {
    let mut tabs: BTreeMap<u64, TabSnapshot> = BTreeMap::new();
    for (key, value) in entries {
        match StorageKey::parse(key) {
            Some(StorageKey::TabAccess(id)) => {
                tabs.entry(id).or_insert_with(|| TabSnapshot {
                    id,
                    ..TabSnapshot::default()
                });
            }
            Some(StorageKey::TabInfo(id)) => {
                if let Ok(tab) = serde_json::from_value::<TabSnapshot>(value.clone()) {
                    tabs.insert(id, TabSnapshot { id, ..tab });
                }
            }
            _ => {}
        }
    }
    tabs.into_values().collect()
}

fn status_for(entries: &Entries, id: &VectorId) -> Option<VectorStatus> {
    entries
        .get(&id.status_key())
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries() -> Entries {
        let mut entries = Entries::new();
        entries.insert("tab_1_access".into(), json!(100));
        entries.insert(
            "tab_1_pinecone_status".into(),
            json!({"success": true, "message": "Successfully sent to Pinecone", "timestamp": 100}),
        );
        entries.insert("tab_2_access".into(), json!(300));
        entries.insert(
            "tab_2_info".into(),
            json!({"id": 2, "title": "Docs", "url": "https://docs.rs/"}),
        );
        entries.insert(
            "reddit_event_200".into(),
            json!({
                "isApiRequest": true,
                "url": "https://www.reddit.com/svc/shreddit/events",
                "method": "POST",
                "payload": {"info": [
                    {"noun": "save", "action": "click", "subreddit": {"name": "rust"}, "post": {"url": "/p"}},
                    {"noun": "downvote", "post": {"url": "/q"}},
                    {"noun": "screen"}
                ]},
                "timestamp": 200
            }),
        );
        entries.insert(
            "reddit_200_save_pinecone_status".into(),
            json!({"success": true, "message": "gone", "timestamp": 201, "isTemp": true}),
        );
        entries.insert("pineconeEnabled".into(), json!(true));
        entries
    }

    fn tab(id: u64) -> TabSnapshot {
        TabSnapshot {
            id,
            ..TabSnapshot::default()
        }
    }

    #[test]
    fn merges_and_orders_newest_first() {
        let feed = activity_feed(&entries(), &[tab(1), tab(2), tab(3)], 500, DEFAULT_FEED_LIMIT);
        let order: Vec<_> = feed.iter().map(|e| e.vector_id.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "tab_3",
                "tab_2",
                "reddit_201_downvote",
                "reddit_200_save",
                "tab_1"
            ]
        );
        let Activity::Reddit(action) = &feed[3].activity else {
            panic!("expected reddit entry");
        };
        assert_eq!(action.subreddit, "rust");
    }

    #[test]
    fn only_lasting_successes_are_deletable() {
        let feed = activity_feed(&entries(), &[tab(1), tab(2)], 500, DEFAULT_FEED_LIMIT);
        let by_id = |id: &str| {
            feed.iter()
                .find(|e| e.vector_id.to_string() == id)
                .expect("entry")
        };
        assert_eq!(by_id("tab_1").deletable_id().as_deref(), Some("tab_1"));
        assert_eq!(by_id("tab_2").deletable_id(), None);
        assert_eq!(by_id("tab_2").status_line(), "Not sent to Pinecone");
        assert_eq!(by_id("reddit_200_save").deletable_id(), None);
        assert_eq!(by_id("reddit_200_save").status_line(), "gone");
    }

    #[test]
    fn respects_limit() {
        let feed = activity_feed(&entries(), &[tab(1), tab(2)], 500, 2);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].timestamp, 300);
    }

    #[test]
    fn lists_known_tabs() {
        let tabs = known_tabs(&entries());
        let ids: Vec<_> = tabs.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(tabs[0].title, None);
        assert_eq!(tabs[1].title.as_deref(), Some("Docs"));
        assert_eq!(tabs[1].url.as_deref(), Some("https://docs.rs/"));
    }

    #[test]
    fn same_kind_actions_use_their_own_timestamps() {
        let mut entries = Entries::new();
        entries.insert(
            "reddit_event_50".into(),
            json!({
                "isApiRequest": true,
                "url": "https://www.reddit.com/svc/shreddit/events",
                "method": "POST",
                "payload": {"info": [
                    {"noun": "upvote", "post": {"url": "/a"}},
                    {"noun": "screen", "post": {"nsfw": "false"}},
                    {"noun": "upvote", "post": {"url": "/b"}}
                ]},
                "timestamp": 50,
                "actionTimestamps": [50, 51]
            }),
        );
        entries.insert(
            "reddit_51_upvote_pinecone_status".into(),
            json!({"success": true, "message": "Successfully sent to Pinecone", "timestamp": 51}),
        );
        let feed = activity_feed(&entries, &[], 100, DEFAULT_FEED_LIMIT);
        let ids: Vec<_> = feed.iter().map(|e| e.vector_id.to_string()).collect();
        assert_eq!(ids, vec!["reddit_51_upvote", "reddit_50_upvote"]);
        assert_eq!(feed[0].deletable_id().as_deref(), Some("reddit_51_upvote"));
        assert_eq!(feed[1].status, None);
    }
}
