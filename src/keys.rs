//! Storage key conventions shared with the browser-side recorder.

use std::fmt;

use crate::reddit::ActionKind;

/// Flag controlling whether vectors are sent to the index.
pub const ENABLED_KEY: &str = "pineconeEnabled";

const STATUS_SUFFIX: &str = "_pinecone_status";

/// Identifier of a vector in the remote index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VectorId {
    /// `tab_<tabId>`
    Tab(u64),
    /// `reddit_<epoch ms>_<action>`
    Reddit {
        /// Capture time.
        timestamp: u64,
        /// Recorded action.
        action: ActionKind,
    },
}

impl VectorId {
    /// Parses an id produced by [`VectorId`]'s `Display` impl.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(id) = raw.strip_prefix("tab_") {
            return id.parse().ok().map(Self::Tab);
        }
        let rest = raw.strip_prefix("reddit_")?;
        let (timestamp, action) = rest.split_once('_')?;
        Some(Self::Reddit {
            timestamp: timestamp.parse().ok()?,
            action: ActionKind::parse(action)?,
        })
    }

    /// Key holding the last upsert/delete outcome for this vector.
    pub fn status_key(&self) -> String {
        format!("{self}{STATUS_SUFFIX}")
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tab(id) => write!(f, "tab_{id}"),
            Self::Reddit { timestamp, action } => {
                write!(f, "reddit_{timestamp}_{}", action.as_str())
            }
        }
    }
}

/// Parsed form of any key the recorder writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKey {
    /// `tab_<tabId>_access`: last activation time.
    TabAccess(u64),
    /// `tab_<tabId>_info`: last known title and URL.
    TabInfo(u64),
    /// `<vector id>_pinecone_status`
    Status(VectorId),
    /// `reddit_event_<epoch ms>`: captured request.
    RedditRequest(u64),
    /// [`ENABLED_KEY`]
    Enabled,
}

impl StorageKey {
    /// Classifies a raw key; unknown keys return `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == ENABLED_KEY {
            return Some(Self::Enabled);
        }
        if let Some(id) = raw.strip_suffix(STATUS_SUFFIX) {
            return VectorId::parse(id).map(Self::Status);
        }
        if let Some(ts) = raw.strip_prefix("reddit_event_") {
            return ts.parse().ok().map(Self::RedditRequest);
        }
        let tab = raw.strip_prefix("tab_")?;
        if let Some(id) = tab.strip_suffix("_info") {
            return id.parse().ok().map(Self::TabInfo);
        }
        tab.strip_suffix("_access")?.parse().ok().map(Self::TabAccess)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TabAccess(id) => write!(f, "tab_{id}_access"),
            Self::TabInfo(id) => write!(f, "tab_{id}_info"),
            Self::Status(id) => write!(f, "{id}{STATUS_SUFFIX}"),
            Self::RedditRequest(ts) => write!(f, "reddit_event_{ts}"),
            Self::Enabled => f.write_str(ENABLED_KEY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_extension_keys() {
        assert_eq!(StorageKey::TabAccess(7).to_string(), "tab_7_access");
        assert_eq!(StorageKey::RedditRequest(42).to_string(), "reddit_event_42");
        assert_eq!(
            VectorId::Reddit {
                timestamp: 42,
                action: ActionKind::Upvote
            }
            .status_key(),
            "reddit_42_upvote_pinecone_status"
        );
        assert_eq!(VectorId::Tab(3).status_key(), "tab_3_pinecone_status");
    }

    #[test]
    fn parses_what_it_renders() {
        for key in [
            StorageKey::TabAccess(11),
            StorageKey::TabInfo(11),
            StorageKey::Status(VectorId::Tab(11)),
            StorageKey::Status(VectorId::Reddit {
                timestamp: 1_700_000_000_000,
                action: ActionKind::Save,
            }),
            StorageKey::RedditRequest(5),
            StorageKey::Enabled,
        ] {
            assert_eq!(StorageKey::parse(&key.to_string()), Some(key));
        }
    }

    #[test]
    fn rejects_foreign_keys() {
        assert_eq!(StorageKey::parse("tab_x_access"), None);
        assert_eq!(StorageKey::parse("reddit_1_comment_pinecone_status"), None);
        assert_eq!(StorageKey::parse("settings"), None);
    }
}
