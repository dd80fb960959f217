//! Reddit `svc/shreddit/events` request capture.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::vectorizer::DocumentFields;

/// URL prefix of the telemetry endpoint that carries vote and save events.
pub const EVENTS_ENDPOINT: &str = "https://www.reddit.com/svc/shreddit/events";

/// Subreddit name used when no event in the batch carries one.
pub const UNKNOWN_SUBREDDIT: &str = "unknown";

/// Returns true when `url` targets the Reddit events endpoint.
pub fn is_events_endpoint(url: &str) -> bool {
    url.contains(EVENTS_ENDPOINT)
}

/// Subreddit reference attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subreddit {
    /// Subreddit name without the `r/` prefix.
    #[serde(default)]
    pub name: Option<String>,
}

/// Post reference attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedditPost {
    /// Post permalink.
    #[serde(default)]
    pub url: Option<String>,
    /// Post title.
    #[serde(default)]
    pub title: Option<String>,
    /// Whether the post is marked NSFW.
    #[serde(default)]
    pub nsfw: Option<bool>,
}

/// Request context attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRequest {
    /// Canonical URL of the page the event fired on.
    #[serde(default)]
    pub canonical_url: Option<String>,
}

/// One entry of the `info` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedditEvent {
    /// Interaction kind, e.g. `click`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Interaction target, e.g. `upvote`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noun: Option<String>,
    /// Subreddit the event fired in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<Subreddit>,
    /// Post the event targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<RedditPost>,
    /// Page context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<EventRequest>,
    /// Remaining fields are preserved untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// User action recorded from an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Post saved.
    Save,
    /// Post upvoted.
    Upvote,
    /// Post downvoted.
    Downvote,
}

impl ActionKind {
    /// Lowercase name used in vector ids and storage keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
        }
    }

    /// Parses the lowercase name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "save" => Some(Self::Save),
            "upvote" => Some(Self::Upvote),
            "downvote" => Some(Self::Downvote),
            _ => None,
        }
    }
}

impl RedditEvent {
    /// Action this event represents, or `None` when it is not a save or vote.
    pub fn action_kind(&self) -> Option<ActionKind> {
        ActionKind::parse(self.noun.as_deref()?)
    }

    fn subreddit_name(&self) -> Option<&str> {
        self.subreddit
            .as_ref()
            .and_then(|sub| sub.name.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// Post URL, if present.
    pub fn post_url(&self) -> Option<&str> {
        self.post.as_ref().and_then(|post| post.url.as_deref())
    }

    /// Post title, if present.
    pub fn post_title(&self) -> Option<&str> {
        self.post.as_ref().and_then(|post| post.title.as_deref())
    }

    /// NSFW flag, defaulting to false.
    pub fn is_nsfw(&self) -> bool {
        self.post
            .as_ref()
            .and_then(|post| post.nsfw)
            .unwrap_or(false)
    }

    /// Canonical URL from the request context.
    pub fn canonical_url(&self) -> Option<&str> {
        self.request
            .as_ref()
            .and_then(|req| req.canonical_url.as_deref())
    }
}

/// Decoded body of an events request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Events reported by the page; entries that do not fit [`RedditEvent`] are dropped.
    #[serde(default, deserialize_with = "lenient_events")]
    pub info: Vec<RedditEvent>,
    /// Envelope fields other than `info`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn lenient_events<'de, D>(deserializer: D) -> Result<Vec<RedditEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!(index, "skipping malformed reddit event: {err}");
                None
            }
        })
        .collect())
}

/// Request body as captured: parsed JSON when possible, otherwise the raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedBody {
    /// JSON with an `info` event array.
    Events {
        /// Events that parsed.
        batch: EventBatch,
        /// Body exactly as sent.
        payload: Value,
    },
    /// Any other JSON document.
    Json(Value),
    /// Body that did not parse as JSON.
    Raw(String),
}

impl CapturedBody {
    /// Decodes raw request bytes.
    pub fn decode(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            return Self::Raw(text.into_owned());
        };
        if value.get("info").is_some_and(Value::is_array) {
            if let Ok(batch) = serde_json::from_value::<EventBatch>(value.clone()) {
                return Self::Events {
                    batch,
                    payload: value,
                };
            }
        }
        Self::Json(value)
    }

    /// JSON form stored as the request payload.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Events { payload, .. } | Self::Json(payload) => payload.clone(),
            Self::Raw(text) => Value::String(text.clone()),
        }
    }

    /// Event batch, when the body carried one.
    pub fn events(&self) -> Option<&EventBatch> {
        match self {
            Self::Events { batch, .. } => Some(batch),
            _ => None,
        }
    }
}

/// A save or vote ready to be vectorized and upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct RedditAction {
    /// Save, upvote or downvote.
    pub kind: ActionKind,
    /// Resolved subreddit name.
    pub subreddit: String,
    /// Post permalink.
    pub post_url: Option<String>,
    /// Canonical page URL from the request context.
    pub canonical_url: Option<String>,
    /// Post title.
    pub title: Option<String>,
    /// NSFW flag.
    pub nsfw: bool,
}

impl RedditAction {
    /// Canonical URL, falling back to the post URL.
    pub fn effective_url(&self) -> Option<&str> {
        self.canonical_url.as_deref().or(self.post_url.as_deref())
    }

    /// Vectorizer input for the action.
    pub fn to_fields(&self) -> DocumentFields {
        DocumentFields {
            title: self.title.clone(),
            description: Some(format!("r/{}", self.subreddit)),
            headings: None,
            body: None,
        }
    }
}

impl EventBatch {
    /// Parses an events body, returning `None` when it is not JSON with an `info` array.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match CapturedBody::decode(bytes) {
            CapturedBody::Events { batch, .. } => Some(batch),
            _ => None,
        }
    }

    /// First subreddit name carried by any event in the batch.
    pub fn batch_subreddit(&self) -> Option<&str> {
        self.info.iter().find_map(RedditEvent::subreddit_name)
    }

    /// Events that record a save, upvote or downvote.
    pub fn relevant_events(&self) -> impl Iterator<Item = &RedditEvent> {
        self.info
            .iter()
            .filter(|event| event.action_kind().is_some())
    }

    /// Relevant events resolved into actions.
    pub fn actions(&self) -> Vec<RedditAction> {
        let fallback = self.batch_subreddit();
        self.info
            .iter()
            .filter_map(|event| {
                let kind = event.action_kind()?;
                let subreddit = event
                    .subreddit_name()
                    .or(fallback)
                    .unwrap_or(UNKNOWN_SUBREDDIT)
                    .to_string();
                Some(RedditAction {
                    kind,
                    subreddit,
                    post_url: event.post_url().map(str::to_string),
                    canonical_url: event.canonical_url().map(str::to_string),
                    title: event.post_title().map(str::to_string),
                    nsfw: event.is_nsfw(),
                })
            })
            .collect()
    }
}
