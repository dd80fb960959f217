use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use donna::config::{init_logging, PineconeArgs, StoreArgs, VectorizerArgs};
use donna::feed::known_tabs;
use donna::page::fetch_page;
use donna::pinecone::Metadata;
use donna::recorder::system_now_ms;
use donna::vectorizer::cosine_similarity;
use donna::{
    activity_feed, Activity, FileStore, KeyValueStore, PineconeClient, QueryRequest, Recorder,
    TabChange, TabSnapshot, TabUpdate, VectorRecord, Vectorizer, DEFAULT_FEED_LIMIT,
};
use reqwest::blocking::Client;
use serde_json::json;
use tracing::info;
use url::Url;

const USER_AGENT: &str = concat!("donna/", env!("CARGO_PKG_VERSION"));

#[derive(Parser, Debug)]
#[command(
    name = "donna",
    about = "Record browsing activity and keep a Pinecone index of what you read"
)]
struct DonnaCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print index details from the control plane
    Describe {
        /// Index name
        #[arg(long, env = "PINECONE_INDEX", default_value = "prototype")]
        index: String,
        #[command(flatten)]
        pinecone: PineconeArgs,
    },
    /// Upsert two constant test vectors and query them back
    SmokeTest {
        #[command(flatten)]
        pinecone: PineconeArgs,
        #[command(flatten)]
        vectorizer: VectorizerArgs,
    },
    /// Fetch a page, record the visit and send its vector
    Visit {
        /// Page URL
        url: Url,
        /// Browser tab id the visit belongs to
        #[arg(long)]
        tab_id: u64,
        #[command(flatten)]
        pinecone: PineconeArgs,
        #[command(flatten)]
        vectorizer: VectorizerArgs,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Record a captured Reddit events request body
    Capture {
        /// File holding the raw request body
        body: PathBuf,
        /// Request URL
        #[arg(long, default_value = "https://www.reddit.com/svc/shreddit/events")]
        url: String,
        /// Request method
        #[arg(long, default_value = "POST")]
        method: String,
        #[command(flatten)]
        pinecone: PineconeArgs,
        #[command(flatten)]
        vectorizer: VectorizerArgs,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Delete a vector by id (e.g. tab_12 or reddit_1700000000000_upvote)
    Delete {
        /// Vector id
        id: String,
        #[command(flatten)]
        pinecone: PineconeArgs,
        #[command(flatten)]
        vectorizer: VectorizerArgs,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Turn forwarding to Pinecone on or off
    Toggle {
        /// on or off
        #[arg(value_parser = parse_switch, action = clap::ArgAction::Set)]
        state: bool,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Show recent activity, newest first
    Feed {
        /// Maximum entries shown
        #[arg(long, default_value_t = DEFAULT_FEED_LIMIT)]
        limit: usize,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Vectorize free text and print the nearest stored activity
    Query {
        /// Text to search for
        text: String,
        /// Number of matches
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        #[command(flatten)]
        pinecone: PineconeArgs,
        #[command(flatten)]
        vectorizer: VectorizerArgs,
    },
}

fn main() -> Result<()> {
    init_logging();
    match DonnaCli::parse().command {
        Command::Describe { index, pinecone } => {
            let client = pinecone.client(1)?;
            let description = client.describe_index(&index)?;
            println!(
                "{} (dimension {}, metric {}) at {}",
                description.name,
                description.dimension,
                description.metric.as_deref().unwrap_or("unknown"),
                description.host
            );
        }
        Command::SmokeTest {
            pinecone,
            vectorizer,
        } => smoke_test(&pinecone.client(vectorizer.dimension)?)?,
        Command::Visit {
            url,
            tab_id,
            pinecone,
            vectorizer,
            store,
        } => {
            let http = Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(pinecone.timeout_secs.max(1)))
                .build()
                .context("failed to build page HTTP client")?;
            let page = fetch_page(&http, &url, &vectorizer.scrape_config())?;
            let tab = TabSnapshot {
                id: tab_id,
                window_id: None,
                title: page.title.clone(),
                url: Some(url.to_string()),
            };
            let recorder = recorder(&store, &pinecone, &vectorizer)?;
            let update = recorder.tab_updated(&tab, &TabChange::complete(), Some(&page.to_fields()))?;
            match update {
                TabUpdate::Recorded { status: Some(status) } => println!("{}", status.message),
                TabUpdate::Recorded { status: None } => println!("Pinecone integration is disabled"),
                TabUpdate::Ignored => {}
            }
        }
        Command::Capture {
            body,
            url,
            method,
            pinecone,
            vectorizer,
            store,
        } => {
            let bytes = std::fs::read(&body).with_context(|| format!("failed to read {:?}", body))?;
            let recorder = recorder(&store, &pinecone, &vectorizer)?;
            match recorder.reddit_request(&url, &method, Some(&bytes))? {
                Some(capture) => {
                    println!("stored {}", capture.request_key);
                    for (id, status) in capture.statuses {
                        println!("{id}: {}", status.message);
                    }
                }
                None => println!("{url} is not the Reddit events endpoint; nothing recorded"),
            }
        }
        Command::Delete {
            id,
            pinecone,
            vectorizer,
            store,
        } => {
            let recorder = recorder(&store, &pinecone, &vectorizer)?;
            let status = recorder.delete(&id)?;
            println!("{}", status.message);
        }
        Command::Toggle { state, store } => {
            let store = FileStore::open(&store.store)?;
            store.set(donna::keys::ENABLED_KEY, json!(state))?;
            println!("Pinecone forwarding {}", if state { "on" } else { "off" });
        }
        Command::Feed { limit, store } => print_feed(&FileStore::open(&store.store)?, limit)?,
        Command::Query {
            text,
            top_k,
            pinecone,
            vectorizer,
        } => {
            let client = pinecone.client(vectorizer.dimension)?;
            let values = Vectorizer::new(vectorizer.vectorizer_config()).vectorize_text(&text);
            let mut request = QueryRequest::new(values, top_k);
            request.include_values = true;
            let response = client.query(&request)?;
            for hit in response.matches {
                // Local cosine against the returned values, next to the index score.
                let local = cosine_similarity(&request.vector, &hit.values);
                let metadata = hit.metadata.unwrap_or_default();
                let label = metadata
                    .get("title")
                    .or_else(|| metadata.get("url"))
                    .and_then(|value| value.as_str())
                    .unwrap_or("");
                println!("{:.4} ({local:.4})  {}  {}", hit.score, hit.id, label);
            }
        }
    }
    Ok(())
}

fn recorder(
    store: &StoreArgs,
    pinecone: &PineconeArgs,
    vectorizer: &VectorizerArgs,
) -> Result<Recorder<FileStore, PineconeClient>> {
    let store = FileStore::open(&store.store)?;
    let client = pinecone.client(vectorizer.dimension)?;
    let recorder = Recorder::new(
        store,
        client,
        Vectorizer::new(vectorizer.vectorizer_config()),
    );
    let expired = recorder.expire_temporary()?;
    if expired > 0 {
        info!(expired, "cleared temporary statuses");
    }
    Ok(recorder)
}

fn smoke_test(client: &PineconeClient) -> Result<()> {
    let dimension = client.dimension();
    let records: Vec<VectorRecord> = [("test1", 0.1, "A"), ("test2", 0.2, "B")]
        .into_iter()
        .map(|(id, fill, category)| {
            let mut metadata = Metadata::new();
            metadata.insert("type".into(), json!("test"));
            metadata.insert("category".into(), json!(category));
            VectorRecord {
                id: id.to_string(),
                values: vec![fill; dimension],
                metadata,
            }
        })
        .collect();
    let upserted = client.upsert(&records)?;
    println!("upserted {upserted} vectors");

    let mut query = QueryRequest::new(vec![0.1; dimension], 2);
    query.include_values = true;
    query.filter = Some(json!({"type": {"$eq": "test"}}));
    let response = client.query(&query)?;
    for hit in &response.matches {
        println!("{}  score {:.4}", hit.id, hit.score);
    }
    Ok(())
}

fn print_feed(store: &FileStore, limit: usize) -> Result<()> {
    let entries = store.snapshot()?;
    let tabs = known_tabs(&entries);
    let feed = activity_feed(&entries, &tabs, system_now_ms(), limit);
    if feed.is_empty() {
        println!("No recorded activity.");
        return Ok(());
    }
    for entry in feed {
        let summary = match &entry.activity {
            Activity::Tab(tab) => format!(
                "tab {} {} {}",
                tab.id,
                tab.title.as_deref().unwrap_or("Untitled"),
                tab.url.as_deref().unwrap_or("")
            ),
            Activity::Reddit(action) => format!(
                "{} r/{} {}",
                action.kind.as_str().to_uppercase(),
                action.subreddit,
                action.effective_url().unwrap_or("")
            ),
        };
        let delete_hint = entry
            .deletable_id()
            .map(|id| format!(" [delete: {id}]"))
            .unwrap_or_default();
        println!(
            "{:>13}  {summary}  {}{delete_hint}",
            entry.timestamp,
            entry.status_line()
        );
    }
    Ok(())
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on or off, got {other}")),
    }
}
