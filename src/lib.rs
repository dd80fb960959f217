#![warn(missing_docs)]
//! Core library entry points for the donna activity recorder.

pub mod config;
pub mod feed;
pub mod keys;
pub mod page;
pub mod pinecone;
pub mod recorder;
pub mod records;
pub mod reddit;
pub mod store;
pub mod vectorizer;

pub use feed::{activity_feed, Activity, ActivityEntry, DEFAULT_FEED_LIMIT};
pub use keys::{StorageKey, VectorId};
pub use page::{PageDocument, ScrapeConfig};
pub use pinecone::{PineconeClient, QueryRequest, VectorRecord, VectorSink};
pub use recorder::{Recorder, TabUpdate};
pub use records::{ApiRequestRecord, TabChange, TabSnapshot, VectorStatus};
pub use reddit::{ActionKind, EventBatch, RedditAction};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError, StoreExt};
pub use vectorizer::{vectorize, DocumentFields, TokenBoundary, Vectorizer, VectorizerConfig};
