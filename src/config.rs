//! Command-line and environment configuration shared by binaries.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};

use crate::page::ScrapeConfig;
use crate::pinecone::PineconeClient;
use crate::vectorizer::{TokenBoundary, VectorizerConfig, DEFAULT_DIMENSION};

/// Tokenizer boundary selectable from the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum BoundaryArg {
    /// ASCII word characters only (compatible with stored vectors).
    Ascii,
    /// Unicode alphanumerics count as word characters.
    Unicode,
}

impl From<BoundaryArg> for TokenBoundary {
    fn from(arg: BoundaryArg) -> Self {
        match arg {
            BoundaryArg::Ascii => TokenBoundary::Ascii,
            BoundaryArg::Unicode => TokenBoundary::Unicode,
        }
    }
}

/// Vectorizer settings.
#[derive(Args, Debug, Clone)]
pub struct VectorizerArgs {
    /// Vector dimension; must match the index
    #[arg(long, env = "DONNA_DIMENSION", default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,

    /// Word boundary rule used when tokenizing
    #[arg(long, env = "DONNA_TOKEN_BOUNDARY", value_enum, default_value = "ascii")]
    pub boundary: BoundaryArg,

    /// Maximum characters of body text fed to the vectorizer
    #[arg(long, env = "DONNA_BODY_EXCERPT_CHARS", default_value_t = 2000)]
    pub body_excerpt_chars: usize,
}

impl VectorizerArgs {
    /// Converts into vectorizer settings.
    pub fn vectorizer_config(&self) -> VectorizerConfig {
        VectorizerConfig {
            dimension: self.dimension,
            boundary: self.boundary.into(),
        }
    }

    /// Converts into scrape settings.
    pub fn scrape_config(&self) -> ScrapeConfig {
        ScrapeConfig {
            body_excerpt_chars: self.body_excerpt_chars,
            ..ScrapeConfig::default()
        }
    }
}

/// Pinecone connection settings.
#[derive(Args, Debug, Clone)]
pub struct PineconeArgs {
    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Index data-plane host (e.g. prototype-abc123.svc.pinecone.io)
    #[arg(long, env = "PINECONE_HOST")]
    pub host: String,

    /// Max seconds to wait for each request
    #[arg(long, env = "PINECONE_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Attempts for rate limits or transient errors
    #[arg(long, env = "PINECONE_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: usize,
}

impl PineconeArgs {
    /// Builds a client for vectors of `dimension` values.
    pub fn client(&self, dimension: usize) -> Result<PineconeClient> {
        PineconeClient::new(
            &self.api_key,
            &self.host,
            dimension,
            Duration::from_secs(self.timeout_secs.max(1)),
            self.max_retries.max(1),
        )
    }
}

/// Location of the activity store.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// JSON file holding recorded activity
    #[arg(long, env = "DONNA_STORE", default_value = "donna-storage.json")]
    pub store: PathBuf,
}

/// Installs the `tracing` subscriber, honouring `RUST_LOG` and defaulting to `info`.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
