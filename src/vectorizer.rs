//! Hashed bag-of-words feature vectors used as placeholder embeddings.
//!
//! Vectors produced here are upserted into the remote index and later compared with cosine
//! similarity, so the hash, bucketing and normalization rules are part of the persisted format:
//! changing them invalidates every vector already stored.

use serde::{Deserialize, Serialize};

/// Dimension used by the hosted index unless configured otherwise.
pub const DEFAULT_DIMENSION: usize = 1024;

/// Component value returned for documents without any tokens.
pub const FALLBACK_COMPONENT: f64 = 0.1;

/// Free-text fields scraped from a page or assembled from a captured event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFields {
    /// Page or post title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Meta description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Heading text joined with spaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headings: Option<String>,
    /// Leading excerpt of the body text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl DocumentFields {
    /// Document carrying only a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Present fields in vectorization order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        [&self.title, &self.description, &self.headings, &self.body]
            .into_iter()
            .map(|field| field.as_deref().unwrap_or(""))
    }

    /// True when every field is absent or empty.
    pub fn is_blank(&self) -> bool {
        self.fields().all(str::is_empty)
    }

    /// Fields joined with single spaces, missing fields contributing empty strings.
    pub fn joined_text(&self) -> String {
        self.fields().collect::<Vec<_>>().join(" ")
    }
}

/// Which characters count as part of a word when tokenizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenBoundary {
    /// `[A-Za-z0-9_]`; every other character separates tokens. Matches previously stored vectors.
    #[default]
    Ascii,
    /// Unicode alphanumerics and `_` are word characters, so non-ASCII words yield tokens.
    Unicode,
}

impl TokenBoundary {
    fn is_word_char(self, ch: char) -> bool {
        match self {
            Self::Ascii => ch.is_ascii_alphanumeric() || ch == '_',
            Self::Unicode => ch.is_alphanumeric() || ch == '_',
        }
    }
}

/// Vectorizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorizerConfig {
    /// Output length.
    pub dimension: usize,
    /// Tokenizer word boundary rule.
    pub boundary: TokenBoundary,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            boundary: TokenBoundary::Ascii,
        }
    }
}

impl VectorizerConfig {
    /// ASCII-boundary config with the given dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }
}

/// Stateless feature hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vectorizer {
    config: VectorizerConfig,
}

impl Vectorizer {
    /// Builds a vectorizer from the provided settings.
    pub fn new(config: VectorizerConfig) -> Self {
        Self { config }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &VectorizerConfig {
        &self.config
    }

    /// Configured output length.
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Maps a document to an L2-normalized vector of the configured dimension.
    pub fn vectorize(&self, document: &DocumentFields) -> Vec<f64> {
        let dimension = self.config.dimension;
        if dimension == 0 {
            return Vec::new();
        }
        if document.is_blank() {
            return fallback_vector(dimension);
        }

        let text = document.joined_text().to_lowercase();
        let mut buckets = vec![0.0f64; dimension];
        for token in tokenize(&text, self.config.boundary) {
            let bucket = rolling_hash(token).unsigned_abs() as usize % dimension;
            buckets[bucket] += 1.0;
        }

        let norm = buckets.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            return fallback_vector(dimension);
        }
        for value in buckets.iter_mut() {
            *value /= norm;
        }
        buckets
    }

    /// Vectorizes free text as if it were a document title.
    pub fn vectorize_text(&self, text: &str) -> Vec<f64> {
        self.vectorize(&DocumentFields::titled(text))
    }
}

/// Vectorizes `document` with ASCII word boundaries.
pub fn vectorize(document: &DocumentFields, dimension: usize) -> Vec<f64> {
    Vectorizer::new(VectorizerConfig::with_dimension(dimension)).vectorize(document)
}

/// Splits lowercase text on runs of non-word characters, skipping empty tokens.
pub fn tokenize(text: &str, boundary: TokenBoundary) -> impl Iterator<Item = &str> {
    text.split(move |ch: char| !boundary.is_word_char(ch))
        .filter(|token| !token.is_empty())
}

/// 32-bit multiply-by-31 string hash over code points, wrapping on overflow.
pub fn rolling_hash(token: &str) -> i32 {
    token.chars().fold(0i32, |hash, ch| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(ch as i32)
    })
}

fn fallback_vector(dimension: usize) -> Vec<f64> {
    vec![FALLBACK_COMPONENT; dimension]
}

/// Cosine similarity; zero when lengths differ or either side has no magnitude.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
