//! Page scraping that turns HTML into vectorizer input.

use std::borrow::Cow;
use std::fmt;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::vectorizer::DocumentFields;

/// Scraping knobs.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeConfig {
    /// Maximum characters kept from the body text.
    pub body_excerpt_chars: usize,
    /// Deepest heading level collected (1-6).
    pub max_heading_level: u8,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            body_excerpt_chars: 2000,
            max_heading_level: 3,
        }
    }
}

/// Errors surfaced while scraping a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    /// The response body was empty.
    EmptyBody,
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBody => write!(f, "no body bytes available for scraping"),
        }
    }
}

impl std::error::Error for ScrapeError {}

/// Text fields pulled out of a single HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDocument {
    /// `<title>` text.
    pub title: Option<String>,
    /// Meta description, falling back to `og:description`.
    pub description: Option<String>,
    /// Heading texts in document order.
    pub headings: Vec<String>,
    /// Collapsed body text truncated to the configured excerpt length.
    pub body_excerpt: Option<String>,
}

impl PageDocument {
    /// Scrapes an HTML string.
    pub fn parse(html: &str, config: &ScrapeConfig) -> Self {
        let selectors = PageSelectors::new();
        let document = Html::parse_document(html);

        let title = document
            .select(&selectors.title)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|text| !text.is_empty());

        let description = meta_content(&document, &selectors.description)
            .or_else(|| meta_content(&document, &selectors.og_description));

        let max_level = config.max_heading_level.clamp(1, 6);
        let headings = document
            .select(&selectors.headings)
            .filter(|el| heading_level(el.value().name()).is_some_and(|level| level <= max_level))
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|text| !text.is_empty())
            .collect();

        let root = selectors.pick_root(&document);
        let mut raw = String::new();
        collect_visible_text(root, &mut raw);
        let body = collapse_whitespace(&raw);
        let body_excerpt = truncate_chars(&body, config.body_excerpt_chars);
        let body_excerpt = (!body_excerpt.is_empty()).then(|| body_excerpt.into_owned());

        Self {
            title,
            description,
            headings,
            body_excerpt,
        }
    }

    /// Scrapes raw response bytes, decoding lossily when they are not valid UTF-8.
    pub fn parse_bytes(bytes: &[u8], config: &ScrapeConfig) -> Result<Self, ScrapeError> {
        if bytes.is_empty() {
            return Err(ScrapeError::EmptyBody);
        }
        let decoded = match std::str::from_utf8(bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(_) => Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
        };
        Ok(Self::parse(&decoded, config))
    }

    /// Converts the scrape into vectorizer fields.
    pub fn to_fields(&self) -> DocumentFields {
        let headings = self.headings.join(" ");
        DocumentFields {
            title: self.title.clone(),
            description: self.description.clone(),
            headings: (!headings.is_empty()).then_some(headings),
            body: self.body_excerpt.clone(),
        }
    }
}

/// Downloads `url` and scrapes the response body.
pub fn fetch_page(client: &Client, url: &Url, config: &ScrapeConfig) -> Result<PageDocument> {
    let response = client
        .get(url.as_str())
        .send()
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("{url} returned an error status"))?;
    let bytes = response
        .bytes()
        .with_context(|| format!("failed to read body of {url}"))?;
    debug!(%url, bytes = bytes.len(), "fetched page");
    Ok(PageDocument::parse_bytes(&bytes, config)?)
}

struct PageSelectors {
    title: Selector,
    description: Selector,
    og_description: Selector,
    headings: Selector,
    article: Selector,
    main: Selector,
    body: Selector,
}

impl PageSelectors {
    fn new() -> Self {
        Self {
            title: Selector::parse("title").expect("title selector"),
            description: Selector::parse(r#"meta[name="description"]"#)
                .expect("description selector"),
            og_description: Selector::parse(r#"meta[property="og:description"]"#)
                .expect("og:description selector"),
            headings: Selector::parse("h1, h2, h3, h4, h5, h6").expect("heading selector"),
            article: Selector::parse("article").expect("article selector"),
            main: Selector::parse("main").expect("main selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    fn pick_root<'a>(&self, document: &'a Html) -> ElementRef<'a> {
        document
            .select(&self.article)
            .next()
            .or_else(|| document.select(&self.main).next())
            .or_else(|| document.select(&self.body).next())
            .unwrap_or_else(|| document.root_element())
    }
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .find(|content| !content.is_empty())
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn is_hidden(tag: &str) -> bool {
    matches!(
        tag,
        "script" | "style" | "template" | "noscript" | "svg" | "nav"
    )
}

fn collect_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if !is_hidden(child_el.value().name()) {
                collect_visible_text(child_el, out);
            }
        }
    }
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(text[..idx].trim_end().to_string()),
        None => Cow::Borrowed(text),
    }
}
