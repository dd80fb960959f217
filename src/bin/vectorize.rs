use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use donna::config::{init_logging, VectorizerArgs};
use donna::{DocumentFields, PageDocument, Vectorizer};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "donna-vectorize",
    about = "Turn documents or HTML pages into hashed bag-of-words vectors"
)]
struct VectorizeCli {
    /// JSONL of documents ({"id"?, "title"?, "description"?, "headings"?, "body"?}); stdin when omitted
    #[arg(long, conflicts_with = "html")]
    input: Option<PathBuf>,

    /// Scrape a single HTML file instead of reading JSONL
    #[arg(long)]
    html: Option<PathBuf>,

    /// Output JSONL path; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    vectorizer: VectorizerArgs,
}

#[derive(Deserialize)]
struct InputDocument {
    #[serde(default)]
    id: Option<String>,
    #[serde(flatten)]
    fields: DocumentFields,
}

#[derive(Serialize)]
struct OutputVector<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    values: &'a [f64],
}

fn main() -> Result<()> {
    init_logging();
    let cli = VectorizeCli::parse();
    let vectorizer = Vectorizer::new(cli.vectorizer.vectorizer_config());

    let mut writer: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    if let Some(path) = &cli.html {
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
        let page = PageDocument::parse_bytes(&bytes, &cli.vectorizer.scrape_config())?;
        let values = vectorizer.vectorize(&page.to_fields());
        write_vector(&mut writer, None, &values)?;
    } else {
        let reader: Box<dyn BufRead> = match &cli.input {
            Some(path) => Box::new(BufReader::new(
                File::open(path).with_context(|| format!("failed to open {:?}", path))?,
            )),
            None => Box::new(BufReader::new(io::stdin().lock())),
        };
        let written = process_stream(reader, &mut writer, &vectorizer)?;
        info!(written, dimension = vectorizer.dimension(), "vectorized documents");
    }
    writer.flush()?;
    Ok(())
}

fn process_stream<R: BufRead, W: Write>(
    reader: R,
    writer: &mut W,
    vectorizer: &Vectorizer,
) -> Result<usize> {
    let mut written = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: InputDocument = serde_json::from_str(&line)
            .with_context(|| format!("invalid document at line {}", line_no + 1))?;
        let values = vectorizer.vectorize(&doc.fields);
        write_vector(writer, doc.id.as_deref(), &values)?;
        written += 1;
    }
    Ok(written)
}

fn write_vector<W: Write>(writer: &mut W, id: Option<&str>, values: &[f64]) -> Result<()> {
    serde_json::to_writer(&mut *writer, &OutputVector { id, values })?;
    writer.write_all(b"\n")?;
    Ok(())
}
