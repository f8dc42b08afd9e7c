//! Loads the documents of a local folder (plain text, markdown, PDF, Word)
//! into [`ContentUnit`]s.
//!
//! Each file yields at most one unit. A file that cannot be read or parsed is
//! logged and skipped; it never aborts a load.


use anyhow::{Context, Result, anyhow};
use pulldown_cmark::{Event, Parser, TagEnd};
use quick_xml::events::Event as XmlEvent;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::content::{ContentMetadata, ContentType, ContentUnit, DEFAULT_MIN_CONTENT_LENGTH};

/// File extensions the loader knows how to read
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "txt", "md"];

/// Upper bound on the decompressed size of `word/document.xml`
const MAX_DOCUMENT_XML_BYTES: u64 = 50 * 1024 * 1024;

/// File counts of a context folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    pub total_files: usize,
    /// Count per lowercase extension, including the leading dot
    pub by_extension: BTreeMap<String, usize>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentLoader {
    context_dir: PathBuf,
    min_content_length: usize,
}

impl DocumentLoader {
    #[inline]
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            min_content_length: DEFAULT_MIN_CONTENT_LENGTH,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_min_content_length(mut self, min_content_length: usize) -> Self {
        self.min_content_length = min_content_length;
        self
    }

    #[inline]
    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }

    /// Load every supported file of the context folder, in file name order
    #[inline]
    pub fn load_all(&self) -> Vec<ContentUnit> {
        let files = match self.supported_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    "Cannot read context folder {}: {:#}",
                    self.context_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut units = Vec::new();
        for path in files {
            info!("Loading document: {}", path.display());
            units.extend(self.load_file(&path));
        }

        info!(
            "Loaded {} documents from {}",
            units.len(),
            self.context_dir.display()
        );
        units
    }

    /// Load a single file, dispatching on its extension
    #[inline]
    pub fn load_file(&self, path: &Path) -> Vec<ContentUnit> {
        let Some(content_type) = content_type_for(path) else {
            warn!("Unsupported file type: {}", path.display());
            return Vec::new();
        };

        let text = match read_text(path, content_type) {
            Ok(text) => text,
            Err(e) => {
                error!("Error reading {} file {}: {:#}", content_type, path.display(), e);
                return Vec::new();
            }
        };

        let mut metadata = ContentMetadata::new(path.display().to_string(), content_type);
        if let Some(name) = path.file_name() {
            let name = name.to_string_lossy();
            metadata = metadata.with_filename(name.as_ref()).with_title(name.as_ref());
        }

        match ContentUnit::new(&text, metadata, self.min_content_length) {
            Some(unit) => vec![unit],
            None => {
                debug!("Skipping {}: not enough text", path.display());
                Vec::new()
            }
        }
    }

    /// Count the supported files of the context folder
    #[inline]
    pub fn stats(&self) -> LoaderStats {
        let mut stats = LoaderStats::default();
        let Ok(files) = self.supported_files() else {
            return stats;
        };

        for path in files {
            let extension = format!(".{}", lowercase_extension(&path).unwrap_or_default());
            stats.total_files += 1;
            *stats.by_extension.entry(extension).or_default() += 1;
            if let Some(name) = path.file_name() {
                stats.files.push(name.to_string_lossy().into_owned());
            }
        }

        stats
    }

    fn supported_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.context_dir)
            .with_context(|| format!("Failed to list {}", self.context_dir.display()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                lowercase_extension(path)
                    .is_some_and(|extension| SUPPORTED_EXTENSIONS.contains(&extension.as_str()))
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
}

fn content_type_for(path: &Path) -> Option<ContentType> {
    match lowercase_extension(path)?.as_str() {
        "txt" => Some(ContentType::Text),
        "md" => Some(ContentType::Markdown),
        "pdf" => Some(ContentType::Pdf),
        // Legacy .doc files go to the Word reader too and fail there
        "docx" | "doc" => Some(ContentType::Docx),
        _ => None,
    }
}

fn read_text(path: &Path, content_type: ContentType) -> Result<String> {
    match content_type {
        ContentType::Text => {
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
        }
        ContentType::Markdown => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(markdown_to_text(&source))
        }
        ContentType::Pdf => {
            let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| anyhow!("PDF extraction failed: {}", e))
        }
        ContentType::Docx => {
            let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            docx_to_text(&bytes)
        }
        ContentType::Website => Err(anyhow!("Website content cannot be loaded from a file")),
    }
}

/// Render markdown as plain text, one block per line
pub(crate) fn markdown_to_text(source: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(source) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::TableRow
                | TagEnd::BlockQuote(_),
            ) => out.push('\n'),
            Event::End(TagEnd::TableCell) => out.push(' '),
            _ => {}
        }
    }

    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the run text of a Word document, one paragraph per line
pub(crate) fn docx_to_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("Not a Word document")?;
    let entry = archive
        .by_name("word/document.xml")
        .context("word/document.xml not found")?;

    let mut xml = Vec::new();
    entry
        .take(MAX_DOCUMENT_XML_BYTES)
        .read_to_end(&mut xml)
        .context("Failed to read word/document.xml")?;
    if xml.len() as u64 >= MAX_DOCUMENT_XML_BYTES {
        return Err(anyhow!("word/document.xml exceeds size limit"));
    }

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut in_text = false;
    let mut out = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(XmlEvent::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(XmlEvent::Text(text)) if in_text => {
                let text = text.unescape().context("Invalid text in word/document.xml")?;
                out.push_str(&text);
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(anyhow!("Malformed word/document.xml: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(out
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}
