//! Normalized text units shared by the ingestion side (crawler, document
//! loader) and the index store.


use serde::{Deserialize, Serialize};

/// Units shorter than this many characters carry too little text to be worth
/// indexing.
pub const DEFAULT_MIN_CONTENT_LENGTH: usize = 50;

/// Metadata fields that can be used as exact-match search filters.
pub const FILTERABLE_FIELDS: &[&str] = &[
    "source",
    "title",
    "description",
    "url",
    "content_type",
    "filename",
];

/// Where a unit's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Website,
    Text,
    Markdown,
    Pdf,
    Docx,
}

impl ContentType {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Website => "website",
            ContentType::Text => "text",
            ContentType::Markdown => "markdown",
            ContentType::Pdf => "pdf",
            ContentType::Docx => "docx",
        }
    }

    #[inline]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "website" => Some(ContentType::Website),
            "text" => Some(ContentType::Text),
            "markdown" => Some(ContentType::Markdown),
            "pdf" => Some(ContentType::Pdf),
            "docx" => Some(ContentType::Docx),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata carried alongside a unit's text into the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Origin of the unit: `"website"` for crawled pages, the file path for documents
    pub source: String,
    pub title: String,
    pub description: String,
    /// Page URL for crawled content
    pub url: Option<String>,
    /// File name for loaded documents
    pub filename: Option<String>,
    pub content_type: ContentType,
    /// Length of the text in characters
    pub length: usize,
}

impl ContentMetadata {
    #[inline]
    pub fn new(source: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            source: source.into(),
            title: String::new(),
            description: String::new(),
            url: None,
            filename: None,
            content_type,
            length: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Look up a filterable field by name
    #[inline]
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "source" => Some(self.source.clone()),
            "title" => Some(self.title.clone()),
            "description" => Some(self.description.clone()),
            "url" => self.url.clone(),
            "filename" => self.filename.clone(),
            "content_type" => Some(self.content_type.as_str().to_string()),
            _ => None,
        }
    }
}

/// Normalized text plus metadata, ready to be embedded and indexed.
///
/// A unit always has non-empty text of at least the minimum length it was
/// built with; construction through [`ContentUnit::new`] enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub text: String,
    pub metadata: ContentMetadata,
}

impl ContentUnit {
    /// Build a unit, or `None` when the trimmed text is shorter than `min_length`
    /// characters (or empty).
    #[inline]
    pub fn new(text: &str, mut metadata: ContentMetadata, min_length: usize) -> Option<Self> {
        let text = text.trim();
        let length = text.chars().count();
        if length == 0 || length < min_length {
            return None;
        }

        metadata.length = length;
        Some(Self {
            text: text.to_string(),
            metadata,
        })
    }
}
