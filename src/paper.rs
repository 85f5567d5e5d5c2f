//! Domain types shared by every pipeline stage.
//!
//! Only [`PaperMetadata`] and the two halves of [`TableInfo`] are persisted
//! as-is. [`PaperAnalysis`] is always composed on read from its parts, and
//! [`PaperContent`] is recomputed on every analysis run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bibliographic source a paper identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSource {
    PubMed,
}

impl fmt::Display for PaperSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaperSource::PubMed => f.write_str("pubmed"),
        }
    }
}

/// Canonical (source, id) pair resolved from a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaperIdentifier {
    /// Source-native id, e.g. the PubMed PMID.
    pub id: String,
    /// The URL the identifier was resolved from.
    pub url: String,
    pub source: PaperSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: String,
}

/// Text extracted from a stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperContent {
    pub title: String,
    pub abstract_text: String,
    /// One entry per page, in document order (page N at index N-1).
    pub page_contents: Vec<String>,
}

impl PaperContent {
    /// Join every page under a 1-based `Page N:` label.
    pub fn page_labeled_text(&self) -> String {
        let mut out = String::new();
        for (index, page) in self.page_contents.iter().enumerate() {
            out.push_str(&format!("\nPage {}:\n{}\n", index + 1, page));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub description: String,
    pub csv_content: String,
    pub footnotes: String,
}

/// Full analysis of one paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperAnalysis {
    pub paper_id: String,
    pub metadata: PaperMetadata,
    pub summary: String,
    pub main_table: Option<TableInfo>,
}

/// A rendered page preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_labels_follow_document_order() {
        let content = PaperContent {
            title: "T".into(),
            abstract_text: "A".into(),
            page_contents: vec!["alpha".into(), "beta".into(), "gamma".into()],
        };
        let text = content.page_labeled_text();
        let p1 = text.find("Page 1:\nalpha").unwrap();
        let p2 = text.find("Page 2:\nbeta").unwrap();
        let p3 = text.find("Page 3:\ngamma").unwrap();
        assert!(p1 < p2 && p2 < p3);
    }

    #[test]
    fn metadata_serialises_abstract_field_name() {
        let meta = PaperMetadata {
            id: "1".into(),
            title: "t".into(),
            abstract_text: "a".into(),
            url: "u".into(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["abstract"], "a");
        let back: PaperMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn source_display_is_lowercase() {
        assert_eq!(PaperSource::PubMed.to_string(), "pubmed");
        assert_eq!(
            serde_json::to_string(&PaperSource::PubMed).unwrap(),
            "\"pubmed\""
        );
    }
}
