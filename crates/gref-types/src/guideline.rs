//! Data model for the guideline document under refinement.
//!
//! The document is a named section tree whose leaves are prose entries.
//! Rendering and merging the prose is external; this module models only the
//! data the control loop sequences and the size estimate dashboards display.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One prose entry. Content is stored trimmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guideline {
    pub content: String,
}

impl Guideline {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into().trim().to_string(),
        }
    }
}

/// A child of a section: either a nested section or a leaf entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GuidelineNode {
    Section(GuidelineSection),
    Entry(Guideline),
}

/// A named grouping of entries and sub-sections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuidelineSection {
    pub name: String,
    pub children: Vec<GuidelineNode>,
}

impl GuidelineSection {
    pub fn new(name: impl Into<String>, children: Vec<GuidelineNode>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    /// Total leaf entries under this section, recursively.
    pub fn entry_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                GuidelineNode::Section(section) => section.entry_count(),
                GuidelineNode::Entry(_) => 1,
            })
            .sum()
    }

    /// Rough rendered size: entry prose plus a heading line per section.
    pub fn approx_rendered_bytes(&self) -> u64 {
        let own = self.name.len() as u64 + 2;
        own + self
            .children
            .iter()
            .map(|child| match child {
                GuidelineNode::Section(section) => section.approx_rendered_bytes(),
                GuidelineNode::Entry(entry) => entry.content.len() as u64 + 1,
            })
            .sum::<u64>()
    }

    /// Look up a nested section by slash-separated path, e.g.
    /// `function_guidelines/validators`. The path is relative to this
    /// section's children; an empty path returns `self`.
    pub fn find_section(&self, path: &str) -> Option<&GuidelineSection> {
        let mut current = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.children.iter().find_map(|child| match child {
                GuidelineNode::Section(section) if section.name == segment => Some(section),
                _ => None,
            })?;
        }
        Some(current)
    }
}

/// Reference to the merged document, as reported by the merge service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuidelineRef {
    /// Where the rendered document lives.
    pub path: PathBuf,
    /// Leaf entries in the merged document.
    pub entries: usize,
    /// Approximate rendered size in bytes.
    pub approx_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> GuidelineSection {
        GuidelineSection::new(
            "convex_guidelines",
            vec![
                GuidelineNode::Section(GuidelineSection::new(
                    "function_guidelines",
                    vec![
                        GuidelineNode::Section(GuidelineSection::new(
                            "validators",
                            vec![GuidelineNode::Entry(Guideline::new(
                                "Always include argument validators.",
                            ))],
                        )),
                        GuidelineNode::Entry(Guideline::new("Use the new function syntax.")),
                    ],
                )),
                GuidelineNode::Entry(Guideline::new("  Define your schema in schema.ts.  ")),
            ],
        )
    }

    #[test]
    fn entries_are_counted_recursively() {
        assert_eq!(sample_doc().entry_count(), 3);
    }

    #[test]
    fn entry_content_is_trimmed() {
        let doc = sample_doc();
        let GuidelineNode::Entry(entry) = &doc.children[1] else {
            panic!("expected entry");
        };
        assert_eq!(entry.content, "Define your schema in schema.ts.");
    }

    #[test]
    fn sections_resolve_by_slash_path() {
        let doc = sample_doc();
        let validators = doc.find_section("function_guidelines/validators").unwrap();
        assert_eq!(validators.entry_count(), 1);
        assert!(doc.find_section("function_guidelines/missing").is_none());
        assert_eq!(doc.find_section("").unwrap().name, "convex_guidelines");
    }
}
