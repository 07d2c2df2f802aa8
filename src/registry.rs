//! The tag registry: every numbered construct in the site, by tag.
//!
//! The registry is populated as a side effect of chapter parsing and is the
//! bridge that makes forward and cross-chapter references resolvable: link
//! resolution runs only after parsing, against the full registry. For partial
//! runs it is persisted as a JSON snapshot so chapters processed in isolation
//! can still resolve references into chapters parsed by earlier runs.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Pseudo-parent for entries whose parent number has no registered tag.
const ORPHAN_PARENT: &str = "undefined";

/// Registry data for one tagged construct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    /// Dotted hierarchical number, e.g. `"3.2.1"`.
    pub number: String,
    /// Chapter the construct lives in (empty for part pseudo-entries).
    pub chapter: String,
    /// Page index within the chapter.
    pub division: u32,
    /// Display title (may contain HTML produced by fragment parsing).
    pub title: String,
}

impl TagEntry {
    pub fn new(number: &str, chapter: &str, division: u32, title: &str) -> Self {
        TagEntry {
            number: number.to_string(),
            chapter: chapter.to_string(),
            division,
            title: title.to_string(),
        }
    }
}

/// Process-wide mapping from tag to entry, plus the parent → children index
/// and the per-chapter page count index.
///
/// Passed explicitly into the parser and resolvers; there is no global
/// instance. The three serialized fields are exactly what the snapshot file
/// holds; the number → tag side index exists only to derive parent-child
/// edges during insertion and is rebuilt on load.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TagRegistry {
    tags: HashMap<String, TagEntry>,
    chapter_divisions: HashMap<String, u32>,
    tag_children: HashMap<String, Vec<String>>,
    #[serde(skip)]
    number_to_tag: HashMap<String, String>,
}

impl TagRegistry {
    /// Load a snapshot. A missing file yields an empty registry (partial
    /// runs against a fresh project are legal); a malformed file is fatal.
    pub fn load(path: &Path) -> Result<TagRegistry> {
        if !path.exists() {
            return Ok(TagRegistry::default());
        }
        let text = fs::read_to_string(path)?;
        let mut registry: TagRegistry = serde_json::from_str(&text)?;
        registry.number_to_tag = registry
            .tags
            .iter()
            .map(|(tag, entry)| (entry.number.clone(), tag.clone()))
            .collect();
        Ok(registry)
    }

    /// Write the snapshot. Whole-file, no partial updates.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Register a tag with full bookkeeping: records the entry, indexes its
    /// number, links it under the tag owning the dotted parent prefix of its
    /// number, and bumps the chapter's division high-water mark.
    ///
    /// Re-inserting an existing tag overwrites number and title but does not
    /// duplicate the parent-child edge.
    pub fn insert(&mut self, tag: &str, entry: TagEntry) {
        self.number_to_tag
            .insert(entry.number.clone(), tag.to_string());
        if let Some((parent_number, _)) = entry.number.rsplit_once('.') {
            let parent = self
                .number_to_tag
                .get(parent_number)
                .cloned()
                .unwrap_or_else(|| ORPHAN_PARENT.to_string());
            self.add_child(&parent, tag);
        }
        let max = self
            .chapter_divisions
            .entry(entry.chapter.clone())
            .or_insert(1);
        if *max < entry.division {
            *max = entry.division;
        }
        self.tags.insert(tag.to_string(), entry);
    }

    /// Record an entry without edge or division bookkeeping (used for the
    /// part pseudo-entries of the site index).
    pub fn set(&mut self, tag: &str, entry: TagEntry) {
        self.tags.insert(tag.to_string(), entry);
    }

    /// Append `child` under `parent`, skipping duplicates.
    pub fn add_child(&mut self, parent: &str, child: &str) {
        let children = self.tag_children.entry(parent.to_string()).or_default();
        if !children.iter().any(|c| c == child) {
            children.push(child.to_string());
        }
    }

    /// Look up an entry.
    pub fn get(&self, tag: &str) -> Option<&TagEntry> {
        self.tags.get(tag)
    }

    /// Children of a tag, in document order.
    pub fn children(&self, tag: &str) -> &[String] {
        self.tag_children.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Overwrite the title of an existing entry (used when a `\title{...}`
    /// override is discovered after the chapter tag was registered).
    pub fn set_title(&mut self, tag: &str, title: &str) {
        if let Some(entry) = self.tags.get_mut(tag) {
            entry.title = title.to_string();
        }
    }

    /// Highest division index seen for a chapter. Defaults to 1: every
    /// parsed chapter has at least its TOC page and one body page.
    pub fn max_division(&self, chapter: &str) -> u32 {
        self.chapter_divisions.get(chapter).copied().unwrap_or(1)
    }
}
