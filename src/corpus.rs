//! Corpus collaborator: chapter ordering and the label ↔ tag lookup.
//!
//! The source corpus is a checkout containing one `.tex` file per chapter, a
//! `chapters.tex` listing (which also fixes chapter order and part grouping),
//! and a `tags` file mapping every stable four-character tag to the
//! human-authored label it was assigned to.
//!
//! Lookup misses are expected (labels come and go between corpus revisions)
//! and are reported as `None`; callers degrade to a warning plus visible
//! fallback text.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, Result};

/// Label prefixes that identify chapter-local labels. A bare reference label
/// whose first dash-component is one of these must be qualified with the
/// current chapter name before tag lookup.
const STANDARD_LABEL_TYPES: &[&str] = &[
    "definition",
    "equation",
    "example",
    "exercise",
    "item",
    "lemma",
    "proposition",
    "remark",
    "remarks",
    "section",
    "situation",
    "subsection",
    "theorem",
];

/// An opened corpus checkout.
///
/// Chapter numbers are 1-based positions in the `chapters.tex` listing, so a
/// partial run and the site index always agree on numbering.
pub struct Corpus {
    dir: PathBuf,
    chapters: Vec<String>,
    tag_of_label: HashMap<String, String>,
    label_of_tag: HashMap<String, String>,
}

impl Corpus {
    /// Load the corpus from a checkout directory.
    ///
    /// Reads the chapter list from `chapters.tex` and the tag assignments
    /// from `tags`. Both files are required; a corpus without them is fatal.
    pub fn load(dir: &Path) -> Result<Corpus> {
        let chapters = read_chapter_list(&dir.join("chapters.tex"))?;
        let (tag_of_label, label_of_tag) = read_tags(&dir.join("tags"))?;
        Ok(Corpus {
            dir: dir.to_path_buf(),
            chapters,
            tag_of_label,
            label_of_tag,
        })
    }

    /// The ordered chapter names.
    pub fn chapters(&self) -> &[String] {
        &self.chapters
    }

    /// 1-based chapter number, or `None` for a name not in the listing.
    pub fn chapter_number(&self, name: &str) -> Option<usize> {
        self.chapters.iter().position(|c| c == name).map(|i| i + 1)
    }

    /// Chapter name at a 0-based index in corpus order.
    pub fn chapter_at(&self, index: usize) -> Option<&str> {
        self.chapters.get(index).map(String::as_str)
    }

    /// Path of a chapter's source file.
    pub fn chapter_file(&self, name: &str) -> PathBuf {
        self.dir.join(name).with_extension("tex")
    }

    /// Path of the chapter listing file.
    pub fn chapter_list_file(&self) -> PathBuf {
        self.dir.join("chapters.tex")
    }

    /// Whether `prefix` is a recognized chapter-local label type.
    pub fn is_label_type(&self, prefix: &str) -> bool {
        STANDARD_LABEL_TYPES.contains(&prefix)
    }

    /// Resolve a fully qualified label to its tag.
    pub fn label_to_tag(&self, label: &str) -> Option<&str> {
        self.tag_of_label.get(label).map(String::as_str)
    }

    /// Resolve a tag back to its label.
    pub fn tag_to_label(&self, tag: &str) -> Option<&str> {
        self.label_of_tag.get(tag).map(String::as_str)
    }
}

/// Extract the ordered chapter names from `chapters.tex`.
///
/// Chapters appear as `\item \hyperref[NAME-section-phantom]{...}` lines;
/// everything else (part headings, formatting commands) is ignored here.
fn read_chapter_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let item = Regex::new(r"\\item \\hyperref\[([-\w]*)-section-phantom\]")
        .expect("chapter list pattern must compile");
    let chapters: Vec<String> = text
        .lines()
        .filter_map(|line| item.captures(line))
        .map(|caps| caps[1].to_string())
        .collect();
    if chapters.is_empty() {
        return Err(Error::InvalidCorpus(format!(
            "no chapter entries found in {}",
            path.display()
        )));
    }
    Ok(chapters)
}

/// Parse the `tags` file: one `TAG,label` pair per line, `#` comments.
fn read_tags(path: &Path) -> Result<(HashMap<String, String>, HashMap<String, String>)> {
    let text = fs::read_to_string(path)?;
    let mut tag_of_label = HashMap::new();
    let mut label_of_tag = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((tag, label)) = line.split_once(',') else {
            return Err(Error::InvalidCorpus(format!(
                "malformed tag line: {line:?}"
            )));
        };
        tag_of_label.insert(label.to_string(), tag.to_string());
        label_of_tag.insert(tag.to_string(), label.to_string());
    }
    Ok((tag_of_label, label_of_tag))
}
