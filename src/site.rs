//! Site assembly: output files, navigation chrome, and the top-level index.
//!
//! Every page is the verbatim header blob, a generated chapter wrapper, and
//! the verbatim footer blob. Chapters are processed strictly in sequence:
//! parse everything first (populating the registry), then write everything
//! (resolving references against the now-complete registry).

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{info, warn};
use regex::Regex;

use crate::corpus::Corpus;
use crate::error::Result;
use crate::katex::{render_math_placeholders, MathRenderer};
use crate::page::{self, Navigation};
use crate::parser::{parse_chapter, ParsedChapter};
use crate::registry::{TagEntry, TagRegistry};
use crate::rules::RuleTable;

/// Part headings in the chapter listing are numbered with this sequence.
const ROMAN_NUMERALS: &[&str] = &[
    "", "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII", "XIII", "XIV",
    "XV", "XVI",
];

/// Filesystem layout and site-wide settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the generated pages are written to.
    pub out_dir: PathBuf,
    /// Header blob copied verbatim before every generated body.
    pub header_file: PathBuf,
    /// Footer blob copied verbatim after every generated body.
    pub footer_file: PathBuf,
    /// Persisted registry snapshot.
    pub registry_file: PathBuf,
    /// Title of the top-level index page.
    pub site_title: String,
}

impl Config {
    /// The conventional project layout: `web/` for output and the snapshot,
    /// `static/` for the header and footer blobs.
    pub fn new(project_dir: &Path) -> Config {
        Config {
            out_dir: project_dir.join("web"),
            header_file: project_dir.join("static").join("_header.html"),
            footer_file: project_dir.join("static").join("_footer.html"),
            registry_file: project_dir.join("web").join("tag_cache.json"),
            site_title: "Stacks Project".to_string(),
        }
    }
}

/// Orchestrates a run: owns the registry for its lifetime and drives
/// parsing, math rendering, pagination, and file output.
pub struct SiteBuilder<'a> {
    config: &'a Config,
    corpus: &'a Corpus,
    rules: &'a RuleTable,
    renderer: &'a mut dyn MathRenderer,
    registry: TagRegistry,
}

impl<'a> SiteBuilder<'a> {
    pub fn new(
        config: &'a Config,
        corpus: &'a Corpus,
        rules: &'a RuleTable,
        renderer: &'a mut dyn MathRenderer,
    ) -> SiteBuilder<'a> {
        SiteBuilder {
            config,
            corpus,
            rules,
            renderer,
            registry: TagRegistry::default(),
        }
    }

    /// Process the requested chapters. An empty list means a full run: every
    /// chapter in corpus order, plus the index rebuild. A non-empty list is
    /// a partial run against the loaded registry snapshot (so cross-chapter
    /// references into unprocessed chapters still resolve); the index is not
    /// rebuilt.
    pub fn run(&mut self, chapters: &[String]) -> Result<()> {
        let full_run = chapters.is_empty();
        let list: Vec<String> = if full_run {
            self.corpus.chapters().to_vec()
        } else {
            self.registry = TagRegistry::load(&self.config.registry_file)?;
            chapters.to_vec()
        };

        fs::create_dir_all(&self.config.out_dir)?;

        let mut parsed = Vec::with_capacity(list.len());
        for name in &list {
            info!("parsing chapter: {name}");
            let source = fs::read_to_string(self.corpus.chapter_file(name))?;
            let chapter = parse_chapter(&source, name, self.rules, self.corpus, &mut self.registry)?;
            let body = render_math_placeholders(&chapter.body, self.renderer)?;
            parsed.push((chapter, body));
        }

        for (chapter, body) in &parsed {
            info!("writing chapter: {}", chapter.name);
            self.write_chapter(chapter, body)?;
        }

        if full_run {
            info!("writing index");
            self.scan_chapter_list()?;
            self.write_index()?;
        }

        self.registry.save(&self.config.registry_file)?;
        Ok(())
    }

    /// Write all division pages of one chapter, deleting stale pages left by
    /// a previous run with more divisions.
    fn write_chapter(&self, chapter: &ParsedChapter, body: &str) -> Result<()> {
        self.remove_stale_pages(&chapter.name)?;
        let toc = page::chapter_toc(&self.registry, &chapter.tag);
        let bodies = page::split_divisions(body, toc);
        for (division, division_body) in bodies.iter().enumerate() {
            let division = division as u32;
            let resolved = if division > 0 {
                page::resolve_refs(division_body, &chapter.name, division, &self.registry)
            } else {
                division_body.clone()
            };
            let nav = page::navigation(self.corpus, &self.registry, &chapter.name, division);
            self.write_page(chapter, division, &resolved, &nav)?;
        }
        Ok(())
    }

    fn write_page(
        &self,
        chapter: &ParsedChapter,
        division: u32,
        body: &str,
        nav: &Navigation,
    ) -> Result<()> {
        let path = self.config.out_dir.join(page::page_file(&chapter.name, division));
        let mut out = File::create(path)?;
        out.write_all(&fs::read(&self.config.header_file)?)?;
        out.write_all(page_wrapper(chapter, division, body, nav).as_bytes())?;
        out.write_all(&fs::read(&self.config.footer_file)?)?;
        Ok(())
    }

    /// Delete every existing `{chapter}-NNN.html` in the output directory.
    fn remove_stale_pages(&self, chapter: &str) -> Result<()> {
        let prefix = format!("{chapter}-");
        for dir_entry in fs::read_dir(&self.config.out_dir)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(digits) = rest.strip_suffix(".html") else {
                continue;
            };
            if digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()) {
                fs::remove_file(dir_entry.path())?;
            }
        }
        Ok(())
    }

    /// Scan the chapter listing into the registry: chapters grouped under
    /// roman-numbered part pseudo-entries, children of the root pseudo-tag.
    fn scan_chapter_list(&mut self) -> Result<()> {
        static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^\\item \\hyperref\[([-\w]*)\]")
                .expect("chapter item pattern must compile")
        });

        let text = fs::read_to_string(self.corpus.chapter_list_file())?;
        let mut part_number = 0usize;
        let mut part_tag = "0".to_string();
        for line in text.lines() {
            if let Some(caps) = ITEM_RE.captures(line) {
                let label = &caps[1];
                match self.corpus.label_to_tag(label) {
                    Some(tag) => {
                        let tag = tag.to_string();
                        self.registry.add_child(&part_tag, &tag);
                    }
                    None => warn!("tag not found for label: {label}"),
                }
            } else if !line.starts_with('\\') && !line.trim().is_empty() {
                part_number += 1;
                part_tag = part_number.to_string();
                let numeral = ROMAN_NUMERALS
                    .get(part_number)
                    .copied()
                    .unwrap_or(part_tag.as_str());
                self.registry
                    .set(&part_tag, TagEntry::new(numeral, "", 0, line.trim_end()));
                self.registry.add_child("", &part_tag);
            }
        }
        Ok(())
    }

    /// Write the top-level index: every part, every chapter under it.
    fn write_index(&self) -> Result<()> {
        let mut body = String::new();
        body.push_str("<div class='chapter' id='main-index'>\n");
        body.push_str(&format!("<h1>{}</h1>\n", self.config.site_title));
        body.push_str("<div class='toc'>\n<h2>Table of contents</h2>\n<ul>\n");
        for part_tag in self.registry.children("") {
            let Some(part) = self.registry.get(part_tag) else {
                continue;
            };
            body.push_str(&format!("<li class='toc-part'>{}\n", part.title));
            for chapter_tag in self.registry.children(part_tag) {
                let Some(entry) = self.registry.get(chapter_tag) else {
                    warn!("index references unparsed chapter tag: {chapter_tag}");
                    continue;
                };
                let file = page::page_file(&entry.chapter, 0);
                body.push_str("<li>");
                body.push_str(&format!(
                    "<a class='toc-num' href='{file}'>Chapter {}</a> ",
                    entry.number
                ));
                body.push_str(&format!(
                    "<a class='toc-title' href='{file}'>{}</a>",
                    entry.title
                ));
                body.push('\n');
            }
        }
        body.push_str("</ul>\n</div>\n</div>\n");

        let mut out = File::create(self.config.out_dir.join("index.html"))?;
        out.write_all(&fs::read(&self.config.header_file)?)?;
        out.write_all(body.as_bytes())?;
        out.write_all(&fs::read(&self.config.footer_file)?)?;
        Ok(())
    }
}

/// The generated markup between the header and footer blobs.
fn page_wrapper(chapter: &ParsedChapter, division: u32, body: &str, nav: &Navigation) -> String {
    let mut wrapper = String::new();
    wrapper.push_str(&format!(
        "<div class='chapter' id='{}'>{}\n",
        chapter.tag, chapter.tag_badge
    ));
    wrapper.push_str(&format!(
        "<div id='nav'><a id='nav-next' {}></a><a id='nav-index' {}></a><a id='nav-prev' {}></a></div>\n",
        nav.next, nav.home, nav.prev
    ));
    wrapper.push_str(&format!("<div class='pre-title'>Chapter {}</div>\n", chapter.number));
    wrapper.push_str(&format!("<h1>{}</h1>\n", chapter.title));
    if division != 0 {
        let first = chapter
            .division_first_section
            .get(&division)
            .copied()
            .unwrap_or(0);
        let last = chapter
            .division_last_section
            .get(&division)
            .copied()
            .unwrap_or(0);
        wrapper.push_str(&format!(
            "<div class='post-title'>Sections &sect;{n}.{first} to &sect;{n}.{last}</div>\n",
            n = chapter.number
        ));
    }
    wrapper.push_str(body);
    if !body.is_empty() && !body.ends_with('\n') {
        wrapper.push('\n');
    }
    wrapper.push_str("</div>\n");
    wrapper
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn chapter() -> ParsedChapter {
        ParsedChapter {
            name: "sets".to_string(),
            number: 1,
            title: "Set Theory".to_string(),
            tag: "0001".to_string(),
            tag_badge: String::new(),
            body: String::new(),
            division_first_section: HashMap::from([(0, 0), (1, 1)]),
            division_last_section: HashMap::from([(0, 0), (1, 2)]),
        }
    }

    fn nav() -> Navigation {
        Navigation {
            next: "href='sets-001.html'".to_string(),
            prev: "class='disabled'".to_string(),
            home: "href='index.html'".to_string(),
        }
    }

    #[test]
    fn wrapper_terminates_an_unterminated_body() {
        let out = page_wrapper(&chapter(), 1, "content", &nav());
        assert!(out.ends_with("content\n</div>\n"));
    }

    #[test]
    fn wrapper_leaves_a_terminated_body_alone() {
        let out = page_wrapper(&chapter(), 1, "content\n", &nav());
        assert!(out.ends_with("content\n</div>\n"));
        assert!(!out.contains("content\n\n"));
    }

    #[test]
    fn wrapper_adds_no_blank_line_for_an_empty_body() {
        let out = page_wrapper(&chapter(), 1, "", &nav());
        assert!(out.ends_with("Sections &sect;1.1 to &sect;1.2</div>\n</div>\n"));
    }

    #[test]
    fn toc_page_carries_no_section_range() {
        let out = page_wrapper(&chapter(), 0, "toc\n", &nav());
        assert!(!out.contains("post-title"));
        assert!(out.contains("<div class='pre-title'>Chapter 1</div>"));
    }
}
