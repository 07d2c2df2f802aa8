//! Pagination and deferred link resolution.
//!
//! After the substitution and math passes, a chapter body is split on the
//! internal page-break marker into divisions; the chapter's table of
//! contents is prepended as division 0. Deferred reference markers are
//! rewritten per division, once the whole registry is known, so forward and
//! cross-chapter references resolve no matter what order chapters were
//! parsed in.

use std::sync::LazyLock;

use log::warn;
use regex::{Captures, Regex};

use crate::corpus::Corpus;
use crate::parser::{PAGE_BREAK, REF_MARK, TEXT_FENCE};
use crate::registry::TagRegistry;

/// Output file name for a (chapter, division) pair.
pub fn page_file(chapter: &str, division: u32) -> String {
    format!("{chapter}-{division:03}.html")
}

/// Split a finished body into division pages, with `toc` as division 0.
pub fn split_divisions(body: &str, toc: String) -> Vec<String> {
    let mut bodies: Vec<String> = body.split(PAGE_BREAK).map(str::to_string).collect();
    bodies.insert(0, toc);
    bodies
}

/// Synthesize the chapter-local table of contents: one row per child of the
/// chapter tag, in registration (document) order.
pub fn chapter_toc(registry: &TagRegistry, chapter_tag: &str) -> String {
    let mut toc = String::from("<div class='toc'>\n<h2>Table of contents</h2>\n<ul>\n");
    for tag in registry.children(chapter_tag) {
        let Some(entry) = registry.get(tag) else {
            warn!("chapter TOC references unknown tag: {tag}");
            continue;
        };
        let file = page_file(&entry.chapter, entry.division);
        toc.push_str("<li>");
        toc.push_str(&format!(
            "<a class='toc-num' href='{file}#{tag}'>&sect;{}</a> ",
            entry.number
        ));
        toc.push_str(&format!(
            "<a class='toc-title' href='{file}#{tag}'>{}</a>",
            entry.title
        ));
        toc.push('\n');
    }
    toc.push_str("</ul>\n</div>\n");
    toc
}

static REF_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "{REF_MARK}(.)(....)(?:{TEXT_FENCE}([^{TEXT_FENCE}]*){TEXT_FENCE})?"
    ))
    .expect("reference marker pattern must compile")
});

/// Rewrite the deferred reference markers of one division into final links.
///
/// A reference whose target shares this chapter and division gets a bare
/// fragment anchor; anything else is page-qualified. An unregistered target
/// degrades to a bracketed tag plus a warning.
pub fn resolve_refs(body: &str, chapter: &str, division: u32, registry: &TagRegistry) -> String {
    REF_MARKER_RE
        .replace_all(body, |caps: &Captures| {
            let mode = &caps[1];
            let tag = &caps[2];
            let Some(entry) = registry.get(tag) else {
                warn!("unresolved reference tag: {tag}");
                return format!("[{tag}]");
            };
            let root = if entry.chapter == chapter && entry.division == division {
                String::new()
            } else {
                page_file(&entry.chapter, entry.division)
            };
            let number = caps
                .get(3)
                .map(|m| m.as_str())
                .unwrap_or(entry.number.as_str());
            if mode == "a" {
                format!("<a class='ref' href='{root}#{tag}'>{number}</a>")
            } else {
                number.to_string()
            }
        })
        .into_owned()
}

/// Navigation link attributes for one page; `class='disabled'` at the
/// absolute edges, an `href` everywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub next: String,
    pub prev: String,
    pub home: String,
}

const DISABLED: &str = "class='disabled'";

/// Compute prev/next/home for a (chapter, division) page. Next wraps to the
/// following chapter's TOC page at the chapter's last division; prev wraps
/// to the preceding chapter's last division at division 0.
pub fn navigation(
    corpus: &Corpus,
    registry: &TagRegistry,
    chapter: &str,
    division: u32,
) -> Navigation {
    let chapter_number = corpus.chapter_number(chapter).unwrap_or(0);

    let next = if division == registry.max_division(chapter) {
        match corpus.chapter_at(chapter_number) {
            Some(next_chapter) => format!("href='{}'", page_file(next_chapter, 0)),
            None => DISABLED.to_string(),
        }
    } else {
        format!("href='{}'", page_file(chapter, division + 1))
    };

    let prev = if division == 0 {
        if chapter_number <= 1 {
            DISABLED.to_string()
        } else {
            match corpus.chapter_at(chapter_number - 2) {
                Some(prev_chapter) => {
                    let prev_division = registry.max_division(prev_chapter);
                    format!("href='{}'", page_file(prev_chapter, prev_division))
                }
                None => DISABLED.to_string(),
            }
        }
    } else {
        format!("href='{}'", page_file(chapter, division - 1))
    };

    Navigation {
        next,
        prev,
        home: "href='index.html'".to_string(),
    }
}
