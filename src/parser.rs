//! Chapter parser: the state machine driven by the rule table.
//!
//! A chapter is transformed in a single regex-dispatched substitution pass.
//! The pass is synchronous and free of external I/O: math formulas and
//! cross-references are emitted as opaque placeholder markers and resolved
//! later, once the renderer can be consulted and the tag registry is
//! complete. Parser state is scoped to one chapter and discarded afterwards;
//! the registry is the only thing that outlives the parse.

use std::collections::HashMap;
use std::sync::LazyLock;

use log::warn;
use regex::Regex;

use crate::corpus::Corpus;
use crate::error::{Error, Result};
use crate::registry::{TagEntry, TagRegistry};
use crate::rules::RuleTable;

/// Prefix of a deferred reference marker (`REF_MARK`, mode byte, tag).
pub const REF_MARK: char = '\u{1}';
/// Internal page-break marker; the body is split on it after the math pass.
pub const PAGE_BREAK: char = '\u{2}';
/// Fences the optional override text of a deferred reference marker.
pub const TEXT_FENCE: char = '\u{3}';
/// Opens a deferred math placeholder; followed by the mode word.
pub const MATH_OPEN: char = '\u{4}';
/// Separates the mode word from the formula source.
pub const MATH_SEP: char = '\u{5}';
/// Closes a deferred math placeholder.
pub const MATH_CLOSE: char = '\u{6}';

/// A new page starts at the first `\section` beyond this many bytes.
pub const DIVISION_SIZE_LIMIT: usize = 32 * 1024;

/// Stand-in tag for a structural construct whose label has no tag assigned.
pub const SENTINEL_TAG: &str = "XXXX";

/// Permalink base for the per-construct tag badges.
pub const TAG_PERMALINK_BASE: &str = "https://stacks.math.columbia.edu/tag/";

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\title\{(.*)\}").expect("title pattern must compile"));

/// Closing markup owed when a bracket scope exits.
///
/// Scoped constructs push one of these when they open; the matching `}` (or
/// the environment's `\end`) pops it and emits the markup. Representing the
/// actions as variants keeps the scope stack free of captured state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Close an italic/bold/large span.
    CloseSpan,
    /// Close a footnote (content + outer span).
    CloseFootnote,
    /// Close a margin annotation (slogan/reference/history).
    CloseAnnotation,
}

impl ExitAction {
    pub fn markup(self) -> &'static str {
        match self {
            ExitAction::CloseSpan => "</span>",
            ExitAction::CloseFootnote => "</span></span>",
            ExitAction::CloseAnnotation => "</span></span>",
        }
    }
}

/// Mutable parse state for one chapter (or one fragment).
///
/// Counters are deterministic functions of parse order, which is what makes
/// the whole pipeline idempotent.
#[derive(Debug, Clone)]
pub struct ParserState {
    pub chapter_name: String,
    pub chapter_number: usize,
    pub section_number: u32,
    pub subsection_number: u32,
    pub equation_number: u32,
    pub item_number: u32,
    pub footnote_number: u32,
    pub math_mode: bool,
    pub bracket_level: u32,
    bracket_actions: HashMap<u32, ExitAction>,
    pub division_number: u32,
    pub division_start: usize,
    pub division_first_section: HashMap<u32, u32>,
    pub division_last_section: HashMap<u32, u32>,
}

impl ParserState {
    pub fn new(chapter_name: &str, chapter_number: usize) -> ParserState {
        ParserState {
            chapter_name: chapter_name.to_string(),
            chapter_number,
            section_number: 0,
            subsection_number: 0,
            equation_number: 0,
            item_number: 0,
            footnote_number: 0,
            math_mode: false,
            bracket_level: 0,
            bracket_actions: HashMap::new(),
            division_number: 0,
            division_start: 0,
            division_first_section: HashMap::new(),
            division_last_section: HashMap::new(),
        }
    }

    /// State for a nested fragment parse (titles, link text). Shares the
    /// chapter identity and current division so registrations land in the
    /// right place, but starts with fresh counters and scopes: a fragment
    /// must not disturb the chapter's own numbering.
    fn fragment(&self) -> ParserState {
        let mut state = ParserState::new(&self.chapter_name, self.chapter_number);
        state.division_number = self.division_number;
        state
    }

    /// Open a bracket scope, optionally owing closing markup on exit.
    pub fn push_scope(&mut self, action: Option<ExitAction>) {
        self.bracket_level += 1;
        if let Some(action) = action {
            self.bracket_actions.insert(self.bracket_level, action);
        }
    }

    /// Close the current bracket scope, returning the owed markup if the
    /// level had an exit action. Each action fires at most once.
    pub fn pop_scope(&mut self) -> Option<&'static str> {
        let markup = self
            .bracket_actions
            .remove(&self.bracket_level)
            .map(ExitAction::markup);
        // Unbalanced input must not underflow the level counter.
        self.bracket_level = self.bracket_level.saturating_sub(1);
        markup
    }
}

/// Everything a rule handler can see: the chapter state plus the shared
/// collaborators. Handlers run strictly in document order, so sequential
/// mutation of state and registry is safe by construction.
pub struct ParseCx<'a> {
    pub state: ParserState,
    pub rules: &'a RuleTable,
    pub corpus: &'a Corpus,
    pub registry: &'a mut TagRegistry,
}

impl ParseCx<'_> {
    /// Resolve a chapter-local label to its tag, register the entry under the
    /// current division, and return the tag plus its badge markup.
    ///
    /// A label without an assigned tag is a warning, never fatal: the
    /// sentinel tag keeps the output well-formed and diagnosable.
    pub fn register_tag(&mut self, label: &str, number: &str, title: &str) -> (String, String) {
        let full_label = format!("{}-{}", self.state.chapter_name, label);
        let tag = match self.corpus.label_to_tag(&full_label) {
            Some(tag) => {
                self.registry.insert(
                    tag,
                    TagEntry::new(
                        number,
                        &self.state.chapter_name,
                        self.state.division_number,
                        title,
                    ),
                );
                tag.to_string()
            }
            None => {
                warn!("tag not found for label: {full_label}");
                SENTINEL_TAG.to_string()
            }
        };
        let badge =
            format!("<div class='tag'><a href='{TAG_PERMALINK_BASE}{tag}'>{tag}</a></div>");
        (tag, badge)
    }
}

/// Parse an arbitrary substring with a fresh state. Used by handlers for
/// nested markup (section titles, hyperref text, item tails); the chapter's
/// counters and scopes are untouched when this returns.
pub fn parse_fragment(cx: &mut ParseCx<'_>, text: &str) -> String {
    let fresh = cx.state.fragment();
    let saved = std::mem::replace(&mut cx.state, fresh);
    let rules = cx.rules;
    let output = rules.apply(text, cx);
    cx.state = saved;
    output
}

/// A fully substituted chapter, ready for the math pass and pagination.
#[derive(Debug)]
pub struct ParsedChapter {
    pub name: String,
    pub number: usize,
    /// Display title; `Chapter {n}` unless the source carries `\title{...}`.
    pub title: String,
    /// The chapter's own tag (from the `section-phantom` label).
    pub tag: String,
    pub tag_badge: String,
    /// Substituted body with embedded placeholder markers.
    pub body: String,
    /// First section number on each division.
    pub division_first_section: HashMap<u32, u32>,
    /// Last section number on each division.
    pub division_last_section: HashMap<u32, u32>,
}

/// Run the full chapter pipeline up to (but excluding) math rendering:
/// pre-pass, tag registration for the chapter itself, title override, and
/// the single rule-dispatch substitution pass.
pub fn parse_chapter(
    source: &str,
    chapter_name: &str,
    rules: &RuleTable,
    corpus: &Corpus,
    registry: &mut TagRegistry,
) -> Result<ParsedChapter> {
    let chapter_number = corpus
        .chapter_number(chapter_name)
        .ok_or_else(|| Error::UnknownChapter(chapter_name.to_string()))?;

    let mut cx = ParseCx {
        state: ParserState::new(chapter_name, chapter_number),
        rules,
        corpus,
        registry,
    };

    // The chapter's phantom-section label supplies its tag. Registered with
    // division 0 (the TOC page) before any body content is seen.
    let mut title = format!("Chapter {chapter_number}");
    let (tag, tag_badge) = cx.register_tag("section-phantom", &chapter_number.to_string(), &title);

    cx.state.division_number = 1;
    cx.state.division_first_section.insert(0, 0);
    cx.state.division_first_section.insert(1, 1);
    cx.state.division_last_section.insert(0, 0);

    if let Some(caps) = TITLE_RE.captures(source) {
        title = parse_fragment(&mut cx, &caps[1]);
        cx.registry.set_title(&tag, &title);
    }

    let body = rules.apply(clip_chapter(source), &mut cx);

    Ok(ParsedChapter {
        name: chapter_name.to_string(),
        number: chapter_number,
        title,
        tag,
        tag_badge,
        body,
        division_first_section: cx.state.division_first_section,
        division_last_section: cx.state.division_last_section,
    })
}

/// Strip the preamble before the chapter's phantom-section label and the
/// trailer from the chapter-include marker onwards.
fn clip_chapter(source: &str) -> &str {
    let mut body = source;
    if let Some(at) = body.find("\\label{section-phantom}") {
        body = &body[at + "\\label{section-phantom}".len()..];
    }
    if let Some(at) = body.find("\\input{chapters}") {
        body = &body[..at];
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_actions_fire_in_lifo_order() {
        let mut state = ParserState::new("sets", 1);
        state.push_scope(Some(ExitAction::CloseFootnote));
        state.push_scope(None);
        state.push_scope(Some(ExitAction::CloseSpan));
        assert_eq!(state.bracket_level, 3);
        assert_eq!(state.pop_scope(), Some("</span>"));
        assert_eq!(state.pop_scope(), None);
        assert_eq!(state.pop_scope(), Some("</span></span>"));
        assert_eq!(state.bracket_level, 0);
    }

    #[test]
    fn pop_on_empty_stack_is_harmless() {
        let mut state = ParserState::new("sets", 1);
        assert_eq!(state.pop_scope(), None);
        assert_eq!(state.bracket_level, 0);
    }

    #[test]
    fn exit_action_fires_exactly_once() {
        let mut state = ParserState::new("sets", 1);
        state.push_scope(Some(ExitAction::CloseSpan));
        assert_eq!(state.pop_scope(), Some("</span>"));
        state.push_scope(None);
        // The level is reused, but the earlier action is gone.
        assert_eq!(state.pop_scope(), None);
    }

    #[test]
    fn clip_strips_preamble_and_trailer() {
        let source = "\\documentclass{article}\n\\label{section-phantom}\nbody text\n\\input{chapters}\n\\end{document}\n";
        assert_eq!(clip_chapter(source), "\nbody text\n");
    }
}
