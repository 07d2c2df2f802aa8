//! # texsite
//!
//! A static site generator for large, cross-referenced mathematical LaTeX
//! corpora: each chapter is transformed into a set of size-bounded,
//! hyperlinked HTML pages with hierarchical numbering, a chapter table of
//! contents, and prev/next/home navigation, plus one top-level index.
//!
//! ## How a chapter is built
//!
//! 1. A single regex-dispatched substitution pass ([`rules::RuleTable`])
//!    turns the TeX source into HTML, tracking math mode, bracket scopes and
//!    structural counters ([`parser`]), and registering every numbered
//!    construct in the [`registry::TagRegistry`].
//! 2. Deferred math placeholders are resolved through the external renderer
//!    ([`katex`]), with literal-source fallback on failure.
//! 3. The body is split into division pages and deferred reference markers
//!    are rewritten against the complete registry ([`page`]).
//! 4. Pages are written wrapped in the verbatim header/footer blobs
//!    ([`site`]).
//!
//! The registry is persisted between runs so a partial run (a few chapters)
//! still resolves references into chapters built earlier.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use texsite::{default_rules, Config, Corpus, KatexProcess, SiteBuilder};
//!
//! let corpus = Corpus::load(Path::new("corpus")).unwrap();
//! let config = Config::new(Path::new("."));
//! let rules = default_rules();
//! let mut renderer = KatexProcess::new(vec!["node".into(), "lib/katexfilter.js".into()]);
//!
//! // Full run: every chapter plus the site index.
//! SiteBuilder::new(&config, &corpus, &rules, &mut renderer)
//!     .run(&[])
//!     .unwrap();
//! ```

pub mod corpus;
pub mod error;
pub mod katex;
pub mod page;
pub mod parser;
pub mod registry;
pub mod rules;
pub mod site;

pub use corpus::Corpus;
pub use error::{Error, Result};
pub use katex::{render_math_placeholders, KatexProcess, MathRenderer, RenderOutcome};
pub use page::Navigation;
pub use parser::{parse_chapter, ParsedChapter, ParserState};
pub use registry::{TagEntry, TagRegistry};
pub use rules::{default_rules, RuleTable};
pub use site::{Config, SiteBuilder};
