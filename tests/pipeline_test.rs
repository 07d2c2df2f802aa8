//! End-to-end pipeline tests: a small two-chapter corpus is built into a
//! complete site in a temporary project directory, with a deterministic fake
//! in place of the external math renderer.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use texsite::{default_rules, Config, Corpus, MathRenderer, RenderOutcome, SiteBuilder};

/// Wraps every formula instead of shelling out to the real renderer.
struct FakeKatex;

impl MathRenderer for FakeKatex {
    fn render(&mut self, tex: &str) -> texsite::Result<RenderOutcome> {
        Ok(RenderOutcome::Html(format!(
            "<span class='katex'>{tex}</span>"
        )))
    }
}

// ============================================================================
// Fixture
// ============================================================================

const SETS_TEX: &str = "\\documentclass{book}\n\
\\title{Set Theory}\n\
\\begin{document}\n\
\\label{section-phantom}\n\
\n\
\\section{Basics}\n\
\\label{section-basics}\n\
\n\
Sets exist and $x \\in X$ holds.\n\
\n\
\\begin{lemma}\n\
\\label{lemma-union}\n\
Unions exist.\n\
\\end{lemma}\n\
\n\
\\begin{proof}\n\
Obvious.\n\
\\end{proof}\n\
\n\
\\input{chapters}\n\
\\end{document}\n";

const SPACES_TEX: &str = "\\documentclass{book}\n\
\\title{Spaces}\n\
\\begin{document}\n\
\\label{section-phantom}\n\
\n\
\\section{Topologies}\n\
\\label{section-topologies}\n\
\n\
Compare with Lemma \\ref{sets-lemma-union} and \\ref{unknown-label}.\n\
\n\
\\input{chapters}\n\
\\end{document}\n";

/// Lay out a project directory: `corpus/` checkout plus `static/` blobs.
fn project() -> (TempDir, Corpus, Config) {
    let dir = TempDir::new().unwrap();

    let corpus_dir = dir.path().join("corpus");
    fs::create_dir(&corpus_dir).unwrap();
    fs::write(
        corpus_dir.join("chapters.tex"),
        "Preliminaries\n\
         \\item \\hyperref[sets-section-phantom]{Set Theory}\n\
         \\item \\hyperref[spaces-section-phantom]{Spaces}\n",
    )
    .unwrap();
    fs::write(
        corpus_dir.join("tags"),
        "0001,sets-section-phantom\n\
         0002,sets-section-basics\n\
         0003,sets-lemma-union\n\
         0004,spaces-section-phantom\n\
         0005,spaces-section-topologies\n",
    )
    .unwrap();
    fs::write(corpus_dir.join("sets.tex"), SETS_TEX).unwrap();
    fs::write(corpus_dir.join("spaces.tex"), SPACES_TEX).unwrap();

    let static_dir = dir.path().join("static");
    fs::create_dir(&static_dir).unwrap();
    fs::write(static_dir.join("_header.html"), "<html><body>\n").unwrap();
    fs::write(static_dir.join("_footer.html"), "</body></html>\n").unwrap();

    let corpus = Corpus::load(&corpus_dir).unwrap();
    let config = Config::new(dir.path());
    (dir, corpus, config)
}

fn build(config: &Config, corpus: &Corpus, chapters: &[String]) {
    let rules = default_rules();
    let mut renderer = FakeKatex;
    SiteBuilder::new(config, corpus, &rules, &mut renderer)
        .run(chapters)
        .unwrap();
}

fn read(config: &Config, name: &str) -> String {
    fs::read_to_string(config.out_dir.join(name)).unwrap()
}

// ============================================================================
// Full runs
// ============================================================================

#[test]
fn full_run_writes_every_page_and_the_index() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);

    for name in [
        "index.html",
        "sets-000.html",
        "sets-001.html",
        "spaces-000.html",
        "spaces-001.html",
    ] {
        assert!(config.out_dir.join(name).exists(), "missing {name}");
    }
    assert!(config.registry_file.exists());

    let page = read(&config, "sets-001.html");
    assert!(page.starts_with("<html><body>\n"));
    assert!(page.ends_with("</body></html>\n"));
    assert!(page.contains("<div class='pre-title'>Chapter 1</div>"));
    assert!(page.contains("<h1>Set Theory</h1>"));
    assert!(page.contains("Sections &sect;1.1 to &sect;1.1"));
    assert!(page.contains("<div class='section' id='0002'>"));
    assert!(page.contains("&sect;1.1"));
}

#[test]
fn formulas_go_through_the_renderer() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);
    let page = read(&config, "sets-001.html");
    assert!(page.contains("<span class='katex'>x \\in X</span>"));
    assert!(!page.contains('\u{4}'));
}

#[test]
fn cross_chapter_reference_links_into_the_other_chapter() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);
    let page = read(&config, "spaces-001.html");
    assert!(page.contains("<a class='ref' href='sets-001.html#0003'>1.1.1</a>"));
}

#[test]
fn unknown_reference_degrades_to_visible_fallback() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);
    let page = read(&config, "spaces-001.html");
    assert!(page.contains("[unknown-label]"));
}

#[test]
fn toc_page_links_into_the_chapter_body() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);
    let toc = read(&config, "sets-000.html");
    assert!(toc.contains("<a class='toc-num' href='sets-001.html#0002'>&sect;1.1</a>"));
    assert!(toc.contains("<a class='toc-title' href='sets-001.html#0002'>Basics</a>"));
    // The TOC page carries no section range line.
    assert!(!toc.contains("post-title"));
}

#[test]
fn navigation_wires_pages_together() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);

    let sets_toc = read(&config, "sets-000.html");
    assert!(sets_toc.contains("<a id='nav-next' href='sets-001.html'>"));
    assert!(sets_toc.contains("<a id='nav-prev' class='disabled'>"));

    // Last page of a chapter points at the next chapter's TOC.
    let sets_body = read(&config, "sets-001.html");
    assert!(sets_body.contains("<a id='nav-next' href='spaces-000.html'>"));
    assert!(sets_body.contains("<a id='nav-prev' href='sets-000.html'>"));

    // A TOC page points back at the previous chapter's last page.
    let spaces_toc = read(&config, "spaces-000.html");
    assert!(spaces_toc.contains("<a id='nav-prev' href='sets-001.html'>"));

    let spaces_body = read(&config, "spaces-001.html");
    assert!(spaces_body.contains("<a id='nav-next' class='disabled'>"));
    assert!(spaces_body.contains("<a id='nav-index' href='index.html'>"));
}

#[test]
fn index_lists_parts_and_chapters() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);
    let index = read(&config, "index.html");
    assert!(index.contains("<li class='toc-part'>Preliminaries"));
    assert!(index.contains("<a class='toc-num' href='sets-000.html'>Chapter 1</a>"));
    assert!(index.contains("<a class='toc-title' href='sets-000.html'>Set Theory</a>"));
    assert!(index.contains("<a class='toc-num' href='spaces-000.html'>Chapter 2</a>"));
}

#[test]
fn two_full_runs_produce_identical_output() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);
    let first_page = read(&config, "sets-001.html");
    let first_index = read(&config, "index.html");

    build(&config, &corpus, &[]);
    assert_eq!(read(&config, "sets-001.html"), first_page);
    assert_eq!(read(&config, "index.html"), first_index);
}

// ============================================================================
// Partial runs
// ============================================================================

#[test]
fn partial_run_resolves_against_the_snapshot() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);
    fs::remove_file(config.out_dir.join("spaces-001.html")).unwrap();
    // Marker to detect an (unwanted) index rebuild.
    fs::write(config.out_dir.join("index.html"), "stale marker").unwrap();

    build(&config, &corpus, &["spaces".to_string()]);

    // The cross-chapter link still resolves even though "sets" was not
    // reparsed this run.
    let page = read(&config, "spaces-001.html");
    assert!(page.contains("<a class='ref' href='sets-001.html#0003'>1.1.1</a>"));
    // Only the requested chapter's pages are touched.
    assert_eq!(read(&config, "index.html"), "stale marker");
}

#[test]
fn partial_run_leaves_other_chapters_alone() {
    let (_dir, corpus, config) = project();
    build(&config, &corpus, &[]);
    fs::write(config.out_dir.join("sets-001.html"), "untouched").unwrap();

    build(&config, &corpus, &["spaces".to_string()]);
    assert_eq!(read(&config, "sets-001.html"), "untouched");
}

// ============================================================================
// Stale output
// ============================================================================

#[test]
fn stale_division_pages_are_removed() {
    let (_dir, corpus, config) = project();
    fs::create_dir_all(&config.out_dir).unwrap();
    // Leftover from a hypothetical earlier run with more divisions.
    fs::write(config.out_dir.join("sets-007.html"), "stale").unwrap();
    // Not a division page; must survive.
    fs::write(config.out_dir.join("sets-notes.html"), "keep").unwrap();

    build(&config, &corpus, &[]);
    assert!(!config.out_dir.join("sets-007.html").exists());
    assert!(config.out_dir.join("sets-notes.html").exists());
    assert!(config.out_dir.join("sets-001.html").exists());
}
