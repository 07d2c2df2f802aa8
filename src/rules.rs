//! The rule table: ordered (pattern, handler) pairs compiled into a single
//! alternation.
//!
//! Dispatch is leftmost-first: at each position the earliest-registered
//! pattern that matches wins, which is why two-character escapes like `---`
//! are registered before `--`. Handlers receive the captured groups and the
//! active parse context; they may mutate counters, push bracket scopes, and
//! register tags. They run strictly in document order.
//!
//! Braces appear so often in the patterns (this is TeX) that the builder
//! treats `{` and `}` as literals and escapes them on registration.

use log::{debug, warn};
use regex::Regex;

use crate::parser::{
    parse_fragment, ExitAction, ParseCx, DIVISION_SIZE_LIMIT, MATH_CLOSE, MATH_OPEN, MATH_SEP,
    PAGE_BREAK, REF_MARK, TEXT_FENCE,
};

/// Theorem-like environments sharing the subsection counter.
const THEOREM_ENVS: &str =
    "lemma|proposition|theorem|remark|remarks|example|exercise|situation|definition";

/// Margin annotation environments rendered as footnote-style asides.
const ANNOTATION_ENVS: &str = "slogan|reference|history";

/// Permalink base for bibliography citations.
const BIBLIOGRAPHY_BASE: &str = "https://stacks.math.columbia.edu/bibliography/";

/// One match delivered to a handler: the match offset in the chapter source
/// and the rule's own captured groups, in pattern order.
pub struct RuleMatch<'t> {
    start: usize,
    groups: Vec<&'t str>,
}

impl<'t> RuleMatch<'t> {
    /// Byte offset of the match start (drives the page-break policy).
    pub fn start(&self) -> usize {
        self.start
    }

    /// The `i`-th captured group of the matched rule.
    pub fn group(&self, i: usize) -> &'t str {
        self.groups[i]
    }
}

/// Handler signature: returns the replacement text, or `None` to emit
/// nothing. Side effects on the context are expected.
pub type Handler = fn(&mut ParseCx<'_>, &RuleMatch<'_>) -> Option<String>;

/// Ordered rule registration; `compile` produces the [`RuleTable`].
#[derive(Default)]
pub struct RuleTableBuilder {
    patterns: Vec<String>,
    handlers: Vec<Handler>,
}

impl RuleTableBuilder {
    pub fn new() -> RuleTableBuilder {
        RuleTableBuilder::default()
    }

    /// Register a rule. Order of registration is dispatch priority; braces
    /// in `pattern` are taken literally.
    pub fn rule(&mut self, pattern: &str, handler: Handler) -> &mut RuleTableBuilder {
        let escaped = pattern.replace('{', r"\{").replace('}', r"\}");
        self.patterns.push(escaped);
        self.handlers.push(handler);
        self
    }

    /// Compile all registered patterns into one alternation. Each rule is
    /// wrapped in a named group so the matching rule can be recovered from
    /// the capture set.
    pub fn compile(self) -> RuleTable {
        let alternation = self
            .patterns
            .iter()
            .enumerate()
            .map(|(i, p)| format!("(?P<r{i}>{p})"))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&alternation).expect("rule patterns must compile");
        let mut wrapper_groups = vec![0; self.patterns.len()];
        for (index, name) in regex.capture_names().enumerate() {
            if let Some(rule) = name
                .and_then(|n| n.strip_prefix('r'))
                .and_then(|n| n.parse::<usize>().ok())
            {
                wrapper_groups[rule] = index;
            }
        }
        RuleTable {
            regex,
            handlers: self.handlers,
            wrapper_groups,
        }
    }
}

/// The compiled rule table driving the single substitution pass.
pub struct RuleTable {
    regex: Regex,
    handlers: Vec<Handler>,
    /// Capture index of each rule's wrapper group.
    wrapper_groups: Vec<usize>,
}

impl RuleTable {
    /// Run the substitution pass over `input`, dispatching each match to its
    /// rule's handler in document order.
    pub fn apply(&self, input: &str, cx: &mut ParseCx<'_>) -> String {
        let mut out = String::with_capacity(input.len() + input.len() / 4);
        let mut last = 0;
        for caps in self.regex.captures_iter(input) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            out.push_str(&input[last..whole.start()]);
            last = whole.end();

            let Some(rule) = self
                .wrapper_groups
                .iter()
                .position(|&g| caps.get(g).is_some())
            else {
                continue;
            };
            // Participating groups in index order: the wrapper first, then
            // the rule's own groups.
            let groups: Vec<&str> = caps
                .iter()
                .skip(1)
                .flatten()
                .skip(1)
                .map(|m| m.as_str())
                .collect();
            let m = RuleMatch {
                start: whole.start(),
                groups,
            };
            if let Some(replacement) = (self.handlers[rule])(cx, &m) {
                out.push_str(&replacement);
            }
        }
        out.push_str(&input[last..]);
        out
    }
}

/// Build the full rule set. Registration order is load-bearing.
pub fn default_rules() -> RuleTable {
    let mut t = RuleTableBuilder::new();

    // HTML escapes.
    t.rule(r"<", |_, _| Some("&lt;".into()));
    t.rule(r">", |_, _| Some("&gt;".into()));

    // Math delimiters toggle math mode and defer rendering to the post-pass.
    t.rule(r"\$\$", |cx, _| {
        Some(if cx.state.math_mode {
            cx.state.math_mode = false;
            format!("{MATH_CLOSE}\n")
        } else {
            cx.state.math_mode = true;
            format!("\n{MATH_OPEN}display{MATH_SEP}")
        })
    });
    t.rule(r"\$", |cx, _| {
        Some(if cx.state.math_mode {
            cx.state.math_mode = false;
            MATH_CLOSE.to_string()
        } else {
            cx.state.math_mode = true;
            format!("{MATH_OPEN}inline{MATH_SEP}")
        })
    });

    // Scoped spans: the closing markup is owed to the matching brace.
    t.rule(r"{\\it\s", |cx, _| {
        cx.state.push_scope(Some(ExitAction::CloseSpan));
        Some("<span class='it'>".into())
    });
    t.rule(r"{\\bf\s", |cx, _| {
        cx.state.push_scope(Some(ExitAction::CloseSpan));
        Some("<span class='bf'>".into())
    });
    t.rule(r"{\\bf\\large\s", |cx, _| {
        cx.state.push_scope(Some(ExitAction::CloseSpan));
        Some("<span class='bflarge'>".into())
    });
    t.rule(r"(\\textbf{)", |cx, m| {
        if cx.state.math_mode {
            Some(m.group(0).into())
        } else {
            cx.state.push_scope(Some(ExitAction::CloseSpan));
            Some("<span class='bf'>".into())
        }
    });
    t.rule(r"(\\(textit|emph){)", |cx, m| {
        if cx.state.math_mode {
            Some(m.group(0).into())
        } else {
            cx.state.push_scope(Some(ExitAction::CloseSpan));
            Some("<span class='it'>".into())
        }
    });
    t.rule(r"{\\v (\w)}", |cx, m| {
        Some(if cx.state.math_mode {
            format!("{{\\v {}}}", m.group(0))
        } else {
            format!("&{}caron;", m.group(0))
        })
    });

    // Bare braces only track nesting; a close without an owed action is
    // emitted literally.
    t.rule(r"{", |cx, _| {
        cx.state.push_scope(None);
        Some("{".into())
    });
    t.rule(r"}", |cx, _| {
        Some(match cx.state.pop_scope() {
            Some(markup) => markup.into(),
            None => "}".into(),
        })
    });

    // Paragraph breaks.
    t.rule(r"\n *\n(?:\\medskip)?\\noindent", |cx, _| {
        cx.state.math_mode = false;
        Some("\n<p>\n".into())
    });
    t.rule(r"\n\n", |cx, _| {
        if cx.state.math_mode {
            None
        } else {
            Some("\n<p>\n".into())
        }
    });

    // Structural constructs.
    t.rule(r"\\section{(.*)}\n\\label{(.*)}", section);
    t.rule(r"\\subsection{(.*)}\n\\label{(.*)}", subsection);

    // References defer resolution; the target may not be registered yet.
    t.rule(r"\\ref{([-\w]*)}", reference);
    t.rule(r"\\hyperref\[([-\w]*)\]{([^}]*)}", hyperref);

    t.rule(r"\\cite\[([^\]]*)\]{([-\w]*)}", cite_with_comment);
    t.rule(r"\\cite{([-\w]*)}", cite);
    t.rule(r"\\href{([^}]*)}{([^}]*)}", |_, m| {
        Some(format!("<a href='{}'>{}</a>", m.group(0), m.group(1)))
    });

    t.rule(
        &format!(r"\\begin{{({THEOREM_ENVS})}}\n\\label{{(.*)}}"),
        theorem_env,
    );
    t.rule(
        &format!(r"\\begin{{({THEOREM_ENVS})}}\[([^\]]*)\]\n\\label{{(.*)}}"),
        theorem_env_titled,
    );
    t.rule(&format!(r"\\end{{({THEOREM_ENVS})}}"), |cx, _| {
        cx.state.math_mode = false;
        Some("\n</div>\n".into())
    });

    t.rule(r"\\begin{proof}", |cx, _| {
        cx.state.math_mode = false;
        Some("\n<div class='proof'>\n<span class='proof-header'>proof</span>\n".into())
    });
    t.rule(r"\\end{proof}", |cx, _| {
        cx.state.math_mode = false;
        Some("\n</div>\n".into())
    });

    t.rule(r"\\begin{equation}\n\\label{(.*)}", equation);
    t.rule(r"\\end{equation}", |cx, _| {
        cx.state.math_mode = false;
        Some(format!("\n{MATH_CLOSE}\n</div>\n"))
    });

    t.rule(r"\\begin{enumerate}", |cx, _| {
        cx.state.math_mode = false;
        cx.state.item_number = 1;
        Some("\n<ol>\n".into())
    });
    t.rule(r"\\end{enumerate}", |cx, _| {
        cx.state.math_mode = false;
        cx.state.item_number = 0;
        Some("\n</ol>\n".into())
    });
    t.rule(r"\\begin{itemize}", |cx, _| {
        cx.state.math_mode = false;
        cx.state.item_number = 1;
        Some("\n<ul>\n".into())
    });
    t.rule(r"\\end{itemize}", |cx, _| {
        cx.state.math_mode = false;
        cx.state.item_number = 0;
        Some("\n</ul>\n".into())
    });
    t.rule(r"\\begin{center}", |cx, _| {
        cx.state.math_mode = false;
        Some("\n<div class='center'>\n".into())
    });
    t.rule(r"\\end{center}", |cx, _| {
        cx.state.math_mode = false;
        Some("\n</div>\n".into())
    });
    t.rule(r"\\begin{quote}", |cx, _| {
        cx.state.math_mode = false;
        Some("\n<div class='quote'>\n".into())
    });
    t.rule(r"\\end{quote}", |cx, _| {
        cx.state.math_mode = false;
        Some("\n</div>\n".into())
    });
    t.rule(r"\\begin{verbatim}", |cx, _| {
        cx.state.math_mode = false;
        Some("\n<pre>\n".into())
    });
    t.rule(r"\\end{verbatim}", |cx, _| {
        cx.state.math_mode = false;
        Some("\n</pre>\n".into())
    });

    // The chapter TOC is synthesized during pagination; drop the macro.
    t.rule(r"\\tableofcontents", |_, _| None);

    t.rule(r"(\\bigskip)", |cx, m| {
        Some(if cx.state.math_mode {
            m.group(0).into()
        } else {
            "\n<p>\n".into()
        })
    });
    t.rule(r"(\\copyright)", |cx, m| {
        Some(if cx.state.math_mode {
            m.group(0).into()
        } else {
            "&copy;".into()
        })
    });

    t.rule(r"\\item(.*)\n\\label{(.*)}", item_labelled);
    t.rule(r"\\item\[([^\]]*)\]", |cx, m| {
        cx.state.math_mode = false;
        cx.state.item_number += 1;
        Some(format!(
            "\n<li class='item manualcounter'><span class='counter'>{}</span>\n",
            m.group(0)
        ))
    });
    t.rule(r"\\item", |cx, _| {
        cx.state.math_mode = false;
        cx.state.item_number += 1;
        Some("\n<li class='item'>\n".into())
    });

    t.rule(r"\\footnote{", footnote);

    t.rule(&format!(r"\\begin{{({ANNOTATION_ENVS})}}"), |cx, m| {
        cx.state.math_mode = false;
        cx.state.push_scope(Some(ExitAction::CloseAnnotation));
        Some(format!(
            "<span class='footnote'><span class='footnote-content'><span class='footnote-title'>{}</span>",
            m.group(0)
        ))
    });
    t.rule(&format!(r"\\end{{({ANNOTATION_ENVS})}}"), |cx, _| {
        cx.state.math_mode = false;
        cx.state.pop_scope().map(String::from)
    });

    // Typographic substitutions revert to literal TeX in math mode, where
    // the external renderer expects real source.
    t.rule(r"~", |cx, _| {
        Some(if cx.state.math_mode { "~" } else { "&nbsp;" }.into())
    });
    t.rule(r"``", |cx, _| {
        Some(if cx.state.math_mode { "``" } else { "&#8220;" }.into())
    });
    t.rule(r"''", |cx, _| {
        Some(if cx.state.math_mode { "''" } else { "&#8221;" }.into())
    });
    t.rule(r"---", |cx, _| {
        Some(if cx.state.math_mode { "---" } else { "&mdash;" }.into())
    });
    t.rule(r"--", |cx, _| {
        Some(if cx.state.math_mode { "--" } else { "&ndash;" }.into())
    });
    t.rule(r"\.\\ ", |cx, _| {
        Some(if cx.state.math_mode { ".\\ " } else { ".&nbsp;" }.into())
    });

    // Math operator macros from the corpus preamble, expanded to source the
    // renderer understands.
    t.rule(r"\\(lim|colim|Hom|Mor|Ob|Spec|SheafHom|Sh|NL)", math_operator);
    t.rule(r"\\etale", |cx, _| {
        Some(
            if cx.state.math_mode {
                "{&eacute;tale}"
            } else {
                "&eacute;tale"
            }
            .into(),
        )
    });
    t.rule(r"\\proetale", |cx, _| {
        Some(
            if cx.state.math_mode {
                "{pro-&eacute;tale}"
            } else {
                "pro-&eacute;tale"
            }
            .into(),
        )
    });
    t.rule(r"\\(Sch|QCoh)", |_, m| {
        Some(format!("\\textit{{{}}}", m.group(0)))
    });
    t.rule(r"\\(Ker|Im|Coker|Coim)", |_, m| {
        Some(format!("\\text{{{}}}", m.group(0)))
    });

    // Accent macros, braced and unbraced forms.
    t.rule(r"\\'(\w)", |_, m| Some(format!("&{}acute;", m.group(0))));
    t.rule(r"\\'{(\w)}", |_, m| Some(format!("&{}acute;", m.group(0))));
    t.rule(r"\\`(\w)", |_, m| Some(format!("&{}grave;", m.group(0))));
    t.rule(r"\\`{(\w)}", |_, m| Some(format!("&{}grave;", m.group(0))));
    t.rule(r#"\\"(\w)"#, |_, m| Some(format!("&{}uml;", m.group(0))));
    t.rule(r#"\\"{(\w)}"#, |_, m| Some(format!("&{}uml;", m.group(0))));
    t.rule(r"\\v{(\w)}", |cx, m| {
        Some(if cx.state.math_mode {
            format!("\\v{{{}}}", m.group(0))
        } else {
            format!("&{}caron;", m.group(0))
        })
    });

    t.rule(r"(\\%)", |cx, m| {
        Some(if cx.state.math_mode {
            m.group(0).into()
        } else {
            "%".into()
        })
    });

    t.compile()
}

fn section(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    cx.state.math_mode = false;
    let mut out = String::new();
    if cx.state.section_number > 0 {
        // Close the previous section; break the page if it grew past the
        // size limit.
        if m.start() - cx.state.division_start > DIVISION_SIZE_LIMIT {
            cx.state.division_number += 1;
            debug!(
                "{}: page break before section {}",
                cx.state.chapter_name,
                cx.state.section_number + 1
            );
            cx.state
                .division_first_section
                .insert(cx.state.division_number, cx.state.section_number + 1);
            cx.state.division_start = m.start();
            out.push_str("\n</div>\n");
            out.push(PAGE_BREAK);
        } else {
            out.push_str("\n</div>\n");
        }
    }
    cx.state.section_number += 1;
    cx.state.subsection_number = 0;
    cx.state.equation_number = 0;
    cx.state
        .division_last_section
        .insert(cx.state.division_number, cx.state.section_number);
    let number = format!("{}.{}", cx.state.chapter_number, cx.state.section_number);
    let title = parse_fragment(cx, m.group(0));
    let (tag, badge) = cx.register_tag(m.group(1), &number, &title);
    out.push_str(&format!(
        "\n<div class='section' id='{tag}'>{badge}\n<h2><span class='number'>&sect;{number}</span>{title}</h2>\n"
    ));
    Some(out)
}

fn subsection(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    cx.state.math_mode = false;
    cx.state.subsection_number += 1;
    cx.state.equation_number = 0;
    let number = format!(
        "{}.{}.{}",
        cx.state.chapter_number, cx.state.section_number, cx.state.subsection_number
    );
    let title = parse_fragment(cx, m.group(0));
    let (tag, badge) = cx.register_tag(m.group(1), &number, &title);
    Some(format!(
        "\n<div class='subsection' id='{tag}'>{badge}\n<h3><span class='number'>&para;{number}</span>{title}</h3>\n"
    ))
}

/// Qualify a bare label with the chapter name when its first dash-component
/// is a recognized label type.
fn qualify_label(cx: &ParseCx<'_>, label: &str) -> String {
    let head = label.split('-').next().unwrap_or("");
    if cx.corpus.is_label_type(head) {
        format!("{}-{label}", cx.state.chapter_name)
    } else {
        label.to_string()
    }
}

fn reference(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    let label = qualify_label(cx, m.group(0));
    match cx.corpus.label_to_tag(&label) {
        // In math mode the renderer gets a plain number, not a link.
        Some(tag) => Some(if cx.state.math_mode {
            format!("{REF_MARK}${tag}")
        } else {
            format!("{REF_MARK}a{tag}")
        }),
        None => {
            warn!("tag not found for label: {label}");
            Some(format!("[{label}]"))
        }
    }
}

fn hyperref(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    let text = parse_fragment(cx, m.group(1));
    let label = qualify_label(cx, m.group(0));
    match cx.corpus.label_to_tag(&label) {
        Some(tag) => Some(format!("{REF_MARK}a{tag}{TEXT_FENCE}{text}{TEXT_FENCE}")),
        None => {
            warn!("tag not found for label: {label}");
            Some(format!("[{label}]"))
        }
    }
}

fn bibliography_link(cite: &str) -> String {
    format!("<a href='{BIBLIOGRAPHY_BASE}{cite}'>{cite}</a>")
}

fn cite_with_comment(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    let comment = parse_fragment(cx, m.group(0));
    Some(format!("[{}, {comment}]", bibliography_link(m.group(1))))
}

fn cite(_cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    Some(format!("[{}]", bibliography_link(m.group(0))))
}

fn theorem_env(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    cx.state.math_mode = false;
    cx.state.subsection_number += 1;
    cx.state.equation_number = 0;
    let number = format!(
        "{}.{}.{}",
        cx.state.chapter_number, cx.state.section_number, cx.state.subsection_number
    );
    let env = m.group(0);
    let (tag, badge) = cx.register_tag(m.group(1), &number, "");
    Some(format!(
        "\n<div class='thm {env}' id='{tag}'>{badge}\n<span class='thm-header'>{env}<span class='number'> {number}</span></span>\n"
    ))
}

fn theorem_env_titled(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    cx.state.math_mode = false;
    cx.state.subsection_number += 1;
    cx.state.equation_number = 0;
    let number = format!(
        "{}.{}.{}",
        cx.state.chapter_number, cx.state.section_number, cx.state.subsection_number
    );
    let env = m.group(0);
    let title = m.group(1);
    let (tag, badge) = cx.register_tag(m.group(2), &number, title);
    Some(format!(
        "\n<div class='thm {env}' id='{tag}'>{badge}\n<span class='thm-header'>{env}<span class='number'> {number}</span>\n<span class='title'>{title}</span></span>\n"
    ))
}

fn equation(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    cx.state.math_mode = true;
    cx.state.equation_number += 1;
    let number = format!(
        "{}.{}.{}.{}",
        cx.state.chapter_number,
        cx.state.section_number,
        cx.state.subsection_number,
        cx.state.equation_number
    );
    let (tag, badge) = cx.register_tag(m.group(0), &number, "");
    Some(format!(
        "\n<div class='equation' id='{tag}'>{badge}\n<span class='equation-label'>{number}</span>\n{MATH_OPEN}display{MATH_SEP}\n"
    ))
}

fn item_labelled(cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    cx.state.math_mode = false;
    let number = cx.state.item_number;
    cx.state.item_number += 1;
    let tail = if m.group(0).is_empty() {
        String::new()
    } else {
        parse_fragment(cx, m.group(0))
    };
    let (tag, badge) = cx.register_tag(m.group(1), &number.to_string(), "");
    Some(format!("\n<li id='{tag}' class='item'>{badge} {tail}\n"))
}

fn footnote(cx: &mut ParseCx<'_>, _m: &RuleMatch<'_>) -> Option<String> {
    cx.state.math_mode = false;
    cx.state.footnote_number += 1;
    cx.state.push_scope(Some(ExitAction::CloseFootnote));
    let n = cx.state.footnote_number;
    Some(format!(
        "<a href='#footnote{n}' class='footnote-link'>{n}</a>\
         <span class='footnote' id='footnote{n}'>\
         <span class='footnote-content'>\
         <span class='footnote-number'>{n}</span>"
    ))
}

fn math_operator(_cx: &mut ParseCx<'_>, m: &RuleMatch<'_>) -> Option<String> {
    let name = m.group(0);
    let limits = if name == "Spec" { "" } else { "\\nolimits" };
    let body = match name {
        "SheafHom" => "\\mathcal{H}\\!{\\it om}".to_string(),
        "Sh" => "\\textit{Sh}".to_string(),
        "NL" => "N\\!L".to_string(),
        other => format!("\\rm {other}"),
    };
    Some(format!("\\mathop{{{body}}}{limits}"))
}
