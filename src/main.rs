//! texsite - LaTeX corpus to HTML site generator

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use texsite::{default_rules, Config, Corpus, KatexProcess, SiteBuilder};

#[derive(Parser)]
#[command(name = "texsite")]
#[command(version, about = "LaTeX corpus to HTML site generator", long_about = None)]
#[command(after_help = "EXAMPLES:
    texsite                     Rebuild the whole site and its index
    texsite algebra schemes     Rebuild only the named chapters")]
struct Cli {
    /// Chapters to process; all chapters (plus the index) when omitted
    #[arg(value_name = "CHAPTER")]
    chapters: Vec<String>,

    /// Project root (output, templates, registry snapshot)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Corpus checkout (chapter sources, chapters.tex, tags)
    #[arg(long)]
    corpus_dir: Option<PathBuf>,

    /// Math renderer command and arguments
    #[arg(
        long,
        num_args = 1..,
        value_name = "ARG",
        default_values_t = ["node".to_string(), "lib/katexfilter.js".to_string()]
    )]
    katex_cmd: Vec<String>,

    /// Title of the index page
    #[arg(long)]
    site_title: Option<String>,

    /// Only log warnings
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> texsite::Result<()> {
    let corpus_dir = cli
        .corpus_dir
        .clone()
        .unwrap_or_else(|| cli.project_dir.join("corpus"));
    let corpus = Corpus::load(&corpus_dir)?;

    let mut config = Config::new(&cli.project_dir);
    if let Some(title) = &cli.site_title {
        config.site_title = title.clone();
    }

    let rules = default_rules();
    let mut renderer = KatexProcess::new(cli.katex_cmd.clone());

    SiteBuilder::new(&config, &corpus, &rules, &mut renderer).run(&cli.chapters)
}
