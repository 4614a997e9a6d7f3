use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;
use sinan_core::export::{HEADING_MAX_LEN, url_host};
use sinan_core::toc::parse_level;
use sinan_core::{
    ContentNormalizer, ExportOptions, ExportOutcome, SinanError, SiteAdapter, SnapshotAdapter,
    TocCache, TocConfig, TocOptions, Turn, build_turn_heading, export_dir_from_env,
    export_turns_as_markdown, extract_markdown_toc, render_toc_markdown, render_turns_markdown,
    select_turns, to_pretty_json,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SINAN_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Parser)]
#[command(
    name = "sinan",
    version,
    about = "Pair, outline and export chat conversation snapshots"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the user/assistant turns of a snapshot
    Turns {
        snapshot: PathBuf,

        /// Output JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// Print the table of contents of a snapshot or a markdown file
    Toc {
        /// Conversation snapshot (.json) or markdown document (.md)
        input: PathBuf,

        /// Only outline the turn with this id
        #[arg(long)]
        turn: Option<String>,

        #[arg(long)]
        min_level: Option<String>,

        #[arg(long)]
        max_level: Option<String>,

        /// Read headings from the rendered html instead of the markdown
        #[arg(long)]
        dom: bool,

        /// Output JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// Export turns as a markdown document
    Export {
        snapshot: PathBuf,

        /// Comma separated turn ids; all turns when omitted
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,

        /// Source label; defaults to the snapshot site or url host
        #[arg(long)]
        source: Option<String>,

        /// Conversation url; defaults to the snapshot url
        #[arg(long)]
        url: Option<String>,

        /// Directory to write into; defaults to SINAN_EXPORT_DIR or the download dir
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Print the document instead of writing a file
        #[arg(long)]
        stdout: bool,

        /// Print the export outcome as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> sinan_core::Result<()> {
    match cli.command {
        Command::Turns { snapshot, json } => run_turns(&snapshot, json),
        Command::Toc {
            input,
            turn,
            min_level,
            max_level,
            dom,
            json,
        } => {
            let config = TocConfig::from_env()?;
            debug!(
                min_level = config.options.min_level,
                max_level = config.options.max_level,
                cache_capacity = config.cache_capacity,
                "resolved toc config"
            );

            let min_level = min_level
                .as_deref()
                .map(parse_level)
                .transpose()?
                .unwrap_or(config.options.min_level);
            let max_level = max_level
                .as_deref()
                .map(parse_level)
                .transpose()?
                .unwrap_or(config.options.max_level);
            let options = TocOptions::new(min_level, max_level);
            run_toc(
                config.cache_capacity,
                &input,
                turn.as_deref(),
                options,
                dom,
                json,
            )
        }
        Command::Export {
            snapshot,
            select,
            source,
            url,
            out_dir,
            stdout,
            json,
        } => {
            let adapter = SnapshotAdapter::load(&snapshot)?;
            let turns = adapter.conversation_turns();
            let turns = if select.is_empty() {
                turns
            } else {
                select_turns(&turns, select.as_slice())?
            };

            let url = url.or_else(|| adapter.url().map(ToString::to_string));
            let source = source.or_else(|| snapshot_source(&adapter, url.as_deref()));
            let options = ExportOptions {
                source,
                url,
                exported_at: None,
            };

            let result = export_turns_as_markdown(&ContentNormalizer::new(), &turns, &options);
            let outcome = ExportOutcome::from(&result);
            let export = match result {
                Ok(export) => export,
                Err(err) => {
                    if json {
                        println!("{}", to_pretty_json(&outcome)?);
                    }
                    return Err(err.into());
                }
            };

            if stdout {
                print!("{}", export.markdown);
                return Ok(());
            }

            let dir = out_dir.unwrap_or_else(export_dir_from_env);
            debug!(export_dir = %dir.display(), "resolved export dir");
            let path = export.write_to(&dir)?;
            if json {
                println!("{}", to_pretty_json(&outcome)?);
            } else {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

fn run_turns(snapshot: &Path, json: bool) -> sinan_core::Result<()> {
    let adapter = SnapshotAdapter::load(snapshot)?;
    let turns = adapter.conversation_turns();

    if json {
        println!("{}", to_pretty_json(&turns)?);
    } else {
        let source =
            snapshot_source(&adapter, adapter.url()).unwrap_or_else(|| "chat".to_string());
        print!("{}", render_turns_markdown(&source, &turns));
    }
    Ok(())
}

fn run_toc(
    cache_capacity: usize,
    input: &Path,
    turn_id: Option<&str>,
    options: TocOptions,
    dom: bool,
    json: bool,
) -> sinan_core::Result<()> {
    if is_markdown_file(input) {
        let markdown = fs::read_to_string(input).map_err(|source| SinanError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let entries = extract_markdown_toc(&markdown, options);
        if json {
            println!("{}", to_pretty_json(&entries)?);
        } else {
            print!("{}", render_toc_markdown(&entries));
        }
        return Ok(());
    }

    let adapter = SnapshotAdapter::load(input)?;
    let turns = adapter.conversation_turns();
    let turns: Vec<&Turn> = match turn_id {
        Some(id) => vec![
            turns
                .iter()
                .find(|turn| turn.id == id)
                .ok_or_else(|| SinanError::UnknownTurn(id.to_string()))?,
        ],
        None => turns.iter().collect(),
    };

    let normalizer = ContentNormalizer::new();
    let mut cache = TocCache::new(cache_capacity);
    let mut outlines = Vec::with_capacity(turns.len());
    for turn in turns {
        let entries = if dom {
            cache
                .dom_headings(turn)
                .into_iter()
                .filter(|entry| options.contains(entry.level))
                .collect()
        } else {
            cache.markdown_toc(&normalizer, turn, options)
        };
        outlines.push((turn, entries));
    }

    if json {
        let value = outlines
            .iter()
            .map(|(turn, entries)| json!({ "turn_id": turn.id, "entries": entries }))
            .collect::<Vec<_>>();
        println!("{}", to_pretty_json(&value)?);
        return Ok(());
    }

    for (turn, entries) in &outlines {
        println!("## {}", build_turn_heading(&turn.user.text, HEADING_MAX_LEN));
        println!();
        print!("{}", render_toc_markdown(entries));
        println!();
    }
    Ok(())
}

fn snapshot_source(adapter: &SnapshotAdapter, url: Option<&str>) -> Option<String> {
    let domain = adapter.domain();
    if domain.is_empty() {
        url.and_then(url_host)
    } else {
        Some(domain.to_string())
    }
}

fn is_markdown_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
}
