//! Thick Client Bridge agent
//!
//! Command-line shell around `tcb-core`: loads allow-list settings, classifies
//! captured exchanges, and generates selective PAC files.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tcb_core::pac::{local_proxy_host, resolve_proxy_port, write_pac_file, DEFAULT_PROXY_PORT};
use tcb_core::recorder::RowKind;
use tcb_core::{
    EventRecorder, EventRow, FilterSettings, HttpExchange, MemoryRecorder, PacSpec, RuleStore,
    TrafficClassifier,
};

pub mod logging;
pub mod settings;


pub const QUICK_START: &str = "\
Quick start: Thick Client Bridge

1) Point the thick client at your interception proxy (127.0.0.1:8080), or
   install the PAC file from `tcb-agent pac`.
2) Set host patterns and ports for the application (--host-allow, --port-allow).
3) Set --only-matches true to hide traffic that does not match.
4) Exercise the application; matching traffic is labeled [TCB] and requests
   carry the X-TCB: 1 header.

Tip: for clients that ignore proxy settings, use OS-level redirection
(Proxifier, redsocks, pf).
";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML file with allow-list settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Host allow-list regex (matches anywhere in the host name)
    #[arg(long, global = true)]
    pub host_allow: Option<String>,

    /// Comma-separated allowed ports
    #[arg(long, global = true)]
    pub port_allow: Option<String>,

    /// MIME allow-list regex for responses
    #[arg(long, global = true)]
    pub mime_allow: Option<String>,

    /// Show/annotate only matching traffic
    #[arg(long, global = true)]
    pub only_matches: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply the settings and print the resulting rule set
    Apply,

    /// Classify a JSON-lines feed of captured exchanges
    Classify {
        /// Feed file (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Write the exchanges, as modified, to this JSON-lines file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print event rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a selective PAC file for the host rule
    Pac {
        /// Address clients should use to reach the proxy
        #[arg(long)]
        proxy_host: Option<String>,

        /// Proxy listening port
        #[arg(long)]
        proxy_port: Option<u16>,

        /// JSON-lines proxy history; the first entry's listener port is used
        #[arg(long)]
        history: Option<PathBuf>,

        /// Directory for the PAC file (system temp directory when omitted)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Print the quick start notes
    Quickstart,
}

/// Counts from one classification run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifySummary {
    pub exchanges: usize,
    pub skipped: usize,
    pub labeled: usize,
}

/// One entry of a proxy history file
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub listener_port: Option<u16>,
}

/// Classifier with its rules applied and a recorder the caller drains
pub struct Session {
    pub classifier: TrafficClassifier,
    pub recorder: Arc<MemoryRecorder>,
    pub settings: FilterSettings,
}

impl Session {
    pub fn new(settings: FilterSettings) -> Self {
        let recorder = Arc::new(MemoryRecorder::new());
        let classifier = TrafficClassifier::new(Arc::new(RuleStore::new()), recorder.clone());
        classifier.apply(&settings);
        Self {
            classifier,
            recorder,
            settings,
        }
    }
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    if let Command::Quickstart = args.command {
        print!("{}", QUICK_START);
        return Ok(());
    }

    let settings = settings::load_filter_settings(&args)?;
    tracing::debug!("Loaded settings: {:?}", settings);

    match args.command {
        Command::Apply => {
            let session = Session::new(settings);
            print_rows(&mut io::stdout().lock(), session.recorder.drain(), false)?;
            Ok(())
        }
        Command::Classify {
            input,
            output,
            json,
        } => {
            let summary = tokio::task::spawn_blocking(move || {
                run_classify(settings, input.as_deref(), output.as_deref(), json)
            })
            .await
            .context("Classification task failed")??;
            tracing::info!(
                exchanges = summary.exchanges,
                skipped = summary.skipped,
                labeled = summary.labeled,
                "Classification finished"
            );
            Ok(())
        }
        Command::Pac {
            proxy_host,
            proxy_port,
            history,
            out_dir,
        } => {
            let session = Session::new(settings);
            let mut stdout = io::stdout().lock();
            let result = generate_pac(
                &session,
                proxy_host,
                proxy_port,
                history.as_deref(),
                out_dir.as_deref(),
            );
            print_rows(&mut stdout, session.recorder.drain(), false)?;
            let path = result?;
            writeln!(stdout, "{}", path.display())?;
            Ok(())
        }
        Command::Quickstart => Ok(()),
    }
}

fn run_classify(
    settings: FilterSettings,
    input: Option<&Path>,
    output: Option<&Path>,
    json: bool,
) -> anyhow::Result<ClassifySummary> {
    let session = Session::new(settings);
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening feed {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut exchanges_out = match output {
        Some(path) => Some(
            File::create(path).with_context(|| format!("Creating {}", path.display()))?,
        ),
        None => None,
    };

    let mut stdout = io::stdout().lock();
    print_rows(&mut stdout, session.recorder.drain(), json)?;
    classify_feed(
        &session,
        reader,
        &mut stdout,
        exchanges_out.as_mut().map(|f| f as &mut dyn Write),
        json,
    )
}

/// Classify each exchange of a JSON-lines feed: request first, then the
/// response when present. Event rows are written to `out` after each
/// exchange, pass rows included unless `only_matches` is set.
pub fn classify_feed<R, W>(
    session: &Session,
    input: R,
    out: &mut W,
    mut exchanges_out: Option<&mut dyn Write>,
    json: bool,
) -> anyhow::Result<ClassifySummary>
where
    R: BufRead,
    W: Write,
{
    let show_pass = !session.settings.only_matches;
    let mut summary = ClassifySummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.context("Reading feed")?;
        if line.trim().is_empty() {
            continue;
        }

        let mut exchange: HttpExchange = match serde_json::from_str(&line) {
            Ok(exchange) => exchange,
            Err(e) => {
                summary.skipped += 1;
                tracing::warn!("Skipping feed line {}: {}", index + 1, e);
                session
                    .recorder
                    .record(EventRow::warn(format!("Skipping feed line {}: {}", index + 1, e)));
                print_rows(out, session.recorder.drain(), json)?;
                continue;
            }
        };
        summary.exchanges += 1;

        let mut directions = vec![(true, RowKind::Request)];
        if exchange.response.is_some() {
            directions.push((false, RowKind::Response));
        }

        for (is_request, kind) in directions {
            let result = session.classifier.process_message(&mut exchange, is_request);
            if result.matched {
                summary.labeled += 1;
            } else if show_pass {
                if let Some(service) = &exchange.service {
                    session
                        .recorder
                        .record(EventRow::pass(kind, &service.host, service.port));
                }
            }
        }

        print_rows(out, session.recorder.drain(), json)?;
        if let Some(writer) = exchanges_out.as_mut() {
            serde_json::to_writer(&mut **writer, &exchange)?;
            writeln!(writer)?;
        }
    }

    out.flush()?;
    Ok(summary)
}

/// Resolve the proxy endpoint, build the PAC and write it out.
///
/// The outcome is also recorded as an info or warn row.
pub fn generate_pac(
    session: &Session,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    history: Option<&Path>,
    out_dir: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    let port = match proxy_port {
        Some(port) => port,
        None => {
            let ports = match history {
                Some(path) => read_history_ports(path)?,
                None => Vec::new(),
            };
            resolve_proxy_port(ports, DEFAULT_PROXY_PORT)
        }
    };
    let host = proxy_host.unwrap_or_else(local_proxy_host);
    let spec = PacSpec::new(host, port, session.settings.host_allow.clone())?;

    match write_pac_file(&spec.render(), out_dir) {
        Ok(path) => {
            tracing::info!("PAC written: {}", path.display());
            session
                .recorder
                .record(EventRow::info(format!("PAC written: {}", path.display())));
            Ok(path)
        }
        Err(e) => {
            tracing::warn!("{}", e);
            session.recorder.record(EventRow::warn(e.to_string()));
            Err(e.into())
        }
    }
}

/// Listener ports from a JSON-lines history file, in file order.
/// Lines without a port, or that fail to parse, are skipped.
pub fn read_history_ports(path: &Path) -> anyhow::Result<Vec<u16>> {
    let file = File::open(path).with_context(|| format!("Opening history {}", path.display()))?;
    let mut ports = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEntry>(&line) {
            Ok(HistoryEntry {
                listener_port: Some(port),
            }) => ports.push(port),
            Ok(_) => {}
            Err(e) => tracing::debug!("Ignoring history line: {}", e),
        }
    }
    Ok(ports)
}

pub fn print_rows<W: Write>(out: &mut W, rows: Vec<EventRow>, json: bool) -> anyhow::Result<()> {
    for row in rows {
        if json {
            serde_json::to_writer(&mut *out, &row)?;
            writeln!(out)?;
        } else {
            writeln!(out, "{}", row.to_line())?;
        }
    }
    Ok(())
}
