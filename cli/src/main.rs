use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use routing::portal::portal_defs;
use routing::{HistoryMode, Params, RouteDef, RouteError, RouteTable, ViewRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("route table rejected: {0}")]
    Route(#[from] RouteError),
    #[error("no route matches `{0}`")]
    NoMatch(String),
    #[error("invalid parameter `{0}`; expected key=value")]
    InvalidParam(String),
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "portal-routes", about = "Inspect and check the patient portal route table")]
struct Cli {
    /// Route definitions JSON file to use instead of the built-in portal table.
    #[arg(long, env = "PORTAL_ROUTES_FILE", global = true)]
    file: Option<PathBuf>,

    /// Log route lookups to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every route in match order.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Resolve a path or browser URL to its route.
    Match {
        location: String,
        #[command(flatten)]
        mode: ModeArgs,
        #[arg(long)]
        json: bool,
    },
    /// Build the link for a named route.
    Url {
        name: String,
        /// Parameters as key=value.
        #[arg(value_parser = parse_param)]
        params: Vec<(String, String)>,
        #[command(flatten)]
        mode: ModeArgs,
    },
    /// Validate the table; exits non-zero when it is rejected.
    Check,
}

#[derive(Args, Debug, Default)]
struct ModeArgs {
    /// Treat locations as hash-mode URLs (`/#/path`).
    #[arg(long, conflicts_with = "base")]
    hash: bool,

    /// Web-history base path, e.g. `/app`.
    #[arg(long)]
    base: Option<String>,
}

impl ModeArgs {
    fn history_mode(&self) -> Option<HistoryMode> {
        if self.hash {
            Some(HistoryMode::Hash)
        } else {
            self.base.as_deref().map(HistoryMode::web)
        }
    }
}

/// One row of a route definitions file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct DefInput {
    path: String,
    name: String,
    #[serde(default)]
    view: Option<String>,
    #[serde(default)]
    chunk: Option<String>,
}

impl From<DefInput> for RouteDef<String> {
    fn from(input: DefInput) -> Self {
        let view = input.view.unwrap_or_else(|| input.name.clone());
        let view = match input.chunk {
            Some(chunk) => ViewRef::lazy(chunk, view),
            None => ViewRef::Eager(view),
        };
        RouteDef::new(input.path, input.name, view)
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct MatchReport {
    route: String,
    view: String,
    path: String,
    params: Params,
    chunk: Option<String>,
}

fn parse_param(raw: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(CliError::InvalidParam(raw.to_owned())),
    }
}

fn parse_defs(json: &str) -> Result<Vec<RouteDef<String>>, CliError> {
    let rows: Vec<DefInput> = serde_json::from_str(json)?;
    Ok(rows.into_iter().map(RouteDef::from).collect())
}

fn load_table(file: Option<&Path>) -> Result<RouteTable<String>, CliError> {
    let defs = match file {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|source| CliError::Read { path: path.to_owned(), source })?;
            parse_defs(&json)?
        }
        None => portal_defs().into_iter().map(|d| d.map_view(|v| format!("{v:?}"))).collect(),
    };
    Ok(RouteTable::new(defs)?)
}

fn list_lines(table: &RouteTable<String>) -> Vec<String> {
    table
        .iter()
        .map(|r| {
            let placement = r.view().chunk().map_or_else(|| "eager".to_owned(), |c| format!("chunk:{c}"));
            format!("{:<14} {:<24} {:<14} {placement}", r.name(), r.template().as_str(), r.view().view())
        })
        .collect()
}

fn match_report(table: &RouteTable<String>, location: &str, mode: Option<&HistoryMode>) -> Result<MatchReport, CliError> {
    let path = mode.map_or_else(|| location.to_owned(), |m| m.route_path(location));
    let found = table.match_path(&path).ok_or_else(|| CliError::NoMatch(path.clone()))?;
    Ok(MatchReport {
        route: found.name.to_owned(),
        view: found.view.view().clone(),
        path: found.path,
        params: found.params,
        chunk: found.view.chunk().map(str::to_owned),
    })
}

fn build_url(
    table: &RouteTable<String>,
    name: &str,
    params: &[(String, String)],
    mode: Option<&HistoryMode>,
) -> Result<String, CliError> {
    let params: Params = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let url = table.url_for(name, &params)?;
    Ok(match mode {
        Some(mode) => mode.href(&url),
        None => url,
    })
}

fn init_tracing(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let table = load_table(cli.file.as_deref())?;

    match cli.command {
        Command::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&table.manifest())?);
            } else {
                for line in list_lines(&table) {
                    println!("{line}");
                }
            }
        }
        Command::Match { location, mode, json } => {
            let report = match_report(&table, &location, mode.history_mode().as_ref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("route:  {}", report.route);
                println!("view:   {}", report.view);
                println!("path:   {}", report.path);
                for (key, value) in report.params.iter() {
                    println!("param:  {key}={value}");
                }
                println!("chunk:  {}", report.chunk.as_deref().unwrap_or("eager"));
            }
        }
        Command::Url { name, params, mode } => {
            println!("{}", build_url(&table, &name, &params, mode.history_mode().as_ref())?);
        }
        Command::Check => {
            println!("ok: {} routes, {} lazy chunks", table.len(), table.chunks().len());
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
