use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_unify::app::{App, QueryRequest, SterilizeOptions};
use kira_unify::config::{ConfigLoader, ResolvedConfig};
use kira_unify::domain::GeneId;
use kira_unify::error::UnifyError;
use kira_unify::output::{
    JsonOutput, LogSink, OutputMode, print_list_summary, print_query_summary,
    print_sterilize_summary,
};
use kira_unify::resolver::{GeneResolver, MyGeneHttpClient, TableResolver};

#[derive(Parser)]
#[command(name = "kira-unify")]
#[command(about = "Unify heterogeneous genomic datasets and query them as one corpus")]
#[command(version, author)]
struct Cli {
    /// Path to kira-unify.json (default: ./kira-unify.json).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Datasets root, overriding the config.
    #[arg(long, global = true)]
    root: Option<Utf8PathBuf>,

    /// Resolve gene symbols from a local `symbol,gene_id` CSV instead of mygene.info.
    #[arg(long, global = true)]
    gene_map: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Normalize raw datasets into canonical metadata and expression tables")]
    Sterilize(SterilizeArgs),
    #[command(about = "List datasets and their normalization state")]
    List,
    #[command(about = "Restrict patients and genes and write the combined tables")]
    Query(QueryArgs),
}

#[derive(Args)]
struct SterilizeArgs {
    #[arg(short, long, value_delimiter = ',')]
    datasets: Option<Vec<String>>,

    /// Rewrite canonical tables even if they already exist.
    #[arg(short, long)]
    force: bool,
}

#[derive(Args)]
struct QueryArgs {
    #[arg(short, long, value_delimiter = ',')]
    datasets: Option<Vec<String>>,

    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    #[arg(long)]
    sex: Option<String>,

    #[arg(long)]
    min_age: Option<f64>,

    #[arg(long)]
    max_age: Option<f64>,

    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    ids: Vec<String>,

    #[arg(short, long, default_value = "unified")]
    out: Utf8PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<UnifyError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &UnifyError) -> u8 {
    match error {
        UnifyError::MissingConfig | UnifyError::ConfigRead(_) => 2,
        error if error.is_resolver() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<u8> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let requires_fields = matches!(cli.command, Commands::Sterilize(_));
    let config = load_config(cli.config.as_deref(), cli.root, requires_fields)?;
    let resolver = build_resolver(&config, cli.gene_map.as_ref())?;
    let app = App::new(config, resolver);

    match cli.command {
        Commands::Sterilize(args) => run_sterilize(&app, args, output_mode),
        Commands::List => run_list(&app, output_mode),
        Commands::Query(args) => run_query(&app, args, output_mode),
    }
}

/// `--root` stands in for a missing config file, except where the field list is needed.
fn load_config(
    path: Option<&str>,
    root: Option<Utf8PathBuf>,
    requires_fields: bool,
) -> miette::Result<ResolvedConfig> {
    match (ConfigLoader::resolve(path), root) {
        (Ok(mut config), Some(root)) => {
            config.datasets_dir = root;
            Ok(config)
        }
        (Ok(config), None) => Ok(config),
        (Err(UnifyError::MissingConfig), Some(root)) if !requires_fields => {
            Ok(ResolvedConfig::for_root(root, Vec::new()))
        }
        (Err(err), _) => Err(err.into()),
    }
}

fn build_resolver(
    config: &ResolvedConfig,
    gene_map: Option<&Utf8PathBuf>,
) -> miette::Result<Box<dyn GeneResolver>> {
    match gene_map {
        Some(path) => Ok(Box::new(TableResolver::load(path)?)),
        None => Ok(Box::new(MyGeneHttpClient::new(&config.resolver)?)),
    }
}

fn run_sterilize(
    app: &App<Box<dyn GeneResolver>>,
    args: SterilizeArgs,
    output_mode: OutputMode,
) -> miette::Result<u8> {
    let options = SterilizeOptions { force: args.force };
    let report = match output_mode {
        OutputMode::Json => {
            let report = app.sterilize(args.datasets, options, &JsonOutput)?;
            JsonOutput::print_sterilize(&report).into_diagnostic()?;
            report
        }
        OutputMode::Human => {
            let report = app.sterilize(args.datasets, options, &LogSink)?;
            print_sterilize_summary(&report);
            report
        }
    };
    Ok(if report.resolver_outage { 3 } else { 0 })
}

fn run_list(app: &App<Box<dyn GeneResolver>>, output_mode: OutputMode) -> miette::Result<u8> {
    match output_mode {
        OutputMode::Json => {
            let result = app.list(&JsonOutput)?;
            JsonOutput::print_list(&result).into_diagnostic()?;
        }
        OutputMode::Human => {
            let result = app.list(&LogSink)?;
            print_list_summary(&result);
        }
    }
    Ok(0)
}

fn run_query(
    app: &App<Box<dyn GeneResolver>>,
    args: QueryArgs,
    output_mode: OutputMode,
) -> miette::Result<u8> {
    let gene_ids = args
        .ids
        .iter()
        .map(|id| id.parse::<GeneId>())
        .collect::<Result<Vec<_>, _>>()?;
    let request = QueryRequest {
        datasets: args.datasets,
        exclude: args.exclude,
        sex: args.sex,
        min_age: args.min_age,
        max_age: args.max_age,
        symbols: args.symbols,
        gene_ids,
        output_dir: args.out,
    };

    match output_mode {
        OutputMode::Json => {
            let result = app.query(request, &JsonOutput)?;
            JsonOutput::print_query(&result).into_diagnostic()?;
        }
        OutputMode::Human => {
            let result = app.query(request, &LogSink)?;
            print_query_summary(&result);
        }
    }
    Ok(0)
}
