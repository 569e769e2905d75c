use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;

use biometa_sync::app::{self, Orchestrator};
use biometa_sync::config::{ConfigLoader, ResolvedConfig};
use biometa_sync::domain::{NodeType, RegistryId};
use biometa_sync::error::SyncError;
use biometa_sync::ledger::Ledger;
use biometa_sync::logging;
use biometa_sync::osdf::OsdfClient;
use biometa_sync::output::{JsonOutput, OutputMode, StderrProgress, summary_lines};
use biometa_sync::retrieve;

#[derive(Parser)]
#[command(name = "biometa-sync")]
#[command(about = "Submit hierarchical study metadata from CSV files to an OSDF registry")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Config file (default: biometa-sync.json in the working directory)")]
    config: Option<String>,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[arg(long, global = true, help = "Print machine-readable JSON results on stdout")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Submit every row of a CSV file as nodes of one type")]
    Submit(SubmitArgs),
    #[command(about = "Submit every configured data file, parents before children")]
    SubmitAll,
    #[command(about = "Look up the registry id tracked for an internal id")]
    Lookup(LookupArgs),
    #[command(about = "List tracked children of a node")]
    Children(LookupArgs),
    #[command(about = "Record an existing registry node in the ledger")]
    Track(TrackArgs),
    #[command(about = "Print the registry query built for an internal id")]
    Query(QueryArgs),
    #[command(about = "Write registry nodes carrying the given tags to a CSV file")]
    Retrieve(RetrieveArgs),
}

#[derive(Args)]
struct SubmitArgs {
    node_type: String,
    input: Utf8PathBuf,
}

#[derive(Args)]
struct LookupArgs {
    node_type: String,
    internal_id: String,
}

#[derive(Args)]
struct TrackArgs {
    node_type: String,
    internal_id: String,
    registry_id: String,

    #[arg(long, help = "Parent as <node_type>:<internal_id>:<registry_id>")]
    parent: Option<String>,
}

#[derive(Args)]
struct QueryArgs {
    value: String,

    #[arg(long, default_value = "tags", help = "Field to scope the terms to")]
    field: String,
}

#[derive(Args)]
struct RetrieveArgs {
    node_type: String,

    #[arg(long = "tag", required = true)]
    tags: Vec<String>,

    #[arg(long, short)]
    output: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::MissingConfig
        | SyncError::ConfigRead(_)
        | SyncError::ConfigParse(_)
        | SyncError::CredentialRead(_)
        | SyncError::InvalidSeparator(_) => 2,
        error if error.is_transport() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Submit(args) => run_submit(args, &config, cli.verbose, output_mode),
        Commands::SubmitAll => run_submit_all(&config, cli.verbose, output_mode),
        Commands::Lookup(args) => {
            init_logging(&config, cli.verbose, None)?;
            let node_type: NodeType = args.node_type.parse()?;
            let ledger = Ledger::read_only(config.ledger_path.clone(), config.ledger_match);
            let result = app::lookup(&ledger, node_type, &args.internal_id)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_lookup(&result).into_diagnostic()?,
                OutputMode::Human => match &result.registry_id {
                    Some(id) => println!("{id}"),
                    None => {
                        return Err(miette::Report::msg(format!(
                            "{} {} is not tracked in {}",
                            result.node_type, result.internal_id, result.ledger
                        )));
                    }
                },
            }
            Ok(())
        }
        Commands::Children(args) => {
            init_logging(&config, cli.verbose, None)?;
            let node_type: NodeType = args.node_type.parse()?;
            let ledger = Ledger::read_only(config.ledger_path.clone(), config.ledger_match);
            let result = app::children(&ledger, node_type, &args.internal_id)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_children(&result).into_diagnostic()?,
                OutputMode::Human => {
                    for child in &result.children {
                        println!("{}\t{}\t{}", child.node_type, child.internal_id, child.registry_id);
                    }
                }
            }
            Ok(())
        }
        Commands::Track(args) => {
            init_logging(&config, cli.verbose, Some("track"))?;
            let node_type: NodeType = args.node_type.parse()?;
            let registry_id: RegistryId = args.registry_id.parse()?;
            let parent = args.parent.as_deref().map(parse_parent).transpose()?;
            let ledger = Ledger::open(config.ledger_path.clone(), config.ledger_match)?;
            let added = app::track(
                &ledger,
                node_type,
                &args.internal_id,
                &registry_id,
                parent
                    .as_ref()
                    .map(|(parent_type, internal_id, id)| (*parent_type, internal_id.as_str(), id)),
            )?;
            if !added {
                eprintln!("{node_type} {} already tracked as {registry_id}", args.internal_id);
            }
            Ok(())
        }
        Commands::Query(args) => {
            println!("{}", config.formatter.format(&args.value, &args.field));
            Ok(())
        }
        Commands::Retrieve(args) => {
            init_logging(&config, cli.verbose, Some("retrieve"))?;
            let node_type: NodeType = args.node_type.parse()?;
            let client = registry_client(&config)?;
            let result = retrieve::retrieve(
                &client,
                &config.formatter,
                node_type,
                &args.tags,
                &args.output,
            )?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_retrieve(&result).into_diagnostic()?,
                OutputMode::Human => {
                    println!("{} {} nodes written to {}", result.written, result.node_type, result.output)
                }
            }
            Ok(())
        }
    }
}

fn run_submit(
    args: SubmitArgs,
    config: &ResolvedConfig,
    verbose: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let node_type: NodeType = args.node_type.parse()?;
    let log_name = format!("submit-{node_type}");
    init_logging(config, verbose, Some(log_name.as_str()))?;
    let client = registry_client(config)?;
    let ledger = Ledger::open(config.ledger_path.clone(), config.ledger_match)?;
    let orchestrator = Orchestrator::from_config(client, ledger, config);
    match output_mode {
        OutputMode::Json => {
            let summary = orchestrator.submit(node_type, &args.input, &JsonOutput)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
        }
        OutputMode::Human => {
            let summary = orchestrator.submit(node_type, &args.input, &StderrProgress)?;
            for line in summary_lines(&summary) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn run_submit_all(
    config: &ResolvedConfig,
    verbose: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if config.data_files.is_empty() {
        return Err(SyncError::ConfigParse("no \"data_files\" configured".to_string()).into());
    }
    init_logging(config, verbose, Some("submit-all"))?;
    let client = registry_client(config)?;
    let ledger = Ledger::open(config.ledger_path.clone(), config.ledger_match)?;
    let orchestrator = Orchestrator::from_config(client, ledger, config);
    match output_mode {
        OutputMode::Json => {
            let summaries = orchestrator.submit_all(&config.data_files, &JsonOutput)?;
            JsonOutput::print_json(&summaries).into_diagnostic()?;
        }
        OutputMode::Human => {
            let summaries = orchestrator.submit_all(&config.data_files, &StderrProgress)?;
            for summary in &summaries {
                for line in summary_lines(summary) {
                    println!("{line}");
                }
            }
        }
    }
    Ok(())
}

fn registry_client(config: &ResolvedConfig) -> Result<OsdfClient, SyncError> {
    let settings = config.require_registry()?;
    OsdfClient::new(settings, settings.credentials()?)
}

// Run log files are only written for commands that change state.
fn init_logging(config: &ResolvedConfig, verbose: bool, name: Option<&str>) -> Result<(), SyncError> {
    let log_dir = name.and(config.log_dir.as_deref());
    let files = logging::init(verbose, log_dir, name.unwrap_or("biometa-sync"))?;
    if let Some(files) = files {
        tracing::debug!(log = %files.log, warn = %files.warn, "logging to files");
    }
    Ok(())
}

fn parse_parent(value: &str) -> Result<(NodeType, String, RegistryId), SyncError> {
    let mut parts = value.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(node_type), Some(internal_id), Some(registry_id)) if !internal_id.is_empty() => Ok((
            node_type.parse()?,
            internal_id.to_string(),
            registry_id.parse()?,
        )),
        _ => Err(SyncError::ConfigParse(format!(
            "--parent expects <node_type>:<internal_id>:<registry_id>, got {value:?}"
        ))),
    }
}
