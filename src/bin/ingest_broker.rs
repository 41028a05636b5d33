use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ingest_broker::broker::UploadHandler;
use ingest_broker::bundle::{BundleAssembler, BundleSchemas};
use ingest_broker::config::{BrokerConfig, ConfigLoader};
use ingest_broker::domain::{EntityUuid, OutputFormat, SummaryKind};
use ingest_broker::dump::write_bytes_atomic;
use ingest_broker::error::BrokerError;
use ingest_broker::export::{ExportOptions, Exporter};
use ingest_broker::ingest::{EntityStore, IngestHttpClient};
use ingest_broker::output::{JsonOutput, TsvOutput};
use ingest_broker::staging::{DataStoreHttpClient, StagingHttpClient, StructuralValidator};
use ingest_broker::summary::SummaryService;
use ingest_broker::uploader::resolve_sheet_dir;

#[derive(Parser)]
#[command(name = "ingest-broker")]
#[command(about = "Spreadsheet ingest, bundle export and submission summaries")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Summarise a project or submission by specific entity type")]
    Summary(SummaryArgs),
    #[command(about = "Convert a directory of sheets into a linked entity graph")]
    Convert(ConvertArgs),
    #[command(about = "Export an assay and everything it was derived from as a bundle")]
    Export(ExportArgs),
    #[command(about = "Validate a spreadsheet and import it into a new submission")]
    Upload(UploadArgs),
}

#[derive(Args)]
struct SummaryArgs {
    ingest_api: String,
    #[arg(value_enum)]
    kind: SummaryKind,
    uuid: String,
    #[arg(value_enum)]
    format: OutputFormat,
}

#[derive(Args)]
struct ConvertArgs {
    sheet_dir: Utf8PathBuf,
    #[arg(long)]
    output: Option<Utf8PathBuf>,
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct ExportArgs {
    #[arg(long)]
    envelope: String,
    #[arg(long)]
    assay_url: String,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    output: Option<Utf8PathBuf>,
    #[arg(long)]
    ingest: Option<String>,
    #[arg(long)]
    staging: Option<String>,
    #[arg(long)]
    dss: Option<String>,
    #[arg(long)]
    schema_version: Option<String>,
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct UploadArgs {
    sheet_dir: Utf8PathBuf,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(broker) = report.downcast_ref::<BrokerError>() {
            return ExitCode::from(map_exit_code(broker));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BrokerError) -> u8 {
    match error {
        BrokerError::InvalidUuid(_)
        | BrokerError::MissingConfig
        | BrokerError::ConfigRead(_)
        | BrokerError::ConfigParse(_) => 2,
        err if err.is_upstream() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Summary(args) => run_summary(args),
        Commands::Convert(args) => run_convert(args),
        Commands::Export(args) => run_export(args),
        Commands::Upload(args) => run_upload(args),
    }
}

fn run_summary(args: SummaryArgs) -> miette::Result<()> {
    let uuid = args.uuid.parse::<EntityUuid>()?;
    let config = ConfigLoader::resolve(None)?;
    let service = SummaryService::new(IngestHttpClient::new(&args.ingest_api)?, &config);

    match args.kind {
        SummaryKind::Project => {
            let project = service.store().get_project(&uuid)?;
            let summary = service.summary_for_project(&project)?;
            let printed = match args.format {
                OutputFormat::Json => JsonOutput::print(&summary),
                OutputFormat::Tsv => TsvOutput::print_project(&summary),
            };
            printed.into_diagnostic()
        }
        SummaryKind::Submission => {
            let submission = service.store().get_submission(&uuid)?;
            let summary = service.summary_for_submission(&submission)?;
            let printed = match args.format {
                OutputFormat::Json => JsonOutput::print(&*summary),
                OutputFormat::Tsv => TsvOutput::print_submission(&summary),
            };
            printed.into_diagnostic()
        }
    }
}

fn run_convert(args: ConvertArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let graph = resolve_sheet_dir(&args.sheet_dir, &config.list_keys)?;
    let json = graph.to_json();
    match args.output {
        Some(path) => {
            let content = serde_json::to_vec_pretty(&json).into_diagnostic()?;
            write_bytes_atomic(&path, &content)?;
            info!(%path, "entity graph written");
            Ok(())
        }
        None => JsonOutput::print(&json).into_diagnostic(),
    }
}

fn run_export(args: ExportArgs) -> miette::Result<()> {
    let envelope = args.envelope.parse::<EntityUuid>()?;
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let output_dir = args
        .output
        .clone()
        .or_else(|| config.output_dir.clone().map(Utf8PathBuf::from));
    let options = ExportOptions {
        dry_run: args.dry_run,
        output_dir,
    };
    let mut exporter = Exporter::new(
        IngestHttpClient::new(&config.ingest_url)?,
        StagingHttpClient::new(&config.staging_url)?,
        DataStoreHttpClient::new(&config.dss_url)?,
        StructuralValidator,
        BundleAssembler::new(BundleSchemas::from_config(&config)),
        config.ingest_url.clone(),
        options,
    );
    let result = exporter.export_assay(envelope.as_str(), &args.assay_url)?;
    JsonOutput::print(&result).into_diagnostic()
}

fn apply_overrides(config: &mut BrokerConfig, args: &ExportArgs) {
    if let Some(url) = &args.ingest {
        config.ingest_url = url.clone();
    }
    if let Some(url) = &args.staging {
        config.staging_url = url.clone();
    }
    if let Some(url) = &args.dss {
        config.dss_url = url.clone();
    }
    if let Some(version) = &args.schema_version {
        config.schema_version = version.clone();
    }
}

fn run_upload(args: UploadArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let writer = Arc::new(IngestHttpClient::new(&config.ingest_url)?);
    let handler = UploadHandler::start(writer, spool_dir(&config)?, config.list_keys.clone());

    let outcome = handler.upload(args.token.as_deref(), &args.sheet_dir);
    // Let the queued import finish before the process exits.
    handler.shutdown();
    match outcome {
        Ok(success) => JsonOutput::print(&success).into_diagnostic(),
        Err(failure) => {
            JsonOutput::print(&failure).into_diagnostic()?;
            Err(miette::Report::msg(format!(
                "upload rejected with status {}: {}",
                failure.code, failure.message
            )))
        }
    }
}

fn spool_dir(config: &BrokerConfig) -> miette::Result<Utf8PathBuf> {
    if let Some(dir) = &config.output_dir {
        return Ok(Utf8PathBuf::from(dir).join("spreadsheets"));
    }
    let base = ProjectDirs::from("org", "humancellatlas", "ingest-broker")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    Utf8PathBuf::from_path_buf(base.join("spreadsheets"))
        .map_err(|path| miette::Report::msg(format!("non UTF-8 spool path {}", path.display())))
}
