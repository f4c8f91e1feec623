use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use shipdesk_api::{AddPackageRequest, ConfirmRequest, ReceivePackageRequest, ShipdeskApi};
use shipdesk_carriers::{CarrierConfig, FedexClient, UpsClient};
use shipdesk_core::manifest::{manifest_rows, FilterCriteria, TrackingRecord};
use shipdesk_core::Direction;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "sd")]
#[command(about = "Shipdesk CLI: shipment lookup and reconciliation")]
struct Cli {
    #[arg(long, default_value = "./shipdesk.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a delimited scan log into the local store.
    Ingest(IngestArgs),
    /// Resolve one query against local records and live carrier data.
    Lookup(LookupArgs),
    /// Show the most recent surfaced scan records.
    Recent(RecentArgs),
    /// Show store counters.
    Stats,
    /// Confirm one scan record.
    Confirm(ConfirmArgs),
    /// Live-track a batch of identifiers.
    Track(TrackArgs),
    Manifest {
        #[command(subcommand)]
        command: Box<ManifestCommand>,
    },
    Package {
        #[command(subcommand)]
        command: Box<PackageCommand>,
    },
}

#[derive(Debug, Args)]
struct IngestArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long, value_enum, default_value_t = DirectionArg::Inbound)]
    direction: DirectionArg,
}

#[derive(Debug, Args)]
struct LookupArgs {
    query: String,
}

#[derive(Debug, Args)]
struct RecentArgs {
    #[arg(long, value_enum, default_value_t = DirectionArg::Inbound)]
    direction: DirectionArg,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct ConfirmArgs {
    scan_id: String,
    #[arg(long)]
    by: String,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Debug, Args)]
struct TrackArgs {
    identifiers: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum ManifestCommand {
    /// Filter the persisted manifest for an inbound-arrivals view.
    Filter(ManifestFilterArgs),
    /// Rebuild the manifest from a JSON record file, applying retention.
    Rebuild(ManifestRebuildArgs),
    /// Export the persisted manifest as CSV.
    Export(ManifestExportArgs),
}

#[derive(Debug, Args)]
struct ManifestFilterArgs {
    #[arg(long)]
    destination_postal: Option<String>,
    #[arg(long)]
    origin_postal: Option<String>,
    #[arg(long)]
    origin_city: Option<String>,
    #[arg(long)]
    destination_company: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long, default_value_t = false)]
    arriving_today: bool,
}

#[derive(Debug, Args)]
struct ManifestRebuildArgs {
    /// JSON file containing an array of manifest records.
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct ManifestExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum PackageCommand {
    List,
    Add(PackageAddArgs),
    /// Mark one package received.
    Confirm(PackageConfirmArgs),
    /// Flip past-due pending packages to overdue.
    MarkOverdue,
}

#[derive(Debug, Args)]
struct PackageAddArgs {
    #[arg(long)]
    order_number: String,
    #[arg(long)]
    supplier: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "")]
    expected_date: String,
}

#[derive(Debug, Args)]
struct PackageConfirmArgs {
    id: String,
    #[arg(long)]
    by: String,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Inbound,
    Outbound,
}

impl DirectionArg {
    fn into_direction(self) -> Direction {
        match self {
            Self::Inbound => Direction::Inbound,
            Self::Outbound => Direction::Outbound,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = ShipdeskApi::new(
        cli.db,
        Arc::new(UpsClient::new(&CarrierConfig::ups_from_env())),
        Arc::new(FedexClient::new(&CarrierConfig::fedex_from_env())),
    );

    match cli.command {
        Command::Ingest(args) => run_ingest(&args, &api),
        Command::Lookup(args) => {
            let result = api.resolve(&args.query)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize lookup result")?)
        }
        Command::Recent(args) => {
            let records = api.recent(args.direction.into_direction(), args.limit)?;
            emit_json(serde_json::json!({ "records": records }))
        }
        Command::Stats => {
            let stats = api.stats()?;
            emit_json(serde_json::to_value(&stats).context("failed to serialize store stats")?)
        }
        Command::Confirm(args) => {
            let request = ConfirmRequest { confirmed_by: args.by, notes: args.notes };
            let record = api.confirm(&args.scan_id, &request)?;
            emit_json(serde_json::to_value(&record).context("failed to serialize scan record")?)
        }
        Command::Track(args) => {
            let batch = api.track_batch(&args.identifiers);
            emit_json(serde_json::to_value(&batch).context("failed to serialize batch result")?)
        }
        Command::Manifest { command } => run_manifest(*command, &api),
        Command::Package { command } => run_package(*command, &api),
    }
}

fn run_ingest(args: &IngestArgs, api: &ShipdeskApi) -> Result<()> {
    let csv_text = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read scan log {}", args.file.display()))?;
    let summary = api.ingest_scans(&csv_text, args.direction.into_direction())?;
    emit_json(serde_json::json!({
        "batch_id": summary.batch_id,
        "ingested": summary.ingested,
        "skipped": summary.skipped
    }))
}

fn run_manifest(command: ManifestCommand, api: &ShipdeskApi) -> Result<()> {
    match command {
        ManifestCommand::Filter(args) => {
            let criteria = FilterCriteria {
                destination_postal: args.destination_postal,
                origin_postal: args.origin_postal,
                origin_city: args.origin_city,
                destination_company: args.destination_company,
                status: args.status,
                arriving_today: args.arriving_today,
            };
            let grouped = api.manifest_filter(&criteria)?;
            emit_json(serde_json::to_value(&grouped).context("failed to serialize manifest view")?)
        }
        ManifestCommand::Rebuild(args) => {
            let body = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read record file {}", args.file.display()))?;
            let records: Vec<TrackingRecord> = serde_json::from_str(&body)
                .with_context(|| format!("invalid record file {}", args.file.display()))?;
            let summary = api.manifest_rebuild(records)?;
            emit_json(
                serde_json::to_value(&summary).context("failed to serialize rebuild summary")?,
            )
        }
        ManifestCommand::Export(args) => {
            let records = api.manifest_list()?;
            let mut writer = csv::Writer::from_path(&args.out).with_context(|| {
                format!("failed to open export file {}", args.out.display())
            })?;
            for row in manifest_rows(&records) {
                writer.write_record(&row).context("failed to write export row")?;
            }
            writer.flush().context("failed to flush export file")?;
            emit_json(serde_json::json!({
                "out": args.out,
                "records": records.len()
            }))
        }
    }
}

fn run_package(command: PackageCommand, api: &ShipdeskApi) -> Result<()> {
    match command {
        PackageCommand::List => {
            let packages = api.list_packages()?;
            emit_json(serde_json::json!({ "packages": packages }))
        }
        PackageCommand::Add(args) => {
            let request = AddPackageRequest {
                order_number: args.order_number,
                supplier: args.supplier,
                description: args.description,
                expected_date: args.expected_date,
            };
            let package = api.add_package(&request)?;
            emit_json(serde_json::to_value(&package).context("failed to serialize package")?)
        }
        PackageCommand::Confirm(args) => {
            let request = ReceivePackageRequest { received_by: args.by, notes: args.notes };
            let package = api.receive_package(&args.id, &request)?;
            emit_json(serde_json::to_value(&package).context("failed to serialize package")?)
        }
        PackageCommand::MarkOverdue => {
            let updated = api.mark_overdue_packages()?;
            emit_json(serde_json::json!({ "updated": updated }))
        }
    }
}
