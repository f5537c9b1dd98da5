//! Command surface for reverting contact records to their previous logged
//! version.
//!
//! Hosts embed through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_revert_with_db`] for a single [`Command`] against a live DB path
//!   using the built-in entity registry.
//! - [`run_command`] for execution against an existing [`SqliteRevertStore`].

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use contact_revert_core::{
    BatchOutcome, ContactId, ContactIdInput, EntitySelection, HistoricalRowVersion, RevertOutcome,
    RevertPlan, RevertRequest, SchemaRegistry,
};
use contact_revert_store_sqlite::{
    DryRunReport, SchemaCheck, SqliteRevertStore, StoreConfig, DEFAULT_BUSY_TIMEOUT_MS,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

pub const REVERT_RESULT_CONTRACT: &str = "revert_result.v1";
pub const REVERT_PLAN_CONTRACT: &str = "revert_plan.v1";
pub const REVERT_HISTORY_CONTRACT: &str = "revert_history.v1";
pub const SCHEMA_CHECK_CONTRACT: &str = "schema_check.v1";

#[derive(Debug, Parser)]
#[command(name = "crv")]
#[command(about = "Revert contact records to their previous logged version")]
pub struct Cli {
    #[arg(long, default_value = "./contact_revert.sqlite3")]
    db: PathBuf,

    /// Separate database holding the `log_*` tables.
    #[arg(long)]
    history_db: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_BUSY_TIMEOUT_MS)]
    busy_timeout_ms: u64,

    /// Switch the live database to WAL journal mode (persists in the file).
    #[arg(long)]
    wal: bool,

    /// Entity registry JSON; the built-in registry is used when omitted.
    #[arg(long)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Revert(RevertArgs),
    History(HistoryArgs),
    Entities,
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct RevertArgs {
    #[arg(long)]
    contact_id: String,
    #[arg(long = "entity", required = true)]
    entities: Vec<String>,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(long)]
    contact_id: String,
    #[arg(long)]
    entity: String,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[arg(long = "entity")]
    entities: Vec<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Versioned<'a, T> {
    contract_version: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Debug, Serialize)]
struct PlannedEntityPayload<'a> {
    #[serde(flatten)]
    outcome: &'a RevertOutcome,
    preview: Option<String>,
    plan: Option<&'a RevertPlan>,
}

#[derive(Debug, Serialize)]
struct RevertPlanPayload<'a> {
    contract_version: &'static str,
    request_id: Ulid,
    is_error: bool,
    entities: Vec<PlannedEntityPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct RevertHistoryPayload<'a> {
    contract_version: &'static str,
    entity_name: &'a str,
    contact_id: ContactId,
    versions: &'a [HistoricalRowVersion],
}

#[derive(Debug, Serialize)]
struct SchemaCheckPayload<'a> {
    contract_version: &'static str,
    healthy: bool,
    checks: &'a [SchemaCheck],
}

/// Installs the stderr log subscriber. `RUST_LOG` overrides the default
/// `warn` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Executes the parsed top-level CLI command.
///
/// # Errors
/// Returns an error when the registry or store cannot be opened, or when the
/// command reports a failed revert or an unhealthy schema.
pub fn run_cli(cli: Cli) -> Result<()> {
    let registry = load_registry(cli.schema.as_deref())?;
    if matches!(cli.command, Command::Entities) {
        return print_entities(&registry);
    }

    let mut config = StoreConfig::new(&cli.db)
        .with_busy_timeout_ms(cli.busy_timeout_ms)
        .with_wal(cli.wal);
    if let Some(history_db) = &cli.history_db {
        config = config.with_history(history_db);
    }
    tracing::debug!(db = %cli.db.display(), "opening revert store");
    let mut store = SqliteRevertStore::open(&config, registry)?;
    run_command(cli.command, &mut store)
}

/// Executes a parsed command using the built-in registry and the given live
/// DB path.
///
/// # Errors
/// Returns an error when store open fails or the requested command fails.
pub fn run_revert_with_db(db_path: &Path, command: Command) -> Result<()> {
    let mut store = SqliteRevertStore::open(&StoreConfig::new(db_path), SchemaRegistry::builtin())?;
    run_command(command, &mut store)
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when any entity fails to revert, when history or schema
/// inspection fails, or when output cannot be serialised.
pub fn run_command(command: Command, store: &mut SqliteRevertStore) -> Result<()> {
    match command {
        Command::Revert(args) if args.dry_run => run_dry_run(args, store),
        Command::Revert(args) => {
            let batch = store.revertdata(RevertRequest {
                contact_id: ContactIdInput::Text(args.contact_id),
                entity: EntitySelection::Many(args.entities),
            });
            if args.json {
                println!("{}", serde_json::to_string_pretty(&revert_result_payload(&batch))?);
            } else {
                println!("{}", batch.message);
            }

            if batch.is_error {
                return Err(anyhow!("revert finished with errors (request {})", batch.request_id));
            }
            Ok(())
        }
        Command::History(args) => {
            let contact_id = parse_contact_id(&args.contact_id)?;
            let versions = store.list_versions(&args.entity, contact_id, args.limit)?;
            let payload = RevertHistoryPayload {
                contract_version: REVERT_HISTORY_CONTRACT,
                entity_name: &args.entity,
                contact_id,
                versions: &versions,
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Command::Entities => print_entities(store.registry()),
        Command::Check(args) => {
            let checks = if args.entities.is_empty() {
                store.check_all()?
            } else {
                args.entities
                    .iter()
                    .map(|entity| store.check_schema(entity))
                    .collect::<Result<Vec<_>>>()?
            };

            let healthy = checks.iter().all(|check| check.healthy);
            if args.json {
                let payload = SchemaCheckPayload {
                    contract_version: SCHEMA_CHECK_CONTRACT,
                    healthy,
                    checks: &checks,
                };
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_schema_checks(&checks);
            }

            if !healthy {
                let unhealthy = checks
                    .iter()
                    .filter(|check| !check.healthy)
                    .map(|check| check.entity_name.as_str())
                    .collect::<Vec<_>>();
                return Err(anyhow!("schema check failed for: {}", unhealthy.join(", ")));
            }
            Ok(())
        }
    }
}

fn run_dry_run(args: RevertArgs, store: &mut SqliteRevertStore) -> Result<()> {
    let contact_id = parse_contact_id(&args.contact_id)?;
    let report = store.plan_batch(contact_id, &args.entities);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&revert_plan_payload(&report))?);
    } else {
        for item in &report.entities {
            match &item.plan {
                Some(plan) => println!(
                    "{}: row {} from {} {}",
                    item.outcome.entity_name,
                    plan.row_id,
                    plan.restored_from,
                    plan.preview()
                ),
                None => println!("{}", item.outcome.message),
            }
        }
    }

    if report.is_error {
        return Err(anyhow!(
            "dry run found entities that cannot be reverted (request {})",
            report.request_id
        ));
    }
    Ok(())
}

fn revert_result_payload(batch: &BatchOutcome) -> Versioned<'_, BatchOutcome> {
    Versioned {
        contract_version: REVERT_RESULT_CONTRACT,
        body: batch,
    }
}

fn revert_plan_payload(report: &DryRunReport) -> RevertPlanPayload<'_> {
    RevertPlanPayload {
        contract_version: REVERT_PLAN_CONTRACT,
        request_id: report.request_id,
        is_error: report.is_error,
        entities: report
            .entities
            .iter()
            .map(|item| PlannedEntityPayload {
                outcome: &item.outcome,
                preview: item.plan.as_ref().map(RevertPlan::preview),
                plan: item.plan.as_ref(),
            })
            .collect(),
    }
}

fn print_entities(registry: &SchemaRegistry) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&registry.to_document())?);
    Ok(())
}

fn print_schema_checks(checks: &[SchemaCheck]) {
    println!(
        "{:<10} {:<24} {:<8} {:<8} missing",
        "entity", "live_table", "live", "log"
    );
    println!("{}", "-".repeat(72));
    for check in checks {
        let missing = check
            .missing_live_columns
            .iter()
            .map(|name| format!("live.{name}"))
            .chain(
                check
                    .missing_log_columns
                    .iter()
                    .map(|name| format!("log.{name}")),
            )
            .collect::<Vec<_>>();
        println!(
            "{:<10} {:<24} {:<8} {:<8} {}",
            check.entity_name,
            check.live_table,
            if check.live_table_present { "yes" } else { "no" },
            if check.log_table_present { "yes" } else { "no" },
            if missing.is_empty() {
                "-".to_string()
            } else {
                missing.join(",")
            }
        );
    }
}

fn load_registry(path: Option<&Path>) -> Result<SchemaRegistry> {
    let Some(path) = path else {
        return Ok(SchemaRegistry::builtin());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read entity registry {}", path.display()))?;
    SchemaRegistry::from_json_str(&raw)
        .map_err(|err| anyhow!("invalid entity registry {}: {err}", path.display()))
}

fn parse_contact_id(raw: &str) -> Result<ContactId> {
    ContactId::parse(raw).map_err(|err| anyhow!("invalid --contact-id value: {err}"))
}
