#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use contact_revert_core::{
    is_sql_identifier, BatchOutcome, ColumnValue, ContactId, DataKind, EntityDescriptor,
    HistoricalRowVersion, LiveRow, LogTimestamp, RevertError, RevertOutcome, RevertPlan,
    RevertRequest, RowId, SchemaRegistry, LOG_DATE_COLUMN,
};
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, error, info, info_span, warn};
use ulid::Ulid;

pub const MAIN_SCHEMA: &str = "main";
pub const HISTORY_SCHEMA: &str = "history";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Which databases back the live and log tables.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    pub live_path: PathBuf,
    /// Attached as the `history` schema when set; otherwise the log tables
    /// are read from the live database.
    pub history_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    /// Switches the live database to WAL. Journal mode persists in the file,
    /// so this stays off unless the caller owns the database.
    #[serde(default)]
    pub enable_wal: bool,
}

impl StoreConfig {
    #[must_use]
    pub fn new(live_path: impl Into<PathBuf>) -> Self {
        Self {
            live_path: live_path.into(),
            history_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            enable_wal: false,
        }
    }

    #[must_use]
    pub fn with_wal(mut self, enable_wal: bool) -> Self {
        self.enable_wal = enable_wal;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history_path: impl Into<PathBuf>) -> Self {
        self.history_path = Some(history_path.into());
        self
    }

    #[must_use]
    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// Expected outcome reported back to the caller.
    #[error(transparent)]
    Rejected(#[from] RevertError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct PlannedRevert {
    pub outcome: RevertOutcome,
    pub plan: Option<RevertPlan>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct DryRunReport {
    pub request_id: Ulid,
    pub is_error: bool,
    pub entities: Vec<PlannedRevert>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SchemaCheck {
    pub entity_name: String,
    pub live_table: String,
    pub log_table: String,
    pub log_schema: String,
    pub live_table_present: bool,
    pub log_table_present: bool,
    pub missing_live_columns: Vec<String>,
    pub missing_log_columns: Vec<String>,
    pub healthy: bool,
}

pub struct SqliteRevertStore {
    conn: Connection,
    registry: SchemaRegistry,
    log_schema: &'static str,
}

impl SqliteRevertStore {
    pub fn open(config: &StoreConfig, registry: SchemaRegistry) -> Result<Self> {
        let conn = Connection::open(&config.live_path).with_context(|| {
            format!(
                "failed to open live database at {}",
                config.live_path.display()
            )
        })?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to configure sqlite pragmas")?;
        if config.enable_wal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .context("failed to enable WAL journal mode")?;
        }
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .context("failed to configure busy timeout")?;

        let log_schema = match &config.history_path {
            Some(history_path) => {
                conn.execute(
                    "ATTACH DATABASE ?1 AS history",
                    params![history_path.to_string_lossy().into_owned()],
                )
                .with_context(|| {
                    format!(
                        "failed to attach history database at {}",
                        history_path.display()
                    )
                })?;
                HISTORY_SCHEMA
            }
            None => MAIN_SCHEMA,
        };

        debug!(
            live = %config.live_path.display(),
            log_schema,
            busy_timeout_ms = config.busy_timeout_ms,
            "revert store opened"
        );

        Ok(Self {
            conn,
            registry,
            log_schema,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    #[must_use]
    pub fn log_schema(&self) -> &'static str {
        self.log_schema
    }

    /// Inbound `revertdata` operation.
    pub fn revertdata(&mut self, request: RevertRequest) -> BatchOutcome {
        match request.validate() {
            Ok((contact_id, entities)) => self.revert_batch(contact_id, &entities),
            Err(err) => {
                let request_id = Ulid::new();
                warn!(%request_id, code = err.code(), "revert request rejected: {err}");
                BatchOutcome::rejected(request_id, &err)
            }
        }
    }

    /// Reverts every named entity in order. A failure never stops the
    /// remaining entities from being attempted.
    pub fn revert_batch(&mut self, contact_id: ContactId, entity_names: &[String]) -> BatchOutcome {
        let request_id = Ulid::new();
        let span = info_span!(
            "revert_batch",
            %request_id,
            %contact_id,
            entities = entity_names.len()
        );
        let _guard = span.enter();

        let outcomes = entity_names
            .iter()
            .map(|name| self.revert_one(name, contact_id))
            .collect::<Vec<_>>();
        let batch = BatchOutcome::from_outcomes(request_id, outcomes);

        if batch.is_error {
            warn!(message = %batch.message, "revert batch finished with errors");
        } else {
            info!("revert batch finished");
        }
        batch
    }

    pub fn revert_one(&mut self, entity_name: &str, contact_id: ContactId) -> RevertOutcome {
        match self.apply_revert(entity_name, contact_id) {
            Ok(plan) => {
                info!(
                    entity = entity_name,
                    %contact_id,
                    row_id = %plan.row_id,
                    restored_from = %plan.restored_from,
                    columns = plan.assignments.len(),
                    "entity reverted"
                );
                RevertOutcome::reverted(entity_name)
            }
            Err(AttemptError::Rejected(err)) => {
                warn!(
                    entity = entity_name,
                    %contact_id,
                    code = err.code(),
                    "entity not reverted: {err}"
                );
                RevertOutcome::failed(entity_name, &err)
            }
            Err(AttemptError::Store(err)) => {
                error!(
                    entity = entity_name,
                    %contact_id,
                    error = %format!("{err:#}"),
                    "entity revert failed on storage error"
                );
                RevertOutcome::failed(entity_name, &RevertError::Store)
            }
        }
    }

    /// Computes what [`SqliteRevertStore::revert_one`] would write without
    /// touching the live row.
    pub fn plan_revert(
        &mut self,
        entity_name: &str,
        contact_id: ContactId,
    ) -> std::result::Result<RevertPlan, AttemptError> {
        let descriptor = self.registry.resolve(entity_name)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start dry-run transaction")?;

        let plan = plan_for_contact(&tx, self.log_schema, descriptor, contact_id)?;
        if plan.is_empty() {
            return Err(RevertError::NothingToRevert {
                entity: descriptor.logical_name.clone(),
            }
            .into());
        }
        if !live_row_exists(&tx, descriptor, plan.row_id)? {
            return Err(RevertError::LiveRowMissing {
                entity: descriptor.logical_name.clone(),
                row_id: plan.row_id,
            }
            .into());
        }

        tx.rollback()
            .context("failed to close dry-run transaction")?;
        Ok(plan)
    }

    pub fn plan_batch(&mut self, contact_id: ContactId, entity_names: &[String]) -> DryRunReport {
        let request_id = Ulid::new();
        let span = info_span!("plan_batch", %request_id, %contact_id);
        let _guard = span.enter();

        let entities = entity_names
            .iter()
            .map(|name| match self.plan_revert(name, contact_id) {
                Ok(plan) => PlannedRevert {
                    outcome: RevertOutcome::reverted(name),
                    plan: Some(plan),
                },
                Err(AttemptError::Rejected(err)) => PlannedRevert {
                    outcome: RevertOutcome::failed(name, &err),
                    plan: None,
                },
                Err(AttemptError::Store(err)) => {
                    error!(entity = %name, error = %format!("{err:#}"), "dry run failed on storage error");
                    PlannedRevert {
                        outcome: RevertOutcome::failed(name, &RevertError::Store),
                        plan: None,
                    }
                }
            })
            .collect::<Vec<_>>();

        DryRunReport {
            request_id,
            is_error: entities.iter().any(|item| item.outcome.is_error),
            entities,
        }
    }

    /// Logged versions of the contact's most recently changed row for
    /// `entity_name`, newest first.
    pub fn list_versions(
        &self,
        entity_name: &str,
        contact_id: ContactId,
        limit: Option<usize>,
    ) -> Result<Vec<HistoricalRowVersion>> {
        let descriptor = self
            .registry
            .resolve(entity_name)
            .map_err(|err| anyhow!(err))?;
        let Some(row_id) = latest_row_id(&self.conn, self.log_schema, descriptor, contact_id)?
        else {
            return Ok(Vec::new());
        };
        load_versions(&self.conn, self.log_schema, descriptor, row_id, limit, 0)
    }

    pub fn live_row(&self, entity_name: &str, row_id: RowId) -> Result<Option<LiveRow>> {
        let descriptor = self
            .registry
            .resolve(entity_name)
            .map_err(|err| anyhow!(err))?;
        let sql = format!(
            "SELECT {}, {}, {} FROM {MAIN_SCHEMA}.{} WHERE {} = ?1",
            quote_ident(&descriptor.id_column),
            quote_ident(&descriptor.contact_column),
            column_list(descriptor),
            quote_ident(&descriptor.live_table),
            quote_ident(&descriptor.id_column),
        );

        self.conn
            .query_row(&sql, params![row_id.0], |row| {
                let contact_raw: Option<i64> = row.get(1)?;
                Ok(LiveRow {
                    row_id: RowId(row.get(0)?),
                    contact_id: contact_raw.and_then(|value| ContactId::try_from(value).ok()),
                    column_values: read_column_values(row, descriptor, 2)?,
                })
            })
            .optional()
            .with_context(|| format!("failed to read live row {row_id} of {}", descriptor.live_table))
    }

    /// Verifies that the live and log tables carry every column the
    /// descriptor names.
    pub fn check_schema(&self, entity_name: &str) -> Result<SchemaCheck> {
        let descriptor = self
            .registry
            .resolve(entity_name)
            .map_err(|err| anyhow!(err))?;

        let live_columns = table_columns(&self.conn, MAIN_SCHEMA, &descriptor.live_table)?;
        let log_columns = table_columns(&self.conn, self.log_schema, &descriptor.log_table)?;

        let mut required = vec![
            descriptor.id_column.as_str(),
            descriptor.contact_column.as_str(),
        ];
        required.extend(descriptor.columns.iter().map(|column| column.name.as_str()));

        let missing_live_columns = missing_columns(&live_columns, &required);
        let mut required_log = required.clone();
        required_log.push(LOG_DATE_COLUMN);
        let missing_log_columns = missing_columns(&log_columns, &required_log);

        let live_table_present = !live_columns.is_empty();
        let log_table_present = !log_columns.is_empty();
        Ok(SchemaCheck {
            entity_name: descriptor.logical_name.clone(),
            live_table: descriptor.live_table.clone(),
            log_table: descriptor.log_table.clone(),
            log_schema: self.log_schema.to_string(),
            live_table_present,
            log_table_present,
            healthy: live_table_present
                && log_table_present
                && missing_live_columns.is_empty()
                && missing_log_columns.is_empty(),
            missing_live_columns,
            missing_log_columns,
        })
    }

    pub fn check_all(&self) -> Result<Vec<SchemaCheck>> {
        self.registry
            .entity_names()
            .iter()
            .map(|name| self.check_schema(name))
            .collect()
    }

    fn apply_revert(
        &mut self,
        entity_name: &str,
        contact_id: ContactId,
    ) -> std::result::Result<RevertPlan, AttemptError> {
        let descriptor = self.registry.resolve(entity_name)?;

        // Immediate mode takes the write lock before the history reads.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start revert transaction")?;

        let plan = plan_for_contact(&tx, self.log_schema, descriptor, contact_id)?;
        if plan.is_empty() {
            return Err(RevertError::NothingToRevert {
                entity: descriptor.logical_name.clone(),
            }
            .into());
        }

        let sql = update_sql(descriptor, &plan);
        let values = plan
            .assignments
            .iter()
            .map(|item| to_sql_value(&item.value))
            .chain(std::iter::once(SqlValue::Integer(plan.row_id.0)));
        let updated = tx
            .execute(&sql, params_from_iter(values))
            .with_context(|| format!("failed to update {}", descriptor.live_table))?;

        if updated == 0 {
            return Err(RevertError::LiveRowMissing {
                entity: descriptor.logical_name.clone(),
                row_id: plan.row_id,
            }
            .into());
        }

        tx.commit().context("failed to commit revert transaction")?;
        Ok(plan)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn plan_for_contact(
    conn: &Connection,
    log_schema: &str,
    descriptor: &EntityDescriptor,
    contact_id: ContactId,
) -> std::result::Result<RevertPlan, AttemptError> {
    let no_prior = || RevertError::NoPriorVersion {
        entity: descriptor.logical_name.clone(),
    };

    let Some(row_id) = latest_row_id(conn, log_schema, descriptor, contact_id)? else {
        return Err(no_prior().into());
    };

    // Keyed by row id so the whole history of that row is used even if its
    // contact association changed.
    let Some(previous) = load_versions(conn, log_schema, descriptor, row_id, Some(1), 1)?
        .into_iter()
        .next()
    else {
        return Err(no_prior().into());
    };

    debug!(
        entity = %descriptor.logical_name,
        %row_id,
        restored_from = %previous.captured_at,
        "selected previous version"
    );
    Ok(RevertPlan::build(descriptor, &previous))
}

fn latest_row_id(
    conn: &Connection,
    log_schema: &str,
    descriptor: &EntityDescriptor,
    contact_id: ContactId,
) -> Result<Option<RowId>> {
    let sql = format!(
        "SELECT {} FROM {}.{}
         WHERE {} = ?1
         ORDER BY {} DESC, rowid DESC
         LIMIT 1",
        quote_ident(&descriptor.id_column),
        log_schema,
        quote_ident(&descriptor.log_table),
        quote_ident(&descriptor.contact_column),
        quote_ident(LOG_DATE_COLUMN),
    );

    let row_id = conn
        .query_row(&sql, params![contact_id.0], |row| row.get::<_, Option<i64>>(0))
        .optional()
        .with_context(|| format!("failed to query latest version in {}", descriptor.log_table))?;

    Ok(row_id.flatten().map(RowId))
}

fn load_versions(
    conn: &Connection,
    log_schema: &str,
    descriptor: &EntityDescriptor,
    row_id: RowId,
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<HistoricalRowVersion>> {
    let sql = format!(
        "SELECT {}, {}, {}, {} FROM {}.{}
         WHERE {} = ?1
         ORDER BY {} DESC, rowid DESC
         LIMIT ?2 OFFSET ?3",
        quote_ident(&descriptor.id_column),
        quote_ident(&descriptor.contact_column),
        quote_ident(LOG_DATE_COLUMN),
        column_list(descriptor),
        log_schema,
        quote_ident(&descriptor.log_table),
        quote_ident(&descriptor.id_column),
        quote_ident(LOG_DATE_COLUMN),
    );

    let limit = match limit {
        Some(value) => i64::try_from(value).context("version limit is out of range")?,
        None => -1,
    };
    let offset = i64::try_from(offset).context("version offset is out of range")?;

    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("failed to prepare history query on {}", descriptor.log_table))?;
    let rows = stmt.query_map(params![row_id.0, limit, offset], |row| {
        parse_version_row(row, descriptor)
    })?;

    collect_rows(rows)
        .with_context(|| format!("failed to read history of row {row_id} in {}", descriptor.log_table))
}

fn parse_version_row(
    row: &rusqlite::Row<'_>,
    descriptor: &EntityDescriptor,
) -> rusqlite::Result<HistoricalRowVersion> {
    let row_id: i64 = row.get(0)?;
    let contact_raw: Option<i64> = row.get(1)?;

    Ok(HistoricalRowVersion {
        row_id: RowId(row_id),
        contact_id: contact_raw.and_then(|value| ContactId::try_from(value).ok()),
        captured_at: log_timestamp(2, row.get_ref(2)?)?,
        column_values: read_column_values(row, descriptor, 3)?,
    })
}

/// Text dates (optionally fractional) or Unix epoch seconds.
fn log_timestamp(index: usize, value: ValueRef<'_>) -> rusqlite::Result<LogTimestamp> {
    let parsed = match value {
        ValueRef::Integer(seconds) => LogTimestamp::from_unix_seconds(seconds),
        ValueRef::Real(seconds) => LogTimestamp::from_unix_seconds_f64(seconds),
        ValueRef::Text(bytes) => {
            let raw = std::str::from_utf8(bytes).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
            })?;
            LogTimestamp::parse(raw)
        }
        ValueRef::Null | ValueRef::Blob(_) => Err(RevertError::Validation(format!(
            "{LOG_DATE_COLUMN} is not a date"
        ))),
    };
    parsed.map_err(|err| to_sql_error(index, &err))
}

fn read_column_values(
    row: &rusqlite::Row<'_>,
    descriptor: &EntityDescriptor,
    first_index: usize,
) -> rusqlite::Result<BTreeMap<String, ColumnValue>> {
    let mut values = BTreeMap::new();
    for (offset, column) in descriptor.columns.iter().enumerate() {
        let index = first_index + offset;
        values.insert(column.name.clone(), column_value(index, row.get_ref(index)?)?);
    }
    Ok(values)
}

fn column_value(index: usize, value: ValueRef<'_>) -> rusqlite::Result<ColumnValue> {
    Ok(match value {
        ValueRef::Null => ColumnValue::Null,
        ValueRef::Integer(value) => ColumnValue::Integer(value),
        ValueRef::Real(value) => ColumnValue::Real(value),
        ValueRef::Text(bytes) => ColumnValue::Text(
            std::str::from_utf8(bytes)
                .map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
                })?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => ColumnValue::Blob(bytes.to_vec()),
    })
}

fn to_sql_value(value: &ColumnValue) -> SqlValue {
    match value {
        ColumnValue::Null => SqlValue::Null,
        ColumnValue::Integer(value) => SqlValue::Integer(*value),
        ColumnValue::Real(value) => SqlValue::Real(*value),
        ColumnValue::Text(value) => SqlValue::Text(value.clone()),
        ColumnValue::Blob(value) => SqlValue::Blob(value.clone()),
    }
}

fn update_sql(descriptor: &EntityDescriptor, plan: &RevertPlan) -> String {
    let assignments = plan
        .assignments
        .iter()
        .enumerate()
        .map(|(index, item)| format!("{} = ?{}", quote_ident(&item.column), index + 1))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {MAIN_SCHEMA}.{} SET {assignments} WHERE {} = ?{}",
        quote_ident(&descriptor.live_table),
        quote_ident(&descriptor.id_column),
        plan.assignments.len() + 1
    )
}

fn live_row_exists(conn: &Connection, descriptor: &EntityDescriptor, row_id: RowId) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {MAIN_SCHEMA}.{} WHERE {} = ?1 LIMIT 1",
        quote_ident(&descriptor.live_table),
        quote_ident(&descriptor.id_column),
    );
    let exists = conn
        .query_row(&sql, params![row_id.0], |_| Ok(()))
        .optional()
        .with_context(|| format!("failed to look up live row in {}", descriptor.live_table))?
        .is_some();
    Ok(exists)
}

fn table_columns(conn: &Connection, schema: &str, table_name: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA {schema}.table_info({})", quote_ident(table_name)))
        .with_context(|| format!("failed to inspect table_info for {schema}.{table_name}"))?;
    let mut rows = stmt.query([])?;

    let mut available = Vec::new();
    while let Some(row) = rows.next()? {
        available.push(row.get::<_, String>(1)?);
    }

    Ok(available)
}

fn missing_columns(available: &[String], required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.iter().any(|candidate| candidate == *name))
        .map(|name| (*name).to_string())
        .collect()
}

/// Identifiers reaching this point come from a validated registry.
fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

fn column_list(descriptor: &EntityDescriptor) -> String {
    descriptor
        .columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_sql_error(index: usize, err: &RevertError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

fn sql_type(kind: DataKind) -> &'static str {
    match kind {
        DataKind::Text | DataKind::Other => "TEXT",
        DataKind::Numeric => "NUMERIC",
    }
}

fn ensure_schema_name(schema: &str) -> Result<()> {
    if is_sql_identifier(schema) {
        Ok(())
    } else {
        Err(anyhow!("schema name MUST be a plain identifier: {schema:?}"))
    }
}

/// Creates a live table and its log table shaped after `descriptor`. Used by
/// tests and local demos; production log tables are owned by the audit
/// subsystem.
pub fn install_entity_tables(
    conn: &Connection,
    log_schema: &str,
    descriptor: &EntityDescriptor,
) -> Result<()> {
    ensure_schema_name(log_schema)?;
    let columns = descriptor
        .columns
        .iter()
        .map(|column| format!("{} {}", quote_ident(&column.name), sql_type(column.kind)))
        .collect::<Vec<_>>()
        .join(",\n  ");

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {MAIN_SCHEMA}.{live} (
  {id} INTEGER PRIMARY KEY,
  {contact} INTEGER,
  {columns}
);
CREATE TABLE IF NOT EXISTS {log_schema}.{log} (
  {id} INTEGER NOT NULL,
  {contact} INTEGER,
  {columns},
  {log_date} TEXT NOT NULL,
  log_action TEXT NOT NULL DEFAULT 'Update'
);",
        live = quote_ident(&descriptor.live_table),
        log = quote_ident(&descriptor.log_table),
        id = quote_ident(&descriptor.id_column),
        contact = quote_ident(&descriptor.contact_column),
        log_date = quote_ident(LOG_DATE_COLUMN),
    ))
    .with_context(|| format!("failed to create tables for {}", descriptor.logical_name))
}

/// Appends one logged version of a row. Columns not named in `values` are
/// logged as NULL.
pub fn record_log_version(
    conn: &Connection,
    log_schema: &str,
    descriptor: &EntityDescriptor,
    row_id: RowId,
    contact_id: ContactId,
    log_date: &str,
    values: &[(&str, ColumnValue)],
) -> Result<()> {
    ensure_schema_name(log_schema)?;
    let mut names = vec![
        quote_ident(&descriptor.id_column),
        quote_ident(&descriptor.contact_column),
        quote_ident(LOG_DATE_COLUMN),
    ];
    let mut bound = vec![
        SqlValue::Integer(row_id.0),
        SqlValue::Integer(contact_id.0),
        SqlValue::Text(log_date.to_string()),
    ];
    for (name, value) in values {
        let column = descriptor.column(name).ok_or_else(|| {
            anyhow!("column {name} is not part of {}", descriptor.logical_name)
        })?;
        names.push(quote_ident(&column.name));
        bound.push(to_sql_value(value));
    }

    let placeholders = (1..=bound.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {log_schema}.{} ({}) VALUES ({placeholders})",
            quote_ident(&descriptor.log_table),
            names.join(", ")
        ),
        params_from_iter(bound),
    )
    .with_context(|| format!("failed to log version of {}", descriptor.logical_name))?;
    Ok(())
}

/// Writes the live row, replacing any existing row with the same id.
pub fn upsert_live_row(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    row_id: RowId,
    contact_id: ContactId,
    values: &[(&str, ColumnValue)],
) -> Result<()> {
    let mut names = vec![
        quote_ident(&descriptor.id_column),
        quote_ident(&descriptor.contact_column),
    ];
    let mut bound = vec![SqlValue::Integer(row_id.0), SqlValue::Integer(contact_id.0)];
    for (name, value) in values {
        let column = descriptor.column(name).ok_or_else(|| {
            anyhow!("column {name} is not part of {}", descriptor.logical_name)
        })?;
        names.push(quote_ident(&column.name));
        bound.push(to_sql_value(value));
    }

    let placeholders = (1..=bound.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {MAIN_SCHEMA}.{} ({}) VALUES ({placeholders})",
            quote_ident(&descriptor.live_table),
            names.join(", ")
        ),
        params_from_iter(bound),
    )
    .with_context(|| format!("failed to write live row of {}", descriptor.logical_name))?;
    Ok(())
}
