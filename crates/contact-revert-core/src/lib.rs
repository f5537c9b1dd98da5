use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use ulid::Ulid;

pub const LOG_TABLE_PREFIX: &str = "log_";
pub const LOG_DATE_COLUMN: &str = "log_date";
pub const DEFAULT_ID_COLUMN: &str = "id";
pub const DEFAULT_CONTACT_COLUMN: &str = "contact_id";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RevertError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("no previous value for {entity}")]
    NoPriorVersion { entity: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error")]
    Store,
    #[error("previous value of {entity} is empty")]
    NothingToRevert { entity: String },
    #[error("live row {row_id} of {entity} no longer exists")]
    LiveRowMissing { entity: String, row_id: RowId },
}

impl RevertError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownEntity(_) => "unknown_entity",
            Self::NoPriorVersion { .. } => "no_prior_version",
            Self::Validation(_) => "validation",
            Self::Store => "store",
            Self::NothingToRevert { .. } => "nothing_to_revert",
            Self::LiveRowMissing { .. } => "live_row_missing",
        }
    }

    /// Human-readable message for the caller. Never carries query text or
    /// storage diagnostics.
    #[must_use]
    pub fn outcome_message(&self, entity: &str) -> String {
        match self {
            Self::UnknownEntity(_) => {
                format!("The {entity} was not reverted because it is not a known entity.")
            }
            Self::NoPriorVersion { .. } => {
                format!("The {entity} was not reverted because there is no previous value.")
            }
            Self::Validation(detail) => {
                format!("The {entity} was not reverted because the request was invalid: {detail}.")
            }
            Self::Store => {
                format!("The {entity} could not be reverted because of a storage error.")
            }
            Self::NothingToRevert { .. } => {
                format!("The {entity} was not reverted because its previous value is empty.")
            }
            Self::LiveRowMissing { .. } => format!(
                "The {entity} was not reverted because its current record no longer exists."
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl ContactId {
    /// Parses a caller-supplied contact identifier.
    ///
    /// # Errors
    /// Returns [`RevertError::Validation`] unless `raw` is a positive decimal
    /// integer with no sign, whitespace or other characters.
    pub fn parse(raw: &str) -> Result<Self, RevertError> {
        if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(RevertError::Validation(format!(
                "contact_id must be a positive integer, got {raw:?}"
            )));
        }

        let value: i64 = raw.parse().map_err(|_| {
            RevertError::Validation(format!("contact_id is out of range: {raw}"))
        })?;
        Self::try_from(value)
    }
}

impl TryFrom<i64> for ContactId {
    type Error = RevertError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            return Err(RevertError::Validation(format!(
                "contact_id must be a positive integer, got {value}"
            )));
        }
        Ok(Self(value))
    }
}

impl Display for ContactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RowId(pub i64);

impl Display for RowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Strings, e-mail addresses and other quoted values.
    Text,
    Numeric,
    /// Dates, timestamps and anything else written back as stored.
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: DataKind,
}

impl ColumnDescriptor {
    #[must_use]
    pub fn new(name: &str, kind: DataKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EntityDescriptor {
    pub logical_name: String,
    pub live_table: String,
    pub log_table: String,
    pub id_column: String,
    pub contact_column: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl EntityDescriptor {
    /// Builds a descriptor whose log table follows the `log_` prefix
    /// convention and whose identity columns are `id` and `contact_id`.
    ///
    /// # Errors
    /// Returns [`RevertError::Validation`] when a name is not a plain SQL
    /// identifier, a column repeats, or an identity column is listed as
    /// revertible.
    pub fn new(
        logical_name: &str,
        live_table: &str,
        columns: Vec<ColumnDescriptor>,
    ) -> Result<Self, RevertError> {
        Self::with_identity_columns(
            logical_name,
            live_table,
            DEFAULT_ID_COLUMN,
            DEFAULT_CONTACT_COLUMN,
            columns,
        )
    }

    /// Same as [`EntityDescriptor::new`] with explicit identity and
    /// association column names.
    ///
    /// # Errors
    /// See [`EntityDescriptor::new`].
    pub fn with_identity_columns(
        logical_name: &str,
        live_table: &str,
        id_column: &str,
        contact_column: &str,
        columns: Vec<ColumnDescriptor>,
    ) -> Result<Self, RevertError> {
        let descriptor = Self {
            logical_name: logical_name.to_string(),
            live_table: live_table.to_string(),
            log_table: log_table_for(live_table),
            id_column: id_column.to_string(),
            contact_column: contact_column.to_string(),
            columns,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// # Errors
    /// Returns [`RevertError::Validation`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), RevertError> {
        ensure_identifier("entity name", &self.logical_name)?;
        ensure_identifier("live table", &self.live_table)?;
        ensure_identifier("id column", &self.id_column)?;
        ensure_identifier("contact column", &self.contact_column)?;

        if self.log_table != log_table_for(&self.live_table) {
            return Err(RevertError::Validation(format!(
                "log table for {} MUST be {}",
                self.live_table,
                log_table_for(&self.live_table)
            )));
        }

        if self.id_column == self.contact_column {
            return Err(RevertError::Validation(
                "id column and contact column MUST differ".to_string(),
            ));
        }

        if self.columns.is_empty() {
            return Err(RevertError::Validation(format!(
                "entity {} MUST declare at least one revertible column",
                self.logical_name
            )));
        }

        let mut seen = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            ensure_identifier("column", &column.name)?;
            if self.is_identity_column(&column.name) || column.name == LOG_DATE_COLUMN {
                return Err(RevertError::Validation(format!(
                    "column {}.{} is reserved and cannot be reverted",
                    self.logical_name, column.name
                )));
            }
            if seen.contains(&column.name.as_str()) {
                return Err(RevertError::Validation(format!(
                    "column {}.{} is declared twice",
                    self.logical_name, column.name
                )));
            }
            seen.push(column.name.as_str());
        }

        Ok(())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }

    #[must_use]
    pub fn is_identity_column(&self, name: &str) -> bool {
        name == self.id_column || name == self.contact_column
    }
}

#[must_use]
pub fn log_table_for(live_table: &str) -> String {
    format!("{LOG_TABLE_PREFIX}{live_table}")
}

#[must_use]
pub fn is_sql_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|item| item.is_ascii_alphanumeric() || item == '_')
}

fn ensure_identifier(label: &str, value: &str) -> Result<(), RevertError> {
    if is_sql_identifier(value) {
        Ok(())
    } else {
        Err(RevertError::Validation(format!(
            "{label} MUST be a plain identifier, got {value:?}"
        )))
    }
}

/// Checks a caller-supplied entity name before it reaches the registry.
///
/// # Errors
/// Returns [`RevertError::Validation`] when the name is empty or contains
/// anything other than ASCII letters, digits and underscores.
pub fn validate_entity_name(raw: &str) -> Result<(), RevertError> {
    if is_sql_identifier(raw) {
        Ok(())
    } else {
        Err(RevertError::Validation(format!(
            "entity must be a plain name, got {raw:?}"
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RegistryDocument {
    pub entities: Vec<EntityDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EntityDefinition {
    pub name: String,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_contact_column")]
    pub contact_column: String,
    pub columns: Vec<ColumnDescriptor>,
}

fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.to_string()
}

fn default_contact_column() -> String {
    DEFAULT_CONTACT_COLUMN.to_string()
}

/// Maps logical entity names to their live table, log table and revertible
/// columns.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntityDescriptor>,
}

impl SchemaRegistry {
    /// # Errors
    /// Returns [`RevertError::Validation`] when a descriptor is invalid or two
    /// descriptors share a name (compared case-insensitively).
    pub fn from_descriptors(descriptors: Vec<EntityDescriptor>) -> Result<Self, RevertError> {
        let mut entities = BTreeMap::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            let key = descriptor.logical_name.to_ascii_lowercase();
            if entities.contains_key(&key) {
                return Err(RevertError::Validation(format!(
                    "entity {} is declared twice",
                    descriptor.logical_name
                )));
            }
            entities.insert(key, descriptor);
        }
        Ok(Self { entities })
    }

    /// Contact field groups with their editable columns.
    #[must_use]
    pub fn builtin() -> Self {
        let mut entities = BTreeMap::new();
        for (name, table, columns) in BUILTIN_ENTITIES {
            let descriptor = EntityDescriptor {
                logical_name: (*name).to_string(),
                live_table: (*table).to_string(),
                log_table: log_table_for(table),
                id_column: DEFAULT_ID_COLUMN.to_string(),
                contact_column: DEFAULT_CONTACT_COLUMN.to_string(),
                columns: columns
                    .iter()
                    .map(|(column, kind)| ColumnDescriptor::new(column, *kind))
                    .collect(),
            };
            entities.insert(name.to_ascii_lowercase(), descriptor);
        }
        Self { entities }
    }

    /// # Errors
    /// Returns [`RevertError::Validation`] when the document does not match
    /// the registry layout or declares an invalid entity.
    pub fn from_json(value: &Value) -> Result<Self, RevertError> {
        let document: RegistryDocument = serde_json::from_value(value.clone())
            .map_err(|err| RevertError::Validation(format!("invalid registry document: {err}")))?;
        Self::from_document(document)
    }

    /// # Errors
    /// See [`SchemaRegistry::from_json`].
    pub fn from_json_str(raw: &str) -> Result<Self, RevertError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| RevertError::Validation(format!("invalid registry JSON: {err}")))?;
        Self::from_json(&value)
    }

    /// # Errors
    /// See [`SchemaRegistry::from_json`].
    pub fn from_document(document: RegistryDocument) -> Result<Self, RevertError> {
        let descriptors = document
            .entities
            .into_iter()
            .map(|definition| {
                EntityDescriptor::with_identity_columns(
                    &definition.name,
                    &definition.table,
                    &definition.id_column,
                    &definition.contact_column,
                    definition.columns,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_descriptors(descriptors)
    }

    /// Resolves a logical entity name. Matching ignores ASCII case, so
    /// `"email"` and `"Email"` resolve to the same descriptor.
    ///
    /// # Errors
    /// Returns [`RevertError::Validation`] for malformed names and
    /// [`RevertError::UnknownEntity`] when no mapping exists.
    pub fn resolve(&self, entity_name: &str) -> Result<&EntityDescriptor, RevertError> {
        validate_entity_name(entity_name)?;
        self.entities
            .get(&entity_name.to_ascii_lowercase())
            .ok_or_else(|| RevertError::UnknownEntity(entity_name.to_string()))
    }

    /// # Errors
    /// See [`SchemaRegistry::resolve`].
    pub fn columns_for(&self, entity_name: &str) -> Result<&[ColumnDescriptor], RevertError> {
        self.resolve(entity_name)
            .map(|descriptor| descriptor.columns.as_slice())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    #[must_use]
    pub fn entity_names(&self) -> Vec<String> {
        self.entities
            .values()
            .map(|descriptor| descriptor.logical_name.clone())
            .collect()
    }

    #[must_use]
    pub fn to_document(&self) -> RegistryDocument {
        RegistryDocument {
            entities: self
                .entities
                .values()
                .map(|descriptor| EntityDefinition {
                    name: descriptor.logical_name.clone(),
                    table: descriptor.live_table.clone(),
                    id_column: descriptor.id_column.clone(),
                    contact_column: descriptor.contact_column.clone(),
                    columns: descriptor.columns.clone(),
                })
                .collect(),
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

type BuiltinEntity = (&'static str, &'static str, &'static [(&'static str, DataKind)]);

const BUILTIN_ENTITIES: &[BuiltinEntity] = &[
    (
        "Address",
        "civicrm_address",
        &[
            ("location_type_id", DataKind::Numeric),
            ("is_primary", DataKind::Numeric),
            ("is_billing", DataKind::Numeric),
            ("street_address", DataKind::Text),
            ("street_number", DataKind::Numeric),
            ("street_number_suffix", DataKind::Text),
            ("street_name", DataKind::Text),
            ("street_unit", DataKind::Text),
            ("supplemental_address_1", DataKind::Text),
            ("supplemental_address_2", DataKind::Text),
            ("supplemental_address_3", DataKind::Text),
            ("city", DataKind::Text),
            ("county_id", DataKind::Numeric),
            ("state_province_id", DataKind::Numeric),
            ("postal_code_suffix", DataKind::Text),
            ("postal_code", DataKind::Text),
            ("country_id", DataKind::Numeric),
            ("geo_code_1", DataKind::Numeric),
            ("geo_code_2", DataKind::Numeric),
            ("manual_geo_code", DataKind::Numeric),
            ("name", DataKind::Text),
            ("master_id", DataKind::Numeric),
        ],
    ),
    (
        "Email",
        "civicrm_email",
        &[
            ("location_type_id", DataKind::Numeric),
            ("email", DataKind::Text),
            ("is_primary", DataKind::Numeric),
            ("is_billing", DataKind::Numeric),
            ("on_hold", DataKind::Numeric),
            ("is_bulkmail", DataKind::Numeric),
            ("hold_date", DataKind::Other),
            ("reset_date", DataKind::Other),
            ("signature_text", DataKind::Text),
            ("signature_html", DataKind::Text),
        ],
    ),
    (
        "Phone",
        "civicrm_phone",
        &[
            ("location_type_id", DataKind::Numeric),
            ("is_primary", DataKind::Numeric),
            ("is_billing", DataKind::Numeric),
            ("mobile_provider_id", DataKind::Numeric),
            ("phone", DataKind::Text),
            ("phone_ext", DataKind::Text),
            ("phone_numeric", DataKind::Text),
            ("phone_type_id", DataKind::Numeric),
        ],
    ),
    (
        "IM",
        "civicrm_im",
        &[
            ("location_type_id", DataKind::Numeric),
            ("name", DataKind::Text),
            ("provider_id", DataKind::Numeric),
            ("is_primary", DataKind::Numeric),
            ("is_billing", DataKind::Numeric),
        ],
    ),
    (
        "Website",
        "civicrm_website",
        &[
            ("url", DataKind::Text),
            ("website_type_id", DataKind::Numeric),
        ],
    ),
];

/// A value read from a live or log row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl ColumnValue {
    /// Null and the empty string count as empty; zero does not.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(value) => value.is_empty(),
            Self::Blob(value) => value.is_empty(),
            Self::Integer(_) | Self::Real(_) => false,
        }
    }

    /// Value to bind when writing into a column of `kind`.
    #[must_use]
    pub fn coerce_for(&self, kind: DataKind) -> Self {
        match (kind, self) {
            (DataKind::Text, Self::Integer(value)) => Self::Text(value.to_string()),
            (DataKind::Text, Self::Real(value)) => Self::Text(value.to_string()),
            _ => self.clone(),
        }
    }

    /// SQL literal form, used for previews only. Writes always bind values.
    #[must_use]
    pub fn sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Real(value) => value.to_string(),
            Self::Text(value) => quote_sql_text(value),
            Self::Blob(value) => {
                let hex: String = value.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
        }
    }
}

#[must_use]
pub fn quote_sql_text(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Capture time of a logged row version, in the `YYYY-MM-DD HH:MM:SS` form
/// the audit log writes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LogTimestamp(pub PrimitiveDateTime);

impl LogTimestamp {
    /// Accepts `YYYY-MM-DD HH:MM:SS` with optional fractional seconds, an
    /// RFC3339 timestamp (normalised to UTC), or Unix epoch seconds stored
    /// as text.
    ///
    /// # Errors
    /// Returns [`RevertError::Validation`] when no form parses.
    pub fn parse(raw: &str) -> Result<Self, RevertError> {
        let trimmed = raw.trim();
        if let Ok(value) = PrimitiveDateTime::parse(
            trimmed,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ) {
            return Ok(Self(value));
        }
        if let Ok(value) = PrimitiveDateTime::parse(
            trimmed,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        ) {
            return Ok(Self(value));
        }
        if let Ok(seconds) = trimmed.parse::<i64>() {
            return Self::from_unix_seconds(seconds);
        }
        if trimmed.bytes().all(|byte| byte.is_ascii_digit() || byte == b'.') {
            if let Ok(seconds) = trimmed.parse::<f64>() {
                return Self::from_unix_seconds_f64(seconds);
            }
        }

        OffsetDateTime::parse(trimmed, &Rfc3339)
            .map(Self::from_utc)
            .map_err(|err| RevertError::Validation(format!("invalid log_date {raw:?}: {err}")))
    }

    /// Interprets an integer `log_date` as seconds since the Unix epoch.
    ///
    /// # Errors
    /// Returns [`RevertError::Validation`] when the value is out of range.
    pub fn from_unix_seconds(seconds: i64) -> Result<Self, RevertError> {
        OffsetDateTime::from_unix_timestamp(seconds)
            .map(Self::from_utc)
            .map_err(|err| {
                RevertError::Validation(format!("invalid epoch log_date {seconds}: {err}"))
            })
    }

    /// Interprets a real `log_date` as fractional seconds since the Unix
    /// epoch.
    ///
    /// # Errors
    /// Returns [`RevertError::Validation`] when the value is not finite or out
    /// of range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_unix_seconds_f64(seconds: f64) -> Result<Self, RevertError> {
        if !seconds.is_finite() || seconds.abs() > 1.0e15 {
            return Err(RevertError::Validation(format!(
                "invalid epoch log_date {seconds}"
            )));
        }
        let whole = seconds.floor();
        let nanos =
            whole as i128 * 1_000_000_000 + ((seconds - whole) * 1_000_000_000.0).round() as i128;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map(Self::from_utc)
            .map_err(|err| {
                RevertError::Validation(format!("invalid epoch log_date {seconds}: {err}"))
            })
    }

    fn from_utc(value: OffsetDateTime) -> Self {
        let utc = value.to_offset(UtcOffset::UTC);
        Self(PrimitiveDateTime::new(utc.date(), utc.time()))
    }

    /// Whole-second values render without a fraction.
    ///
    /// # Errors
    /// Returns [`RevertError::Validation`] when the value cannot be formatted.
    pub fn format(self) -> Result<String, RevertError> {
        let formatted = if self.0.nanosecond() == 0 {
            self.0
                .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        } else {
            self.0.format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"
            ))
        };
        formatted
            .map_err(|err| RevertError::Validation(format!("failed to format log_date: {err}")))
    }
}

impl Display for LogTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let formatted = self.format().map_err(|_| std::fmt::Error)?;
        f.write_str(&formatted)
    }
}

impl Serialize for LogTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalRowVersion {
    pub row_id: RowId,
    pub contact_id: Option<ContactId>,
    pub captured_at: LogTimestamp,
    pub column_values: BTreeMap<String, ColumnValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveRow {
    pub row_id: RowId,
    pub contact_id: Option<ContactId>,
    pub column_values: BTreeMap<String, ColumnValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnAssignment {
    pub column: String,
    pub kind: DataKind,
    pub value: ColumnValue,
}

/// The update a revert applies to one live row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevertPlan {
    pub entity_name: String,
    pub live_table: String,
    pub row_id: RowId,
    pub restored_from: LogTimestamp,
    pub assignments: Vec<ColumnAssignment>,
    pub skipped_empty: Vec<String>,
}

impl RevertPlan {
    /// Builds the update set from the version being restored. Identity and
    /// association columns are never assigned, and neither are columns whose
    /// logged value is empty.
    #[must_use]
    pub fn build(descriptor: &EntityDescriptor, version: &HistoricalRowVersion) -> Self {
        let mut assignments = Vec::new();
        let mut skipped_empty = Vec::new();

        for column in &descriptor.columns {
            if descriptor.is_identity_column(&column.name) {
                continue;
            }

            match version.column_values.get(&column.name) {
                Some(value) if !value.is_empty() => assignments.push(ColumnAssignment {
                    column: column.name.clone(),
                    kind: column.kind,
                    value: value.coerce_for(column.kind),
                }),
                _ => skipped_empty.push(column.name.clone()),
            }
        }

        Self {
            entity_name: descriptor.logical_name.clone(),
            live_table: descriptor.live_table.clone(),
            row_id: version.row_id,
            restored_from: version.captured_at,
            assignments,
            skipped_empty,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Renders the assignments as a `SET` clause with literal values, e.g.
    /// `SET city = 'Springfield', country_id = 1228`.
    #[must_use]
    pub fn preview(&self) -> String {
        if self.assignments.is_empty() {
            return String::new();
        }

        let clauses = self
            .assignments
            .iter()
            .map(|item| format!("{} = {}", item.column, item.value.sql_literal()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SET {clauses}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RevertOutcome {
    pub entity_name: String,
    pub is_error: bool,
    pub code: String,
    pub message: String,
}

impl RevertOutcome {
    #[must_use]
    pub fn reverted(entity_name: &str) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            is_error: false,
            code: "reverted".to_string(),
            message: format!("The {entity_name} was reverted successfully."),
        }
    }

    #[must_use]
    pub fn failed(entity_name: &str, err: &RevertError) -> Self {
        Self {
            entity_name: entity_name.to_string(),
            is_error: true,
            code: err.code().to_string(),
            message: err.outcome_message(entity_name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct BatchOutcome {
    pub request_id: Ulid,
    pub is_error: bool,
    pub message: String,
    pub outcomes: Vec<RevertOutcome>,
}

impl BatchOutcome {
    /// Aggregates per-entity outcomes: the batch is an error when any entity
    /// failed, and messages are joined in input order.
    #[must_use]
    pub fn from_outcomes(request_id: Ulid, outcomes: Vec<RevertOutcome>) -> Self {
        let is_error = outcomes.iter().any(|item| item.is_error);
        let message = outcomes
            .iter()
            .map(|item| item.message.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            request_id,
            is_error,
            message,
            outcomes,
        }
    }

    /// A request rejected before any entity was attempted.
    #[must_use]
    pub fn rejected(request_id: Ulid, err: &RevertError) -> Self {
        Self {
            request_id,
            is_error: true,
            message: format!("Nothing was reverted: {err}."),
            outcomes: Vec::new(),
        }
    }

    #[must_use]
    pub fn summary(&self) -> RevertSummary {
        RevertSummary {
            is_error: self.is_error,
            message: self.message.clone(),
        }
    }
}

/// The `{ is_error, message }` shape returned to the UI trigger.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RevertSummary {
    pub is_error: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum EntitySelection {
    One(String),
    Many(Vec<String>),
}

impl EntitySelection {
    #[must_use]
    pub fn into_names(self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name],
            Self::Many(names) => names,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum ContactIdInput {
    Number(i64),
    Text(String),
}

impl ContactIdInput {
    /// # Errors
    /// Returns [`RevertError::Validation`] for non-positive or non-numeric
    /// identifiers.
    pub fn parse(&self) -> Result<ContactId, RevertError> {
        match self {
            Self::Number(value) => ContactId::try_from(*value),
            Self::Text(raw) => ContactId::parse(raw),
        }
    }
}

/// Inbound `revertdata` parameters: `entity` may be a single name or a list.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RevertRequest {
    pub contact_id: ContactIdInput,
    pub entity: EntitySelection,
}

impl RevertRequest {
    /// Validates the request and normalises `entity` into a list.
    ///
    /// # Errors
    /// Returns [`RevertError::Validation`] when the contact identifier is
    /// malformed or no entity was named.
    pub fn validate(self) -> Result<(ContactId, Vec<String>), RevertError> {
        let contact_id = self.contact_id.parse()?;
        let entities = self.entity.into_names();
        if entities.is_empty() {
            return Err(RevertError::Validation(
                "entity MUST name at least one entity".to_string(),
            ));
        }
        Ok((contact_id, entities))
    }
}
