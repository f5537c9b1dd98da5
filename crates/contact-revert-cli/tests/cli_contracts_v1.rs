#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use contact_revert_core::{ColumnValue, ContactId, EntityDescriptor, RowId, SchemaRegistry};
use contact_revert_store_sqlite::{
    install_entity_tables, record_log_version, upsert_live_row, MAIN_SCHEMA,
};
use jsonschema::JSONSchema;
use rusqlite::Connection;
use serde_json::Value;
use ulid::Ulid;

fn crv_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_crv"));
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run crv command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn repo_root() -> PathBuf {
    match Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").canonicalize() {
        Ok(value) => value,
        Err(err) => panic!("failed to canonicalize repo root: {err}"),
    }
}

fn assert_schema(schema_name: &str, value: &Value) {
    let schema_path = repo_root()
        .join("contracts/revertdata/v1/schemas")
        .join(schema_name);
    let body = match fs::read_to_string(&schema_path) {
        Ok(value) => value,
        Err(err) => panic!("failed to read {}: {err}", schema_path.display()),
    };
    let schema: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(err) => panic!("failed to parse {}: {err}", schema_path.display()),
    };
    let compiled = match JSONSchema::compile(&schema) {
        Ok(value) => value,
        Err(err) => panic!("failed to compile {}: {err}", schema_path.display()),
    };
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!(
            "schema validation failed for {}:\n{}\nvalue={value}",
            schema_path.display(),
            errors.join("\n")
        );
    }
}

fn temp_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("crv-contract-{label}-{}.sqlite3", Ulid::new()))
}

fn builtin(entity: &str) -> EntityDescriptor {
    match SchemaRegistry::builtin().resolve(entity) {
        Ok(value) => value.clone(),
        Err(err) => panic!("missing builtin entity {entity}: {err}"),
    }
}

fn open(path: &Path) -> Connection {
    match Connection::open(path) {
        Ok(value) => value,
        Err(err) => panic!("failed to open {}: {err}", path.display()),
    }
}

fn must(result: anyhow::Result<()>) {
    if let Err(err) = result {
        panic!("fixture setup failed: {err:#}");
    }
}

fn text(value: &str) -> ColumnValue {
    ColumnValue::Text(value.to_string())
}

/// Address row 7 of contact 42 logged three times; the live row matches the
/// newest version. `log` may be the live connection or a separate history
/// database.
fn seed_address(live: &Connection, log: &Connection, separate_history: bool) {
    let address = builtin("Address");
    must(install_entity_tables(live, MAIN_SCHEMA, &address));
    if separate_history {
        must(install_entity_tables(log, MAIN_SCHEMA, &address));
        if let Err(err) = log.execute_batch("DROP TABLE civicrm_address;") {
            panic!("failed to trim history db: {err}");
        }
    }

    for (log_date, city, state) in [
        ("2026-01-01 09:00:00", "Shelbyville", 1001),
        ("2026-02-01 09:00:00", "Springfield", 1003),
        ("2026-03-01 09:00:00", "Capital City", 1005),
    ] {
        must(record_log_version(
            log,
            MAIN_SCHEMA,
            &address,
            RowId(7),
            ContactId(42),
            log_date,
            &[
                ("street_address", text("")),
                ("city", text(city)),
                ("state_province_id", ColumnValue::Integer(state)),
            ],
        ));
    }
    must(upsert_live_row(
        live,
        &address,
        RowId(7),
        ContactId(42),
        &[
            ("street_address", text("742 Evergreen Terrace")),
            ("city", text("Capital City")),
            ("state_province_id", ColumnValue::Integer(1005)),
        ],
    ));
}

fn live_city(path: &Path) -> String {
    match open(path).query_row("SELECT city FROM civicrm_address WHERE id = 7", [], |row| {
        row.get(0)
    }) {
        Ok(value) => value,
        Err(err) => panic!("failed to read live city: {err}"),
    }
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(env!("CARGO_BIN_EXE_crv")).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["revert", "history", "entities", "check"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn revert_json_contract_reports_success_and_updates_row() {
    let db_path = temp_path("revert");
    let conn = open(&db_path);
    seed_address(&conn, &conn, false);
    drop(conn);

    let output = crv_output(
        &db_path,
        &["revert", "--contact-id", "42", "--entity", "Address", "--json"],
    );
    assert!(
        output.status.success(),
        "revert failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let payload = stdout_json(&output);
    assert_schema("revert-result.schema.json", &payload);
    assert_eq!(payload["is_error"], Value::Bool(false));
    assert_eq!(
        payload["message"],
        Value::String("The Address was reverted successfully.".to_string())
    );
    assert_eq!(live_city(&db_path), "Springfield");

    let _ = fs::remove_file(&db_path);
}

#[test]
fn partial_failure_exits_non_zero_with_joined_message() {
    let db_path = temp_path("partial");
    let conn = open(&db_path);
    seed_address(&conn, &conn, false);
    must(install_entity_tables(&conn, MAIN_SCHEMA, &builtin("Phone")));
    drop(conn);

    let output = crv_output(
        &db_path,
        &[
            "revert",
            "--contact-id",
            "42",
            "--entity",
            "Address",
            "--entity",
            "Phone",
            "--json",
        ],
    );
    assert!(!output.status.success());

    let payload = stdout_json(&output);
    assert_schema("revert-result.schema.json", &payload);
    assert_eq!(payload["is_error"], Value::Bool(true));
    assert_eq!(
        payload["message"],
        Value::String(
            "The Address was reverted successfully. The Phone was not reverted because there is no previous value."
                .to_string()
        )
    );
    assert_eq!(payload["outcomes"][1]["code"], Value::String("no_prior_version".to_string()));
    assert_eq!(live_city(&db_path), "Springfield");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("revert finished with errors"),
        "expected stable error shape, got stderr={stderr}"
    );

    let _ = fs::remove_file(&db_path);
}

#[test]
fn malformed_contact_id_is_rejected_before_any_revert() {
    let db_path = temp_path("bad-contact");
    let conn = open(&db_path);
    seed_address(&conn, &conn, false);
    drop(conn);

    let output = crv_output(
        &db_path,
        &["revert", "--contact-id", "42 OR 1=1", "--entity", "Address", "--json"],
    );
    assert!(!output.status.success());

    let payload = stdout_json(&output);
    assert_schema("revert-result.schema.json", &payload);
    assert_eq!(payload["outcomes"], Value::Array(Vec::new()));
    assert_eq!(live_city(&db_path), "Capital City");

    let _ = fs::remove_file(&db_path);
}

#[test]
fn dry_run_contract_contains_preview_without_writing() {
    let db_path = temp_path("dry-run");
    let conn = open(&db_path);
    seed_address(&conn, &conn, false);
    drop(conn);

    let output = crv_output(
        &db_path,
        &[
            "revert",
            "--contact-id",
            "42",
            "--entity",
            "address",
            "--dry-run",
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "dry run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let payload = stdout_json(&output);
    assert_schema("revert-plan.schema.json", &payload);
    assert_eq!(
        payload["entities"][0]["preview"],
        Value::String("SET city = 'Springfield', state_province_id = 1003".to_string())
    );
    assert_eq!(
        payload["entities"][0]["plan"]["restored_from"],
        Value::String("2026-02-01 09:00:00".to_string())
    );
    assert_eq!(live_city(&db_path), "Capital City");

    let _ = fs::remove_file(&db_path);
}

#[test]
fn history_contract_lists_versions_newest_first() {
    let db_path = temp_path("history");
    let conn = open(&db_path);
    seed_address(&conn, &conn, false);
    drop(conn);

    let output = crv_output(
        &db_path,
        &["history", "--contact-id", "42", "--entity", "Address", "--limit", "2"],
    );
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_schema("revert-history.schema.json", &payload);
    let versions = match payload["versions"].as_array() {
        Some(value) => value.clone(),
        None => panic!("versions is not an array: {payload}"),
    };
    assert_eq!(versions.len(), 2);
    assert_eq!(
        versions[0]["column_values"]["city"],
        Value::String("Capital City".to_string())
    );
    assert_eq!(
        versions[1]["column_values"]["city"],
        Value::String("Springfield".to_string())
    );

    let _ = fs::remove_file(&db_path);
}

#[test]
fn check_contract_flags_missing_tables() {
    let db_path = temp_path("check");
    let conn = open(&db_path);
    seed_address(&conn, &conn, false);
    drop(conn);

    let healthy = crv_output(&db_path, &["check", "--entity", "Address", "--json"]);
    assert!(healthy.status.success());
    let healthy_payload = stdout_json(&healthy);
    assert_schema("schema-check.schema.json", &healthy_payload);
    assert_eq!(healthy_payload["healthy"], Value::Bool(true));

    let all = crv_output(&db_path, &["check", "--json"]);
    assert!(!all.status.success());
    let all_payload = stdout_json(&all);
    assert_schema("schema-check.schema.json", &all_payload);
    assert_eq!(all_payload["healthy"], Value::Bool(false));
    let stderr = String::from_utf8_lossy(&all.stderr);
    assert!(
        stderr.contains("schema check failed for"),
        "expected stable error shape, got stderr={stderr}"
    );

    let _ = fs::remove_file(&db_path);
}

#[test]
fn separate_history_database_is_used_for_log_tables() {
    let live_path = temp_path("live");
    let history_path = temp_path("log");
    let live = open(&live_path);
    let log = open(&history_path);
    seed_address(&live, &log, true);
    drop(live);
    drop(log);

    let history_arg = history_path.display().to_string();
    let check = crv_output(
        &live_path,
        &["--history-db", &history_arg, "check", "--entity", "Address", "--json"],
    );
    assert!(check.status.success());
    assert_eq!(
        stdout_json(&check)["checks"][0]["log_schema"],
        Value::String("history".to_string())
    );

    let output = crv_output(
        &live_path,
        &[
            "--history-db",
            &history_arg,
            "revert",
            "--contact-id",
            "42",
            "--entity",
            "Address",
        ],
    );
    assert!(
        output.status.success(),
        "revert failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "The Address was reverted successfully."
    );
    assert_eq!(live_city(&live_path), "Springfield");

    let _ = fs::remove_file(&live_path);
    let _ = fs::remove_file(&history_path);
}

#[test]
fn custom_registry_drives_entity_listing_and_revert() {
    let db_path = temp_path("registry");
    let registry_path =
        std::env::temp_dir().join(format!("crv-contract-registry-{}.json", Ulid::new()));
    let registry_json = r#"{
  "entities": [
    {
      "name": "Note",
      "table": "civicrm_note",
      "contact_column": "entity_id",
      "columns": [
        { "name": "subject", "kind": "text" },
        { "name": "note", "kind": "text" }
      ]
    }
  ]
}"#;
    if let Err(err) = fs::write(&registry_path, registry_json) {
        panic!("failed to write registry: {err}");
    }
    let registry = match SchemaRegistry::from_json_str(registry_json) {
        Ok(value) => value,
        Err(err) => panic!("invalid fixture registry: {err}"),
    };
    let note = match registry.resolve("Note") {
        Ok(value) => value.clone(),
        Err(err) => panic!("missing Note: {err}"),
    };

    let conn = open(&db_path);
    must(install_entity_tables(&conn, MAIN_SCHEMA, &note));
    for (log_date, subject) in [("2026-01-01 09:00:00", "Intro"), ("2026-01-02 09:00:00", "Follow-up")] {
        must(record_log_version(
            &conn,
            MAIN_SCHEMA,
            &note,
            RowId(1),
            ContactId(42),
            log_date,
            &[("subject", text(subject))],
        ));
    }
    must(upsert_live_row(&conn, &note, RowId(1), ContactId(42), &[("subject", text("Follow-up"))]));
    drop(conn);

    let registry_arg = registry_path.display().to_string();
    let listing = crv_output(&db_path, &["--schema", &registry_arg, "entities"]);
    assert!(listing.status.success());
    assert_eq!(
        stdout_json(&listing)["entities"][0]["name"],
        Value::String("Note".to_string())
    );

    let output = crv_output(
        &db_path,
        &["--schema", &registry_arg, "revert", "--contact-id", "42", "--entity", "note", "--json"],
    );
    assert!(
        output.status.success(),
        "revert failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_schema("revert-result.schema.json", &stdout_json(&output));

    let subject: String = match open(&db_path).query_row(
        "SELECT subject FROM civicrm_note WHERE id = 1",
        [],
        |row| row.get(0),
    ) {
        Ok(value) => value,
        Err(err) => panic!("failed to read note: {err}"),
    };
    assert_eq!(subject, "Intro");

    let _ = fs::remove_file(&db_path);
    let _ = fs::remove_file(&registry_path);
}
