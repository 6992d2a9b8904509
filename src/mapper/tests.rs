use super::*;
use crate::catalog::ColumnMeta;
use serde_json::json;

fn column(name: &str, native_type: &str, max_length: i32, is_nullable: bool) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        native_type: native_type.to_string(),
        max_length: Some(max_length),
        precision: None,
        scale: None,
        is_nullable,
        is_identity: false,
        is_computed: false,
        default_expression: None,
        computed_definition: None,
        identity_seed: None,
        identity_increment: None,
    }
}

fn address_table() -> TableMetadata {
    let mut id = column("LfdNr", "int", 4, false);
    id.is_identity = true;

    let mut rowver = column("RowVer", "timestamp", 8, false);
    rowver.default_expression = None;
    let mut computed = column("SuchName", "nvarchar", 200, true);
    computed.is_computed = true;

    TableMetadata {
        table: "Adresse".to_string(),
        columns: vec![
            id,
            column("AdrNrGes", "nvarchar", 48, false),
            column("Name", "nvarchar", 160, false),
            column("Vorname", "nvarchar", 100, true),
            column("Strasse", "nvarchar", 120, true),
            column("OrtNr", "int", 4, false),
            column("Rechnungsmail", "nvarchar", 160, true),
            column("Land", "nvarchar", 6, true),
            computed,
            rowver,
        ],
    }
}

fn payload(entries: &[(&str, serde_json::Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_maps_known_fields_in_column_order() {
    let table = address_table();
    let input = payload(&[
        ("strasse", json!("Bahnhofstr. 5")),
        ("AdrNrGes", json!("ACME_PROJADR")),
        ("name", json!("Acme GmbH")),
        ("OrtNr", json!(17)),
    ]);

    let mapped = map_payload(&input, &table, &MapOptions::default()).unwrap();
    let names: Vec<&str> = mapped.iter().map(|(n, _)| n.as_str()).collect();
    // Canonical casing, ordered like the catalog regardless of payload order.
    assert_eq!(names, vec!["AdrNrGes", "Name", "Strasse", "OrtNr"]);
}

#[test]
fn test_unknown_field_is_rejected_with_its_key() {
    let table = address_table();
    let input = payload(&[
        ("name", json!("Acme GmbH")),
        ("AdrNrGes", json!("ACME_PROJADR")),
        ("OrtNr", json!(1)),
        ("telefax", json!("030 1234")),
    ]);

    let err = map_payload(
        &input,
        &table,
        &MapOptions {
            label: "address",
            ..Default::default()
        },
    )
    .unwrap_err();

    match err {
        SyncError::UnknownField { label, key } => {
            assert_eq!(label, "address");
            assert_eq!(key, "telefax");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_identity_and_rowversion_are_not_insertable() {
    let table = address_table();
    for key in ["LfdNr", "rowver", "SuchName"] {
        let input = payload(&[
            ("name", json!("Acme GmbH")),
            ("AdrNrGes", json!("A1")),
            ("OrtNr", json!(1)),
            (key, json!("x")),
        ]);
        let err = map_payload(&input, &table, &MapOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::NotInsertable { .. }), "{key}");
    }
}

#[test]
fn test_coercion_errors_carry_the_field_name() {
    let table = address_table();
    let input = payload(&[
        ("name", json!("Acme GmbH")),
        ("AdrNrGes", json!("A1")),
        ("OrtNr", json!("siebzehn")),
    ]);

    let err = map_payload(&input, &table, &MapOptions::default()).unwrap_err();
    match err {
        SyncError::NotANumber { field, .. } => assert_eq!(field, "OrtNr"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_required_field() {
    let table = address_table();
    // Name is NOT NULL without default and absent.
    let input = payload(&[("AdrNrGes", json!("A1")), ("OrtNr", json!(1))]);

    let err = map_payload(
        &input,
        &table,
        &MapOptions {
            label: "address",
            ..Default::default()
        },
    )
    .unwrap_err();

    match err {
        SyncError::MissingRequiredField { field, .. } => assert_eq!(field, "Name"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_required_field_mapped_to_null_counts_as_missing() {
    let table = address_table();
    let input = payload(&[
        ("name", json!("")),
        ("AdrNrGes", json!("A1")),
        ("OrtNr", json!(1)),
    ]);

    let err = map_payload(&input, &table, &MapOptions::default()).unwrap_err();
    assert!(matches!(err, SyncError::MissingRequiredField { .. }));
}

#[test]
fn test_deferred_columns_are_exempt_from_required_check() {
    let table = address_table();
    let input = payload(&[("name", json!("Acme GmbH")), ("AdrNrGes", json!("A1"))]);

    // OrtNr is resolved by the workflow after location lookup.
    let mapped = map_payload(
        &input,
        &table,
        &MapOptions {
            deferred_columns: &["OrtNr"],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(mapped.len(), 2);
}

#[test]
fn test_allowed_extra_keys_are_skipped() {
    let table = address_table();
    let input = payload(&[
        ("name", json!("Acme GmbH")),
        ("AdrNrGes", json!("A1")),
        ("OrtNr", json!(1)),
        ("sameAsAdresse", json!(false)),
        ("standort", json!({"plz": "10115"})),
    ]);

    let mapped = map_payload(
        &input,
        &table,
        &MapOptions {
            allowed_extra_keys: &["sameAsAdresse", "standort"],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(mapped.len(), 3);
}

#[test]
fn test_build_insert_sql() {
    use crate::coerce::SqlValue;
    let mapped = vec![
        ("AdrNrGes".to_string(), SqlValue::Text("A1".into())),
        ("Name".to_string(), SqlValue::Text("Acme".into())),
        ("OrtNr".to_string(), SqlValue::I64(17)),
    ];
    assert_eq!(
        build_insert_sql("[dbo].[Adresse]", &mapped),
        "INSERT INTO [dbo].[Adresse] ([AdrNrGes], [Name], [OrtNr]) VALUES (@P1, @P2, @P3)"
    );
}

#[test]
fn test_mapping_is_pure() {
    let table = address_table();
    let input = payload(&[
        ("name", json!("Acme GmbH")),
        ("AdrNrGes", json!("A1")),
        ("OrtNr", json!(1)),
    ]);

    let first = map_payload(&input, &table, &MapOptions::default()).unwrap();
    let second = map_payload(&input, &table, &MapOptions::default()).unwrap();
    assert_eq!(first.len(), second.len());
    for ((n1, _), (n2, _)) in first.iter().zip(second.iter()) {
        assert_eq!(n1, n2);
    }
}
