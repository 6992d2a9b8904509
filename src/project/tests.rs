use super::*;
use crate::catalog::ColumnMeta;

fn column(name: &str, native_type: &str, nullable: bool) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        native_type: native_type.to_string(),
        max_length: Some(80),
        precision: None,
        scale: None,
        is_nullable: nullable,
        is_identity: false,
        is_computed: false,
        default_expression: None,
        computed_definition: None,
        identity_seed: None,
        identity_increment: None,
    }
}

fn project_table() -> TableMetadata {
    let mut id = column("LfdNr", "int", false);
    id.is_identity = true;
    let mut rowver = column("RowVer", "timestamp", false);
    rowver.max_length = Some(8);

    TableMetadata {
        table: "Projekt".to_string(),
        columns: vec![
            id,
            column("ProjNr", "nvarchar", false),
            column("ProjBezeichnung", "nvarchar", true),
            column("AdrNrGes", "nvarchar", true),
            column("RechAdrNr", "nvarchar", true),
            column("BauherrAdrNr", "nvarchar", true),
            column("AbtNr", "int", true),
            column("Sachbearb", "nvarchar", true),
            column("AngelegtAm", "datetime2", true),
            column("GeaendertAm", "datetime2", true),
            rowver,
        ],
    }
}

fn refs() -> [(AddressRole, String); 3] {
    [
        (AddressRole::Primary, "ACME_PROJADR".to_string()),
        (AddressRole::Billing, "ACME_PROJADR".to_string()),
        (AddressRole::Site, "BAUHERR_BAUADR".to_string()),
    ]
}

fn payload_with_extra(entries: &[(&str, Value)]) -> ProjectPayload {
    let mut extra = Map::new();
    for (k, v) in entries {
        extra.insert(k.to_string(), v.clone());
    }
    ProjectPayload {
        projnr: "HIVE2024000123".to_string(),
        adresse: Default::default(),
        rechnung_adresse: None,
        bauherr_adresse: None,
        extra,
    }
}

#[test]
fn test_reference_consistency_accepts_matching_and_absent() {
    let empty = Map::new();
    assert!(check_reference_consistency(&empty, &refs()).is_ok());

    let mut matching = Map::new();
    matching.insert("rechAdrNr".to_string(), json!("ACME_PROJADR"));
    assert!(check_reference_consistency(&matching, &refs()).is_ok());

    // Empty strings are not explicit references.
    let mut blank = Map::new();
    blank.insert("BauherrAdrNr".to_string(), json!("  "));
    assert!(check_reference_consistency(&blank, &refs()).is_ok());
}

#[test]
fn test_reference_mismatch_is_rejected() {
    let mut conflicting = Map::new();
    conflicting.insert("BauherrAdrNr".to_string(), json!("SOMEONE_ELSE_BAUADR"));

    let err = check_reference_consistency(&conflicting, &refs()).unwrap_err();
    match err {
        SyncError::AddressReferenceMismatch {
            role,
            supplied,
            resolved,
        } => {
            assert_eq!(role, "site");
            assert_eq!(supplied, "SOMEONE_ELSE_BAUADR");
            assert_eq!(resolved, "BAUHERR_BAUADR");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_assemble_sets_number_refs_and_timestamps() {
    let meta = project_table();
    let payload = payload_with_extra(&[("projbezeichnung", json!("Neubau"))]);

    let fields = assemble_project_fields(&meta, &payload, "HIVE2024000123", &refs(), true);

    assert_eq!(fields.get("ProjNr"), Some(&json!("HIVE2024000123")));
    assert_eq!(fields.get("AdrNrGes"), Some(&json!("ACME_PROJADR")));
    assert_eq!(fields.get("BauherrAdrNr"), Some(&json!("BAUHERR_BAUADR")));
    // Both timestamp columns of this table get defaults; the other two
    // names do not exist here and must not be injected.
    assert!(fields.contains_key("AngelegtAm"));
    assert!(fields.contains_key("GeaendertAm"));
    assert!(!fields.contains_key("EroeffnetAm"));
    assert!(!fields.contains_key("AuftragDatum"));
}

#[test]
fn test_assemble_keeps_payload_timestamp_for_direct_insert() {
    let meta = project_table();
    let payload = payload_with_extra(&[("angelegtam", json!("2020-01-01T00:00:00"))]);

    let direct = assemble_project_fields(&meta, &payload, "P1", &refs(), true);
    assert_eq!(direct.get("angelegtam"), Some(&json!("2020-01-01T00:00:00")));
    assert!(!direct.contains_key("AngelegtAm"));

    // The clone strategy stamps fresh timestamps regardless.
    let cloned = assemble_project_fields(&meta, &payload, "P1", &refs(), false);
    assert!(!cloned.contains_key("angelegtam"));
    assert_ne!(cloned.get("AngelegtAm"), Some(&json!("2020-01-01T00:00:00")));
}

#[test]
fn test_assemble_resolved_refs_replace_explicit_ones() {
    let meta = project_table();
    let payload = payload_with_extra(&[("adrnrges", json!("ACME_PROJADR"))]);

    let fields = assemble_project_fields(&meta, &payload, "P1", &refs(), true);
    assert!(!fields.contains_key("adrnrges"));
    assert_eq!(fields.get("AdrNrGes"), Some(&json!("ACME_PROJADR")));
}

#[test]
fn test_template_clone_sql_shape() {
    let meta = project_table();
    let overrides = vec![
        ("ProjNr".to_string(), SqlValue::Text("HIVE2024000123".into())),
        ("AdrNrGes".to_string(), SqlValue::Text("ACME_PROJADR".into())),
        ("AbtNr".to_string(), SqlValue::I64(12)),
    ];

    let sql = build_template_clone_sql("[dbo].[Projekt]", &meta, &overrides);

    // Identity and rowversion columns never appear.
    assert!(!sql.contains("[LfdNr]"));
    assert!(!sql.contains("[RowVer]"));
    // Overridden columns select their placeholder, the rest copy through.
    assert!(sql.contains("SELECT @P1, [ProjBezeichnung], @P2, [RechAdrNr]"));
    assert!(sql.contains("@P3, [Sachbearb]"));
    // The template row is the last parameter.
    assert!(sql.ends_with("FROM [dbo].[Projekt] WHERE [ProjNr] = @P4"));
    assert!(sql.starts_with(
        "INSERT INTO [dbo].[Projekt] ([ProjNr], [ProjBezeichnung], [AdrNrGes], [RechAdrNr]"
    ));
}
