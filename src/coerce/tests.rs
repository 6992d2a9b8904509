use super::*;
use serde_json::json;

fn column(native_type: &str, max_length: i64, precision: u8, scale: u8) -> ColumnMeta {
    ColumnMeta {
        name: "Feld".to_string(),
        native_type: native_type.to_string(),
        max_length: Some(max_length as i32),
        precision: Some(precision),
        scale: Some(scale),
        is_nullable: true,
        is_identity: false,
        is_computed: false,
        default_expression: None,
        computed_definition: None,
        identity_seed: None,
        identity_increment: None,
    }
}

#[test]
fn test_bind_kind_is_total() {
    // Every native type resolves to something; unknown ones to unbounded text.
    let known = [
        ("int", BindKind::Int),
        ("bigint", BindKind::BigInt),
        ("bit", BindKind::Bit),
        ("float", BindKind::Float),
        ("date", BindKind::Date),
        ("time", BindKind::Time),
        ("uniqueidentifier", BindKind::Guid),
        ("varbinary", BindKind::Binary),
    ];
    for (name, expected) in known {
        assert_eq!(bind_kind(&column(name, 8, 0, 0)), expected, "{}", name);
    }

    assert_eq!(
        bind_kind(&column("geography", 8, 0, 0)),
        BindKind::Text { max: None }
    );
    assert_eq!(
        bind_kind(&column("sql_variant", 8, 0, 0)),
        BindKind::Text { max: None }
    );
}

#[test]
fn test_bind_kind_decimal_carries_precision_scale() {
    assert_eq!(
        bind_kind(&column("decimal", 9, 18, 2)),
        BindKind::Decimal {
            precision: 18,
            scale: 2
        }
    );
    assert_eq!(
        bind_kind(&column("money", 8, 0, 0)),
        BindKind::Decimal {
            precision: 19,
            scale: 4
        }
    );
}

#[test]
fn test_null_and_empty_always_coerce_to_null() {
    let meta = column("nvarchar", 20, 0, 0);
    assert!(coerce("f", &json!(null), &meta).unwrap().is_null());
    assert!(coerce("f", &json!("   "), &meta).unwrap().is_null());
    // Even for a column that is NOT NULL; completeness is the mapper's job.
    let mut strict = column("int", 4, 0, 0);
    strict.is_nullable = false;
    assert!(coerce("f", &json!(""), &strict).unwrap().is_null());
}

#[test]
fn test_string_over_capacity_fails_instead_of_truncating() {
    // nvarchar(10) reported as 20 bytes
    let meta = column("nvarchar", 20, 0, 0);
    let err = coerce("ProjNr", &json!("HIVE2024000123"), &meta).unwrap_err();
    match err {
        SyncError::ValueTooLong { field, length, max } => {
            assert_eq!(field, "ProjNr");
            assert_eq!(length, 14);
            assert_eq!(max, 10);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_string_within_capacity_passes_untruncated() {
    let meta = column("nvarchar", 80, 0, 0);
    match coerce("name", &json!("Müller & Söhne"), &meta).unwrap() {
        SqlValue::Text(s) => assert_eq!(s, "Müller & Söhne"),
        other => panic!("unexpected value: {other:?}"),
    }
}

#[test]
fn test_numeric_parsing() {
    let meta = column("int", 4, 0, 0);
    assert!(matches!(
        coerce("abtnr", &json!(42), &meta).unwrap(),
        SqlValue::I64(42)
    ));
    assert!(matches!(
        coerce("abtnr", &json!("17"), &meta).unwrap(),
        SqlValue::I64(17)
    ));
    // German payloads occasionally carry comma decimals.
    let money = column("money", 8, 0, 0);
    assert!(matches!(
        coerce("auftragsumme", &json!("1234,50"), &money).unwrap(),
        SqlValue::Decimal(_)
    ));

    let err = coerce("abtnr", &json!("zwölf"), &meta).unwrap_err();
    assert!(matches!(err, SyncError::NotANumber { .. }));
}

#[test]
fn test_decimal_scaling() {
    let meta = column("decimal", 9, 18, 2);
    match coerce("summe", &json!(12.34), &meta).unwrap() {
        SqlValue::Decimal(n) => {
            assert_eq!(n.value(), 1234);
            assert_eq!(n.scale(), 2);
        }
        other => panic!("unexpected value: {other:?}"),
    }
}

#[test]
fn test_bit_accepts_bool_and_numeric() {
    let meta = column("bit", 1, 0, 0);
    assert!(matches!(
        coerce("aktiv", &json!(true), &meta).unwrap(),
        SqlValue::Bool(true)
    ));
    assert!(matches!(
        coerce("aktiv", &json!(0), &meta).unwrap(),
        SqlValue::Bool(false)
    ));
    assert!(matches!(
        coerce("aktiv", &json!(2), &meta).unwrap(),
        SqlValue::Bool(true)
    ));
    assert!(matches!(
        coerce("aktiv", &json!("1"), &meta).unwrap(),
        SqlValue::Bool(true)
    ));
    assert!(coerce("aktiv", &json!("vielleicht"), &meta).is_err());
}

#[test]
fn test_unrecognized_type_passes_through() {
    let meta = column("hierarchyid", -1, 0, 0);
    match coerce("pfad", &json!("/1/3/"), &meta).unwrap() {
        SqlValue::Text(s) => assert_eq!(s, "/1/3/"),
        other => panic!("unexpected value: {other:?}"),
    }
}

#[test]
fn test_datetime_parsing_variants() {
    let meta = column("datetime2", 8, 0, 0);
    for raw in [
        "2024-03-01T10:15:30",
        "2024-03-01 10:15:30.500",
        "2024-03-01T10:15:30+02:00",
    ] {
        assert!(
            matches!(coerce("datum", &json!(raw), &meta).unwrap(), SqlValue::DateTime(_)),
            "{raw}"
        );
    }
    // Date-only payloads resolve to midnight.
    match coerce("datum", &json!("2024-03-01"), &meta).unwrap() {
        SqlValue::DateTime(dt) => assert_eq!(dt.format("%H:%M:%S").to_string(), "00:00:00"),
        other => panic!("unexpected value: {other:?}"),
    }
    // Unparseable values pass through for the server to judge.
    assert!(matches!(
        coerce("datum", &json!("gestern"), &meta).unwrap(),
        SqlValue::Text(_)
    ));
}

#[test]
fn test_literal_rendering() {
    assert_eq!(render_literal(&SqlValue::Null), "NULL");
    assert_eq!(render_literal(&SqlValue::Bool(true)), "1");
    assert_eq!(render_literal(&SqlValue::I64(-5)), "-5");
    assert_eq!(
        render_literal(&SqlValue::Text("O'Brien".to_string())),
        "N'O''Brien'"
    );
    assert_eq!(
        render_literal(&SqlValue::Bytes(vec![0xde, 0xad])),
        "0xdead"
    );
    assert_eq!(render_literal(&SqlValue::F64(f64::NAN)), "NULL");

    let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_milli_opt(10, 15, 30, 250)
        .unwrap();
    assert_eq!(
        render_literal(&SqlValue::DateTime(dt)),
        "'2024-03-01T10:15:30.250'"
    );
}

#[test]
fn test_from_column_data_preserves_kinds() {
    assert!(matches!(
        SqlValue::from_column_data(ColumnData::I32(Some(7))),
        SqlValue::I32(7)
    ));
    assert!(matches!(
        SqlValue::from_column_data(ColumnData::Bit(Some(true))),
        SqlValue::Bool(true)
    ));
    assert!(SqlValue::from_column_data(ColumnData::String(None)).is_null());
    match SqlValue::from_column_data(ColumnData::String(Some("Berlin".into()))) {
        SqlValue::Text(s) => assert_eq!(s, "Berlin"),
        other => panic!("unexpected value: {other:?}"),
    }
}
