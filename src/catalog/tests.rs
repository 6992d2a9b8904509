use super::*;
use serde_json::json;

fn catalog_row(
    name: &str,
    native_type: &str,
    max_length: i64,
    is_nullable: bool,
    is_identity: bool,
    is_computed: bool,
    default_expression: Option<&str>,
) -> Vec<serde_json::Value> {
    vec![
        json!(name),
        json!(native_type),
        json!(max_length),
        json!(10),
        json!(0),
        json!(is_nullable),
        json!(is_identity),
        json!(is_computed),
        default_expression.map(|d| json!(d)).unwrap_or(json!(null)),
        json!(null),
        if is_identity { json!(1) } else { json!(null) },
        if is_identity { json!(1) } else { json!(null) },
    ]
}

fn project_fixture() -> Vec<QueryResult> {
    vec![QueryResult {
        columns: vec![
            "name".into(),
            "native_type".into(),
            "max_length".into(),
            "precision".into(),
            "scale".into(),
            "is_nullable".into(),
            "is_identity".into(),
            "is_computed".into(),
            "default_expression".into(),
            "computed_definition".into(),
            "identity_seed".into(),
            "identity_increment".into(),
        ],
        rows: vec![
            catalog_row("LfdNr", "int", 4, false, true, false, None),
            catalog_row("ProjNr", "nvarchar", 40, false, false, false, None),
            catalog_row("ProjBezeichnung", "nvarchar", 200, true, false, false, None),
            catalog_row("AngelegtAm", "datetime2", 8, false, false, false, Some("(getdate())")),
            catalog_row("SuchName", "nvarchar", 100, true, false, true, None),
            catalog_row("RowVer", "timestamp", 8, false, false, false, None),
        ],
    }]
}

#[test]
fn test_parse_table_metadata() {
    let meta = parse_table_metadata("Projekt", &project_fixture()).unwrap();
    assert_eq!(meta.columns.len(), 6);
    assert_eq!(meta.columns[0].name, "LfdNr");
    assert!(meta.columns[0].is_identity);
    assert_eq!(meta.columns[0].identity_seed, Some(1));
    assert!(!meta.columns[1].is_nullable);
    assert!(meta.columns[4].is_computed);
}

#[test]
fn test_parse_missing_table_is_catalog_error() {
    let empty = vec![QueryResult {
        columns: vec![],
        rows: vec![],
    }];
    let err = parse_table_metadata("Nope", &empty).unwrap_err();
    assert!(matches!(err, SyncError::Catalog(_)));
    assert!(err.to_string().contains("Nope"));
}

#[test]
fn test_char_capacity_halves_utf16_types() {
    let meta = parse_table_metadata("Projekt", &project_fixture()).unwrap();
    // nvarchar(20) is reported as 40 bytes
    assert_eq!(meta.find("ProjNr").unwrap().char_capacity(), Some(20));
}

#[test]
fn test_char_capacity_unbounded() {
    let mut fixture = project_fixture();
    fixture[0]
        .rows
        .push(catalog_row("Notizen", "nvarchar", -1, true, false, false, None));
    let meta = parse_table_metadata("Projekt", &fixture).unwrap();
    assert_eq!(meta.find("Notizen").unwrap().char_capacity(), None);
}

#[test]
fn test_insertable_excludes_identity_computed_rowversion() {
    let meta = parse_table_metadata("Projekt", &project_fixture()).unwrap();
    let insertable: Vec<&str> = meta
        .insertable_columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(insertable, vec!["ProjNr", "ProjBezeichnung", "AngelegtAm"]);
}

#[test]
fn test_required_columns_skip_defaults() {
    let meta = parse_table_metadata("Projekt", &project_fixture()).unwrap();
    // AngelegtAm is NOT NULL but has a server default, LfdNr is identity.
    let required: Vec<&str> = meta
        .required_columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(required, vec!["ProjNr"]);
}

#[test]
fn test_find_is_case_insensitive() {
    let meta = parse_table_metadata("Projekt", &project_fixture()).unwrap();
    assert!(meta.find("projnr").is_some());
    assert!(meta.find("PROJBEZEICHNUNG").is_some());
    assert!(meta.find("nope").is_none());
}

#[tokio::test]
async fn test_get_columns_serves_cached_snapshot() {
    // The pool is constructed lazily, so no server is contacted as long as
    // the cache answers.
    let config = crate::db_types::ConnectionConfig {
        host: "localhost".into(),
        port: 1433,
        username: "sa".into(),
        password: None,
        database: Some("erp".into()),
        ssl_mode: None,
        schema: None,
        trust_cert: true,
    };
    let pool = crate::mssql::create_pool(&config).unwrap();
    let catalog = MetadataCatalog::new(pool, "dbo");

    let parsed = parse_table_metadata("Projekt", &project_fixture()).unwrap();
    catalog.seed("Projekt", parsed);

    let first = catalog.get_columns("Projekt").await.unwrap();
    let second = catalog.get_columns("projekt").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.columns.len(), 6);
}
