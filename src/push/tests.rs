use super::*;
use serde_json::json;

fn project_result() -> Vec<QueryResult> {
    vec![QueryResult {
        columns: vec![
            "LfdNr".into(),
            "ProjNr".into(),
            "ProjBezeichnung".into(),
            "GeaendertAm".into(),
        ],
        rows: vec![
            vec![
                json!(1),
                json!("HIVE2024000123"),
                json!("Neubau Lagerhalle"),
                json!("2024-03-01T10:15:30.000"),
            ],
            vec![json!(2), json!(null), json!("verwaister Datensatz"), json!(null)],
            vec![json!(3), json!("HIVE2024000124"), json!(null), json!(null)],
        ],
    }]
}

#[test]
fn test_mirror_rows_extract_key_and_payload() {
    let rows = mirror_rows_from_result(&project_result()).unwrap();
    // The row without a project number is dropped.
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].projnr, "HIVE2024000123");
    assert_eq!(
        rows[0].payload.get("ProjBezeichnung"),
        Some(&json!("Neubau Lagerhalle"))
    );
    assert!(rows[0].erp_edited_at.is_some());

    assert_eq!(rows[1].projnr, "HIVE2024000124");
    assert!(rows[1].erp_edited_at.is_none());
}

#[test]
fn test_mirror_rows_require_project_number_column() {
    let results = vec![QueryResult {
        columns: vec!["Egal".into()],
        rows: vec![],
    }];
    let err = mirror_rows_from_result(&results).unwrap_err();
    assert!(err.to_string().contains("ProjNr"));
}
