use super::*;

#[test]
fn test_normalize_strips_legal_forms() {
    assert_eq!(normalize_name_tokens("Acme GmbH"), vec!["ACME"]);
    assert_eq!(
        normalize_name_tokens("Acme GmbH & Co. KG"),
        vec!["ACME"],
        "trailing boilerplate including the connector is removed"
    );
    assert_eq!(
        normalize_name_tokens("Bauverein Nord e.V."),
        vec!["BAUVEREIN", "NORD"]
    );
}

#[test]
fn test_normalize_transliterates_german() {
    assert_eq!(
        normalize_name_tokens("Müller & Söhne"),
        vec!["MUELLER", "UND", "SOEHNE"],
        "an interior connector is part of the name"
    );
    assert_eq!(normalize_name_tokens("Straßenbau Köln"), vec!["STRASSENBAU", "KOELN"]);
    assert_eq!(normalize_name_tokens("Café Motte"), vec!["CAFE", "MOTTE"]);
}

#[test]
fn test_normalize_splits_on_punctuation() {
    assert_eq!(
        normalize_name_tokens("Schmidt-Bau / Abt. 3"),
        vec!["SCHMIDT", "BAU", "ABT", "3"]
    );
}

#[test]
fn test_fit_candidate_bare() {
    let id = fit_candidate("ACME", AddressRole::Primary, None).unwrap();
    assert_eq!(id, "ACME_PROJADR");
    assert!(id.len() <= MAX_ADDRESS_ID_LEN);
}

#[test]
fn test_fit_candidate_truncates_base_never_counter() {
    // 30 chars of base against a 24-char budget.
    let base = "MUELLER_UND_SOEHNE_BAUGESELLSCH";
    let id = fit_candidate(base, AddressRole::Primary, Some(12)).unwrap();
    assert_eq!(id.chars().count(), MAX_ADDRESS_ID_LEN);
    assert!(id.ends_with("_PROJADR12"), "{id}");
    // _PROJADR (8) + "12" (2) leaves 14 chars of base.
    assert!(id.starts_with("MUELLER_UND_SO"), "{id}");
}

#[test]
fn test_fit_candidate_drops_trailing_separator() {
    // Truncation must not leave an underscore glued to the role tag.
    let base = "MUELLER_UND_SO_HNEXXXXXXXX";
    let id = fit_candidate(base, AddressRole::Billing, Some(3)).unwrap();
    assert!(!id.contains("__"), "{id}");
    assert!(id.ends_with("_RECHADR3"), "{id}");
}

#[test]
fn test_fit_candidate_short_base_survives_large_counter() {
    let id = fit_candidate("X", AddressRole::Primary, Some(999_999)).unwrap();
    assert_eq!(id, "X_PROJADR999999");
}

#[test]
fn test_next_counter_free_prefix() {
    assert_eq!(next_counter(&[], "ACME_PROJADR"), None);
}

#[test]
fn test_next_counter_advances_past_max() {
    let existing = vec![
        "ACME_PROJADR".to_string(),
        "ACME_PROJADR7".to_string(),
        "ACME_PROJADR3".to_string(),
        // Different base sharing the prefix characters; not numeric, ignored.
        "ACME_PROJADR_ALT".to_string(),
    ];
    assert_eq!(next_counter(&existing, "ACME_PROJADR"), Some(8));
}

#[test]
fn test_next_counter_counts_bare_prefix_as_one() {
    let existing = vec!["ACME_PROJADR".to_string()];
    assert_eq!(next_counter(&existing, "ACME_PROJADR"), Some(2));
}

#[test]
fn test_escape_like_pattern() {
    assert_eq!(escape_like_pattern("ACME_PROJADR"), "ACME\\_PROJADR");
    assert_eq!(escape_like_pattern("50%_[X]"), "50\\%\\_\\[X]");
}
