// =====================================================
// ADDRESS / LOCATION RESOLUTION
// =====================================================
//
// Resolves or creates the Ort (location) and Adresse rows a project refers
// to. Address ids are business keys derived from the display name; once an
// id exists it is never rewritten by this service.

use crate::catalog::MetadataCatalog;
use crate::db_types::{quote_identifier, ErpTables};
use crate::error::{SyncError, SyncResult};
use crate::mapper::{build_insert_sql, map_payload, MapOptions};
use crate::mssql::{self, MssqlClient};
use crate::payload::{AddressPayload, AddressRole, LocationFields};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tiberius::ToSql;

/// Hard cap of the ERP's address key column.
pub const MAX_ADDRESS_ID_LEN: usize = 24;

const ADDRESS_ID_COLUMN: &str = "AdrNrGes";
const LOCATION_ID_COLUMN: &str = "OrtNr";

/// Legal-form boilerplate stripped from the end of normalized names.
const LEGAL_FORM_TOKENS: &[&str] = &[
    "GMBH", "MBH", "AG", "KG", "KGAA", "UG", "OHG", "GBR", "EK", "EV", "E", "V", "CO", "SE",
    "UND", "HAFTUNGSBESCHRAENKT",
];

pub struct AddressResolver<'a> {
    pub catalog: &'a MetadataCatalog,
    pub tables: &'a ErpTables,
}

impl AddressResolver<'_> {
    /// Resolves an address payload to a referencable key, creating the
    /// location and address rows on first use. Runs inside the caller's
    /// transaction.
    pub async fn resolve(
        &self,
        conn: &mut MssqlClient,
        payload: &AddressPayload,
        role: AddressRole,
    ) -> SyncResult<String> {
        // Caller-supplied keys are trusted verbatim; no generation.
        if let Some(id) = payload
            .adr_nr_ges
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            if id.chars().count() > MAX_ADDRESS_ID_LEN {
                return Err(SyncError::AddressTooLong {
                    id: id.to_string(),
                    max: MAX_ADDRESS_ID_LEN,
                });
            }
            if self.address_exists(conn, id).await? {
                return Ok(id.to_string());
            }
            self.insert_address(conn, payload, id, role).await?;
            return Ok(id.to_string());
        }

        let name = payload
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::MissingRequiredField {
                label: format!("{} address", role.as_str()),
                field: "name".to_string(),
            })?;

        let candidate = self.generate_id(conn, name, role).await?;

        if self.address_exists(conn, &candidate).await? {
            return Ok(candidate);
        }

        self.insert_address(conn, payload, &candidate, role).await?;
        Ok(candidate)
    }

    /// Derives a fresh id: normalized name + role tag + next counter over
    /// the existing ids sharing that prefix.
    async fn generate_id(
        &self,
        conn: &mut MssqlClient,
        name: &str,
        role: AddressRole,
    ) -> SyncResult<String> {
        let tokens = normalize_name_tokens(name);
        if tokens.is_empty() {
            return Err(SyncError::Payload(format!(
                "address name '{}' normalizes to an empty id",
                name
            )));
        }
        let base = tokens.join("_");

        let bare = fit_candidate(&base, role, None)?;

        let existing = self.ids_with_prefix(conn, &bare).await?;
        match next_counter(&existing, &bare) {
            None => Ok(bare),
            Some(counter) => fit_candidate(&base, role, Some(counter)),
        }
    }

    async fn ids_with_prefix(
        &self,
        conn: &mut MssqlClient,
        prefix: &str,
    ) -> SyncResult<Vec<String>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIKE @P1 ESCAPE '\\'",
            quote_identifier(ADDRESS_ID_COLUMN),
            self.tables.qualified_address(),
            quote_identifier(ADDRESS_ID_COLUMN),
        );
        let pattern = format!("{}%", escape_like_pattern(prefix));

        let rows = mssql::query_with(conn, &sql, &[&pattern]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<&str, _>(0).ok().flatten())
            .map(|s| s.trim().to_string())
            .collect())
    }

    async fn address_exists(&self, conn: &mut MssqlClient, id: &str) -> SyncResult<bool> {
        let sql = format!(
            "SELECT COUNT_BIG(*) FROM {} WHERE {} = @P1",
            self.tables.qualified_address(),
            quote_identifier(ADDRESS_ID_COLUMN),
        );
        let count = mssql::query_scalar_i64(conn, &sql, &[&id]).await?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Inserts the address row after resolving its location. Required
    /// columns beyond the generated key and location reference must come
    /// from the payload.
    async fn insert_address(
        &self,
        conn: &mut MssqlClient,
        payload: &AddressPayload,
        id: &str,
        role: AddressRole,
    ) -> SyncResult<()> {
        let location = payload.location_fields(role)?;
        let ort_nr = self.resolve_or_create_location(conn, &location, role).await?;

        let meta = self.catalog.get_columns(&self.tables.address).await?;

        let mut fields = Map::new();
        for (key, value) in &payload.extra {
            fields.insert(key.clone(), value.clone());
        }
        fields.insert(ADDRESS_ID_COLUMN.to_string(), json!(id));
        if let Some(name) = &payload.name {
            fields.insert("Name".to_string(), json!(name));
        }
        if let Some(vorname) = &payload.vorname {
            fields.insert("Vorname".to_string(), json!(vorname));
        }
        if let Some(strasse) = &payload.strasse {
            fields.insert("Strasse".to_string(), json!(strasse));
        }
        if let Some(mail) = &payload.rechnungsmail {
            fields.insert("Rechnungsmail".to_string(), json!(mail));
        }
        if let Some(land) = &payload.land {
            fields.insert("Land".to_string(), json!(land));
        }
        fields.insert(LOCATION_ID_COLUMN.to_string(), json!(ort_nr));

        let label = format!("{} address", role.as_str());
        let mapped = map_payload(
            &fields,
            &meta,
            &MapOptions {
                label: &label,
                ..Default::default()
            },
        )?;

        let sql = build_insert_sql(&self.tables.qualified_address(), &mapped);
        let params: Vec<&dyn ToSql> = mapped.iter().map(|(_, v)| v as &dyn ToSql).collect();
        mssql::execute_with(conn, &sql, &params).await?;

        tracing::info!(id = id, role = role.as_str(), "address created");
        Ok(())
    }

    /// Looks up the location by its (Plz, Ort) natural key, creating it
    /// with the next free surrogate id when absent.
    ///
    /// The max+1 id assignment is racy under concurrent writers; runs are
    /// expected to be serialized by the single queue consumer.
    async fn resolve_or_create_location(
        &self,
        conn: &mut MssqlClient,
        fields: &LocationFields,
        role: AddressRole,
    ) -> SyncResult<i64> {
        let (plz, ort) = match (&fields.plz, &fields.ort) {
            (Some(plz), Some(ort)) => (plz.clone(), ort.clone()),
            _ => {
                return Err(SyncError::MissingAddressField {
                    role: role.as_str().to_string(),
                })
            }
        };

        let lookup = format!(
            "SELECT TOP 1 {} FROM {} WHERE {} = @P1 AND {} = @P2",
            quote_identifier(LOCATION_ID_COLUMN),
            self.tables.qualified_location(),
            quote_identifier("Plz"),
            quote_identifier("Ort"),
        );
        if let Some(existing) = mssql::query_scalar_i64(conn, &lookup, &[&plz, &ort]).await? {
            return Ok(existing);
        }

        let next_sql = format!(
            "SELECT ISNULL(MAX({}), 0) + 1 FROM {}",
            quote_identifier(LOCATION_ID_COLUMN),
            self.tables.qualified_location(),
        );
        let next_id = mssql::query_scalar_i64(conn, &next_sql, &[]).await?.unwrap_or(1);

        let meta = self.catalog.get_columns(&self.tables.location).await?;

        let mut values = Map::new();
        values.insert(LOCATION_ID_COLUMN.to_string(), json!(next_id));
        values.insert("Plz".to_string(), json!(plz));
        values.insert("Ort".to_string(), json!(ort));
        if let Some(land) = &fields.land {
            values.insert("Land".to_string(), json!(land));
        }
        if let Some(typ) = &fields.ort_typ {
            values.insert("OrtTyp".to_string(), json!(typ));
        }

        let mapped = map_payload(
            &values,
            &meta,
            &MapOptions {
                label: "location",
                ..Default::default()
            },
        )?;

        let sql = build_insert_sql(&self.tables.qualified_location(), &mapped);
        let params: Vec<&dyn ToSql> = mapped.iter().map(|(_, v)| v as &dyn ToSql).collect();
        mssql::execute_with(conn, &sql, &params).await?;

        tracing::info!(ort_nr = next_id, plz = %plz, ort = %ort, "location created");
        Ok(next_id)
    }
}

// --- Id Generation Helpers ---

fn token_split() -> &'static Regex {
    static TOKEN_SPLIT: OnceLock<Regex> = OnceLock::new();
    TOKEN_SPLIT.get_or_init(|| Regex::new("[^A-Z0-9]+").expect("static token pattern"))
}

/// Uppercases and transliterates a display name into the id alphabet.
fn transliterate(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 8);
    for c in name.chars() {
        match c {
            'ä' | 'Ä' => out.push_str("AE"),
            'ö' | 'Ö' => out.push_str("OE"),
            'ü' | 'Ü' => out.push_str("UE"),
            'ß' => out.push_str("SS"),
            '&' => out.push_str(" UND "),
            'é' | 'è' | 'ê' | 'É' => out.push('E'),
            'à' | 'á' | 'â' => out.push('A'),
            _ => out.extend(c.to_uppercase()),
        }
    }
    out
}

/// Normalized token sequence: transliterated, uppercased, split on
/// non-alphanumerics, with trailing legal-form boilerplate removed.
pub fn normalize_name_tokens(name: &str) -> Vec<String> {
    let upper = transliterate(name);
    let mut tokens: Vec<String> = token_split()
        .split(&upper)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    while tokens
        .last()
        .map(|t| LEGAL_FORM_TOKENS.contains(&t.as_str()))
        .unwrap_or(false)
    {
        tokens.pop();
    }

    tokens
}

/// Fits base + role tag + counter into the id length budget. The counter
/// digits and the role tag are preserved intact; only the base shrinks.
pub fn fit_candidate(base: &str, role: AddressRole, counter: Option<u32>) -> SyncResult<String> {
    let suffix = role.id_suffix();
    let counter_text = counter.map(|c| c.to_string()).unwrap_or_default();
    let fixed = suffix.chars().count() + counter_text.chars().count();

    if fixed >= MAX_ADDRESS_ID_LEN {
        return Err(SyncError::AddressTooLong {
            id: format!("{}{}{}", base, suffix, counter_text),
            max: MAX_ADDRESS_ID_LEN,
        });
    }

    let budget = MAX_ADDRESS_ID_LEN - fixed;
    let mut fitted: String = base.chars().take(budget).collect();
    while fitted.ends_with('_') {
        fitted.pop();
    }

    if fitted.is_empty() {
        return Err(SyncError::AddressTooLong {
            id: format!("{}{}{}", base, suffix, counter_text),
            max: MAX_ADDRESS_ID_LEN,
        });
    }

    Ok(format!("{}{}{}", fitted, suffix, counter_text))
}

/// Next numeric counter for a prefix, given the ids already using it. A
/// bare prefix counts as 1; ids whose remainder is not numeric belong to
/// other bases and are ignored. None means the prefix is still free.
///
/// Like the location surrogate, max+1 is racy under concurrent writers.
pub fn next_counter(existing: &[String], prefix: &str) -> Option<u32> {
    let mut max: Option<u32> = None;
    for id in existing {
        let Some(rest) = id.strip_prefix(prefix) else {
            continue;
        };
        let taken = if rest.is_empty() {
            Some(1)
        } else {
            rest.parse::<u32>().ok()
        };
        if let Some(n) = taken {
            max = Some(max.map_or(n, |m| m.max(n)));
        }
    }
    max.map(|m| m + 1)
}

/// Escapes LIKE wildcards so generated prefixes (which always contain
/// underscores) match literally. Pair with ESCAPE '\'.
pub fn escape_like_pattern(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('[', "\\[")
}

#[cfg(test)]
mod tests;
