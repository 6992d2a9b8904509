// =====================================================
// PROJECT INSERT WORKFLOW
// =====================================================
//
// One queue item ends here: resolve the three address roles, then insert
// exactly one project row: either mapped directly from the payload or
// cloned from a template row. Inserting an existing project number is a
// reported no-op, never an overwrite.

use crate::address::AddressResolver;
use crate::catalog::{MetadataCatalog, TableMetadata};
use crate::coerce::{coerce, SqlValue};
use crate::db_types::{quote_identifier, ErpTables};
use crate::error::{SyncError, SyncResult};
use crate::mapper::{build_insert_sql, map_payload, MapOptions};
use crate::mssql::{self, MssqlClient};
use crate::payload::{resolve_role_source, AddressRole, ProjectPayload, RoleSource};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tiberius::ToSql;

const PROJECT_NUMBER_COLUMN: &str = "ProjNr";
const CREATED_COLUMN: &str = "AngelegtAm";

/// Timestamp columns populated when the payload leaves them out.
const TIMESTAMP_COLUMNS: &[&str] = &["AngelegtAm", "GeaendertAm", "EroeffnetAm", "AuftragDatum"];

/// How new project rows come into being. Selected by configuration, never
/// inferred from the payload.
#[derive(Debug, Clone)]
pub enum InsertStrategy {
    /// Map the payload onto the project table directly.
    Direct,
    /// INSERT...SELECT from an existing row, overriding key fields. With no
    /// fixed template the most recently created project is used.
    CloneFromTemplate { template: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    Exists,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInsertResult {
    pub status: InsertOutcome,
    pub projnr: String,
}

pub struct ProjectInserter<'a> {
    pub catalog: &'a MetadataCatalog,
    pub tables: &'a ErpTables,
    pub strategy: &'a InsertStrategy,
}

impl ProjectInserter<'_> {
    /// Runs the full workflow for one payload inside one transaction.
    pub async fn insert(&self, payload: &ProjectPayload) -> SyncResult<ProjectInsertResult> {
        let projnr = payload.projnr.trim().to_string();

        let project_meta = self.catalog.get_columns(&self.tables.project).await?;
        if let Some(column) = project_meta.find(PROJECT_NUMBER_COLUMN) {
            // The project number feeds foreign keys downstream; length
            // violations must fail here, not get truncated.
            coerce("projnr", &json!(projnr), column)?;
        }

        let mut pooled = self
            .catalog
            .pool()
            .get()
            .await
            .map_err(|e| SyncError::Pool(e.to_string()))?;
        let conn: &mut MssqlClient = &mut pooled;

        if self.project_exists(conn, &projnr).await? {
            tracing::info!(projnr = %projnr, "project already exists, skipping insert");
            return Ok(ProjectInsertResult {
                status: InsertOutcome::Exists,
                projnr,
            });
        }

        mssql::begin_tran(conn).await?;
        match self
            .insert_in_tran(conn, &project_meta, payload, &projnr)
            .await
        {
            Ok(()) => {
                mssql::commit_tran(conn).await?;
                tracing::info!(projnr = %projnr, "project inserted");
                Ok(ProjectInsertResult {
                    status: InsertOutcome::Inserted,
                    projnr,
                })
            }
            Err(err) => {
                // Best-effort: the original error is what surfaces.
                if let Err(rollback_err) = mssql::rollback_tran(conn).await {
                    tracing::warn!(error = %rollback_err, "rollback failed after insert error");
                }
                Err(err)
            }
        }
    }

    async fn insert_in_tran(
        &self,
        conn: &mut MssqlClient,
        project_meta: &TableMetadata,
        payload: &ProjectPayload,
        projnr: &str,
    ) -> SyncResult<()> {
        let resolver = AddressResolver {
            catalog: self.catalog,
            tables: self.tables,
        };

        // Resolution order is fixed: primary, then billing, then site.
        let primary = resolver
            .resolve(conn, &payload.adresse, AddressRole::Primary)
            .await?;

        let billing = match resolve_role_source(payload.rechnung_adresse.as_ref(), AddressRole::Billing)? {
            RoleSource::SameAsPrimary => primary.clone(),
            RoleSource::Own(own) => resolver.resolve(conn, &own, AddressRole::Billing).await?,
        };

        let site = match resolve_role_source(payload.bauherr_adresse.as_ref(), AddressRole::Site)? {
            RoleSource::SameAsPrimary => primary.clone(),
            RoleSource::Own(own) => resolver.resolve(conn, &own, AddressRole::Site).await?,
        };

        let refs = [
            (AddressRole::Primary, primary),
            (AddressRole::Billing, billing),
            (AddressRole::Site, site),
        ];

        check_reference_consistency(&payload.extra, &refs)?;

        match self.strategy {
            InsertStrategy::Direct => {
                self.direct_insert(conn, project_meta, payload, projnr, &refs)
                    .await
            }
            InsertStrategy::CloneFromTemplate { template } => {
                self.clone_from_template(conn, project_meta, payload, projnr, &refs, template.as_deref())
                    .await
            }
        }
    }

    async fn project_exists(&self, conn: &mut MssqlClient, projnr: &str) -> SyncResult<bool> {
        let sql = format!(
            "SELECT COUNT_BIG(*) FROM {} WHERE {} = @P1",
            self.tables.qualified_project(),
            quote_identifier(PROJECT_NUMBER_COLUMN),
        );
        let count = mssql::query_scalar_i64(conn, &sql, &[&projnr]).await?;
        Ok(count.unwrap_or(0) > 0)
    }

    async fn direct_insert(
        &self,
        conn: &mut MssqlClient,
        project_meta: &TableMetadata,
        payload: &ProjectPayload,
        projnr: &str,
        refs: &[(AddressRole, String)],
    ) -> SyncResult<()> {
        let fields = assemble_project_fields(project_meta, payload, projnr, refs, true);

        let mapped = map_payload(
            &fields,
            project_meta,
            &MapOptions {
                label: "project",
                ..Default::default()
            },
        )?;

        let sql = build_insert_sql(&self.tables.qualified_project(), &mapped);
        let params: Vec<&dyn ToSql> = mapped.iter().map(|(_, v)| v as &dyn ToSql).collect();
        let inserted = mssql::execute_with(conn, &sql, &params).await?;

        if inserted != 1 {
            return Err(SyncError::Db(format!(
                "project insert affected {} rows instead of 1",
                inserted
            )));
        }
        Ok(())
    }

    async fn clone_from_template(
        &self,
        conn: &mut MssqlClient,
        project_meta: &TableMetadata,
        payload: &ProjectPayload,
        projnr: &str,
        refs: &[(AddressRole, String)],
        template: Option<&str>,
    ) -> SyncResult<()> {
        let template_key = match template {
            Some(key) => key.to_string(),
            None => self.most_recent_project(conn).await?,
        };

        let fields = assemble_project_fields(project_meta, payload, projnr, refs, false);

        // The template supplies every column the payload does not override,
        // so the required-column check is waived here.
        let all_columns: Vec<&str> = project_meta.columns.iter().map(|c| c.name.as_str()).collect();
        let overrides = map_payload(
            &fields,
            project_meta,
            &MapOptions {
                label: "project",
                deferred_columns: &all_columns,
                ..Default::default()
            },
        )?;

        let sql = build_template_clone_sql(
            &self.tables.qualified_project(),
            project_meta,
            &overrides,
        );

        let mut params: Vec<&dyn ToSql> = overrides.iter().map(|(_, v)| v as &dyn ToSql).collect();
        params.push(&template_key);

        let inserted = mssql::execute_with(conn, &sql, &params).await?;
        if inserted == 0 {
            return Err(SyncError::TemplateNotFound(template_key));
        }
        Ok(())
    }

    /// Fallback template selection: newest by creation date, ties broken by
    /// project number so the pick is a total order.
    async fn most_recent_project(&self, conn: &mut MssqlClient) -> SyncResult<String> {
        let sql = format!(
            "SELECT TOP 1 {} FROM {} ORDER BY {} DESC, {} DESC",
            quote_identifier(PROJECT_NUMBER_COLUMN),
            self.tables.qualified_project(),
            quote_identifier(CREATED_COLUMN),
            quote_identifier(PROJECT_NUMBER_COLUMN),
        );
        mssql::query_scalar_string(conn, &sql, &[])
            .await?
            .ok_or_else(|| SyncError::TemplateNotFound("no project rows exist".to_string()))
    }
}

// --- Pure Assembly Helpers ---

/// Combines payload scalars, the project number, resolved address
/// references and timestamp defaults into the field map headed for the
/// mapper. Timestamps are added only when the column exists; for the
/// direct strategy only when the payload did not supply them, for the
/// clone strategy always (a cloned project is a new project).
fn assemble_project_fields(
    project_meta: &TableMetadata,
    payload: &ProjectPayload,
    projnr: &str,
    refs: &[(AddressRole, String)],
    keep_payload_timestamps: bool,
) -> Map<String, Value> {
    let mut fields = payload.extra.clone();

    fields.insert(PROJECT_NUMBER_COLUMN.to_string(), json!(projnr));
    for (role, key) in refs {
        remove_ci(&mut fields, role.project_column());
        fields.insert(role.project_column().to_string(), json!(key));
    }

    let now = chrono::Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string();
    for column in TIMESTAMP_COLUMNS {
        if project_meta.find(column).is_none() {
            continue;
        }
        let supplied = fields.keys().any(|k| k.eq_ignore_ascii_case(column));
        if supplied && keep_payload_timestamps {
            continue;
        }
        remove_ci(&mut fields, column);
        fields.insert(column.to_string(), json!(now));
    }

    fields
}

fn remove_ci(fields: &mut Map<String, Value>, column: &str) {
    let keys: Vec<String> = fields
        .keys()
        .filter(|k| k.eq_ignore_ascii_case(column))
        .cloned()
        .collect();
    for key in keys {
        fields.remove(&key);
    }
}

/// Fails when the payload pins an address-reference column to a value other
/// than what resolution produced. Matching explicit values are fine.
pub fn check_reference_consistency(
    extra: &Map<String, Value>,
    refs: &[(AddressRole, String)],
) -> SyncResult<()> {
    for (role, resolved) in refs {
        for (key, value) in extra {
            if !key.eq_ignore_ascii_case(role.project_column()) {
                continue;
            }
            if let Some(supplied) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                if supplied != resolved {
                    return Err(SyncError::AddressReferenceMismatch {
                        role: role.as_str().to_string(),
                        supplied: supplied.to_string(),
                        resolved: resolved.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// INSERT...SELECT cloning every insertable column from the template row,
/// with overridden columns replaced by parameter placeholders. The final
/// placeholder is the template's project number.
pub fn build_template_clone_sql(
    qualified_table: &str,
    project_meta: &TableMetadata,
    overrides: &[(String, SqlValue)],
) -> String {
    let insertable = project_meta.insertable_columns();

    let column_list = insertable
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<String>>()
        .join(", ");

    let select_list = insertable
        .iter()
        .map(|c| {
            match overrides
                .iter()
                .position(|(name, _)| name.eq_ignore_ascii_case(&c.name))
            {
                Some(index) => format!("@P{}", index + 1),
                None => quote_identifier(&c.name),
            }
        })
        .collect::<Vec<String>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} = @P{}",
        qualified_table,
        column_list,
        select_list,
        qualified_table,
        quote_identifier(PROJECT_NUMBER_COLUMN),
        overrides.len() + 1
    )
}

#[cfg(test)]
mod tests;
