// =====================================================
// QUEUE PAYLOAD SHAPES
// =====================================================
//
// The wire format the cloud side enqueues. Only the structural parts are
// typed here; scalar project fields stay in the flattened extra map and are
// resolved against the live catalog by the mapper.

use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use serde_json::{Map, Value};

// --- Address Roles ---

/// The three relationships a project has to address entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRole {
    Primary,
    Billing,
    Site,
}

impl AddressRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressRole::Primary => "primary",
            AddressRole::Billing => "billing",
            AddressRole::Site => "site",
        }
    }

    /// Tag appended to generated address ids for this role.
    pub fn id_suffix(&self) -> &'static str {
        match self {
            AddressRole::Primary => "_PROJADR",
            AddressRole::Billing => "_RECHADR",
            AddressRole::Site => "_BAUADR",
        }
    }

    /// The project column referencing this role's address.
    pub fn project_column(&self) -> &'static str {
        match self {
            AddressRole::Primary => "AdrNrGes",
            AddressRole::Billing => "RechAdrNr",
            AddressRole::Site => "BauherrAdrNr",
        }
    }
}

// --- Payload Structures ---

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LocationPayload {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub plz: Option<String>,
    pub ort: Option<String>,
    pub land: Option<String>,
    #[serde(rename = "ortTyp")]
    pub ort_typ: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AddressPayload {
    /// Caller-supplied address key; trusted verbatim when present.
    #[serde(rename = "AdrNrGes")]
    pub adr_nr_ges: Option<String>,
    pub name: Option<String>,
    pub vorname: Option<String>,
    pub strasse: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub plz: Option<String>,
    pub ort: Option<String>,
    pub rechnungsmail: Option<String>,
    pub land: Option<String>,
    /// Structured alternative to the flat plz/ort fields.
    pub standort: Option<LocationPayload>,
    /// Additional address columns, passed through to the mapper.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Location input for one address, normalized from either the flat fields
/// or the nested standort object, never both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationFields {
    pub plz: Option<String>,
    pub ort: Option<String>,
    pub land: Option<String>,
    pub ort_typ: Option<String>,
}

impl AddressPayload {
    pub fn location_fields(&self, role: AddressRole) -> SyncResult<LocationFields> {
        let has_flat = non_empty(&self.plz).is_some() || non_empty(&self.ort).is_some();

        match (&self.standort, has_flat) {
            (Some(_), true) => Err(SyncError::AmbiguousPayload(format!(
                "{} address supplies both flat plz/ort fields and a standort object",
                role.as_str()
            ))),
            (Some(nested), false) => Ok(LocationFields {
                plz: non_empty(&nested.plz),
                ort: non_empty(&nested.ort),
                land: non_empty(&nested.land).or_else(|| non_empty(&self.land)),
                ort_typ: non_empty(&nested.ort_typ),
            }),
            (None, _) => Ok(LocationFields {
                plz: non_empty(&self.plz),
                ort: non_empty(&self.ort),
                land: non_empty(&self.land),
                ort_typ: None,
            }),
        }
    }

    pub fn has_any_fields(&self) -> bool {
        non_empty(&self.adr_nr_ges).is_some()
            || non_empty(&self.name).is_some()
            || non_empty(&self.vorname).is_some()
            || non_empty(&self.strasse).is_some()
            || non_empty(&self.plz).is_some()
            || non_empty(&self.ort).is_some()
            || non_empty(&self.rechnungsmail).is_some()
            || non_empty(&self.land).is_some()
            || self.standort.is_some()
            || !self.extra.is_empty()
    }
}

/// Billing/site address slot: either inherits the primary resolution or
/// carries its own address payload.
#[derive(Deserialize, Debug, Clone)]
pub struct RoleAddress {
    #[serde(rename = "sameAsAdresse", default)]
    pub same_as_adresse: bool,
    #[serde(flatten)]
    pub address: AddressPayload,
}

#[derive(Debug, Clone)]
pub enum RoleSource {
    SameAsPrimary,
    Own(AddressPayload),
}

/// Resolves a billing/site slot into its source. Absent slots inherit the
/// primary address; a slot may not both inherit and carry its own fields.
pub fn resolve_role_source(
    slot: Option<&RoleAddress>,
    role: AddressRole,
) -> SyncResult<RoleSource> {
    match slot {
        None => Ok(RoleSource::SameAsPrimary),
        Some(r) if r.same_as_adresse => {
            if r.address.has_any_fields() {
                Err(SyncError::AmbiguousPayload(format!(
                    "{} address sets sameAsAdresse but also carries its own fields",
                    role.as_str()
                )))
            } else {
                Ok(RoleSource::SameAsPrimary)
            }
        }
        Some(r) => {
            if r.address.has_any_fields() {
                Ok(RoleSource::Own(r.address.clone()))
            } else {
                Err(SyncError::Payload(format!(
                    "{} address disables sameAsAdresse but supplies no fields",
                    role.as_str()
                )))
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProjectPayload {
    pub projnr: String,
    pub adresse: AddressPayload,
    #[serde(rename = "rechnungAdresse")]
    pub rechnung_adresse: Option<RoleAddress>,
    #[serde(rename = "bauherrAdresse")]
    pub bauherr_adresse: Option<RoleAddress>,
    /// Scalar project fields (projbezeichnung, abtnr, sachbearb,
    /// auftragStatus, ...) resolved against the project table by the mapper.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn parse_project_payload(raw: &Value) -> SyncResult<ProjectPayload> {
    let payload: ProjectPayload = serde_json::from_value(raw.clone())
        .map_err(|e| SyncError::Payload(format!("queue payload does not parse: {}", e)))?;

    if payload.projnr.trim().is_empty() {
        return Err(SyncError::Payload("projnr is required".to_string()));
    }

    Ok(payload)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }))
}
