//! Typed error hierarchy for dealdesk.
//!
//! `CrmError` covers domain failures raised by the store, the board and the
//! API. Lower layers return `anyhow::Result` and wrap a `CrmError` when the
//! caller needs to branch on the failure kind; the API layer downcasts.

use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// The kind of record a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Profile,
    Company,
    Contact,
    Stage,
    Deal,
    Activity,
    Note,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Entity::Profile => "Profile",
            Entity::Company => "Company",
            Entity::Contact => "Contact",
            Entity::Stage => "Stage",
            Entity::Deal => "Deal",
            Entity::Activity => "Activity",
            Entity::Note => "Note",
        };
        f.write_str(name)
    }
}

/// Errors from the CRM store, board and API.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    #[error("Cannot delete \"{name}\": it has {count} deal{}. Move or delete those deals first.", plural(.count))]
    StageInUse { name: String, count: i64 },

    #[error("No open pipeline stage exists to place the deal in")]
    NoOpenStage,

    #[error("No {outcome} stage is configured")]
    NoTerminalStage { outcome: String },

    #[error("Stage order must list every stage exactly once")]
    InvalidStageOrder,

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Deal {deal_id} already has a stage change in flight")]
    MoveInFlight { deal_id: i64 },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn plural(count: &i64) -> &'static str {
    if *count == 1 { "" } else { "s" }
}

impl CrmError {
    pub fn not_found(entity: Entity, id: i64) -> Self {
        CrmError::NotFound { entity, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_entity_and_id() {
        let err = CrmError::not_found(Entity::Deal, 42);
        assert_eq!(err.to_string(), "Deal 42 not found");
    }

    #[test]
    fn stage_in_use_message_cites_count() {
        let err = CrmError::StageInUse {
            name: "Negotiation".into(),
            count: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 deals"), "got: {msg}");
        assert!(msg.contains("Negotiation"));
    }

    #[test]
    fn stage_in_use_singular() {
        let err = CrmError::StageInUse {
            name: "Lead".into(),
            count: 1,
        };
        assert!(err.to_string().contains("1 deal."));
    }

    #[test]
    fn validation_carries_fields() {
        let err = CrmError::Validation(vec![FieldError::new("title", "Title is required")]);
        match &err {
            CrmError::Validation(fields) => assert_eq!(fields[0].field, "title"),
            _ => panic!("Expected Validation"),
        }
    }

    #[test]
    fn crm_error_survives_anyhow_round_trip() {
        let err: anyhow::Error = CrmError::NoOpenStage.into();
        assert!(matches!(
            err.downcast_ref::<CrmError>(),
            Some(CrmError::NoOpenStage)
        ));
    }

    #[test]
    fn implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CrmError::Unauthorized);
    }
}
