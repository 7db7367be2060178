use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequest, Path, Query, Request, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;
use tokio::sync::broadcast;

use super::auth::CurrentUser;
use super::db::{ActivityFilter, DbHandle};
use super::models::{ActivityType, CloseOutcome, RelatedTo};
use super::validation::{
    ActivityForm, CompanyForm, ContactForm, DealForm, NoteForm, ProfileForm, StageEditForm,
    StageForm,
};
use super::ws::{UserEvent, WsMessage, broadcast_message};
use crate::errors::{CrmError, FieldError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<UserEvent>,
}

impl AppState {
    pub fn new(db: DbHandle) -> Self {
        let (ws_tx, _) = broadcast::channel(256);
        Self { db, ws_tx }
    }

    fn notify(&self, user_id: i64, msg: &WsMessage) {
        broadcast_message(&self.ws_tx, user_id, msg);
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub deal_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct RelatedQuery {
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub deal_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct ReorderStagesRequest {
    pub stage_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct MoveDealRequest {
    pub stage_id: i64,
}

#[derive(Deserialize)]
pub struct CloseDealRequest {
    pub outcome: CloseOutcome,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct CompleteActivityRequest {
    pub completed: bool,
}

#[derive(Deserialize)]
pub struct EditNoteRequest {
    #[serde(default)]
    pub content: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    Conflict(String),
    Validation(Vec<FieldError>),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({"error": msg})),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg}))
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({"error": "Not authenticated"}),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, serde_json::json!({"error": msg})),
            ApiError::Validation(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({"error": "Validation failed", "fields": fields}),
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// `Json<T>` whose rejections (bad syntax, wrong types, missing content
/// type) come back as `{"error": ...}` like every other API failure.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

impl From<CrmError> for ApiError {
    fn from(err: CrmError) -> Self {
        match err {
            CrmError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            CrmError::StageInUse { .. }
            | CrmError::NoOpenStage
            | CrmError::NoTerminalStage { .. }
            | CrmError::MoveInFlight { .. } => ApiError::Conflict(err.to_string()),
            CrmError::InvalidStageOrder => ApiError::BadRequest(err.to_string()),
            CrmError::Validation(fields) => ApiError::Validation(fields),
            CrmError::Unauthorized => ApiError::Unauthorized,
            CrmError::LockPoisoned => {
                tracing::error!("database lock poisoned");
                ApiError::Internal(err.to_string())
            }
            CrmError::Other(e) => e.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CrmError>() {
            Ok(crm) => crm.into(),
            Err(other) => {
                tracing::error!(error = %format!("{other:#}"), "request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

/// At most one of the three anchors may be given.
fn related_from(
    contact_id: Option<i64>,
    company_id: Option<i64>,
    deal_id: Option<i64>,
) -> Result<Option<RelatedTo>, ApiError> {
    match (contact_id, company_id, deal_id) {
        (None, None, None) => Ok(None),
        (Some(id), None, None) => Ok(Some(RelatedTo::Contact(id))),
        (None, Some(id), None) => Ok(Some(RelatedTo::Company(id))),
        (None, None, Some(id)) => Ok(Some(RelatedTo::Deal(id))),
        _ => Err(ApiError::BadRequest(
            "Filter by at most one of contact_id, company_id, deal_id".to_string(),
        )),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/profile", get(get_profile).patch(update_profile))
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/contacts", get(list_contacts).post(create_contact))
        .route(
            "/api/contacts/{id}",
            get(get_contact).patch(update_contact).delete(delete_contact),
        )
        .route("/api/companies", get(list_companies).post(create_company))
        .route(
            "/api/companies/{id}",
            get(get_company).patch(update_company).delete(delete_company),
        )
        .route("/api/stages", get(list_stages).post(create_stage))
        .route("/api/stages/reorder", post(reorder_stages))
        .route("/api/stages/{id}", patch(update_stage).delete(delete_stage))
        .route("/api/deals", get(list_deals).post(create_deal))
        .route("/api/deals/board", get(get_board))
        .route(
            "/api/deals/{id}",
            get(get_deal).patch(update_deal).delete(delete_deal),
        )
        .route("/api/deals/{id}/stage", patch(move_deal))
        .route("/api/deals/{id}/close", post(close_deal))
        .route("/api/activities", get(list_activities).post(create_activity))
        .route("/api/activities/tasks", get(list_tasks))
        .route(
            "/api/activities/{id}",
            get(get_activity)
                .patch(update_activity)
                .delete(delete_activity),
        )
        .route("/api/activities/{id}/complete", post(complete_activity))
        .route("/api/notes", get(list_notes).post(create_note))
        .route("/api/notes/{id}", patch(update_note).delete(delete_note))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_profile(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state.db.call(move |db| db.get_profile(user_id)).await?;
    Ok(Json(profile))
}

async fn update_profile(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    ApiJson(form): ApiJson<ProfileForm>,
) -> Result<impl IntoResponse, ApiError> {
    let (full_name, avatar_url) = form.validate()?;
    let profile = state
        .db
        .call(move |db| db.update_profile(user_id, full_name.as_deref(), avatar_url.as_deref()))
        .await?;
    state.notify(
        user_id,
        &WsMessage::ProfileUpdated {
            profile: profile.clone(),
        },
    );
    Ok(Json(profile))
}

async fn get_dashboard(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let today = chrono::Utc::now().date_naive();
    let dashboard = state.db.call(move |db| db.dashboard(user_id, today)).await?;
    Ok(Json(dashboard))
}

// Contacts

async fn list_contacts(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let contacts = state
        .db
        .call(move |db| db.list_contacts(user_id, query.q.as_deref()))
        .await?;
    Ok(Json(contacts))
}

async fn create_contact(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    ApiJson(form): ApiJson<ContactForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let contact = state
        .db
        .call(move |db| db.create_contact(user_id, &input))
        .await?;
    state.notify(
        user_id,
        &WsMessage::ContactCreated {
            contact: contact.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn get_contact(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.db.call(move |db| db.contact_detail(user_id, id)).await?;
    Ok(Json(detail))
}

async fn update_contact(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(form): ApiJson<ContactForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let contact = state
        .db
        .call(move |db| db.update_contact(user_id, id, &input))
        .await?;
    state.notify(
        user_id,
        &WsMessage::ContactUpdated {
            contact: contact.clone(),
        },
    );
    Ok(Json(contact))
}

async fn delete_contact(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_contact(user_id, id)).await?;
    state.notify(user_id, &WsMessage::ContactDeleted { contact_id: id });
    Ok(StatusCode::NO_CONTENT)
}

// Companies

async fn list_companies(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let companies = state
        .db
        .call(move |db| db.list_companies(user_id, query.q.as_deref()))
        .await?;
    Ok(Json(companies))
}

async fn create_company(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    ApiJson(form): ApiJson<CompanyForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let company = state
        .db
        .call(move |db| db.create_company(user_id, &input))
        .await?;
    state.notify(
        user_id,
        &WsMessage::CompanyCreated {
            company: company.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(company)))
}

async fn get_company(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.db.call(move |db| db.company_detail(user_id, id)).await?;
    Ok(Json(detail))
}

async fn update_company(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(form): ApiJson<CompanyForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let company = state
        .db
        .call(move |db| db.update_company(user_id, id, &input))
        .await?;
    state.notify(
        user_id,
        &WsMessage::CompanyUpdated {
            company: company.clone(),
        },
    );
    Ok(Json(company))
}

async fn delete_company(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_company(user_id, id)).await?;
    state.notify(user_id, &WsMessage::CompanyDeleted { company_id: id });
    Ok(StatusCode::NO_CONTENT)
}

// Stages

async fn list_stages(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let stages = state.db.call(move |db| db.list_stages(user_id)).await?;
    Ok(Json(stages))
}

async fn create_stage(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    ApiJson(form): ApiJson<StageForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let stage = state
        .db
        .call(move |db| db.create_stage(user_id, &input))
        .await?;
    state.notify(
        user_id,
        &WsMessage::StageCreated {
            stage: stage.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(stage)))
}

async fn update_stage(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(form): ApiJson<StageEditForm>,
) -> Result<impl IntoResponse, ApiError> {
    let (name, color) = form.validate()?;
    let stage = state
        .db
        .call(move |db| db.update_stage(user_id, id, name.as_deref(), color.as_deref()))
        .await?;
    state.notify(
        user_id,
        &WsMessage::StageUpdated {
            stage: stage.clone(),
        },
    );
    Ok(Json(stage))
}

async fn reorder_stages(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    ApiJson(req): ApiJson<ReorderStagesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let stages = state
        .db
        .call(move |db| db.reorder_stages(user_id, &req.stage_ids))
        .await?;
    state.notify(
        user_id,
        &WsMessage::StagesReordered {
            stages: stages.clone(),
        },
    );
    Ok(Json(stages))
}

async fn delete_stage(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_stage(user_id, id)).await?;
    tracing::info!(user_id, stage_id = id, "stage deleted");
    state.notify(user_id, &WsMessage::StageDeleted { stage_id: id });
    Ok(StatusCode::NO_CONTENT)
}

// Deals

async fn list_deals(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let deals = state
        .db
        .call(move |db| db.list_deals_with_relations(user_id))
        .await?;
    Ok(Json(deals))
}

async fn get_board(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let board = state.db.call(move |db| db.get_board(user_id)).await?;
    Ok(Json(board))
}

async fn create_deal(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    ApiJson(form): ApiJson<DealForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let deal = state.db.call(move |db| db.create_deal(user_id, &input)).await?;
    state.notify(user_id, &WsMessage::DealCreated { deal: deal.clone() });
    Ok((StatusCode::CREATED, Json(deal)))
}

async fn get_deal(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.db.call(move |db| db.deal_detail(user_id, id)).await?;
    Ok(Json(detail))
}

async fn update_deal(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(form): ApiJson<DealForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let deal = state
        .db
        .call(move |db| db.update_deal(user_id, id, &input))
        .await?;
    state.notify(user_id, &WsMessage::DealUpdated { deal: deal.clone() });
    Ok(Json(deal))
}

async fn move_deal(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<MoveDealRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let stage_id = req.stage_id;
    let (from_stage_id, deal) = state
        .db
        .call(move |db| {
            let from = db.get_deal(user_id, id)?.stage_id;
            let deal = db.set_deal_stage(user_id, id, stage_id)?;
            Ok((from, deal))
        })
        .await?;
    tracing::info!(user_id, deal_id = id, from_stage_id, to_stage_id = stage_id, "deal moved");
    state.notify(
        user_id,
        &WsMessage::DealMoved {
            deal_id: id,
            from_stage_id,
            to_stage_id: stage_id,
        },
    );
    Ok(Json(deal))
}

async fn close_deal(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<CloseDealRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = req.outcome;
    let reason = req.reason;
    let deal = state
        .db
        .call(move |db| db.close_deal(user_id, id, outcome, reason.as_deref()))
        .await?;
    state.notify(
        user_id,
        &WsMessage::DealClosed {
            deal: deal.clone(),
            outcome,
        },
    );
    Ok(Json(deal))
}

async fn delete_deal(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_deal(user_id, id)).await?;
    state.notify(user_id, &WsMessage::DealDeleted { deal_id: id });
    Ok(StatusCode::NO_CONTENT)
}

// Activities

async fn list_activities(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Query(query): Query<ActivityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = match query.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(raw) => Some(ActivityType::from_str(raw).map_err(ApiError::BadRequest)?),
        None => None,
    };
    let filter = ActivityFilter {
        kind,
        related: related_from(query.contact_id, query.company_id, query.deal_id)?,
    };
    let activities = state
        .db
        .call(move |db| {
            let activities = db.list_activities(user_id, &filter)?;
            db.activities_with_relations(user_id, activities)
        })
        .await?;
    Ok(Json(activities))
}

async fn list_tasks(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.db.call(move |db| db.list_tasks(user_id)).await?;
    Ok(Json(tasks))
}

async fn create_activity(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    ApiJson(form): ApiJson<ActivityForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let activity = state
        .db
        .call(move |db| db.create_activity(user_id, &input))
        .await?;
    state.notify(
        user_id,
        &WsMessage::ActivityCreated {
            activity: activity.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(activity)))
}

async fn get_activity(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let mut with_relations = state
        .db
        .call(move |db| {
            let activity = db.get_activity(user_id, id)?;
            db.activities_with_relations(user_id, vec![activity])
        })
        .await?;
    let activity = with_relations
        .pop()
        .ok_or_else(|| ApiError::NotFound(format!("Activity {} not found", id)))?;
    Ok(Json(activity))
}

async fn update_activity(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(form): ApiJson<ActivityForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let activity = state
        .db
        .call(move |db| db.update_activity(user_id, id, &input))
        .await?;
    state.notify(
        user_id,
        &WsMessage::ActivityUpdated {
            activity: activity.clone(),
        },
    );
    Ok(Json(activity))
}

async fn complete_activity(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<CompleteActivityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let completed = req.completed;
    let activity = state
        .db
        .call(move |db| db.set_activity_completed(user_id, id, completed))
        .await?;
    state.notify(
        user_id,
        &WsMessage::ActivityUpdated {
            activity: activity.clone(),
        },
    );
    Ok(Json(activity))
}

async fn delete_activity(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_activity(user_id, id)).await?;
    state.notify(user_id, &WsMessage::ActivityDeleted { activity_id: id });
    Ok(StatusCode::NO_CONTENT)
}

// Notes

async fn list_notes(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Query(query): Query<RelatedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let related = related_from(query.contact_id, query.company_id, query.deal_id)?;
    let notes = state.db.call(move |db| db.list_notes(user_id, related)).await?;
    Ok(Json(notes))
}

async fn create_note(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    ApiJson(form): ApiJson<NoteForm>,
) -> Result<impl IntoResponse, ApiError> {
    let input = form.validate()?;
    let note = state.db.call(move |db| db.create_note(user_id, &input)).await?;
    state.notify(user_id, &WsMessage::NoteCreated { note: note.clone() });
    Ok((StatusCode::CREATED, Json(note)))
}

async fn update_note(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
    ApiJson(req): ApiJson<EditNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = NoteForm {
        content: req.content,
        ..Default::default()
    }
    .validate()?
    .content;
    let note = state
        .db
        .call(move |db| db.update_note(user_id, id, &content))
        .await?;
    state.notify(user_id, &WsMessage::NoteUpdated { note: note.clone() });
    Ok(Json(note))
}

async fn delete_note(
    State(state): State<SharedState>,
    CurrentUser { user_id }: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.call(move |db| db.delete_note(user_id, id)).await?;
    state.notify(user_id, &WsMessage::NoteDeleted { note_id: id });
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────
