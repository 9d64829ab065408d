//! Operator surface: login, family CRUD, access links, summaries, plus the
//! client token entry point.

use crate::error::ApiError;
use crate::session::CLIENT_SESSION_COOKIE;
use crate::AppState;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Local, NaiveDate, NaiveTime, TimeZone, Timelike};
use nestlog_store::{password, AccessLink, Family, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

const ADMIN_SESSION_COOKIE: &str = "admin_session";
const ADMIN_SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Admin id resolved by the auth middleware, stashed in request extensions.
#[derive(Clone)]
struct AdminId(String);

pub(crate) fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/admin/session", get(session_info))
        .route("/api/admin/families", get(list_families).post(create_family))
        .route(
            "/api/admin/families/:id",
            get(get_family).patch(update_family),
        )
        .route(
            "/api/admin/families/:id/links",
            get(list_links).post(create_link),
        )
        .route("/api/admin/families/:id/summary", get(family_summary))
        .route("/api/admin/links/:token", delete(delete_link))
        .route_layer(middleware::from_fn_with_state(state, require_admin));

    Router::new()
        .route("/api/admin/login", post(login))
        .route("/api/admin/logout", post(logout))
        .route("/t/:token", get(client_token))
        .merge(protected)
}

/// Rejects requests without a valid operator session; on success the admin
/// id rides along in the request extensions.
async fn require_admin(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(cookie) = jar.get(ADMIN_SESSION_COOKIE) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let token = cookie.value().to_string();
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || store.validate_admin_session(&token)).await {
        Ok(Ok(admin_id)) => {
            request.extensions_mut().insert(AdminId(admin_id));
            next.run(request).await
        }
        Ok(Err(StoreError::NotFound)) => StatusCode::UNAUTHORIZED.into_response(),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "admin session lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "store task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// --- Operator sessions -----------------------------------------------------

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    let store = Arc::clone(&state.store);
    let token = tokio::task::spawn_blocking(move || {
        let admin = store.admin_by_username(&req.username)?;
        if !password::verify_password(&req.password, &admin.password_hash)? {
            return Err(StoreError::NotFound);
        }
        store.create_admin_session(&admin.id, ADMIN_SESSION_TTL_MS)
    })
    .await?
    .map_err(|err| match err {
        StoreError::NotFound => ApiError::Unauthorized,
        other => other.into(),
    })?;

    let cookie = Cookie::build((ADMIN_SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::days(1))
        .build();
    Ok((jar.add(cookie), Json(json!({"ok": true}))))
}

async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    if let Some(cookie) = jar.get(ADMIN_SESSION_COOKIE) {
        let token = cookie.value().to_string();
        let store = Arc::clone(&state.store);
        tokio::task::spawn_blocking(move || store.delete_admin_session(&token)).await??;
    }

    let removal = Cookie::build((ADMIN_SESSION_COOKIE, "")).path("/").build();
    Ok((jar.remove(removal), Json(json!({"ok": true}))))
}

async fn session_info(
    Extension(AdminId(admin_id)): Extension<AdminId>,
) -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "admin_id": admin_id}))
}

// --- Families --------------------------------------------------------------

#[derive(Serialize)]
struct FamilyResponse {
    id: String,
    name: String,
    notes: String,
    created_at: i64,
    archived: bool,
    seq: i64,
}

impl From<Family> for FamilyResponse {
    fn from(f: Family) -> Self {
        Self {
            id: f.id,
            name: f.name,
            notes: f.notes,
            created_at: f.created_at,
            archived: f.archived,
            seq: f.seq,
        }
    }
}

#[derive(Serialize)]
struct FamilyWithStats {
    #[serde(flatten)]
    family: FamilyResponse,
    entry_count: i64,
    latest_activity: i64,
    link_count: i64,
}

#[derive(Deserialize)]
struct ListFamiliesQuery {
    #[serde(default)]
    archived: Option<String>,
}

async fn list_families(
    State(state): State<AppState>,
    Query(query): Query<ListFamiliesQuery>,
) -> Result<Json<Vec<FamilyWithStats>>, ApiError> {
    let include_archived = query.archived.as_deref() == Some("true");
    let store = Arc::clone(&state.store);
    let result = tokio::task::spawn_blocking(move || {
        let families = store.list_families(include_archived)?;
        families
            .into_iter()
            .map(|family| {
                let stats = store.family_stats(&family.id).unwrap_or_default();
                Ok(FamilyWithStats {
                    family: family.into(),
                    entry_count: stats.entry_count,
                    latest_activity: stats.latest_activity,
                    link_count: stats.link_count,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()
    })
    .await??;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct CreateFamilyRequest {
    name: String,
    #[serde(default)]
    notes: String,
}

async fn create_family(
    State(state): State<AppState>,
    Json(req): Json<CreateFamilyRequest>,
) -> Result<(StatusCode, Json<FamilyResponse>), ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::BadRequest("name required".into()));
    }
    let store = Arc::clone(&state.store);
    let family =
        tokio::task::spawn_blocking(move || store.create_family(&req.name, &req.notes)).await??;
    Ok((StatusCode::CREATED, Json(family.into())))
}

async fn get_family(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FamilyResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    let family = tokio::task::spawn_blocking(move || store.get_family(&id)).await??;
    Ok(Json(family.into()))
}

#[derive(Deserialize)]
struct UpdateFamilyRequest {
    name: Option<String>,
    notes: Option<String>,
    archived: Option<bool>,
}

async fn update_family(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateFamilyRequest>,
) -> Result<Json<FamilyResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    let family = tokio::task::spawn_blocking(move || {
        store.update_family(&id, req.name.as_deref(), req.notes.as_deref(), req.archived)?;
        store.get_family(&id)
    })
    .await??;
    Ok(Json(family.into()))
}

// --- Access links ----------------------------------------------------------

#[derive(Serialize)]
struct AccessLinkResponse {
    token: String,
    family_id: String,
    label: String,
    expires_at: Option<i64>,
    created_at: i64,
}

impl From<AccessLink> for AccessLinkResponse {
    fn from(l: AccessLink) -> Self {
        Self {
            token: l.token,
            family_id: l.family_id,
            label: l.label,
            expires_at: l.expires_at,
            created_at: l.created_at,
        }
    }
}

async fn list_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AccessLinkResponse>>, ApiError> {
    let store = Arc::clone(&state.store);
    let links = tokio::task::spawn_blocking(move || store.list_access_links(&id)).await??;
    Ok(Json(links.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize)]
struct CreateLinkRequest {
    #[serde(default)]
    label: String,
    expires_at: Option<i64>,
}

async fn create_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<AccessLinkResponse>), ApiError> {
    let store = Arc::clone(&state.store);
    let link = tokio::task::spawn_blocking(move || {
        // Issuing a link for a missing family should 404, not mint a token.
        store.get_family(&id)?;
        store.create_access_link(&id, &req.label, req.expires_at)
    })
    .await??;
    Ok((StatusCode::CREATED, Json(link.into())))
}

async fn delete_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || store.delete_access_link(&token)).await??;
    Ok(StatusCode::NO_CONTENT)
}

// --- Client token entry point ----------------------------------------------

/// Validates an access link, plants the client session cookie and redirects
/// into the app with the family id as a query parameter.
async fn client_token(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(token): Path<String>,
) -> Result<(CookieJar, Redirect), ApiError> {
    let store = Arc::clone(&state.store);
    let link = tokio::task::spawn_blocking(move || store.validate_access_link(&token))
        .await?
        .map_err(|err| match err {
            StoreError::NotFound => ApiError::Unauthorized,
            other => other.into(),
        })?;

    let cookie = Cookie::build((CLIENT_SESSION_COOKIE, link.token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(30))
        .build();
    let redirect = Redirect::to(&format!("/?family={}", link.family_id));
    Ok((jar.add(cookie), redirect))
}

// --- Daily summary ---------------------------------------------------------

#[derive(Serialize)]
struct EntrySummary {
    time: String,
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

#[derive(Serialize)]
struct HourlySummary {
    hour: u32,
    entries: Vec<EntrySummary>,
}

#[derive(Serialize)]
struct DailySummary {
    date: String,
    hours: Vec<HourlySummary>,
    totals: BTreeMap<String, i64>,
}

#[derive(Deserialize)]
struct SummaryQuery {
    date: Option<String>,
}

async fn family_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<DailySummary>, ApiError> {
    let date = match query.date.as_deref() {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest("invalid date format (use YYYY-MM-DD)".into()))?,
        None => Local::now().date_naive(),
    };

    let start = Local
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .ok_or(ApiError::Internal)?;
    let start_ms = start.timestamp_millis();
    let end_ms = (start + chrono::Duration::hours(24)).timestamp_millis();

    let store = Arc::clone(&state.store);
    let family_id = id.clone();
    let entries = tokio::task::spawn_blocking(move || {
        store.get_family(&family_id)?;
        store.entries_in_range(&family_id, start_ms, end_ms)
    })
    .await??;

    let mut hourly: BTreeMap<u32, Vec<EntrySummary>> = BTreeMap::new();
    let mut totals: BTreeMap<String, i64> = BTreeMap::new();
    for entry in entries {
        let Some(at) = Local.timestamp_millis_opt(entry.ts).single() else {
            continue;
        };
        hourly.entry(at.hour()).or_default().push(EntrySummary {
            time: at.format("%H:%M").to_string(),
            kind: entry.kind.clone(),
            value: entry.value,
        });
        *totals.entry(entry.kind).or_default() += 1;
    }

    Ok(Json(DailySummary {
        date: date.format("%Y-%m-%d").to_string(),
        hours: hourly
            .into_iter()
            .map(|(hour, entries)| HourlySummary { hour, entries })
            .collect(),
        totals,
    }))
}
