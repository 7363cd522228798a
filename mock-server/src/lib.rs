use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: Uuid,
    pub title: String,
}

#[derive(Deserialize)]
pub struct CreateItem {
    #[serde(default)]
    pub title: String,
}

#[derive(Deserialize)]
pub struct Login {
    pub username: String,
}

/// Counters and switches exposed to tests through `/test/*`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stats {
    pub refresh_calls: u64,
    pub rejected_requests: u64,
}

/// Server state behind the shared lock.
#[derive(Default)]
pub struct Store {
    /// session id -> username
    sessions: HashMap<String, String>,
    /// access token -> session id
    tokens: HashMap<String, String>,
    items: HashMap<Uuid, Item>,
    refresh_disabled: bool,
    refresh_delay: Duration,
    stats: Stats,
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/items", get(list_items).post(create_item))
        .route("/items/{id}", get(get_item).delete(delete_item))
        .route("/admin/reports", get(admin_reports))
        .route("/test/expire", post(expire_tokens))
        .route("/test/refresh", post(configure_refresh))
        .route("/test/stats", get(stats))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn problem(status: StatusCode, kind: &str, detail: &str) -> Response {
    let body = json!({
        "type": kind,
        "title": status.canonical_reason().unwrap_or("Error"),
        "status": status.as_u16(),
        "detail": detail,
    });
    (status, [(header::CONTENT_TYPE, "application/problem+json")], Json(body)).into_response()
}

fn issue_token(store: &mut Store, session: &str) -> String {
    let token = Uuid::new_v4().to_string();
    store.tokens.insert(token.clone(), session.to_string());
    token
}

/// Resolve the bearer token to its session or answer 401.
async fn authorize(db: &Db, headers: &HeaderMap) -> Result<String, Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let mut store = db.write().await;
    match token.and_then(|t| store.tokens.get(t).cloned()) {
        Some(session) => Ok(session),
        None => {
            store.stats.rejected_requests += 1;
            Err(problem(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "missing or expired access token",
            ))
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn login(State(db): State<Db>, jar: CookieJar, Json(input): Json<Login>) -> Response {
    let session = Uuid::new_v4().to_string();
    let token = {
        let mut store = db.write().await;
        store.sessions.insert(session.clone(), input.username.clone());
        issue_token(&mut store, &session)
    };
    info!(username = %input.username, "session opened");
    let cookie = Cookie::build((SESSION_COOKIE, session))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    let body = json!({"success": true, "token": token, "user": {"name": input.username}});
    (jar.add(cookie), Json(body)).into_response()
}

async fn refresh(State(db): State<Db>, jar: CookieJar) -> Response {
    let delay = {
        let mut store = db.write().await;
        store.stats.refresh_calls += 1;
        store.refresh_delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut store = db.write().await;
    let session = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let username = session.as_ref().and_then(|s| store.sessions.get(s).cloned());
    match (session, username) {
        (Some(session), Some(username)) if !store.refresh_disabled => {
            store.tokens.retain(|_, owner| owner != &session);
            let token = issue_token(&mut store, &session);
            debug!(%username, "session token renewed");
            Json(json!({"success": true, "token": token, "user": {"name": username}})).into_response()
        }
        _ => (StatusCode::UNAUTHORIZED, Json(json!({"success": false}))).into_response(),
    }
}

async fn list_items(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Value>, Response> {
    authorize(&db, &headers).await?;
    let store = db.read().await;
    let items: Vec<Item> = store.items.values().cloned().collect();
    Ok(Json(json!({ "data": items })))
}

async fn create_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<CreateItem>,
) -> Result<(StatusCode, Json<Value>), Response> {
    authorize(&db, &headers).await?;
    if input.title.trim().is_empty() {
        return Err(problem(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "title must not be empty",
        ));
    }
    let item = Item {
        id: Uuid::new_v4(),
        title: input.title,
    };
    db.write().await.items.insert(item.id, item.clone());
    Ok((StatusCode::CREATED, Json(json!({ "data": item }))))
}

async fn get_item(State(db): State<Db>, headers: HeaderMap, Path(id): Path<Uuid>) -> Result<Json<Value>, Response> {
    authorize(&db, &headers).await?;
    let store = db.read().await;
    match store.items.get(&id) {
        Some(item) => Ok(Json(json!({ "data": item }))),
        None => Err(problem(StatusCode::NOT_FOUND, "not_found", "no such item")),
    }
}

async fn delete_item(State(db): State<Db>, headers: HeaderMap, Path(id): Path<Uuid>) -> Result<StatusCode, Response> {
    authorize(&db, &headers).await?;
    let mut store = db.write().await;
    match store.items.remove(&id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(problem(StatusCode::NOT_FOUND, "not_found", "no such item")),
    }
}

/// Authenticated users are never admins here.
async fn admin_reports(State(db): State<Db>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&db, &headers).await {
        return rejection;
    }
    problem(StatusCode::FORBIDDEN, "forbidden", "admin role required")
}

/// Revoke every access token; sessions stay valid so renewal works.
async fn expire_tokens(State(db): State<Db>) -> StatusCode {
    db.write().await.tokens.clear();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct RefreshSettings {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub delay_ms: u64,
}

async fn configure_refresh(State(db): State<Db>, Json(settings): Json<RefreshSettings>) -> StatusCode {
    let mut store = db.write().await;
    store.refresh_disabled = settings.disabled;
    store.refresh_delay = Duration::from_millis(settings.delay_ms);
    StatusCode::NO_CONTENT
}

async fn stats(State(db): State<Db>) -> Json<Stats> {
    Json(db.read().await.stats.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_serializes_to_json() {
        let item = Item {
            id: Uuid::nil(),
            title: "Test".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["title"], "Test");
    }

    #[test]
    fn create_item_defaults_title_to_empty() {
        let input: CreateItem = serde_json::from_str(r#"{}"#).unwrap();
        assert!(input.title.is_empty());
    }

    #[test]
    fn refresh_settings_are_optional() {
        let settings: RefreshSettings = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!settings.disabled);
        assert_eq!(settings.delay_ms, 0);
    }

    #[test]
    fn issued_tokens_belong_to_their_session() {
        let mut store = Store::default();
        let token = issue_token(&mut store, "s1");
        assert_eq!(store.tokens.get(&token).map(String::as_str), Some("s1"));
    }
}
