//! In-memory polls API for exercising the client end to end.
//!
//! Questions and choices behave like a small Django REST Framework service:
//! question listings are paginated with absolute `next` links, choice
//! listings are bare arrays, failures carry `{"detail": ...}` or per-field
//! error bodies, and every write needs basic or token credentials.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};

#[derive(Debug, Clone)]
pub struct Settings {
    pub page_size: usize,
    pub username: String,
    pub password: String,
    pub token: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_size: 10,
            username: "admin".to_string(),
            password: "password123".to_string(),
            token: "s3cr3t-token".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: u64,
    pub question_text: String,
    pub pub_date: DateTime<Utc>,
    /// Ids of the question's choices, read-only.
    pub choices: Vec<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    pub id: u64,
    pub question: u64,
    pub choice_text: String,
    pub votes: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone)]
struct QuestionRow {
    question_text: String,
    pub_date: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Store {
    questions: BTreeMap<u64, QuestionRow>,
    choices: BTreeMap<u64, Choice>,
    last_question: u64,
    last_choice: u64,
}

impl Store {
    fn seeded() -> Self {
        let mut store = Self::default();
        let pizza = store.insert_question(
            "Do you like pizza?".to_string(),
            DateTime::<Utc>::from_timestamp(1_473_605_820, 0).unwrap_or_default(),
        );
        let topping = store.insert_question(
            "What is your favourite topping?".to_string(),
            DateTime::<Utc>::from_timestamp(1_473_672_600, 0).unwrap_or_default(),
        );
        store.insert_choice(pizza, "Yes".to_string(), 3);
        store.insert_choice(pizza, "No".to_string(), 1);
        store.insert_choice(topping, "Mushrooms".to_string(), 0);
        store.insert_choice(topping, "Pepperoni".to_string(), 2);
        store
    }

    fn insert_question(&mut self, question_text: String, pub_date: DateTime<Utc>) -> u64 {
        self.last_question += 1;
        self.questions.insert(
            self.last_question,
            QuestionRow {
                question_text,
                pub_date,
            },
        );
        self.last_question
    }

    fn insert_choice(&mut self, question: u64, choice_text: String, votes: i64) -> u64 {
        self.last_choice += 1;
        let id = self.last_choice;
        self.choices.insert(
            id,
            Choice {
                id,
                question,
                choice_text,
                votes,
            },
        );
        id
    }

    fn question(&self, id: u64) -> Option<Question> {
        let row = self.questions.get(&id)?;
        Some(Question {
            id,
            question_text: row.question_text.clone(),
            pub_date: row.pub_date,
            choices: self
                .choices
                .values()
                .filter(|c| c.question == id)
                .map(|c| c.id)
                .collect(),
        })
    }
}

#[derive(Clone)]
struct AppState {
    store: Arc<RwLock<Store>>,
    settings: Arc<Settings>,
}

/// Error responses in the shapes the client has to map.
#[derive(Debug)]
pub enum Failure {
    NotFound,
    InvalidPage,
    /// Field name to messages.
    Invalid(Map<String, Value>),
    Malformed(String),
    Unauthorized(&'static str),
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        match self {
            Failure::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found."}))).into_response()
            }
            Failure::InvalidPage => {
                (StatusCode::NOT_FOUND, Json(json!({"detail": "Invalid page."}))).into_response()
            }
            Failure::Invalid(errors) => (StatusCode::BAD_REQUEST, Json(Value::Object(errors))).into_response(),
            Failure::Malformed(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({"detail": detail}))).into_response()
            }
            Failure::Unauthorized(detail) => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"api\"")],
                Json(json!({"detail": detail})),
            )
                .into_response(),
        }
    }
}

pub fn app() -> Router {
    app_with(Settings::default())
}

/// Router over a freshly seeded store: two questions with two choices each.
pub fn app_with(settings: Settings) -> Router {
    let state = AppState {
        store: Arc::new(RwLock::new(Store::seeded())),
        settings: Arc::new(settings),
    };
    let question = get(get_question).put(update_question).delete(delete_question);
    let choice = get(get_choice).put(update_choice).delete(delete_choice);
    Router::new()
        .route("/questions/", get(list_questions).post(create_question))
        .route("/questions/{id}", question.clone())
        .route("/questions/{id}/", question)
        .route("/choices/", get(list_choices).post(create_choice))
        .route("/choices/{id}", choice.clone())
        .route("/choices/{id}/", choice)
        .layer(middleware::from_fn_with_state(state.clone(), require_credentials))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, Settings::default()).await
}

pub async fn run_with(listener: TcpListener, settings: Settings) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(settings)).await
}

async fn require_credentials(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.method().is_safe() {
        return next.run(request).await;
    }
    match authorize(&state.settings, request.headers()) {
        Ok(()) => next.run(request).await,
        Err(failure) => {
            tracing::debug!(method = %request.method(), uri = %request.uri(), "rejected write");
            failure.into_response()
        }
    }
}

fn authorize(settings: &Settings, headers: &HeaderMap) -> Result<(), Failure> {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Err(Failure::Unauthorized("Authentication credentials were not provided."));
    };
    let valid = match value.split_once(' ') {
        Some(("Basic", encoded)) => STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .is_some_and(|pair| pair == format!("{}:{}", settings.username, settings.password)),
        Some(("Token", token)) => token.trim() == settings.token,
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Failure::Unauthorized("Invalid credentials."))
    }
}

// --- questions ---

async fn list_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Page<Question>>, Failure> {
    let text = param(&params, "question_text");
    let store = state.store.read().await;
    let matching: Vec<Question> = store
        .questions
        .keys()
        .filter_map(|id| store.question(*id))
        .filter(|q| text.map_or(true, |t| q.question_text == t))
        .collect();
    paginate(matching, &params, &headers, "/questions/", state.settings.page_size).map(Json)
}

async fn get_question(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<Question>, Failure> {
    let store = state.store.read().await;
    store.question(id).map(Json).ok_or(Failure::NotFound)
}

async fn create_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Question>), Failure> {
    let (question_text, pub_date) = validate_question(&parse_payload(&headers, &body)?)?;
    let mut store = state.store.write().await;
    let id = store.insert_question(question_text, pub_date.unwrap_or_else(Utc::now));
    tracing::info!(id, "question created");
    let question = store.question(id).ok_or(Failure::NotFound)?;
    Ok((StatusCode::CREATED, Json(question)))
}

async fn update_question(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Question>, Failure> {
    let (question_text, pub_date) = validate_question(&parse_payload(&headers, &body)?)?;
    let mut store = state.store.write().await;
    let row = store.questions.get_mut(&id).ok_or(Failure::NotFound)?;
    row.question_text = question_text;
    if let Some(pub_date) = pub_date {
        row.pub_date = pub_date;
    }
    tracing::info!(id, "question updated");
    store.question(id).map(Json).ok_or(Failure::NotFound)
}

async fn delete_question(State(state): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode, Failure> {
    let mut store = state.store.write().await;
    store.questions.remove(&id).ok_or(Failure::NotFound)?;
    store.choices.retain(|_, c| c.question != id);
    tracing::info!(id, "question deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- choices ---

async fn list_choices(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Choice>>, Failure> {
    let question = match param(&params, "question") {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| invalid("question", "A valid integer is required."))?,
        ),
        None => None,
    };
    let store = state.store.read().await;
    Ok(Json(
        store
            .choices
            .values()
            .filter(|c| question.map_or(true, |q| c.question == q))
            .cloned()
            .collect(),
    ))
}

async fn get_choice(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<Choice>, Failure> {
    let store = state.store.read().await;
    store.choices.get(&id).cloned().map(Json).ok_or(Failure::NotFound)
}

async fn create_choice(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Choice>), Failure> {
    let payload = parse_payload(&headers, &body)?;
    let mut store = state.store.write().await;
    let (question, choice_text, votes) = validate_choice(&payload, &store)?;
    let id = store.insert_choice(question, choice_text, votes);
    tracing::info!(id, question, "choice created");
    let choice = store.choices.get(&id).cloned().ok_or(Failure::NotFound)?;
    Ok((StatusCode::CREATED, Json(choice)))
}

async fn update_choice(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Choice>, Failure> {
    let payload = parse_payload(&headers, &body)?;
    let mut store = state.store.write().await;
    if !store.choices.contains_key(&id) {
        return Err(Failure::NotFound);
    }
    let (question, choice_text, votes) = validate_choice(&payload, &store)?;
    let choice = store.choices.get_mut(&id).ok_or(Failure::NotFound)?;
    choice.question = question;
    choice.choice_text = choice_text;
    choice.votes = votes;
    tracing::info!(id, "choice updated");
    Ok(Json(choice.clone()))
}

async fn delete_choice(State(state): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode, Failure> {
    let mut store = state.store.write().await;
    store.choices.remove(&id).ok_or(Failure::NotFound)?;
    tracing::info!(id, "choice deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- helpers ---

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .rev()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn paginate<T>(
    items: Vec<T>,
    params: &[(String, String)],
    headers: &HeaderMap,
    path: &str,
    page_size: usize,
) -> Result<Page<T>, Failure> {
    let page_size = page_size.max(1);
    let page = match param(params, "page") {
        Some(raw) => raw.parse::<usize>().map_err(|_| Failure::InvalidPage)?,
        None => 1,
    };
    let count = items.len();
    let start = page.checked_sub(1).ok_or(Failure::InvalidPage)? * page_size;
    if page > 1 && start >= count {
        return Err(Failure::InvalidPage);
    }
    let end = (start + page_size).min(count);
    let link = |page: usize| page_link(headers, path, params, page);
    Ok(Page {
        count,
        next: (end < count).then(|| link(page + 1)),
        previous: (page > 1).then(|| link(page - 1)),
        results: items.into_iter().skip(start).take(page_size).collect(),
    })
}

/// Absolute URL of `page`, keeping the other query parameters.
fn page_link(headers: &HeaderMap, path: &str, params: &[(String, String)], page: usize) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().filter(|(k, _)| k != "page"))
        .append_pair("page", &page.to_string())
        .finish();
    format!("http://{host}{path}?{query}")
}

/// Request body as a field map, from JSON or form encoding.
fn parse_payload(headers: &HeaderMap, body: &[u8]) -> Result<Map<String, Value>, Failure> {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        return Ok(url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect());
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Failure::Malformed("Expected a JSON object.".to_string())),
        Err(e) => Err(Failure::Malformed(format!("JSON parse error - {e}"))),
    }
}

fn invalid(field: &str, message: &str) -> Failure {
    let mut errors = Map::new();
    errors.insert(field.to_string(), json!([message]));
    Failure::Invalid(errors)
}

fn text(payload: &Map<String, Value>, name: &str, errors: &mut Map<String, Value>) -> Option<String> {
    match payload.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            errors.insert(name.to_string(), json!(["This field may not be blank."]));
            None
        }
        None | Some(Value::Null) => {
            errors.insert(name.to_string(), json!(["This field is required."]));
            None
        }
        Some(_) => {
            errors.insert(name.to_string(), json!(["Not a valid string."]));
            None
        }
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => map.get("id").and_then(integer),
        _ => None,
    }
}

fn validate_question(payload: &Map<String, Value>) -> Result<(String, Option<DateTime<Utc>>), Failure> {
    let mut errors = Map::new();
    let question_text = text(payload, "question_text", &mut errors);
    let pub_date = match payload.get("pub_date") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => {
                errors.insert(
                    "pub_date".to_string(),
                    json!(["Datetime has wrong format."]),
                );
                None
            }
        },
        Some(_) => {
            errors.insert("pub_date".to_string(), json!(["Datetime has wrong format."]));
            None
        }
    };
    match question_text {
        Some(question_text) if errors.is_empty() => Ok((question_text, pub_date)),
        _ => Err(Failure::Invalid(errors)),
    }
}

fn validate_choice(payload: &Map<String, Value>, store: &Store) -> Result<(u64, String, i64), Failure> {
    let mut errors = Map::new();
    let question = match payload.get("question") {
        None | Some(Value::Null) => {
            errors.insert("question".to_string(), json!(["This field is required."]));
            None
        }
        Some(value) => match integer(value).and_then(|id| u64::try_from(id).ok()) {
            Some(id) if store.questions.contains_key(&id) => Some(id),
            _ => {
                errors.insert(
                    "question".to_string(),
                    json!([format!("Invalid pk \"{value}\" - object does not exist.")]),
                );
                None
            }
        },
    };
    let choice_text = text(payload, "choice_text", &mut errors);
    let votes = match payload.get("votes") {
        None | Some(Value::Null) => 0,
        Some(value) => integer(value).unwrap_or_else(|| {
            errors.insert("votes".to_string(), json!(["A valid integer is required."]));
            0
        }),
    };
    match (question, choice_text) {
        (Some(question), Some(choice_text)) if errors.is_empty() => Ok((question, choice_text, votes)),
        _ => Err(Failure::Invalid(errors)),
    }
}
