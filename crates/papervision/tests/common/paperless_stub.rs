//! Minimal Paperless-NGX API served on loopback for adapter tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{json, Value};

use papervision::PaperlessClient;

pub const MARKER_FIELD: &str = "summarized";
pub const MARKER_FIELD_ID: u64 = 7;

/// Field every unmarked stub document carries, so tests can check it
/// survives tagging.
pub const OTHER_FIELD_ID: u64 = 3;

#[derive(Default)]
struct StubState {
    base_url: String,
    /// Document id to its `custom_fields` array, in creation order.
    documents: Mutex<BTreeMap<u64, Value>>,
    notes: Mutex<Vec<(u64, String)>>,
    listing_requests: AtomicUsize,
}

/// Paginates like Django REST framework: `page` and `page_size` query
/// parameters, absolute `next` links.
pub struct StubPaperless {
    state: Arc<StubState>,
}

fn initial_fields(marked: bool) -> Value {
    if marked {
        json!([{ "field": MARKER_FIELD_ID, "value": true }])
    } else {
        json!([{ "field": OTHER_FIELD_ID, "value": "invoice" }])
    }
}

fn document_json(id: u64, fields: &Value) -> Value {
    json!({ "id": id, "title": format!("Document {id}"), "custom_fields": fields })
}

impl StubPaperless {
    /// Serves `documents` given as `(id, marked)` pairs.
    pub async fn start(documents: &[(u64, bool)]) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stub server");
        let address = listener.local_addr().expect("stub server address");

        let state = Arc::new(StubState {
            base_url: format!("http://{}", address),
            documents: Mutex::new(
                documents
                    .iter()
                    .map(|(id, marked)| (*id, initial_fields(*marked)))
                    .collect(),
            ),
            ..StubState::default()
        });

        let app = Router::new()
            .route("/api/custom_fields/", get(list_custom_fields))
            .route("/api/documents/", get(list_documents))
            .route(
                "/api/documents/{id}/",
                get(get_document).patch(patch_document),
            )
            .route("/api/documents/{id}/download/", get(download))
            .route("/api/documents/{id}/notes/", post(add_note))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub server failed");
        });

        Self { state }
    }

    pub fn base_url(&self) -> &str {
        &self.state.base_url
    }

    pub fn client(&self) -> PaperlessClient {
        let token = SecretString::from("test-token".to_string());
        PaperlessClient::new(self.base_url(), &token, MARKER_FIELD)
            .expect("Failed to create Paperless client")
    }

    /// Number of `GET /api/documents/` calls served so far.
    pub fn listing_requests(&self) -> usize {
        self.state.listing_requests.load(Ordering::SeqCst)
    }

    pub fn notes(&self) -> Vec<(u64, String)> {
        self.state.notes.lock().unwrap().clone()
    }

    pub fn custom_fields(&self, id: u64) -> Option<Value> {
        self.state.documents.lock().unwrap().get(&id).cloned()
    }
}

async fn list_custom_fields() -> Json<Value> {
    Json(json!({
        "count": 1,
        "next": null,
        "previous": null,
        "results": [{ "id": MARKER_FIELD_ID, "name": MARKER_FIELD, "data_type": "boolean" }]
    }))
}

async fn list_documents(
    State(state): State<Arc<StubState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.listing_requests.fetch_add(1, Ordering::SeqCst);

    let number = |key: &str, default: usize| {
        params
            .get(key)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default)
            .max(1)
    };
    let page = number("page", 1);
    let page_size = number("page_size", 25);

    let documents = state.documents.lock().unwrap();
    let start = (page - 1) * page_size;
    let results: Vec<Value> = documents
        .iter()
        .skip(start)
        .take(page_size)
        .map(|(id, fields)| document_json(*id, fields))
        .collect();
    let next = if start + page_size < documents.len() {
        json!(format!(
            "{}/api/documents/?ordering=created&page={}&page_size={}",
            state.base_url,
            page + 1,
            page_size
        ))
    } else {
        Value::Null
    };

    Json(json!({
        "count": documents.len(),
        "next": next,
        "previous": null,
        "results": results
    }))
}

async fn get_document(
    State(state): State<Arc<StubState>>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, StatusCode> {
    state
        .documents
        .lock()
        .unwrap()
        .get(&id)
        .map(|fields| Json(document_json(id, fields)))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn patch_document(
    State(state): State<Arc<StubState>>,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut documents = state.documents.lock().unwrap();
    let fields = documents.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(updated) = body.get("custom_fields") {
        *fields = updated.clone();
    }
    Ok(Json(document_json(id, fields)))
}

async fn download(
    State(state): State<Arc<StubState>>,
    Path(id): Path<u64>,
) -> Result<Vec<u8>, StatusCode> {
    if state.documents.lock().unwrap().contains_key(&id) {
        Ok(format!("%PDF-stub-{id}").into_bytes())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn add_note(
    State(state): State<Arc<StubState>>,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !state.documents.lock().unwrap().contains_key(&id) {
        return Err(StatusCode::NOT_FOUND);
    }
    let note = body["note"].as_str().unwrap_or_default().to_string();
    state.notes.lock().unwrap().push((id, note));
    Ok(Json(json!([])))
}
