//! HTTP injection API used by test harnesses to register canned responses.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use pgmock_core::{fingerprint, ColumnDescriptor, PgMockError, QueryResponse, Row};
use pgmock_store::ResponseStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct LoaderState {
    pub store: Arc<ResponseStore>,
    pub metrics: Option<PrometheusHandle>,
}

/// `{"cols": ["id:int4"], "rows": [[1]]}`
#[derive(Debug, Clone, Deserialize)]
pub struct InjectedResponse {
    pub cols: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InjectedQuery {
    pub sql: String,
    #[serde(flatten)]
    pub response: InjectedResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registered {
    pub fingerprint: String,
}

impl InjectedResponse {
    pub fn into_query_response(self) -> Result<QueryResponse, PgMockError> {
        let columns = self
            .cols
            .iter()
            .map(|col| ColumnDescriptor::parse(col))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = self
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(cell).collect::<Result<Row, _>>())
            .collect::<Result<Vec<_>, _>>()?;
        let response = QueryResponse::new(columns, rows);
        response.validate()?;
        Ok(response)
    }
}

/// Text-format value of one JSON cell.
fn cell(value: Value) -> Result<Option<Vec<u8>>, PgMockError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.into_bytes())),
        Value::Number(number) => Ok(Some(number.to_string().into_bytes())),
        Value::Bool(flag) => Ok(Some(if flag { b"t".to_vec() } else { b"f".to_vec() })),
        other => Err(PgMockError::Validation(format!(
            "cell must be a scalar, got {other}"
        ))),
    }
}

pub fn router(state: LoaderState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(render_metrics))
        .route("/queries", post(inject_query))
        .route("/:fingerprint", post(inject))
        .with_state(state)
}

pub(crate) async fn inject(
    State(state): State<LoaderState>,
    Path(hash): Path<String>,
    Json(payload): Json<InjectedResponse>,
) -> Result<StatusCode, LoaderError> {
    let response = payload.into_query_response()?;
    let rows = response.rows.len();
    state.store.register(&hash, response)?;
    info!(fingerprint = %hash, rows, "injected response");
    Ok(StatusCode::OK)
}

pub(crate) async fn inject_query(
    State(state): State<LoaderState>,
    Json(payload): Json<InjectedQuery>,
) -> Result<Json<Registered>, LoaderError> {
    let hash = fingerprint(&payload.sql);
    let response = payload.response.into_query_response()?;
    let rows = response.rows.len();
    state.store.register(&hash, response)?;
    info!(fingerprint = %hash, sql = %payload.sql, rows, "injected response");
    Ok(Json(Registered { fingerprint: hash }))
}

async fn render_metrics(State(state): State<LoaderState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug)]
pub struct LoaderError(pub PgMockError);

impl From<PgMockError> for LoaderError {
    fn from(err: PgMockError) -> Self {
        Self(err)
    }
}

impl IntoResponse for LoaderError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            PgMockError::Validation(_) => StatusCode::BAD_REQUEST,
            PgMockError::Lookup(_) => StatusCode::NOT_FOUND,
            PgMockError::Storage(_) | PgMockError::Protocol(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}
