use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use thread_kernel_api::{CancellationToken, ThreadKernelApi, API_CONTRACT_VERSION};
use thread_kernel_core::{
    AccountId, ContextResult, PolicyReport, StatusEdit, StatusId, StatusSource, StatusView,
    ThreadError, Visibility,
};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const REQUESTER_HEADER: &str = "x-requester-account-id";

#[derive(Debug, Clone)]
struct ServiceState {
    api: ThreadKernelApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "thread-kernel-service")]
#[command(about = "Local HTTP service for Thread Kernel")]
struct Args {
    #[arg(long, default_value = "./thread_kernel.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4010")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<ThreadError> for ServiceError {
    fn from(err: ThreadError) -> Self {
        let status = match err {
            ThreadError::NotFound(_) => StatusCode::NOT_FOUND,
            ThreadError::Forbidden(_) => StatusCode::FORBIDDEN,
            ThreadError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ThreadError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(kind = err.kind(), error = %err, "request failed");
        } else {
            tracing::debug!(kind = err.kind(), error = %err, "request rejected");
        }
        Self::new(status, err.to_string())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/statuses/:status_id", get(status_get))
        .route("/v1/statuses/:status_id/context", get(context_get))
        .route("/v1/statuses/:status_id/source", get(status_source))
        .route("/v1/statuses/:status_id/history", get(status_history))
        .route("/v1/web/statuses/:status_id", get(web_status_get))
        .route("/v1/web/statuses/:status_id/context", get(web_context_get))
        .route("/v1/interaction-policies/default/:visibility", get(default_policy))
        .with_state(state)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let state = ServiceState { api: ThreadKernelApi::new(args.db) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "thread kernel service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn requester(headers: &HeaderMap) -> Result<Option<AccountId>, ServiceError> {
    let Some(value) = headers.get(REQUESTER_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ServiceError::bad_request(format!("{REQUESTER_HEADER} must be ASCII")))?
        .trim();
    if value.is_empty() {
        return Err(ServiceError::bad_request(format!("{REQUESTER_HEADER} must be non-empty")));
    }
    Ok(Some(AccountId::from(value)))
}

// The store is synchronous; keep it off the async workers. axum drops the
// handler future when the client goes away, and the drop guard then cancels
// the token handed to the blocking call.
async fn run_blocking<T, F>(call: F) -> Result<Json<ServiceEnvelope<T>>, ServiceError>
where
    T: Serialize + Send + 'static,
    F: FnOnce(CancellationToken) -> Result<T, ThreadError> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let joined = tokio::task::spawn_blocking(move || call(cancel)).await;
    drop(guard.disarm());

    let data = joined.map_err(|err| {
        ServiceError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("blocking task failed: {err}"))
    })??;
    Ok(Json(envelope(data)))
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn status_get(
    State(state): State<ServiceState>,
    Path(status_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ServiceEnvelope<StatusView>>, ServiceError> {
    let requester = requester(&headers)?;
    run_blocking(move |_| {
        state.api.get_status(requester.as_ref(), &StatusId::from(status_id.as_str()))
    })
    .await
}

async fn context_get(
    State(state): State<ServiceState>,
    Path(status_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ServiceEnvelope<ContextResult>>, ServiceError> {
    let requester = requester(&headers)?;
    run_blocking(move |cancel| {
        state.api.get_context(requester.as_ref(), &StatusId::from(status_id.as_str()), &cancel)
    })
    .await
}

async fn status_source(
    State(state): State<ServiceState>,
    Path(status_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ServiceEnvelope<StatusSource>>, ServiceError> {
    let requester = requester(&headers)?.ok_or_else(|| {
        ServiceError::bad_request(format!("{REQUESTER_HEADER} is required for status source"))
    })?;
    run_blocking(move |_| {
        state.api.get_status_source(&requester, &StatusId::from(status_id.as_str()))
    })
    .await
}

async fn status_history(
    State(state): State<ServiceState>,
    Path(status_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ServiceEnvelope<Vec<StatusEdit>>>, ServiceError> {
    let requester = requester(&headers)?;
    run_blocking(move |_| {
        state.api.get_status_history(requester.as_ref(), &StatusId::from(status_id.as_str()))
    })
    .await
}

async fn web_status_get(
    State(state): State<ServiceState>,
    Path(status_id): Path<String>,
) -> Result<Json<ServiceEnvelope<StatusView>>, ServiceError> {
    run_blocking(move |_| state.api.get_web_status(&StatusId::from(status_id.as_str()))).await
}

async fn web_context_get(
    State(state): State<ServiceState>,
    Path(status_id): Path<String>,
) -> Result<Json<ServiceEnvelope<ContextResult>>, ServiceError> {
    run_blocking(move |cancel| {
        state.api.get_web_context(&StatusId::from(status_id.as_str()), &cancel)
    })
    .await
}

async fn default_policy(
    State(state): State<ServiceState>,
    Path(visibility): Path<String>,
) -> Result<Json<ServiceEnvelope<PolicyReport>>, ServiceError> {
    let visibility = Visibility::parse(&visibility)
        .ok_or_else(|| ServiceError::bad_request(format!("unknown visibility: {visibility}")))?;
    Ok(Json(envelope(state.api.default_policy(visibility))))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use thread_kernel_api::{AddAccountRequest, AddStatusRequest};
    use thread_kernel_core::Block;
    use tower::ServiceExt;

    const WAIT: Duration = Duration::from_secs(10);

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("threadkernel-service-{}.sqlite3", ulid::Ulid::new()))
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn get(router: Router, uri: &str, requester: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri).method("GET");
        if let Some(requester) = requester {
            builder = builder.header(REQUESTER_HEADER, requester);
        }
        let request = builder
            .body(axum::body::Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        match router.oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    fn data_ids(value: &serde_json::Value, side: &str) -> Vec<String> {
        value
            .get("data")
            .and_then(|data| data.get(side))
            .and_then(serde_json::Value::as_array)
            .unwrap_or_else(|| panic!("missing data.{side} in response: {value}"))
            .iter()
            .filter_map(|item| item.get("id").and_then(serde_json::Value::as_str))
            .map(str::to_string)
            .collect()
    }

    fn seeded_api(db_path: PathBuf) -> ThreadKernelApi {
        let api = ThreadKernelApi::new(db_path);
        for username in ["alice", "bob", "carol"] {
            if let Err(err) = api.add_account(AddAccountRequest {
                id: Some(AccountId::from(username)),
                username: username.to_string(),
            }) {
                panic!("failed to seed account {username}: {err:#}");
            }
        }
        let posts = [
            ("01", "alice", None, Visibility::Public),
            ("02", "bob", Some("01"), Visibility::Public),
            ("03", "alice", Some("01"), Visibility::Public),
            ("04", "carol", Some("02"), Visibility::FollowersOnly),
        ];
        for (id, author, parent, visibility) in posts {
            if let Err(err) = api.add_status(AddStatusRequest {
                id: Some(StatusId::from(id)),
                account_id: AccountId::from(author),
                in_reply_to_id: parent.map(StatusId::from),
                boost_of_id: None,
                visibility,
                content: format!("post {id}"),
                spoiler_text: String::new(),
                sensitive: false,
                mentions: Vec::new(),
                created_at: None,
                interaction_policy: None,
            }) {
                panic!("failed to seed status {id}: {err:#}");
            }
        }
        api
    }

    fn cleanup(db_path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", db_path.display(), suffix));
        }
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let state = ServiceState { api: ThreadKernelApi::new(unique_temp_db_path()) };
        let response = get(app(state), "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(
            value.get("api_contract_version").and_then(serde_json::Value::as_str),
            Some(API_CONTRACT_VERSION)
        );
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let state = ServiceState { api: ThreadKernelApi::new(unique_temp_db_path()) };
        let response = get(app(state), "/v1/openapi", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/statuses/{status_id}/context"));
        assert!(body.contains("/v1/interaction-policies/default/{visibility}"));
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn context_endpoints_return_ordered_threads() {
        let db_path = unique_temp_db_path();
        let router = app(ServiceState { api: seeded_api(db_path.clone()) });

        let response = get(router.clone(), "/v1/web/statuses/01/context", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert!(data_ids(&value, "ancestors").is_empty());
        assert_eq!(data_ids(&value, "descendants"), vec!["03", "02"]);

        let response = get(router, "/v1/statuses/04/context", Some("carol")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(data_ids(&value, "ancestors"), vec!["01", "02"]);

        cleanup(&db_path);
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn thread_errors_map_to_status_codes() {
        let db_path = unique_temp_db_path();
        let api = seeded_api(db_path.clone());
        if let Err(err) = api.add_block(Block {
            account_id: AccountId::from("alice"),
            target_account_id: AccountId::from("bob"),
        }) {
            panic!("failed to seed block: {err:#}");
        }
        let router = app(ServiceState { api });

        let missing = get(router.clone(), "/v1/statuses/99", None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let anonymous = get(router.clone(), "/v1/web/statuses/04/context", None).await;
        assert_eq!(anonymous.status(), StatusCode::FORBIDDEN);

        let blocked = get(router.clone(), "/v1/statuses/01/context", Some("bob")).await;
        assert_eq!(blocked.status(), StatusCode::FORBIDDEN);
        let value = response_json(blocked).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert!(value.get("error").and_then(serde_json::Value::as_str).is_some());

        let blocked_source = get(router.clone(), "/v1/statuses/01/source", Some("bob")).await;
        assert_eq!(blocked_source.status(), StatusCode::FORBIDDEN);

        let no_requester = get(router, "/v1/statuses/01/source", None).await;
        assert_eq!(no_requester.status(), StatusCode::BAD_REQUEST);

        cleanup(&db_path);
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn source_and_history_endpoints_return_envelopes() {
        let db_path = unique_temp_db_path();
        let router = app(ServiceState { api: seeded_api(db_path.clone()) });

        let source = get(router.clone(), "/v1/statuses/03/source", Some("alice")).await;
        assert_eq!(source.status(), StatusCode::OK);
        let value = response_json(source).await;
        assert_eq!(
            value.get("data").and_then(|data| data.get("text")).and_then(serde_json::Value::as_str),
            Some("post 03")
        );

        let other = get(router.clone(), "/v1/statuses/03/source", Some("carol")).await;
        assert_eq!(other.status(), StatusCode::NOT_FOUND);

        let history = get(router, "/v1/statuses/02/history", None).await;
        assert_eq!(history.status(), StatusCode::OK);
        let value = response_json(history).await;
        assert_eq!(
            value.get("data").and_then(serde_json::Value::as_array).map(Vec::len),
            Some(1)
        );

        cleanup(&db_path);
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn default_policy_endpoint_validates_visibility() {
        let state = ServiceState { api: ThreadKernelApi::new(unique_temp_db_path()) };
        let router = app(state);

        let response = get(router.clone(), "/v1/interaction-policies/default/direct", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        let announce_yes = value
            .get("data")
            .and_then(|data| data.get("policy"))
            .and_then(|policy| policy.get("can_announce"))
            .and_then(|conditions| conditions.get("yes"))
            .and_then(serde_json::Value::as_array)
            .map(Vec::len);
        assert_eq!(announce_yes, Some(0));

        let invalid = get(router, "/v1/interaction-policies/default/secret", None).await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    // Test IDs: TSVC-007
    #[tokio::test]
    async fn malformed_requester_header_is_rejected() {
        let state = ServiceState { api: ThreadKernelApi::new(unique_temp_db_path()) };
        let response = get(app(state), "/v1/statuses/01/context", Some("  ")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // Test IDs: TSVC-008
    #[tokio::test]
    async fn dropped_request_cancels_the_blocking_call() {
        let (started_tx, started_rx) = mpsc::channel();
        let (seen_tx, seen_rx) = mpsc::channel();
        let request = tokio::spawn(run_blocking(move |cancel: CancellationToken| {
            let _ = started_tx.send(());
            let deadline = Instant::now() + Duration::from_secs(5);
            while !cancel.is_cancelled() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = seen_tx.send(cancel.is_cancelled());
            Err::<(), _>(ThreadError::Cancelled("client went away".to_string()))
        }));

        let started = tokio::task::spawn_blocking(move || started_rx.recv_timeout(WAIT)).await;
        assert!(matches!(started, Ok(Ok(()))), "blocking call never started");
        request.abort();

        match tokio::task::spawn_blocking(move || seen_rx.recv_timeout(WAIT)).await {
            Ok(Ok(cancelled)) => assert!(cancelled, "token was not cancelled"),
            other => panic!("blocking call did not report back: {other:?}"),
        }
    }

    // Test IDs: TSVC-009
    #[tokio::test]
    async fn completed_request_leaves_token_uncancelled() {
        let (seen_tx, seen_rx) = mpsc::channel();
        let result = run_blocking(move |cancel: CancellationToken| {
            let token = cancel.clone();
            let _ = seen_tx.send(token);
            Ok(cancel.is_cancelled())
        })
        .await;
        match result {
            Ok(Json(body)) => assert!(!body.data),
            Err(err) => panic!("blocking call failed: {}", err.error),
        }
        match seen_rx.recv_timeout(WAIT) {
            Ok(token) => assert!(!token.is_cancelled(), "guard fired after completion"),
            Err(err) => panic!("token was not handed over: {err}"),
        }
    }

    #[test]
    fn cancelled_maps_to_service_unavailable() {
        let err = ServiceError::from(ThreadError::Cancelled("client went away".to_string()));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.error.starts_with("cancelled"));
    }
}
