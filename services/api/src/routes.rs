use crate::infra::{AppState, RiskLensState};
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use mime_guess::mime::Mime;
use risk_lens::error::AppError;
use risk_lens::gateway::{
    dispatch, AccessToken, CreditGateway, Credentials, Registration, RegistrationOutcome,
};
use risk_lens::workflows::application::{
    ApplicationSession, ApplicationWorkflow, ApplyOutcome, DecisionResult, FieldEdit,
    HistoryView, ReplayedDecision, SessionView, StatementUpload, WorkflowError,
};
use risk_lens::workflows::explanation::{Explanation, FactorSkip};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct FieldsRequest {
    pub(crate) fields: BTreeMap<String, Value>,
}

const STATEMENT_PART: &str = "file";

#[derive(Debug, Serialize)]
pub(crate) struct ActionResponse {
    pub(crate) outcome: ApplyOutcome,
    pub(crate) session: SessionView,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExplainResponse {
    pub(crate) verdict: String,
    pub(crate) approved: bool,
    pub(crate) headline: String,
    pub(crate) explanation: Option<Explanation>,
    pub(crate) skipped: Vec<FactorSkip>,
}

pub(crate) fn risk_lens_router<G>(state: RiskLensState<G>) -> Router
where
    G: CreditGateway + 'static,
{
    Router::new()
        .route("/api/v1/session", get(session_handler::<G>))
        .route("/api/v1/session/fields", patch(fields_handler::<G>))
        .route("/api/v1/session/bureau", post(bureau_handler::<G>))
        .route("/api/v1/session/statement", post(statement_handler::<G>))
        .route("/api/v1/session/submit", post(submit_handler::<G>))
        .route("/api/v1/session/reset", post(reset_handler::<G>))
        .route("/api/v1/history", get(history_handler::<G>))
        .route(
            "/api/v1/history/:index/explanation",
            get(replay_handler::<G>),
        )
        .route("/api/v1/explain", post(explain_handler::<G>))
        .route("/api/v1/auth/register", post(register_handler::<G>))
        .route("/api/v1/auth/login", post(login_handler::<G>))
        .with_state(state)
}

pub(crate) fn with_service_routes<G>(state: RiskLensState<G>) -> Router
where
    G: CreditGateway + 'static,
{
    risk_lens_router(state)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn session_handler<G>(State(state): State<RiskLensState<G>>) -> Json<SessionView>
where
    G: CreditGateway + 'static,
{
    Json(state.session().view())
}

/// Applies a batch of edits. Nothing is applied unless every value parses.
pub(crate) async fn fields_handler<G>(
    State(state): State<RiskLensState<G>>,
    Json(request): Json<FieldsRequest>,
) -> Result<Json<SessionView>, AppError>
where
    G: CreditGateway + 'static,
{
    let edits = request
        .fields
        .iter()
        .map(|(field, value)| FieldEdit::parse(field, &raw_value(value)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(WorkflowError::from)?;

    let mut session = state.session();
    for edit in edits {
        session.edit(edit);
    }
    Ok(Json(session.view()))
}

fn raw_value(value: &Value) -> String {
    match value {
        Value::String(raw) => raw.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) async fn bureau_handler<G>(
    State(state): State<RiskLensState<G>>,
) -> Result<Json<ActionResponse>, AppError>
where
    G: CreditGateway + 'static,
{
    let pending = {
        let mut session = state.session();
        state.workflow.start_bureau(&mut session)
    };
    settle(&state, pending, ApplicationWorkflow::<G>::finish_enrichment).await
}

/// Accepts the statement as the `file` part of a multipart form.
pub(crate) async fn statement_handler<G>(
    State(state): State<RiskLensState<G>>,
    mut multipart: Multipart,
) -> Result<Json<ActionResponse>, AppError>
where
    G: CreditGateway + 'static,
{
    let upload = read_statement(&mut multipart).await?;
    let pending = {
        let mut session = state.session();
        state.workflow.start_statement(&mut session, upload)
    };
    settle(&state, pending, ApplicationWorkflow::<G>::finish_enrichment).await
}

async fn read_statement(multipart: &mut Multipart) -> Result<StatementUpload, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::Upload(err.to_string()))?
    {
        if field.name() != Some(STATEMENT_PART) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("statement.csv").to_string();
        let content_type = field
            .content_type()
            .and_then(|raw| raw.parse::<Mime>().ok())
            .unwrap_or_else(|| {
                mime_guess::from_path(&file_name).first_or(mime_guess::mime::TEXT_CSV)
            });
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::Upload(err.to_string()))?;

        return Ok(StatementUpload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Err(AppError::Upload(format!(
        "multipart body has no `{STATEMENT_PART}` part"
    )))
}

pub(crate) async fn submit_handler<G>(
    State(state): State<RiskLensState<G>>,
) -> Result<Json<ActionResponse>, AppError>
where
    G: CreditGateway + 'static,
{
    let pending = {
        let mut session = state.session();
        state.workflow.start_submission(&mut session)?
    };
    settle(&state, pending, ApplicationWorkflow::<G>::finish_submission).await
}

/// Awaits a started request on its own task and applies it to the session there, so the
/// session settles even when the client goes away first.
async fn settle<G, T>(
    state: &RiskLensState<G>,
    pending: impl Future<Output = T> + Send + 'static,
    finish: fn(&ApplicationWorkflow<G>, &mut ApplicationSession, T) -> ApplyOutcome,
) -> Result<Json<ActionResponse>, AppError>
where
    G: CreditGateway + 'static,
    T: Send + 'static,
{
    let worker = state.clone();
    let response = tokio::spawn(async move {
        let completion = pending.await;
        let mut session = worker.session();
        let outcome = finish(&worker.workflow, &mut session, completion);
        ActionResponse {
            outcome,
            session: session.view(),
        }
    })
    .await?;
    Ok(Json(response))
}

/// Logs the session out: form, channels, result and loaded history are all dropped.
pub(crate) async fn reset_handler<G>(State(state): State<RiskLensState<G>>) -> Json<SessionView>
where
    G: CreditGateway + 'static,
{
    state.history().clear();
    let mut session = state.session();
    session.reset();
    Json(session.view())
}

pub(crate) async fn history_handler<G>(
    State(state): State<RiskLensState<G>>,
) -> Result<Json<HistoryView>, AppError>
where
    G: CreditGateway + 'static,
{
    let pending = state.history().load();
    let worker = state.clone();
    let view = tokio::spawn(async move {
        let completion = pending.await;
        let mut history = worker.history();
        history.apply(completion);
        history.view().clone()
    })
    .await?;
    Ok(Json(view))
}

pub(crate) async fn replay_handler<G>(
    State(state): State<RiskLensState<G>>,
    Path(index): Path<usize>,
) -> Result<Json<ReplayedDecision>, AppError>
where
    G: CreditGateway + 'static,
{
    let replayed = state.history().select(index)?;
    Ok(Json(replayed))
}

/// Renders a posted decision payload without touching the session.
pub(crate) async fn explain_handler<G>(
    State(state): State<RiskLensState<G>>,
    Json(payload): Json<Value>,
) -> Result<Json<ExplainResponse>, AppError>
where
    G: CreditGateway + 'static,
{
    let decoded = DecisionResult::from_wire(payload)?;
    Ok(Json(explain(&decoded.decision, decoded.skipped, &state)))
}

fn explain<G>(
    decision: &DecisionResult,
    skipped: Vec<FactorSkip>,
    state: &RiskLensState<G>,
) -> ExplainResponse
where
    G: CreditGateway + 'static,
{
    ExplainResponse {
        verdict: decision.verdict.label().to_string(),
        approved: decision.is_approved(),
        headline: decision.headline(),
        explanation: state
            .renderer()
            .render(&decision.factors, &decision.applicant),
        skipped,
    }
}

pub(crate) async fn register_handler<G>(
    State(state): State<RiskLensState<G>>,
    Json(registration): Json<Registration>,
) -> Result<impl IntoResponse, AppError>
where
    G: CreditGateway + 'static,
{
    let gateway = Arc::clone(state.workflow.gateway());
    let outcome = dispatch(state.request_timeout, move || {
        gateway.register(&registration)
    })
    .await?;

    let status = match outcome {
        RegistrationOutcome::Created => StatusCode::CREATED,
        RegistrationOutcome::AlreadyExists => StatusCode::CONFLICT,
    };
    Ok((status, Json(json!({ "outcome": outcome }))))
}

pub(crate) async fn login_handler<G>(
    State(state): State<RiskLensState<G>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<AccessToken>, AppError>
where
    G: CreditGateway + 'static,
{
    let gateway = Arc::clone(state.workflow.gateway());
    let token = dispatch(state.request_timeout, move || gateway.login(&credentials)).await?;
    Ok(Json(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{demo_statement_analysis, DemoCreditGateway};
    use axum::body::Body;
    use axum::http::Request;
    use risk_lens::gateway::StatementAnalysis;
    use risk_lens::workflows::application::BureauSimulation;
    use risk_lens::workflows::explanation::ExplanationRenderer;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(gateway: DemoCreditGateway) -> RiskLensState<DemoCreditGateway> {
        let workflow = ApplicationWorkflow::with_parts(
            Arc::new(gateway),
            BureauSimulation {
                delay: Duration::from_millis(5),
                score: 780,
            },
            Duration::from_secs(2),
            ExplanationRenderer::default(),
        );
        RiskLensState::new(workflow, Duration::from_secs(2))
    }

    const BOUNDARY: &str = "risk-lens-boundary";

    async fn call(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(body) => Body::from(serde_json::to_vec(&body).expect("serialize body")),
                None => Body::empty(),
            })
            .expect("valid request");
        send(router, request).await
    }

    async fn upload(router: Router, part: &str, file_name: &str, bytes: &[u8]) -> (StatusCode, Value) {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{part}\"; filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/session/statement")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("valid request");
        send(router, request).await
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.expect("router responds");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn applicant_fields() -> Value {
        json!({
            "fields": {
                "full_name": "Asha Rao",
                "income": "20000",
                "loan_amount": 150000,
                "credit_score": "712",
                "age": 29,
                "years_employed": "4",
                "gender": "F"
            }
        })
    }

    #[tokio::test]
    async fn fields_patch_updates_the_session_view() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));

        let (status, body) = call(
            router.clone(),
            "PATCH",
            "/api/v1/session/fields",
            Some(applicant_fields()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fields"]["income"], 20000.0);
        assert_eq!(body["fields"]["gender"], "F");

        let (_, view) = call(router, "GET", "/api/v1/session", None).await;
        assert_eq!(view["phase"]["state"], "editing");
        assert_eq!(view["submit_enabled"], true);
    }

    #[tokio::test]
    async fn invalid_field_batch_is_rejected_whole() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));

        let (status, body) = call(
            router.clone(),
            "PATCH",
            "/api/v1/session/fields",
            Some(json!({ "fields": { "age": "41", "income": "-3" } })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().expect("message").contains("income"));

        let (_, view) = call(router, "GET", "/api/v1/session", None).await;
        assert_eq!(view["fields"]["age"], 0);
    }

    #[tokio::test]
    async fn enrichment_routes_fill_their_own_fields() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));

        let (_, bureau) = call(router.clone(), "POST", "/api/v1/session/bureau", None).await;
        assert_eq!(bureau["outcome"], "applied");
        assert_eq!(bureau["session"]["fields"]["credit_score"], 780);
        assert_eq!(bureau["session"]["provenance"]["credit_score"]["verified"], true);
        assert_eq!(
            bureau["session"]["bureau"]["notification"]["description"],
            "TransUnion Score: 780"
        );

        let (_, statement) = upload(
            router,
            "file",
            "march.csv",
            b"Date,Amount,Type,Narration\n2025-03-01,85000,CR,SALARY\n",
        )
        .await;
        assert_eq!(statement["outcome"], "applied");
        assert_eq!(
            statement["session"]["fields"]["income"],
            demo_statement_analysis().estimated_salary
        );
        assert_eq!(statement["session"]["fields"]["credit_score"], 780);
    }

    #[tokio::test]
    async fn rejected_statement_leaves_income_alone() {
        let gateway = DemoCreditGateway::with_statement(StatementAnalysis {
            is_verified: false,
            ..demo_statement_analysis()
        });
        let router = risk_lens_router(state(gateway));
        call(
            router.clone(),
            "PATCH",
            "/api/v1/session/fields",
            Some(json!({ "fields": { "income": "30000" } })),
        )
        .await;

        let (status, body) =
            upload(router, "file", "march.csv", b"Date,Amount,Type,Narration\n").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "failed");
        assert_eq!(body["session"]["fields"]["income"], 30000.0);
        assert_eq!(body["session"]["statement"]["failure"]["kind"], "unverified");
        assert_eq!(
            body["session"]["statement"]["notification"]["title"],
            "Upload Failed"
        );
    }

    #[tokio::test]
    async fn statement_bytes_need_not_be_utf8() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));
        let latin1 = b"Date,Amount,Type,Narration\n2025-03-01,85000,CR,CAF\xC9 SALARY\n";

        let (status, body) = upload(router, "file", "march.csv", latin1).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "applied");
        assert_eq!(
            body["session"]["fields"]["income"],
            demo_statement_analysis().estimated_salary
        );
    }

    #[tokio::test]
    async fn statement_without_a_file_part_is_rejected() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));

        let (status, body) = upload(router.clone(), "attachment", "march.csv", b"Date\n").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("message").contains("`file`"));

        let (_, view) = call(router, "GET", "/api/v1/session", None).await;
        assert_eq!(view["statement"]["status"], "idle");
    }

    #[tokio::test]
    async fn abandoned_submit_still_settles_the_session() {
        let gateway = DemoCreditGateway::default().with_latency(Duration::from_millis(150));
        let router = risk_lens_router(state(gateway));
        call(
            router.clone(),
            "PATCH",
            "/api/v1/session/fields",
            Some(applicant_fields()),
        )
        .await;

        let abandoned = call(router.clone(), "POST", "/api/v1/session/submit", None);
        assert!(tokio::time::timeout(Duration::from_millis(20), abandoned)
            .await
            .is_err());

        let (_, view) = call(router.clone(), "GET", "/api/v1/session", None).await;
        assert_eq!(view["phase"]["state"], "submitting");

        tokio::time::sleep(Duration::from_millis(400)).await;
        let (_, view) = call(router.clone(), "GET", "/api/v1/session", None).await;
        assert_eq!(view["phase"]["state"], "result");
        assert_eq!(view["submit_enabled"], true);

        let (status, _) = call(router, "POST", "/api/v1/session/submit", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn abandoned_statement_upload_still_settles_the_channel() {
        let gateway = DemoCreditGateway::default().with_latency(Duration::from_millis(150));
        let router = risk_lens_router(state(gateway));

        let abandoned = upload(
            router.clone(),
            "file",
            "march.csv",
            b"Date,Amount,Type,Narration\n",
        );
        assert!(tokio::time::timeout(Duration::from_millis(20), abandoned)
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let (_, view) = call(router, "GET", "/api/v1/session", None).await;
        assert_eq!(view["statement"]["status"], "completed");
        assert_eq!(
            view["fields"]["income"],
            demo_statement_analysis().estimated_salary
        );
    }

    #[tokio::test]
    async fn submit_then_replay_history_matches() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));
        call(
            router.clone(),
            "PATCH",
            "/api/v1/session/fields",
            Some(applicant_fields()),
        )
        .await;

        let (status, submitted) = call(router.clone(), "POST", "/api/v1/session/submit", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitted["outcome"], "applied");
        let live = submitted["session"]["phase"]["explanation"].clone();
        assert_eq!(live["classification"], "attribution");

        let (_, history) = call(router.clone(), "GET", "/api/v1/history", None).await;
        assert_eq!(history["state"], "loaded");
        assert_eq!(history["records"].as_array().map(Vec::len), Some(1));

        let (status, replayed) =
            call(router.clone(), "GET", "/api/v1/history/0/explanation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replayed["explanation"], live);

        let (status, _) = call(router, "GET", "/api/v1/history/5/explanation", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn policy_rejection_has_no_chart() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));
        call(
            router.clone(),
            "PATCH",
            "/api/v1/session/fields",
            Some(json!({ "fields": { "income": "40000", "loan_amount": "100000", "credit_score": "600" } })),
        )
        .await;

        let (_, submitted) = call(router, "POST", "/api/v1/session/submit", None).await;
        let phase = &submitted["session"]["phase"];
        assert_eq!(phase["approved"], false);
        assert_eq!(phase["explanation"]["classification"], "policy_rejection");
        assert!(phase["explanation"].get("chart").is_none());
    }

    #[tokio::test]
    async fn reset_clears_the_session() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));
        call(
            router.clone(),
            "PATCH",
            "/api/v1/session/fields",
            Some(applicant_fields()),
        )
        .await;

        let (_, view) = call(router.clone(), "POST", "/api/v1/session/reset", None).await;
        assert_eq!(view["generation"], 1);
        assert_eq!(view["fields"]["full_name"], "");

        let (status, _) = call(router, "GET", "/api/v1/history/0/explanation", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn explain_renders_a_posted_wire_decision() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));

        let (status, body) = call(
            router,
            "POST",
            "/api/v1/explain",
            Some(json!({
                "status": "REJECTED_HIGH_RISK",
                "risk_score": 31.0,
                "risk_factors": "[{\"feature\": \"AMT_INCOME_TOTAL\", \"shap_score\": 0.42}, {\"oops\": 1}]",
                "income": 20000
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["approved"], false);
        assert_eq!(body["headline"], "CONFIDENCE SCORE: 31.0/100");
        assert_eq!(body["skipped"][0]["index"], 1);
        let statement = body["explanation"]["cards"][0]["statement"]
            .as_str()
            .expect("statement text");
        assert!(statement.contains("falls below the optimal threshold"));
        assert_eq!(body["explanation"]["chart"][0]["color"], "#E53E3E");
    }

    #[tokio::test]
    async fn auth_routes_register_then_login() {
        let router = risk_lens_router(state(DemoCreditGateway::default()));
        let registration = json!({
            "email": "asha@example.com",
            "password": "hunter2",
            "full_name": "Asha Rao"
        });

        let (status, _) = call(
            router.clone(),
            "POST",
            "/api/v1/auth/register",
            Some(registration.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) =
            call(router.clone(), "POST", "/api/v1/auth/register", Some(registration)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["outcome"], "already_exists");

        let (status, _) = call(
            router.clone(),
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "username": "asha@example.com", "password": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, token) = call(
            router,
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "username": "asha@example.com", "password": "hunter2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(token["token_type"], "bearer");
    }
}
