use super::http_auth::{extract_bearer_token, stripe_signature};
use super::http_errors::{
    denial_response, map_entitlement_error, map_question_error, map_reconcile_error,
    map_registration_error, map_session_error, map_signature_error, map_webhook_parse_error,
};
use super::http_types::{
    AccountResponse, AllowanceResponse, ConversationResponse, HealthResponse, HistoryParams,
    LoginRequest, LoginResponse, MeResponse, PlanResponse, QuestionRequest, QuestionResponse,
    RegisterRequest, RegisterResponse, UsageHistoryEntry, UsageResponse, WebhookAck,
};
use super::state::AppState;
use crate::application::{QuestionOutcome, ReconcileOutcome, RejectReason};
use crate::domain::{Account, WebhookEvent};
use crate::infrastructure::{verify_stripe_signature, UsageRepository};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/plans", get(list_plans))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/me", get(me))
        .route("/questions", post(ask_question))
        .route("/conversations", get(list_conversations))
        .route("/webhooks/stripe", post(stripe_webhook))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        list_plans,
        register,
        login,
        me,
        ask_question,
        list_conversations,
        stripe_webhook,
    ),
    components(
        schemas(
            HealthResponse,
            PlanResponse,
            RegisterRequest,
            RegisterResponse,
            LoginRequest,
            LoginResponse,
            AccountResponse,
            AllowanceResponse,
            UsageResponse,
            UsageHistoryEntry,
            MeResponse,
            QuestionRequest,
            QuestionResponse,
            ConversationResponse,
            WebhookAck,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Plans", description = "Subscription plan catalog"),
        (name = "Auth", description = "Registration and login"),
        (name = "Account", description = "Profile and usage"),
        (name = "Questions", description = "Metered AI questions"),
        (name = "Webhooks", description = "Billing provider callbacks"),
    ),
    info(
        title = "Aurora IA Billing API",
        version = "0.1.0",
        description = "Subscriptions, plan entitlements and billing webhook reconciliation",
        license(name = "MIT")
    )
)]
struct ApiDoc;

type ErrorResponse = (StatusCode, Json<Value>);

fn error_response((status, body): (StatusCode, Value)) -> ErrorResponse {
    (status, Json(body))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Account, ErrorResponse> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Token requerido" })),
        ));
    };

    state.sessions.authenticate(token).await.map_err(|e| {
        warn!(error = %e, "Authentication failed");
        error_response(map_session_error(&e))
    })
}

/// Health check endpoint
///
/// Verifies database connectivity and returns service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

#[utoipa::path(
    get,
    path = "/plans",
    tag = "Plans",
    responses((status = 200, description = "Available plans", body = [PlanResponse]))
)]
async fn list_plans(State(state): State<AppState>) -> impl IntoResponse {
    let plans: Vec<PlanResponse> = state.catalog.plans().into_iter().map(Into::into).collect();
    Json(plans)
}

/// Register an account and open a checkout session
///
/// The account stays `pending_payment` until the billing provider confirms checkout.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, redirect to checkout", body = RegisterResponse),
        (status = 400, description = "Invalid input or plan", body = Object),
        (status = 409, description = "Email already registered", body = Object),
        (status = 502, description = "Identity or payment provider failed", body = Object)
    )
)]
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ErrorResponse> {
    let outcome = state.registration.register(req.into()).await.map_err(|e| {
        error!(error = %e, "Registration failed");
        error_response(map_registration_error(&e))
    })?;

    info!(account_id = %outcome.account.id, plan_id = %outcome.plan.id, "Account registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            account_id: outcome.account.id,
            checkout_url: outcome.checkout_url,
            plan: PlanResponse::from(&outcome.plan),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = Object)
    )
)]
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ErrorResponse> {
    let (session, account) = state
        .sessions
        .login(&req.email, &req.password)
        .await
        .map_err(|e| error_response(map_session_error(&e)))?;

    Ok(Json(LoginResponse {
        access_token: session.access_token,
        account: account.into(),
    }))
}

/// Current account, plan and usage
#[utoipa::path(
    get,
    path = "/me",
    tag = "Account",
    responses(
        (status = 200, description = "Profile with usage", body = MeResponse),
        (status = 401, description = "Missing or invalid token", body = Object)
    )
)]
async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ErrorResponse> {
    let account = authenticate(&state, &headers).await?;

    let usage = state
        .gate
        .usage_summary(&account)
        .await
        .map_err(|e| error_response(map_entitlement_error(&e)))?;

    let history = match state.usage_repo.history(account.id).await {
        Ok(counters) => counters.into_iter().map(Into::into).collect(),
        Err(e) => {
            warn!(account_id = %account.id, error = %e, "Failed to load usage history");
            Vec::new()
        }
    };

    let plan = state.catalog.lookup(&account.plan_id).ok().map(PlanResponse::from);

    Ok(Json(MeResponse {
        account: account.into(),
        plan,
        usage: usage.into(),
        history,
    }))
}

/// Ask the AI assistant a question
///
/// Consumes one question from the current period's quota before the answer is generated.
#[utoipa::path(
    post,
    path = "/questions",
    tag = "Questions",
    request_body = QuestionRequest,
    responses(
        (status = 200, description = "Answer generated", body = QuestionResponse),
        (status = 400, description = "Empty or oversized question", body = Object),
        (status = 401, description = "Missing or invalid token", body = Object),
        (status = 402, description = "Plan inactive or quota exhausted", body = Object),
        (status = 502, description = "Completion provider failed", body = Object)
    )
)]
async fn ask_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<QuestionResponse>, ErrorResponse> {
    let account = authenticate(&state, &headers).await?;

    let outcome = state
        .questions
        .ask(&account, &req.question, req.baby_id)
        .await
        .map_err(|e| {
            error!(account_id = %account.id, error = %e, "Question failed");
            error_response(map_question_error(&e))
        })?;

    match outcome {
        QuestionOutcome::Answered(answer) => Ok(Json(QuestionResponse {
            answer: answer.text,
            tokens_used: answer.tokens_used,
            usage: answer.grant.into(),
        })),
        QuestionOutcome::Denied(reason) => Err(error_response(denial_response(&reason))),
    }
}

#[utoipa::path(
    get,
    path = "/conversations",
    tag = "Questions",
    params(HistoryParams),
    responses(
        (status = 200, description = "Answered questions, newest first", body = [ConversationResponse]),
        (status = 401, description = "Missing or invalid token", body = Object)
    )
)]
async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ConversationResponse>>, ErrorResponse> {
    let account = authenticate(&state, &headers).await?;

    let conversations = state
        .questions
        .history(&account, params.limit)
        .await
        .map_err(|e| {
            error!(account_id = %account.id, error = %e, "Failed to list conversations");
            error_response(map_question_error(&e))
        })?;

    Ok(Json(conversations.into_iter().map(Into::into).collect()))
}

/// Stripe webhook receiver
///
/// Verifies the `Stripe-Signature` header against the raw body before reconciling.
/// Duplicates and events for unknown customers are acknowledged with 200.
#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    tag = "Webhooks",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Malformed payload", body = Object),
        (status = 401, description = "Invalid signature", body = Object),
        (status = 503, description = "Transient failure, provider should retry", body = Object)
    )
)]
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ErrorResponse> {
    let Some(signature) = stripe_signature(&headers) else {
        warn!("Webhook without signature header");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing webhook signature" })),
        ));
    };

    verify_stripe_signature(&body, signature, &state.webhook_secret, Utc::now()).map_err(|e| {
        warn!(error = %e, "Webhook signature rejected");
        error_response(map_signature_error(&e))
    })?;

    let event = WebhookEvent::from_stripe_payload(&body).map_err(|e| {
        warn!(error = %e, "Malformed webhook payload");
        error_response(map_webhook_parse_error(&e))
    })?;

    let outcome = state.reconciler.apply(&event).await.map_err(|e| {
        error!(event_id = %event.provider_event_id, error = %e, "Webhook reconciliation failed");
        error_response(map_reconcile_error(&e))
    })?;

    let outcome = match outcome {
        ReconcileOutcome::Applied { effect: Some(effect) } => effect.to_string(),
        ReconcileOutcome::Applied { effect: None } => "ignored".to_string(),
        ReconcileOutcome::Duplicate => "duplicate".to_string(),
        ReconcileOutcome::Rejected(RejectReason::UnknownCustomer) => "unknown_customer".to_string(),
        ReconcileOutcome::Rejected(RejectReason::CustomerConflict) => {
            "customer_conflict".to_string()
        }
    };

    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}
