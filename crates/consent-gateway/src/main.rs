mod context;
mod error;
mod landing;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result as AnyResult};
use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use consent_core::{Choice, ConsentError, ConsentWorkflow, LinkStore, TokenCodec, parse_line_items};
use consent_orders::OrderSubmitter;
use consent_platform::{
    ConsentListQuery, ConsentListResponse, CreateLinkRequest, CreateLinkResponse, DecisionResponse,
    HealthResponse, LineItemsResponse, LinkDetailResponse, PgLinkStore, RefreshSnapshotsResponse,
    ResubmitResponse, ServiceConfig, SubmissionHistoryResponse, connect_database, run_migrations,
};
use tracing::{error, info, warn};

use crate::context::{DecisionPayload, RequestContext};
use crate::error::{ApiError, decision_failure, decision_reply, landing_failure};

const MAX_CONSENT_PAGE: i64 = 500;

#[derive(Clone)]
struct AppState {
    workflow: ConsentWorkflow,
    /// `None` when no order API is configured.
    submitter: Option<OrderSubmitter>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "consent_gateway=info,tower_http=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    run_migrations(&pool).await?;

    let store: Arc<dyn LinkStore> = Arc::new(PgLinkStore::new(pool));
    let codec = TokenCodec::new(config.secret_key.as_bytes()).context("SECRET_KEY is invalid")?;
    let submitter = match &config.order_api {
        Some(api) => Some(api.submitter(store.clone())?),
        None => {
            warn!("ORDER_API_URL is not set, agreed orders will not be submitted");
            None
        }
    };
    let workflow = ConsentWorkflow::new(
        store,
        codec,
        config.token_max_age,
        config.base_url.clone(),
    );

    let router = router(AppState {
        workflow,
        submitter,
    });

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/l/{token}", get(landing_page))
        .route("/api/agree", post(agree))
        .route("/api/reject", post(reject))
        .route("/admin/links", post(create_link))
        .route("/admin/links/{link_id}", get(get_link))
        .route("/admin/links/{link_id}/resubmit", post(resubmit_link))
        .route("/admin/links/{link_id}/submissions", get(list_submissions))
        .route(
            "/admin/offers/{offer_id}/refresh-snapshots",
            post(refresh_snapshots),
        )
        .route("/admin/offers/{offer_id}/line-items", post(set_line_items))
        .route("/admin/consents", get(list_consents))
        .with_state(state)
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn landing_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ctx: RequestContext,
) -> Response {
    match state.workflow.open(&token, Utc::now()).await {
        Ok(opened) => {
            if opened.first_open {
                info!(request_id = %ctx.request_id, link_id = opened.link.id, "link opened");
            }
            Html(landing::render_offer(&opened.link, &token)).into_response()
        }
        Err(err) => {
            let (status, message) = landing_failure(&err);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!(request_id = %ctx.request_id, error = %err, "landing page failed");
            }
            (status, Html(landing::render_error(message))).into_response()
        }
    }
}

async fn agree(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: DecisionPayload,
) -> (StatusCode, Json<DecisionResponse>) {
    decide(&state, &ctx, &payload, Choice::Agreed).await
}

async fn reject(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: DecisionPayload,
) -> (StatusCode, Json<DecisionResponse>) {
    decide(&state, &ctx, &payload, Choice::Rejected).await
}

async fn decide(
    state: &AppState,
    ctx: &RequestContext,
    payload: &DecisionPayload,
    choice: Choice,
) -> (StatusCode, Json<DecisionResponse>) {
    let Some(token) = payload.token() else {
        return decision_reply(StatusCode::BAD_REQUEST, "invalid");
    };

    match state
        .workflow
        .decide(token, choice, &ctx.source(), Utc::now())
        .await
    {
        Ok(decided) => {
            info!(
                request_id = %ctx.request_id,
                link_id = decided.link.id,
                choice = choice.as_str(),
                "decision recorded"
            );
            if choice == Choice::Agreed {
                submit_order(state, decided.link.id).await;
            }
            decision_reply(StatusCode::OK, "ok")
        }
        Err(err) => {
            let (status, word) = decision_failure(&err, choice);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!(request_id = %ctx.request_id, error = %err, "decision failed");
            }
            decision_reply(status, word)
        }
    }
}

/// Forwards an agreed link to the order API. The customer's answer does not
/// depend on the outcome.
async fn submit_order(state: &AppState, link_id: i64) {
    let Some(submitter) = &state.submitter else {
        warn!(link_id, "order API not configured, submission skipped");
        return;
    };
    if let Err(err) = submitter.submit(link_id).await {
        error!(link_id, error = %err, "order submission could not be recorded");
    }
}

async fn create_link(
    State(state): State<AppState>,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<CreateLinkResponse>), ApiError> {
    let issued = state
        .workflow
        .issue_link(payload.into(), Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(issued.into())))
}

async fn get_link(
    State(state): State<AppState>,
    Path(link_id): Path<i64>,
) -> Result<Json<LinkDetailResponse>, ApiError> {
    let link = state
        .workflow
        .store()
        .fetch_link(link_id)
        .await?
        .ok_or(ConsentError::LinkNotFound(link_id))?;
    let url = link
        .token
        .as_deref()
        .map(|token| state.workflow.link_url(token));

    Ok(Json(LinkDetailResponse::new(link, url)))
}

async fn resubmit_link(
    State(state): State<AppState>,
    Path(link_id): Path<i64>,
) -> Result<Json<ResubmitResponse>, ApiError> {
    let submitter = state
        .submitter
        .as_ref()
        .ok_or(ApiError::Unavailable("order API is not configured"))?;
    let record = submitter.submit(link_id).await?;

    Ok(Json(ResubmitResponse::new(link_id, &record)))
}

async fn list_submissions(
    State(state): State<AppState>,
    Path(link_id): Path<i64>,
) -> Result<Json<SubmissionHistoryResponse>, ApiError> {
    let store = state.workflow.store();
    store
        .fetch_link(link_id)
        .await?
        .ok_or(ConsentError::LinkNotFound(link_id))?;
    let submissions = store.list_submissions(link_id).await?;

    Ok(Json(SubmissionHistoryResponse {
        link_id,
        submissions,
    }))
}

async fn refresh_snapshots(
    State(state): State<AppState>,
    Path(offer_id): Path<i64>,
) -> Result<Json<RefreshSnapshotsResponse>, ApiError> {
    let refreshed = state.workflow.refresh_snapshots(offer_id).await?;

    Ok(Json(RefreshSnapshotsResponse {
        offer_id,
        refreshed,
    }))
}

async fn set_line_items(
    State(state): State<AppState>,
    Path(offer_id): Path<i64>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Json<LineItemsResponse>, ApiError> {
    let items = parse_line_items(
        fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str())),
    )?;
    let cust_order_items = state.workflow.set_offer_line_items(offer_id, &items).await?;

    Ok(Json(LineItemsResponse {
        offer_id,
        cust_order_items,
    }))
}

async fn list_consents(
    State(state): State<AppState>,
    Query(query): Query<ConsentListQuery>,
) -> Result<Json<ConsentListResponse>, ApiError> {
    let limit = query.limit.clamp(1, MAX_CONSENT_PAGE);
    let consents = state
        .workflow
        .store()
        .list_consents(query.link_id, limit)
        .await?;

    Ok(Json(ConsentListResponse { consents }))
}
