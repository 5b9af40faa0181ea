use crate::cli::ServeArgs;
use crate::infra::{AppState, DemoCreditGateway, RiskLensState};
use crate::routes::with_service_routes;
use axum::{Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use risk_lens::config::{AppConfig, ServiceConfig};
use risk_lens::error::AppError;
use risk_lens::gateway::{CreditGateway, HttpCreditGateway};
use risk_lens::telemetry;
use risk_lens::workflows::application::ApplicationWorkflow;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let app = if args.demo {
        build_app(Arc::new(DemoCreditGateway::default()), &config.services)
    } else {
        build_app(
            Arc::new(HttpCreditGateway::new(&config.services)),
            &config.services,
        )
    }
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        upstream = %config.services.base_url,
        demo = args.demo,
        "risk lens service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

fn build_app<G>(gateway: Arc<G>, services: &ServiceConfig) -> Router
where
    G: CreditGateway + 'static,
{
    let workflow = ApplicationWorkflow::new(gateway, services);
    with_service_routes(RiskLensState::new(workflow, services.request_timeout))
}
