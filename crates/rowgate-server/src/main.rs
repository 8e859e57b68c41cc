use axum::{
    Extension, Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, put},
};
use clap::Parser;
use rowgate_adapter_pg::{PgBackend, PgPolicyStore};
use rowgate_core::RowgateConfig;
use rowgate_interceptor::{InterceptorSettings, SessionFactory, attach_session};
use rowgate_policy::{PolicyAdmin, PolicyEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod error;
mod handlers;
mod middleware;
mod state;

use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "rowgate-server", version, about = "Rowgate permission service")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, env = "ROWGATE_CONFIG", default_value = "rowgate.yaml")]
    config: PathBuf,

    /// Listen address; overrides `server.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Create the policy tables before serving.
    #[arg(long, default_value_t = false)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RowgateConfig::from_file(&cli.config)?;
    init_tracing(&config.log.level);

    let pool = rowgate_adapter_pg::connect(&config.database).await?;
    if cli.migrate {
        rowgate_adapter_pg::migrate(&pool).await?;
        tracing::info!("Policy tables migrated");
    }

    let store = Arc::new(PgPolicyStore::new(pool.clone()).with_org(config.org.clone()));
    let engine = PolicyEngine::new(store.clone(), &config);
    let admin = PolicyAdmin::new(store.clone(), engine.cache(), config.custom_condition_check);
    let backend = Arc::new(
        PgBackend::new(pool.clone(), engine.renderer().clone())
            .with_schema(config.database.schema.clone()),
    );
    let sessions = SessionFactory::new(
        engine.clone(),
        backend,
        InterceptorSettings::from_config(&config),
    )
    .with_directory(store);

    let state = Arc::new(AppState {
        engine,
        admin,
        pool: Some(pool),
        schema: config.database.schema.clone(),
        admin_role_ids: config.server.admin_role_ids.clone(),
    });
    let app = create_router(state, sessions);

    let addr = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    tracing::info!(
        addr = %addr,
        enabled = config.enabled,
        field_permission_enabled = config.field_permission_enabled,
        "rowgate-server listening"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down");
}

fn create_router(state: Arc<AppState>, sessions: SessionFactory) -> Router {
    let admin = Router::new()
        .route(
            "/admin/tables",
            get(handlers::admin::list_tables).post(handlers::admin::create_table),
        )
        .route(
            "/admin/tables/{id}",
            put(handlers::admin::update_table).delete(handlers::admin::delete_table),
        )
        .route(
            "/admin/config",
            get(handlers::admin::get_config).put(handlers::admin::save_config),
        )
        .route("/admin/statistics", get(handlers::admin::statistics))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::admin::require_admin,
        ));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/policy/preview", get(handlers::policy::preview))
        .route("/policy/effective/{table}", get(handlers::policy::effective))
        .merge(admin)
        .route("/schema/tables", get(handlers::schema::list_tables))
        .route(
            "/schema/tables/{table}/fields",
            get(handlers::schema::table_fields),
        )
        .layer(from_fn(attach_session))
        .layer(from_fn(middleware::principal::principal_from_headers))
        .layer(Extension(sessions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
