use ephemeral_relay::{
    config::PanelConfig,
    database::pool::{create_pool, run_migrations},
    init_tracing, routes, AppState,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = PanelConfig::from_env()?;

    let pool = create_pool(&config.storage.database_path).await?;
    run_migrations(&pool).await?;
    info!(
        database = %config.storage.database_path.display(),
        images = %config.storage.images_dir.display(),
        "Storage ready"
    );

    if config.session_secret.is_none() {
        info!("SESSION_SECRET not set; sessions will not survive a restart");
    }

    let app_state = AppState::new(pool, &config)?;
    let app = routes::router(app_state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Admin panel listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
