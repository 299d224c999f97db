use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use typerace_backend_lib::{
    auth::JwtVerifier, config::Settings, store::FlatFileStore, sweeper, ws_router, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let store = FlatFileStore::new(&settings.data_dir)?;
    let verifier = Arc::new(JwtVerifier::new(&settings.jwt_secret));
    let state = Arc::new(AppState::new(store, verifier));

    sweeper::spawn(Arc::clone(&state));

    let app = ws_router::create_router(Arc::clone(&state));

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}
