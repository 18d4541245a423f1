mod auth;
mod config;
mod error;
mod routes;

use auth::TokenVerifier;
use config::AppConfig;
use rollcall_core::config::{RELATIONAL_API_TOKEN, REPLICA_SYNC_TOKEN};
use rollcall_core::sync::ReplicaPushClient;
use rollcall_core::{RelationalService, ReplicaService};
use routes::{relational_router, replica_router, RelationalState, ReplicaState};
use tokio::task::JoinSet;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rollcall_api=info".parse()?)
                .add_directive("rollcall_core=info".parse()?),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("Starting rollcall-api with config: {:?}", config);

    let settings = &config.sync;
    let secrets = settings.secret_cache().shared();
    let mut servers = JoinSet::new();

    if let Some(bind_addr) = config.relational_bind_addr.clone() {
        let mut service = RelationalService::open_path(&settings.relational_db_path).await?;
        if settings.replica_sync_url.is_some() {
            service = service.with_push(ReplicaPushClient::new(
                settings.replica_sync_url.clone(),
                secrets.clone(),
                settings.push_timeout,
            ));
        } else {
            tracing::warn!("ROLLCALL_REPLICA_SYNC_URL not set; relying on the reconciler alone");
        }
        let verifier = TokenVerifier::new(secrets.clone(), RELATIONAL_API_TOKEN);
        let router = relational_router(RelationalState::new(service, verifier));

        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!("relational sync API listening on {}", bind_addr);
        servers.spawn(async move { axum::serve(listener, router).await });
    }

    if let Some(bind_addr) = config.replica_bind_addr.clone() {
        let service = ReplicaService::open_path(&settings.replica_db_path).await?;
        let verifier = TokenVerifier::new(secrets.clone(), REPLICA_SYNC_TOKEN);
        let router = replica_router(ReplicaState::new(service, verifier));

        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!("replica sync API listening on {}", bind_addr);
        servers.spawn(async move { axum::serve(listener, router).await });
    }

    while let Some(result) = servers.join_next().await {
        result??;
    }
    Ok(())
}
