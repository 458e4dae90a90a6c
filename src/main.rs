mod config;
mod domain;
mod error;
mod infra;
mod middleware;
mod routes;
mod security;
mod state;
mod store;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{ServerConfig, StorageBackend};
use infra::{cloudinary::Cloudinary, supabase::SupabaseAuth};
use security::config::SecurityConfig;
use store::{AccountStore, CatalogStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = ServerConfig::from_env()?;
    let security = SecurityConfig::from_env();

    let (accounts, catalog): (Arc<dyn AccountStore>, Arc<dyn CatalogStore>) = match server.storage {
        StorageBackend::Postgres => {
            let db = infra::db::connect().await?;
            if server.run_migrations {
                infra::db::migrate(&db).await?;
                tracing::info!("migrations applied");
            }
            let store = PgStore::new(db);
            (Arc::new(store.clone()), Arc::new(store))
        }
        StorageBackend::Memory => {
            let store = MemoryStore::new();
            (Arc::new(store.clone()), Arc::new(store))
        }
    };

    let identity = Arc::new(SupabaseAuth::from_env()?);
    let media = Arc::new(Cloudinary::from_env()?);
    let shared_state = state::AppState::new(accounts, catalog, identity, media, security);

    let app = routes::router(shared_state, server.upload_limit);

    let listener = tokio::net::TcpListener::bind(server.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
