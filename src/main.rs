//! The item service binary.

use item_service::{
    infra::{
        config::{self, StoreBackend},
        database::init_db,
        logging::init_logging,
        state::AppState,
    },
    server::run_app,
    store::{memory::MemoryStore, postgres::PgDocumentStore},
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    let config = config::load_config()?;
    let _guard = init_logging(&config.logging)?;

    let listener = TcpListener::bind(format!(
        "{}:{}",
        config.server.address, config.server.http_port
    ))
    .await?;

    match config.database.backend {
        StoreBackend::Postgres => {
            let store = PgDocumentStore::new(init_db(&config.database));
            store.migrate().await?;
            run_app(listener, AppState::new(store), config.server).await?;
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, data is lost on restart");
            run_app(listener, AppState::new(MemoryStore::new()), config.server).await?;
        }
    }

    Ok(())
}
