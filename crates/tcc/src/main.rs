use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tcc_core::{
    auth::LoginManager,
    config::Config,
    engine::CloneEngine,
    pool::SessionPool,
    ports::LoginConnector,
    registry::TaskRegistry,
    store::{JsonFileStore, SessionStore},
};
use tcc_mtproto::MtprotoConnector;
use tcc_telegram::router::Services;

mod health;

#[tokio::main]
async fn main() -> Result<(), tcc_core::Error> {
    tcc_core::logging::init("tcc")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        data_dir = %cfg.data_dir.display(),
        store = %cfg.store_path.display(),
        "configuration loaded"
    );

    let store: Arc<dyn SessionStore> = Arc::new(JsonFileStore::new(cfg.store_path.clone()));
    let connector: Arc<dyn LoginConnector> = Arc::new(MtprotoConnector::new(
        cfg.api_id,
        cfg.api_hash.clone(),
        cfg.session_dir.clone(),
    ));
    let pool = Arc::new(SessionPool::new(connector.clone(), store.clone()));
    let logins = Arc::new(LoginManager::new(
        connector,
        store.clone(),
        pool.clone(),
        cfg.login_timeout,
    ));
    let engine = Arc::new(CloneEngine::new(cfg.clone.clone(), store.clone()));
    let registry = TaskRegistry::new();

    let shutdown = CancellationToken::new();
    let health = tokio::spawn(health::serve(cfg.port, shutdown.clone()));

    let services = Services {
        logins: logins.clone(),
        pool: pool.clone(),
        engine,
        registry: registry.clone(),
        store,
    };
    let result = tcc_telegram::router::run_polling(cfg, services).await;

    let cancelled = registry.cancel_all();
    if cancelled > 0 {
        tracing::info!(jobs = cancelled, "clone jobs cancelled");
    }
    logins.abort_all().await;
    pool.stop_all().await;

    shutdown.cancel();
    match health.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("health server failed: {e}"),
        Err(e) => tracing::warn!("health server task failed: {e}"),
    }

    result.map_err(|e| tcc_core::Error::External(format!("telegram bot failed: {e}")))?;
    tracing::info!("shutdown complete");
    Ok(())
}
