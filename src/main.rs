use lease_rotor::config::Config;
use lease_rotor::db::ConnectionManager;
use lease_rotor::renewal::RenewalCoordinator;
use lease_rotor::server::{RotorState, rotor_router};
use lease_rotor::{SecretSource, VaultClient};
use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        vault = %cfg.vault.address,
        database = %cfg.database.name,
        database_host = %cfg.database.host,
        listen = %cfg.basic.listen_addr,
        loglevel = %cfg.basic.loglevel
    );

    let connector = cfg.database.connector()?;
    let watcher_options = cfg.renewal.watcher_options()?;
    let cancel = CancellationToken::new();

    let vault = Arc::new(VaultClient::new(&cfg.vault)?);
    let auth_token = vault.login().await?;
    let (credentials, db_credentials_lease) = vault.issue_database_credentials(&auth_token).await?;

    let connections = Arc::new(
        ConnectionManager::connect(
            connector,
            cfg.database.connection_parameters(),
            cfg.database.ping_interval(),
            &credentials,
            &cancel,
        )
        .await?,
    );
    drop(credentials);

    let coordinator = RenewalCoordinator::new(vault, watcher_options);
    let renewal = {
        let cancel = cancel.clone();
        let connections = connections.clone();
        tokio::spawn(async move {
            let res = coordinator
                .run(cancel.clone(), auth_token, db_credentials_lease, &*connections)
                .await;
            // Serving on credentials that are about to be revoked is worse than exiting.
            cancel.cancel();
            res
        })
    };

    let state = RotorState::new(connections.clone());
    let app = rotor_router(state);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await?;

    let rotation = renewal.await;

    if let Err(e) = connections.close().await {
        warn!(error = %e, "closing database connection failed");
    }

    match rotation {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "credential rotation failed");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "credential rotation task failed");
            Err(e.into())
        }
    }
}
