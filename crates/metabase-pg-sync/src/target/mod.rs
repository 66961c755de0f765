//! Target PostgreSQL connection handling.
//!
//! One logical connection is owned by the Executor and borrowed by the
//! Loader and Schema Inspector; callers never issue concurrent statements
//! on it.

use std::time::Duration;

use rustls::ClientConfig;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::Client;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::{Result, SyncError};
use crate::loader::quote_ident;

/// Maintenance database used for the bootstrap create.
const ADMIN_DATABASE: &str = "postgres";

/// An open target connection plus its background driver task.
pub struct TargetConn {
    pub client: Client,
    handle: JoinHandle<()>,
}

impl TargetConn {
    /// Open a connection to the given database on the configured target.
    pub async fn open(config: &RunConfig, database: &str) -> Result<Self> {
        let url = config.target_url(database);
        let mut pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| SyncError::Connect(format!("invalid connection URL: {}", e)))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));

        let (client, handle) = if config.target_tls_enabled {
            let tls = MakeRustlsConnect::new(tls_config());
            let (client, connection) = pg_config.connect(tls).await?;
            let handle = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("Target connection task ended: {}", e);
                }
            });
            (client, handle)
        } else {
            let (client, connection) = pg_config.connect(tokio_postgres::NoTls).await?;
            let handle = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("Target connection task ended: {}", e);
                }
            });
            (client, handle)
        };

        debug!(
            "Connected to target {}:{}/{}",
            config.target_host, config.target_port, database
        );
        Ok(Self { client, handle })
    }

    /// Close the connection and wait out its driver task.
    pub async fn close(self) {
        drop(self.client);
        let _ = self.handle.await;
    }
}

/// Whether an error is the specific "database does not exist" signal that
/// triggers the one-shot bootstrap.
pub fn is_missing_database(error: &SyncError) -> bool {
    match error {
        SyncError::Target(e) => e.code() == Some(&SqlState::INVALID_CATALOG_NAME),
        _ => false,
    }
}

/// Create the target database through the engine's administrative database.
///
/// Encoding UTF-8, collation `C`, owned by the configured user.
pub async fn bootstrap_database(config: &RunConfig) -> Result<()> {
    info!(
        "Target database {} does not exist; creating it",
        config.target_name
    );

    let admin = TargetConn::open(config, ADMIN_DATABASE).await?;
    let create = format!(
        "CREATE DATABASE {} ENCODING 'UTF8' LC_COLLATE 'C' LC_CTYPE 'C' \
         TEMPLATE template0 OWNER {}",
        quote_ident(&config.target_name),
        quote_ident(&config.target_username),
    );

    let outcome = admin.client.execute(&create, &[]).await;
    admin.close().await;

    match outcome {
        Ok(_) => {
            info!("Created target database {}", config.target_name);
            Ok(())
        }
        Err(e) => Err(SyncError::Connect(format!(
            "bootstrap create of {} failed: {}",
            config.target_name, e
        ))),
    }
}

fn tls_config() -> ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}
