//! Shared application state.

use std::path::PathBuf;
use std::sync::Arc;

use fhir_client::{OAuth2ClientCredentials, TokenProvider};
use mcsd_sync::{SyncConfig, UpdateClient};

use crate::config::Config;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub update_client: Arc<UpdateClient>,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mcsd-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let token_provider: Option<Arc<dyn TokenProvider>> = if config.mcsd.auth.is_configured() {
            tracing::info!(
                token_url = %config.mcsd.auth.token_url,
                "mCSD: OAuth2 authentication configured"
            );
            Some(Arc::new(OAuth2ClientCredentials::new(
                config.mcsd.auth.clone(),
                http.clone(),
            )?))
        } else {
            tracing::info!("mCSD: no authentication configured");
            None
        };

        let sync_config = SyncConfig {
            query_directory_url: config.mcsd.query_directory.fhir_base_url.clone(),
            root_directories: config
                .mcsd
                .administration_directories
                .values()
                .map(|directory| directory.fhir_base_url.clone())
                .collect(),
            exclude_directories: config.mcsd.exclude_admin_directories.clone(),
            directory_resource_types: config.mcsd.directory_resource_types.clone(),
            state_file: if config.mcsd.state_file.is_empty() {
                None
            } else {
                Some(PathBuf::from(&config.mcsd.state_file))
            },
            snapshot_mode_support: config.mcsd.snapshot_mode_support,
        };

        let update_client = UpdateClient::new(sync_config, http, token_provider)
            .map_err(|e| anyhow::anyhow!("failed to register administration directories: {e}"))?;

        Ok(Self {
            update_client: Arc::new(update_client),
        })
    }
}
