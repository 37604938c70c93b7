//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use lifehub_providers::google::{
    DriveClient, GoogleConfig, OAuthClient, TokenRefreshingClient,
};
use lifehub_providers::{DisabledLabeler, GeminiLabeler, LabelGenerator, TokenRefresher};
use tracing::info;

use crate::config::ServerConfig;
use crate::dedup::UploadDeduplicator;
use crate::error::{ServerError, ServerResult};
use crate::routes::photos::UploadedPhoto;
use crate::session::SessionStore;
use crate::store::Store;

/// Google clients sharing one HTTP connection pool.
#[derive(Clone)]
pub struct GoogleServices {
    pub oauth: OAuthClient,
    /// Used for session-level refreshes.
    pub refresher: Arc<dyn TokenRefresher>,
    /// Wraps every Drive call with refresh and retry handling.
    pub api: TokenRefreshingClient,
    /// Scopes requested at sign-in.
    pub scopes: Vec<String>,
    /// Share uploads with anyone holding the link.
    pub public_read: bool,
}

impl GoogleServices {
    pub fn new(config: &GoogleConfig) -> ServerResult<Self> {
        let http_client = config.http_client()?;
        let oauth = OAuthClient::new(config, http_client.clone());
        let refresher: Arc<dyn TokenRefresher> = Arc::new(oauth.clone());
        let drive = DriveClient::new(config, http_client);
        let api = TokenRefreshingClient::new(refresher.clone(), drive, config.refresh_policy);

        Ok(Self {
            oauth,
            refresher,
            api,
            scopes: config.scopes.clone(),
            public_read: config.public_read,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Store,
    pub sessions: Arc<SessionStore>,
    pub dedup: Arc<UploadDeduplicator<UploadedPhoto>>,
    pub google: Arc<GoogleServices>,
    pub labeler: Arc<dyn LabelGenerator>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Store,
        google: GoogleServices,
        labeler: Arc<dyn LabelGenerator>,
    ) -> Self {
        let dedup = UploadDeduplicator::new(Duration::from_secs(config.dedup.ttl_secs));
        let sessions = SessionStore::new(config.server.session_max_age());
        Self {
            config: Arc::new(config),
            store,
            sessions: Arc::new(sessions),
            dedup: Arc::new(dedup),
            google: Arc::new(google),
            labeler,
        }
    }

    /// Builds every service from configuration and opens the database.
    pub async fn from_config(config: ServerConfig) -> ServerResult<Self> {
        let google_config = config.google_config().map_err(ServerError::config)?;
        let google = GoogleServices::new(&google_config)?;

        let labeler: Arc<dyn LabelGenerator> =
            match config.gemini_config().map_err(ServerError::config)? {
                Some(gemini) => {
                    info!(model = %gemini.model, "image labelling enabled");
                    Arc::new(GeminiLabeler::new(gemini)?)
                }
                None => {
                    info!("no Gemini API key, uploads will not be labelled");
                    Arc::new(DisabledLabeler)
                }
            };

        let store = Store::connect(&config.database.url, config.database.max_connections).await?;
        Ok(Self::new(config, store, google, labeler))
    }
}
