//! Service wiring for the HTTP layer.

use std::sync::Arc;

use thiserror::Error;

use gatehouse_auth::AuthError;
use gatehouse_core::{Clock, SystemClock};
use gatehouse_infra::store::PostgresStore;
use gatehouse_infra::{AdminError, AuthConfig, AuthServices, StoreError, Stores};

use crate::app::cookies::CookieSettings;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("datastore: {0}")]
    Store(#[from] StoreError),

    #[error("services: {0}")]
    Auth(#[from] AuthError),

    #[error("seeding: {0}")]
    Seed(#[from] AdminError),
}

pub struct AppServices {
    pub auth: AuthServices,
    pub cookies: CookieSettings,
}

impl AppServices {
    pub fn new(auth: AuthServices, cookies: CookieSettings) -> Self {
        Self { auth, cookies }
    }
}

/// Connect to Postgres when `DATABASE_URL` is configured, otherwise run on
/// in-memory stores. The system admin role is seeded either way.
pub async fn build_services(config: &AuthConfig) -> Result<Arc<AppServices>, StartupError> {
    let stores = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.db_timeout).await?;
            store.migrate().await?;
            tracing::info!("using postgres stores");
            Stores::shared(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            Stores::in_memory()
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let auth = AuthServices::new(config, stores, clock)?;
    auth.admin.seed_system_roles().await?;

    Ok(Arc::new(AppServices::new(auth, CookieSettings::from_config(config))))
}
