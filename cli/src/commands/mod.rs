//! Command handlers

pub mod cleanup;
pub mod provision;

use std::sync::Arc;

use anyhow::Context;
use keygen_core::{ApiGatewayIssuer, PgFixtureStore, Settings};

/// Connections beyond the tenant fan-out
const POOL_HEADROOM: u32 = 2;

/// Connect the store with a pool sized for `fan_out` concurrent tasks
pub async fn connect_store(settings: &Settings, fan_out: usize) -> anyhow::Result<Arc<PgFixtureStore>> {
    let max_connections = u32::try_from(fan_out).unwrap_or(u32::MAX).saturating_add(POOL_HEADROOM);
    let store = PgFixtureStore::connect(&settings.database, max_connections)
        .await
        .with_context(|| format!("connecting to {}:{}", settings.database.host, settings.database.port))?;
    Ok(Arc::new(store))
}

pub async fn connect_issuer(settings: &Settings) -> Arc<ApiGatewayIssuer> {
    Arc::new(ApiGatewayIssuer::connect(&settings.aws).await)
}
