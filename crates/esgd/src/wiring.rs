//! Service construction from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use esg_airtable::{AirtableClient, MemoryRecordStore, MemorySchemaSource};
use esg_api::ApiState;
use esg_core::ConsoleConfig;
use esg_fieldmap::{IdentityResolver, TableRegistry};
use esg_prefs::PreferenceStore;

/// Services backed by the configured Airtable base.
pub fn airtable_state(config: &ConsoleConfig) -> anyhow::Result<ApiState> {
    let token = config.resolve_token();
    if token.is_none() {
        warn!(
            env = esg_core::config::TOKEN_ENV_VAR,
            "no Airtable token configured; requests will be unauthorized"
        );
    }
    let client = AirtableClient::from_config(&config.airtable, token)?;
    info!(api_url = %config.airtable.api_url, "airtable client ready");

    let client = Arc::new(client);
    Ok(ApiState {
        prefs: PreferenceStore::new(client.clone(), config.airtable.preferences_table.clone()),
        resolver: IdentityResolver::new(
            client,
            TableRegistry::from_config(config),
            Duration::from_secs(config.airtable.schema_cache_ttl_secs),
        ),
    })
}

/// Services with in-memory storage and an empty schema.
pub fn offline_state(config: &ConsoleConfig) -> ApiState {
    ApiState {
        prefs: PreferenceStore::new(
            Arc::new(MemoryRecordStore::new()),
            config.airtable.preferences_table.clone(),
        ),
        resolver: IdentityResolver::new(
            Arc::new(MemorySchemaSource::new()),
            TableRegistry::from_config(config),
            Duration::from_secs(config.airtable.schema_cache_ttl_secs),
        ),
    }
}
