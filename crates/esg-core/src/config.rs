//! console.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable consulted when `airtable.token` is not set.
pub const TOKEN_ENV_VAR: &str = "AIRTABLE_PERSONAL_ACCESS_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub airtable: AirtableConfig,
    /// Logical table ID → backing-store table registry entry.
    #[serde(default)]
    pub tables: BTreeMap<String, TableRegistryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirtableConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub base_id: String,
    /// Name or ID of the table holding preference rows.
    #[serde(default = "default_preferences_table")]
    pub preferences_table: String,
    /// Personal access token. Falls back to `AIRTABLE_PERSONAL_ACCESS_TOKEN`.
    pub token: Option<String>,
    #[serde(default = "default_schema_cache_ttl")]
    pub schema_cache_ttl_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableRegistryEntry {
    pub airtable_table_id: Option<String>,
    pub airtable_table_name: Option<String>,
    /// Overrides `airtable.base_id` for tables living in another base.
    pub base_id: Option<String>,
    /// Field ID or current field name → application field key.
    #[serde(default)]
    pub field_keys: BTreeMap<String, String>,
}

fn default_port() -> u16 {
    8080
}

fn default_api_url() -> String {
    "https://api.airtable.com".to_string()
}

fn default_preferences_table() -> String {
    "Preferences".to_string()
}

fn default_schema_cache_ttl() -> u64 {
    300
}

fn default_timeout() -> u64 {
    30
}

impl ConsoleConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: ConsoleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Every registry entry must name its backing table by ID or by name.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.airtable.base_id.trim().is_empty() {
            anyhow::bail!("airtable.base_id must not be empty");
        }
        for (table_id, entry) in &self.tables {
            if entry.airtable_table_id.is_none() && entry.airtable_table_name.is_none() {
                anyhow::bail!(
                    "tables.{table_id}: one of airtable_table_id or airtable_table_name is required"
                );
            }
        }
        Ok(())
    }

    /// The configured token, or the one from the environment.
    pub fn resolve_token(&self) -> Option<String> {
        self.airtable
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()))
    }

    /// Scaffold a console.toml with two registered reference tables.
    pub fn scaffold(base_id: &str) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(
            "companies".to_string(),
            TableRegistryEntry {
                airtable_table_id: None,
                airtable_table_name: Some("Company".to_string()),
                base_id: None,
                field_keys: BTreeMap::new(),
            },
        );
        tables.insert(
            "divisions".to_string(),
            TableRegistryEntry {
                airtable_table_id: None,
                airtable_table_name: Some("Division".to_string()),
                base_id: None,
                field_keys: BTreeMap::new(),
            },
        );
        ConsoleConfig {
            server: ServerConfig::default(),
            airtable: AirtableConfig {
                api_url: default_api_url(),
                base_id: base_id.to_string(),
                preferences_table: default_preferences_table(),
                token: None,
                schema_cache_ttl_secs: default_schema_cache_ttl(),
                timeout_secs: default_timeout(),
            },
            tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = ConsoleConfig::scaffold("appExample");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("appExample"));

        let parsed = ConsoleConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.tables.len(), 2);
        assert_eq!(
            parsed.tables["companies"].airtable_table_name.as_deref(),
            Some("Company")
        );
    }

    #[test]
    fn parse_minimal_uses_defaults() {
        let toml_str = r#"
[airtable]
base_id = "appGtLbKhmNkkTLVL"
"#;
        let config = ConsoleConfig::parse(toml_str).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.airtable.api_url, "https://api.airtable.com");
        assert_eq!(config.airtable.preferences_table, "Preferences");
        assert_eq!(config.airtable.schema_cache_ttl_secs, 300);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn parse_registry_with_field_keys() {
        let toml_str = r#"
[airtable]
base_id = "appGtLbKhmNkkTLVL"

[tables.companies]
airtable_table_id = "tbl82H6ezrakMSkV1"

[tables.companies.field_keys]
"Company Name" = "Name"
fldLegacy01 = "Sector"
"#;
        let config = ConsoleConfig::parse(toml_str).unwrap();
        let entry = &config.tables["companies"];
        assert_eq!(entry.airtable_table_id.as_deref(), Some("tbl82H6ezrakMSkV1"));
        assert_eq!(entry.field_keys["Company Name"], "Name");
        assert_eq!(entry.field_keys["fldLegacy01"], "Sector");
    }

    #[test]
    fn registry_entry_without_table_reference_is_rejected() {
        let toml_str = r#"
[airtable]
base_id = "app1"

[tables.users]
base_id = "app2"
"#;
        let err = ConsoleConfig::parse(toml_str).unwrap_err();
        assert!(err.to_string().contains("tables.users"));
    }

    #[test]
    fn configured_token_wins() {
        let mut config = ConsoleConfig::scaffold("app1");
        config.airtable.token = Some("patXYZ".to_string());
        assert_eq!(config.resolve_token().as_deref(), Some("patXYZ"));
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.toml");
        std::fs::write(&path, "[airtable]\nbase_id = \"app1\"\n[server]\nport = 9000\n").unwrap();

        let config = ConsoleConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 9000);
    }
}
