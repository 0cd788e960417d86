use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use hrsync_common::SheetsConfig;
use hrsync_core::{InMemoryStore, RecordStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod chat;
pub mod sheets;

pub use chat::{ChatClient, ChatPlanStrategy, ChatSchemaStrategy, strip_code_fences};
pub use sheets::{GoogleSheetsStore, column_letter, parse_spreadsheet_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    GoogleSheets,
    Memory,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleSheets => "google_sheets",
            Self::Memory => "memory",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google_sheets" | "google-sheets" | "sheets" | "gsheets" => Some(Self::GoogleSheets),
            "memory" | "in_memory" | "in-memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

pub trait SecretResolver {
    fn get_secret(&self, key_id: &str) -> Result<Option<String>>;
}

#[derive(Default)]
pub struct InMemorySecretResolver {
    secrets: BTreeMap<String, String>,
}

impl InMemorySecretResolver {
    pub fn new(secrets: BTreeMap<String, String>) -> Self {
        Self { secrets }
    }
}

impl SecretResolver for InMemorySecretResolver {
    fn get_secret(&self, key_id: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(key_id).cloned())
    }
}

/// Resolver with no stored secrets; tokens come from the environment only.
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn get_secret(&self, _key_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Everything needed to open a store besides its own connection config.
pub struct StoreContext<'a> {
    pub connection_id: &'a str,
    pub sheets: &'a SheetsConfig,
    pub secret_resolver: &'a dyn SecretResolver,
}

#[derive(Debug, Default, Deserialize)]
struct TokenOverride {
    #[serde(default)]
    access_token_env: Option<String>,
}

/// Builds and connects the backend named by `kind`.
pub fn open_store(
    kind: StoreKind,
    config: &Value,
    ctx: &StoreContext<'_>,
) -> Result<Box<dyn RecordStore>> {
    match kind {
        StoreKind::Memory => {
            let mut store = InMemoryStore::default();
            store.connect(config)?;
            Ok(Box::new(store))
        }
        StoreKind::GoogleSheets => {
            let overrides: TokenOverride = serde_json::from_value(config.clone())
                .with_context(|| "invalid google_sheets connection config")?;
            let env_key = overrides
                .access_token_env
                .as_deref()
                .unwrap_or(&ctx.sheets.access_token_env);
            let token =
                resolve_secret(ctx.secret_resolver, ctx.connection_id, "sheets_token", env_key)?;
            let mut store = GoogleSheetsStore::new(&ctx.sheets.base_url, token);
            store.connect(config)?;
            Ok(Box::new(store))
        }
    }
}

fn resolve_secret(
    resolver: &dyn SecretResolver,
    connection_id: &str,
    suffix: &str,
    env_key: &str,
) -> Result<String> {
    if let Ok(value) = std::env::var(env_key)
        && !value.trim().is_empty()
    {
        return Ok(value);
    }
    let key_id = format!("connection:{connection_id}:{suffix}");
    let value = resolver.get_secret(&key_id)?;
    value.ok_or_else(|| anyhow!("missing secret {key_id} (set {env_key})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_kind_aliases() {
        assert_eq!(StoreKind::parse("Google-Sheets"), Some(StoreKind::GoogleSheets));
        assert_eq!(StoreKind::parse("in_memory"), Some(StoreKind::Memory));
        assert_eq!(StoreKind::parse("postgres"), None);
        assert_eq!(StoreKind::GoogleSheets.as_str(), "google_sheets");
    }

    #[test]
    fn memory_store_opens_from_config() {
        let sheets = SheetsConfig::default();
        let ctx = StoreContext {
            connection_id: "c1",
            sheets: &sheets,
            secret_resolver: &EnvSecretResolver,
        };
        let mut store = open_store(
            StoreKind::Memory,
            &json!({"headers": ["Emp ID"], "records": [{"Emp ID": "E1"}]}),
            &ctx,
        )
        .expect("open memory store");
        assert_eq!(store.get_all_records().expect("records").len(), 1);
    }

    #[test]
    fn sheets_store_requires_a_token() {
        let sheets = SheetsConfig::default();
        let ctx = StoreContext {
            connection_id: "c1",
            sheets: &sheets,
            secret_resolver: &EnvSecretResolver,
        };
        let err = open_store(
            StoreKind::GoogleSheets,
            &json!({
                "spreadsheet_id": "abc",
                "access_token_env": "HRSYNC_TEST_TOKEN_NEVER_SET"
            }),
            &ctx,
        )
        .err()
        .expect("missing token");
        assert!(err.to_string().contains("connection:c1:sheets_token"));
    }
}
