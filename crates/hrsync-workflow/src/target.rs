use std::sync::Arc;

use anyhow::{Result, anyhow};
use hrsync_common::{HrSyncConfig, SheetsConfig};
use hrsync_connectors::{
    ChatClient, ChatPlanStrategy, ChatSchemaStrategy, EnvSecretResolver, SecretResolver,
    StoreContext, StoreKind, open_store,
};
use hrsync_core::{EventContext, RecordStore, SchemaMap};
use hrsync_engine::{
    Planner, RetryController, SchemaAnalyzer, SyncEngine, SyncOutcome, SyncRequest,
};
use hrsync_memory::{ConnectionRecord, HrStore};
use tracing::{debug, info};

/// Where the lifecycle sends employee events.
///
/// `Err` means the sync could not even start (no connection, store unreachable); a sync
/// that ran and failed comes back as an unsuccessful [`SyncOutcome`].
pub trait SyncTarget {
    fn sync(
        &self,
        db: &HrStore,
        company_id: &str,
        employee_id: &str,
        event_name: &str,
        context: &EventContext,
    ) -> Result<SyncOutcome>;
}

/// Syncs against the company's active store connection through a [`SyncEngine`].
pub struct EngineSyncTarget {
    engine: SyncEngine,
    sheets: SheetsConfig,
    secrets: Box<dyn SecretResolver>,
}

impl EngineSyncTarget {
    pub fn new(engine: SyncEngine, sheets: SheetsConfig, secrets: Box<dyn SecretResolver>) -> Self {
        Self {
            engine,
            sheets,
            secrets,
        }
    }

    /// Wires the chat strategies in when a model is configured, deterministic ones otherwise.
    pub fn from_config(config: &HrSyncConfig) -> Result<Self> {
        let (analyzer, planner) = match ChatClient::from_config(&config.model)? {
            Some(client) => {
                info!(model = client.model(), "generative strategies enabled");
                (
                    SchemaAnalyzer::with_strategy(Arc::new(ChatSchemaStrategy::new(
                        client.clone(),
                    ))),
                    Planner::with_strategy(Arc::new(ChatPlanStrategy::new(client))),
                )
            }
            None => (SchemaAnalyzer::deterministic(), Planner::deterministic()),
        };
        let engine = SyncEngine::new(
            analyzer,
            planner,
            RetryController::new(config.sync.max_retries),
        );
        Ok(Self::new(
            engine,
            config.sheets.clone(),
            Box::new(EnvSecretResolver),
        ))
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn open_active_store(
        &self,
        db: &HrStore,
        company_id: &str,
    ) -> Result<(ConnectionRecord, Box<dyn RecordStore>)> {
        let connection = db
            .get_active_connection(company_id)?
            .ok_or_else(|| anyhow!("no active store connection for company {company_id}"))?;
        let kind = StoreKind::parse(&connection.kind)
            .ok_or_else(|| anyhow!("unsupported store kind {}", connection.kind))?;
        let ctx = StoreContext {
            connection_id: &connection.id,
            sheets: &self.sheets,
            secret_resolver: self.secrets.as_ref(),
        };
        let store = open_store(kind, &connection.config()?, &ctx)?;
        Ok((connection, store))
    }

    /// Re-derives the schema map from live headers and persists it.
    pub fn analyze(&self, db: &HrStore, company_id: &str) -> Result<SchemaMap> {
        let (connection, mut store) = self.open_active_store(db, company_id)?;
        let headers = store.refresh_headers()?;
        if headers.is_empty() {
            return Err(anyhow!("record store has no header row"));
        }
        let cache = self.engine.cache();
        cache.invalidate(&connection.id);
        let resolved = cache.resolve(&connection.id, &headers, self.engine.analyzer());
        db.save_schema_map(&connection.id, &resolved.map)?;
        Ok(resolved.map)
    }

    fn warm_cache(&self, connection: &ConnectionRecord) -> Result<()> {
        let cache = self.engine.cache();
        if cache.get(&connection.id).is_none()
            && let Some(map) = connection.schema_map()?
        {
            debug!(connection_id = %connection.id, "seeding schema cache from stored map");
            cache.seed(&connection.id, map);
        }
        Ok(())
    }
}

impl SyncTarget for EngineSyncTarget {
    fn sync(
        &self,
        db: &HrStore,
        company_id: &str,
        employee_id: &str,
        event_name: &str,
        context: &EventContext,
    ) -> Result<SyncOutcome> {
        let (connection, mut store) = self.open_active_store(db, company_id)?;
        self.warm_cache(&connection)?;
        let outcome = self.engine.sync(
            store.as_mut(),
            SyncRequest {
                connection_id: &connection.id,
                employee_id,
                event_name,
                context,
            },
        );
        if outcome.schema_refreshed
            && let Some(schema) = &outcome.schema
        {
            db.save_schema_map(&connection.id, schema)?;
        }
        Ok(outcome)
    }
}
