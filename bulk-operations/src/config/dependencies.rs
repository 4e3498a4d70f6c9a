//! Dependency initialization and wiring for the command line tool.

use std::env;
use std::sync::Arc;

use bulk_operations_repository::{run_migrations, PostgresAuditSink, PostgresDocumentStore};
use tracing::info;

use super::settings::{bulk_config_from, caller_settings_from, rate_limit_config_from, CallerSettings};
use crate::errors::BulkError;
use crate::orchestrator::BulkOperationService;
use crate::queue::RateLimitQueue;

/// Default PostgreSQL connection string.
const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/bulk_operations";

fn lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured service, backed by PostgreSQL.
    pub service: Arc<BulkOperationService>,
    /// Queue shared by every operation of the service.
    pub queue: RateLimitQueue,
    /// Identity and flags of the current caller.
    pub caller: CallerSettings,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection string
    ///   (default: postgres://localhost:5432/bulk_operations)
    /// - `BULK_*`: see [`bulk_config_from`] and [`caller_settings_from`]
    /// - `RATE_LIMIT_*`: see [`rate_limit_config_from`]
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(BulkError)` - If the database is unreachable or cannot be migrated
    pub async fn new() -> Result<Self, BulkError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let config = bulk_config_from(lookup);
        let rate_limit = rate_limit_config_from(lookup);
        let caller = caller_settings_from(lookup);

        info!(
            max_batch_size = config.max_batch_size,
            delay_between_batches_ms = config.delay_between_batches.as_millis() as u64,
            failure_threshold = config.failure_threshold,
            audit_policy = ?config.audit_policy,
            rate_limit_enabled = rate_limit.enabled,
            max_concurrent = rate_limit.max_concurrent,
            caller_id = %caller.caller_id,
            "Initializing dependencies"
        );

        let store = PostgresDocumentStore::connect(&database_url)
            .await
            .map_err(|e| BulkError::config(format!("Failed to connect to PostgreSQL: {}", e)))?;

        run_migrations(store.pool())
            .await
            .map_err(|e| BulkError::config(format!("Failed to run migrations: {}", e)))?;

        info!("PostgreSQL connection established");

        let audit = PostgresAuditSink::new(store.pool().clone());
        let queue = RateLimitQueue::with_config(rate_limit);

        let service = BulkOperationService::with_config(
            Arc::new(store),
            Arc::new(queue.clone()),
            Arc::new(audit),
            config,
        );

        Ok(Self {
            service: Arc::new(service),
            queue,
            caller,
        })
    }
}
