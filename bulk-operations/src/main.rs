//! Bulk Operations Main Entry Point
//!
//! Runs one bulk operation against PostgreSQL and prints the result as JSON.
//!
//! Usage: `bulk-operations <create|update|delete> <collection> <json-file>`
//!
//! The file holds a JSON array of documents (create), of
//! `{ "document_id", "data" }` objects (update) or of document ids (delete).

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use bulk_operations::{BulkError, BulkOperationService, Dependencies, OperationOptions};
use bulk_operations_shared::{BulkOperationResult, Document, DocumentUpdate};
use dotenv::dotenv;
use serde::de::DeserializeOwned;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: bulk-operations <create|update|delete> <collection> <json-file>";

#[derive(Debug, Clone, Copy)]
enum Command {
    Create,
    Update,
    Delete,
}

impl FromStr for Command {
    type Err = BulkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(BulkError::invalid_argument(format!(
                "unknown command '{}'. {}",
                other, USAGE
            ))),
        }
    }
}

/// Initialize tracing/logging.
fn init_tracing() -> Result<(), BulkError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("bulk_operations=info,bulk_operations_repository=info")
    });

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| BulkError::config(format!("Failed to initialize tracing: {}", e)))?;

        info!(
            service_name = "bulk-operations",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        // Logs go to stderr, stdout carries the result.
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| BulkError::config(format!("Failed to initialize tracing: {}", e)))?;

        info!(
            service_name = "bulk-operations",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }

    Ok(())
}

fn parse_payload<T: DeserializeOwned>(payload: &str) -> Result<Vec<T>, BulkError> {
    serde_json::from_str(payload)
        .map_err(|e| BulkError::invalid_argument(format!("Invalid input file: {}", e)))
}

async fn run_command(
    service: Arc<BulkOperationService>,
    command: Command,
    collection: String,
    payload: String,
    options: OperationOptions,
) -> Result<BulkOperationResult, BulkError> {
    match command {
        Command::Create => {
            let documents: Vec<Document> = parse_payload(&payload)?;
            service
                .bulk_create(&collection, documents, options.create_options())
                .await
        }
        Command::Update => {
            let updates: Vec<DocumentUpdate> = parse_payload(&payload)?;
            service
                .bulk_update(&collection, updates, options.update_options())
                .await
        }
        Command::Delete => {
            let ids: Vec<String> = parse_payload(&payload)?;
            service
                .bulk_delete(&collection, ids, options.delete_options())
                .await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BulkError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing()?;

    let args: Vec<String> = env::args().skip(1).collect();
    let [command, collection, path] = args.as_slice() else {
        return Err(BulkError::invalid_argument(USAGE));
    };
    let command: Command = command.parse()?;
    let payload = std::fs::read_to_string(path).map_err(|e| {
        BulkError::invalid_argument(format!("Failed to read {}: {}", path, e))
    })?;

    info!(command = ?command, collection = %collection, "Starting bulk operation");

    let deps = match Dependencies::new().await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    let mut task = tokio::spawn(run_command(
        Arc::clone(&deps.service),
        command,
        collection.clone(),
        payload,
        deps.caller.operation_options(),
    ));

    let finished = tokio::select! {
        joined = &mut task => Some(joined),
        _ = signal::ctrl_c() => None,
    };

    let joined = match finished {
        Some(joined) => joined,
        None => {
            warn!("Interrupted, cancelling active operations");
            for progress in deps.service.get_active_operations() {
                if let Err(e) = deps
                    .service
                    .cancel_operation(&progress.operation_id, &deps.caller.caller_id)
                    .await
                {
                    warn!(operation_id = %progress.operation_id, error = %e, "Failed to cancel operation");
                }
            }
            // Batches already queued still run to completion.
            task.await
        }
    };

    let metrics = deps.queue.metrics();
    info!(
        total_requests = metrics.total_requests,
        blocked_requests = metrics.blocked_requests,
        average_response_ms = metrics.average_response_time.as_millis() as u64,
        "Queue metrics"
    );

    let result = joined
        .map_err(|e| BulkError::batch_execution(format!("Operation task failed: {}", e)))?;

    match result {
        Ok(result) => {
            let output = serde_json::to_string_pretty(&result)
                .map_err(|e| BulkError::config(format!("Failed to serialize result: {}", e)))?;
            println!("{}", output);
            info!(
                operation_id = %result.operation_id,
                processed = result.processed_count,
                errors = result.error_count,
                "Bulk operation completed"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Bulk operation failed");
            if let Some(backup) = e.backup() {
                let output = serde_json::to_string_pretty(backup)
                    .map_err(|e| BulkError::config(format!("Failed to serialize backup: {}", e)))?;
                println!("{}", output);
                warn!(documents = backup.len(), "Delete aborted, backup written to stdout");
            }
            Err(e)
        }
    }
}
