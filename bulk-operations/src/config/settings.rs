//! Settings parsed from environment variables.
//!
//! Every reader takes a lookup function so the parsing can be exercised
//! without touching the process environment. Invalid values fall back to the
//! default with a warning.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::orchestrator::{AuditPolicy, BulkConfig, OperationOptions};
use crate::queue::RateLimitConfig;

/// Caller id used when `BULK_CALLER_ID` is not set.
pub const DEFAULT_CALLER_ID: &str = "bulk-operations-cli";

fn parse_or<T, L>(lookup: &L, key: &str, default: T) -> T
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Invalid value, using default");
                default
            }
        },
    }
}

fn flag_or<L>(lookup: &L, key: &str, default: bool) -> bool
where
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                warn!(key, value = %raw, "Invalid flag, using default");
                default
            }
        },
    }
}

fn millis_or<L>(lookup: &L, key: &str, default: Duration) -> Duration
where
    L: Fn(&str) -> Option<String>,
{
    Duration::from_millis(parse_or(lookup, key, default.as_millis() as u64))
}

/// Orchestrator configuration.
///
/// # Environment Variables
///
/// - `BULK_MAX_BATCH_SIZE`: Items per batch, greater than zero (default: 500)
/// - `BULK_DELAY_BETWEEN_BATCHES`: Pause between batches in ms (default: 1000)
/// - `BULK_TIMEOUT_PER_BATCH`: Queue admission timeout in ms (default: 30000)
/// - `BULK_ENABLE_PROGRESS_TRACKING`: Track active operations (default: true)
/// - `BULK_FAILURE_THRESHOLD`: Failed fraction that aborts, 0 to 1 (default: 0.5)
/// - `BULK_AUDIT_POLICY`: "best-effort" or "required" (default: best-effort)
pub fn bulk_config_from<L>(lookup: L) -> BulkConfig
where
    L: Fn(&str) -> Option<String>,
{
    let defaults = BulkConfig::default();

    let mut max_batch_size = parse_or(&lookup, "BULK_MAX_BATCH_SIZE", defaults.max_batch_size);
    if max_batch_size == 0 {
        warn!("BULK_MAX_BATCH_SIZE must be greater than zero, using default");
        max_batch_size = defaults.max_batch_size;
    }

    let mut failure_threshold =
        parse_or(&lookup, "BULK_FAILURE_THRESHOLD", defaults.failure_threshold);
    if !(0.0..=1.0).contains(&failure_threshold) {
        warn!(failure_threshold, "BULK_FAILURE_THRESHOLD out of range, using default");
        failure_threshold = defaults.failure_threshold;
    }

    let audit_policy = match lookup("BULK_AUDIT_POLICY") {
        None => defaults.audit_policy,
        Some(raw) => AuditPolicy::parse(&raw).unwrap_or_else(|| {
            warn!(value = %raw, "Invalid BULK_AUDIT_POLICY, defaulting to 'best-effort'");
            AuditPolicy::BestEffort
        }),
    };

    BulkConfig {
        max_batch_size,
        delay_between_batches: millis_or(
            &lookup,
            "BULK_DELAY_BETWEEN_BATCHES",
            defaults.delay_between_batches,
        ),
        timeout_per_batch: millis_or(&lookup, "BULK_TIMEOUT_PER_BATCH", defaults.timeout_per_batch),
        enable_progress_tracking: flag_or(
            &lookup,
            "BULK_ENABLE_PROGRESS_TRACKING",
            defaults.enable_progress_tracking,
        ),
        failure_threshold,
        audit_policy,
        ..defaults
    }
}

/// Rate limit configuration.
///
/// # Environment Variables
///
/// - `RATE_LIMIT_ENABLED`: Apply window checks (default: true)
/// - `RATE_LIMIT_WINDOW_MS`: Sliding window length (default: 60000)
/// - `RATE_LIMIT_MAX_REQUESTS`: Admissions per window and key (default: 100)
/// - `RATE_LIMIT_MAX_CONCURRENT`: Works in flight per key (default: 10)
/// - `RATE_LIMIT_BLOCK_DURATION`: Block time in ms after exceeding (default: 300000)
/// - `RATE_LIMIT_WHITELIST`: Comma separated keys exempt from window checks
/// - `RATE_LIMIT_SKIP_SUCCESSFUL`: Drop successful works from the window (default: false)
pub fn rate_limit_config_from<L>(lookup: L) -> RateLimitConfig
where
    L: Fn(&str) -> Option<String>,
{
    let defaults = RateLimitConfig::default();

    let mut max_concurrent =
        parse_or(&lookup, "RATE_LIMIT_MAX_CONCURRENT", defaults.max_concurrent);
    if max_concurrent == 0 {
        warn!("RATE_LIMIT_MAX_CONCURRENT must be greater than zero, using default");
        max_concurrent = defaults.max_concurrent;
    }

    let whitelist: HashSet<String> = lookup("RATE_LIMIT_WHITELIST")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    RateLimitConfig {
        enabled: flag_or(&lookup, "RATE_LIMIT_ENABLED", defaults.enabled),
        window: millis_or(&lookup, "RATE_LIMIT_WINDOW_MS", defaults.window),
        max_requests: parse_or(&lookup, "RATE_LIMIT_MAX_REQUESTS", defaults.max_requests),
        max_concurrent,
        block_duration: millis_or(&lookup, "RATE_LIMIT_BLOCK_DURATION", defaults.block_duration),
        whitelist,
        skip_successful: flag_or(
            &lookup,
            "RATE_LIMIT_SKIP_SUCCESSFUL",
            defaults.skip_successful,
        ),
    }
}

/// Per-run options of the command line tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerSettings {
    pub caller_id: String,
    pub confirmation_token: Option<String>,
    pub dry_run: bool,
    pub create_backup: bool,
    pub skip_duplicates: bool,
}

impl CallerSettings {
    /// Options for [`submit`](crate::BulkOperationService::submit) and the
    /// single-kind entry points.
    pub fn operation_options(&self) -> OperationOptions {
        OperationOptions {
            caller_id: self.caller_id.clone(),
            confirmation_token: self.confirmation_token.clone(),
            dry_run: self.dry_run,
            create_backup: self.create_backup,
            skip_duplicates: self.skip_duplicates,
            ..OperationOptions::default()
        }
    }
}

/// Caller settings.
///
/// # Environment Variables
///
/// - `BULK_CALLER_ID`: Identity recorded in audit events (default: bulk-operations-cli)
/// - `BULK_CONFIRMATION_TOKEN`: Confirms deletes above the threshold
/// - `BULK_DRY_RUN`: Simulate updates without writing (default: false)
/// - `BULK_CREATE_BACKUP`: Back up documents before deleting (default: false)
/// - `BULK_SKIP_DUPLICATES`: Drop duplicate documents on create (default: false)
pub fn caller_settings_from<L>(lookup: L) -> CallerSettings
where
    L: Fn(&str) -> Option<String>,
{
    CallerSettings {
        caller_id: lookup("BULK_CALLER_ID")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CALLER_ID.to_string()),
        confirmation_token: lookup("BULK_CONFIRMATION_TOKEN").filter(|t| !t.trim().is_empty()),
        dry_run: flag_or(&lookup, "BULK_DRY_RUN", false),
        create_backup: flag_or(&lookup, "BULK_CREATE_BACKUP", false),
        skip_duplicates: flag_or(&lookup, "BULK_SKIP_DUPLICATES", false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_bulk_config_defaults() {
        assert_eq!(bulk_config_from(env(&[])), BulkConfig::default());
    }

    #[test]
    fn test_bulk_config_overrides() {
        let config = bulk_config_from(env(&[
            ("BULK_MAX_BATCH_SIZE", "50"),
            ("BULK_DELAY_BETWEEN_BATCHES", "0"),
            ("BULK_TIMEOUT_PER_BATCH", "5000"),
            ("BULK_ENABLE_PROGRESS_TRACKING", "false"),
            ("BULK_FAILURE_THRESHOLD", "0.25"),
            ("BULK_AUDIT_POLICY", "Required"),
        ]));

        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.delay_between_batches, Duration::ZERO);
        assert_eq!(config.timeout_per_batch, Duration::from_secs(5));
        assert!(!config.enable_progress_tracking);
        assert_eq!(config.failure_threshold, 0.25);
        assert_eq!(config.audit_policy, AuditPolicy::Required);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = bulk_config_from(env(&[
            ("BULK_MAX_BATCH_SIZE", "0"),
            ("BULK_DELAY_BETWEEN_BATCHES", "soon"),
            ("BULK_FAILURE_THRESHOLD", "1.5"),
            ("BULK_AUDIT_POLICY", "sometimes"),
            ("BULK_ENABLE_PROGRESS_TRACKING", "maybe"),
        ]));

        assert_eq!(config, BulkConfig::default());
    }

    #[test]
    fn test_rate_limit_config() {
        let config = rate_limit_config_from(env(&[
            ("RATE_LIMIT_ENABLED", "0"),
            ("RATE_LIMIT_WINDOW_MS", "1000"),
            ("RATE_LIMIT_MAX_REQUESTS", "5"),
            ("RATE_LIMIT_MAX_CONCURRENT", "2"),
            ("RATE_LIMIT_WHITELIST", "bulk-update-admin, ,bulk-delete-admin"),
            ("RATE_LIMIT_SKIP_SUCCESSFUL", "yes"),
        ]));

        assert!(!config.enabled);
        assert_eq!(config.window, Duration::from_secs(1));
        assert_eq!(config.max_requests, 5);
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.block_duration, Duration::from_secs(300));
        assert_eq!(config.whitelist.len(), 2);
        assert!(config.whitelist.contains("bulk-delete-admin"));
        assert!(config.skip_successful);
    }

    #[test]
    fn test_caller_settings() {
        let settings = caller_settings_from(env(&[]));
        assert_eq!(settings.caller_id, DEFAULT_CALLER_ID);
        assert_eq!(settings.confirmation_token, None);
        assert!(!settings.dry_run);

        let settings = caller_settings_from(env(&[
            ("BULK_CALLER_ID", "pastor-joao"),
            ("BULK_CONFIRMATION_TOKEN", "confirm-123"),
            ("BULK_CREATE_BACKUP", "true"),
        ]));
        let options = settings.operation_options();
        assert_eq!(options.caller_id, "pastor-joao");
        assert_eq!(options.confirmation_token.as_deref(), Some("confirm-123"));
        assert!(options.create_backup);
        assert!(!options.skip_duplicates);
    }
}
