//! Per-call options of the bulk operation entry points.

use std::sync::Arc;

use bulk_operations_shared::{BulkOperationProgress, Document};

use crate::tracker::ProgressCallback;

/// Caller-supplied document check. Returns `true` for valid documents.
pub type Validator = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

fn callback<F>(f: F) -> ProgressCallback
where
    F: Fn(&BulkOperationProgress) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn validator<F>(f: F) -> Validator
where
    F: Fn(&Document) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Options of [`bulk_update`](super::BulkOperationService::bulk_update).
#[derive(Clone, Default)]
pub struct UpdateOptions {
    pub caller_id: String,
    /// Runs on every update of a batch before it is written.
    pub validator: Option<Validator>,
    pub on_progress: Option<ProgressCallback>,
    /// Validate and simulate the writes without touching the store.
    pub dry_run: bool,
}

impl UpdateOptions {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            ..Self::default()
        }
    }

    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(validator(f));
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&BulkOperationProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(callback(f));
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Options of [`bulk_delete`](super::BulkOperationService::bulk_delete).
#[derive(Clone, Default)]
pub struct DeleteOptions {
    pub caller_id: String,
    /// Required for deletes above the confirmation threshold.
    pub confirmation_token: Option<String>,
    pub on_progress: Option<ProgressCallback>,
    /// Fetch the documents before deleting them and return them in the result.
    pub create_backup: bool,
}

impl DeleteOptions {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            ..Self::default()
        }
    }

    pub fn with_confirmation_token(mut self, token: impl Into<String>) -> Self {
        self.confirmation_token = Some(token.into());
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&BulkOperationProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(callback(f));
        self
    }

    pub fn with_backup(mut self) -> Self {
        self.create_backup = true;
        self
    }

    pub(crate) fn is_confirmed(&self) -> bool {
        self.confirmation_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

/// Options of [`bulk_create`](super::BulkOperationService::bulk_create).
#[derive(Clone, Default)]
pub struct CreateOptions {
    pub caller_id: String,
    /// Runs on every document before the operation starts.
    pub validator: Option<Validator>,
    pub on_progress: Option<ProgressCallback>,
    /// Drop documents identical to an earlier document of the same call.
    pub skip_duplicates: bool,
}

impl CreateOptions {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            ..Self::default()
        }
    }

    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(validator(f));
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&BulkOperationProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(callback(f));
        self
    }

    pub fn skip_duplicates(mut self) -> Self {
        self.skip_duplicates = true;
        self
    }
}

/// Options shared by every group of a [`submit`](super::BulkOperationService::submit) call.
#[derive(Clone, Default)]
pub struct OperationOptions {
    pub caller_id: String,
    pub confirmation_token: Option<String>,
    pub validator: Option<Validator>,
    pub on_progress: Option<ProgressCallback>,
    pub dry_run: bool,
    pub create_backup: bool,
    pub skip_duplicates: bool,
}

impl OperationOptions {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            ..Self::default()
        }
    }

    pub fn with_confirmation_token(mut self, token: impl Into<String>) -> Self {
        self.confirmation_token = Some(token.into());
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&BulkOperationProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(callback(f));
        self
    }

    pub fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            caller_id: self.caller_id.clone(),
            validator: self.validator.clone(),
            on_progress: self.on_progress.clone(),
            dry_run: self.dry_run,
        }
    }

    pub fn delete_options(&self) -> DeleteOptions {
        DeleteOptions {
            caller_id: self.caller_id.clone(),
            confirmation_token: self.confirmation_token.clone(),
            on_progress: self.on_progress.clone(),
            create_backup: self.create_backup,
        }
    }

    pub fn create_options(&self) -> CreateOptions {
        CreateOptions {
            caller_id: self.caller_id.clone(),
            validator: self.validator.clone(),
            on_progress: self.on_progress.clone(),
            skip_duplicates: self.skip_duplicates,
        }
    }
}
