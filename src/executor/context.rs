//! Query context for cursors
//!
//! Everything a cursor needs from its surroundings: the storage adapter,
//! the schema its row types live in, execution settings, and the
//! cancellation/timeout state checked at the start of every `next()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::storage::StoreAdapter;

use super::bindings::QueryBindings;
use super::config::ExecutionConfig;
use super::error::{ExecutorError, ExecutorResult};
use super::row_type::Schema;

/// Shareable switch for canceling a running query
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Query context passed to every cursor
pub struct QueryContext {
    adapter: Arc<dyn StoreAdapter>,
    schema: Arc<Schema>,
    config: ExecutionConfig,
    session_id: u64,
    started: Instant,
    deadline: Option<Instant>,
    cancel: CancelHandle,
}

impl QueryContext {
    pub fn new(adapter: Arc<dyn StoreAdapter>, schema: Arc<Schema>, config: ExecutionConfig) -> Self {
        let started = Instant::now();
        let deadline = config.query_timeout.map(|t| started + t);
        Self {
            adapter,
            schema,
            config,
            session_id: 0,
            started,
            deadline,
            cancel: CancelHandle::default(),
        }
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn adapter(&self) -> &Arc<dyn StoreAdapter> {
        &self.adapter
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Wall-clock time, for expressions that need "now"
    pub fn current_time(&self) -> SystemTime {
        SystemTime::now()
    }

    pub fn start_time(&self) -> Instant {
        self.started
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Fail if the query was canceled or ran past its timeout
    pub fn check_query_cancelation(&self) -> ExecutorResult<()> {
        if self.cancel.is_canceled() {
            return Err(ExecutorError::QueryCanceled);
        }
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(ExecutorError::QueryTimedOut {
                    elapsed: now.duration_since(self.started),
                });
            }
        }
        Ok(())
    }

    /// Start a fresh bindings tree
    pub fn create_bindings(&self) -> QueryBindings {
        QueryBindings::new()
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
