//! Function metadata storage.
//!
//! The gateway only talks to [`FunctionStore`]; Redis backs it in production
//! and [`MemoryFunctionStore`] serves local development and tests.

use crate::types::{FunctionCreate, FunctionRecord, FunctionUpdate};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Function not found")]
    NotFound,

    #[error("Route already exists")]
    RouteExists,

    #[error("No fields to update")]
    NoFieldsToUpdate,

    #[error("Invalid function definition: {0}")]
    Invalid(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD by id over stored function definitions
#[async_trait]
pub trait FunctionStore: Send + Sync {
    async fn create(&self, function: FunctionCreate) -> StoreResult<u64>;

    async fn list(&self) -> StoreResult<Vec<FunctionRecord>>;

    async fn get(&self, id: u64) -> StoreResult<FunctionRecord>;

    async fn update(&self, id: u64, update: FunctionUpdate) -> StoreResult<()>;

    async fn delete(&self, id: u64) -> StoreResult<()>;

    /// Cheap liveness probe of the backing store
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    functions: BTreeMap<u64, FunctionRecord>,
}

/// Process-local store; contents are lost on restart
#[derive(Default)]
pub struct MemoryFunctionStore {
    state: RwLock<MemoryState>,
}

impl MemoryFunctionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FunctionStore for MemoryFunctionStore {
    async fn create(&self, function: FunctionCreate) -> StoreResult<u64> {
        function.validate().map_err(StoreError::Invalid)?;

        let mut state = self.state.write().await;
        if state.functions.values().any(|f| f.route == function.route) {
            return Err(StoreError::RouteExists);
        }

        state.next_id += 1;
        let id = state.next_id;
        let now = Utc::now();
        state.functions.insert(
            id,
            FunctionRecord {
                id,
                name: function.name,
                route: function.route,
                language: function.language,
                timeout: function.timeout,
                code: function.code,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn list(&self) -> StoreResult<Vec<FunctionRecord>> {
        let state = self.state.read().await;
        Ok(state.functions.values().cloned().collect())
    }

    async fn get(&self, id: u64) -> StoreResult<FunctionRecord> {
        let state = self.state.read().await;
        state.functions.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update(&self, id: u64, update: FunctionUpdate) -> StoreResult<()> {
        if update.is_empty() {
            return Err(StoreError::NoFieldsToUpdate);
        }
        update.validate().map_err(StoreError::Invalid)?;

        let mut state = self.state.write().await;
        if let Some(route) = &update.route {
            if state
                .functions
                .values()
                .any(|f| f.id != id && &f.route == route)
            {
                return Err(StoreError::RouteExists);
            }
        }

        let record = state.functions.get_mut(&id).ok_or(StoreError::NotFound)?;
        update.apply(record);
        Ok(())
    }

    async fn delete(&self, id: u64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .functions
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}
