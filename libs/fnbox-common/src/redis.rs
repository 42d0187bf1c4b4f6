use crate::store::{FunctionStore, StoreError, StoreResult};
use crate::types::{FunctionCreate, FunctionRecord, FunctionUpdate};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

/// Redis key layout for function metadata.
/// Keys are deterministic so the API and the CLI never drift.

pub const FUNCTION_PREFIX: &str = "fnbox:function";
pub const ROUTE_PREFIX: &str = "fnbox:route";
pub const FUNCTION_INDEX: &str = "fnbox:functions";
pub const NEXT_ID_KEY: &str = "fnbox:function:next_id";

/// Key holding the JSON record of a function
pub fn function_key(id: u64) -> String {
    format!("{}:{}", FUNCTION_PREFIX, id)
}

/// Key reserving a route for the function that owns it
pub fn route_key(route: &str) -> String {
    format!("{}:{}", ROUTE_PREFIX, route)
}

/// Redis-backed function store.
///
/// Route uniqueness is enforced by reserving `fnbox:route:{route}` with
/// `SET NX` before any record is written.
#[derive(Clone)]
pub struct RedisFunctionStore {
    conn: ConnectionManager,
}

impl RedisFunctionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    async fn load(conn: &mut ConnectionManager, id: u64) -> StoreResult<FunctionRecord> {
        let payload: Option<String> = conn.get(function_key(id)).await?;
        match payload {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(StoreError::NotFound),
        }
    }

    async fn save(conn: &mut ConnectionManager, record: &FunctionRecord) -> StoreResult<()> {
        let payload = serde_json::to_string(record)?;
        let _: () = conn.set(function_key(record.id), payload).await?;
        Ok(())
    }

    /// Give a freshly reserved route back when the write that follows it
    /// fails, so a retry is not blocked by our own reservation
    async fn release_route_on_error<T>(
        conn: &mut ConnectionManager,
        route: &str,
        result: StoreResult<T>,
    ) -> StoreResult<T> {
        if result.is_err() {
            if let Err(e) = conn.del::<_, ()>(route_key(route)).await {
                warn!(route = %route, error = %e, "Failed to release route reservation");
            }
        }
        result
    }

    async fn reserve_route(conn: &mut ConnectionManager, route: &str, id: u64) -> StoreResult<()> {
        let reserved: bool = conn.set_nx(route_key(route), id).await?;
        if reserved {
            Ok(())
        } else {
            Err(StoreError::RouteExists)
        }
    }
}

#[async_trait]
impl FunctionStore for RedisFunctionStore {
    async fn create(&self, function: FunctionCreate) -> StoreResult<u64> {
        function.validate().map_err(StoreError::Invalid)?;

        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(NEXT_ID_KEY, 1).await?;
        Self::reserve_route(&mut conn, &function.route, id).await?;

        let now = Utc::now();
        let record = FunctionRecord {
            id,
            name: function.name,
            route: function.route,
            language: function.language,
            timeout: function.timeout,
            code: function.code,
            created_at: now,
            updated_at: now,
        };

        let saved = Self::save(&mut conn, &record).await;
        Self::release_route_on_error(&mut conn, &record.route, saved).await?;
        let _: () = conn.sadd(FUNCTION_INDEX, id).await?;

        Ok(id)
    }

    async fn list(&self) -> StoreResult<Vec<FunctionRecord>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<u64> = conn.smembers(FUNCTION_INDEX).await?;
        ids.sort_unstable();

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match Self::load(&mut conn, id).await {
                Ok(record) => records.push(record),
                // Deleted between SMEMBERS and GET
                Err(StoreError::NotFound) => {
                    warn!(function_id = id, "Indexed function has no record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    async fn get(&self, id: u64) -> StoreResult<FunctionRecord> {
        let mut conn = self.conn.clone();
        Self::load(&mut conn, id).await
    }

    async fn update(&self, id: u64, update: FunctionUpdate) -> StoreResult<()> {
        if update.is_empty() {
            return Err(StoreError::NoFieldsToUpdate);
        }
        update.validate().map_err(StoreError::Invalid)?;

        let mut conn = self.conn.clone();
        let mut record = Self::load(&mut conn, id).await?;
        let old_route = record.route.clone();

        let new_route = update.route.clone().filter(|route| *route != old_route);
        if let Some(route) = &new_route {
            Self::reserve_route(&mut conn, route, id).await?;
        }

        update.apply(&mut record);
        let saved = Self::save(&mut conn, &record).await;
        if let Some(route) = &new_route {
            Self::release_route_on_error(&mut conn, route, saved).await?;
        } else {
            saved?;
        }

        if new_route.is_some() {
            let _: () = conn.del(route_key(&old_route)).await?;
        }
        Ok(())
    }

    async fn delete(&self, id: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let record = Self::load(&mut conn, id).await?;

        let _: () = redis::pipe()
            .atomic()
            .del(function_key(id))
            .ignore()
            .del(route_key(&record.route))
            .ignore()
            .srem(FUNCTION_INDEX, id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
