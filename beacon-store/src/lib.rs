//! Postgres implementations of the store traits in `beacon_core::store`,
//! built on diesel-async over a deadpool connection pool.

pub mod notifications;
pub mod permissions;
pub mod presence;
pub mod subscriptions;

use std::sync::Arc;

use beacon_core::db::{DbConnection, DbPool};
use beacon_core::StoreError;

pub use permissions::permission_matrix;

#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        PgStore { pool }
    }

    pub(crate) async fn conn(&self) -> Result<DbConnection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}
