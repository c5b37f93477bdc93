use sqlx::PgPool;
use std::sync::Arc;

use crate::db::image_queries::PgRecordStore;
use crate::services::{queue::RequestQueue, storage::ObjectStorage};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub records: PgRecordStore,
    pub storage: Arc<ObjectStorage>,
    pub queue: Arc<RequestQueue>,
}

impl AppState {
    pub fn new(db: PgPool, storage: ObjectStorage, queue: RequestQueue) -> Self {
        Self {
            records: PgRecordStore::new(db.clone()),
            db,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
        }
    }
}
