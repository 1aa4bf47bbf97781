//! The principal model. The commit core only ever registers a creator
//! before inserting a commit that references it.
use async_trait::async_trait;

use crate::db::errors::StoreError;

pub mod manager;

/// Trait for managing transactional principals.
#[async_trait]
pub trait TxManager {
    /// Register a principal if it is not already registered.
    async fn ensure_principal(&mut self, name: &str) -> Result<(), StoreError>;
}
