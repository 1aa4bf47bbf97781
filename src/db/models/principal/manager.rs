//! Manager for the principal model.
use async_trait::async_trait;

use crate::db::errors::StoreError;
use crate::db::DatabaseTransaction;

#[async_trait]
impl super::TxManager for DatabaseTransaction {
    /// Register a principal if it is not already registered.
    ///
    /// # Errors
    /// Errors if the principal cannot be inserted.
    async fn ensure_principal(&mut self, name: &str) -> Result<(), StoreError> {
        let statement = "
            INSERT INTO principals ( name )
            VALUES ( $1 )
            ON CONFLICT DO NOTHING
        ";
        sqlx::query(statement)
            .bind(name)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}
