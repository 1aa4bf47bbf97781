//! This module contains all the sqlx structs for the database tables.

/// sqlx structs for the `branches` table.
pub mod branch;
/// sqlx structs for the `commits` and `commit_ancestry` tables.
pub mod commit;
/// sqlx structs for the `principals` table.
pub mod principal;
/// sqlx structs for the `projects` table.
pub mod project;
/// sqlx structs for the `commit_provenance` table.
pub mod provenance;
/// sqlx structs for the `repos` table.
pub mod repo;

/// Size of the batch for bulk inserts.
pub(crate) const BATCH_SIZE: usize = 1000;
