//! Persistence layer — SQLite-backed storage for configs, tours, steps,
//! progress, and analytics.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::Store;
