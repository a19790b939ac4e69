//! Persistence layer: libSQL-backed storage for threads, jobs and planner nodes.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
