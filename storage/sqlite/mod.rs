pub mod connection;
pub mod query;
pub mod schema;

pub use connection::{ConnectionPool, PoolStatus};
pub use query::{bind_params, QueryBuilder, SqlParam};
pub use schema::{SchemaManager, SCHEMA_VERSION};
