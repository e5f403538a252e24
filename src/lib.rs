pub mod auth;
pub mod client;
pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod payload;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
