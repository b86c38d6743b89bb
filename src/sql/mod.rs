//! SQL layer: the read-only validator and the SQLite execution target.

pub mod database;
pub mod validator;

pub use database::{Database, APP_PORTFOLIO_SCHEMA};
pub use validator::SqlValidator;
