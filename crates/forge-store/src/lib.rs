pub mod database;
pub mod error;
pub mod messages;
pub mod projects;
pub mod row_helpers;
pub mod schema;
pub mod users;

pub use database::Database;
pub use error::StoreError;
