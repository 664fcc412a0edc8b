pub mod auth;
pub mod config;
pub mod error;
pub mod reader;
pub mod rows;
pub mod storage;

pub use auth::credentials::ServiceAccountKey;
pub use auth::token::TokenProvider;
pub use error::BqStreamError;
pub use reader::{ReadSummary, TableReader};
pub use storage::types::TableReference;
