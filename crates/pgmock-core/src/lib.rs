pub mod error;
pub mod provider;
pub mod types;

pub use error::PgMockError;
pub use provider::{fingerprint, ResponseProvider};
pub use types::{data_type_to_oid, type_oid, ColumnDescriptor, QueryResponse, Row, SessionKey};

#[cfg(test)]
mod tests;
