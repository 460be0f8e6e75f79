use crate::error::PgMockError;
use crate::types::QueryResponse;
use sha1::{Digest, Sha1};

/// Source of canned answers for simple queries.
///
/// Implementations are shared between every session and the injection API, so
/// they guard their own state.
pub trait ResponseProvider: Send + Sync {
    /// Returns the response registered for `fingerprint`, or
    /// [`PgMockError::Lookup`] when nothing was registered.
    fn lookup(&self, fingerprint: &str) -> Result<QueryResponse, PgMockError>;
}

/// Content fingerprint of a query: uppercase hex SHA-1 of the raw SQL bytes.
pub fn fingerprint(sql: &str) -> String {
    Sha1::digest(sql.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect()
}
