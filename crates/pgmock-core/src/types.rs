use crate::error::PgMockError;
use serde::{Deserialize, Serialize};

/// Cancel key handed to a client in BackendKeyData.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub process_id: i32,
    pub secret_key: i32,
}

impl SessionKey {
    pub fn new(process_id: i32, secret_key: i32) -> Self {
        Self {
            process_id,
            secret_key,
        }
    }
}

/// PostgreSQL pg_type OIDs understood by the injection API.
pub mod type_oid {
    pub const BOOL: i32 = 16;
    pub const BYTEA: i32 = 17;
    pub const INT8: i32 = 20;
    pub const INT2: i32 = 21;
    pub const INT4: i32 = 23;
    pub const TEXT: i32 = 25;
    pub const FLOAT4: i32 = 700;
    pub const FLOAT8: i32 = 701;
    pub const VARCHAR: i32 = 1043;
}

/// One column of a canned result set, carried verbatim into RowDescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: i32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format_code: i16,
}

impl ColumnDescriptor {
    /// Text-format column not tied to any table.
    pub fn new(name: impl Into<String>, type_oid: i32, type_size: i16) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size,
            type_modifier: -1,
            format_code: 0,
        }
    }

    /// Create a column whose OID and size are inferred from a type name.
    pub fn with_type(name: impl Into<String>, data_type: &str) -> Result<Self, PgMockError> {
        let (oid, size) = data_type_to_oid(data_type).ok_or_else(|| {
            PgMockError::Validation(format!("unknown column type: {data_type}"))
        })?;
        Ok(Self::new(name, oid, size))
    }

    /// Parse the injection API's `name:type` column notation.
    pub fn parse(notation: &str) -> Result<Self, PgMockError> {
        let (name, data_type) = notation.split_once(':').ok_or_else(|| {
            PgMockError::Validation(format!("column must be written as name:type, got {notation:?}"))
        })?;
        if name.is_empty() {
            return Err(PgMockError::Validation(format!(
                "column name missing in {notation:?}"
            )));
        }
        Self::with_type(name, data_type)
    }
}

/// Map SQL data type string to PostgreSQL type OID (pg_type.oid) and typlen.
/// Returns None for types the mock cannot describe.
pub fn data_type_to_oid(data_type: &str) -> Option<(i32, i16)> {
    let upper = data_type.to_uppercase();
    let s = upper.trim();
    let described = match s {
        "INT2" | "SMALLINT" => (type_oid::INT2, 2),
        "INT" | "INTEGER" | "INT4" => (type_oid::INT4, 4),
        "BIGINT" | "INT8" => (type_oid::INT8, 8),
        "TEXT" => (type_oid::TEXT, -1),
        "VARCHAR" | "CHARACTER VARYING" => (type_oid::VARCHAR, -1),
        "BOOLEAN" | "BOOL" => (type_oid::BOOL, 1),
        "FLOAT4" | "REAL" => (type_oid::FLOAT4, 4),
        "FLOAT8" | "DOUBLE PRECISION" => (type_oid::FLOAT8, 8),
        "BYTEA" => (type_oid::BYTEA, -1),
        _ => return None,
    };
    Some(described)
}

/// A row of nilable column values in text format.
pub type Row = Vec<Option<Vec<u8>>>;

/// Result set returned for one fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
}

impl QueryResponse {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Rejects rows whose width differs from the column count.
    pub fn validate(&self) -> Result<(), PgMockError> {
        for (idx, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(PgMockError::Validation(format!(
                    "row {idx} has {} values but {} columns are declared",
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }
}
