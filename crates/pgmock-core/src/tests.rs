#[cfg(test)]
mod tests {
    use crate::provider::fingerprint;
    use crate::types::{type_oid, ColumnDescriptor, QueryResponse};
    use crate::PgMockError;

    #[test]
    fn fingerprint_is_uppercase_sha1() {
        let hash = fingerprint("SELECT 1");
        assert_eq!(hash.len(), 40);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        assert_eq!(hash, "42364A017B73EF516A0ECA9827E6FA00623257EE");
        assert_eq!(fingerprint(""), "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709");
    }

    #[test]
    fn fingerprint_depends_on_exact_text() {
        assert_eq!(fingerprint("SELECT 1"), fingerprint("SELECT 1"));
        assert_ne!(fingerprint("SELECT 1"), fingerprint("select 1"));
        assert_ne!(fingerprint("SELECT 1"), fingerprint("SELECT 1;"));
    }

    #[test]
    fn column_spec_parses_name_and_type() {
        let column = ColumnDescriptor::parse("id:int4").expect("parse");
        assert_eq!(column.name, "id");
        assert_eq!(column.type_oid, type_oid::INT4);
        assert_eq!(column.type_size, 4);
        assert_eq!(column.format_code, 0);

        let column = ColumnDescriptor::parse("name:TEXT").expect("parse");
        assert_eq!(column.type_oid, type_oid::TEXT);
        assert_eq!(column.type_size, -1);
    }

    #[test]
    fn column_spec_rejects_bad_input() {
        assert!(matches!(
            ColumnDescriptor::parse("id"),
            Err(PgMockError::Validation(_))
        ));
        assert!(matches!(
            ColumnDescriptor::parse(":int4"),
            Err(PgMockError::Validation(_))
        ));
        assert!(matches!(
            ColumnDescriptor::parse("id:geometry"),
            Err(PgMockError::Validation(_))
        ));
    }

    #[test]
    fn response_rows_must_match_columns() {
        let columns = vec![ColumnDescriptor::parse("id:int4").expect("parse")];
        let ok = QueryResponse::new(columns.clone(), vec![vec![Some(b"1".to_vec())]]);
        assert!(ok.validate().is_ok());
        let bad = QueryResponse::new(columns, vec![vec![None, None]]);
        assert!(bad.validate().is_err());
    }
}
