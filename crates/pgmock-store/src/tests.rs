#[cfg(test)]
mod tests {
    use crate::store::ResponseStore;
    use pgmock_core::{fingerprint, ColumnDescriptor, PgMockError, QueryResponse, ResponseProvider};
    use tempfile::TempDir;

    fn one_row_response() -> QueryResponse {
        QueryResponse::new(
            vec![
                ColumnDescriptor::parse("id:int4").expect("id"),
                ColumnDescriptor::parse("name:text").expect("name"),
            ],
            vec![vec![Some(b"1".to_vec()), None]],
        )
    }

    #[test]
    fn register_then_lookup() {
        let store = ResponseStore::in_memory();
        let hash = fingerprint("SELECT id, name FROM users");
        store
            .register(&hash, one_row_response())
            .expect("register");
        assert_eq!(store.lookup(&hash).expect("lookup"), one_row_response());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lookup_miss_is_lookup_error() {
        let store = ResponseStore::in_memory();
        assert!(store.is_empty());
        assert!(matches!(
            store.lookup("ABSENT"),
            Err(PgMockError::Lookup(hash)) if hash == "ABSENT"
        ));
    }

    #[test]
    fn register_overwrites_existing_response() {
        let store = ResponseStore::in_memory();
        let hash = fingerprint("SELECT 1");
        store
            .register(&hash, one_row_response())
            .expect("first");
        store
            .register(&hash, QueryResponse::default())
            .expect("second");
        assert_eq!(store.lookup(&hash).expect("lookup"), QueryResponse::default());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn register_rejects_bad_input() {
        let store = ResponseStore::in_memory();
        assert!(matches!(
            store.register("../escape", QueryResponse::default()),
            Err(PgMockError::Validation(_))
        ));
        let ragged = QueryResponse::new(
            vec![ColumnDescriptor::parse("id:int4").expect("id")],
            vec![vec![None, None]],
        );
        assert!(matches!(
            store.register("ABC", ragged),
            Err(PgMockError::Validation(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn responses_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let hash = fingerprint("SELECT id, name FROM users");
        {
            let store = ResponseStore::open(dir.path()).expect("open");
            store
                .register(&hash, one_row_response())
                .expect("register");
        }
        assert!(dir.path().join("responses").join(format!("{hash}.json")).exists());

        let reopened = ResponseStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.lookup(&hash).expect("lookup"), one_row_response());
    }

    #[test]
    fn failed_persist_leaves_no_temporary_file() {
        let dir = TempDir::new().expect("tempdir");
        let store = ResponseStore::open(dir.path()).expect("open");
        let responses = dir.path().join("responses");
        // A directory in the way makes the final rename fail.
        std::fs::create_dir(responses.join("BLOCKED.json")).expect("dir");

        assert!(matches!(
            store.register("BLOCKED", one_row_response()),
            Err(PgMockError::Storage(_))
        ));
        assert!(!responses.join("BLOCKED.json.tmp").exists());
        assert!(store.lookup("BLOCKED").is_err());
        assert!(ResponseStore::open(dir.path()).expect("reopen").is_empty());
    }

    #[test]
    fn open_skips_unreadable_documents() {
        let dir = TempDir::new().expect("tempdir");
        let responses = dir.path().join("responses");
        std::fs::create_dir_all(&responses).expect("dir");
        std::fs::write(responses.join("BROKEN.json"), b"{not json").expect("write");
        std::fs::write(responses.join("notes.txt"), b"ignored").expect("write");

        let store = ResponseStore::open(dir.path()).expect("open");
        assert!(store.is_empty());
    }
}
