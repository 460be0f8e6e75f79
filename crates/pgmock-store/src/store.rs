use anyhow::{Context, Result};
use pgmock_core::{PgMockError, QueryResponse, ResponseProvider};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Canned responses keyed by query fingerprint.
///
/// The table lives in memory behind its own lock. When opened on a directory,
/// every registration is also written to `<dir>/responses/<fingerprint>.json`
/// and reloaded on the next start.
#[derive(Debug, Default)]
pub struct ResponseStore {
    responses: RwLock<HashMap<String, QueryResponse>>,
    dir: Option<PathBuf>,
}

impl ResponseStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join("responses");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating response directory {}", dir.display()))?;
        let mut responses = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(fingerprint) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let contents = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            match serde_json::from_slice::<QueryResponse>(&contents) {
                Ok(response) => {
                    responses.insert(fingerprint.to_string(), response);
                }
                Err(err) => warn!(path = %path.display(), "skipping unreadable response: {err}"),
            }
        }
        info!(count = responses.len(), dir = %dir.display(), "loaded canned responses");
        Ok(Self {
            responses: RwLock::new(responses),
            dir: Some(dir),
        })
    }

    /// Inserts or overwrites the response for `fingerprint`.
    pub fn register(&self, fingerprint: &str, response: QueryResponse) -> Result<(), PgMockError> {
        validate_fingerprint(fingerprint)?;
        response.validate()?;
        if let Some(dir) = &self.dir {
            persist(dir, fingerprint, &response)?;
        }
        self.responses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fingerprint.to_string(), response);
        metrics::counter!("pgmock_responses_injected_total").increment(1);
        debug!(fingerprint, "registered canned response");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.responses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseProvider for ResponseStore {
    fn lookup(&self, fingerprint: &str) -> Result<QueryResponse, PgMockError> {
        self.responses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .cloned()
            .ok_or_else(|| PgMockError::Lookup(fingerprint.to_string()))
    }
}

// Fingerprints become file names, so only plain identifier characters pass.
fn validate_fingerprint(fingerprint: &str) -> Result<(), PgMockError> {
    let valid = !fingerprint.is_empty()
        && fingerprint.len() <= 128
        && fingerprint
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PgMockError::Validation(format!(
            "invalid fingerprint {fingerprint:?}"
        )))
    }
}

fn persist(dir: &Path, fingerprint: &str, response: &QueryResponse) -> Result<(), PgMockError> {
    let encoded = serde_json::to_vec_pretty(response)
        .map_err(|err| PgMockError::Storage(err.to_string()))?;
    let path = dir.join(format!("{fingerprint}.json"));
    let tmp = dir.join(format!("{fingerprint}.json.tmp"));
    std::fs::write(&tmp, encoded)
        .and_then(|()| std::fs::rename(&tmp, &path))
        .map_err(|err| {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), "leaving temporary response file: {cleanup}");
                }
            }
            PgMockError::Storage(format!("writing {}: {err}", path.display()))
        })
}
