//! Atomic snapshot store with copy-on-write reload

use crate::error::ConstitutionError;
use crate::model::{Constitution, ConstitutionSnapshot};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide owner of the active constitution.
///
/// `snapshot()` clones an `Arc` under a read lock held for a pointer copy;
/// readers never wait on a reload in progress. Writers validate the new
/// bundle completely before swapping, so the active snapshot is always
/// valid.
pub struct ConstitutionStore {
    current: RwLock<Arc<ConstitutionSnapshot>>,
}

impl ConstitutionStore {
    /// Create a store from an initial bundle.
    pub fn new(constitution: Constitution) -> Result<Self, ConstitutionError> {
        let snapshot = ConstitutionSnapshot::seal(constitution)?;
        info!(
            version = snapshot.version(),
            fingerprint = %snapshot.fingerprint(),
            "Constitution loaded"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Create a store with the built-in baseline bundle.
    pub fn baseline() -> Self {
        // The baseline is validated by its own tests; seal cannot fail here.
        match Self::new(Constitution::baseline()) {
            Ok(store) => store,
            Err(err) => unreachable!("baseline constitution failed validation: {err}"),
        }
    }

    /// Load the initial bundle from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConstitutionError> {
        let text = std::fs::read_to_string(path)?;
        Self::new(Constitution::from_toml(&text)?)
    }

    /// Capture the active snapshot.
    pub fn snapshot(&self) -> Arc<ConstitutionSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Swap in a new bundle. Versions must be strictly increasing; a
    /// rejected bundle leaves the previous snapshot active.
    pub fn reload(&self, constitution: Constitution) -> Result<(), ConstitutionError> {
        let offered = constitution.version;
        let current_version = self.current.read().version();
        if offered <= current_version {
            warn!(
                current = current_version,
                offered, "Constitution reload rejected: non-monotonic version"
            );
            return Err(ConstitutionError::NonMonotonicVersion {
                current: current_version,
                offered,
            });
        }

        let snapshot = ConstitutionSnapshot::seal(constitution)?;
        info!(
            version = snapshot.version(),
            fingerprint = %snapshot.fingerprint(),
            "Constitution reloaded"
        );
        *self.current.write() = Arc::new(snapshot);
        Ok(())
    }

    /// Reload from a TOML file.
    pub fn reload_file(&self, path: impl AsRef<Path>) -> Result<(), ConstitutionError> {
        let text = std::fs::read_to_string(path)?;
        self.reload(Constitution::from_toml(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_reload() {
        let store = ConstitutionStore::baseline();
        let captured = store.snapshot();

        let mut next = Constitution::baseline();
        next.version = 2;
        next.thresholds.poav_pass = 0.80;
        store.reload(next).unwrap();

        // The captured snapshot is unchanged; new readers see version 2.
        assert_eq!(captured.version(), 1);
        assert_eq!(captured.thresholds().poav_pass, 0.70);
        assert_eq!(store.snapshot().version(), 2);
        assert_eq!(store.snapshot().thresholds().poav_pass, 0.80);
    }

    #[test]
    fn non_monotonic_reload_rejected() {
        let store = ConstitutionStore::baseline();
        let same_version = Constitution::baseline();
        assert!(matches!(
            store.reload(same_version),
            Err(ConstitutionError::NonMonotonicVersion { .. })
        ));
        assert_eq!(store.snapshot().version(), 1);
    }

    #[test]
    fn invalid_reload_keeps_previous_snapshot() {
        let store = ConstitutionStore::baseline();
        let mut bad = Constitution::baseline();
        bad.version = 2;
        bad.rules.retain(|r| r.id != "harm");
        assert!(store.reload(bad).is_err());
        assert_eq!(store.snapshot().version(), 1);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constitution.toml");
        std::fs::write(
            &path,
            r#"
                version = 7

                [[rules]]
                id = "harm"
                priority = "P0"
                domain = "harm"

                [[domains]]
                name = "harm"
                keywords = ["bomb"]
                weight = 1.0
                presence_floor = 0.3
            "#,
        )
        .unwrap();

        let store = ConstitutionStore::from_file(&path).unwrap();
        assert_eq!(store.snapshot().version(), 7);
    }
}
