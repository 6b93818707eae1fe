use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::document::{parse_config_document, ConfigDiagnostic};
use super::hashing::fingerprint_bytes;
use super::ConfigSnapshot;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Malformed(#[from] ConfigDiagnostic),
}

#[derive(Debug)]
pub enum ReloadOutcome {
    Unchanged,
    Reloaded {
        region_count: usize,
        diagnostics: Vec<ConfigDiagnostic>,
    },
    /// The previous snapshot stays in effect.
    Failed(ConfigError),
}

/// Owns the current configuration snapshot; readers hold cheap `Arc` clones
/// that stay valid across a reload.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    snapshot: Arc<ConfigSnapshot>,
    fingerprint: Option<String>,
}

impl ConfigStore {
    pub fn builtin() -> Self {
        Self {
            path: None,
            snapshot: Arc::new(ConfigSnapshot::default()),
            fingerprint: None,
        }
    }

    pub fn from_snapshot(snapshot: ConfigSnapshot) -> Self {
        Self {
            path: None,
            snapshot: Arc::new(snapshot),
            fingerprint: None,
        }
    }

    /// Loads `path`, falling back to built-in defaults when the file is
    /// missing or unreadable. Never fails.
    pub fn load(path: &Path) -> Self {
        let mut store = Self::builtin();
        store.path = Some(path.to_path_buf());
        match store.reload() {
            ReloadOutcome::Failed(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "config_load_failed_using_defaults"
                );
            }
            ReloadOutcome::Unchanged | ReloadOutcome::Reloaded { .. } => {}
        }
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn replace(&mut self, snapshot: ConfigSnapshot) {
        self.snapshot = Arc::new(snapshot);
        self.fingerprint = None;
    }

    /// Re-reads the backing file and swaps the snapshot when its content changed.
    pub fn reload(&mut self) -> ReloadOutcome {
        let Some(path) = self.path.clone() else {
            return ReloadOutcome::Unchanged;
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(source) => return ReloadOutcome::Failed(ConfigError::ReadFile { path, source }),
        };
        let fingerprint = fingerprint_bytes(&bytes);
        if self.fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return ReloadOutcome::Unchanged;
        }

        let raw = String::from_utf8_lossy(&bytes);
        let parsed = match parse_config_document(&path, &raw) {
            Ok(parsed) => parsed,
            Err(diagnostic) => return ReloadOutcome::Failed(ConfigError::Malformed(diagnostic)),
        };
        for diagnostic in &parsed.diagnostics {
            warn!(diagnostic = %diagnostic, "config_diagnostic");
        }

        let region_count = parsed.snapshot.regions.len();
        self.snapshot = Arc::new(parsed.snapshot);
        self.fingerprint = Some(fingerprint);
        info!(
            path = %path.display(),
            region_count,
            diagnostics = parsed.diagnostics.len(),
            "config_loaded"
        );
        ReloadOutcome::Reloaded {
            region_count,
            diagnostics: parsed.diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::write_text_atomic;
    use super::*;

    const ONE_REGION: &str = r#"<Population>
  <Behavior><globalCap>40</globalCap></Behavior>
  <Region>
    <name>Trinsic</name><map>0</map><bounds>0 0 32 32</bounds><min>2</min><max>4</max>
  </Region>
</Population>"#;

    #[test]
    fn missing_file_falls_back_to_builtin_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load(&dir.path().join("absent.xml"));
        assert_eq!(*store.snapshot(), ConfigSnapshot::default());
        assert!(store.fingerprint().is_none());
    }

    #[test]
    fn reload_swaps_snapshot_only_when_content_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("population.xml");
        write_text_atomic(&path, ONE_REGION).expect("write");

        let mut store = ConfigStore::load(&path);
        let before = store.snapshot();
        assert_eq!(before.behavior.global_cap, 40);
        assert_eq!(before.regions.len(), 1);
        assert!(matches!(store.reload(), ReloadOutcome::Unchanged));

        write_text_atomic(&path, &ONE_REGION.replace("40", "55")).expect("rewrite");
        assert!(matches!(
            store.reload(),
            ReloadOutcome::Reloaded { region_count: 1, .. }
        ));
        assert_eq!(store.snapshot().behavior.global_cap, 55);
        // Readers holding the old snapshot are unaffected.
        assert_eq!(before.behavior.global_cap, 40);
    }

    #[test]
    fn malformed_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("population.xml");
        write_text_atomic(&path, ONE_REGION).expect("write");
        let mut store = ConfigStore::load(&path);

        write_text_atomic(&path, "<Population><Region>").expect("rewrite");
        assert!(matches!(
            store.reload(),
            ReloadOutcome::Failed(ConfigError::Malformed(_))
        ));
        assert_eq!(store.snapshot().regions[0].name, "Trinsic");
    }
}
