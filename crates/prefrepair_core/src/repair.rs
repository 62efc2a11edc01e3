use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::RepairError;
use crate::platform::{Platform, ensure_host_not_running};
use crate::preferences::{DocumentSeed, PreferencesStore};
use crate::reconcile::{ReconcileReport, SiteReconciler};
use crate::runtime::{RepairConfig, ResolvedPaths, normalize_for_display};

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub preferences_path: PathBuf,
    pub document_dir: PathBuf,
    pub browser: String,
    pub tld: String,
    pub force: bool,
    pub preferences_created: bool,
    pub browser_updated: bool,
    pub tld_updated: bool,
    pub preferences_saved: bool,
    pub sites: ReconcileReport,
}

/// One full pass: refuse if the host application is up, load or create the
/// preferences, apply browser and TLD, reconcile sites, and write back when
/// anything changed.
pub fn run_repair(
    platform: &dyn Platform,
    config: &RepairConfig,
    paths: &ResolvedPaths,
) -> Result<RepairReport> {
    ensure_host_not_running(platform)?;

    if !config.document_dir.is_dir() {
        return Err(RepairError::DocumentDirMissing(config.document_dir.clone()).into());
    }

    info!(
        "Preferences: {}",
        normalize_for_display(&paths.preferences_path)
    );
    info!(
        "Rebuilding websites from directory: {}.",
        normalize_for_display(&config.document_dir)
    );

    let seed = DocumentSeed::from_config(config, paths.desktop_dir.clone());
    let mut store = PreferencesStore::load_or_create(&paths.preferences_path, &seed)?;
    if store.was_created() {
        debug!("Created new preferences file.");
    }

    let browser_updated = store.set_browser(config.browser);
    if browser_updated {
        debug!("Updating browser specification to: {}.", config.browser);
    }
    let tld_updated = store.set_tld(&config.tld);
    if tld_updated {
        debug!("Updating TLD specification to: {}.", config.tld);
    }

    debug!("Starting search...");
    let sites = SiteReconciler::new(config).reconcile(&mut store)?;

    if store.is_dirty() {
        debug!("Rewriting preferences file.");
    }
    let preferences_saved = store.save_if_dirty()?;

    Ok(RepairReport {
        preferences_path: paths.preferences_path.clone(),
        document_dir: config.document_dir.clone(),
        browser: store.document().browser.as_str().to_string(),
        tld: store.document().tld.as_str().to_string(),
        force: config.force,
        preferences_created: store.was_created(),
        browser_updated,
        tld_updated,
        preferences_saved,
        sites,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::*;
    use crate::runtime::{Browser, Tld, ValueSource};

    struct FakePlatform {
        running: bool,
    }

    impl Platform for FakePlatform {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn default_documents_dir(&self, user: &str) -> Option<PathBuf> {
            Some(PathBuf::from(format!("/home/{user}/Sites")))
        }

        fn desktop_dir(&self, user: &str) -> Option<PathBuf> {
            Some(PathBuf::from(format!("/home/{user}/Desktop")))
        }

        fn preferences_file_path(&self) -> Option<PathBuf> {
            None
        }

        fn is_host_application_running(&self) -> Result<bool> {
            Ok(self.running)
        }
    }

    fn paths(root: &Path, prefs: &Path) -> ResolvedPaths {
        ResolvedPaths {
            preferences_path: prefs.to_path_buf(),
            document_dir: root.to_path_buf(),
            desktop_dir: Some(PathBuf::from("/home/alice/Desktop")),
            user: Some("alice".to_string()),
            platform: "fake",
            preferences_source: ValueSource::Flag,
            document_source: ValueSource::Flag,
        }
    }

    fn write_site(root: &Path, name: &str, user: &str, password: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).expect("create site");
        fs::write(
            dir.join("wp-config.php"),
            format!("<?php\ndefine( 'DB_USER', '{user}' );\ndefine( 'DB_PASSWORD', \"{password}\" );\n"),
        )
        .expect("write config");
    }

    #[test]
    fn fresh_preferences_get_single_site() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("Sites");
        write_site(&root, "blog", "root", "secret");
        let prefs = temp.path().join("prefs.json");

        let config = RepairConfig::new(root.clone());
        let report = run_repair(
            &FakePlatform { running: false },
            &config,
            &paths(&root, &prefs),
        )
        .expect("repair");

        assert!(report.preferences_created);
        assert!(report.preferences_saved);
        assert_eq!(report.sites.inserted, vec!["blog".to_string()]);

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&prefs).expect("read")).expect("json");
        assert_eq!(written["browser"], "Safari");
        assert_eq!(written["tld"], ".dev.cc");
        assert_eq!(written["desktop"], "/home/alice/Desktop");
        assert_eq!(
            written["sites"],
            json!({
                "blog": {
                    "siteName": "blog",
                    "sitePath": root.join("blog").to_string_lossy(),
                    "ipAddress": "127.0.0.1",
                    "dbName": "root",
                    "dbUser": "root",
                    "dbPass": "secret"
                }
            })
        );
    }

    #[test]
    fn second_identical_run_does_not_write() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("Sites");
        write_site(&root, "blog", "root", "secret");
        let prefs = temp.path().join("prefs.json");
        let config = RepairConfig::new(root.clone());
        let platform = FakePlatform { running: false };

        run_repair(&platform, &config, &paths(&root, &prefs)).expect("first run");
        let report = run_repair(&platform, &config, &paths(&root, &prefs)).expect("second run");

        assert!(!report.preferences_created);
        assert!(!report.preferences_saved);
        assert_eq!(report.sites.kept, vec!["blog".to_string()]);
    }

    #[test]
    fn browser_and_tld_changes_are_persisted() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("Sites");
        fs::create_dir_all(&root).expect("create root");
        let prefs = temp.path().join("prefs.json");
        let platform = FakePlatform { running: false };

        run_repair(&platform, &RepairConfig::new(root.clone()), &paths(&root, &prefs))
            .expect("first run");

        let config = RepairConfig {
            browser: Browser::Firefox,
            tld: Tld::parse(".local").expect("tld"),
            ..RepairConfig::new(root.clone())
        };
        let report = run_repair(&platform, &config, &paths(&root, &prefs)).expect("second run");
        assert!(report.browser_updated);
        assert!(report.tld_updated);
        assert!(report.preferences_saved);

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&prefs).expect("read")).expect("json");
        assert_eq!(written["browser"], "Firefox");
        assert_eq!(written["tld"], ".local");
    }

    #[test]
    fn refuses_to_run_while_host_is_active() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("Sites");
        fs::create_dir_all(&root).expect("create root");
        let prefs = temp.path().join("prefs.json");

        let err = run_repair(
            &FakePlatform { running: true },
            &RepairConfig::new(root.clone()),
            &paths(&root, &prefs),
        )
        .expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<RepairError>(),
            Some(RepairError::HostApplicationRunning { .. })
        ));
        assert!(!prefs.exists());
    }

    #[test]
    fn missing_document_dir_is_fatal_before_touching_preferences() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("missing");
        let prefs = temp.path().join("prefs.json");

        let err = run_repair(
            &FakePlatform { running: false },
            &RepairConfig::new(root.clone()),
            &paths(&root, &prefs),
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("does not exist"));
        assert!(!prefs.exists());
    }

    #[test]
    fn corrupt_preferences_stop_the_run() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("Sites");
        write_site(&root, "blog", "root", "secret");
        let prefs = temp.path().join("prefs.json");
        fs::write(&prefs, "{ not json").expect("write prefs");

        let err = run_repair(
            &FakePlatform { running: false },
            &RepairConfig::new(root.clone()),
            &paths(&root, &prefs),
        )
        .expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<RepairError>(),
            Some(RepairError::PreferencesInvalid { .. })
        ));
        assert_eq!(fs::read_to_string(&prefs).expect("read"), "{ not json");
    }
}
