use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use serde_json::Map;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config_file::{ConfigConstants, DB_PASSWORD, DB_USER, read_config_constants};
use crate::error::RepairError;
use crate::preferences::{FieldValue, PreferencesStore, SiteEntry, UpsertOutcome};
use crate::runtime::{RepairConfig, trim_trailing_separators};

/// A directory is a site root when this file sits directly inside it.
pub const MARKER_FILE: &str = "wp-config.php";
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub visited: usize,
    pub inserted: Vec<String>,
    pub replaced: Vec<String>,
    pub kept: Vec<String>,
    pub missing_marker: Vec<String>,
}

#[derive(Debug)]
pub struct SiteReconciler<'a> {
    root: &'a Path,
    force: bool,
}

impl<'a> SiteReconciler<'a> {
    pub fn new(config: &'a RepairConfig) -> Self {
        Self {
            root: &config.document_dir,
            force: config.force,
        }
    }

    /// Scans the immediate subdirectories of the document root and merges a
    /// site entry for each one that carries a marker file.
    pub fn reconcile(&self, store: &mut PreferencesStore) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for dir in discover_site_dirs(self.root)? {
            report.visited += 1;
            debug!("Working on directory {}...", dir.display());

            let Some(entry) = build_site_entry(&dir) else {
                debug!("No {MARKER_FILE} file found, skipping.");
                report.missing_marker.push(dir_name(&dir));
                continue;
            };

            let name = entry.site_name.as_str().to_string();
            match store.upsert_site(entry, self.force) {
                UpsertOutcome::Inserted => {
                    debug!("Updating site information for {name}.");
                    report.inserted.push(name);
                }
                UpsertOutcome::Replaced => {
                    debug!("Forcing update of site information for {name}.");
                    report.replaced.push(name);
                }
                UpsertOutcome::Kept => {
                    debug!("Site {name} already present, leaving it unchanged.");
                    report.kept.push(name);
                }
            }
        }

        Ok(report)
    }
}

/// Immediate subdirectories of `root`, sorted by name. Symlinked
/// directories are included.
pub fn discover_site_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(RepairError::DocumentDirMissing(root.to_path_buf()).into());
    }
    fs::read_dir(root).map_err(|source| RepairError::DocumentDirUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let mut dirs = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(RepairError::DocumentDirUnreadable {
                    path: root.to_path_buf(),
                    source: err.into(),
                }
                .into());
            }
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

/// Builds the entry for `dir`, or `None` when it has no marker file.
pub fn build_site_entry(dir: &Path) -> Option<SiteEntry> {
    let marker = dir.join(MARKER_FILE);
    if !marker.is_file() {
        return None;
    }
    Some(site_entry_from_read(dir, read_config_constants(&marker)))
}

/// A marker file that cannot be read still yields an entry, with every
/// constant left empty.
fn site_entry_from_read(dir: &Path, constants: Result<ConfigConstants>) -> SiteEntry {
    let constants = constants.unwrap_or_else(|err| {
        warn!("{err:#}");
        ConfigConstants::default()
    });
    site_entry_from_constants(dir, &constants)
}

/// `dbName` deliberately repeats `DB_USER`; the host application has
/// always stored it that way.
pub fn site_entry_from_constants(dir: &Path, constants: &ConfigConstants) -> SiteEntry {
    let site_path = trim_trailing_separators(dir);
    let site_name = dir_name(&site_path);
    for name in [DB_USER, DB_PASSWORD] {
        if constants.get(name).is_none() {
            debug!("{name} not defined for {site_name}, leaving it empty.");
        }
    }
    let db_user = constants.get_or_empty(DB_USER);

    SiteEntry {
        site_name: FieldValue::text(site_name),
        site_path: FieldValue::text(site_path.to_string_lossy()),
        ip_address: FieldValue::text(LOOPBACK_ADDRESS),
        db_name: FieldValue::text(db_user.clone()),
        db_user: FieldValue::text(db_user),
        db_pass: FieldValue::text(constants.get_or_empty(DB_PASSWORD)),
        extra: Map::new(),
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
