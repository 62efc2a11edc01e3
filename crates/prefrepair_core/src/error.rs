use std::path::PathBuf;

use thiserror::Error;

/// Fatal environment failures. Each one stops the run.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("{application} is currently running. Please exit it before using this tool.")]
    HostApplicationRunning { application: &'static str },

    #[error("document directory {} does not exist", .0.display())]
    DocumentDirMissing(PathBuf),

    #[error("unable to access contents of document directory {}", .path.display())]
    DocumentDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read preferences file {}", .path.display())]
    PreferencesUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("preferences file {} is not a valid JSON object", .path.display())]
    PreferencesInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write preferences file {}", .path.display())]
    PreferencesUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "no built-in preferences location for platform `{0}`; pass --prefs-file or set PREFREPAIR_PREFS_FILE"
    )]
    UnsupportedPlatform(&'static str),

    #[error("unable to determine the current user; set PREFREPAIR_USER")]
    UnknownUser,
}
