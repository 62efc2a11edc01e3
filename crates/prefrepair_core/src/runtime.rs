use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::debug;

use crate::error::RepairError;
use crate::platform::Platform;

pub const DEFAULT_TLD: &str = ".dev.cc";

pub const PREFS_FILE_ENV: &str = "PREFREPAIR_PREFS_FILE";
pub const DOCUMENT_DIR_ENV: &str = "PREFREPAIR_DOCUMENT_DIR";
pub const USER_ENV: &str = "PREFREPAIR_USER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Browser {
    #[default]
    Safari,
    Chrome,
    Firefox,
}

impl Browser {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safari => "Safari",
            Self::Chrome => "Chrome",
            Self::Firefox => "Firefox",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain suffix appended to local site names, always starting with `.`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tld(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidTld {
    #[error("top-level domain requires a value")]
    Empty,
    #[error("top-level domain must begin with \".\", got `{0}`")]
    MissingLeadingDot(String),
}

impl Tld {
    pub fn parse(value: &str) -> Result<Self, InvalidTld> {
        if value.is_empty() {
            return Err(InvalidTld::Empty);
        }
        if !value.starts_with('.') {
            return Err(InvalidTld::MissingLeadingDot(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Tld {
    fn default() -> Self {
        Self(DEFAULT_TLD.to_string())
    }
}

impl fmt::Display for Tld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settings for one repair run. Built once from command-line input and
/// shared read-only by the store and the reconciler.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    pub document_dir: PathBuf,
    pub browser: Browser,
    pub tld: Tld,
    pub force: bool,
}

impl RepairConfig {
    pub fn new(document_dir: PathBuf) -> Self {
        Self {
            document_dir,
            browser: Browser::default(),
            tld: Tld::default(),
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub prefs_file: Option<PathBuf>,
    pub document_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub preferences_path: PathBuf,
    pub document_dir: PathBuf,
    pub desktop_dir: Option<PathBuf>,
    pub user: Option<String>,
    pub platform: &'static str,
    pub preferences_source: ValueSource,
    pub document_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "platform={}\nuser={}\npreferences_path={} ({})\ndocument_dir={} ({})\ndesktop_dir={}",
            self.platform,
            self.user.as_deref().unwrap_or("<unknown>"),
            normalize_for_display(&self.preferences_path),
            self.preferences_source.as_str(),
            normalize_for_display(&self.document_dir),
            self.document_source.as_str(),
            self.desktop_dir
                .as_deref()
                .map(normalize_for_display)
                .unwrap_or_else(|| "<unknown>".to_string()),
        )
    }
}

pub fn resolve_paths(
    platform: &dyn Platform,
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(platform, context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    platform: &dyn Platform,
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let user = [USER_ENV, "USER", "USERNAME"]
        .into_iter()
        .filter_map(|key| lookup_env(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty());

    let (preferences_path, preferences_source) =
        if let Some(path) = overrides.prefs_file.as_deref() {
            (absolutize(path, &context.cwd), ValueSource::Flag)
        } else if let Some(value) = non_empty(lookup_env(PREFS_FILE_ENV)) {
            (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
        } else if let Some(path) = platform.preferences_file_path() {
            (path, ValueSource::Default)
        } else {
            return Err(RepairError::UnsupportedPlatform(platform.name()).into());
        };

    let (document_dir, document_source) = if let Some(path) = overrides.document_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env(DOCUMENT_DIR_ENV)) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        debug!("No document directory specified. Assuming default location.");
        let user = user.as_deref().ok_or(RepairError::UnknownUser)?;
        let path = platform
            .default_documents_dir(user)
            .ok_or(RepairError::UnsupportedPlatform(platform.name()))?;
        (path, ValueSource::Default)
    };

    let desktop_dir = user
        .as_deref()
        .and_then(|user| platform.desktop_dir(user));

    Ok(ResolvedPaths {
        preferences_path,
        document_dir: trim_trailing_separators(&document_dir),
        desktop_dir,
        user,
        platform: platform.name(),
        preferences_source,
        document_source,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Drops trailing `/` and `\` from a path while keeping a bare root intact.
pub fn trim_trailing_separators(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    let trimmed = text.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() || trimmed.ends_with(':') {
        return path.to_path_buf();
    }
    PathBuf::from(trimmed)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
