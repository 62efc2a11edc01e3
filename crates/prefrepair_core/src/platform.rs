//! Operating-system specific locations and the host application check.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::error::RepairError;

pub const HOST_APPLICATION: &str = "DesktopServer";
pub const PREFERENCES_FILENAME: &str = "com.serverpress.desktopserver.json";

pub trait Platform {
    fn name(&self) -> &'static str;

    /// Where websites live when no document directory is given.
    fn default_documents_dir(&self, user: &str) -> Option<PathBuf>;

    fn desktop_dir(&self, user: &str) -> Option<PathBuf>;

    /// Fixed location of the host application's preferences file.
    fn preferences_file_path(&self) -> Option<PathBuf>;

    fn is_host_application_running(&self) -> Result<bool>;
}

#[derive(Debug, Clone, Copy)]
pub struct MacOs;

impl Platform for MacOs {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn default_documents_dir(&self, user: &str) -> Option<PathBuf> {
        Some(PathBuf::from(format!("/Users/{user}/Sites")))
    }

    fn desktop_dir(&self, user: &str) -> Option<PathBuf> {
        Some(PathBuf::from(format!("/Users/{user}/Desktop")))
    }

    fn preferences_file_path(&self) -> Option<PathBuf> {
        Some(PathBuf::from(format!("/Users/Shared/.{PREFERENCES_FILENAME}")))
    }

    fn is_host_application_running(&self) -> Result<bool> {
        process_listing_contains("ps", &["-ax"], "DesktopServer.app")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Windows;

impl Platform for Windows {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn default_documents_dir(&self, user: &str) -> Option<PathBuf> {
        Some(PathBuf::from(format!(
            "C:\\Users\\{user}\\Documents\\Websites"
        )))
    }

    fn desktop_dir(&self, user: &str) -> Option<PathBuf> {
        Some(PathBuf::from(format!("C:\\Users\\{user}\\Desktop")))
    }

    fn preferences_file_path(&self) -> Option<PathBuf> {
        Some(PathBuf::from(format!(
            "C:\\ProgramData\\DesktopServer\\{PREFERENCES_FILENAME}"
        )))
    }

    fn is_host_application_running(&self) -> Result<bool> {
        process_listing_contains("tasklist", &[], "DesktopServer.exe")
    }
}

/// A platform the host application does not ship on. Paths must come from
/// flags or the environment and the host application is never running.
#[derive(Debug, Clone, Copy)]
pub struct Unsupported(pub &'static str);

impl Platform for Unsupported {
    fn name(&self) -> &'static str {
        self.0
    }

    fn default_documents_dir(&self, _user: &str) -> Option<PathBuf> {
        None
    }

    fn desktop_dir(&self, _user: &str) -> Option<PathBuf> {
        None
    }

    fn preferences_file_path(&self) -> Option<PathBuf> {
        None
    }

    fn is_host_application_running(&self) -> Result<bool> {
        Ok(false)
    }
}

pub fn detect_platform() -> Box<dyn Platform> {
    if cfg!(target_os = "macos") {
        Box::new(MacOs)
    } else if cfg!(windows) {
        Box::new(Windows)
    } else {
        Box::new(Unsupported(std::env::consts::OS))
    }
}

/// Refuses to continue while the host application is active. A process
/// listing that cannot be taken is reported and treated as "not running".
pub fn ensure_host_not_running(platform: &dyn Platform) -> Result<()> {
    match platform.is_host_application_running() {
        Ok(true) => Err(RepairError::HostApplicationRunning {
            application: HOST_APPLICATION,
        }
        .into()),
        Ok(false) => Ok(()),
        Err(err) => {
            warn!("could not check whether {HOST_APPLICATION} is running: {err:#}");
            Ok(())
        }
    }
}

fn process_listing_contains(program: &str, args: &[&str], needle: &str) -> Result<bool> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to execute {program}"))?;
    let found = String::from_utf8_lossy(&output.stdout).contains(needle);
    if !output.status.success() && !found {
        bail!("{program} exited with {}", output.status);
    }
    Ok(found)
}
