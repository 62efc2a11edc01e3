use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use prefrepair_core::logging::init_logging;
use prefrepair_core::platform::detect_platform;
use prefrepair_core::reconcile::ReconcileReport;
use prefrepair_core::repair::{RepairReport, run_repair};
use prefrepair_core::runtime::{
    Browser, DEFAULT_TLD, InvalidTld, PathOverrides, RepairConfig, ResolutionContext, Tld,
    normalize_for_display, resolve_paths,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "prefrepair",
    version,
    about = "Recreate or restore site entries in the DesktopServer preferences file"
)]
struct Cli {
    #[arg(
        value_name = "DOCUMENT_DIR",
        help = "Directory where websites are located (default: the platform Sites/Websites folder)"
    )]
    document_dir: Option<PathBuf>,
    #[arg(
        short,
        long,
        value_enum,
        ignore_case = true,
        default_value_t = BrowserArg::Safari,
        help = "The default browser to use"
    )]
    browser: BrowserArg,
    #[arg(short, long, help = "Force rewrite of site entries, even if they already exist")]
    force: bool,
    #[arg(
        short,
        long,
        value_name = "TLD",
        default_value = DEFAULT_TLD,
        value_parser = parse_tld,
        help = "Top level domain for local sites; must begin with \".\""
    )]
    tld: Tld,
    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
    #[arg(long, value_name = "PATH", help = "Preferences file to repair")]
    prefs_file: Option<PathBuf>,
    #[arg(long, help = "Print resolved paths and where they came from")]
    diagnostics: bool,
    #[arg(long, help = "Print the run summary as JSON")]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BrowserArg {
    #[value(name = "Safari")]
    Safari,
    #[value(name = "Chrome")]
    Chrome,
    #[value(name = "Firefox")]
    Firefox,
}

impl From<BrowserArg> for Browser {
    fn from(value: BrowserArg) -> Self {
        match value {
            BrowserArg::Safari => Self::Safari,
            BrowserArg::Chrome => Self::Chrome,
            BrowserArg::Firefox => Self::Firefox,
        }
    }
}

fn parse_tld(value: &str) -> Result<Tld, InvalidTld> {
    Tld::parse(value)
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(normalize_legacy_args(env::args_os()));
    dotenvy::dotenv().ok();
    init_logging(cli.verbose)?;
    info!(
        "prefrepair:v{} - DesktopServer preferences repair",
        env!("CARGO_PKG_VERSION")
    );

    let platform = detect_platform();
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        prefs_file: cli.prefs_file.clone(),
        document_dir: cli.document_dir.clone(),
    };
    let paths = resolve_paths(platform.as_ref(), &context, &overrides)?;
    if cli.diagnostics {
        println!("[diagnostics]\n{}\n", paths.diagnostics());
    }

    let config = RepairConfig {
        document_dir: paths.document_dir.clone(),
        browser: cli.browser.into(),
        tld: cli.tld.clone(),
        force: cli.force,
    };
    let report = run_repair(platform.as_ref(), &config, &paths)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Rewrites the legacy `-b:Chrome` / `-t:.test` spelling into
/// separate flag and value arguments.
fn normalize_legacy_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    for arg in args {
        let legacy = arg
            .to_str()
            .and_then(|text| text.split_once(':'))
            .filter(|(flag, _)| matches!(*flag, "-b" | "-t"))
            .map(|(flag, value)| (OsString::from(flag), OsString::from(value)));
        match legacy {
            Some((flag, value)) => {
                out.push(flag);
                out.push(value);
            }
            None => out.push(arg),
        }
    }
    out
}

fn print_report(report: &RepairReport) {
    println!("preferences: {}", normalize_for_display(&report.preferences_path));
    println!("document_dir: {}", normalize_for_display(&report.document_dir));
    println!("browser: {}", report.browser);
    println!("tld: {}", report.tld);
    println!("force: {}", format_flag(report.force));
    print_sites("sites", &report.sites);
    println!(
        "preferences.created: {}",
        format_flag(report.preferences_created)
    );
    println!("preferences.saved: {}", format_flag(report.preferences_saved));
}

fn print_sites(prefix: &str, sites: &ReconcileReport) {
    println!("{prefix}.visited: {}", sites.visited);
    for (label, names) in [
        ("inserted", &sites.inserted),
        ("replaced", &sites.replaced),
        ("kept", &sites.kept),
        ("missing_marker", &sites.missing_marker),
    ] {
        println!("{prefix}.{label}: {}", names.len());
        for name in names {
            println!("{prefix}.{label}.name: {name}");
        }
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::{CommandFactory, Parser};
    use clap::error::ErrorKind;

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(normalize_legacy_args(args.iter().map(OsString::from)))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_legacy_tool() {
        let cli = parse(&["prefrepair"]).expect("parse");
        assert_eq!(cli.browser, BrowserArg::Safari);
        assert_eq!(cli.tld.as_str(), ".dev.cc");
        assert!(!cli.force);
        assert!(!cli.verbose);
        assert!(cli.document_dir.is_none());
    }

    #[test]
    fn tld_without_leading_dot_is_rejected() {
        let err = parse(&["prefrepair", "-t", "dev.cc", "/nonexistent/Sites"]).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert!(err.to_string().contains("must begin with"));
    }

    #[test]
    fn tld_flag_requires_a_value() {
        let err = parse(&["prefrepair", "--tld"]).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn unknown_browser_is_rejected() {
        let err = parse(&["prefrepair", "--browser", "Edge"]).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn accepts_legacy_colon_syntax() {
        let cli = parse(&["prefrepair", "-b:Chrome", "-t:.test", "-f", "-v", "/Users/bob/Sites/"])
            .expect("parse");
        assert_eq!(cli.browser, BrowserArg::Chrome);
        assert_eq!(cli.tld.as_str(), ".test");
        assert!(cli.force);
        assert!(cli.verbose);
        assert_eq!(cli.document_dir, Some(PathBuf::from("/Users/bob/Sites/")));
    }

    #[test]
    fn browser_names_are_case_insensitive() {
        let cli = parse(&["prefrepair", "--browser", "firefox"]).expect("parse");
        assert_eq!(Browser::from(cli.browser), Browser::Firefox);
    }

    #[test]
    fn second_document_dir_is_rejected() {
        let err = parse(&["prefrepair", "/a", "/b"]).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn legacy_normalization_leaves_other_args_alone() {
        let args = normalize_legacy_args(
            ["prefrepair", "C:/Sites", "--tld=.x", "-v:1"]
                .iter()
                .map(OsString::from),
        );
        assert_eq!(
            args,
            vec![
                OsString::from("prefrepair"),
                OsString::from("C:/Sites"),
                OsString::from("--tld=.x"),
                OsString::from("-v:1"),
            ]
        );
    }
}
