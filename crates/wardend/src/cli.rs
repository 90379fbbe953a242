//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from daemon startup.

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

/// Exit code for bad invocations
pub const USAGE_EXIT_CODE: i32 = 2;

/// Continuous compliance monitor: detect drift, remediate, publish evidence
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "wardend")]
#[command(version)]
pub struct Cli {
    /// Security baseline (XCCDF/SCAP content) handed to the remediation engine
    pub baseline: PathBuf,

    /// Evidence repository work tree (requires BRANCH)
    #[arg(requires = "branch")]
    pub repo: Option<PathBuf>,

    /// Branch to push evidence to
    pub branch: Option<String>,

    /// Configuration file (default: /etc/warden/config.toml if present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the configured baseline profile
    #[arg(long)]
    pub profile: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Evaluate the condition battery once and exit (0 = compliant)
    #[arg(long)]
    pub check: bool,

    /// With --check, print the verdict as JSON
    #[arg(long, requires = "check")]
    pub json: bool,
}

/// What to do after looking at argv
#[derive(Debug)]
pub enum Invocation {
    Run(Cli),
    /// Help or version was requested and printed
    Exit(i32),
}

impl Cli {
    /// Evidence repository and branch, when both were given
    pub fn publish_target(&self) -> Option<(&PathBuf, &str)> {
        match (&self.repo, &self.branch) {
            (Some(repo), Some(branch)) => Some((repo, branch.as_str())),
            _ => None,
        }
    }

    pub fn usage() -> String {
        Self::command().render_usage().to_string()
    }
}

/// Parse `args`. Help and version go to stdout with exit 0; any argument
/// error prints the message and usage to stdout with exit code 2.
pub fn parse<I, T>(args: I) -> Invocation
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Invocation::Run(cli),
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{}", e);
                Invocation::Exit(0)
            }
            _ => {
                println!("{}", e.render());
                Invocation::Exit(USAGE_EXIT_CODE)
            }
        },
    }
}
