//! Build automation for pmks-kube
//!
//! Usage: cargo xtask <command>
//!
//! Available commands:
//! - build: Build the library
//! - test: Run tests
//! - doc: Build API documentation
//! - ci: Run CI checks

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
//! Developer tasks for the pmks-kube workspace.
//!
//! Run as `cargo xtask <task>`; `cargo xtask --help` lists the tasks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use xshell::{cmd, Shell};

const PACKAGE: &str = "pmks-kube";

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace tasks for pmks-kube")]
struct Args {
    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand)]
enum Task {
    /// Compile the library
    Build {
        #[arg(long)]
        release: bool,
    },
    /// Run unit and integration tests
    Test {
        /// Restrict to the tests/ directory
        #[arg(long)]
        integration: bool,
        /// Substring filter passed through to the test harness
        filter: Option<String>,
    },
    /// Render rustdoc, failing on broken intra-doc links
    Doc {
        #[arg(long)]
        open: bool,
    },
    /// rustfmt and clippy
    Lint {
        /// Report formatting drift instead of rewriting files
        #[arg(long)]
        check: bool,
    },
    /// Everything the pipeline runs, in pipeline order
    Ci,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match args.task {
        Task::Build { release } => build(&sh, release),
        Task::Test {
            integration,
            filter,
        } => test(&sh, integration, filter.as_deref()),
        Task::Doc { open } => doc(&sh, open),
        Task::Lint { check } => lint(&sh, check),
        Task::Ci => {
            lint(&sh, true)?;
            test(&sh, false, None)?;
            doc(&sh, false)?;
            println!("ci: ok");
            Ok(())
        }
    }
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    let profile: Option<&str> = release.then_some("--release");
    cmd!(sh, "cargo build -p {PACKAGE} {profile...}")
        .run()
        .context("build failed")
}

fn test(sh: &Shell, integration: bool, filter: Option<&str>) -> Result<()> {
    let scope: &[&str] = if integration { &["--test", "*"] } else { &[] };
    let filter: Vec<&str> = filter.into_iter().collect();
    // Paused-clock tests need tokio's test-util, which dev-dependencies enable.
    cmd!(sh, "cargo test -p {PACKAGE} {scope...} {filter...}")
        .run()
        .context("tests failed")
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    let open: Option<&str> = open.then_some("--open");
    cmd!(sh, "cargo doc -p {PACKAGE} --no-deps {open...}")
        .env("RUSTDOCFLAGS", "-D warnings")
        .run()
        .context("rustdoc reported problems")
}

fn lint(sh: &Shell, check: bool) -> Result<()> {
    let check: Option<&str> = check.then_some("--check");
    cmd!(sh, "cargo fmt --all -- {check...}")
        .run()
        .context("rustfmt")?;
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings")
        .run()
        .context("clippy")
}

fn workspace_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask must live one level below the workspace root")
}
