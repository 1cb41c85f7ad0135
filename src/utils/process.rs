//! Running helper executables from an environment's `bin/` directory.

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::info;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// `PATH` with `bin_dir` in front of the current value.
pub fn path_with_prefix(bin_dir: &Path) -> Result<OsString> {
    let mut entries: Vec<PathBuf> = vec![bin_dir.to_path_buf()];
    if let Some(current) = env::var_os("PATH") {
        entries.extend(env::split_paths(&current));
    }
    env::join_paths(entries).context("Failed to build PATH")
}

/// Shell-like rendering of an argv for logs.
pub fn render_command<P: AsRef<OsStr>, A: AsRef<OsStr>>(program: P, args: &[A]) -> String {
    std::iter::once(program.as_ref())
        .chain(args.iter().map(|arg| -> &OsStr { arg.as_ref() }))
        .map(|part| {
            let part = part.to_string_lossy();
            if part.is_empty() || part.contains(char::is_whitespace) {
                format!("'{}'", part)
            } else {
                part.into_owned()
            }
        })
        .join(" ")
}

/// Runs a helper command to completion, echoing it first.
///
/// When `stdout_to` is set the child's standard output is written there.
pub fn run_command(
    program: &str,
    args: &[String],
    bin_dir: Option<&Path>,
    stdout_to: Option<&Path>,
) -> Result<()> {
    info!("{}", render_command(program, args));

    let mut command = Command::new(program);
    command.args(args);
    if let Some(bin_dir) = bin_dir {
        command.env("PATH", path_with_prefix(bin_dir)?);
    }
    if let Some(path) = stdout_to {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        command.stdout(Stdio::from(file));
    }

    let status = command
        .status()
        .with_context(|| format!("Failed to launch {}", program))?;
    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(())
}
