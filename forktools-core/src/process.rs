use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, ExitStatus};
use tracing::debug;

/// Run a program to completion and return its stdout as text.
///
/// A non-zero exit status becomes [`Error::CommandFailed`] carrying stderr.
pub fn run_capture<I, S>(program: &str, args: I, cwd: Option<&Path>) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!("Running {:?}", cmd);
    let output = cmd.output()?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a program with inherited stdio, blocking until it exits.
pub fn run_interactive(cmd: &mut Command) -> Result<ExitStatus> {
    debug!("Running {:?}", cmd);
    Ok(cmd.status()?)
}
