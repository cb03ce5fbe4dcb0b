//! Uniform handling of external commands.
//!
//! Every tool this crate drives (apt-get, docker, kind, kubectl, helm) is
//! invoked through a [`Cmd`] handed to a [`Host`]. Call sites pick
//! [`fatal`] when a failure must abort the pipeline, or [`advisory`] when
//! it only deserves a warning.

use std::fmt::{Display, Formatter};

use thiserror::Error;
use tracing::{debug, warn};

use crate::host::Host;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    /// run through sudo unless the process is already root
    pub privileged: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

impl Display for Cmd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// non-empty trimmed stdout lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    pub fn first_line(&self) -> Option<&str> {
        self.lines().next()
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed ({}): {}", describe_status(.status), .stderr.trim())]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl CommandError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Spawn { .. } => None,
            CommandError::Failed { status, .. } => *status,
        }
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    }
}

/// The process was asked to stop before the pipeline finished.
#[derive(Error, Debug)]
#[error("interrupted")]
pub struct Interrupted;

/// Run a command whose failure aborts the caller.
pub async fn fatal<H: Host + ?Sized>(host: &H, cmd: Cmd) -> Result<Output, CommandError> {
    debug!("running `{}`", cmd);
    let output = host.run(&cmd).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(CommandError::Failed {
            command: cmd.to_string(),
            status: output.status,
            stderr: output.stderr,
        })
    }
}

/// Run a command whose failure is only worth a warning.
pub async fn advisory<H: Host + ?Sized>(host: &H, cmd: Cmd) -> Option<Output> {
    match fatal(host, cmd).await {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

/// Exit code for a pipeline that stopped on `err`: the status of the
/// command that failed first, 130 when interrupted, otherwise 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<Interrupted>().is_some() {
            return 130;
        }
        if let Some(cmd_err) = cause.downcast_ref::<CommandError>() {
            return cmd_err.exit_code().filter(|c| *c != 0).unwrap_or(1);
        }
    }
    1
}
