//! Building and running command lines for external tools (PLINK, MAGMA, scDRS).

use anyhow::Result;
use log::{debug, info};
use shell_escape::escape;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::Command;

/// A command line for an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: &str) -> ToolCommand {
        ToolCommand {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    /// A bare argument, e.g. `--make-bed` or a subcommand name.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> ToolCommand {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// A flag followed by its value as a separate argument, e.g. `--out prefix`.
    pub fn flag(self, flag: &str, value: impl AsRef<OsStr>) -> ToolCommand {
        self.arg(flag).arg(value)
    }

    pub fn optional_flag<T: Display>(self, flag: &str, value: Option<T>) -> ToolCommand {
        match value {
            Some(v) => self.flag(flag, v.to_string()),
            None => self,
        }
    }

    /// A `key=value` modifier as understood by MAGMA, e.g. `window=35,10`.
    pub fn modifier(self, key: &str, value: impl Display) -> ToolCommand {
        self.arg(format!("{key}={value}"))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The argument following `flag`, if present.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Path of the `--out` prefix, used by tools that name outputs after it.
    pub fn out_prefix(&self) -> Option<PathBuf> {
        self.value_of("--out").map(PathBuf::from)
    }
}

impl Display for ToolCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", escape(Cow::from(self.program.as_str())))?;
        for arg in &self.args {
            write!(f, " {}", escape(Cow::from(arg.as_str())))?;
        }
        Ok(())
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRun {
    pub command: String,
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolRun {
    /// Combined stdout and stderr, for diagnostics.
    pub fn log(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// Convert a failed run into a `ToolError::Failed`.
    pub fn check(self) -> Result<ToolRun, ToolError> {
        if self.success {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                log: self.log(),
                code: self.code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                command: self.command,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Failed to run {program}. Is it installed and on the PATH?")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code}:\n{log}")]
    Failed {
        command: String,
        code: String,
        log: String,
    },

    #[error("{tool} finished but did not produce the expected output {path:?}")]
    MissingOutput { tool: String, path: PathBuf },
}

/// Something that can execute a tool command and report its outcome.
/// A non-zero exit is reported through `ToolRun::success`, not as an Err;
/// Err is reserved for failing to run the command at all.
pub trait ToolRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolRun>;
}

/// Runs tools as blocking child processes, capturing their output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolRun> {
        let rendered = command.to_string();
        info!("Running {rendered}");
        let output = Command::new(command.program())
            .args(command.args())
            .output()
            .map_err(|source| ToolError::Launch {
                program: command.program().to_string(),
                source,
            })?;
        let run = ToolRun {
            command: rendered,
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("{} exited with {:?}", command.program(), run.code);
        Ok(run)
    }
}

/// Fail with `ToolError::MissingOutput` unless every path exists.
pub fn ensure_outputs(tool: &str, paths: &[&Path]) -> Result<(), ToolError> {
    for path in paths {
        if !path.exists() {
            return Err(ToolError::MissingOutput {
                tool: tool.to_string(),
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_rendering() {
        let cmd = ToolCommand::new("magma")
            .arg("--annotate")
            .modifier("window", "35,10")
            .flag("--snp-loc", "my snps.tsv")
            .optional_flag::<u32>("--seed", None)
            .flag("--out", "/tmp/w/annot");
        assert_eq!(
            cmd.args(),
            ["--annotate", "window=35,10", "--snp-loc", "my snps.tsv", "--out", "/tmp/w/annot"]
        );
        assert_eq!(
            cmd.to_string(),
            "magma --annotate window=35,10 --snp-loc 'my snps.tsv' --out /tmp/w/annot"
        );
        assert_eq!(cmd.out_prefix(), Some(PathBuf::from("/tmp/w/annot")));
        assert_eq!(cmd.value_of("--bfile"), None);
    }

    #[test]
    fn test_check_failed_run() {
        let run = ToolRun {
            command: "plink --bfile a".into(),
            success: false,
            code: Some(3),
            stdout: "Error: 12 variants with 3+ alleles present.".into(),
            stderr: String::new(),
        };
        let err = run.check().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with status 3"), "{msg}");
        assert!(msg.contains("3+ alleles"), "{msg}");
    }

    #[test]
    fn test_process_runner_missing_program() {
        let err = ProcessRunner
            .run(&ToolCommand::new("gwas2sc-definitely-not-a-program"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolError>(),
            Some(ToolError::Launch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_captures_output() -> Result<()> {
        let run = ProcessRunner.run(&ToolCommand::new("sh").arg("-c").arg("echo hi; exit 2"))?;
        assert!(!run.success);
        assert_eq!(run.code, Some(2));
        assert_eq!(run.stdout.trim(), "hi");
        Ok(())
    }
}
