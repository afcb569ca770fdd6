use anyhow::{bail, Result};
use itertools::Itertools;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Convert an io::error to a string and strip "(os error 4)" from the end.
fn io_error_to_string(err: &std::io::Error) -> String {
    let s = err.to_string();
    s.strip_suffix(&format!(" (os error {})", err.raw_os_error().unwrap_or(0)))
        .unwrap_or(&s)
        .to_string()
}

/// Render an error chain as `ERROR: outer\n\tCaused by: inner ...`.
pub fn format_error_chain(err: &anyhow::Error) -> String {
    let error_chain = err.chain().join("\n\tCaused by: ");
    if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
        let io_err_str = io_error_to_string(io_err);
        match err.chain().len() {
            1 => format!("ERROR: {io_err_str}"),
            2 => format!("ERROR: {io_err_str}: {err}"),
            _ => format!("ERROR: {error_chain}"),
        }
    } else {
        format!("ERROR: {error_chain}")
    }
}

/// Print an error chain.
pub fn print_error_chain(err: &anyhow::Error) {
    eprintln!("{}", format_error_chain(err));
}

/// An input path that must exist; canonicalized when parsed from the command line.
#[derive(Clone, PartialEq, Eq)]
pub struct CliPath {
    path: PathBuf,
}

impl From<PathBuf> for CliPath {
    fn from(path: PathBuf) -> Self {
        CliPath { path }
    }
}

impl FromStr for CliPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<CliPath> {
        match Path::new(s).canonicalize() {
            Ok(p) => Ok(CliPath::from(p)),
            Err(e) => bail!("{s}: {}", io_error_to_string(&e)),
        }
    }
}

impl Display for CliPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(&self.path.display(), f)
    }
}

impl Debug for CliPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Debug::fmt(&self.path, f)
    }
}

impl From<CliPath> for PathBuf {
    fn from(obj: CliPath) -> PathBuf {
        obj.path
    }
}

impl AsRef<Path> for CliPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Deref for CliPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.path
    }
}

/// A `TRAIT=PATH` pair naming the MAGMA results for one trait.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraitInput {
    pub trait_name: String,
    pub path: CliPath,
}

impl FromStr for TraitInput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<TraitInput> {
        let Some((trait_name, path)) = s.split_once('=') else {
            bail!("expected TRAIT=PATH, got '{s}'");
        };
        let trait_name = trait_name.trim();
        if trait_name.is_empty() || trait_name.contains(char::is_whitespace) {
            bail!("invalid trait name '{trait_name}' in '{s}'");
        }
        Ok(TraitInput {
            trait_name: trait_name.to_string(),
            path: path.parse()?,
        })
    }
}

/// Wrap the output of --help to 80 columns when the terminal size is unknown.
/// The default value of clap is 100.
pub fn set_env_columns() {
    if terminal_size::terminal_size().is_none() && std::env::var_os("COLUMNS").is_none() {
        std::env::set_var("COLUMNS", "80");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("plink exited with status 3"))
            .context("Failed to build the reference panel")
            .unwrap_err();
        assert_eq!(
            format_error_chain(&err),
            "ERROR: Failed to build the reference panel\n\tCaused by: plink exited with status 3"
        );
    }

    #[test]
    fn test_io_error_strips_os_error() {
        let io = std::fs::read("/nonexistent/gwas2sc/file").unwrap_err();
        let msg = format_error_chain(&anyhow::Error::from(io));
        assert!(!msg.contains("os error"), "{msg}");
        assert!(msg.starts_with("ERROR: "));
    }

    #[test]
    fn test_trait_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("height.genes.out");
        std::fs::write(&path, "")?;
        let input: TraitInput = format!("height={}", path.display()).parse()?;
        assert_eq!(input.trait_name, "height");
        assert_eq!(&*input.path, path.canonicalize()?.as_path());

        assert!("height".parse::<TraitInput>().is_err());
        assert!(format!("my trait={}", path.display()).parse::<TraitInput>().is_err());
        assert!("height=/nonexistent/file".parse::<TraitInput>().is_err());
        Ok(())
    }
}
