//! Output and scratch directories for one invocation of a pipeline step.

use anyhow::{Context, Result};
use log::{debug, info};
use rand::RngCore;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

/// Name of the scratch directory created next to the output directory.
pub const TMP_DIR_NAME: &str = "tmp";

/// Directories a step reads and writes. Passed explicitly to every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDirs {
    /// Persistent location for finished artifacts.
    pub output_dir: PathBuf,
    /// Parent of all scratch directories.
    pub tmp_dir: PathBuf,
    /// Scratch directory unique to this invocation. Not cleaned up.
    pub work_dir: PathBuf,
}

impl WorkDirs {
    /// Create `output_dir`, a sibling `tmp` directory and a randomly named
    /// working directory inside it.
    pub fn setup(output_dir: &Path) -> Result<WorkDirs> {
        let output_dir = if output_dir.is_absolute() {
            output_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(output_dir)
        };
        let parent = output_dir
            .parent()
            .map_or_else(|| output_dir.clone(), Path::to_path_buf);

        make_dir(&output_dir)?;
        let tmp_dir = parent.join(TMP_DIR_NAME);
        make_dir(&tmp_dir)?;
        let work_dir = make_work_dir(&tmp_dir)?;
        info!("Writing scratch files to {}", work_dir.display());

        Ok(WorkDirs {
            output_dir,
            tmp_dir,
            work_dir,
        })
    }

    /// Path of `name` inside the working directory.
    pub fn work_path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }
}

fn make_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        debug!("directory {} already exists", path.display());
    } else {
        debug!("making directory {}", path.display());
        create_dir_all(path).with_context(|| path.display().to_string())?;
    }
    Ok(())
}

/// A 32 character hex name, as produced from 16 random bytes.
pub fn random_dir_name() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Make a uniquely named working directory under `parent`.
pub fn make_work_dir(parent: &Path) -> Result<PathBuf> {
    let work_dir = parent.join(random_dir_name());
    make_dir(&work_dir)?;
    Ok(work_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_layout() -> Result<()> {
        let root = tempfile::tempdir()?;
        let dirs = WorkDirs::setup(&root.path().join("output"))?;
        assert!(dirs.output_dir.is_dir());
        assert_eq!(dirs.tmp_dir, root.path().join("tmp"));
        assert_eq!(dirs.work_dir.parent(), Some(dirs.tmp_dir.as_path()));
        let name = dirs.work_dir.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));

        // A second run gets its own scratch space but shares output and tmp.
        let again = WorkDirs::setup(&root.path().join("output"))?;
        assert_eq!(again.output_dir, dirs.output_dir);
        assert_ne!(again.work_dir, dirs.work_dir);
        Ok(())
    }
}
