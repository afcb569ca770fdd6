//! Moving finished artifacts out of scratch into the persistent output directory.

use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    #[error("Expected output file {path:?} to exist but it can't be found")]
    MissingSource { path: PathBuf },

    #[error("Output path {path:?} has no file name")]
    NoFileName { path: PathBuf },
}

/// Move each of `files` into `dest`, creating `dest` if needed. Returns the
/// new paths in the same order. Every source is checked before anything is
/// moved so a missing file leaves the output directory untouched. Moving the
/// files is not atomic as a whole: if one move fails, the files moved before
/// it stay in `dest` and the rest stay where they were.
pub fn move_outputs<P: AsRef<Path>>(dest: &Path, files: &[P]) -> Result<Vec<PathBuf>> {
    for file in files {
        let file = file.as_ref();
        if !file.exists() {
            return Err(RelocateError::MissingSource {
                path: file.to_path_buf(),
            }
            .into());
        }
    }

    fs::create_dir_all(dest).with_context(|| dest.display().to_string())?;

    let mut moved = Vec::with_capacity(files.len());
    for file in files {
        let file = file.as_ref();
        let name = file.file_name().ok_or_else(|| RelocateError::NoFileName {
            path: file.to_path_buf(),
        })?;
        let target = dest.join(name);
        move_file(file, &target)?;
        info!("Moved {} to {}", file.display(), target.display());
        moved.push(target);
    }
    Ok(moved)
}

fn move_file(src: &Path, dest: &Path) -> Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        // rename does not work across filesystems; copy then remove instead.
        Err(_) if src.is_file() => {
            fs::copy(src, dest)
                .with_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
            fs::remove_file(src).with_context(|| src.display().to_string())?;
            Ok(())
        }
        Err(err) => Err(err)
            .with_context(|| format!("moving {} to {}", src.display(), dest.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_outputs_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let scratch = dir.path().join("tmp/abc");
        fs::create_dir_all(&scratch)?;
        let src = scratch.join("merge.bim");
        let contents: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        fs::write(&src, &contents)?;

        let dest = dir.path().join("output/nested");
        let moved = move_outputs(&dest, &[&src])?;
        assert_eq!(moved, vec![dest.join("merge.bim")]);
        assert!(!src.exists());
        assert_eq!(fs::read(&moved[0])?, contents);
        Ok(())
    }

    #[test]
    fn test_missing_source_moves_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let present = dir.path().join("a.bed");
        fs::write(&present, b"x")?;
        let missing = dir.path().join("a.bim");
        let dest = dir.path().join("output");

        let err = move_outputs(&dest, &[&present, &missing]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelocateError>(),
            Some(RelocateError::MissingSource { path }) if path == &missing
        ));
        assert!(present.exists());
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn test_failed_move_keeps_earlier_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bed = dir.path().join("a.bed");
        let bim = dir.path().join("a.bim");
        fs::write(&bed, b"bed")?;
        fs::write(&bim, b"bim")?;
        // A non-empty directory in the way of the second file.
        let dest = dir.path().join("output");
        fs::create_dir_all(dest.join("a.bim"))?;
        fs::write(dest.join("a.bim/keep"), b"")?;

        assert!(move_outputs(&dest, &[&bed, &bim]).is_err());
        assert_eq!(fs::read(dest.join("a.bed"))?, b"bed");
        assert!(!bed.exists());
        assert_eq!(fs::read(&bim)?, b"bim");
        Ok(())
    }
}
