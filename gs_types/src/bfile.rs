//! PLINK binary file sets (.bed/.bim/.fam sharing one prefix).

use crate::ancestry::Ancestry;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumIter};

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Display, EnumIter)]
pub enum BFileType {
    #[strum(to_string = "bed")]
    Bed,
    #[strum(to_string = "bim")]
    Bim,
    #[strum(to_string = "fam")]
    Fam,
}

impl BFileType {
    /// Classify a path by its extension. Anything that isn't a PLINK binary
    /// file type returns None.
    pub fn from_path(path: &Path) -> Option<BFileType> {
        match path.extension()?.to_str()? {
            "bed" => Some(BFileType::Bed),
            "bim" => Some(BFileType::Bim),
            "fam" => Some(BFileType::Fam),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            BFileType::Bed => "bed",
            BFileType::Bim => "bim",
            BFileType::Fam => "fam",
        }
    }
}

/// Append `.ext` to a prefix without touching any dots already in it.
/// `Path::with_extension` would clobber e.g. `g1000_eur.pruned`.
pub fn with_suffix(prefix: &Path, ext: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BFileError {
    #[error(
        "All bfiles with prefix {prefix:?} have already been found, but an additional .{file_type} \
         file {path:?} was found for the same prefix. Check that only one bfile set for this \
         prefix exists in the reference directory."
    )]
    DuplicateFile {
        prefix: PathBuf,
        file_type: BFileType,
        path: PathBuf,
    },

    #[error("The bfile set {prefix:?} is incomplete; no .{missing} file was found next to it.")]
    IncompleteSet {
        prefix: PathBuf,
        missing: BFileType,
    },
}

/// A complete PLINK bfile set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BFileSet {
    pub prefix: PathBuf,
    pub bed: PathBuf,
    pub bim: PathBuf,
    pub fam: PathBuf,
    pub ancestry: Option<Ancestry>,
}

impl BFileSet {
    /// Build the set for `prefix` using the standard extensions. The files
    /// are not checked for existence.
    pub fn from_prefix(prefix: &Path, ancestry: Option<Ancestry>) -> BFileSet {
        BFileSet {
            prefix: prefix.to_path_buf(),
            bed: with_suffix(prefix, "bed"),
            bim: with_suffix(prefix, "bim"),
            fam: with_suffix(prefix, "fam"),
            ancestry,
        }
    }

    /// File name component of the prefix, e.g. `g1000_eur` for `/ref/g1000_eur`.
    pub fn stem(&self) -> String {
        self.prefix
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn path(&self, file_type: BFileType) -> &Path {
        match file_type {
            BFileType::Bed => &self.bed,
            BFileType::Bim => &self.bim,
            BFileType::Fam => &self.fam,
        }
    }

    pub fn paths(&self) -> [&Path; 3] {
        [&self.bed, &self.bim, &self.fam]
    }

    /// Return the first member file that does not exist on disk.
    pub fn first_missing(&self) -> Option<BFileType> {
        [BFileType::Bed, BFileType::Bim, BFileType::Fam]
            .into_iter()
            .find(|&t| !self.path(t).exists())
    }

    /// Variant IDs in .bim order (second whitespace-separated column).
    pub fn variant_ids(&self) -> Result<Vec<String>> {
        read_column(&self.bim, 1)
    }

    pub fn num_variants(&self) -> Result<usize> {
        count_records(&self.bim)
    }

    pub fn num_samples(&self) -> Result<usize> {
        count_records(&self.fam)
    }
}

fn count_records(path: &Path) -> Result<usize> {
    let reader = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let mut n = 0;
    for line in reader.lines() {
        if !line.with_context(|| path.display().to_string())?.trim().is_empty() {
            n += 1;
        }
    }
    Ok(n)
}

fn read_column(path: &Path, col: usize) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let mut values = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| path.display().to_string())?;
        if line.trim().is_empty() {
            continue;
        }
        let value = line.split_whitespace().nth(col).with_context(|| {
            format!(
                "{}: line {} has fewer than {} columns",
                path.display(),
                i + 1,
                col + 1
            )
        })?;
        values.push(value.to_string());
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_prefix_keeps_dots() {
        let set = BFileSet::from_prefix(Path::new("/work/g1000_eur.pruned"), None);
        assert_eq!(set.bed, PathBuf::from("/work/g1000_eur.pruned.bed"));
        assert_eq!(set.bim, PathBuf::from("/work/g1000_eur.pruned.bim"));
        assert_eq!(set.fam, PathBuf::from("/work/g1000_eur.pruned.fam"));
        assert_eq!(set.stem(), "g1000_eur.pruned");
    }

    #[test]
    fn test_bfile_type_from_path() {
        assert_eq!(BFileType::from_path(Path::new("a/b.bim")), Some(BFileType::Bim));
        assert_eq!(BFileType::from_path(Path::new("a/b.bim.gz")), None);
        assert_eq!(BFileType::from_path(Path::new("a/b")), None);
    }

    #[test]
    fn test_variant_ids() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("panel");
        let set = BFileSet::from_prefix(&prefix, None);
        std::fs::write(&set.bim, "1\trs1\t0\t100\tA\tG\n1\trs2\t0\t200\tC\tT\n\n")?;
        std::fs::write(&set.fam, "f1 i1 0 0 0 -9\n")?;
        assert_eq!(set.variant_ids()?, vec!["rs1", "rs2"]);
        assert_eq!(set.num_variants()?, 2);
        assert_eq!(set.num_samples()?, 1);
        assert_eq!(set.first_missing(), Some(BFileType::Bed));
        Ok(())
    }
}
