//! PLINK merge invocation and classification of its outcome.

use crate::tool::{ensure_outputs, ToolCommand, ToolRun, ToolRunner};
use anyhow::{Context, Result};
use gs_types::bfile::{with_suffix, BFileSet};
use itertools::Itertools;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// PLINK writes the variants that blocked a merge to `<out>-merge.missnp`.
pub const MISSNP_SUFFIX: &str = "-merge.missnp";

pub fn missnp_path(out_prefix: &Path) -> PathBuf {
    let mut s = out_prefix.as_os_str().to_owned();
    s.push(MISSNP_SUFFIX);
    PathBuf::from(s)
}

/// PLINK's own log for a run with `--out out_prefix`.
pub fn log_path(out_prefix: &Path) -> PathBuf {
    with_suffix(out_prefix, "log")
}

/// What happened when PLINK was asked to merge.
#[derive(Debug)]
pub enum MergeAttempt {
    Merged(BFileSet),
    /// The merge failed and PLINK listed the variants responsible.
    Conflicts { missnp: PathBuf, run: ToolRun },
    /// The merge failed for a reason that pruning can't fix.
    Failed(ToolRun),
}

/// Write the PLINK `--merge-list` file: every input after the first, one prefix per line.
pub fn write_merge_list(path: &Path, inputs: &[BFileSet]) -> Result<()> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut out = BufWriter::new(file);
    for set in inputs.iter().skip(1) {
        writeln!(out, "{}", set.prefix.display())?;
    }
    out.flush()?;
    Ok(())
}

pub fn merge_command(
    plink: &str,
    first: &BFileSet,
    merge_list: &Path,
    out_prefix: &Path,
) -> ToolCommand {
    ToolCommand::new(plink)
        .flag("--bfile", &first.prefix)
        .flag("--merge-list", merge_list)
        .arg("--make-bed")
        .flag("--out", out_prefix)
}

/// Merge `inputs` into `out_prefix` once and classify the result. A missnp
/// file left over from an earlier run is removed first, so `Conflicts` is
/// only reported when this attempt wrote one.
pub fn run_merge(
    runner: &dyn ToolRunner,
    plink: &str,
    inputs: &[BFileSet],
    merge_list: &Path,
    out_prefix: &Path,
) -> Result<MergeAttempt> {
    write_merge_list(merge_list, inputs)?;
    let missnp = missnp_path(out_prefix);
    if missnp.exists() {
        fs::remove_file(&missnp).with_context(|| missnp.display().to_string())?;
    }
    let run = runner.run(&merge_command(plink, &inputs[0], merge_list, out_prefix))?;
    if run.success {
        let merged = BFileSet::from_prefix(out_prefix, None);
        ensure_outputs("plink", &merged.paths())?;
        return Ok(MergeAttempt::Merged(merged));
    }
    if missnp.is_file() {
        Ok(MergeAttempt::Conflicts { missnp, run })
    } else {
        Ok(MergeAttempt::Failed(run))
    }
}

/// Variant IDs listed in a .missnp file, first occurrence order, de-duplicated.
pub fn read_problem_variants(missnp: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(missnp).with_context(|| missnp.display().to_string())?);
    let mut ids = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| missnp.display().to_string())?;
        if let Some(id) = line.split_whitespace().next() {
            ids.push(id.to_string());
        }
    }
    Ok(ids.into_iter().unique().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge_command() {
        let first = BFileSet::from_prefix(Path::new("/ref/g1000_eur"), None);
        let cmd = merge_command(
            "plink",
            &first,
            Path::new("/w/merge_list.txt"),
            Path::new("/w/merge"),
        );
        assert_eq!(
            cmd.to_string(),
            "plink --bfile /ref/g1000_eur --merge-list /w/merge_list.txt --make-bed --out /w/merge"
        );
        assert_eq!(missnp_path(Path::new("/w/merge")), PathBuf::from("/w/merge-merge.missnp"));
        assert_eq!(log_path(Path::new("/w/merge")), PathBuf::from("/w/merge.log"));
    }

    #[test]
    fn test_read_problem_variants() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("merge-merge.missnp");
        std::fs::write(&path, "rs10\nrs11\n\nrs10\n1_1000_A_G\n")?;
        assert_eq!(read_problem_variants(&path)?, vec!["rs10", "rs11", "1_1000_A_G"]);
        Ok(())
    }

    #[test]
    fn test_write_merge_list_skips_first() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("merge_list.txt");
        let inputs: Vec<_> = ["/a/eur", "/b/eas", "/c/afr"]
            .iter()
            .map(|p| BFileSet::from_prefix(Path::new(p), None))
            .collect();
        write_merge_list(&path, &inputs)?;
        assert_eq!(std::fs::read_to_string(&path)?, "/b/eas\n/c/afr\n");
        Ok(())
    }
}
