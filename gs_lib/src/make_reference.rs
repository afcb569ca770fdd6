//! Build a multi-ancestry LD reference panel by merging 1000 Genomes bfile sets.
//!
//! The merge is attempted once on the original inputs. If PLINK rejects it
//! and names the offending variants, those variants are removed from every
//! input and the merge is retried exactly once; a second failure is final.

use crate::plink::{log_path, read_problem_variants, run_merge, MergeAttempt};
use crate::prune::prune_variants;
use crate::relocate::move_outputs;
use crate::tool::ToolRunner;
use crate::workspace::WorkDirs;
use anyhow::{Context, Result};
use gs_types::ancestry::Ancestry;
use gs_types::bfile::{BFileError, BFileSet, BFileType};
use itertools::Itertools;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const MERGE_LIST: &str = "merge_list.txt";
pub const PRUNED_MERGE_LIST: &str = "merge_list_pruned.txt";
pub const EXCLUDE_LIST: &str = "exclude_merge_variants.txt";
pub const FAILED_MISSNP: &str = "failed_merge.missnp";
pub const FAILED_LOG: &str = "failed_merge.log";

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error(
        "At least two bfile sets are needed to build a reference panel, but {found} remained \
         after selection: {selected:?}. Check the requested ancestries and --keep filters."
    )]
    TooFewInputs { found: usize, selected: Vec<PathBuf> },

    #[error(
        "Bfile sets {first:?} and {second:?} share the file name '{stem}'. Use --keep to choose \
         one of them."
    )]
    DuplicateStem {
        stem: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error(
        "Merging {inputs:?} failed and PLINK did not report any problem variants to prune:\n{log}"
    )]
    MergeFailed { inputs: Vec<PathBuf>, log: String },

    #[error("Merging {inputs:?} failed again after pruning {pruned} problem variants:\n{log}")]
    RetryFailed {
        inputs: Vec<PathBuf>,
        pruned: usize,
        log: String,
    },
}

/// Collect every complete bfile set under `bfile_dir` whose name marks it as
/// one of `ancestries`. Directory entries are visited in sorted order, and
/// sets are returned in the order their first file was seen.
pub fn use_bfiles(bfile_dir: &Path, ancestries: &[Ancestry]) -> Result<Vec<BFileSet>> {
    let mut files = Vec::new();
    walk_sorted(bfile_dir, &mut files)?;

    let mut order: Vec<PathBuf> = Vec::new();
    let mut found: HashMap<PathBuf, (Ancestry, HashMap<BFileType, PathBuf>)> = HashMap::new();
    for path in files {
        let Some(file_type) = BFileType::from_path(&path) else {
            continue;
        };
        let Some(ancestry) = Ancestry::from_path(&path) else {
            continue;
        };
        if !ancestries.contains(&ancestry) {
            continue;
        }
        let prefix = path.with_extension("");
        let entry = found.entry(prefix.clone()).or_insert_with(|| {
            order.push(prefix.clone());
            (ancestry, HashMap::new())
        });
        if entry.1.contains_key(&file_type) {
            return Err(BFileError::DuplicateFile {
                prefix,
                file_type,
                path,
            }
            .into());
        }
        entry.1.insert(file_type, path);
    }

    let mut sets = Vec::with_capacity(order.len());
    for prefix in order {
        let (ancestry, members) = &found[&prefix];
        for file_type in [BFileType::Bed, BFileType::Bim, BFileType::Fam] {
            if !members.contains_key(&file_type) {
                return Err(BFileError::IncompleteSet {
                    prefix,
                    missing: file_type,
                }
                .into());
            }
        }
        sets.push(BFileSet::from_prefix(&prefix, Some(*ancestry)));
    }

    for ancestry in ancestries {
        if !sets.iter().any(|s| s.ancestry == Some(*ancestry)) {
            warn!("No bfile set for ancestry '{ancestry}' found under {}", bfile_dir.display());
        }
    }
    info!(
        "Available bfile sets that match ancestry:\n{}",
        sets.iter().map(|s| s.prefix.display()).join("\n")
    );
    Ok(sets)
}

fn walk_sorted(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| dir.display().to_string())?
        .map(|e| e.map(|e| e.path()))
        .try_collect()
        .with_context(|| dir.display().to_string())?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk_sorted(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Restrict `candidates` to those whose prefix contains any of `keep`.
/// An empty `keep` keeps everything.
pub fn select_bfiles(candidates: &[BFileSet], keep: &[String]) -> Vec<BFileSet> {
    candidates
        .iter()
        .filter(|set| {
            keep.is_empty() || {
                let prefix = set.prefix.to_string_lossy();
                keep.iter().any(|k| prefix.contains(k.as_str()))
            }
        })
        .cloned()
        .collect()
}

fn prefixes(sets: &[BFileSet]) -> Vec<PathBuf> {
    sets.iter().map(|s| s.prefix.clone()).collect()
}

/// Merge the selected bfile sets into `work_dir/<output_prefix>.{bed,bim,fam}`.
pub fn merge_bfiles(
    runner: &dyn ToolRunner,
    plink: &str,
    candidates: &[BFileSet],
    work_dir: &Path,
    output_prefix: &str,
    keep: &[String],
) -> Result<BFileSet> {
    let selected = select_bfiles(candidates, keep);
    if selected.len() < 2 {
        return Err(MergeError::TooFewInputs {
            found: selected.len(),
            selected: prefixes(&selected),
        }
        .into());
    }
    let mut stems: HashMap<String, &Path> = HashMap::new();
    for set in &selected {
        if let Some(first) = stems.insert(set.stem(), &set.prefix) {
            return Err(MergeError::DuplicateStem {
                stem: set.stem(),
                first: first.to_path_buf(),
                second: set.prefix.clone(),
            }
            .into());
        }
    }

    let out_prefix = work_dir.join(output_prefix);
    info!("Attempting to merge bfile sets {:?}", prefixes(&selected));
    let (missnp, first_run) =
        match run_merge(runner, plink, &selected, &work_dir.join(MERGE_LIST), &out_prefix)? {
            MergeAttempt::Merged(merged) => return Ok(merged),
            MergeAttempt::Failed(run) => {
                return Err(MergeError::MergeFailed {
                    inputs: prefixes(&selected),
                    log: run.log(),
                }
                .into())
            }
            MergeAttempt::Conflicts { missnp, run } => (missnp, run),
        };

    let problem_variants = read_problem_variants(&missnp)?;
    warn!(
        "Failed to merge bfile sets ({} problem variants). Pruning problem variants before \
         trying again",
        problem_variants.len()
    );
    // Keep the diagnostics of the failed attempt out of the way of the retry.
    fs::rename(&missnp, work_dir.join(FAILED_MISSNP))?;
    let plink_log = log_path(&out_prefix);
    if plink_log.exists() {
        fs::rename(&plink_log, work_dir.join(FAILED_LOG))?;
    } else {
        fs::write(work_dir.join(FAILED_LOG), first_run.log())?;
    }
    fs::write(work_dir.join(EXCLUDE_LIST), problem_variants.join("\n"))?;

    let exclude: HashSet<String> = problem_variants.iter().cloned().collect();
    let pruned: Vec<BFileSet> = selected
        .iter()
        .map(|set| {
            let pruned_prefix = work_dir.join(format!("{}.pruned", set.stem()));
            prune_variants(set, &exclude, &pruned_prefix)
        })
        .try_collect()?;

    info!("Retrying bfile set merge...");
    match run_merge(runner, plink, &pruned, &work_dir.join(PRUNED_MERGE_LIST), &out_prefix)? {
        MergeAttempt::Merged(merged) => {
            info!("...success");
            Ok(merged)
        }
        MergeAttempt::Conflicts { run, .. } | MergeAttempt::Failed(run) => {
            Err(MergeError::RetryFailed {
                inputs: prefixes(&pruned),
                pruned: problem_variants.len(),
                log: run.log(),
            }
            .into())
        }
    }
}

/// Arguments of the reference-building workflow.
#[derive(Debug, Clone)]
pub struct MakeReference {
    pub bfile_dir: PathBuf,
    pub ancestries: Vec<Ancestry>,
    pub keep: Vec<String>,
    pub output_prefix: String,
}

impl MakeReference {
    /// Resolve, merge and relocate. Returns the reference panel in the output directory.
    pub fn run(&self, dirs: &WorkDirs, runner: &dyn ToolRunner, plink: &str) -> Result<BFileSet> {
        let candidates = use_bfiles(&self.bfile_dir, &self.ancestries)?;
        let merged = merge_bfiles(
            runner,
            plink,
            &candidates,
            &dirs.work_dir,
            &self.output_prefix,
            &self.keep,
        )?;
        move_outputs(&dirs.output_dir, &merged.paths())?;
        Ok(BFileSet::from_prefix(
            &dirs.output_dir.join(&self.output_prefix),
            None,
        ))
    }
}
