//! Scoring cells against trait gene sets with `scdrs compute-score`.

use crate::gene_set::read_gene_set_traits;
use crate::tool::{ensure_outputs, ToolCommand, ToolRunner};
use anyhow::{ensure, Result};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreCellsArgs {
    pub h5ad_file: PathBuf,
    pub h5ad_species: String,
    pub gs_file: PathBuf,
    pub gs_species: String,
    pub cov_file: Option<PathBuf>,
    pub n_ctrl: usize,
    pub flag_filter_data: bool,
    pub flag_raw_count: bool,
}

/// Score files scDRS writes for one trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraitScores {
    pub trait_name: String,
    pub score: PathBuf,
    pub full_score: PathBuf,
}

impl TraitScores {
    pub fn new(out_folder: &Path, trait_name: &str) -> TraitScores {
        TraitScores {
            trait_name: trait_name.to_string(),
            score: out_folder.join(format!("{trait_name}.score.gz")),
            full_score: out_folder.join(format!("{trait_name}.full_score.gz")),
        }
    }
}

/// scDRS parses boolean flags from the strings `True` and `False`.
fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

pub fn compute_score_command(scdrs: &str, args: &ScoreCellsArgs, out_folder: &Path) -> ToolCommand {
    ToolCommand::new(scdrs)
        .arg("compute-score")
        .flag("--h5ad-file", &args.h5ad_file)
        .flag("--h5ad-species", &args.h5ad_species)
        .flag("--gs-file", &args.gs_file)
        .flag("--gs-species", &args.gs_species)
        .optional_flag("--cov-file", args.cov_file.as_ref().map(|p| p.display()))
        .flag("--flag-filter-data", py_bool(args.flag_filter_data))
        .flag("--flag-raw-count", py_bool(args.flag_raw_count))
        .flag("--n-ctrl", args.n_ctrl.to_string())
        .flag("--flag-return-ctrl-raw-score", py_bool(false))
        .flag("--flag-return-ctrl-norm-score", py_bool(true))
        .flag("--out-folder", out_folder)
}

/// Run scDRS for every trait in the gene-set file and return the score
/// files it wrote into `out_folder`.
pub fn score_cells(
    runner: &dyn ToolRunner,
    scdrs: &str,
    args: &ScoreCellsArgs,
    out_folder: &Path,
) -> Result<Vec<TraitScores>> {
    let traits = read_gene_set_traits(&args.gs_file)?;
    ensure!(
        !traits.is_empty(),
        "The gene set file {} does not list any traits",
        args.gs_file.display()
    );
    std::fs::create_dir_all(out_folder)?;

    runner.run(&compute_score_command(scdrs, args, out_folder))?.check()?;

    let scores: Vec<_> = traits.iter().map(|t| TraitScores::new(out_folder, t)).collect();
    for s in &scores {
        ensure_outputs(scdrs, &[s.score.as_path(), s.full_score.as_path()])?;
    }
    info!("Scored cells for {} traits", scores.len());
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolError, ToolRun};
    use pretty_assertions::assert_eq;

    struct FakeScdrs {
        write_traits: Vec<&'static str>,
    }

    impl ToolRunner for FakeScdrs {
        fn run(&self, command: &ToolCommand) -> Result<ToolRun> {
            let out = PathBuf::from(command.value_of("--out-folder").unwrap());
            for t in &self.write_traits {
                std::fs::write(out.join(format!("{t}.score.gz")), "")?;
                std::fs::write(out.join(format!("{t}.full_score.gz")), "")?;
            }
            Ok(ToolRun {
                command: command.to_string(),
                success: true,
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn args(dir: &Path) -> Result<ScoreCellsArgs> {
        let gs_file = dir.join("traits.gs");
        std::fs::write(&gs_file, "TRAIT\tGENESET\nheight\tA,B\nbmi\tC\n")?;
        Ok(ScoreCellsArgs {
            h5ad_file: dir.join("cells.h5ad"),
            h5ad_species: "mouse".into(),
            gs_file,
            gs_species: "human".into(),
            cov_file: None,
            n_ctrl: 500,
            flag_filter_data: false,
            flag_raw_count: true,
        })
    }

    #[test]
    fn test_compute_score_command() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let args = args(dir.path())?;
        let cmd = compute_score_command("scdrs", &args, Path::new("/out"));
        assert_eq!(cmd.args()[0], "compute-score");
        assert_eq!(cmd.value_of("--h5ad-species"), Some("mouse"));
        assert_eq!(cmd.value_of("--n-ctrl"), Some("500"));
        assert_eq!(cmd.value_of("--flag-filter-data"), Some("False"));
        assert_eq!(cmd.value_of("--flag-return-ctrl-norm-score"), Some("True"));
        assert_eq!(cmd.value_of("--cov-file"), None);
        Ok(())
    }

    #[test]
    fn test_score_cells_checks_every_trait() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let args = args(dir.path())?;
        let out = dir.path().join("scores");

        let scores = score_cells(
            &FakeScdrs {
                write_traits: vec!["height", "bmi"],
            },
            "scdrs",
            &args,
            &out,
        )?;
        assert_eq!(scores[1], TraitScores::new(&out, "bmi"));

        let err = score_cells(
            &FakeScdrs {
                write_traits: vec!["height"],
            },
            "scdrs",
            &args,
            &dir.path().join("scores2"),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolError>(),
            Some(ToolError::MissingOutput { path, .. }) if path.ends_with("bmi.score.gz")
        ));
        Ok(())
    }
}
