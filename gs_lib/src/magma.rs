//! MAGMA annotation and gene analysis.
//!
//! MAGMA names every output after `--out`, so each step returns typed paths
//! for the files it is known to produce and fails if any of them is absent.

use crate::tool::{ensure_outputs, ToolCommand, ToolRunner};
use anyhow::Result;
use gs_types::bfile::{with_suffix, BFileSet};
use log::info;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationOutputs {
    pub genes_annot: PathBuf,
    pub log: PathBuf,
}

impl AnnotationOutputs {
    pub fn from_prefix(out_prefix: &Path) -> AnnotationOutputs {
        AnnotationOutputs {
            genes_annot: with_suffix(out_prefix, "genes.annot"),
            log: with_suffix(out_prefix, "log"),
        }
    }

    pub fn paths(&self) -> [&Path; 2] {
        [&self.genes_annot, &self.log]
    }
}

/// Map variants to genes by location.
pub fn annotate_variants(
    runner: &dyn ToolRunner,
    magma: &str,
    gene_loc: &Path,
    snp_loc: &Path,
    out_prefix: &Path,
    window: Option<(u32, u32)>,
) -> Result<AnnotationOutputs> {
    let mut cmd = ToolCommand::new(magma).arg("--annotate");
    if let Some((up, down)) = window {
        cmd = cmd.modifier("window", format!("{up},{down}"));
    }
    let cmd = cmd
        .flag("--snp-loc", snp_loc)
        .flag("--gene-loc", gene_loc)
        .flag("--out", out_prefix);

    runner.run(&cmd)?.check()?;
    let outputs = AnnotationOutputs::from_prefix(out_prefix);
    ensure_outputs(magma, &outputs.paths())?;
    info!("Wrote gene annotation {}", outputs.genes_annot.display());
    Ok(outputs)
}

/// GWAS sample size: one total for the study, or a per-variant column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSize {
    Total(u64),
    Column(String),
}

impl SampleSize {
    fn modifier(&self) -> (&'static str, String) {
        match self {
            SampleSize::Total(n) => ("N", n.to_string()),
            SampleSize::Column(col) => ("ncol", col.clone()),
        }
    }
}

impl Display for SampleSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (key, value) = self.modifier();
        write!(f, "{key}={value}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneAnalysisOutputs {
    pub genes_out: PathBuf,
    pub genes_raw: PathBuf,
    pub log: PathBuf,
    pub log_suppl: PathBuf,
}

impl GeneAnalysisOutputs {
    pub fn from_prefix(out_prefix: &Path) -> GeneAnalysisOutputs {
        GeneAnalysisOutputs {
            genes_out: with_suffix(out_prefix, "genes.out"),
            genes_raw: with_suffix(out_prefix, "genes.raw"),
            log: with_suffix(out_prefix, "log"),
            log_suppl: with_suffix(out_prefix, "log.suppl"),
        }
    }

    pub fn paths(&self) -> [&Path; 4] {
        [&self.genes_out, &self.genes_raw, &self.log, &self.log_suppl]
    }
}

/// Column names of the variant-ID and p-value columns in a p-value file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvalColumns {
    pub variant_id: String,
    pub pval: String,
}

/// SNP-wise gene analysis of GWAS p-values against an LD reference panel.
pub fn gene_analysis(
    runner: &dyn ToolRunner,
    magma: &str,
    reference: &BFileSet,
    gene_annot: &Path,
    gwas: &Path,
    columns: &PvalColumns,
    sample_size: &SampleSize,
    out_prefix: &Path,
) -> Result<GeneAnalysisOutputs> {
    let (n_key, n_value) = sample_size.modifier();
    let cmd = ToolCommand::new(magma)
        .flag("--bfile", &reference.prefix)
        .flag("--gene-annot", gene_annot)
        .flag("--pval", gwas)
        .modifier("use", format!("{},{}", columns.variant_id, columns.pval))
        .modifier(n_key, n_value)
        .flag("--out", out_prefix);

    runner.run(&cmd)?.check()?;
    let outputs = GeneAnalysisOutputs::from_prefix(out_prefix);
    ensure_outputs(magma, &outputs.paths())?;
    info!("Wrote gene analysis results {}", outputs.genes_out.display());
    Ok(outputs)
}
