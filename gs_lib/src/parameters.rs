//! Tunable pipeline parameters, read from a TOML file with built-in defaults.

use anyhow::{ensure, Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the parameters file looked up next to the running executable.
pub const PARAMETERS_FILE: &str = "parameters.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    /// PLINK 1.9 executable.
    pub plink: String,
    pub magma: String,
    pub scdrs: String,
}

impl Default for Tools {
    fn default() -> Self {
        Tools {
            plink: "plink".to_string(),
            magma: "magma".to_string(),
            scdrs: "scdrs".to_string(),
        }
    }
}

/// Window in kilobases around each gene within which variants are assigned to it.
/// Omitting both sides means MAGMA's default of no window.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Annotation {
    pub window_up_kb: Option<u32>,
    pub window_down_kb: Option<u32>,
}

impl Default for Annotation {
    fn default() -> Self {
        Annotation {
            window_up_kb: Some(35),
            window_down_kb: Some(10),
        }
    }
}

impl Annotation {
    /// The `(upstream, downstream)` window, if both sides are set.
    pub fn window(&self) -> Option<(u32, u32)> {
        self.window_up_kb.zip(self.window_down_kb)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GeneSet {
    /// Number of most significant genes kept per trait.
    pub top_n: usize,
}

impl Default for GeneSet {
    fn default() -> Self {
        GeneSet { top_n: 1000 }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Scoring {
    /// Number of Monte Carlo control gene sets.
    pub n_ctrl: usize,
    pub h5ad_species: String,
    pub gs_species: String,
    pub flag_filter_data: bool,
    pub flag_raw_count: bool,
}

impl Default for Scoring {
    fn default() -> Self {
        Scoring {
            n_ctrl: 1000,
            h5ad_species: "human".to_string(),
            gs_species: "human".to_string(),
            flag_filter_data: true,
            flag_raw_count: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Labeling {
    /// Percentage of cells labelled as the high-scoring subpopulation.
    pub split_pct: f64,
}

impl Default for Labeling {
    fn default() -> Self {
        Labeling { split_pct: 10.0 }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    pub tools: Tools,
    pub annotation: Annotation,
    pub gene_set: GeneSet,
    pub scoring: Scoring,
    pub labeling: Labeling,
}

impl Parameters {
    /// Load parameters from `path` if given. Otherwise use `parameters.toml`
    /// next to the running executable, falling back to the built-in defaults
    /// when there is none.
    pub fn load(path: Option<&Path>) -> Result<Parameters> {
        let params = match path {
            Some(path) => Parameters::read(path)?,
            None => {
                let path = default_path()?;
                if path.exists() {
                    Parameters::read(&path)?
                } else {
                    warn!(
                        "could not find {PARAMETERS_FILE} at {}, falling back to defaults",
                        path.display()
                    );
                    Parameters::default()
                }
            }
        };
        params.validate()?;
        Ok(params)
    }

    fn read(path: &Path) -> Result<Parameters> {
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        let params: Parameters = toml::from_str(&s).with_context(|| path.display().to_string())?;
        if params != Parameters::default() {
            info!("using parameters from {}: {params:?}", path.display());
        }
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.gene_set.top_n > 0, "gene_set.top_n must be at least 1");
        ensure!(self.scoring.n_ctrl > 0, "scoring.n_ctrl must be at least 1");
        ensure!(
            self.labeling.split_pct > 0.0 && self.labeling.split_pct <= 100.0,
            "labeling.split_pct must be in (0, 100], got {}",
            self.labeling.split_pct
        );
        ensure!(
            self.annotation.window_up_kb.is_some() == self.annotation.window_down_kb.is_some(),
            "annotation.window_up_kb and annotation.window_down_kb must be set together"
        );
        Ok(())
    }
}

fn default_path() -> Result<PathBuf> {
    Ok(std::env::current_exe()
        .context("Unable to locate the running executable")?
        .with_file_name(PARAMETERS_FILE))
}
