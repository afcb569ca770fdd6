//! Reading scDRS per-cell scores and splitting cells into high and low
//! scoring subpopulations.

use anyhow::{ensure, Context, Result};
use gs_types::csv_parser::{ColumnRef, Delimiter, Field, FieldKind, TableReader, TableSchema};
use log::info;
use std::cmp::Ordering;
use std::path::Path;
use strum_macros::Display;

const CELL: &str = "cell";
const RAW_SCORE: &str = "raw_score";
const NORM_SCORE: &str = "norm_score";
const MC_PVAL: &str = "mc_pval";
const PVAL: &str = "pval";
const NLOG10_PVAL: &str = "nlog10_pval";
const ZSCORE: &str = "zscore";

#[derive(Debug, Clone, PartialEq)]
pub struct CellScore {
    pub cell: String,
    pub raw_score: Option<f64>,
    pub norm_score: f64,
    pub mc_pval: Option<f64>,
    pub pval: f64,
    pub nlog10_pval: Option<f64>,
    pub zscore: Option<f64>,
}

fn schema() -> TableSchema {
    TableSchema::new(
        "scDRS score",
        vec![
            Field::required(CELL, FieldKind::Text).column(Some(ColumnRef::Index(0))),
            Field::optional(RAW_SCORE, FieldKind::Float).pattern("^raw_score$"),
            Field::required(NORM_SCORE, FieldKind::Float).pattern("^norm_score$"),
            Field::optional(MC_PVAL, FieldKind::Float).pattern("^mc_pval$"),
            Field::required(PVAL, FieldKind::Float).pattern("^pval$"),
            Field::optional(NLOG10_PVAL, FieldKind::Float).pattern("^nlog10_pval$"),
            Field::optional(ZSCORE, FieldKind::Float).pattern("^zscore$"),
        ],
    )
}

/// Read a scDRS `.score.gz` (or uncompressed) table.
pub fn read_cell_scores(path: &Path) -> Result<Vec<CellScore>> {
    let reader = TableReader::open(path, Some(Delimiter::Tab), true)?;
    let cols = reader.resolve(&schema())?;
    let mut scores = Vec::new();
    for record in reader {
        let record = record?;
        cols.validate(&record)?;
        let missing =
            |field: &str| format!("{}: line {} has no {field}", path.display(), record.line);
        scores.push(CellScore {
            cell: cols
                .text(&record, CELL)?
                .with_context(|| missing(CELL))?
                .to_string(),
            raw_score: cols.float(&record, RAW_SCORE)?,
            norm_score: cols.float(&record, NORM_SCORE)?.with_context(|| missing(NORM_SCORE))?,
            mc_pval: cols.float(&record, MC_PVAL)?,
            pval: cols.float(&record, PVAL)?.with_context(|| missing(PVAL))?,
            nlog10_pval: cols.float(&record, NLOG10_PVAL)?,
            zscore: cols.float(&record, ZSCORE)?,
        });
    }
    info!("Read scores for {} cells from {}", scores.len(), path.display());
    Ok(scores)
}

/// Trait name of a scDRS score file, e.g. `height` for `height.score.gz`.
pub fn score_file_trait(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    [".full_score.gz", ".score.gz", ".full_score", ".score"]
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix).map(String::from))
        .unwrap_or(name)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Subpopulation {
    High,
    Low,
}

/// Number of cells labelled `High` when `split_pct` percent of `n` cells are taken.
pub fn num_high(n: usize, split_pct: f64) -> usize {
    ((n as f64 * split_pct / 100.0).ceil() as usize).min(n)
}

/// Label the `split_pct` percent most significant cells `High` and the rest
/// `Low`. Cells are ranked by `pval`, then by descending `norm_score`, then
/// by input order. Labels are returned in input order.
pub fn label_subpopulations(scores: &[CellScore], split_pct: f64) -> Result<Vec<Subpopulation>> {
    ensure!(
        split_pct > 0.0 && split_pct <= 100.0,
        "split percentage must be in (0, 100], got {split_pct}"
    );
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| rank(&scores[a], &scores[b]));

    let n_high = num_high(scores.len(), split_pct);
    let mut labels = vec![Subpopulation::Low; scores.len()];
    for &i in &order[..n_high] {
        labels[i] = Subpopulation::High;
    }
    info!(
        "Labelled {n_high} of {} cells as {}",
        scores.len(),
        Subpopulation::High
    );
    Ok(labels)
}

fn rank(a: &CellScore, b: &CellScore) -> Ordering {
    a.pval
        .total_cmp(&b.pval)
        .then_with(|| b.norm_score.total_cmp(&a.norm_score))
}

/// Write `cell norm_score pval label` rows, tab-separated.
pub fn write_labels(path: &Path, scores: &[CellScore], labels: &[Subpopulation]) -> Result<()> {
    ensure!(
        scores.len() == labels.len(),
        "{} scores but {} labels",
        scores.len(),
        labels.len()
    );
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| path.display().to_string())?;
    writer.write_record([CELL, NORM_SCORE, PVAL, "label"])?;
    for (score, label) in scores.iter().zip(labels) {
        writer.write_record([
            score.cell.clone(),
            score.norm_score.to_string(),
            score.pval.to_string(),
            label.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn score(cell: &str, norm_score: f64, pval: f64) -> CellScore {
        CellScore {
            cell: cell.to_string(),
            raw_score: None,
            norm_score,
            mc_pval: None,
            pval,
            nlog10_pval: None,
            zscore: None,
        }
    }

    #[test]
    fn test_score_file_trait() {
        assert_eq!(score_file_trait(Path::new("/o/height.score.gz")), "height");
        assert_eq!(score_file_trait(Path::new("bmi.full_score.gz")), "bmi");
        assert_eq!(score_file_trait(Path::new("scores.tsv")), "scores.tsv");
    }

    #[test]
    fn test_num_high() {
        assert_eq!(num_high(100, 10.0), 10);
        assert_eq!(num_high(101, 10.0), 11);
        assert_eq!(num_high(3, 10.0), 1);
        assert_eq!(num_high(0, 10.0), 0);
        assert_eq!(num_high(7, 100.0), 7);
    }

    #[test]
    fn test_label_subpopulations() -> Result<()> {
        let scores = vec![
            score("c0", 1.0, 0.5),
            score("c1", 3.0, 0.01),
            score("c2", 2.0, 0.2),
            score("c3", 4.0, 0.01),
            score("c4", 0.5, 0.9),
        ];
        // 40% of 5 cells: c3 wins the tie on pval with the higher norm_score.
        let labels = label_subpopulations(&scores, 40.0)?;
        use Subpopulation::{High, Low};
        assert_eq!(labels, vec![Low, High, Low, High, Low]);

        let labels = label_subpopulations(&scores, 10.0)?;
        assert_eq!(labels, vec![Low, Low, Low, High, Low]);

        assert!(label_subpopulations(&scores, 0.0).is_err());
        Ok(())
    }

    #[test]
    fn test_read_gzipped_scores_and_write_labels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("height.score.gz");
        let mut gz = GzEncoder::new(std::fs::File::create(&path)?, Compression::default());
        write!(
            gz,
            "\traw_score\tnorm_score\tmc_pval\tpval\tnlog10_pval\tzscore\n\
             AAACCTG-1\t0.52\t3.1\t0.001\t0.002\t2.69\t2.87\n\
             AAACGGG-1\t0.11\t-0.4\t0.6\t0.62\t0.20\t-0.30\n"
        )?;
        gz.finish()?;

        let scores = read_cell_scores(&path)?;
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].cell, "AAACCTG-1");
        assert_eq!(scores[0].norm_score, 3.1);
        assert_eq!(scores[1].zscore, Some(-0.30));

        let labels = label_subpopulations(&scores, 50.0)?;
        let out = dir.path().join("height.labels.tsv");
        write_labels(&out, &scores, &labels)?;
        assert_eq!(
            std::fs::read_to_string(&out)?,
            "cell\tnorm_score\tpval\tlabel\n\
             AAACCTG-1\t3.1\t0.002\thigh\n\
             AAACGGG-1\t-0.4\t0.62\tlow\n"
        );
        Ok(())
    }

    #[test]
    fn test_missing_pval_column() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.score");
        std::fs::write(&path, "\tnorm_score\ncell1\t1.0\n")?;
        let err = read_cell_scores(&path).unwrap_err();
        assert!(err.to_string().contains("'pval'"), "{err}");
        Ok(())
    }
}
