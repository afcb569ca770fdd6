//! Munging GWAS summary statistics into the SNP-location / p-value file MAGMA reads.

use anyhow::{bail, Context, Result};
use gs_types::constants::{
    FILLER_ID_SEPARATOR, MIN_MAGMA_PVALUE, MUNGED_BP_COLUMN, MUNGED_CHR_COLUMN, MUNGED_N_COLUMN,
    MUNGED_PVAL_COLUMN, MUNGED_SNP_COLUMN,
};
use gs_types::csv_parser::{ColumnRef, Field, FieldKind, TableError, TableReader, TableSchema};
use itertools::Itertools;
use log::{info, warn};
use std::path::Path;

const VARIANT_ID: &str = "variant_id";
const CHR: &str = "chr";
const BP: &str = "bp";
const PVAL: &str = "pval";
const EFFECT_ALLELE: &str = "effect_allele";
const REF_ALLELE: &str = "ref_allele";
const N: &str = "n";

/// Explicit column choices for a GWAS file. Any field left as None is found
/// by matching its header pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GwasColumns {
    pub variant_id: Option<ColumnRef>,
    pub chr: Option<ColumnRef>,
    pub bp: Option<ColumnRef>,
    pub pval: Option<ColumnRef>,
    pub effect_allele: Option<ColumnRef>,
    pub ref_allele: Option<ColumnRef>,
    pub n: Option<ColumnRef>,
}

impl GwasColumns {
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(
            "GWAS summary statistics",
            vec![
                Field::required(VARIANT_ID, FieldKind::Text)
                    .pattern(r"^(snp|variant|rs_?id|marker)")
                    .column(self.variant_id.clone()),
                Field::required(CHR, FieldKind::Text)
                    .pattern(r"^chr")
                    .column(self.chr.clone()),
                Field::required(BP, FieldKind::Integer)
                    .pattern(r"^(bp|base.?pair|pos)")
                    .column(self.bp.clone()),
                Field::required(PVAL, FieldKind::Float)
                    .pattern(r"^p([_.-]?val(ue)?)?$")
                    .column(self.pval.clone()),
                Field::required(EFFECT_ALLELE, FieldKind::Text)
                    .pattern(r"^(effect|minor|alt|a1$)")
                    .column(self.effect_allele.clone()),
                Field::optional(REF_ALLELE, FieldKind::Text)
                    .pattern(r"^(ref(erence)?|other|major|a2$)")
                    .column(self.ref_allele.clone()),
                Field::optional(N, FieldKind::Float)
                    .pattern(r"^n$")
                    .column(self.n.clone()),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MungeSummary {
    pub written: usize,
    /// Variants whose missing ID was filled as `CHR_BP_REF_EFFECT`.
    pub filled_ids: usize,
    /// p-values raised to `MIN_MAGMA_PVALUE`.
    pub clipped: usize,
    /// Rows without an effect allele or a p-value.
    pub dropped: usize,
    /// True if a per-variant sample size column was written.
    pub has_n: bool,
}

/// Read `input` and write a tab-separated `SNP CHR BP P [N]` file to `output`.
pub fn munge_gwas(input: &Path, columns: &GwasColumns, output: &Path) -> Result<MungeSummary> {
    let reader = TableReader::open(input, None, true)?;
    let schema = columns.schema();
    let cols = reader.resolve(&schema)?;
    info!(
        "Reading {} ({} delimited): {}",
        input.display(),
        reader.delimiter(),
        [VARIANT_ID, CHR, BP, PVAL, EFFECT_ALLELE, REF_ALLELE, N]
            .iter()
            .filter_map(|f| cols.column_name(f).map(|c| format!("{f}={c}")))
            .join(", ")
    );

    let headers = reader.headers().map(|h| h.join(", ")).unwrap_or_default();
    let has_n = cols.has(N);
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(output)
        .with_context(|| output.display().to_string())?;
    let mut header = vec![
        MUNGED_SNP_COLUMN,
        MUNGED_CHR_COLUMN,
        MUNGED_BP_COLUMN,
        MUNGED_PVAL_COLUMN,
    ];
    if has_n {
        header.push(MUNGED_N_COLUMN);
    }
    writer.write_record(&header)?;

    let floor = format!("{MIN_MAGMA_PVALUE:e}");
    let mut summary = MungeSummary {
        has_n,
        ..MungeSummary::default()
    };
    for record in reader {
        let record = record?;
        cols.validate(&record)?;

        let Some(effect) = cols.text(&record, EFFECT_ALLELE)? else {
            summary.dropped += 1;
            continue;
        };
        let (Some(p), Some(p_text)) = (cols.float(&record, PVAL)?, cols.text(&record, PVAL)?) else {
            summary.dropped += 1;
            continue;
        };
        if !(0.0..=1.0).contains(&p) {
            return Err(TableError::InvalidValue {
                filetype: schema.filetype().to_string(),
                path: input.to_path_buf(),
                line: record.line,
                column: cols.column_name(PVAL).unwrap_or_else(|| PVAL.to_string()),
                expected: "p-value between 0 and 1",
                value: p_text.to_string(),
            }
            .into());
        }

        let chr = required(cols.text(&record, CHR)?, input, record.line, CHR)?;
        let bp = cols
            .integer(&record, BP)?
            .with_context(|| {
                format!("{}: line {} has no base pair position", input.display(), record.line)
            })?
            .to_string();

        let id = match cols.text(&record, VARIANT_ID)? {
            Some(id) => id.to_string(),
            None => {
                if !cols.has(REF_ALLELE) {
                    return Err(TableError::MissingField {
                        filetype: schema.filetype().to_string(),
                        path: input.to_path_buf(),
                        field: REF_ALLELE.to_string(),
                        headers: headers.clone(),
                    })
                    .context("a reference allele column is needed to fill in missing variant IDs");
                }
                let reference =
                    required(cols.text(&record, REF_ALLELE)?, input, record.line, REF_ALLELE)?;
                summary.filled_ids += 1;
                [chr, bp.as_str(), reference, effect].join(FILLER_ID_SEPARATOR)
            }
        };

        let p_out = if p < MIN_MAGMA_PVALUE {
            summary.clipped += 1;
            floor.as_str()
        } else {
            p_text
        };

        let mut row = vec![id.as_str(), chr, bp.as_str(), p_out];
        if has_n {
            row.push(cols.text(&record, N)?.unwrap_or("NA"));
        }
        writer.write_record(&row)?;
        summary.written += 1;
    }
    writer.flush()?;

    if summary.dropped > 0 {
        warn!(
            "Dropped {} variants without an effect allele or p-value",
            summary.dropped
        );
    }
    info!(
        "Wrote {} variants to {} ({} IDs filled, {} p-values clipped to {floor})",
        summary.written,
        output.display(),
        summary.filled_ids,
        summary.clipped
    );
    Ok(summary)
}

fn required<'a>(value: Option<&'a str>, path: &Path, line: u64, field: &str) -> Result<&'a str> {
    match value {
        Some(v) => Ok(v),
        None => bail!("{}: line {line} has no value for '{field}'", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn munge(contents: &str, columns: &GwasColumns) -> Result<(MungeSummary, String)> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("gwas.txt");
        let output = dir.path().join("gwas.munged.tsv");
        std::fs::write(&input, contents)?;
        let summary = munge_gwas(&input, columns, &output)?;
        Ok((summary, std::fs::read_to_string(&output)?))
    }

    #[test]
    fn test_fill_missing_id_and_clip() -> Result<()> {
        let (summary, out) = munge(
            "SNP\tCHR\tBP\tA1\tA2\tP\n\
             rs1\t1\t500\tT\tC\t0.05\n\
             NA\t7\t1000\tG\tA\t0\n",
            &GwasColumns::default(),
        )?;
        assert_eq!(
            out,
            "SNP\tCHR\tBP\tP\n\
             rs1\t1\t500\t0.05\n\
             7_1000_A_G\t7\t1000\t1e-306\n"
        );
        assert_eq!(
            summary,
            MungeSummary {
                written: 2,
                filled_ids: 1,
                clipped: 1,
                dropped: 0,
                has_n: false,
            }
        );
        Ok(())
    }

    #[test]
    fn test_detects_comma_and_writes_n() -> Result<()> {
        let (summary, out) = munge(
            "variant_id,chromosome,base_pair_location,effect_allele,other_allele,p_value,n\n\
             rs1,2,10,A,G,1e-320,1000\n\
             rs2,2,20,,G,0.5,1000\n\
             rs3,2,30,C,G,NA,1000\n\
             rs4,2,40,C,G,3.2e-8,998\n",
            &GwasColumns::default(),
        )?;
        assert_eq!(
            out,
            "SNP\tCHR\tBP\tP\tN\n\
             rs1\t2\t10\t1e-306\t1000\n\
             rs4\t2\t40\t3.2e-8\t998\n"
        );
        assert_eq!(summary.dropped, 2);
        assert!(summary.has_n);
        Ok(())
    }

    #[test]
    fn test_explicit_columns() -> Result<()> {
        let columns = GwasColumns {
            variant_id: Some(ColumnRef::Name("MarkerName".into())),
            pval: Some(ColumnRef::Name("GC.Pvalue".into())),
            effect_allele: Some(ColumnRef::Name("Allele1".into())),
            ..GwasColumns::default()
        };
        let (_, out) = munge(
            "MarkerName Allele1 Allele2 CHR POS GC.Pvalue\n\
             rs9 a g 3 77 0.2\n",
            &columns,
        )?;
        assert_eq!(out, "SNP\tCHR\tBP\tP\nrs9\t3\t77\t0.2\n");
        Ok(())
    }

    #[test]
    fn test_bad_pvalue_reports_line() {
        let err = munge(
            "SNP\tCHR\tBP\tA1\tP\nrs1\t1\t5\tA\t0.1\nrs2\t1\t6\tA\t1.5\n",
            &GwasColumns::default(),
        )
        .unwrap_err();
        let table_err = err.downcast_ref::<TableError>().unwrap();
        assert!(matches!(table_err, TableError::InvalidValue { line: 3, .. }), "{table_err}");

        let err = munge(
            "SNP\tCHR\tBP\tA1\tP\nrs1\t1\t5\tA\tsmall\n",
            &GwasColumns::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn test_missing_required_column() {
        let err = munge("SNP\tCHR\tBP\tP\nrs1\t1\t5\t0.1\n", &GwasColumns::default()).unwrap_err();
        assert!(err.to_string().contains("effect_allele"), "{err}");
    }

    #[test]
    fn test_missing_id_needs_ref_allele() {
        let err = munge(
            "SNP\tCHR\tBP\tA1\tP\n.\t1\t5\tA\t0.1\n",
            &GwasColumns::default(),
        )
        .unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<TableError>(),
                Some(TableError::MissingField { field, .. }) if field == REF_ALLELE
            ),
            "{err:#}"
        );
    }
}
