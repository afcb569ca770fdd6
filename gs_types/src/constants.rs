/// MAGMA rejects p-values at or below ~1e-308; anything smaller than this is clipped up to it.
pub const MIN_MAGMA_PVALUE: f64 = 1e-306;

/// Header row of an scDRS gene-set (.gs) file.
pub const GENE_SET_HEADER: [&str; 2] = ["TRAIT", "GENESET"];

/// Separator between genes in the GENESET column.
pub const GENE_SEPARATOR: char = ',';

/// Separator used to build a filler variant ID from CHR, BP, REF and EFFECT.
pub const FILLER_ID_SEPARATOR: &str = "_";

/// Column names written by GWAS munging. The first three satisfy the MAGMA
/// SNP-location contract (ID, chromosome, position).
pub const MUNGED_SNP_COLUMN: &str = "SNP";
pub const MUNGED_CHR_COLUMN: &str = "CHR";
pub const MUNGED_BP_COLUMN: &str = "BP";
pub const MUNGED_PVAL_COLUMN: &str = "P";
pub const MUNGED_N_COLUMN: &str = "N";

/// Values treated as "no value" in input tables.
pub const MISSING_VALUES: [&str; 8] = ["", ".", "NA", "NaN", "nan", "null", "N/A", "<NA>"];

/// Default name stem of the merged reference panel.
pub const DEFAULT_MERGE_PREFIX: &str = "merge";

/// Returns true if `value` is one of the recognised missing-value markers.
pub fn is_missing(value: &str) -> bool {
    MISSING_VALUES.contains(&value.trim())
}
