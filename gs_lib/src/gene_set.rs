//! Turning MAGMA gene-level results into scDRS gene-set (.gs) files.

use anyhow::{bail, ensure, Context, Result};
use gs_types::constants::{GENE_SEPARATOR, GENE_SET_HEADER};
use gs_types::csv_parser::{ColumnRef, Delimiter, Field, FieldKind, TableReader, TableSchema};
use itertools::Itertools;
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const GENE_ID: &str = "gene_id";
const GENE_NAME: &str = "gene_name";
const GENE: &str = "gene";
const PVAL: &str = "pval";
const TRAIT: &str = "trait";

/// How to read a gene ID to gene name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneNameMapColumns {
    pub header: bool,
    /// Detected from the first line when None.
    pub delimiter: Option<Delimiter>,
    pub id_column: ColumnRef,
    pub name_column: ColumnRef,
}

impl Default for GeneNameMapColumns {
    fn default() -> Self {
        GeneNameMapColumns {
            header: false,
            delimiter: None,
            id_column: ColumnRef::Index(0),
            name_column: ColumnRef::Index(1),
        }
    }
}

/// Read a table mapping the gene IDs used for annotation (e.g. Entrez IDs)
/// to the gene names used in the single-cell data.
pub fn load_gene_name_map(
    path: &Path,
    columns: &GeneNameMapColumns,
) -> Result<HashMap<String, String>> {
    let schema = TableSchema::new(
        "gene name map",
        vec![
            Field::required(GENE_ID, FieldKind::Text).column(Some(columns.id_column.clone())),
            Field::required(GENE_NAME, FieldKind::Text).column(Some(columns.name_column.clone())),
        ],
    );
    let reader = TableReader::open(path, columns.delimiter, columns.header)?;
    let cols = reader.resolve(&schema)?;

    let mut map = HashMap::new();
    for record in reader {
        let record = record?;
        let (Some(id), Some(name)) = (cols.text(&record, GENE_ID)?, cols.text(&record, GENE_NAME)?)
        else {
            continue;
        };
        if let Some(previous) = map.insert(id.to_string(), name.to_string()) {
            debug!("gene {id} mapped to {previous} and {name}; keeping {name}");
        }
    }
    info!("Loaded {} gene names from {}", map.len(), path.display());
    Ok(map)
}

/// How to read a MAGMA `.genes.out` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneSetColumns {
    pub header: bool,
    pub delimiter: Option<Delimiter>,
    pub gene: ColumnRef,
    pub pval: ColumnRef,
}

impl Default for GeneSetColumns {
    fn default() -> Self {
        GeneSetColumns {
            header: true,
            delimiter: Some(Delimiter::Whitespace),
            gene: ColumnRef::Name("GENE".to_string()),
            pval: ColumnRef::Name("P".to_string()),
        }
    }
}

/// The genes most strongly associated with one trait, most significant first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraitGeneSet {
    pub trait_name: String,
    pub genes: Vec<String>,
}

/// Select the `top_n` genes with the smallest p-values from a MAGMA
/// `.genes.out` file. Genes with equal p-values keep their file order.
/// IDs without an entry in `name_map` are kept as they are.
pub fn munge_magma(
    genes_out: &Path,
    trait_name: &str,
    top_n: usize,
    columns: &GeneSetColumns,
    name_map: Option<&HashMap<String, String>>,
) -> Result<TraitGeneSet> {
    let schema = TableSchema::new(
        "MAGMA gene analysis",
        vec![
            Field::required(GENE, FieldKind::Text).column(Some(columns.gene.clone())),
            Field::required(PVAL, FieldKind::Float).column(Some(columns.pval.clone())),
        ],
    );
    let reader = TableReader::open(genes_out, columns.delimiter, columns.header)?;
    let cols = reader.resolve(&schema)?;

    let mut genes: Vec<(f64, String)> = Vec::new();
    for record in reader {
        let record = record?;
        let missing = |field: &str| {
            format!("{}: line {} has no {field}", genes_out.display(), record.line)
        };
        let gene = cols.text(&record, GENE)?.with_context(|| missing("gene"))?;
        let p = cols.float(&record, PVAL)?.with_context(|| missing("p-value"))?;
        genes.push((p, gene.to_string()));
    }
    let total = genes.len();
    genes.sort_by(|a, b| a.0.total_cmp(&b.0));
    genes.truncate(top_n);

    let mut unmapped = 0;
    let genes = genes
        .into_iter()
        .map(|(_, gene)| match name_map.and_then(|m| m.get(&gene)) {
            Some(name) => name.clone(),
            None => {
                unmapped += usize::from(name_map.is_some());
                gene
            }
        })
        .collect::<Vec<_>>();
    if unmapped > 0 {
        info!(
            "{unmapped} of the selected genes for {trait_name} have no entry in the gene name map"
        );
    }
    info!(
        "Selected {} of {total} genes for trait {trait_name}",
        genes.len()
    );
    Ok(TraitGeneSet {
        trait_name: trait_name.to_string(),
        genes,
    })
}

/// Write gene sets in the scDRS `.gs` format: a `TRAIT GENESET` header and
/// one tab-separated row per trait with comma-separated genes.
pub fn write_gene_sets(path: &Path, sets: &[TraitGeneSet]) -> Result<()> {
    ensure!(!sets.is_empty(), "no gene sets to write to {}", path.display());
    if let Some(dup) = sets.iter().map(|s| &s.trait_name).duplicates().next() {
        bail!("trait '{dup}' appears more than once");
    }
    let mut out = BufWriter::new(File::create(path).with_context(|| path.display().to_string())?);
    writeln!(out, "{}", GENE_SET_HEADER.join("\t"))?;
    for set in sets {
        ensure!(
            !set.trait_name.is_empty() && !set.trait_name.contains(['\t', '\n']),
            "invalid trait name '{}'",
            set.trait_name
        );
        writeln!(
            out,
            "{}\t{}",
            set.trait_name,
            set.genes.iter().join(&GENE_SEPARATOR.to_string())
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Trait names listed in a `.gs` file, in file order.
pub fn read_gene_set_traits(path: &Path) -> Result<Vec<String>> {
    let schema = TableSchema::new(
        "gene set",
        vec![Field::required(TRAIT, FieldKind::Text).pattern(&format!("^{}$", GENE_SET_HEADER[0]))],
    );
    let reader = TableReader::open(path, Some(Delimiter::Tab), true)?;
    let cols = reader.resolve(&schema)?;
    let mut traits = Vec::new();
    for record in reader {
        let record = record?;
        if let Some(t) = cols.text(&record, TRAIT)? {
            traits.push(t.to_string());
        }
    }
    Ok(traits)
}
