//! gwas2sc
#![deny(missing_docs)]

use anyhow::{bail, ensure, Context, Result};
use clap::{ArgAction, Parser};
use gs_lib::cell_scores::{label_subpopulations, read_cell_scores, score_file_trait, write_labels};
use gs_lib::gene_set::{
    load_gene_name_map, munge_magma, write_gene_sets, GeneNameMapColumns, GeneSetColumns,
};
use gs_lib::gwas::{munge_gwas, GwasColumns};
use gs_lib::magma::{annotate_variants, gene_analysis, PvalColumns, SampleSize};
use gs_lib::make_reference::MakeReference;
use gs_lib::parameters::Parameters;
use gs_lib::relocate::move_outputs;
use gs_lib::scdrs::{score_cells, ScoreCellsArgs};
use gs_lib::{ProcessRunner, ToolRunner, WorkDirs};
use gs_types::bfile::BFileSet;
use gs_types::constants::{DEFAULT_MERGE_PREFIX, MUNGED_PVAL_COLUMN, MUNGED_SNP_COLUMN};
use gs_types::csv_parser::{ColumnRef, Delimiter};
use gs_types::Ancestry;
use gs_wrap::logging::init_logging;
use gs_wrap::utils::{print_error_chain, set_env_columns, CliPath, TraitInput};
use itertools::Itertools;
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

const CMD: &str = "gwas2sc";

/// Build trait-associated gene sets from GWAS summary statistics and score
/// single cells against them.
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
struct Gwas2Sc {
    #[clap(subcommand)]
    subcmd: SubCommand,

    /// Parameters TOML file. Defaults to parameters.toml next to the executable.
    #[clap(long, global = true, value_name = "TOML")]
    params: Option<CliPath>,

    /// Log more detail (-v for debug, -vv for trace).
    #[clap(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Merge 1000 Genomes bfile sets of the chosen ancestries into one LD reference panel.
    #[clap(name = "make-reference")]
    MakeReference(MakeReferenceArgs),

    /// Reformat GWAS summary statistics into a MAGMA SNP-location and p-value file.
    #[clap(name = "munge-gwas")]
    MungeGwas(MungeGwasArgs),

    /// Map variants to genes with MAGMA.
    #[clap(name = "annotate")]
    Annotate(AnnotateArgs),

    /// Run MAGMA gene analysis of GWAS p-values.
    #[clap(name = "gene-analysis")]
    GeneAnalysis(GeneAnalysisArgs),

    /// Build an scDRS gene-set file from MAGMA gene analysis results.
    #[clap(name = "gene-set")]
    GeneSet(GeneSetArgs),

    /// Score single cells against trait gene sets with scDRS.
    #[clap(name = "score-cells")]
    ScoreCells(ScoreCellsCli),

    /// Split scored cells into high and low scoring subpopulations.
    #[clap(name = "label-cells")]
    LabelCells(LabelCellsArgs),
}

#[derive(Parser, Debug, Clone)]
struct MakeReferenceArgs {
    /// Directory searched recursively for 1000 Genomes .bed/.bim/.fam files.
    #[clap(long, value_name = "PATH")]
    bfile_dir: CliPath,

    /// Ancestries to include (afr, amr, eas, eur, sas), comma separated.
    #[clap(long, value_delimiter = ',', required = true)]
    ancestry: Vec<Ancestry>,

    /// Only merge bfile sets whose path contains one of these substrings.
    #[clap(long, value_delimiter = ',')]
    keep: Vec<String>,

    /// Prefix of the merged bfile set.
    #[clap(long, default_value = DEFAULT_MERGE_PREFIX)]
    prefix: String,

    /// Output directory.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct MungeGwasArgs {
    /// GWAS summary statistics (tab, comma or space delimited; optionally gzipped).
    #[clap(long, value_name = "PATH")]
    gwas: CliPath,

    /// Variant ID column. Inferred from the header when omitted.
    #[clap(long)]
    variant_id: Option<ColumnRef>,
    /// Chromosome column.
    #[clap(long)]
    chr: Option<ColumnRef>,
    /// Base pair position column.
    #[clap(long)]
    bp: Option<ColumnRef>,
    /// p-value column.
    #[clap(long)]
    pval: Option<ColumnRef>,
    /// Effect allele column.
    #[clap(long)]
    effect_allele: Option<ColumnRef>,
    /// Reference allele column.
    #[clap(long)]
    ref_allele: Option<ColumnRef>,
    /// Per-variant sample size column.
    #[clap(long)]
    n: Option<ColumnRef>,

    /// Name of the output file, without extension.
    #[clap(long, default_value = "gwas")]
    name: String,

    /// Output directory.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct AnnotateArgs {
    /// MAGMA gene location file.
    #[clap(long, value_name = "PATH")]
    gene_loc: CliPath,

    /// SNP location file, e.g. the output of munge-gwas.
    #[clap(long, value_name = "PATH")]
    snp_loc: CliPath,

    /// Kilobases upstream of each gene to include. Overrides the parameters file.
    #[clap(long, requires = "window_down")]
    window_up: Option<u32>,

    /// Kilobases downstream of each gene to include. Overrides the parameters file.
    #[clap(long, requires = "window_up")]
    window_down: Option<u32>,

    /// Annotate gene bodies only.
    #[clap(long, conflicts_with_all = ["window_up", "window_down"])]
    no_window: bool,

    /// Prefix of the MAGMA outputs.
    #[clap(long, default_value = "annotation")]
    prefix: String,

    /// Output directory.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct GeneAnalysisArgs {
    /// Prefix of the LD reference bfile set, e.g. the output of make-reference.
    #[clap(long, value_name = "PREFIX")]
    reference: PathBuf,

    /// Gene annotation (.genes.annot) from the annotate step.
    #[clap(long, value_name = "PATH")]
    gene_annot: CliPath,

    /// GWAS p-value file, e.g. the output of munge-gwas.
    #[clap(long, value_name = "PATH")]
    gwas: CliPath,

    /// Variant ID column of the p-value file.
    #[clap(long, default_value = MUNGED_SNP_COLUMN)]
    snp_column: String,

    /// p-value column of the p-value file.
    #[clap(long, default_value = MUNGED_PVAL_COLUMN)]
    pval_column: String,

    /// Total GWAS sample size.
    #[clap(
        long,
        required_unless_present = "sample_size_column",
        conflicts_with = "sample_size_column"
    )]
    sample_size: Option<u64>,

    /// Column of the p-value file holding the per-variant sample size.
    #[clap(long)]
    sample_size_column: Option<String>,

    /// Prefix of the MAGMA outputs.
    #[clap(long, default_value = "gene_analysis")]
    prefix: String,

    /// Output directory.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct GeneSetArgs {
    /// MAGMA .genes.out file for one trait, as TRAIT=PATH. Repeat for each trait.
    #[clap(long = "trait", value_name = "TRAIT=PATH", required = true)]
    traits: Vec<TraitInput>,

    /// Number of top genes per trait. Overrides the parameters file.
    #[clap(long)]
    top_n: Option<usize>,

    /// Table mapping gene IDs to gene names.
    #[clap(long, value_name = "PATH")]
    gene_name_map: Option<CliPath>,

    /// The gene name map has a header line.
    #[clap(long)]
    map_header: bool,

    /// Delimiter of the gene name map (tab, comma, whitespace). Detected when omitted.
    #[clap(long)]
    map_delimiter: Option<Delimiter>,

    /// Gene ID column of the gene name map, by position or header name.
    #[clap(long, default_value = "0")]
    map_id_column: ColumnRef,

    /// Gene name column of the gene name map, by position or header name.
    #[clap(long, default_value = "1")]
    map_name_column: ColumnRef,

    /// Name of the gene set file, without extension.
    #[clap(long, default_value = "traits")]
    name: String,

    /// Output directory.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct ScoreCellsCli {
    /// Single-cell expression data in .h5ad format.
    #[clap(long, value_name = "PATH")]
    h5ad: CliPath,

    /// Gene set file, e.g. the output of gene-set.
    #[clap(long, value_name = "PATH")]
    gs_file: CliPath,

    /// Covariates to regress out of the expression data.
    #[clap(long, value_name = "PATH")]
    cov_file: Option<CliPath>,

    /// Number of control gene sets. Overrides the parameters file.
    #[clap(long)]
    n_ctrl: Option<usize>,

    /// Species of the single-cell data. Overrides the parameters file.
    #[clap(long)]
    h5ad_species: Option<String>,

    /// Output directory.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

#[derive(Parser, Debug, Clone)]
struct LabelCellsArgs {
    /// scDRS per-cell score file (.score.gz).
    #[clap(long, value_name = "PATH")]
    scores: CliPath,

    /// Percentage of cells labelled high. Overrides the parameters file.
    #[clap(long)]
    split_pct: Option<f64>,

    /// Output directory.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

fn make_reference(
    args: MakeReferenceArgs,
    params: &Parameters,
    runner: &dyn ToolRunner,
) -> Result<()> {
    let dirs = WorkDirs::setup(&args.output)?;
    let step = MakeReference {
        bfile_dir: args.bfile_dir.into(),
        ancestries: args.ancestry,
        keep: args.keep,
        output_prefix: args.prefix,
    };
    let panel = step
        .run(&dirs, runner, &params.tools.plink)
        .context("Failed to build the LD reference panel")?;
    info!("Reference panel written to {}", panel.prefix.display());
    Ok(())
}

fn munge(args: MungeGwasArgs) -> Result<()> {
    let dirs = WorkDirs::setup(&args.output)?;
    let columns = GwasColumns {
        variant_id: args.variant_id,
        chr: args.chr,
        bp: args.bp,
        pval: args.pval,
        effect_allele: args.effect_allele,
        ref_allele: args.ref_allele,
        n: args.n,
    };
    let munged = dirs.work_path(&format!("{}.munged.tsv", args.name));
    munge_gwas(&args.gwas, &columns, &munged)?;
    move_outputs(&dirs.output_dir, &[munged])?;
    Ok(())
}

fn annotate(args: AnnotateArgs, params: &Parameters, runner: &dyn ToolRunner) -> Result<()> {
    let dirs = WorkDirs::setup(&args.output)?;
    let window = if args.no_window {
        None
    } else {
        args.window_up
            .zip(args.window_down)
            .or(params.annotation.window())
    };
    let outputs = annotate_variants(
        runner,
        &params.tools.magma,
        &args.gene_loc,
        &args.snp_loc,
        &dirs.work_path(&args.prefix),
        window,
    )?;
    move_outputs(&dirs.output_dir, &outputs.paths())?;
    Ok(())
}

fn analyze_genes(
    args: GeneAnalysisArgs,
    params: &Parameters,
    runner: &dyn ToolRunner,
) -> Result<()> {
    let reference = BFileSet::from_prefix(&args.reference, None);
    if let Some(missing) = reference.first_missing() {
        bail!(
            "The reference panel {} has no .{missing} file",
            args.reference.display()
        );
    }
    let sample_size = match (args.sample_size, args.sample_size_column) {
        (Some(n), None) => SampleSize::Total(n),
        (None, Some(col)) => SampleSize::Column(col),
        // clap enforces exactly one of the two
        _ => unreachable!(),
    };

    let dirs = WorkDirs::setup(&args.output)?;
    let outputs = gene_analysis(
        runner,
        &params.tools.magma,
        &reference,
        &args.gene_annot,
        &args.gwas,
        &PvalColumns {
            variant_id: args.snp_column,
            pval: args.pval_column,
        },
        &sample_size,
        &dirs.work_path(&args.prefix),
    )?;
    move_outputs(&dirs.output_dir, &outputs.paths())?;
    Ok(())
}

fn build_gene_sets(args: GeneSetArgs, params: &Parameters) -> Result<()> {
    let top_n = args.top_n.unwrap_or(params.gene_set.top_n);
    ensure!(top_n > 0, "--top-n must be at least 1");
    let name_map = args
        .gene_name_map
        .as_ref()
        .map(|path| {
            load_gene_name_map(
                path,
                &GeneNameMapColumns {
                    header: args.map_header,
                    delimiter: args.map_delimiter,
                    id_column: args.map_id_column.clone(),
                    name_column: args.map_name_column.clone(),
                },
            )
        })
        .transpose()?;

    let dirs = WorkDirs::setup(&args.output)?;
    let sets: Vec<_> = args
        .traits
        .iter()
        .map(|t| {
            munge_magma(
                &t.path,
                &t.trait_name,
                top_n,
                &GeneSetColumns::default(),
                name_map.as_ref(),
            )
        })
        .try_collect()?;
    let gs_file = dirs.work_path(&format!("{}.gs", args.name));
    write_gene_sets(&gs_file, &sets)?;
    move_outputs(&dirs.output_dir, &[gs_file])?;
    Ok(())
}

fn score(args: ScoreCellsCli, params: &Parameters, runner: &dyn ToolRunner) -> Result<()> {
    let dirs = WorkDirs::setup(&args.output)?;
    let scoring = &params.scoring;
    let score_args = ScoreCellsArgs {
        h5ad_file: args.h5ad.into(),
        h5ad_species: args.h5ad_species.unwrap_or_else(|| scoring.h5ad_species.clone()),
        gs_file: args.gs_file.into(),
        gs_species: scoring.gs_species.clone(),
        cov_file: args.cov_file.map(PathBuf::from),
        n_ctrl: args.n_ctrl.unwrap_or(scoring.n_ctrl),
        flag_filter_data: scoring.flag_filter_data,
        flag_raw_count: scoring.flag_raw_count,
    };
    ensure!(score_args.n_ctrl > 0, "--n-ctrl must be at least 1");
    let scores = score_cells(runner, &params.tools.scdrs, &score_args, &dirs.work_path("scores"))?;
    let files = scores
        .iter()
        .flat_map(|s| [s.score.clone(), s.full_score.clone()])
        .collect::<Vec<_>>();
    move_outputs(&dirs.output_dir, &files)?;
    Ok(())
}

fn label(args: LabelCellsArgs, params: &Parameters) -> Result<()> {
    let split_pct = args.split_pct.unwrap_or(params.labeling.split_pct);
    let scores = read_cell_scores(&args.scores)?;
    let labels = label_subpopulations(&scores, split_pct)?;

    let dirs = WorkDirs::setup(&args.output)?;
    let out = dirs.work_path(&format!("{}.labels.tsv", score_file_trait(&args.scores)));
    write_labels(&out, &scores, &labels)?;
    move_outputs(&dirs.output_dir, &[out])?;
    Ok(())
}

fn inner_main() -> Result<ExitCode> {
    set_env_columns();
    let opts = Gwas2Sc::parse();
    init_logging(opts.verbose);
    let params = Parameters::load(opts.params.as_deref())?;
    let runner = ProcessRunner;

    match opts.subcmd {
        SubCommand::MakeReference(args) => make_reference(args, &params, &runner)?,
        SubCommand::MungeGwas(args) => munge(args)?,
        SubCommand::Annotate(args) => annotate(args, &params, &runner)?,
        SubCommand::GeneAnalysis(args) => analyze_genes(args, &params, &runner)?,
        SubCommand::GeneSet(args) => build_gene_sets(args, &params)?,
        SubCommand::ScoreCells(args) => score(args, &params, &runner)?,
        SubCommand::LabelCells(args) => label(args, &params)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
