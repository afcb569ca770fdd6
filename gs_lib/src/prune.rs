//! Removing variants from a PLINK bfile set without calling out to PLINK.
//!
//! A variant-major .bed file is three magic bytes followed by one block of
//! `ceil(n_samples / 4)` bytes per variant, in .bim order, so excluding a
//! variant means dropping its .bim line and its .bed block.

use anyhow::{bail, ensure, Context, Result};
use gs_types::bfile::BFileSet;
use log::info;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// .bed magic number followed by the variant-major mode byte.
pub const BED_MAGIC: [u8; 3] = [0x6c, 0x1b, 0x01];

/// Bytes per variant block for `num_samples` samples at 2 bits each.
pub fn bytes_per_variant(num_samples: usize) -> usize {
    num_samples.div_ceil(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneSummary {
    pub total: usize,
    pub kept: usize,
    pub removed: usize,
}

/// Write a copy of `input` to `out_prefix.{bed,bim,fam}` without the
/// variants whose IDs are in `exclude`.
pub fn prune_variants(
    input: &BFileSet,
    exclude: &HashSet<String>,
    out_prefix: &Path,
) -> Result<BFileSet> {
    let output = BFileSet::from_prefix(out_prefix, input.ancestry);
    let summary = prune_into(input, exclude, &output)?;
    info!(
        "Pruned {} of {} variants from {} ({} kept)",
        summary.removed,
        summary.total,
        input.prefix.display(),
        summary.kept
    );
    Ok(output)
}

fn prune_into(
    input: &BFileSet,
    exclude: &HashSet<String>,
    output: &BFileSet,
) -> Result<PruneSummary> {
    let num_samples = input.num_samples()?;
    let block = bytes_per_variant(num_samples);

    // .bim: decide which variants survive
    let bim_in = BufReader::new(
        File::open(&input.bim).with_context(|| input.bim.display().to_string())?,
    );
    let mut bim_out = BufWriter::new(
        File::create(&output.bim).with_context(|| output.bim.display().to_string())?,
    );
    let mut keep = Vec::new();
    for (i, line) in bim_in.lines().enumerate() {
        let line = line.with_context(|| input.bim.display().to_string())?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(id) = line.split_whitespace().nth(1) else {
            bail!("{}: line {} is not a valid .bim record", input.bim.display(), i + 1);
        };
        let kept = !exclude.contains(id);
        if kept {
            writeln!(bim_out, "{line}")?;
        }
        keep.push(kept);
    }
    bim_out.flush()?;

    // .bed: copy the blocks of surviving variants
    let bed_len = std::fs::metadata(&input.bed)
        .with_context(|| input.bed.display().to_string())?
        .len();
    let expected_len = (BED_MAGIC.len() + keep.len() * block) as u64;
    ensure!(
        bed_len == expected_len,
        "{} is {bed_len} bytes, but {} variants x {num_samples} samples requires {expected_len}",
        input.bed.display(),
        keep.len(),
    );

    let mut bed_in = BufReader::new(File::open(&input.bed)?);
    let mut magic = [0u8; 3];
    bed_in.read_exact(&mut magic)?;
    ensure!(
        magic == BED_MAGIC,
        "{} is not a variant-major PLINK .bed file",
        input.bed.display()
    );
    let mut bed_out = BufWriter::new(
        File::create(&output.bed).with_context(|| output.bed.display().to_string())?,
    );
    bed_out.write_all(&BED_MAGIC)?;
    let mut buf = vec![0u8; block];
    for &kept in &keep {
        bed_in.read_exact(&mut buf)?;
        if kept {
            bed_out.write_all(&buf)?;
        }
    }
    bed_out.flush()?;

    std::fs::copy(&input.fam, &output.fam).with_context(|| {
        format!("copying {} to {}", input.fam.display(), output.fam.display())
    })?;

    let kept = keep.iter().filter(|&&k| k).count();
    Ok(PruneSummary {
        total: keep.len(),
        kept,
        removed: keep.len() - kept,
    })
}
