//! Reading delimited tables against an explicit schema, with error messages
//! that name the offending field, column and line.

use crate::constants::is_missing;
use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use itertools::Itertools;
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Open a file for reading, transparently decompressing gzip input.
pub fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    let mut reader = BufReader::new(file);
    let is_gz = reader
        .fill_buf()
        .with_context(|| path.display().to_string())?
        .starts_with(&[0x1f, 0x8b]);
    if is_gz {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Comma,
    /// One or more spaces/tabs, as in MAGMA's .genes.out.
    Whitespace,
}

impl Delimiter {
    /// Guess the delimiter from a header line.
    pub fn detect(line: &str) -> Delimiter {
        if line.contains('\t') {
            Delimiter::Tab
        } else if line.contains(',') {
            Delimiter::Comma
        } else {
            Delimiter::Whitespace
        }
    }

    fn byte(self) -> Option<u8> {
        match self {
            Delimiter::Tab => Some(b'\t'),
            Delimiter::Comma => Some(b','),
            Delimiter::Whitespace => None,
        }
    }
}

impl FromStr for Delimiter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Delimiter> {
        Ok(match s {
            "tab" | "\t" | "\\t" | "tsv" => Delimiter::Tab,
            "comma" | "," | "csv" => Delimiter::Comma,
            "whitespace" | "space" | " " | "\\s+" => Delimiter::Whitespace,
            _ => bail!("unknown delimiter '{s}'; expected one of tab, comma, whitespace"),
        })
    }
}

impl Display for Delimiter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Delimiter::Tab => "tab",
            Delimiter::Comma => "comma",
            Delimiter::Whitespace => "whitespace",
        })
    }
}

/// Detect the delimiter of `path` from its first line.
pub fn detect_delimiter(path: &Path) -> Result<Delimiter> {
    let mut line = String::new();
    BufReader::new(open_maybe_gz(path)?)
        .read_line(&mut line)
        .with_context(|| path.display().to_string())?;
    Ok(Delimiter::detect(&line))
}

/// A column selected either by header name or by zero-based position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnRef {
    Name(String),
    Index(usize),
}

impl FromStr for ColumnRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<ColumnRef, Self::Err> {
        Ok(match s.parse::<usize>() {
            Ok(i) => ColumnRef::Index(i),
            Err(_) => ColumnRef::Name(s.to_string()),
        })
    }
}

impl Display for ColumnRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnRef::Name(name) => write!(f, "'{name}'"),
            ColumnRef::Index(i) => write!(f, "#{i}"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
}

impl FieldKind {
    fn expected(self) -> &'static str {
        match self {
            FieldKind::Text => "text value",
            FieldKind::Integer => "integer",
            FieldKind::Float => "number",
        }
    }
}

/// One logical field of a table schema.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Explicit column chosen by the caller. Takes precedence over `pattern`.
    pub column: Option<ColumnRef>,
    /// Header pattern used when no explicit column is given.
    pub pattern: Option<Regex>,
}

impl Field {
    pub fn required(name: &'static str, kind: FieldKind) -> Field {
        Field {
            name,
            kind,
            required: true,
            column: None,
            pattern: None,
        }
    }

    pub fn optional(name: &'static str, kind: FieldKind) -> Field {
        Field {
            required: false,
            ..Field::required(name, kind)
        }
    }

    pub fn column(mut self, column: Option<ColumnRef>) -> Field {
        if column.is_some() {
            self.column = column;
        }
        self
    }

    /// Case-insensitive header pattern. Panics on an invalid regex, which is
    /// always a programming error since patterns are static.
    pub fn pattern(mut self, pattern: &str) -> Field {
        self.pattern = Some(Regex::new(&format!("(?i){pattern}")).unwrap());
        self
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("The {filetype} file {path:?} is empty.")]
    Empty { filetype: String, path: PathBuf },

    #[error(
        "The {filetype} file {path:?} has no column for the required field '{field}'. \
         Found columns: {headers}. Pass the column name explicitly if it is named differently."
    )]
    MissingField {
        filetype: String,
        path: PathBuf,
        field: String,
        headers: String,
    },

    #[error(
        "The column {column} requested for field '{field}' does not exist in the {filetype} \
         file {path:?}. Found columns: {headers}"
    )]
    MissingColumn {
        filetype: String,
        path: PathBuf,
        field: String,
        column: ColumnRef,
        headers: String,
    },

    #[error(
        "The {filetype} file {path:?} has no header, so the column for field '{field}' must be \
         given by position rather than by name {column}."
    )]
    NamedColumnWithoutHeader {
        filetype: String,
        path: PathBuf,
        field: String,
        column: ColumnRef,
    },

    #[error(
        "Error in {filetype} file {path:?}. Line {line} has {found} columns, but field '{field}' \
         is read from column #{index}."
    )]
    ShortRow {
        filetype: String,
        path: PathBuf,
        line: u64,
        field: String,
        index: usize,
        found: usize,
    },

    #[error(
        "Error in {filetype} file {path:?}. On line {line} in '{column}' column: \
         Expected a {expected} but received '{value}'"
    )]
    InvalidValue {
        filetype: String,
        path: PathBuf,
        line: u64,
        column: String,
        expected: &'static str,
        value: String,
    },
}

/// An ordered list of fields expected in a table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    filetype: String,
    fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(filetype: &str, fields: Vec<Field>) -> TableSchema {
        TableSchema {
            filetype: filetype.to_string(),
            fields,
        }
    }

    pub fn filetype(&self) -> &str {
        &self.filetype
    }

    /// Map every field to a column of `headers`. Explicit columns are claimed
    /// first; then each remaining field takes the first unclaimed header that
    /// matches its pattern.
    pub fn resolve(
        &self,
        path: &Path,
        headers: Option<&[String]>,
    ) -> Result<Columns, TableError> {
        let header_list = || headers.map(|h| h.iter().join(", ")).unwrap_or_default();
        let mut claimed = vec![false; headers.map_or(0, <[String]>::len)];
        let mut resolved: Vec<Option<usize>> = vec![None; self.fields.len()];

        for (slot, field) in self.fields.iter().enumerate() {
            let Some(column) = &field.column else {
                continue;
            };
            let index = match (column, headers) {
                (ColumnRef::Index(i), Some(h)) if *i >= h.len() => {
                    return Err(TableError::MissingColumn {
                        filetype: self.filetype.clone(),
                        path: path.to_path_buf(),
                        field: field.name.to_string(),
                        column: column.clone(),
                        headers: header_list(),
                    })
                }
                (ColumnRef::Index(i), _) => *i,
                (ColumnRef::Name(name), Some(h)) => match h.iter().position(|x| x == name) {
                    Some(i) => i,
                    None => {
                        return Err(TableError::MissingColumn {
                            filetype: self.filetype.clone(),
                            path: path.to_path_buf(),
                            field: field.name.to_string(),
                            column: column.clone(),
                            headers: header_list(),
                        })
                    }
                },
                (ColumnRef::Name(_), None) => {
                    return Err(TableError::NamedColumnWithoutHeader {
                        filetype: self.filetype.clone(),
                        path: path.to_path_buf(),
                        field: field.name.to_string(),
                        column: column.clone(),
                    })
                }
            };
            if let Some(c) = claimed.get_mut(index) {
                *c = true;
            }
            resolved[slot] = Some(index);
        }

        if let Some(h) = headers {
            for (slot, field) in self.fields.iter().enumerate() {
                if resolved[slot].is_some() {
                    continue;
                }
                let Some(pattern) = &field.pattern else {
                    continue;
                };
                let unclaimed_match = |&i: &usize| !claimed[i] && pattern.is_match(h[i].trim());
                if let Some(i) = (0..h.len()).find(unclaimed_match) {
                    claimed[i] = true;
                    resolved[slot] = Some(i);
                }
            }
        }

        for (slot, field) in self.fields.iter().enumerate() {
            if field.required && resolved[slot].is_none() {
                return Err(TableError::MissingField {
                    filetype: self.filetype.clone(),
                    path: path.to_path_buf(),
                    field: field.name.to_string(),
                    headers: header_list(),
                });
            }
        }

        Ok(Columns {
            filetype: self.filetype.clone(),
            path: path.to_path_buf(),
            columns: self
                .fields
                .iter()
                .zip(resolved)
                .map(|(field, index)| ResolvedField {
                    name: field.name,
                    kind: field.kind,
                    index,
                    header: index.and_then(|i| headers.and_then(|h| h.get(i).cloned())),
                })
                .collect(),
        })
    }
}

#[derive(Debug, Clone)]
struct ResolvedField {
    name: &'static str,
    kind: FieldKind,
    index: Option<usize>,
    header: Option<String>,
}

/// A schema resolved against a particular file's header.
#[derive(Debug, Clone)]
pub struct Columns {
    filetype: String,
    path: PathBuf,
    columns: Vec<ResolvedField>,
}

impl Columns {
    fn field(&self, name: &str) -> Option<&ResolvedField> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// True if the field was matched to a column.
    pub fn has(&self, name: &str) -> bool {
        self.field(name).is_some_and(|c| c.index.is_some())
    }

    /// The header name (or `#i` for headerless files) that `name` resolved to.
    pub fn column_name(&self, name: &str) -> Option<String> {
        let field = self.field(name)?;
        let index = field.index?;
        Some(field.header.clone().unwrap_or_else(|| format!("#{index}")))
    }

    /// Raw text of field `name`, or None if the field isn't present in the
    /// table or holds a missing-value marker.
    pub fn text<'r>(&self, record: &'r Record, name: &str) -> Result<Option<&'r str>, TableError> {
        let Some(field) = self.field(name) else {
            return Ok(None);
        };
        let Some(index) = field.index else {
            return Ok(None);
        };
        let value = record.fields.get(index).ok_or_else(|| TableError::ShortRow {
            filetype: self.filetype.clone(),
            path: self.path.clone(),
            line: record.line,
            field: name.to_string(),
            index,
            found: record.fields.len(),
        })?;
        let value = value.trim();
        if is_missing(value) {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    fn parse<T: FromStr>(
        &self,
        record: &Record,
        name: &str,
        kind: FieldKind,
    ) -> Result<Option<T>, TableError> {
        let Some(value) = self.text(record, name)? else {
            return Ok(None);
        };
        value.parse::<T>().map(Some).map_err(|_| TableError::InvalidValue {
            filetype: self.filetype.clone(),
            path: self.path.clone(),
            line: record.line,
            column: self.column_name(name).unwrap_or_else(|| name.to_string()),
            expected: kind.expected(),
            value: value.to_string(),
        })
    }

    pub fn float(&self, record: &Record, name: &str) -> Result<Option<f64>, TableError> {
        self.parse(record, name, FieldKind::Float)
    }

    pub fn integer(&self, record: &Record, name: &str) -> Result<Option<i64>, TableError> {
        self.parse(record, name, FieldKind::Integer)
    }

    /// Check that every resolved numeric field of `record` parses.
    pub fn validate(&self, record: &Record) -> Result<(), TableError> {
        for column in &self.columns {
            match column.kind {
                FieldKind::Text => {
                    self.text(record, column.name)?;
                }
                FieldKind::Integer => {
                    self.integer(record, column.name)?;
                }
                FieldKind::Float => {
                    self.float(record, column.name)?;
                }
            }
        }
        Ok(())
    }
}

/// One data row, with its 1-based line number in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: u64,
    pub fields: Vec<String>,
}

enum Records {
    Delimited(csv::StringRecordsIntoIter<Box<dyn Read>>),
    Whitespace {
        lines: Lines<BufReader<Box<dyn Read>>>,
        line: u64,
    },
}

/// Streaming reader over the rows of a delimited (optionally gzipped) table.
pub struct TableReader {
    path: PathBuf,
    delimiter: Delimiter,
    headers: Option<Vec<String>>,
    records: Records,
}

impl TableReader {
    /// Open `path`. If `delimiter` is None it is detected from the first line.
    pub fn open(
        path: &Path,
        delimiter: Option<Delimiter>,
        has_header: bool,
    ) -> Result<TableReader> {
        let delimiter = match delimiter {
            Some(d) => d,
            None => detect_delimiter(path)?,
        };
        let reader = open_maybe_gz(path)?;

        let (headers, records) = match delimiter.byte() {
            Some(byte) => {
                let mut rdr = csv::ReaderBuilder::new()
                    .delimiter(byte)
                    .has_headers(has_header)
                    .flexible(true)
                    .from_reader(reader);
                let headers = if has_header {
                    let h = rdr
                        .headers()
                        .with_context(|| path.display().to_string())?
                        .iter()
                        .map(|s| s.trim().to_string())
                        .collect();
                    Some(h)
                } else {
                    None
                };
                (headers, Records::Delimited(rdr.into_records()))
            }
            None => {
                let mut lines = BufReader::new(reader).lines();
                let mut line = 0;
                let headers = if has_header {
                    let mut found = None;
                    for l in lines.by_ref() {
                        line += 1;
                        let l = l.with_context(|| path.display().to_string())?;
                        if !l.trim().is_empty() {
                            found = Some(l.split_whitespace().map(String::from).collect());
                            break;
                        }
                    }
                    found
                } else {
                    None
                };
                (headers, Records::Whitespace { lines, line })
            }
        };

        if has_header && headers.as_ref().map_or(true, Vec::is_empty) {
            bail!(TableError::Empty {
                filetype: "table".to_string(),
                path: path.to_path_buf(),
            });
        }

        Ok(TableReader {
            path: path.to_path_buf(),
            delimiter,
            headers,
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    pub fn resolve(&self, schema: &TableSchema) -> Result<Columns, TableError> {
        schema.resolve(&self.path, self.headers())
    }
}

impl Iterator for TableReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        match &mut self.records {
            Records::Delimited(records) => loop {
                let record = match records.next()? {
                    Ok(r) => r,
                    Err(e) => {
                        return Some(Err(e).with_context(|| self.path.display().to_string()))
                    }
                };
                if record.iter().all(|f| f.trim().is_empty()) {
                    continue;
                }
                let line = record.position().map_or(0, csv::Position::line);
                return Some(Ok(Record {
                    line,
                    fields: record.iter().map(String::from).collect(),
                }));
            },
            Records::Whitespace { lines, line } => loop {
                let l = match lines.next()? {
                    Ok(l) => l,
                    Err(e) => {
                        return Some(Err(e).with_context(|| self.path.display().to_string()))
                    }
                };
                *line += 1;
                if l.trim().is_empty() {
                    continue;
                }
                return Some(Ok(Record {
                    line: *line,
                    fields: l.split_whitespace().map(String::from).collect(),
                }));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn gwas_schema(pval: Option<ColumnRef>) -> TableSchema {
        TableSchema::new(
            "GWAS",
            vec![
                Field::required("variant_id", FieldKind::Text).pattern("^(snp|rs_?id|variant)"),
                Field::required("pval", FieldKind::Float)
                    .pattern("^p([_.-]?val(ue)?)?$")
                    .column(pval),
                Field::optional("n", FieldKind::Float).pattern("^n$"),
            ],
        )
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(Delimiter::detect("a\tb,c"), Delimiter::Tab);
        assert_eq!(Delimiter::detect("a,b"), Delimiter::Comma);
        assert_eq!(Delimiter::detect("GENE   CHR  P"), Delimiter::Whitespace);
    }

    #[test]
    fn test_resolve_by_pattern_and_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(dir.path(), "g.tsv", "SNP\tPOS\tP\tpval_alt\nrs1\t10\t0.5\t0.1\n");
        let reader = TableReader::open(&path, None, true)?;
        let cols = reader.resolve(&gwas_schema(None))?;
        assert_eq!(cols.column_name("variant_id").as_deref(), Some("SNP"));
        assert_eq!(cols.column_name("pval").as_deref(), Some("P"));
        assert!(!cols.has("n"));

        let cols = reader.resolve(&gwas_schema(Some(ColumnRef::Name("pval_alt".into()))))?;
        let records: Vec<_> = reader.try_collect()?;
        assert_eq!(cols.float(&records[0], "pval")?, Some(0.1));
        assert_eq!(cols.text(&records[0], "variant_id")?, Some("rs1"));
        assert_eq!(cols.float(&records[0], "n")?, None);
        Ok(())
    }

    #[test]
    fn test_missing_required_field_is_named() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(dir.path(), "g.csv", "SNP,BETA\nrs1,0.2\n");
        let reader = TableReader::open(&path, None, true)?;
        let err = reader.resolve(&gwas_schema(None)).unwrap_err();
        assert!(matches!(&err, TableError::MissingField { field, .. } if field == "pval"));
        assert!(err.to_string().contains("'pval'"));

        let err = reader
            .resolve(&gwas_schema(Some(ColumnRef::Name("PVALUE".into()))))
            .unwrap_err();
        assert!(matches!(err, TableError::MissingColumn { .. }));
        Ok(())
    }

    #[test]
    fn test_invalid_value_reports_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(dir.path(), "g.tsv", "SNP\tP\nrs1\t0.5\nrs2\tzero\n");
        let reader = TableReader::open(&path, None, true)?;
        let cols = reader.resolve(&gwas_schema(None))?;
        let records: Vec<_> = reader.try_collect()?;
        let err = cols.float(&records[1], "pval").unwrap_err();
        assert_eq!(
            err,
            TableError::InvalidValue {
                filetype: "GWAS".into(),
                path: path.clone(),
                line: 3,
                column: "P".into(),
                expected: "number",
                value: "zero".into(),
            }
        );
        assert!(cols.validate(&records[0]).is_ok());
        Ok(())
    }

    #[test]
    fn test_whitespace_and_headerless() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(
            dir.path(),
            "genes.out",
            "GENE    CHR  P\n\n148398  1    0.01\n26155   1    NA\n",
        );
        let reader = TableReader::open(&path, None, true)?;
        assert_eq!(reader.delimiter(), Delimiter::Whitespace);
        let records: Vec<_> = reader.try_collect()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line, 3);
        assert_eq!(records[1].fields, vec!["26155", "1", "NA"]);

        let path = write(dir.path(), "map.csv", "ENSG1,GENE1\nENSG2,GENE2\n");
        let reader = TableReader::open(&path, None, false)?;
        let schema = TableSchema::new(
            "gene name map",
            vec![
                Field::required("id", FieldKind::Text).column(Some(ColumnRef::Index(0))),
                Field::required("name", FieldKind::Text).column(Some(ColumnRef::Name("x".into()))),
            ],
        );
        assert!(matches!(
            reader.resolve(&schema),
            Err(TableError::NamedColumnWithoutHeader { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_gzip_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scores.tsv.gz");
        let mut enc = flate2::write::GzEncoder::new(
            File::create(&path)?,
            flate2::Compression::default(),
        );
        enc.write_all(b"\tnorm_score\tpval\ncell1\t1.5\t0.01\n")?;
        enc.finish()?;
        let reader = TableReader::open(&path, None, true)?;
        assert_eq!(reader.headers().unwrap(), ["", "norm_score", "pval"]);
        let records: Vec<_> = reader.try_collect()?;
        assert_eq!(records[0].fields[0], "cell1");
        Ok(())
    }
}
