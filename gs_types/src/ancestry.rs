//! 1000 Genomes super-populations that can be merged into a custom reference panel.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Display, EnumIter, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Ancestry {
    #[strum(to_string = "afr", serialize = "african")]
    African,
    #[strum(to_string = "amr", serialize = "american")]
    American,
    #[strum(to_string = "eas", serialize = "east_asian")]
    EastAsian,
    #[strum(to_string = "eur", serialize = "european")]
    European,
    #[strum(to_string = "sas", serialize = "south_asian")]
    SouthAsian,
}

/// An ancestry code must be delimited on both sides by a non-letter, so that
/// e.g. `g1000_eur.bed` matches but `europe.bed` does not.
fn ancestry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[^A-Za-z])(afr|amr|eas|eur|sas)(?:[^A-Za-z]|$)").unwrap()
    })
}

impl Ancestry {
    /// The lower-case 1000 Genomes code, e.g. `eur`.
    pub fn code(self) -> &'static str {
        match self {
            Ancestry::African => "afr",
            Ancestry::American => "amr",
            Ancestry::EastAsian => "eas",
            Ancestry::European => "eur",
            Ancestry::SouthAsian => "sas",
        }
    }

    /// Find the first ancestry code embedded in `text`.
    pub fn find_in(text: &str) -> Option<Ancestry> {
        let caps = ancestry_pattern().captures(text)?;
        caps.get(1)?.as_str().parse().ok()
    }

    /// Infer the ancestry of a genotype file from its name, falling back to
    /// the directories that contain it.
    pub fn from_path(path: &Path) -> Option<Ancestry> {
        path.file_name()
            .and_then(|name| Ancestry::find_in(&name.to_string_lossy()))
            .or_else(|| {
                path.parent()
                    .and_then(|parent| Ancestry::find_in(&parent.to_string_lossy()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use strum::IntoEnumIterator;

    #[test]
    fn test_parse_labels_and_codes() {
        assert_eq!("EUROPEAN".parse::<Ancestry>().unwrap(), Ancestry::European);
        assert_eq!("EAST_ASIAN".parse::<Ancestry>().unwrap(), Ancestry::EastAsian);
        assert_eq!("sas".parse::<Ancestry>().unwrap(), Ancestry::SouthAsian);
        assert_eq!("AMR".parse::<Ancestry>().unwrap(), Ancestry::American);
        assert!("martian".parse::<Ancestry>().is_err());
        for ancestry in Ancestry::iter() {
            assert_eq!(ancestry.to_string(), ancestry.code());
            assert_eq!(ancestry.code().parse::<Ancestry>().unwrap(), ancestry);
        }
    }

    #[test]
    fn test_find_in_requires_delimiters() {
        assert_eq!(Ancestry::find_in("g1000_eur.bed"), Some(Ancestry::European));
        assert_eq!(Ancestry::find_in("EAS.bim"), Some(Ancestry::EastAsian));
        assert_eq!(Ancestry::find_in("eur_cm_filled.fam"), Some(Ancestry::European));
        assert_eq!(Ancestry::find_in("europe.bed"), None);
        assert_eq!(Ancestry::find_in("seasonal.bed"), None);
    }

    #[test]
    fn test_from_path_prefers_file_name() {
        let path = PathBuf::from("/ref/eur/g1000_afr.bed");
        assert_eq!(Ancestry::from_path(&path), Some(Ancestry::African));
        let path = PathBuf::from("/ref/eur/panel.bed");
        assert_eq!(Ancestry::from_path(&path), Some(Ancestry::European));
        let path = PathBuf::from("/ref/panel.bed");
        assert_eq!(Ancestry::from_path(&path), None);
    }
}
