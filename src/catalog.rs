//! Index of published artifacts by product and reference year or period.
//!
//! Change layers are published per period (`tccm_12-15.csv`,
//! `cz_change_12-18.png`) and status layers per year (`clc_2018.png`). The
//! catalog resolves `(product, key)` to exactly one file; it is built once
//! and two files claiming the same key are rejected.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CatalogKey {
    Year(u16),
    Period { start: u16, end: u16 },
}

/// Two-digit years in file names: 90-99 are last century.
pub fn expand_year(two_digits: u16) -> u16 {
    if two_digits >= 90 {
        1900 + two_digits
    } else {
        2000 + two_digits
    }
}

fn parse_year(text: &str) -> Option<u16> {
    if !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match text.len() {
        2 => text.parse().ok().map(expand_year),
        4 => text.parse().ok(),
        _ => None,
    }
}

impl FromStr for CatalogKey {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CatalogError::InvalidKey(s.to_string());
        match s.trim().split_once('-') {
            None => parse_year(s.trim()).map(CatalogKey::Year).ok_or_else(invalid),
            Some((start, end)) => {
                let start = parse_year(start).ok_or_else(invalid)?;
                let end = parse_year(end).ok_or_else(invalid)?;
                if start >= end {
                    return Err(invalid());
                }
                Ok(CatalogKey::Period { start, end })
            }
        }
    }
}

impl TryFrom<String> for CatalogKey {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CatalogKey> for String {
    fn from(key: CatalogKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogKey::Year(year) => write!(f, "{}", year),
            CatalogKey::Period { start, end } => write!(f, "{}-{}", start, end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Table,
}

impl ArtifactKind {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ArtifactKind::Table,
            _ => ArtifactKind::Image,
        }
    }
}

/// One catalog line as declared in the configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogEntry {
    pub product: String,
    pub kind: ArtifactKind,
    pub key: CatalogKey,
    /// Relative to the data root
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<(String, CatalogKey), Artifact>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = CatalogEntry>,
    {
        let mut catalog = Catalog::new();
        for entry in entries {
            catalog.insert(entry)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, entry: CatalogEntry) -> Result<(), CatalogError> {
        let slot = (entry.product, entry.key);
        if let Some(existing) = self.entries.get(&slot) {
            return Err(CatalogError::Duplicate {
                product: slot.0,
                key: slot.1.to_string(),
                first: existing.path.clone(),
                second: entry.path,
            });
        }
        self.entries.insert(
            slot,
            Artifact {
                kind: entry.kind,
                path: entry.path,
            },
        );
        Ok(())
    }

    /// Register every file in `root/dir` named `<product>_<key>.<ext>`.
    ///
    /// Files of other products (or of the same product with a longer suffix,
    /// e.g. `clc_change_map_90-00.png` when scanning `clc`) are ignored.
    /// Returns the number of entries added.
    pub fn scan(&mut self, root: &Path, dir: &Path, product: &str) -> Result<usize, CatalogError> {
        let full = root.join(dir);
        let scan_err = |source| CatalogError::Scan {
            dir: full.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&full).map_err(scan_err)? {
            let entry = entry.map_err(scan_err)?;
            if entry.file_type().map_err(scan_err)?.is_file() {
                names.push(entry.file_name());
            }
        }
        names.sort();

        let prefix = format!("{}_", product);
        let mut added = 0;

        for name in names {
            let relative = dir.join(&name);
            let Some(stem) = relative.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(key) = stem
                .strip_prefix(&prefix)
                .and_then(|rest| rest.parse::<CatalogKey>().ok())
            else {
                continue;
            };

            debug!(product, %key, path = %relative.display(), "catalogued");
            self.insert(CatalogEntry {
                product: product.to_string(),
                kind: ArtifactKind::from_path(&relative),
                key,
                path: relative,
            })?;
            added += 1;
        }

        Ok(added)
    }

    pub fn get(&self, product: &str, key: CatalogKey) -> Option<&Artifact> {
        self.entries.get(&(product.to_string(), key))
    }

    /// Keys published for `product`, ascending.
    pub fn keys(&self, product: &str) -> Vec<CatalogKey> {
        self.entries
            .keys()
            .filter(|(p, _)| p == product)
            .map(|(_, key)| *key)
            .collect()
    }

    pub fn entries(&self, product: &str) -> impl Iterator<Item = (CatalogKey, &Artifact)> + '_ {
        let product = product.to_string();
        self.entries
            .iter()
            .filter(move |((p, _), _)| *p == product)
            .map(|((_, key), artifact)| (*key, artifact))
    }

    pub fn products(&self) -> Vec<&str> {
        let mut products: Vec<&str> = self.entries.keys().map(|(p, _)| p.as_str()).collect();
        products.dedup();
        products
    }

    /// The change period of `product` that ends in `year`, if published.
    ///
    /// Two periods ending in the same year (`12-18` and `15-18`) are an
    /// error rather than a pick.
    pub fn change_for(&self, product: &str, year: u16) -> Result<Option<(CatalogKey, &Artifact)>, CatalogError> {
        let matches: Vec<(CatalogKey, &Artifact)> = self
            .entries(product)
            .filter(|(key, _)| matches!(key, CatalogKey::Period { end, .. } if *end == year))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            _ => Err(CatalogError::Ambiguous {
                product: product.to_string(),
                year,
                keys: matches.iter().map(|(key, _)| key.to_string()).collect(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
