//! Error types for artifact loading and the layers built on top of it.
use crate::types::ColumnType;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a static file into a normalized in-memory structure.
///
/// Every variant is terminal for the current view: the files are produced
/// upstream and shipped with the deployment, so a failure is a data defect.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The artifact does not exist at the given path
    #[error("Artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A declared column or attribute is missing, duplicated or non-uniform
    #[error("Schema mismatch in {origin}: {reason}")]
    SchemaMismatch { origin: String, reason: String },

    /// The payload is malformed or in an unsupported format
    #[error("Failed to parse {origin}: {reason}")]
    ParseError { origin: String, reason: String },

    /// A cell cannot be cast to its declared type
    #[error("Failed to cast {value:?} in column '{column}' (row {row}) of {origin} to {expected}")]
    TypeCastError {
        origin: String,
        column: String,
        row: usize,
        value: String,
        expected: ColumnType,
    },
}

impl LoadError {
    pub(crate) fn schema(origin: &str, reason: impl Into<String>) -> Self {
        LoadError::SchemaMismatch {
            origin: origin.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn parse(origin: &str, reason: impl Into<String>) -> Self {
        LoadError::ParseError {
            origin: origin.to_string(),
            reason: reason.into(),
        }
    }
}

/// Catalog construction and key parsing errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid catalog key: {0:?}")]
    InvalidKey(String),

    /// Two artifacts claim the same product and key
    #[error("Duplicate catalog entry for {product} {key}: {} and {}", .first.display(), .second.display())]
    Duplicate {
        product: String,
        key: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// More than one period of a product ends in the requested year
    #[error("Ambiguous change lookup for {product} ending {year}: {}", .keys.join(", "))]
    Ambiguous {
        product: String,
        year: u16,
        keys: Vec<String>,
    },

    #[error("Failed to scan {}: {source}", .dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while building chart and map models
#[derive(Error, Debug, PartialEq)]
pub enum ChartError {
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Column '{0}' is not numeric")]
    NotNumeric(String),

    #[error("Column '{0}' does not hold float lists")]
    NotFloatList(String),

    #[error("No row with {column} = '{value}'")]
    MissingRow { column: String, value: String },

    /// Category axis values must be unique within one series
    #[error("Duplicate category '{value}' in column '{column}'")]
    DuplicateCategory { column: String, value: String },

    #[error("Invalid chart definition: {0}")]
    Invalid(String),
}

/// Errors surfaced to the presentation layer by [`crate::dashboard::Dashboard`]
#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Unknown {kind} '{name}'")]
    Unknown { kind: &'static str, name: String },

    #[error("Table '{0}' is published per period; a period must be selected")]
    MissingPeriod(String),

    #[error("Product '{0}' has no period in the catalog")]
    Unpublished(String),

    #[error("No {product} artifact in the catalog for {key}")]
    NotInCatalog { product: String, key: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl DashboardError {
    pub(crate) fn unknown(kind: &'static str, name: &str) -> Self {
        DashboardError::Unknown {
            kind,
            name: name.to_string(),
        }
    }
}
