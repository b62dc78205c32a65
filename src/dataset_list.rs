//! The startup dataset list.
//!
//! Datasets deployed at startup come from a dataset list file and from `NAME XML` pairs on the command line.
//! Each line of a dataset list file is
//! ```text
//! NAME <TAB> XML [<TAB> CATEGORY <TAB> DESCRIPTION <TAB> INDEX]
//! ```
//! Whitespace around each tab is ignored. Blank lines are ignored and other invalid lines are skipped with a warning.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{dataset::DatasetMetadata, registry::RESERVED_CONTEXT_NAMES};

/// A dataset list error.
#[derive(Debug, Error)]
pub enum DatasetListError {
    /// The dataset list file does not exist.
    #[error("dataset list file {} does not exist", .0.display())]
    NotFound(PathBuf),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The command line has a name without a locator.
    #[error("dataset arguments must be NAME XML pairs, got {0} arguments")]
    UnpairedArguments(usize),
    /// A dataset uses a reserved name.
    #[error("cannot use reserved name {0} as a dataset name")]
    ReservedName(String),
    /// Two datasets have the same name.
    #[error("dataset name {0} is used more than once")]
    DuplicateName(String),
    /// The locator of a dataset does not exist.
    #[error("dataset file {} of {name} does not exist", .path.display())]
    SourceNotFound {
        /// The dataset name.
        name: String,
        /// The locator.
        path: PathBuf,
    },
    /// No dataset was given.
    #[error("dataset list is empty")]
    Empty,
}

/// A dataset to deploy at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetSpec {
    /// The dataset name.
    pub name: String,
    /// The dataset locator.
    pub locator: PathBuf,
    /// The dataset metadata.
    pub metadata: DatasetMetadata,
}

impl DatasetSpec {
    /// Create a dataset spec without metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, locator: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            metadata: DatasetMetadata::default(),
        }
    }
}

/// Parse the content of a dataset list file, skipping invalid lines.
#[must_use]
pub fn parse_dataset_list(text: &str) -> Vec<DatasetSpec> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let spec = parse_line(line);
            if spec.is_none() {
                tracing::warn!(line, "invalid dataset list line, skipped");
            }
            spec
        })
        .collect()
}

fn parse_line(line: &str) -> Option<DatasetSpec> {
    let tokens: Vec<&str> = line.split('\t').map(str::trim).collect();
    if !(2..=5).contains(&tokens.len()) || tokens[0].is_empty() || tokens[1].is_empty() {
        return None;
    }
    let token = |i: usize| tokens.get(i).map(|t| (*t).to_string()).unwrap_or_default();
    Some(DatasetSpec {
        name: token(0),
        locator: PathBuf::from(tokens[1]),
        metadata: DatasetMetadata {
            category: token(2),
            description: token(3),
            index: token(4),
        },
    })
}

/// Read a dataset list file.
///
/// # Errors
/// Returns a [`DatasetListError`] if the file does not exist or cannot be read.
pub fn read_dataset_list(path: &Path) -> Result<Vec<DatasetSpec>, DatasetListError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_dataset_list(&text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(DatasetListError::NotFound(path.to_path_buf()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Pair `NAME XML` command line arguments.
///
/// # Errors
/// Returns [`DatasetListError::UnpairedArguments`] if there is an odd number of arguments.
pub fn pair_arguments(arguments: &[String]) -> Result<Vec<DatasetSpec>, DatasetListError> {
    if arguments.len() % 2 != 0 {
        return Err(DatasetListError::UnpairedArguments(arguments.len()));
    }
    Ok(arguments
        .chunks_exact(2)
        .map(|pair| DatasetSpec::new(pair[0].clone(), pair[1].clone()))
        .collect())
}

/// Validate the startup datasets.
///
/// # Errors
/// Returns a [`DatasetListError`] if a name is reserved or used twice, a locator does not exist, or `datasets` is empty.
pub fn validate_dataset_list(datasets: &[DatasetSpec]) -> Result<(), DatasetListError> {
    if datasets.is_empty() {
        return Err(DatasetListError::Empty);
    }
    let mut names = std::collections::HashSet::new();
    for dataset in datasets {
        if RESERVED_CONTEXT_NAMES.contains(&dataset.name.as_str()) {
            return Err(DatasetListError::ReservedName(dataset.name.clone()));
        }
        if !names.insert(dataset.name.as_str()) {
            return Err(DatasetListError::DuplicateName(dataset.name.clone()));
        }
        if !dataset.locator.exists() {
            return Err(DatasetListError::SourceNotFound {
                name: dataset.name.clone(),
                path: dataset.locator.clone(),
            });
        }
    }
    Ok(())
}
