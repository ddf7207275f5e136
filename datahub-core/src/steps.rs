//! Processing steps: how the remote pipeline must re-read uploaded resources.
//!
//! - Spreadsheets (`xls`, `xlsx`) get one step per selected sheet, each with
//!   an inferred schema.
//! - Delimited text with a non-default [`Dialect`] gets a single step carrying
//!   the dialect.
//! - Everything else passes through untouched and produces no step.
//!
//! Resources are processed concurrently, so the order of the returned steps
//! is not tied to the order of the resources.

use std::io::Cursor;

use bytes::Bytes;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use futures::stream::{FuturesUnordered, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::DataHubApi;
use crate::error::{PushError, SheetSelectionError};
use crate::package::{Dialect, Resource, ResourceSource};
use crate::schema::Schema;

const SPREADSHEET_FORMATS: [&str; 2] = ["xls", "xlsx"];

/// Reader settings handed to the remote tabulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tabulator {
    /// 1-based sheet index.
    Sheet { sheet: usize },
    Dialect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delimiter: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quotechar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        escapechar: Option<String>,
    },
}

impl From<Dialect> for Tabulator {
    fn from(dialect: Dialect) -> Self {
        Tabulator::Dialect {
            delimiter: dialect.delimiter,
            quotechar: dialect.quote_char,
            escapechar: dialect.escape_char,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub input: String,
    pub output: String,
    pub tabulator: Tabulator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

impl ProcessingStep {
    /// Sheet index for spreadsheet steps.
    pub fn sheet(&self) -> Option<usize> {
        match self.tabulator {
            Tabulator::Sheet { sheet } => Some(sheet),
            Tabulator::Dialect { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetRef {
    /// 1-based.
    Index(usize),
    Name(String),
}

/// Which sheets of each workbook to process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SheetSelector {
    /// The first sheet only.
    #[default]
    Default,
    All,
    List(Vec<SheetRef>),
}

impl SheetSelector {
    /// Parse `all`, or a comma-separated list of 1-based indexes and sheet
    /// names. Missing or blank input selects the first sheet.
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            None | Some("") => return SheetSelector::Default,
            Some("all") => return SheetSelector::All,
            Some(raw) => raw,
        };
        let refs: Vec<SheetRef> = raw
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| match token.parse::<usize>() {
                Ok(index) => SheetRef::Index(index),
                Err(_) => SheetRef::Name(token.to_owned()),
            })
            .collect();
        if refs.is_empty() {
            SheetSelector::Default
        } else {
            SheetSelector::List(refs)
        }
    }

    /// Resolve against the sheet names of one workbook, giving 1-based indexes.
    pub fn resolve(&self, sheet_names: &[String]) -> Result<Vec<usize>, SheetSelectionError> {
        match self {
            SheetSelector::Default => Ok(vec![1]),
            SheetSelector::All => Ok((1..=sheet_names.len()).collect()),
            SheetSelector::List(refs) => refs
                .iter()
                .map(|sheet| match sheet {
                    SheetRef::Index(index) if (1..=sheet_names.len()).contains(index) => Ok(*index),
                    SheetRef::Index(index) => Err(SheetSelectionError::IndexOutOfRange {
                        index: *index,
                        sheet_count: sheet_names.len(),
                    }),
                    SheetRef::Name(name) => sheet_names
                        .iter()
                        .position(|candidate| candidate == name)
                        .map(|pos| pos + 1)
                        .ok_or_else(|| SheetSelectionError::NameNotFound { name: name.clone() }),
                })
                .collect(),
        }
    }
}

fn is_spreadsheet(resource: &Resource) -> bool {
    resource
        .format()
        .is_some_and(|format| SPREADSHEET_FORMATS.contains(&format.as_str()))
}

/// Derive the processing steps for `resources`. Remote workbooks are
/// downloaded through `api`.
pub async fn derive_steps<A: DataHubApi + ?Sized>(
    api: &A,
    resources: &[Resource],
    sheets: Option<&str>,
) -> Result<Vec<ProcessingStep>, PushError> {
    let selector = SheetSelector::parse(sheets);
    let pending: FuturesUnordered<_> = resources
        .iter()
        .map(|resource| steps_for(api, resource, &selector))
        .collect();
    let per_resource: Vec<Vec<ProcessingStep>> = pending.try_collect().await?;
    let steps: Vec<ProcessingStep> = per_resource.into_iter().flatten().collect();
    info!(steps = steps.len(), "Derived processing steps");
    Ok(steps)
}

async fn steps_for<A: DataHubApi + ?Sized>(
    api: &A,
    resource: &Resource,
    selector: &SheetSelector,
) -> Result<Vec<ProcessingStep>, PushError> {
    if is_spreadsheet(resource) {
        let data = match resource.source() {
            ResourceSource::Remote(url) => api.fetch(url.as_str()).await?,
            _ => resource.bytes().await?,
        };
        return sheet_steps(resource.name(), data, selector);
    }
    match resource.dialect() {
        Some(dialect) if !dialect.is_default() => {
            debug!(resource = resource.name(), ?dialect, "Resource has a custom dialect");
            Ok(vec![ProcessingStep {
                input: resource.name().to_owned(),
                output: resource.name().to_owned(),
                tabulator: dialect.into(),
                schema: None,
            }])
        }
        _ => Ok(Vec::new()),
    }
}

fn sheet_steps(
    name: &str,
    data: Bytes,
    selector: &SheetSelector,
) -> Result<Vec<ProcessingStep>, PushError> {
    let workbook_error = |reason: String| PushError::Workbook {
        resource: name.to_owned(),
        reason,
    };
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| workbook_error(e.to_string()))?;
    let sheet_names = workbook.sheet_names();
    let selected = selector.resolve(&sheet_names)?;
    debug!(resource = name, sheets = ?selected, available = sheet_names.len(), "Selected sheets");

    let mut steps = Vec::with_capacity(selected.len());
    for index in selected {
        let range = workbook
            .worksheet_range_at(index - 1)
            .ok_or_else(|| workbook_error(format!("sheet {index} is missing")))?
            .map_err(|e| workbook_error(e.to_string()))?;
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .collect();
        if rows.is_empty() {
            return Err(PushError::EmptySheet {
                resource: name.to_owned(),
                sheet: index,
            });
        }
        steps.push(ProcessingStep {
            input: name.to_owned(),
            output: format!("{name}-sheet-{index}"),
            tabulator: Tabulator::Sheet { sheet: index },
            schema: Some(Schema::infer(&rows).numbers_as_floats()),
        });
    }
    Ok(steps)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}
