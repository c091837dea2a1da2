//! Structured error types for xlstencil.
//!
//! Analysis-time errors abort the whole generation; mid-pipeline errors abort
//! that generation only. Variants carry the sheet name, cell reference, and
//! offending literal where they are known, so template authors can fix the
//! exact cell.

/// All errors that can occur while analyzing a template or rendering output.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// XML parsing error from quick-xml.
    #[error("XML parsing: {0}")]
    Xml(#[from] quick_xml::Error),

    /// ZIP archive error.
    #[error("ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A repeat marker's arguments are malformed.
    #[error("invalid repeat syntax in {literal:?}: {reason}")]
    InvalidRepeatSyntax { literal: String, reason: String },

    /// A mandatory marker parameter is absent.
    #[error("missing required parameter `{parameter}` in {literal:?}")]
    MissingRequiredParameter {
        parameter: &'static str,
        literal: String,
    },

    /// A cell range could not be parsed.
    #[error("invalid range format: {0:?}")]
    InvalidRangeFormat(String),

    /// A marker references a sheet that does not exist in the workbook.
    #[error("sheet not found: {0:?}")]
    SheetNotFound(String),

    /// A parameter value is out of its domain (e.g. overlapping repeat areas).
    #[error("invalid parameter value in {literal:?}: {reason}")]
    InvalidParameterValue { literal: String, reason: String },

    /// A marker violates a grammar rule (positional/named mix, bad size spec).
    #[error("marker validation failed for {literal:?}: {rule}")]
    MarkerValidation { literal: String, rule: String },

    /// The data provider returned nothing for a required name.
    #[error("missing template data for `{name}`{}", format_location(.sheet, .cell))]
    MissingTemplateData {
        name: String,
        sheet: Option<String>,
        cell: Option<String>,
    },

    /// Expanding a single-cell reference produced more arguments than a
    /// spreadsheet function accepts (255).
    #[error("formula expansion at {sheet}!{cell} exceeds 255 arguments: {formula}")]
    FormulaExpansion {
        sheet: String,
        cell: String,
        formula: String,
    },

    /// The workbook package is structurally unusable.
    #[error("package error: {0}")]
    Package(String),

    /// An error enriched with the sheet and cell it occurred at.
    #[error("{sheet}!{cell}: {source}")]
    AtCell {
        sheet: String,
        cell: String,
        source: Box<EngineError>,
    },

    /// The host cancelled the generation between rows or stages.
    #[error("generation cancelled")]
    Cancelled,
}

fn format_location(sheet: &Option<String>, cell: &Option<String>) -> String {
    match (sheet, cell) {
        (Some(s), Some(c)) => format!(" ({s}!{c})"),
        (Some(s), None) => format!(" (sheet {s})"),
        (None, Some(c)) => format!(" (cell {c})"),
        (None, None) => String::new(),
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
