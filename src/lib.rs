//! xlstencil - template-based XLSX generation
//!
//! Renders data into a pre-designed workbook while preserving every aspect of
//! the template's visual formatting:
//! - `${variable}` and `${item.field}` substitution, including inside
//!   formulas, chart text, and headers/footers
//! - repeat regions expanded row-wise or column-wise per collection item
//! - formulas, merged regions, conditional formatting, charts, and pivot
//!   tables adjusted to the expanded geometry
//! - image placement with magic-byte format detection
//!
//! # Usage
//!
//! ```no_run
//! use xlstencil::{generate, MapProvider, Value};
//!
//! let template = std::fs::read("report_template.xlsx")?;
//! let provider = MapProvider::new()
//!     .with_value("title", "Q4 Report")
//!     .with_items("employees", vec![
//!         Value::Map([("name".to_string(), Value::from("홍길동")),
//!                     ("salary".to_string(), Value::from(8000i64))].into()),
//!     ]);
//! let workbook = generate(&template, &provider)?;
//! std::fs::write("report.xlsx", workbook)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analyzer;
pub mod area;
pub mod cell_ref;
pub mod charts;
pub mod config;
pub mod error;
pub mod formula;
pub mod marker;
pub mod metadata;
pub mod naming;
pub mod pipeline;
pub mod pivot;
pub mod position;
pub mod provider;
pub mod types;
pub mod value;

mod images;
mod layout;
mod numfmt;
mod package;
mod render;
mod xml;
mod xml_vars;

pub use analyzer::analyze;
pub use config::{
    CancelFlag, Config, FileConflictPolicy, FileNamingMode, MissingData, StreamingMode,
};
pub use error::{EngineError, Result};
pub use metadata::DocumentMetadata;
pub use pipeline::{generate, generate_with_config, ProcessingContext};
pub use provider::{DataProvider, MapProvider};
pub use types::{CellContent, Direction, SizeSpec, WorkbookSpec};
pub use value::{FieldAccess, Value};
