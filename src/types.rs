//! Blueprint types: the intermediate representation a template is lifted into.
//!
//! The analyzer produces a [`WorkbookSpec`]; both rendering strategies and
//! the layout applier consume it. Styles are opaque `cellXfs` indices into
//! the template's style part — they are referenced, never re-authored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::area::{Area, CellPos};

/// Direction a repeat region expands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Down,
    Right,
}

/// Sizing policy for an inserted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeSpec {
    /// Stretch to the anchor cell's box.
    FitToCell,
    /// Keep the image's intrinsic pixel size.
    Original,
    /// Fixed pixel size.
    Fixed { width: u32, height: u32 },
}

/// A range argument as written in a marker: either concrete cells (optionally
/// sheet-qualified) or a workbook defined name resolved during analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeRef {
    Cells { sheet: Option<String>, area: Area },
    Named(String),
}

/// A parsed repeat declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatMarker {
    pub collection: String,
    pub range: RangeRef,
    pub var: String,
    pub direction: Direction,
    pub empty_range: Option<RangeRef>,
}

/// A parsed image declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMarker {
    pub name: String,
    /// Anchor cell override; defaults to the marker's own cell.
    pub position: Option<CellPos>,
    pub size: SizeSpec,
}

/// What a single template cell holds after analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellContent {
    Empty,
    StaticString(String),
    StaticNumber(f64),
    /// `${title}` — whole-cell simple substitution.
    Variable { name: String, original: String },
    /// `${emp.dept.name}` — item-scoped dotted field path.
    ItemField {
        item: String,
        path: Vec<String>,
        original: String,
    },
    /// A formula without template variables.
    Formula(String),
    /// A formula containing `${var}` tokens, substituted before emission.
    FormulaWithVariables { formula: String, names: Vec<String> },
    Repeat(RepeatMarker),
    Image(ImageMarker),
    /// Evaluates to the named collection's cardinality.
    Size { collection: String },
}

impl CellContent {
    /// Whether this content is erased from the output (declarations only).
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        matches!(self, CellContent::Repeat(_) | CellContent::Image(_))
    }
}

/// One cell of a row blueprint. `style` is the template cell's `s=` index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSpec {
    pub col: u32,
    pub style: Option<u32>,
    pub content: CellContent,
}

/// Role of a template row relative to the sheet's repeat regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowKind {
    /// Outside any downward repeat area.
    Static,
    /// First template row of a downward repeat unit.
    Repeat { region: usize },
    /// Subsequent row of a multi-row downward repeat unit.
    Continuation { region: usize, offset: u32 },
}

/// Per-row shape within a sheet blueprint.
///
/// `attrs` carries the template `<row>` attributes (height, hidden, outline
/// level, ...) minus the row number, re-emitted verbatim on every produced
/// copy of the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSpec {
    pub template_row: u32,
    pub kind: RowKind,
    pub attrs: Vec<(String, String)>,
    pub cells: Vec<CellSpec>,
}

/// A repeat region ready for the position calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatRegionSpec {
    pub area: Area,
    pub collection: String,
    pub var: String,
    pub direction: Direction,
    pub empty_range: Option<Area>,
    /// Where the declaration itself was written (erased from output).
    pub marker_cell: CellPos,
}

/// A `<conditionalFormatting>` block: transformed ranges plus the rule XML
/// carried verbatim, so `dxfId` references survive untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalBlock {
    pub areas: Vec<Area>,
    pub rules_xml: String,
}

/// Parsed header/footer strings; `${var}` substitution applies to each
/// independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFooter {
    pub attrs: Vec<(String, String)>,
    pub odd_header: Option<String>,
    pub odd_footer: Option<String>,
    pub even_header: Option<String>,
    pub even_footer: Option<String>,
    pub first_header: Option<String>,
    pub first_footer: Option<String>,
}

impl HeaderFooter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.odd_header.is_none()
            && self.odd_footer.is_none()
            && self.even_header.is_none()
            && self.even_footer.is_none()
            && self.first_header.is_none()
            && self.first_footer.is_none()
    }
}

/// One template `<col>` element with its 1-based min/max converted to 0-based
/// column indices and the remaining attributes kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColSpec {
    pub min: u32,
    pub max: u32,
    pub attrs: Vec<(String, String)>,
}

/// One slot in the ordered tail of a worksheet part: either a raw fragment
/// passed through verbatim, or the position where a regenerated element is
/// re-emitted, so schema order survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuffixItem {
    Raw(String),
    Merges,
    Conditional,
    HeaderFooter,
}

/// Blueprint of a single worksheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSpec {
    pub name: String,
    /// ZIP path of the worksheet part, e.g. `xl/worksheets/sheet1.xml`.
    pub part_path: String,
    /// Attributes of the template's `<worksheet>` root (namespace
    /// declarations included), re-emitted verbatim.
    pub worksheet_attrs: Vec<(String, String)>,
    pub rows: Vec<RowSpec>,
    pub regions: Vec<RepeatRegionSpec>,
    pub merges: Vec<Area>,
    pub conditional: Vec<ConditionalBlock>,
    pub header_footer: Option<HeaderFooter>,
    pub cols: Vec<ColSpec>,
    /// Raw top-level fragments preceding `<sheetData>` that the engine does
    /// not transform (sheetPr, sheetViews, sheetFormatPr, ...).
    pub prefix_xml: Vec<String>,
    /// Ordered tail of the worksheet: passthrough fragments interleaved with
    /// the slots of regenerated elements.
    pub suffix: Vec<SuffixItem>,
    pub template_last_row: u32,
    pub template_last_col: u32,
    /// Relationship id of the sheet's drawing part, when one exists.
    pub drawing_rid: Option<String>,
}

impl SheetSpec {
    /// The row blueprint for a template row index, if any cells exist there.
    #[must_use]
    pub fn row(&self, template_row: u32) -> Option<&RowSpec> {
        self.rows
            .binary_search_by_key(&template_row, |r| r.template_row)
            .ok()
            .and_then(|idx| self.rows.get(idx))
    }
}

/// Names a template requires from the data provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredNames {
    pub variables: BTreeSet<String>,
    pub collections: BTreeSet<String>,
    pub images: BTreeSet<String>,
}

/// Blueprint of a whole workbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookSpec {
    pub sheets: Vec<SheetSpec>,
    /// Workbook defined names: name → reference text.
    pub defined_names: BTreeMap<String, String>,
    pub date1904: bool,
    pub required: RequiredNames,
}

impl WorkbookSpec {
    #[must_use]
    pub fn sheet_by_name(&self, name: &str) -> Option<&SheetSpec> {
        self.sheets.iter().find(|s| s.name == name)
    }
}
