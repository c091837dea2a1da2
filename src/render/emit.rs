//! Shared row-emission core used by both rendering strategies.
//!
//! The strategies differ in how repeat items are sourced (materialized
//! vectors vs. live iterators) and how sheet XML leaves the process (whole
//! buffers vs. windowed streaming); everything else — cell resolution,
//! formula adjustment, layout projection — lives here.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use crate::area::Area;
use crate::cell_ref::format_cell_ref;
use crate::config::MissingData;
use crate::error::{EngineError, Result};
use crate::formula::{
    adjust_for_column_expansion, adjust_for_repeat_index, adjust_for_row_expansion,
    expand_single_ref,
};
use crate::layout;
use crate::marker::substitute_tokens;
use crate::position::{PositionCalculator, RepeatExpansion, RowOrigin};
use crate::provider::DataProvider;
use crate::types::{CellContent, CellSpec, Direction, SheetSpec};
use crate::value::Value;

use super::sheet_writer::{
    write_cell, write_prolog, write_row_close, write_row_open, write_suffix, OutValue, RowSink,
};
use super::RenderState;

/// Supplies repeat items in ascending `(expansion, item_index)` order.
pub(crate) trait ItemSource {
    fn fetch(
        &mut self,
        expansion_index: usize,
        collection: &str,
        item_index: u32,
    ) -> Result<Option<Value>>;
}

/// Item source over eagerly materialized collections (in-memory strategy).
pub(crate) struct MaterializedItems<'a> {
    pub collections: &'a BTreeMap<String, Vec<Value>>,
}

impl ItemSource for MaterializedItems<'_> {
    fn fetch(&mut self, _expansion: usize, collection: &str, item_index: u32) -> Result<Option<Value>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|items| items.get(item_index as usize))
            .cloned())
    }
}

/// Item source over live provider iterators (streaming strategy). Each
/// repeat-region emission requests exactly one fresh iterator and never
/// rewinds it.
pub(crate) struct StreamingItems<'a> {
    provider: &'a dyn DataProvider,
    cursors: HashMap<usize, Option<crate::provider::ValueIter<'a>>>,
}

impl<'a> StreamingItems<'a> {
    pub(crate) fn new(provider: &'a dyn DataProvider) -> Self {
        Self {
            provider,
            cursors: HashMap::new(),
        }
    }
}

impl ItemSource for StreamingItems<'_> {
    fn fetch(&mut self, expansion: usize, collection: &str, _item_index: u32) -> Result<Option<Value>> {
        let provider = self.provider;
        let cursor = self
            .cursors
            .entry(expansion)
            .or_insert_with(|| provider.items(collection));
        Ok(cursor.as_mut().and_then(Iterator::next))
    }
}

/// Per-formula context: where the cell sits and which copy it belongs to.
#[derive(Clone, Copy)]
struct FormulaCtx {
    template_row: u32,
    template_col: u32,
    /// The cell's own expansion, exempt from the static passes.
    own_expansion: Option<usize>,
    /// Repeat-copy shift applied after the static passes.
    item_shift: Option<(Direction, u32, u32)>,
}

/// A resolved cell awaiting ordered emission: `(out_col, style, value)`.
type PendingCell = (u32, Option<u32>, OutValue);

/// Variable binding active while resolving a cell.
#[derive(Clone, Copy)]
struct Binding<'v> {
    var: &'v str,
    item: Option<&'v Value>,
    /// Empty-collection blank unit: unresolved item fields become blank
    /// cells instead of retained marker text.
    blank_unit: bool,
}

/// Emits one sheet: prolog, rows in strictly ascending order, then the
/// re-projected layout tail.
pub(crate) struct SheetEmitter<'s, 'a> {
    state: &'s RenderState<'a>,
    sheet: &'a SheetSpec,
    calc: &'s PositionCalculator,
    new_drawing_rid: Option<&'s str>,
    right_items: HashMap<usize, Vec<Value>>,
    current: HashMap<usize, (u32, Option<Value>)>,
}

impl<'s, 'a> SheetEmitter<'s, 'a> {
    pub(crate) fn new(state: &'s RenderState<'a>, sheet_index: usize) -> Result<Self> {
        let sheet = state
            .spec
            .sheets
            .get(sheet_index)
            .ok_or_else(|| EngineError::Package(format!("no sheet at index {sheet_index}")))?;
        let calc = state
            .calcs
            .get(sheet_index)
            .ok_or_else(|| EngineError::Package(format!("no calculator for sheet {sheet_index}")))?;

        // Horizontal repeats need every item in hand while each row streams
        // out, so their collections are always materialized.
        let mut right_items = HashMap::new();
        for (idx, e) in calc.expansions().iter().enumerate() {
            if e.direction == Direction::Right {
                let items: Vec<Value> = state
                    .provider
                    .items(&e.collection)
                    .map(Iterator::collect)
                    .unwrap_or_default();
                right_items.insert(idx, items);
            }
        }

        Ok(Self {
            state,
            sheet,
            calc,
            new_drawing_rid: state
                .new_drawing_rids
                .get(sheet_index)
                .and_then(Option::as_deref),
            right_items,
            current: HashMap::new(),
        })
    }

    pub(crate) fn emit(
        &mut self,
        out: &mut dyn Write,
        items: &mut dyn ItemSource,
        window_rows: usize,
    ) -> Result<()> {
        let mut sink = RowSink::new(out, window_rows);

        let total_rows = self.calc.total_rows();
        let dimension = Area::from_bounds(
            0,
            0,
            total_rows.saturating_sub(1),
            self.calc.total_cols().saturating_sub(1),
        );
        let cols = layout::project_cols(&self.sheet.cols, self.calc);
        write_prolog(
            &mut sink,
            self.sheet,
            &dimension,
            &cols,
            self.state.config.preserve_template_layout,
        )?;

        for actual_row in 0..total_rows {
            if self.state.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            self.emit_row(actual_row, items, &mut sink)?;
            self.state.note_row();
        }

        let merges = layout::project_merges(&self.sheet.merges, self.calc);
        let conditional = layout::project_conditional(&self.sheet.conditional, self.calc);
        let header_footer = match &self.sheet.header_footer {
            None => None,
            Some(hf) => {
                let (substituted, missing) =
                    layout::substitute_header_footer(hf, |name| {
                        self.lookup_scalar(name).map(|v| v.display_text())
                    });
                if let Some(name) = missing.first() {
                    match self.state.config.missing_data_behavior {
                        MissingData::Warn => {
                            log::warn!(
                                "sheet {}: no data for header/footer variable `{name}`",
                                self.sheet.name
                            );
                        }
                        MissingData::Throw => {
                            return Err(EngineError::MissingTemplateData {
                                name: name.clone(),
                                sheet: Some(self.sheet.name.clone()),
                                cell: None,
                            });
                        }
                    }
                }
                Some(substituted)
            }
        };

        write_suffix(
            &mut sink,
            self.sheet,
            &merges,
            &conditional,
            header_footer.as_ref(),
            self.new_drawing_rid,
        )
    }

    fn emit_row(
        &mut self,
        actual_row: u32,
        items: &mut dyn ItemSource,
        sink: &mut RowSink,
    ) -> Result<()> {
        let mut pending: Vec<PendingCell> = Vec::new();
        let row_attrs = match self.calc.row_origin(actual_row) {
            RowOrigin::Static { template_row } => {
                let Some(row) = self.sheet.row(template_row) else {
                    return Ok(());
                };
                if row.cells.is_empty() && row.attrs.is_empty() {
                    return Ok(());
                }
                self.collect_span_cells(template_row, &row.cells, None, &mut pending)?;
                &row.attrs
            }
            RowOrigin::Repeat {
                expansion,
                item_index,
                offset_in_unit,
            } => {
                let item = self.item_for(expansion, item_index, items)?;
                let e = &self.calc.expansions()[expansion];
                let template_row = e.area.start.row + offset_in_unit;
                let Some(row) = self.sheet.row(template_row) else {
                    return Ok(());
                };

                if e.uses_empty_range() {
                    self.collect_empty_range_row(e, offset_in_unit, &mut pending)?;
                } else {
                    for cell in row.cells.iter().filter(|c| e.area.contains_col(c.col)) {
                        let out_col =
                            cell.col + self.calc.col_offset(template_row, cell.col);
                        let binding = Binding {
                            var: &e.var,
                            item: item.as_ref(),
                            blank_unit: e.item_count == 0,
                        };
                        let fctx = FormulaCtx {
                            template_row,
                            template_col: cell.col,
                            own_expansion: Some(expansion),
                            item_shift: Some((Direction::Down, item_index, e.unit_rows())),
                        };
                        let value =
                            self.resolve_cell(&cell.content, Some(binding), fctx)?;
                        pending.push((out_col, cell.style, value));
                    }

                    // Cells sharing the template row but outside the repeat's
                    // columns belong to the sheet, not the unit: emitted once,
                    // with the first copy.
                    if item_index == 0 {
                        let outside: Vec<CellSpec> = row
                            .cells
                            .iter()
                            .filter(|c| !e.area.contains_col(c.col))
                            .cloned()
                            .collect();
                        self.collect_span_cells(
                            template_row,
                            &outside,
                            Some(expansion),
                            &mut pending,
                        )?;
                    }
                }
                &row.attrs
            }
        };

        write_row_open(
            sink,
            actual_row,
            row_attrs,
            self.state.config.preserve_template_layout,
        );
        // Cells leave in strictly ascending column order regardless of how
        // horizontal repetition interleaved them.
        pending.sort_by_key(|(col, _, _)| *col);
        for (out_col, style, value) in &pending {
            write_cell(sink, actual_row, *out_col, *style, value);
        }
        write_row_close(sink)
    }

    /// Resolve static-positioned cells, repeating any that fall inside a
    /// RIGHT region horizontally.
    fn collect_span_cells(
        &self,
        template_row: u32,
        cells: &[impl std::borrow::Borrow<CellSpec>],
        own_expansion: Option<usize>,
        pending: &mut Vec<PendingCell>,
    ) -> Result<()> {
        for cell in cells {
            let cell = cell.borrow();
            if self.calc.is_in_empty_range(template_row, cell.col) {
                // Consumed by an empty-collection fallback; suppressed here.
                continue;
            }

            let right = self.calc.expansions().iter().enumerate().find(|(_, e)| {
                e.direction == Direction::Right
                    && e.area.contains_row(template_row)
                    && e.area.contains_col(cell.col)
            });

            match right {
                Some((r_idx, e)) => {
                    let items = self.right_items.get(&r_idx);
                    let base =
                        e.area.start.col + self.calc.col_offset(template_row, e.area.start.col);
                    for i in 0..e.effective_items {
                        let out_col = base + (cell.col - e.area.start.col) + i * e.unit_cols();
                        let item = items.and_then(|v| v.get(i as usize));
                        let binding = Binding {
                            var: &e.var,
                            item,
                            blank_unit: e.item_count == 0,
                        };
                        let fctx = FormulaCtx {
                            template_row,
                            template_col: cell.col,
                            own_expansion: Some(r_idx),
                            item_shift: Some((Direction::Right, i, e.unit_cols())),
                        };
                        let value = self.resolve_cell(&cell.content, Some(binding), fctx)?;
                        pending.push((out_col, cell.style, value));
                    }
                }
                None => {
                    let out_col = cell.col + self.calc.col_offset(template_row, cell.col);
                    let fctx = FormulaCtx {
                        template_row,
                        template_col: cell.col,
                        own_expansion,
                        item_shift: None,
                    };
                    let value = self.resolve_cell(&cell.content, None, fctx)?;
                    pending.push((out_col, cell.style, value));
                }
            }
        }
        Ok(())
    }

    /// The blank unit of an empty collection with a declared fallback: the
    /// fallback range's cells replace the unit's.
    fn collect_empty_range_row(
        &self,
        e: &RepeatExpansion,
        offset_in_unit: u32,
        pending: &mut Vec<PendingCell>,
    ) -> Result<()> {
        let Some(empty) = e.empty_range else {
            return Ok(());
        };
        let source_row = empty.start.row + offset_in_unit.min(empty.row_count() - 1);
        let Some(row) = self.sheet.row(source_row) else {
            return Ok(());
        };
        for cell in &row.cells {
            if !empty.contains_col(cell.col) {
                continue;
            }
            let out_col = e.area.start.col + (cell.col - empty.start.col)
                + self.calc.col_offset(e.area.start.row, e.area.start.col);
            let fctx = FormulaCtx {
                template_row: source_row,
                template_col: cell.col,
                own_expansion: None,
                item_shift: None,
            };
            let value = self.resolve_cell(&cell.content, None, fctx)?;
            pending.push((out_col, cell.style, value));
        }
        Ok(())
    }

    /// The item bound to a repeat copy, advancing the source when the copy
    /// index moves on. Items are consumed in provider order, never rewound.
    fn item_for(
        &mut self,
        expansion: usize,
        item_index: u32,
        items: &mut dyn ItemSource,
    ) -> Result<Option<Value>> {
        let collection = self.calc.expansions()[expansion].collection.clone();
        let fetch_needed = match self.current.get(&expansion) {
            Some((index, _)) => *index != item_index,
            None => true,
        };
        if fetch_needed {
            let value = items.fetch(expansion, &collection, item_index)?;
            self.current.insert(expansion, (item_index, value));
        }
        Ok(self.current.get(&expansion).and_then(|(_, v)| v.clone()))
    }

    // -- value resolution ---------------------------------------------------

    /// Resolve a scalar by (possibly dotted) name through the provider,
    /// caching the root lookup so each name is fetched at most once.
    fn lookup_scalar(&self, name: &str) -> Option<Value> {
        let mut parts = name.split('.');
        let root = parts.next()?;
        let value = self.state.scalar(root)?;
        let mut current = value;
        for segment in parts {
            current = current.get(segment)?;
        }
        Some(current)
    }

    fn missing(&self, name: &str, template_row: u32, col: u32) -> EngineError {
        EngineError::MissingTemplateData {
            name: name.to_string(),
            sheet: Some(self.sheet.name.clone()),
            cell: Some(format_cell_ref(template_row, col)),
        }
    }

    fn resolve_cell(
        &self,
        content: &CellContent,
        binding: Option<Binding>,
        fctx: FormulaCtx,
    ) -> Result<OutValue> {
        let date1904 = self.state.spec.date1904;
        match content {
            CellContent::Empty | CellContent::Repeat(_) | CellContent::Image(_) => {
                Ok(OutValue::Blank)
            }
            CellContent::StaticString(s) => Ok(OutValue::Text(s.clone())),
            CellContent::StaticNumber(n) => Ok(OutValue::Number(*n)),
            CellContent::Size { collection } => {
                #[allow(clippy::cast_precision_loss)]
                Ok(OutValue::Number(
                    self.state.sizes.get(collection).copied().unwrap_or(0) as f64,
                ))
            }
            CellContent::Variable { name, original } => {
                if let Some(b) = binding {
                    if b.var == name {
                        return Ok(match b.item {
                            Some(v) => value_to_out(v, date1904),
                            None => OutValue::Blank,
                        });
                    }
                }
                match self.lookup_scalar(name) {
                    Some(v) => Ok(value_to_out(&v, date1904)),
                    None => self.unresolved(name, original, binding, fctx),
                }
            }
            CellContent::ItemField {
                item,
                path,
                original,
            } => {
                if let Some(b) = binding {
                    if b.var == item {
                        return match b.item {
                            None => Ok(OutValue::Blank),
                            Some(v) => match v.resolve_path(path) {
                                Some(field) => Ok(value_to_out(&field, date1904)),
                                None => self.unresolved(
                                    &format!("{item}.{}", path.join(".")),
                                    original,
                                    binding,
                                    fctx,
                                ),
                            },
                        };
                    }
                }
                let dotted = format!("{item}.{}", path.join("."));
                match self.lookup_scalar(&dotted) {
                    Some(v) => Ok(value_to_out(&v, date1904)),
                    None => self.unresolved(&dotted, original, binding, fctx),
                }
            }
            CellContent::Formula(f) => {
                let adjusted = self.adjusted_formula(f, fctx)?;
                Ok(OutValue::Formula(adjusted))
            }
            CellContent::FormulaWithVariables { formula, names: _ } => {
                let mut missing_names = Vec::new();
                let (substituted, misses) = substitute_tokens(formula, |name| {
                    if let Some(b) = binding {
                        let root = name.split('.').next().unwrap_or(name);
                        if b.var == root {
                            let rest: Vec<String> =
                                name.split('.').skip(1).map(str::to_string).collect();
                            return b.item.and_then(|v| {
                                if rest.is_empty() {
                                    Some(v.display_text())
                                } else {
                                    v.resolve_path(&rest).map(|f| f.display_text())
                                }
                            });
                        }
                    }
                    self.lookup_scalar(name).map(|v| v.display_text())
                });
                missing_names.extend(misses);
                if let Some(name) = missing_names.first() {
                    match self.state.config.missing_data_behavior {
                        MissingData::Warn => {
                            log::warn!(
                                "sheet {}: formula variable `{name}` unresolved at {}",
                                self.sheet.name,
                                format_cell_ref(fctx.template_row, fctx.template_col)
                            );
                        }
                        MissingData::Throw => {
                            return Err(self.missing(name, fctx.template_row, fctx.template_col));
                        }
                    }
                }
                let adjusted = self.adjusted_formula(&substituted, fctx)?;
                Ok(OutValue::Formula(adjusted))
            }
        }
    }

    /// Missing-data policy for value cells: warn-and-keep or abort. Blank
    /// units stay blank either way.
    fn unresolved(
        &self,
        name: &str,
        original: &str,
        binding: Option<Binding>,
        fctx: FormulaCtx,
    ) -> Result<OutValue> {
        if binding.is_some_and(|b| b.blank_unit) {
            return Ok(OutValue::Blank);
        }
        match self.state.config.missing_data_behavior {
            MissingData::Warn => {
                log::warn!(
                    "sheet {}: no data for `{name}` at {}; keeping marker text",
                    self.sheet.name,
                    format_cell_ref(fctx.template_row, fctx.template_col)
                );
                Ok(OutValue::Text(original.to_string()))
            }
            MissingData::Throw => Err(self.missing(name, fctx.template_row, fctx.template_col)),
        }
    }

    /// Run the per-region adjuster passes over a formula, bottom-most region
    /// first, then the repeat-copy shift when the cell belongs to a unit.
    fn adjusted_formula(&self, formula: &str, fctx: FormulaCtx) -> Result<String> {
        let mut f = formula.to_string();
        for (idx, e) in self.calc.expansions().iter().enumerate().rev() {
            if fctx.own_expansion == Some(idx) {
                continue;
            }
            match e.direction {
                Direction::Down => {
                    f = adjust_for_row_expansion(
                        &f,
                        e.area.start.row,
                        e.area.end.row,
                        e.row_expansion,
                    );
                    if fctx.template_row > e.area.end.row {
                        let (expanded, contiguous) = expand_single_ref(
                            &f,
                            e.area.start.row,
                            e.area.end.row,
                            e.effective_items,
                            e.unit_rows(),
                            Direction::Down,
                        );
                        self.check_expansion_limit(contiguous, e, &expanded, fctx)?;
                        f = expanded;
                    }
                }
                Direction::Right => {
                    f = adjust_for_column_expansion(
                        &f,
                        e.area.start.col,
                        e.area.end.col,
                        e.col_expansion,
                    );
                    if fctx.template_col > e.area.end.col {
                        let (expanded, contiguous) = expand_single_ref(
                            &f,
                            e.area.start.col,
                            e.area.end.col,
                            e.effective_items,
                            e.unit_cols(),
                            Direction::Right,
                        );
                        self.check_expansion_limit(contiguous, e, &expanded, fctx)?;
                        f = expanded;
                    }
                }
            }
        }
        if let Some((direction, item_index, unit)) = fctx.item_shift {
            f = adjust_for_repeat_index(&f, direction, item_index, unit);
        }
        Ok(f)
    }

    /// Spreadsheet functions accept at most 255 arguments; a comma-list
    /// expansion past that is unrepresentable.
    fn check_expansion_limit(
        &self,
        contiguous: bool,
        e: &RepeatExpansion,
        formula: &str,
        fctx: FormulaCtx,
    ) -> Result<()> {
        if !contiguous && e.effective_items > 255 {
            return Err(EngineError::FormulaExpansion {
                sheet: self.sheet.name.clone(),
                cell: format_cell_ref(fctx.template_row, fctx.template_col),
                formula: formula.to_string(),
            });
        }
        Ok(())
    }
}

/// Convert a runtime value into its emitted cell form.
pub(crate) fn value_to_out(value: &Value, date1904: bool) -> OutValue {
    match value {
        Value::Null => OutValue::Blank,
        Value::Bool(b) => OutValue::Bool(*b),
        Value::Int(i) => {
            #[allow(clippy::cast_precision_loss)]
            OutValue::Number(*i as f64)
        }
        Value::Float(v) => OutValue::Number(*v),
        Value::Date(d) => OutValue::Number(Value::date_serial(d, date1904)),
        Value::Text(s) => OutValue::Text(s.clone()),
        other => OutValue::Text(other.display_text()),
    }
}
