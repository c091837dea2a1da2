//! Worksheet analysis: lifts one sheet's XML into row/cell blueprints,
//! repeat-marker declarations, layout tables, and raw passthrough fragments.
//!
//! The sheet is parsed from its full XML string so untransformed top-level
//! elements can be captured verbatim by byte range and re-emitted unchanged.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::area::{Area, CellPos};
use crate::cell_ref::{parse_area, parse_cell_ref};
use crate::error::{EngineError, Result};
use crate::marker::{parse_formula_cell, parse_text_cell};
use crate::types::{
    CellContent, CellSpec, ColSpec, ConditionalBlock, HeaderFooter, RepeatMarker, RowKind,
    RowSpec, SuffixItem,
};
use crate::xml::{attr_pairs, attr_string, attr_u32};

/// Analysis output for one sheet, before repeat regions are resolved and
/// validated workbook-wide.
pub(super) struct ParsedSheet {
    pub name: String,
    pub part_path: String,
    pub rows: Vec<RowSpec>,
    pub merges: Vec<Area>,
    pub conditional: Vec<ConditionalBlock>,
    pub header_footer: Option<HeaderFooter>,
    pub cols: Vec<ColSpec>,
    pub prefix_xml: Vec<String>,
    pub suffix: Vec<SuffixItem>,
    /// Repeat declarations found on this sheet, with the cell they were
    /// written in (erased from the blueprint).
    pub repeat_markers: Vec<(CellPos, RepeatMarker)>,
    pub last_row: u32,
    pub last_col: u32,
    pub drawing_rid: Option<String>,
    pub worksheet_attrs: Vec<(String, String)>,
}

/// Parse one worksheet part.
pub(super) fn parse_sheet(
    xml: &str,
    name: &str,
    part_path: &str,
    shared_strings: &[String],
) -> Result<ParsedSheet> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut sheet = ParsedSheet {
        name: name.to_string(),
        part_path: part_path.to_string(),
        rows: Vec::new(),
        merges: Vec::new(),
        conditional: Vec::new(),
        header_footer: None,
        cols: Vec::new(),
        prefix_xml: Vec::new(),
        suffix: Vec::new(),
        repeat_markers: Vec::new(),
        last_row: 0,
        last_col: 0,
        drawing_rid: None,
        worksheet_attrs: Vec::new(),
    };

    let mut seen_sheet_data = false;
    let mut conditional_slot = false;

    loop {
        let event_start = reader.buffer_position();
        match reader.read_event()? {
            Event::Eof => break,
            Event::Decl(_) | Event::Text(_) | Event::Comment(_) => {}
            Event::Start(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"worksheet" => {
                        sheet.worksheet_attrs = attr_pairs(e);
                    }
                    b"sheetData" => {
                        seen_sheet_data = true;
                        parse_sheet_data(&mut reader, &mut sheet, shared_strings)?;
                    }
                    b"cols" => {
                        parse_cols(&mut reader, &mut sheet)?;
                    }
                    b"mergeCells" => {
                        parse_merge_cells(&mut reader, &mut sheet)?;
                        sheet.suffix.push(SuffixItem::Merges);
                    }
                    b"conditionalFormatting" => {
                        let raw = capture_element(xml, &mut reader, event_start)?;
                        if let Some(block) = parse_conditional_block(e, &raw) {
                            sheet.conditional.push(block);
                        }
                        if !conditional_slot {
                            conditional_slot = true;
                            sheet.suffix.push(SuffixItem::Conditional);
                        }
                    }
                    b"headerFooter" => {
                        sheet.header_footer = Some(parse_header_footer(e, &mut reader)?);
                        sheet.suffix.push(SuffixItem::HeaderFooter);
                    }
                    b"dimension" => {
                        if let Some(r) = attr_string(e, b"ref") {
                            record_dimension(&mut sheet, &r);
                        }
                        let _ = capture_element(xml, &mut reader, event_start)?;
                    }
                    b"drawing" => {
                        sheet.drawing_rid = crate::xml::attr_string_local(e, b"id");
                        let raw = capture_element(xml, &mut reader, event_start)?;
                        push_passthrough(&mut sheet, raw, seen_sheet_data);
                    }
                    _ => {
                        let raw = capture_element(xml, &mut reader, event_start)?;
                        push_passthrough(&mut sheet, raw, seen_sheet_data);
                    }
                }
            }
            Event::Empty(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"worksheet" => {}
                    b"sheetData" => {
                        seen_sheet_data = true;
                    }
                    b"dimension" => {
                        if let Some(r) = attr_string(e, b"ref") {
                            record_dimension(&mut sheet, &r);
                        }
                    }
                    b"drawing" => {
                        sheet.drawing_rid = crate::xml::attr_string_local(e, b"id");
                        let raw = xml[event_start..reader.buffer_position()]
                            .trim()
                            .to_string();
                        push_passthrough(&mut sheet, raw, seen_sheet_data);
                    }
                    b"conditionalFormatting" | b"mergeCells" | b"headerFooter" | b"cols" => {
                        // Degenerate self-closing forms carry nothing to keep.
                    }
                    _ => {
                        let raw = xml[event_start..reader.buffer_position()]
                            .trim()
                            .to_string();
                        push_passthrough(&mut sheet, raw, seen_sheet_data);
                    }
                }
            }
            Event::End(_) | Event::CData(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    sheet.rows.sort_by_key(|r| r.template_row);
    Ok(sheet)
}

fn push_passthrough(sheet: &mut ParsedSheet, raw: String, after_sheet_data: bool) {
    if raw.is_empty() {
        return;
    }
    if after_sheet_data {
        sheet.suffix.push(SuffixItem::Raw(raw));
    } else {
        sheet.prefix_xml.push(raw);
    }
}

fn record_dimension(sheet: &mut ParsedSheet, dimension_ref: &str) {
    if let Some(area) = parse_area(dimension_ref) {
        sheet.last_row = sheet.last_row.max(area.end.row);
        sheet.last_col = sheet.last_col.max(area.end.col);
    }
}

/// Capture the raw text of the element whose `Start` event was just read,
/// consuming events through its matching end tag.
fn capture_element(xml: &str, reader: &mut Reader<&[u8]>, start_pos: usize) -> Result<String> {
    let mut depth = 1u32;
    while depth > 0 {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(xml[start_pos..reader.buffer_position()].trim().to_string())
}

fn parse_cols(reader: &mut Reader<&[u8]>, sheet: &mut ParsedSheet) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) => {
                if e.local_name().as_ref() == b"col" {
                    let min = attr_u32(e, b"min").unwrap_or(1);
                    let max = attr_u32(e, b"max").unwrap_or(min);
                    let attrs = attr_pairs(e)
                        .into_iter()
                        .filter(|(k, _)| k != "min" && k != "max")
                        .collect();
                    sheet.cols.push(ColSpec {
                        min: min.saturating_sub(1),
                        max: max.saturating_sub(1),
                        attrs,
                    });
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"cols" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn parse_merge_cells(reader: &mut Reader<&[u8]>, sheet: &mut ParsedSheet) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) => {
                if e.local_name().as_ref() == b"mergeCell" {
                    if let Some(area) = attr_string(e, b"ref").as_deref().and_then(parse_area) {
                        sheet.merges.push(area);
                    }
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"mergeCells" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

/// Extract the ranges and verbatim rule XML of a `<conditionalFormatting>`
/// element. Rule bodies are never reinterpreted, so `dxfId` references pass
/// through untouched.
fn parse_conditional_block(start: &BytesStart, raw: &str) -> Option<ConditionalBlock> {
    let sqref = attr_string(start, b"sqref")?;
    let areas: Vec<Area> = sqref.split_whitespace().filter_map(parse_area).collect();
    if areas.is_empty() {
        return None;
    }
    let inner_start = raw.find('>')? + 1;
    let inner_end = raw.rfind("</")?;
    if inner_end <= inner_start {
        return None;
    }
    Some(ConditionalBlock {
        areas,
        rules_xml: raw[inner_start..inner_end].to_string(),
    })
}

fn parse_header_footer(start: &BytesStart, reader: &mut Reader<&[u8]>) -> Result<HeaderFooter> {
    let mut hf = HeaderFooter {
        attrs: attr_pairs(start),
        ..Default::default()
    };

    let mut current: Option<Vec<u8>> = None;
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                current = Some(e.local_name().as_ref().to_vec());
                text.clear();
            }
            Event::Text(ref t) => {
                if current.is_some() {
                    text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Event::End(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                if local == b"headerFooter" {
                    break;
                }
                if current.as_deref() == Some(local.as_slice()) {
                    let value = Some(text.clone());
                    match local.as_slice() {
                        b"oddHeader" => hf.odd_header = value,
                        b"oddFooter" => hf.odd_footer = value,
                        b"evenHeader" => hf.even_header = value,
                        b"evenFooter" => hf.even_footer = value,
                        b"firstHeader" => hf.first_header = value,
                        b"firstFooter" => hf.first_footer = value,
                        _ => {}
                    }
                    current = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(hf)
}

// ---------------------------------------------------------------------------
// sheetData
// ---------------------------------------------------------------------------

fn parse_sheet_data(
    reader: &mut Reader<&[u8]>,
    sheet: &mut ParsedSheet,
    shared_strings: &[String],
) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(ref e) if e.local_name().as_ref() == b"row" => {
                let row = parse_row(e, reader, sheet, shared_strings, false)?;
                sheet.rows.push(row);
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                let row = parse_row(e, reader, sheet, shared_strings, true)?;
                sheet.rows.push(row);
            }
            Event::End(ref e) if e.local_name().as_ref() == b"sheetData" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn parse_row(
    start: &BytesStart,
    reader: &mut Reader<&[u8]>,
    sheet: &mut ParsedSheet,
    shared_strings: &[String],
    self_closing: bool,
) -> Result<RowSpec> {
    let template_row = attr_u32(start, b"r")
        .unwrap_or(sheet.rows.last().map_or(1, |r| r.template_row + 2))
        .saturating_sub(1);
    let attrs: Vec<(String, String)> = attr_pairs(start)
        .into_iter()
        .filter(|(k, _)| k != "r" && k != "spans")
        .collect();

    sheet.last_row = sheet.last_row.max(template_row);

    let mut row = RowSpec {
        template_row,
        kind: RowKind::Static,
        attrs,
        cells: Vec::new(),
    };

    if self_closing {
        return Ok(row);
    }

    let mut next_col = 0u32;
    loop {
        match reader.read_event()? {
            Event::Start(ref e) if e.local_name().as_ref() == b"c" => {
                let cell = parse_cell(e, reader, sheet, shared_strings, template_row, next_col, false)?;
                next_col = cell.col + 1;
                push_cell(sheet, &mut row, cell, template_row)?;
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                let cell = parse_cell(e, reader, sheet, shared_strings, template_row, next_col, true)?;
                next_col = cell.col + 1;
                push_cell(sheet, &mut row, cell, template_row)?;
            }
            Event::End(ref e) if e.local_name().as_ref() == b"row" => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(row)
}

/// Detach repeat declarations into the marker list; everything else joins the
/// row blueprint.
fn push_cell(
    sheet: &mut ParsedSheet,
    row: &mut RowSpec,
    mut cell: CellSpec,
    template_row: u32,
) -> Result<()> {
    sheet.last_col = sheet.last_col.max(cell.col);
    if let CellContent::Repeat(marker) = cell.content {
        sheet
            .repeat_markers
            .push((CellPos::new(template_row, cell.col), marker));
        cell.content = CellContent::Empty;
    }
    row.cells.push(cell);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn parse_cell(
    start: &BytesStart,
    reader: &mut Reader<&[u8]>,
    sheet: &ParsedSheet,
    shared_strings: &[String],
    template_row: u32,
    fallback_col: u32,
    self_closing: bool,
) -> Result<CellSpec> {
    let col = attr_string(start, b"r")
        .as_deref()
        .and_then(parse_cell_ref)
        .map_or(fallback_col, |(c, _)| c);
    let style = attr_u32(start, b"s");
    let cell_type = attr_string(start, b"t").unwrap_or_default();

    let mut v_text: Option<String> = None;
    let mut f_text: Option<String> = None;
    let mut is_text: Option<String> = None;

    if !self_closing {
        let mut current: Option<&'static str> = None;
        let mut inline_depth = 0u32;
        loop {
            match reader.read_event()? {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"v" => current = Some("v"),
                    b"f" => current = Some("f"),
                    b"is" => {
                        inline_depth = 1;
                        is_text = Some(String::new());
                    }
                    b"t" if inline_depth > 0 => current = Some("t"),
                    _ if inline_depth > 0 => inline_depth += 1,
                    _ => {}
                },
                Event::Text(ref t) => {
                    let text = t.unescape().unwrap_or_default();
                    match current {
                        Some("v") => v_text.get_or_insert_with(String::new).push_str(&text),
                        Some("f") => f_text.get_or_insert_with(String::new).push_str(&text),
                        Some("t") => {
                            if let Some(s) = is_text.as_mut() {
                                s.push_str(&text);
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"c" => break,
                    b"v" | b"f" => current = None,
                    b"t" if inline_depth > 0 => current = None,
                    b"is" => inline_depth = 0,
                    _ if inline_depth > 1 => inline_depth -= 1,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
    }

    let content = cell_content(
        &cell_type,
        v_text.as_deref(),
        f_text.as_deref(),
        is_text.as_deref(),
        shared_strings,
    )
    .map_err(|source| EngineError::AtCell {
        sheet: sheet.name.clone(),
        cell: crate::cell_ref::format_cell_ref(template_row, col),
        source: Box::new(source),
    })?;

    Ok(CellSpec {
        col,
        style,
        content,
    })
}

fn cell_content(
    cell_type: &str,
    v_text: Option<&str>,
    f_text: Option<&str>,
    is_text: Option<&str>,
    shared_strings: &[String],
) -> Result<CellContent> {
    if let Some(formula) = f_text {
        return parse_formula_cell(formula);
    }

    match cell_type {
        "s" => {
            let text = v_text
                .and_then(|v| v.trim().parse::<usize>().ok())
                .and_then(|idx| shared_strings.get(idx))
                .cloned()
                .unwrap_or_default();
            parse_text_cell(&text)
        }
        "inlineStr" => parse_text_cell(is_text.unwrap_or_default()),
        "str" => parse_text_cell(v_text.unwrap_or_default()),
        "b" => Ok(CellContent::StaticString(
            if v_text == Some("1") { "TRUE" } else { "FALSE" }.to_string(),
        )),
        "e" => Ok(CellContent::StaticString(
            v_text.unwrap_or("#VALUE!").to_string(),
        )),
        _ => match v_text {
            Some(v) => match v.trim().parse::<f64>() {
                Ok(n) => Ok(CellContent::StaticNumber(n)),
                Err(_) => parse_text_cell(v),
            },
            None => Ok(CellContent::Empty),
        },
    }
}
