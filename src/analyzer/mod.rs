//! Template analysis: lifts a workbook package into a [`WorkbookSpec`].
//!
//! Walks every sheet in natural order, parses each cell through the marker
//! grammar, detaches repeat declarations into [`RepeatRegionSpec`]s, records
//! layout (merges, conditional formatting, header/footer, column widths), and
//! validates that repeat regions neither overlap nor nest.

mod worksheet;

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::area::Area;
use crate::cell_ref::{format_area, format_cell_ref, parse_sheet_area};
use crate::error::{EngineError, Result};
use crate::package;
use crate::types::{
    CellContent, RangeRef, RepeatRegionSpec, RequiredNames, RowKind, RowSpec, SheetSpec,
    WorkbookSpec,
};
use crate::xml::{attr_string, attr_string_local};

use worksheet::ParsedSheet;

/// Analyze a template workbook into its blueprint.
pub fn analyze(template: &[u8]) -> Result<WorkbookSpec> {
    let mut archive = package::open(template)?;

    let rels_xml = package::try_read_part_string(&mut archive, "xl/_rels/workbook.xml.rels")
        .unwrap_or_default();
    let rels = package::parse_relationships(&rels_xml);
    let sheet_targets: BTreeMap<String, String> = rels
        .iter()
        .filter(|r| r.rel_type.contains("worksheet"))
        .map(|r| {
            (
                r.id.clone(),
                package::resolve_target("xl/workbook.xml", &r.target),
            )
        })
        .collect();

    let workbook_xml = package::read_part_string(&mut archive, "xl/workbook.xml")?;
    let info = parse_workbook_info(&workbook_xml)?;

    let shared_strings = package::try_read_part_string(&mut archive, "xl/sharedStrings.xml")
        .map(|xml| parse_shared_strings(&xml))
        .transpose()?
        .unwrap_or_default();

    let mut parsed: Vec<ParsedSheet> = Vec::with_capacity(info.sheets.len());
    for (idx, (name, rid)) in info.sheets.iter().enumerate() {
        let path = sheet_targets
            .get(rid)
            .cloned()
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", idx + 1));
        let xml = package::read_part_string(&mut archive, &path)?;
        parsed.push(worksheet::parse_sheet(&xml, name, &path, &shared_strings)?);
    }

    finalize(parsed, info.defined_names, info.date1904)
}

struct WorkbookInfo {
    sheets: Vec<(String, String)>,
    defined_names: BTreeMap<String, String>,
    date1904: bool,
}

fn parse_workbook_info(xml: &str) -> Result<WorkbookInfo> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut info = WorkbookInfo {
        sheets: Vec::new(),
        defined_names: BTreeMap::new(),
        date1904: false,
    };

    let mut current_defined: Option<String> = None;
    let mut defined_text = String::new();

    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) => match e.local_name().as_ref() {
                b"workbookPr" => {
                    if let Some(v) = attr_string(e, b"date1904") {
                        info.date1904 = v == "1" || v.eq_ignore_ascii_case("true");
                    }
                }
                b"sheet" => {
                    let name = attr_string(e, b"name").unwrap_or_default();
                    let rid = attr_string_local(e, b"id").unwrap_or_default();
                    if !name.is_empty() {
                        info.sheets.push((name, rid));
                    }
                }
                b"definedName" => {
                    current_defined = attr_string(e, b"name");
                    defined_text.clear();
                }
                _ => {}
            },
            Event::Text(ref t) => {
                if current_defined.is_some() {
                    defined_text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Event::End(ref e) => {
                if e.local_name().as_ref() == b"definedName" {
                    if let Some(name) = current_defined.take() {
                        info.defined_names.insert(name, defined_text.clone());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(info)
}

/// Parse the shared string table; rich-text runs collapse to plain text.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Event::Text(ref t) => {
                if in_text {
                    if let Some(s) = current.as_mut() {
                        s.push_str(&t.unescape().unwrap_or_default());
                    }
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

/// Resolve repeat declarations into regions, validate them, and assemble the
/// final blueprint.
fn finalize(
    parsed: Vec<ParsedSheet>,
    defined_names: BTreeMap<String, String>,
    date1904: bool,
) -> Result<WorkbookSpec> {
    let sheet_names: Vec<String> = parsed.iter().map(|s| s.name.clone()).collect();

    // Regions end up on the sheet their range names, which is usually (but
    // not necessarily) the sheet the marker was written on.
    let mut regions_per_sheet: Vec<Vec<RepeatRegionSpec>> = vec![Vec::new(); parsed.len()];
    for (sheet_idx, sheet) in parsed.iter().enumerate() {
        for (marker_cell, marker) in &sheet.repeat_markers {
            let (target_idx, area) = resolve_range(
                &marker.range,
                sheet_idx,
                &sheet_names,
                &defined_names,
            )?;
            let empty_range = match &marker.empty_range {
                None => None,
                Some(range) => {
                    let (empty_idx, empty_area) =
                        resolve_range(range, target_idx, &sheet_names, &defined_names)?;
                    if empty_idx != target_idx {
                        return Err(EngineError::InvalidParameterValue {
                            literal: format_area(&empty_area),
                            reason: "empty range must be on the repeat's own sheet".to_string(),
                        });
                    }
                    Some(empty_area)
                }
            };
            regions_per_sheet[target_idx].push(RepeatRegionSpec {
                area,
                collection: marker.collection.clone(),
                var: marker.var.clone(),
                direction: marker.direction,
                empty_range,
                marker_cell: *marker_cell,
            });
        }
    }

    // An inner declaration written inside another region's area is a nested
    // repeat: unsupported, skipped from the blueprint.
    for (sheet_idx, regions) in regions_per_sheet.iter_mut().enumerate() {
        let keep: Vec<bool> = regions
            .iter()
            .map(|candidate| {
                let nested = regions.iter().any(|other| {
                    other.area != candidate.area
                        && other
                            .area
                            .contains(candidate.marker_cell.row, candidate.marker_cell.col)
                });
                if nested {
                    log::warn!(
                        "sheet {}: nested repeat `{}` at {} skipped",
                        sheet_names[sheet_idx],
                        candidate.collection,
                        format_cell_ref(candidate.marker_cell.row, candidate.marker_cell.col)
                    );
                }
                !nested
            })
            .collect();
        let mut it = keep.iter();
        regions.retain(|_| *it.next().unwrap_or(&true));
    }

    // Remaining regions must be pairwise disjoint in 2D.
    for (sheet_idx, regions) in regions_per_sheet.iter().enumerate() {
        for (i, a) in regions.iter().enumerate() {
            for b in regions.iter().skip(i + 1) {
                if a.area.overlaps(&b.area) {
                    return Err(EngineError::InvalidParameterValue {
                        literal: format!(
                            "{}!{} / {}",
                            sheet_names[sheet_idx],
                            format_area(&a.area),
                            format_area(&b.area)
                        ),
                        reason: format!(
                            "repeat regions `{}` and `{}` overlap",
                            a.collection, b.collection
                        ),
                    });
                }
            }
        }
    }

    let mut required = RequiredNames::default();
    let mut sheets = Vec::with_capacity(parsed.len());
    for (sheet_idx, sheet) in parsed.into_iter().enumerate() {
        let regions = std::mem::take(&mut regions_per_sheet[sheet_idx]);
        let spec = assemble_sheet(sheet, regions, &mut required)?;
        sheets.push(spec);
    }

    Ok(WorkbookSpec {
        sheets,
        defined_names,
        date1904,
        required,
    })
}

fn resolve_range(
    range: &RangeRef,
    current_sheet: usize,
    sheet_names: &[String],
    defined_names: &BTreeMap<String, String>,
) -> Result<(usize, Area)> {
    match range {
        RangeRef::Cells { sheet: None, area } => Ok((current_sheet, *area)),
        RangeRef::Cells {
            sheet: Some(name),
            area,
        } => {
            let idx = sheet_names
                .iter()
                .position(|s| s == name)
                .ok_or_else(|| EngineError::SheetNotFound(name.clone()))?;
            Ok((idx, *area))
        }
        RangeRef::Named(name) => {
            let text = defined_names
                .get(name)
                .ok_or_else(|| EngineError::InvalidRangeFormat(name.clone()))?;
            let (sheet, area) = parse_sheet_area(text)
                .ok_or_else(|| EngineError::InvalidRangeFormat(text.clone()))?;
            match sheet {
                None => Ok((current_sheet, area)),
                Some(sheet_name) => {
                    let idx = sheet_names
                        .iter()
                        .position(|s| *s == sheet_name)
                        .ok_or(EngineError::SheetNotFound(sheet_name))?;
                    Ok((idx, area))
                }
            }
        }
    }
}

fn assemble_sheet(
    sheet: ParsedSheet,
    regions: Vec<RepeatRegionSpec>,
    required: &mut RequiredNames,
) -> Result<SheetSpec> {
    let ParsedSheet {
        name,
        part_path,
        mut rows,
        merges,
        conditional,
        header_footer,
        cols,
        prefix_xml,
        suffix,
        repeat_markers: _,
        mut last_row,
        last_col,
        drawing_rid,
        worksheet_attrs,
    } = sheet;

    // Every row a DOWN region covers needs a blueprint entry, even when the
    // template left it empty.
    for region in &regions {
        if region.direction == crate::types::Direction::Down {
            for r in region.area.rows() {
                if rows.binary_search_by_key(&r, |row| row.template_row).is_err() {
                    rows.push(RowSpec {
                        template_row: r,
                        kind: RowKind::Static,
                        attrs: Vec::new(),
                        cells: Vec::new(),
                    });
                    rows.sort_by_key(|row| row.template_row);
                }
            }
            last_row = last_row.max(region.area.end.row);
        }
    }

    for (region_idx, region) in regions.iter().enumerate() {
        if region.direction != crate::types::Direction::Down {
            continue;
        }
        for row in &mut rows {
            if region.area.contains_row(row.template_row) {
                row.kind = if row.template_row == region.area.start.row {
                    RowKind::Repeat { region: region_idx }
                } else {
                    RowKind::Continuation {
                        region: region_idx,
                        offset: row.template_row - region.area.start.row,
                    }
                };
            }
        }
    }

    // Required-name collection.
    let region_vars: Vec<&str> = regions.iter().map(|r| r.var.as_str()).collect();
    for region in &regions {
        required.collections.insert(region.collection.clone());
    }
    for row in &rows {
        for cell in &row.cells {
            match &cell.content {
                CellContent::Variable { name, .. } => {
                    required.variables.insert(name.clone());
                }
                CellContent::ItemField { item, .. } => {
                    if !region_vars.contains(&item.as_str()) {
                        required.variables.insert(item.clone());
                    }
                }
                CellContent::FormulaWithVariables { names, .. } => {
                    for n in names {
                        let root = n.split('.').next().unwrap_or(n);
                        if !region_vars.contains(&root) {
                            required.variables.insert(root.to_string());
                        }
                    }
                }
                CellContent::Size { collection } => {
                    required.collections.insert(collection.clone());
                }
                CellContent::Image(image) => {
                    required.images.insert(image.name.clone());
                }
                _ => {}
            }
        }
    }

    Ok(SheetSpec {
        name,
        part_path,
        worksheet_attrs,
        rows,
        regions,
        merges,
        conditional,
        header_footer,
        cols,
        prefix_xml,
        suffix,
        template_last_row: last_row,
        template_last_col: last_col,
        drawing_rid,
    })
}
