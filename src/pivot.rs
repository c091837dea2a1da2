//! Pivot table preservation and cache rebuild.
//!
//! Pivot tables reference source ranges that repeat expansion invalidates.
//! Before rendering, each table's definition, cache definition, and cache
//! records are extracted together with a projection of the source geometry;
//! after rendering, the source range is remapped through the position
//! calculator and fresh cache + definition parts are emitted from the
//! rendered cell values.
//!
//! Rebuild limits: calculated fields/items are dropped and date/number
//! grouping settings reset. The row header caption is always preserved.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::area::Area;
use crate::cell_ref::{format_area, parse_area, parse_cell_ref};
use crate::error::Result;
use crate::package::{self, PackagePatch};
use crate::position::PositionCalculator;
use crate::types::WorkbookSpec;
use crate::xml::{attr_string, attr_string_local, escape};

const PIVOT_NS: &str =
    r#"xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

/// Projection of one pivot table extracted from the template.
#[derive(Debug, Clone)]
pub struct PivotInfo {
    pub table_path: String,
    pub cache_def_path: String,
    pub records_path: Option<String>,
    records_rid: Option<String>,
    host_sheet_path: Option<String>,
    name: String,
    cache_id: Option<String>,
    row_header_caption: Option<String>,
    location_ref: Option<String>,
    pub source_sheet: String,
    pub source_area: Area,
    /// Per cache field: the pivot axis (`axisRow` / `axisCol`), if any.
    field_axes: Vec<Option<String>>,
    field_data: Vec<bool>,
    field_names: Vec<String>,
    row_fields: Vec<u32>,
    data_fields: Vec<(String, u32)>,
}

/// Extract every pivot table of the template with its cache parts.
pub(crate) fn extract_pivots(template: &[u8]) -> Result<Vec<PivotInfo>> {
    let mut archive = package::open(template)?;
    let names = package::entry_names(&mut archive);

    // Host worksheet lookup: worksheet rels point at pivot table parts.
    let mut host_by_table: BTreeMap<String, String> = BTreeMap::new();
    for name in names.iter().filter(|n| {
        n.starts_with("xl/worksheets/_rels/") && n.ends_with(".rels")
    }) {
        let Some(xml) = package::try_read_part_string(&mut archive, name) else {
            continue;
        };
        let sheet_path = name
            .replace("/_rels", "")
            .trim_end_matches(".rels")
            .to_string();
        for rel in package::parse_relationships(&xml) {
            if rel.rel_type.contains("pivotTable") {
                let target = package::resolve_target(&sheet_path, &rel.target);
                host_by_table.insert(target, sheet_path.clone());
            }
        }
    }

    let mut pivots = Vec::new();
    for table_path in names
        .iter()
        .filter(|n| n.starts_with("xl/pivotTables/pivotTable") && n.ends_with(".xml"))
    {
        let Some(table_xml) = package::try_read_part_string(&mut archive, table_path) else {
            continue;
        };

        let table_rels_path = package::rels_path_for(table_path);
        let cache_def_path = package::try_read_part_string(&mut archive, &table_rels_path)
            .and_then(|xml| {
                package::parse_relationships(&xml)
                    .into_iter()
                    .find(|r| r.rel_type.contains("pivotCacheDefinition"))
                    .map(|r| package::resolve_target(table_path, &r.target))
            });
        let Some(cache_def_path) = cache_def_path else {
            log::warn!("pivot table {table_path} has no cache definition; skipped");
            continue;
        };
        let Some(cache_xml) = package::try_read_part_string(&mut archive, &cache_def_path) else {
            continue;
        };

        let cache_rels_path = package::rels_path_for(&cache_def_path);
        let records_path = package::try_read_part_string(&mut archive, &cache_rels_path)
            .and_then(|xml| {
                package::parse_relationships(&xml)
                    .into_iter()
                    .find(|r| r.rel_type.contains("pivotCacheRecords"))
                    .map(|r| package::resolve_target(&cache_def_path, &r.target))
            });

        if let Some(info) = parse_pivot(
            table_path,
            &table_xml,
            &cache_def_path,
            &cache_xml,
            records_path,
            host_by_table.get(table_path).cloned(),
        ) {
            pivots.push(info);
        }
    }

    log::debug!("extracted {} pivot table(s)", pivots.len());
    Ok(pivots)
}

fn parse_pivot(
    table_path: &str,
    table_xml: &str,
    cache_def_path: &str,
    cache_xml: &str,
    records_path: Option<String>,
    host_sheet_path: Option<String>,
) -> Option<PivotInfo> {
    let mut name = String::new();
    let mut cache_id = None;
    let mut row_header_caption = None;
    let mut location_ref = None;
    let mut field_axes = Vec::new();
    let mut field_data = Vec::new();
    let mut row_fields = Vec::new();
    let mut data_fields = Vec::new();

    let mut reader = Reader::from_str(table_xml);
    reader.trim_text(true);
    let mut section = Section::None;
    loop {
        match reader.read_event().ok()? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"pivotTableDefinition" => {
                    name = attr_string(e, b"name").unwrap_or_default();
                    cache_id = attr_string(e, b"cacheId");
                    row_header_caption = attr_string(e, b"rowHeaderCaption");
                }
                b"location" => location_ref = attr_string(e, b"ref"),
                b"pivotField" => {
                    field_axes.push(attr_string(e, b"axis"));
                    field_data.push(attr_string(e, b"dataField").as_deref() == Some("1"));
                }
                b"rowFields" => section = Section::RowFields,
                b"colFields" => section = Section::ColFields,
                b"field" => {
                    if section == Section::RowFields {
                        if let Some(x) = attr_string(e, b"x").and_then(|v| v.parse().ok()) {
                            row_fields.push(x);
                        }
                    }
                }
                b"dataField" => {
                    let field_name = attr_string(e, b"name").unwrap_or_default();
                    if let Some(fld) = attr_string(e, b"fld").and_then(|v| v.parse().ok()) {
                        data_fields.push((field_name, fld));
                    }
                }
                _ => {}
            },
            Event::End(ref e) => match e.local_name().as_ref() {
                b"rowFields" | b"colFields" => section = Section::None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let mut source_sheet = String::new();
    let mut source_ref = String::new();
    let mut records_rid = None;
    let mut field_names = Vec::new();

    let mut reader = Reader::from_str(cache_xml);
    reader.trim_text(true);
    loop {
        match reader.read_event().ok()? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"pivotCacheDefinition" => {
                    records_rid = attr_string_local(e, b"id");
                }
                b"worksheetSource" => {
                    source_sheet = attr_string(e, b"sheet").unwrap_or_default();
                    source_ref = attr_string(e, b"ref").unwrap_or_default();
                }
                b"cacheField" => {
                    field_names.push(attr_string(e, b"name").unwrap_or_default());
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let source_area = parse_area(&source_ref)?;
    Some(PivotInfo {
        table_path: table_path.to_string(),
        cache_def_path: cache_def_path.to_string(),
        records_path,
        records_rid,
        host_sheet_path,
        name,
        cache_id,
        row_header_caption,
        location_ref,
        source_sheet,
        source_area,
        field_axes,
        field_data,
        field_names,
        row_fields,
        data_fields,
    })
}

#[derive(PartialEq)]
enum Section {
    None,
    RowFields,
    ColFields,
}

// ---------------------------------------------------------------------------
// Recreate
// ---------------------------------------------------------------------------

/// One rendered cell, as read back for cache building.
#[derive(Debug, Clone, Default)]
struct CellLite {
    text: Option<String>,
    number: Option<f64>,
}

impl CellLite {
    fn display(&self) -> String {
        if let Some(t) = &self.text {
            return t.clone();
        }
        if let Some(n) = self.number {
            let v = crate::value::Value::Float(n);
            return v.display_text();
        }
        String::new()
    }
}

/// A cache field prepared for emission.
struct FieldBuild {
    name: String,
    axis: Option<String>,
    numeric: bool,
    /// Ordered unique display values (axis fields only).
    shared: Vec<String>,
    /// Per record: shared index (axis), number (numeric), or raw text.
    cells: Vec<CellLite>,
}

/// Rebuild every pivot in the rendered package. Holds one pivot's data at a
/// time.
pub(crate) fn recreate_pivots(
    rendered: &[u8],
    pivots: &[PivotInfo],
    spec: &WorkbookSpec,
    calcs: &[PositionCalculator],
) -> Result<Vec<u8>> {
    if pivots.is_empty() {
        return Ok(rendered.to_vec());
    }

    let mut patch = PackagePatch::new();
    let mut archive = package::open(rendered)?;

    for pivot in pivots {
        let Some(source_index) = spec.sheets.iter().position(|s| s.name == pivot.source_sheet)
        else {
            log::warn!(
                "pivot {}: source sheet {:?} not found; left untouched",
                pivot.name,
                pivot.source_sheet
            );
            continue;
        };
        let Some(calc) = calcs.get(source_index) else {
            continue;
        };
        let new_area = calc.project_area(&pivot.source_area);

        let sheet_path = &spec.sheets[source_index].part_path;
        let Some(sheet_xml) = package::try_read_part_string(&mut archive, sheet_path) else {
            continue;
        };
        let cells = read_cells(&sheet_xml);

        let fields = build_fields(pivot, &new_area, &cells);
        let record_count = new_area.row_count().saturating_sub(1);

        patch.replace_string(
            pivot.cache_def_path.clone(),
            cache_definition_xml(pivot, &new_area, &fields, record_count),
        );
        if let Some(records_path) = &pivot.records_path {
            patch.replace_string(records_path.clone(), cache_records_xml(&fields, record_count));
        }
        patch.replace_string(pivot.table_path.clone(), table_definition_xml(pivot, &fields, spec, calcs));
    }

    package::apply(rendered, patch)
}

/// Read a rendered worksheet's cell values (inline strings and numbers).
fn read_cells(sheet_xml: &str) -> BTreeMap<(u32, u32), CellLite> {
    let mut cells = BTreeMap::new();
    let mut reader = Reader::from_str(sheet_xml);
    reader.trim_text(false);

    let mut current: Option<(u32, u32)> = None;
    let mut lite = CellLite::default();
    let mut in_value = false;
    let mut in_inline_text = false;
    let mut text_buf = String::new();

    loop {
        let Ok(event) = reader.read_event() else {
            break;
        };
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"c" => {
                    current = attr_string(e, b"r")
                        .as_deref()
                        .and_then(parse_cell_ref)
                        .map(|(col, row)| (row, col));
                    lite = CellLite::default();
                    text_buf.clear();
                }
                b"v" => in_value = true,
                b"t" => in_inline_text = true,
                _ => {}
            },
            Event::Text(ref t) => {
                if in_value || in_inline_text {
                    text_buf.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"v" => {
                    lite.number = text_buf.trim().parse::<f64>().ok();
                    if lite.number.is_none() {
                        lite.text = Some(text_buf.clone());
                    }
                    text_buf.clear();
                    in_value = false;
                }
                b"t" => {
                    lite.text = Some(text_buf.clone());
                    text_buf.clear();
                    in_inline_text = false;
                }
                b"c" => {
                    if let Some(pos) = current.take() {
                        cells.insert(pos, lite.clone());
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    cells
}

fn build_fields(
    pivot: &PivotInfo,
    area: &Area,
    cells: &BTreeMap<(u32, u32), CellLite>,
) -> Vec<FieldBuild> {
    let header_row = area.start.row;
    let mut fields = Vec::with_capacity(area.col_count() as usize);

    for (field_index, col) in area.cols().enumerate() {
        let name = cells
            .get(&(header_row, col))
            .map(CellLite::display)
            .filter(|s| !s.is_empty())
            .or_else(|| pivot.field_names.get(field_index).cloned())
            .unwrap_or_else(|| format!("Field{}", field_index + 1));

        let column_cells: Vec<CellLite> = (header_row + 1..=area.end.row)
            .map(|row| cells.get(&(row, col)).cloned().unwrap_or_default())
            .collect();

        let numeric = !column_cells.is_empty()
            && column_cells
                .iter()
                .all(|c| c.number.is_some() && c.text.is_none());
        let axis = pivot.field_axes.get(field_index).cloned().flatten();

        let mut shared = Vec::new();
        if axis.is_some() {
            for cell in &column_cells {
                let display = cell.display();
                if !shared.contains(&display) {
                    shared.push(display);
                }
            }
        }

        fields.push(FieldBuild {
            name,
            axis,
            numeric,
            shared,
            cells: column_cells,
        });
    }

    fields
}

fn cache_definition_xml(
    pivot: &PivotInfo,
    area: &Area,
    fields: &[FieldBuild],
    record_count: u32,
) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push_str(&format!("<pivotCacheDefinition {PIVOT_NS}"));
    if let Some(rid) = &pivot.records_rid {
        out.push_str(&format!(r#" r:id="{}""#, escape(rid)));
    }
    out.push_str(&format!(
        r#" refreshOnLoad="0" recordCount="{record_count}">"#
    ));
    out.push_str(&format!(
        r#"<cacheSource type="worksheet"><worksheetSource ref="{}" sheet="{}"/></cacheSource>"#,
        format_area(area),
        escape(&pivot.source_sheet)
    ));
    out.push_str(&format!("<cacheFields count=\"{}\">", fields.len()));
    for field in fields {
        out.push_str(&format!(r#"<cacheField name="{}" numFmtId="0">"#, escape(&field.name)));
        if field.axis.is_some() {
            out.push_str(&format!(
                r#"<sharedItems count="{}">"#,
                field.shared.len()
            ));
            for item in &field.shared {
                out.push_str(&format!(r#"<s v="{}"/>"#, escape(item)));
            }
            out.push_str("</sharedItems>");
        } else if field.numeric {
            let min = field
                .cells
                .iter()
                .filter_map(|c| c.number)
                .fold(f64::INFINITY, f64::min);
            let max = field
                .cells
                .iter()
                .filter_map(|c| c.number)
                .fold(f64::NEG_INFINITY, f64::max);
            let integral = field
                .cells
                .iter()
                .filter_map(|c| c.number)
                .all(|n| n.fract() == 0.0);
            out.push_str(&format!(
                r#"<sharedItems containsSemiMixedTypes="0" containsString="0" containsNumber="1" containsInteger="{}" minValue="{min}" maxValue="{max}"/>"#,
                u8::from(integral)
            ));
        } else {
            out.push_str("<sharedItems/>");
        }
        out.push_str("</cacheField>");
    }
    out.push_str("</cacheFields></pivotCacheDefinition>");
    out
}

fn cache_records_xml(fields: &[FieldBuild], record_count: u32) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push_str(&format!(
        "<pivotCacheRecords {PIVOT_NS} count=\"{record_count}\">"
    ));
    for record in 0..record_count as usize {
        out.push_str("<r>");
        for field in fields {
            let cell = field.cells.get(record).cloned().unwrap_or_default();
            if field.axis.is_some() {
                let display = cell.display();
                let index = field.shared.iter().position(|s| *s == display).unwrap_or(0);
                out.push_str(&format!(r#"<x v="{index}"/>"#));
            } else if field.numeric {
                out.push_str(&format!(r#"<n v="{}"/>"#, cell.number.unwrap_or(0.0)));
            } else {
                out.push_str(&format!(r#"<s v="{}"/>"#, escape(&cell.display())));
            }
        }
        out.push_str("</r>");
    }
    out.push_str("</pivotCacheRecords>");
    out
}

fn table_definition_xml(
    pivot: &PivotInfo,
    fields: &[FieldBuild],
    spec: &WorkbookSpec,
    calcs: &[PositionCalculator],
) -> String {
    // Re-project the table's own placement through its host sheet.
    let location = pivot
        .location_ref
        .as_deref()
        .and_then(parse_area)
        .map(|area| {
            let projected = pivot
                .host_sheet_path
                .as_ref()
                .and_then(|path| spec.sheets.iter().position(|s| &s.part_path == path))
                .and_then(|idx| calcs.get(idx))
                .map_or(area, |calc| calc.project_area(&area));
            format_area(&projected)
        })
        .unwrap_or_else(|| "A3".to_string());

    let mut out = String::with_capacity(1024);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push_str(&format!(
        r#"<pivotTableDefinition {PIVOT_NS} name="{}" dataCaption="Values""#,
        escape(&pivot.name)
    ));
    if let Some(cache_id) = &pivot.cache_id {
        out.push_str(&format!(r#" cacheId="{}""#, escape(cache_id)));
    }
    if let Some(caption) = &pivot.row_header_caption {
        out.push_str(&format!(r#" rowHeaderCaption="{}""#, escape(caption)));
    }
    out.push('>');
    out.push_str(&format!(
        r#"<location ref="{location}" firstHeaderRow="1" firstDataRow="1" firstDataCol="1"/>"#
    ));

    out.push_str(&format!("<pivotFields count=\"{}\">", fields.len()));
    for (index, field) in fields.iter().enumerate() {
        match &field.axis {
            Some(axis) => {
                out.push_str(&format!(r#"<pivotField axis="{}" showAll="0">"#, escape(axis)));
                out.push_str(&format!("<items count=\"{}\">", field.shared.len() + 1));
                for i in 0..field.shared.len() {
                    out.push_str(&format!(r#"<item x="{i}"/>"#));
                }
                out.push_str(r#"<item t="default"/>"#);
                out.push_str("</items></pivotField>");
            }
            None if pivot.field_data.get(index).copied().unwrap_or(false) => {
                out.push_str(r#"<pivotField dataField="1" showAll="0"/>"#);
            }
            None => out.push_str(r#"<pivotField showAll="0"/>"#),
        }
    }
    out.push_str("</pivotFields>");

    if !pivot.row_fields.is_empty() {
        out.push_str(&format!("<rowFields count=\"{}\">", pivot.row_fields.len()));
        for x in &pivot.row_fields {
            out.push_str(&format!(r#"<field x="{x}"/>"#));
        }
        out.push_str("</rowFields>");

        let first_axis_items = pivot
            .row_fields
            .first()
            .and_then(|&x| fields.get(x as usize))
            .map_or(0, |f| f.shared.len());
        out.push_str(&format!("<rowItems count=\"{}\">", first_axis_items + 1));
        for i in 0..first_axis_items {
            out.push_str(&format!("<i><x v=\"{i}\"/></i>"));
        }
        out.push_str(r#"<i t="grand"><x/></i>"#);
        out.push_str("</rowItems>");
    }

    out.push_str(r#"<colItems count="1"><i/></colItems>"#);

    if !pivot.data_fields.is_empty() {
        out.push_str(&format!("<dataFields count=\"{}\">", pivot.data_fields.len()));
        for (name, fld) in &pivot.data_fields {
            out.push_str(&format!(
                r#"<dataField name="{}" fld="{fld}" baseField="0" baseItem="0"/>"#,
                escape(name)
            ));
        }
        out.push_str("</dataFields>");
    }

    out.push_str("</pivotTableDefinition>");
    out
}
