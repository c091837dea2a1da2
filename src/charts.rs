//! Chart and drawing preservation.
//!
//! Chart parts are extracted before rendering and restored afterwards, so a
//! row-streaming writer can never lose them; on restore, every series data
//! reference (`<c:f>Sheet1!$B$2:$B$4</c:f>`) is re-projected through the
//! position calculator so chart sources track the expanded data.

use crate::error::Result;
use crate::formula::retarget_range_text;
use crate::package::{self, PackagePatch};
use crate::position::PositionCalculator;
use crate::types::WorkbookSpec;

/// One preserved chart or drawing part, held as raw bytes.
#[derive(Debug, Clone)]
pub struct ChartPart {
    pub path: String,
    pub xml: String,
}

fn is_chart_part(name: &str) -> bool {
    (name.starts_with("xl/charts/") || name.starts_with("xl/drawings/"))
        && name.ends_with(".xml")
}

/// Snapshot every chart and drawing part of the template.
pub(crate) fn extract_charts(template: &[u8]) -> Result<Vec<ChartPart>> {
    let mut archive = package::open(template)?;
    let names = package::entry_names(&mut archive);

    let mut parts = Vec::new();
    for name in names.into_iter().filter(|n| is_chart_part(n)) {
        if let Some(xml) = package::try_read_part_string(&mut archive, &name) {
            parts.push(ChartPart { path: name, xml });
        }
    }
    log::debug!("extracted {} chart/drawing part(s)", parts.len());
    Ok(parts)
}

/// Write the preserved parts back into the rendered package with their data
/// references re-projected.
pub(crate) fn restore_charts(
    rendered: &[u8],
    charts: &[ChartPart],
    spec: &WorkbookSpec,
    calcs: &[PositionCalculator],
) -> Result<Vec<u8>> {
    if charts.is_empty() {
        return Ok(rendered.to_vec());
    }

    let mut archive = package::open(rendered)?;
    let mut patch = PackagePatch::new();
    for part in charts {
        // Parts still present carry earlier stages' variable substitutions;
        // the extracted snapshot only backfills parts a streaming writer
        // dropped.
        let current = package::try_read_part_string(&mut archive, &part.path)
            .unwrap_or_else(|| part.xml.clone());
        let rewritten = if part.path.starts_with("xl/charts/") {
            rewrite_chart_refs(&current, spec, calcs)
        } else {
            current
        };
        patch.replace_string(part.path.clone(), rewritten);
    }
    package::apply(rendered, patch)
}

/// Rewrite every `<c:f>` reference through its sheet's calculator.
fn rewrite_chart_refs(xml: &str, spec: &WorkbookSpec, calcs: &[PositionCalculator]) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;

    while let Some(start) = rest.find("<c:f>") {
        let after = &rest[start + 5..];
        let Some(end) = after.find("</c:f>") else {
            break;
        };
        out.push_str(&rest[..start + 5]);
        out.push_str(&project_reference(&after[..end], spec, calcs));
        out.push_str("</c:f>");
        rest = &after[end + 6..];
    }
    out.push_str(rest);
    out
}

fn project_reference(reference: &str, spec: &WorkbookSpec, calcs: &[PositionCalculator]) -> String {
    let Some((sheet_name, area)) = crate::cell_ref::parse_sheet_area(reference) else {
        return reference.to_string();
    };
    let Some(sheet_name) = sheet_name else {
        return reference.to_string();
    };
    let Some(index) = spec.sheets.iter().position(|s| s.name == sheet_name) else {
        return reference.to_string();
    };
    let Some(calc) = calcs.get(index) else {
        return reference.to_string();
    };
    retarget_range_text(reference, &calc.project_area(&area))
}
