//! Default number formats for data-produced cells.
//!
//! Cells that end up with no template style (blank-unit fills and data cells
//! written into unstyled template positions) get a derived cell format:
//! a clone of the sheet's base format with only the number format set to the
//! configured built-in index — whole values get the integer format, others
//! the decimal one. At most two formats are appended to the template's
//! `cellXfs`; template-styled cells are never touched.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::Config;
use crate::error::Result;
use crate::package::{self, PackagePatch};
use crate::xml::attr_string;

/// Apply the configured default number formats across the rendered package.
pub(crate) fn apply_default_number_formats(rendered: &[u8], config: &Config) -> Result<Vec<u8>> {
    let mut archive = package::open(rendered)?;
    let names = package::entry_names(&mut archive);

    // First pass: find sheets with unstyled numeric cells.
    let mut sheet_edits: Vec<(String, String)> = Vec::new();
    let mut need_integer = false;
    let mut need_decimal = false;

    let sheet_names: Vec<String> = names
        .iter()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .cloned()
        .collect();

    // Style indices are assigned after styles.xml is inspected; collect the
    // edits first with placeholders for which format each cell needs.
    for name in &sheet_names {
        let Some(xml) = package::try_read_part_string(&mut archive, name) else {
            continue;
        };
        let (rewritten, used_int, used_dec) = tag_unstyled_numeric_cells(&xml);
        if used_int || used_dec {
            need_integer |= used_int;
            need_decimal |= used_dec;
            sheet_edits.push((name.clone(), rewritten));
        }
    }

    if sheet_edits.is_empty() {
        return Ok(rendered.to_vec());
    }

    let styles_xml = package::read_part_string(&mut archive, "xl/styles.xml")?;
    let (new_styles, integer_xf, decimal_xf) = append_derived_xfs(
        &styles_xml,
        need_integer.then_some(config.integer_number_format_index),
        need_decimal.then_some(config.decimal_number_format_index),
    );

    let mut patch = PackagePatch::new();
    patch.replace_string("xl/styles.xml", new_styles);
    for (name, rewritten) in sheet_edits {
        let finalized = rewritten
            .replace(INT_PLACEHOLDER, &integer_xf.to_string())
            .replace(DEC_PLACEHOLDER, &decimal_xf.to_string());
        patch.replace_string(name, finalized);
    }

    package::apply(rendered, patch)
}

const INT_PLACEHOLDER: &str = "\u{1}INT\u{1}";
const DEC_PLACEHOLDER: &str = "\u{1}DEC\u{1}";

/// Insert `s="..."` placeholders on numeric `<c>` elements that carry no
/// style. Returns the rewritten XML and which formats were needed.
fn tag_unstyled_numeric_cells(xml: &str) -> (String, bool, bool) {
    let mut out = String::with_capacity(xml.len() + 64);
    let mut used_int = false;
    let mut used_dec = false;
    let mut rest = xml;

    while let Some(start) = rest.find("<c ") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(tag_end) = tail.find('>') else {
            out.push_str(tail);
            rest = "";
            break;
        };
        let tag = &tail[..=tag_end];
        let self_closing = tag.ends_with("/>");
        let has_style = tag.contains(" s=\"");
        let has_type = tag.contains(" t=\"");

        if self_closing || has_style || has_type {
            out.push_str(tag);
            rest = &tail[tag_end + 1..];
            continue;
        }

        // Numeric cell: `<c r="..."><v>n</v></c>` (formula cells carry <f>).
        let after_tag = &tail[tag_end + 1..];
        let Some(close) = after_tag.find("</c>") else {
            out.push_str(tag);
            rest = after_tag;
            continue;
        };
        let body = &after_tag[..close];
        let value = body
            .strip_prefix("<v>")
            .and_then(|b| b.strip_suffix("</v>"))
            .and_then(|v| v.trim().parse::<f64>().ok());

        match value {
            Some(n) => {
                let placeholder = if n.fract() == 0.0 {
                    used_int = true;
                    INT_PLACEHOLDER
                } else {
                    used_dec = true;
                    DEC_PLACEHOLDER
                };
                let patched = format!(
                    "{} s=\"{placeholder}\">",
                    tag.trim_end_matches('>')
                );
                out.push_str(&patched);
            }
            None => out.push_str(tag),
        }
        out.push_str(body);
        out.push_str("</c>");
        rest = &after_tag[close + 4..];
    }
    out.push_str(rest);

    (out, used_int, used_dec)
}

/// Append up to two xfs to `cellXfs`, cloning the base xf with only the
/// number format overridden. Returns the style XML and the new xf indices.
fn append_derived_xfs(
    styles_xml: &str,
    integer_fmt: Option<u16>,
    decimal_fmt: Option<u16>,
) -> (String, u32, u32) {
    let (count, base_attrs) = cell_xfs_info(styles_xml);

    let mut additions = String::new();
    let mut next = count;
    let mut integer_xf = 0;
    let mut decimal_xf = 0;

    let mut xf_for = |fmt: u16| {
        let mut xf = String::from("<xf");
        xf.push_str(&format!(" numFmtId=\"{fmt}\""));
        for (key, value) in &base_attrs {
            if key == "numFmtId" || key == "applyNumberFormat" {
                continue;
            }
            xf.push_str(&format!(" {key}=\"{value}\""));
        }
        xf.push_str(" applyNumberFormat=\"1\"/>");
        xf
    };

    if let Some(fmt) = integer_fmt {
        additions.push_str(&xf_for(fmt));
        integer_xf = next;
        next += 1;
    }
    if let Some(fmt) = decimal_fmt {
        additions.push_str(&xf_for(fmt));
        decimal_xf = next;
        next += 1;
    }

    let mut out = styles_xml.to_string();
    if let Some(end) = out.find("</cellXfs>") {
        out.insert_str(end, &additions);
        // Update the count attribute on the cellXfs element.
        if let Some(open) = out.find("<cellXfs") {
            let head = &out[open..];
            if let Some(count_pos) = head.find("count=\"") {
                let digits_start = open + count_pos + 7;
                let digits_end = out[digits_start..]
                    .find('"')
                    .map_or(digits_start, |p| digits_start + p);
                out.replace_range(digits_start..digits_end, &next.to_string());
            }
        }
    }

    (out, integer_xf, decimal_xf)
}

/// The `cellXfs` entry count and the first xf's attributes.
fn cell_xfs_info(styles_xml: &str) -> (u32, Vec<(String, String)>) {
    let mut reader = Reader::from_str(styles_xml);
    reader.trim_text(true);

    let mut in_cell_xfs = false;
    let mut count = 0u32;
    let mut base_attrs = Vec::new();
    let mut saw_base = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"cellXfs" => {
                in_cell_xfs = true;
                if let Some(c) = attr_string(e, b"count").and_then(|v| v.parse().ok()) {
                    count = c;
                }
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"cellXfs" => break,
            Ok(Event::Start(ref e) | Event::Empty(ref e))
                if in_cell_xfs && e.local_name().as_ref() == b"xf" =>
            {
                if !saw_base {
                    base_attrs = crate::xml::attr_pairs(e);
                    saw_base = true;
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    (count, base_attrs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn tags_only_unstyled_numeric_cells() {
        let xml = concat!(
            r#"<row r="1">"#,
            r#"<c r="A1"><v>8000</v></c>"#,
            r#"<c r="B1" s="3"><v>8000</v></c>"#,
            r#"<c r="C1" t="inlineStr"><is><t>x</t></is></c>"#,
            r#"<c r="D1"><v>2.5</v></c>"#,
            r#"<c r="E1"><f>SUM(A1)</f></c>"#,
            "</row>"
        );
        let (out, used_int, used_dec) = tag_unstyled_numeric_cells(xml);
        assert!(used_int);
        assert!(used_dec);
        assert!(out.contains(&format!(r#"<c r="A1" s="{INT_PLACEHOLDER}"><v>8000</v></c>"#)));
        assert!(out.contains(&format!(r#"<c r="D1" s="{DEC_PLACEHOLDER}"><v>2.5</v></c>"#)));
        // Styled, string, and formula cells untouched.
        assert!(out.contains(r#"<c r="B1" s="3"><v>8000</v></c>"#));
        assert!(out.contains(r#"<c r="E1"><f>SUM(A1)</f></c>"#));
    }

    #[test]
    fn appends_derived_xfs_and_updates_count() {
        let styles = concat!(
            r#"<styleSheet><cellXfs count="2">"#,
            r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#,
            r#"<xf numFmtId="14" fontId="1" fillId="0" borderId="0" xfId="0"/>"#,
            "</cellXfs></styleSheet>"
        );
        let (out, int_xf, dec_xf) = append_derived_xfs(styles, Some(3), Some(4));
        assert_eq!(int_xf, 2);
        assert_eq!(dec_xf, 3);
        assert!(out.contains(r#"<cellXfs count="4">"#));
        assert!(out.contains(
            r#"<xf numFmtId="3" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>"#
        ));
        assert!(out.contains(
            r#"<xf numFmtId="4" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>"#
        ));
    }
}
