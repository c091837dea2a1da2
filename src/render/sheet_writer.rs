//! Worksheet XML emission.
//!
//! Produced string cells use inline strings (`t="inlineStr"`), so the shared
//! string table never needs rebuilding. Rows are pushed through a
//! [`RowSink`] that flushes to the underlying writer in configurable
//! windows, which is what keeps the streaming strategy's resident set
//! bounded.

use std::io::Write;

use crate::area::Area;
use crate::cell_ref::{col_to_letter, format_area, format_cell_ref};
use crate::error::Result;
use crate::types::{ColSpec, ConditionalBlock, HeaderFooter, SheetSpec, SuffixItem};
use crate::xml::{escape, push_attr};

/// A cell value ready for XML emission.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutValue {
    /// No value; the cell is emitted only when it carries a style.
    Blank,
    Text(String),
    Number(f64),
    Bool(bool),
    Formula(String),
}

/// Buffers row XML and flushes every `window_rows` rows.
pub(crate) struct RowSink<'w> {
    out: &'w mut dyn Write,
    buf: String,
    window_rows: usize,
    rows_in_window: usize,
}

impl<'w> RowSink<'w> {
    pub(crate) fn new(out: &'w mut dyn Write, window_rows: usize) -> Self {
        Self {
            out,
            buf: String::with_capacity(16 * 1024),
            window_rows: window_rows.max(1),
            rows_in_window: 0,
        }
    }

    pub(crate) fn push(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    /// Mark a row boundary; flush when the window fills.
    pub(crate) fn end_row(&mut self) -> Result<()> {
        self.rows_in_window += 1;
        if self.rows_in_window >= self.window_rows {
            self.flush()?;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.out.write_all(self.buf.as_bytes())?;
            self.buf.clear();
        }
        self.rows_in_window = 0;
        Ok(())
    }
}

const DEFAULT_WORKSHEET_ATTRS: &str = concat!(
    r#" xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main""#,
    r#" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#
);

/// Emit everything up to and including the `<sheetData>` open tag.
pub(crate) fn write_prolog(
    sink: &mut RowSink,
    sheet: &SheetSpec,
    dimension: &Area,
    cols: &[ColSpec],
    preserve_layout: bool,
) -> Result<()> {
    let mut head = String::with_capacity(512);
    head.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    head.push('\n');
    head.push_str("<worksheet");
    if sheet.worksheet_attrs.is_empty() {
        head.push_str(DEFAULT_WORKSHEET_ATTRS);
    } else {
        for (key, value) in &sheet.worksheet_attrs {
            push_attr(&mut head, key, value);
        }
    }
    head.push('>');

    head.push_str(&format!(
        r#"<dimension ref="A1:{}{}"/>"#,
        col_to_letter(dimension.end.col),
        dimension.end.row + 1
    ));

    for fragment in &sheet.prefix_xml {
        head.push_str(fragment);
    }

    if preserve_layout && !cols.is_empty() {
        head.push_str("<cols>");
        for col in cols {
            head.push_str("<col");
            push_attr(&mut head, "min", &(col.min + 1).to_string());
            push_attr(&mut head, "max", &(col.max + 1).to_string());
            for (key, value) in &col.attrs {
                push_attr(&mut head, key, value);
            }
            head.push_str("/>");
        }
        head.push_str("</cols>");
    }

    head.push_str("<sheetData>");
    sink.push(&head);
    Ok(())
}

/// Open a `<row>` element for a 0-based output row.
pub(crate) fn write_row_open(
    sink: &mut RowSink,
    out_row: u32,
    attrs: &[(String, String)],
    preserve_layout: bool,
) {
    let mut row = String::with_capacity(64);
    row.push_str("<row");
    push_attr(&mut row, "r", &(out_row + 1).to_string());
    for (key, value) in attrs {
        if !preserve_layout && (key == "ht" || key == "customHeight") {
            continue;
        }
        push_attr(&mut row, key, value);
    }
    row.push('>');
    sink.push(&row);
}

pub(crate) fn write_row_close(sink: &mut RowSink) -> Result<()> {
    sink.push("</row>");
    sink.end_row()
}

/// Emit one `<c>` element; blank cells without a style are omitted entirely.
pub(crate) fn write_cell(
    sink: &mut RowSink,
    out_row: u32,
    out_col: u32,
    style: Option<u32>,
    value: &OutValue,
) {
    if matches!(value, OutValue::Blank) && style.is_none() {
        return;
    }

    let mut cell = String::with_capacity(48);
    cell.push_str("<c");
    push_attr(&mut cell, "r", &format_cell_ref(out_row, out_col));
    if let Some(s) = style {
        push_attr(&mut cell, "s", &s.to_string());
    }

    match value {
        OutValue::Blank => cell.push_str("/>"),
        OutValue::Text(text) => {
            cell.push_str(" t=\"inlineStr\"><is><t xml:space=\"preserve\">");
            cell.push_str(&escape(text));
            cell.push_str("</t></is></c>");
        }
        OutValue::Number(n) => {
            cell.push('>');
            cell.push_str(&format!("<v>{n}</v>"));
            cell.push_str("</c>");
        }
        OutValue::Bool(b) => {
            cell.push_str(" t=\"b\"><v>");
            cell.push_str(if *b { "1" } else { "0" });
            cell.push_str("</v></c>");
        }
        OutValue::Formula(f) => {
            cell.push('>');
            cell.push_str("<f>");
            cell.push_str(&escape(f));
            cell.push_str("</f></c>");
        }
    }

    sink.push(&cell);
}

/// Emit everything after `</sheetData>`: regenerated layout elements in their
/// schema slots, passthrough fragments verbatim, and the sheet's drawing
/// reference when one was created for inserted images.
pub(crate) fn write_suffix(
    sink: &mut RowSink,
    sheet: &SheetSpec,
    merges: &[Area],
    conditional: &[ConditionalBlock],
    header_footer: Option<&HeaderFooter>,
    new_drawing_rid: Option<&str>,
) -> Result<()> {
    let mut tail = String::with_capacity(512);
    tail.push_str("</sheetData>");

    let mut drawing_written = false;
    for item in &sheet.suffix {
        match item {
            SuffixItem::Raw(fragment) => {
                // A created drawing slots in before the extension list.
                if !drawing_written && fragment.starts_with("<extLst") {
                    if let Some(rid) = new_drawing_rid {
                        tail.push_str(&format!(r#"<drawing r:id="{}"/>"#, escape(rid)));
                        drawing_written = true;
                    }
                }
                tail.push_str(fragment);
            }
            SuffixItem::Merges => write_merges(&mut tail, merges),
            SuffixItem::Conditional => write_conditional(&mut tail, conditional),
            SuffixItem::HeaderFooter => {
                if let Some(hf) = header_footer {
                    write_header_footer(&mut tail, hf);
                }
            }
        }
    }

    if !drawing_written {
        if let Some(rid) = new_drawing_rid {
            tail.push_str(&format!(r#"<drawing r:id="{}"/>"#, escape(rid)));
        }
    }

    tail.push_str("</worksheet>");
    sink.push(&tail);
    sink.flush()
}

fn write_merges(out: &mut String, merges: &[Area]) {
    if merges.is_empty() {
        return;
    }
    out.push_str(&format!("<mergeCells count=\"{}\">", merges.len()));
    for merge in merges {
        out.push_str(&format!("<mergeCell ref=\"{}\"/>", format_area(merge)));
    }
    out.push_str("</mergeCells>");
}

fn write_conditional(out: &mut String, blocks: &[ConditionalBlock]) {
    for block in blocks {
        let sqref = block
            .areas
            .iter()
            .map(format_area)
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("<conditionalFormatting sqref=\"{}\">", escape(&sqref)));
        out.push_str(&block.rules_xml);
        out.push_str("</conditionalFormatting>");
    }
}

fn write_header_footer(out: &mut String, hf: &HeaderFooter) {
    out.push_str("<headerFooter");
    for (key, value) in &hf.attrs {
        push_attr(out, key, value);
    }
    out.push('>');
    let mut field = |tag: &str, value: &Option<String>| {
        if let Some(text) = value {
            out.push_str(&format!("<{tag}>{}</{tag}>", escape(text)));
        }
    };
    field("oddHeader", &hf.odd_header);
    field("oddFooter", &hf.odd_footer);
    field("evenHeader", &hf.even_header);
    field("evenFooter", &hf.even_footer);
    field("firstHeader", &hf.first_header);
    field("firstFooter", &hf.first_footer);
    out.push_str("</headerFooter>");
}
