//! Test fixtures for generating template XLSX files in memory.
//!
//! Builders assemble a minimal but valid workbook package with known cells,
//! styles, merges, conditional formatting, headers/footers, and optional
//! chart/pivot parts, so integration tests can exercise the engine against
//! controlled inputs.
#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]

use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::ZipWriter;

// ============================================================================
// Cell fixtures
// ============================================================================

/// One template cell: its A1 reference, value, and optional style index.
#[derive(Debug, Clone)]
pub struct CellFixture {
    pub cell_ref: String,
    pub kind: CellKind,
    pub style: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum CellKind {
    Text(String),
    Number(f64),
    Formula(String),
    SharedString(usize),
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// Sheet builder
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SheetBuilder {
    pub name: String,
    cells: Vec<CellFixture>,
    merges: Vec<String>,
    conditional: Vec<(String, String)>,
    header_footer: Option<String>,
    cols_xml: Option<String>,
    row_heights: Vec<(u32, f64)>,
    extra_suffix: Vec<String>,
}

impl SheetBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Add a text cell (markers included).
    pub fn cell(mut self, cell_ref: &str, value: impl Into<CellKind>, style: Option<u32>) -> Self {
        self.cells.push(CellFixture {
            cell_ref: cell_ref.to_string(),
            kind: value.into(),
            style,
        });
        self
    }

    pub fn formula(mut self, cell_ref: &str, formula: &str, style: Option<u32>) -> Self {
        self.cells.push(CellFixture {
            cell_ref: cell_ref.to_string(),
            kind: CellKind::Formula(formula.to_string()),
            style,
        });
        self
    }

    pub fn merge(mut self, range: &str) -> Self {
        self.merges.push(range.to_string());
        self
    }

    /// Add a conditional formatting block with raw rule XML.
    pub fn conditional(mut self, sqref: &str, rules_xml: &str) -> Self {
        self.conditional
            .push((sqref.to_string(), rules_xml.to_string()));
        self
    }

    pub fn header_footer(mut self, xml: &str) -> Self {
        self.header_footer = Some(xml.to_string());
        self
    }

    pub fn cols(mut self, cols_xml: &str) -> Self {
        self.cols_xml = Some(cols_xml.to_string());
        self
    }

    pub fn row_height(mut self, row_1based: u32, height: f64) -> Self {
        self.row_heights.push((row_1based, height));
        self
    }

    /// Append a raw element after `</sheetData>` (dataValidations etc.).
    pub fn suffix_xml(mut self, xml: &str) -> Self {
        self.extra_suffix.push(xml.to_string());
        self
    }

    fn parse_ref(cell_ref: &str) -> (u32, u32) {
        let mut col = 0u32;
        let mut row = 0u32;
        for ch in cell_ref.chars() {
            if ch.is_ascii_alphabetic() {
                col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
            } else if ch.is_ascii_digit() {
                row = row * 10 + (ch as u32 - '0' as u32);
            }
        }
        (row - 1, col - 1)
    }

    fn to_xml(&self) -> String {
        // Group cells by row.
        let mut rows: Vec<(u32, Vec<&CellFixture>)> = Vec::new();
        let mut sorted = self.cells.clone();
        sorted.sort_by_key(|c| Self::parse_ref(&c.cell_ref));
        for cell in &sorted {
            let (row, _) = Self::parse_ref(&cell.cell_ref);
            match rows.last_mut() {
                Some((last, cells)) if *last == row => cells.push(cell),
                _ => rows.push((row, vec![cell])),
            }
        }

        let mut out = String::new();
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        out.push('\n');
        out.push_str(concat!(
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
            r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#
        ));

        if let Some(cols) = &self.cols_xml {
            out.push_str(cols);
        }

        out.push_str("<sheetData>");
        for (row, cells) in &rows {
            out.push_str(&format!("<row r=\"{}\"", row + 1));
            if let Some((_, h)) = self.row_heights.iter().find(|(r, _)| *r == row + 1) {
                out.push_str(&format!(" ht=\"{h}\" customHeight=\"1\""));
            }
            out.push('>');
            for cell in cells {
                let style = cell
                    .style
                    .map(|s| format!(" s=\"{s}\""))
                    .unwrap_or_default();
                match &cell.kind {
                    CellKind::Text(text) => out.push_str(&format!(
                        r#"<c r="{}"{} t="inlineStr"><is><t>{}</t></is></c>"#,
                        cell.cell_ref,
                        style,
                        xml_escape(text)
                    )),
                    CellKind::Number(n) => out.push_str(&format!(
                        r#"<c r="{}"{}><v>{n}</v></c>"#,
                        cell.cell_ref, style
                    )),
                    CellKind::Formula(f) => out.push_str(&format!(
                        r#"<c r="{}"{}><f>{}</f></c>"#,
                        cell.cell_ref,
                        style,
                        xml_escape(f)
                    )),
                    CellKind::SharedString(idx) => out.push_str(&format!(
                        r#"<c r="{}"{} t="s"><v>{idx}</v></c>"#,
                        cell.cell_ref, style
                    )),
                }
            }
            out.push_str("</row>");
        }
        out.push_str("</sheetData>");

        if !self.merges.is_empty() {
            out.push_str(&format!("<mergeCells count=\"{}\">", self.merges.len()));
            for merge in &self.merges {
                out.push_str(&format!("<mergeCell ref=\"{merge}\"/>"));
            }
            out.push_str("</mergeCells>");
        }

        for (sqref, rules) in &self.conditional {
            out.push_str(&format!("<conditionalFormatting sqref=\"{sqref}\">{rules}</conditionalFormatting>"));
        }

        for fragment in &self.extra_suffix {
            out.push_str(fragment);
        }

        if let Some(hf) = &self.header_footer {
            out.push_str(hf);
        }

        out.push_str("</worksheet>");
        out
    }
}

impl From<&str> for CellKind {
    fn from(s: &str) -> Self {
        CellKind::Text(s.to_string())
    }
}

impl From<String> for CellKind {
    fn from(s: String) -> Self {
        CellKind::Text(s)
    }
}

impl From<f64> for CellKind {
    fn from(n: f64) -> Self {
        CellKind::Number(n)
    }
}

// ============================================================================
// Workbook builder
// ============================================================================

/// Extra raw parts attached to the package (charts, pivots, ...).
#[derive(Debug, Clone)]
pub struct RawPart {
    pub path: String,
    pub content: Vec<u8>,
}

#[derive(Default)]
pub struct TemplateBuilder {
    sheets: Vec<SheetBuilder>,
    shared_strings: Vec<String>,
    defined_names: Vec<(String, String)>,
    raw_parts: Vec<RawPart>,
    extra_content_types: Vec<String>,
    sheet_rels: Vec<(usize, String)>,
    with_calc_chain: bool,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, sheet: SheetBuilder) -> Self {
        self.sheets.push(sheet);
        self
    }

    pub fn shared_strings(mut self, strings: Vec<&str>) -> Self {
        self.shared_strings = strings.into_iter().map(str::to_string).collect();
        self
    }

    pub fn defined_name(mut self, name: &str, reference: &str) -> Self {
        self.defined_names
            .push((name.to_string(), reference.to_string()));
        self
    }

    /// Attach a raw package part verbatim.
    pub fn raw_part(mut self, path: &str, content: &str) -> Self {
        self.raw_parts.push(RawPart {
            path: path.to_string(),
            content: content.as_bytes().to_vec(),
        });
        self
    }

    /// Add an `<Override>` entry to `[Content_Types].xml`.
    pub fn content_type_override(mut self, part_name: &str, content_type: &str) -> Self {
        self.extra_content_types.push(format!(
            r#"<Override PartName="{part_name}" ContentType="{content_type}"/>"#
        ));
        self
    }

    /// Add a relationship to the Nth sheet's `.rels` part (raw XML).
    pub fn sheet_rel(mut self, sheet_index: usize, rel_xml: &str) -> Self {
        self.sheet_rels.push((sheet_index, rel_xml.to_string()));
        self
    }

    /// Include a (stale) calcChain part the way spreadsheet applications
    /// leave behind.
    pub fn with_calc_chain(mut self) -> Self {
        self.with_calc_chain = true;
        self
    }

    /// Attach a minimal one-pivot setup: table + cache definition + records,
    /// sourced from `source_sheet_ref` on sheet 1.
    pub fn with_simple_pivot(self, source_ref: &str, source_sheet: &str) -> Self {
        let table = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<pivotTableDefinition xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
                r#"name="Pivot1" cacheId="1" rowHeaderCaption="Department" dataCaption="Values">"#,
                r#"<location ref="E3:F8" firstHeaderRow="1" firstDataRow="1" firstDataCol="1"/>"#,
                r#"<pivotFields count="2">"#,
                r#"<pivotField axis="axisRow" showAll="0"><items count="2"><item x="0"/><item t="default"/></items></pivotField>"#,
                r#"<pivotField dataField="1" showAll="0"/>"#,
                r#"</pivotFields>"#,
                r#"<rowFields count="1"><field x="0"/></rowFields>"#,
                r#"<dataFields count="1"><dataField name="Sum of salary" fld="1" baseField="0" baseItem="0"/></dataFields>"#,
                r#"</pivotTableDefinition>"#
            ),
        );
        let cache_def = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<pivotCacheDefinition xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
                r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" r:id="rId1" refreshOnLoad="1" recordCount="2">"#,
                r#"<cacheSource type="worksheet"><worksheetSource ref="{source_ref}" sheet="{source_sheet}"/></cacheSource>"#,
                r#"<cacheFields count="2">"#,
                r#"<cacheField name="dept" numFmtId="0"><sharedItems count="1"><s v="Sales"/></sharedItems></cacheField>"#,
                r#"<cacheField name="salary" numFmtId="0"><sharedItems containsNumber="1"/></cacheField>"#,
                r#"</cacheFields></pivotCacheDefinition>"#
            ),
            source_ref = source_ref,
            source_sheet = source_sheet,
        );
        let records = concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<pivotCacheRecords xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="2">"#,
            r#"<r><x v="0"/><n v="1"/></r>"#,
            r#"</pivotCacheRecords>"#
        );

        self.raw_part("xl/pivotTables/pivotTable1.xml", &table)
            .raw_part("xl/pivotCache/pivotCacheDefinition1.xml", &cache_def)
            .raw_part("xl/pivotCache/pivotCacheRecords1.xml", records)
            .raw_part(
                "xl/pivotTables/_rels/pivotTable1.xml.rels",
                concat!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
                    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheDefinition" Target="../pivotCache/pivotCacheDefinition1.xml"/>"#,
                    r#"</Relationships>"#
                ),
            )
            .raw_part(
                "xl/pivotCache/_rels/pivotCacheDefinition1.xml.rels",
                concat!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
                    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheRecords" Target="pivotCacheRecords1.xml"/>"#,
                    r#"</Relationships>"#
                ),
            )
            .sheet_rel(
                0,
                r#"<Relationship Id="rId77" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotTable" Target="../pivotTables/pivotTable1.xml"/>"#,
            )
            .content_type_override(
                "/xl/pivotTables/pivotTable1.xml",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.pivotTable+xml",
            )
            .content_type_override(
                "/xl/pivotCache/pivotCacheDefinition1.xml",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.pivotCacheDefinition+xml",
            )
            .content_type_override(
                "/xl/pivotCache/pivotCacheRecords1.xml",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.pivotCacheRecords+xml",
            )
    }

    /// Attach a minimal chart part with one series over `values_ref`.
    pub fn with_simple_chart(self, title: &str, values_ref: &str) -> Self {
        let chart = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<c:chartSpace xmlns:c="http://schemas.openxmlformats.org/drawingml/2006/chart" "#,
                r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">"#,
                r#"<c:chart><c:title><c:tx><c:rich><a:p><a:r><a:t>{title}</a:t></a:r></a:p></c:rich></c:tx></c:title>"#,
                r#"<c:plotArea><c:barChart><c:ser><c:idx val="0"/><c:order val="0"/>"#,
                r#"<c:val><c:numRef><c:f>{values_ref}</c:f></c:numRef></c:val>"#,
                r#"</c:ser></c:barChart></c:plotArea></c:chart></c:chartSpace>"#
            ),
            title = xml_escape(title),
            values_ref = values_ref,
        );
        self.raw_part("xl/charts/chart1.xml", &chart)
            .content_type_override(
                "/xl/charts/chart1.xml",
                "application/vnd.openxmlformats-officedocument.drawingml.chart+xml",
            )
    }

    pub fn build(self) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default();

        // [Content_Types].xml
        let mut content_types = String::new();
        content_types.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        content_types.push_str(
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        );
        content_types.push_str(r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#);
        content_types.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
        content_types.push_str(r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#);
        content_types.push_str(r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#);
        for (idx, _) in self.sheets.iter().enumerate() {
            content_types.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                idx + 1
            ));
        }
        if !self.shared_strings.is_empty() {
            content_types.push_str(r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#);
        }
        if self.with_calc_chain {
            content_types.push_str(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#);
        }
        content_types.push_str(r#"<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#);
        content_types.push_str(r#"<Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>"#);
        for entry in &self.extra_content_types {
            content_types.push_str(entry);
        }
        content_types.push_str("</Types>");
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(content_types.as_bytes()).unwrap();

        // Package relationships
        writer.start_file("_rels/.rels", options).unwrap();
        writer
            .write_all(
                concat!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
                    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#,
                    r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>"#,
                    r#"<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/>"#,
                    r#"</Relationships>"#
                )
                .as_bytes(),
            )
            .unwrap();

        // Workbook
        let mut workbook = String::new();
        workbook.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        workbook.push_str(concat!(
            r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
            r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#
        ));
        workbook.push_str("<sheets>");
        for (idx, sheet) in self.sheets.iter().enumerate() {
            workbook.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                xml_escape(&sheet.name),
                idx + 1,
                idx + 1
            ));
        }
        workbook.push_str("</sheets>");
        if !self.defined_names.is_empty() {
            workbook.push_str("<definedNames>");
            for (name, reference) in &self.defined_names {
                workbook.push_str(&format!(
                    r#"<definedName name="{}">{}</definedName>"#,
                    xml_escape(name),
                    xml_escape(reference)
                ));
            }
            workbook.push_str("</definedNames>");
        }
        workbook.push_str(r#"<calcPr calcId="191029"/></workbook>"#);
        writer.start_file("xl/workbook.xml", options).unwrap();
        writer.write_all(workbook.as_bytes()).unwrap();

        // Workbook relationships
        let mut wb_rels = String::new();
        wb_rels.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        wb_rels.push_str(
            r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for (idx, _) in self.sheets.iter().enumerate() {
            wb_rels.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                idx + 1,
                idx + 1
            ));
        }
        let mut next_rid = self.sheets.len() + 1;
        wb_rels.push_str(&format!(
            r#"<Relationship Id="rId{next_rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#
        ));
        next_rid += 1;
        if !self.shared_strings.is_empty() {
            wb_rels.push_str(&format!(
                r#"<Relationship Id="rId{next_rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#
            ));
            next_rid += 1;
        }
        if self.with_calc_chain {
            wb_rels.push_str(&format!(
                r#"<Relationship Id="rId{next_rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#
            ));
        }
        wb_rels.push_str("</Relationships>");
        writer.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
        writer.write_all(wb_rels.as_bytes()).unwrap();

        // Styles: xf 0 default, 1 bold, 2 currency-format, 3 centered.
        // Two dxfs back the conditional-formatting fixtures.
        let styles = concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
            r#"<fonts count="2"><font><sz val="11"/><name val="Calibri"/></font>"#,
            r#"<font><b/><sz val="11"/><name val="Calibri"/></font></fonts>"#,
            r#"<fills count="2"><fill><patternFill patternType="none"/></fill>"#,
            r#"<fill><patternFill patternType="gray125"/></fill></fills>"#,
            r#"<borders count="1"><border/></borders>"#,
            r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
            r#"<cellXfs count="4">"#,
            r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#,
            r#"<xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/>"#,
            r#"<xf numFmtId="44" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>"#,
            r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"/>"#,
            r#"</cellXfs>"#,
            r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
            r#"<dxfs count="2"><dxf><font><color rgb="FF9C0006"/></font></dxf>"#,
            r#"<dxf><fill><patternFill><bgColor rgb="FFC6EFCE"/></patternFill></fill></dxf></dxfs>"#,
            r#"</styleSheet>"#
        );
        writer.start_file("xl/styles.xml", options).unwrap();
        writer.write_all(styles.as_bytes()).unwrap();

        if !self.shared_strings.is_empty() {
            let mut sst = String::new();
            sst.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
            sst.push_str(&format!(
                r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">"#,
                self.shared_strings.len()
            ));
            for s in &self.shared_strings {
                sst.push_str(&format!("<si><t>{}</t></si>", xml_escape(s)));
            }
            sst.push_str("</sst>");
            writer.start_file("xl/sharedStrings.xml", options).unwrap();
            writer.write_all(sst.as_bytes()).unwrap();
        }

        if self.with_calc_chain {
            writer.start_file("xl/calcChain.xml", options).unwrap();
            writer
                .write_all(
                    concat!(
                        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                        r#"<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="B3" i="1"/></calcChain>"#
                    )
                    .as_bytes(),
                )
                .unwrap();
        }

        // Worksheets + their rels
        for (idx, sheet) in self.sheets.iter().enumerate() {
            writer
                .start_file(format!("xl/worksheets/sheet{}.xml", idx + 1), options)
                .unwrap();
            writer.write_all(sheet.to_xml().as_bytes()).unwrap();

            let rels: Vec<&String> = self
                .sheet_rels
                .iter()
                .filter(|(i, _)| *i == idx)
                .map(|(_, xml)| xml)
                .collect();
            if !rels.is_empty() {
                let mut rels_xml = String::new();
                rels_xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
                rels_xml.push_str(r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#);
                for rel in rels {
                    rels_xml.push_str(rel);
                }
                rels_xml.push_str("</Relationships>");
                writer
                    .start_file(
                        format!("xl/worksheets/_rels/sheet{}.xml.rels", idx + 1),
                        options,
                    )
                    .unwrap();
                writer.write_all(rels_xml.as_bytes()).unwrap();
            }
        }

        // docProps
        writer.start_file("docProps/core.xml", options).unwrap();
        writer
            .write_all(
                concat!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                    r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" "#,
                    r#"xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:creator>template author</dc:creator></cp:coreProperties>"#
                )
                .as_bytes(),
            )
            .unwrap();
        writer.start_file("docProps/app.xml", options).unwrap();
        writer
            .write_all(
                concat!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                    r#"<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties">"#,
                    r#"<Application>Excel</Application><Company>Template Co</Company></Properties>"#
                )
                .as_bytes(),
            )
            .unwrap();

        for part in &self.raw_parts {
            writer.start_file(&part.path, options).unwrap();
            writer.write_all(&part.content).unwrap();
        }

        writer.finish().unwrap().into_inner()
    }
}
