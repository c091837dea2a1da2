//! Shared assertions: re-parse a rendered workbook package and inspect its
//! cells, merges, conditional formatting, and raw parts.
#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

/// One parsed output cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutCell {
    pub text: Option<String>,
    pub number: Option<f64>,
    pub formula: Option<String>,
    pub style: Option<u32>,
}

/// One parsed output sheet.
#[derive(Debug, Clone, Default)]
pub struct OutSheet {
    pub name: String,
    pub cells: BTreeMap<(u32, u32), OutCell>,
    pub merges: Vec<String>,
    pub conditional: Vec<(String, String)>,
    pub raw_xml: String,
    pub max_row: u32,
}

/// A parsed output workbook.
#[derive(Debug, Clone, Default)]
pub struct OutBook {
    pub sheets: Vec<OutSheet>,
    pub entries: Vec<String>,
}

impl OutBook {
    pub fn sheet(&self, name: &str) -> &OutSheet {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no sheet named {name:?}"))
    }
}

impl OutSheet {
    pub fn cell(&self, cell_ref: &str) -> &OutCell {
        let (row, col) = parse_ref(cell_ref);
        self.cells
            .get(&(row, col))
            .unwrap_or_else(|| panic!("no cell at {cell_ref} in sheet {:?}", self.name))
    }

    pub fn text(&self, cell_ref: &str) -> &str {
        self.cell(cell_ref).text.as_deref().unwrap_or_default()
    }

    pub fn number(&self, cell_ref: &str) -> f64 {
        self.cell(cell_ref)
            .number
            .unwrap_or_else(|| panic!("no number at {cell_ref}"))
    }

    pub fn formula(&self, cell_ref: &str) -> &str {
        self.cell(cell_ref).formula.as_deref().unwrap_or_default()
    }

    pub fn has_cell(&self, cell_ref: &str) -> bool {
        let (row, col) = parse_ref(cell_ref);
        self.cells.contains_key(&(row, col))
    }
}

pub fn parse_ref(cell_ref: &str) -> (u32, u32) {
    let mut col = 0u32;
    let mut row = 0u32;
    for ch in cell_ref.chars() {
        if ch == '$' {
            continue;
        }
        if ch.is_ascii_alphabetic() {
            col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        } else if ch.is_ascii_digit() {
            row = row * 10 + (ch as u32 - '0' as u32);
        }
    }
    (row - 1, col - 1)
}

/// Read a raw part from the package.
pub fn read_part(bytes: &[u8], name: &str) -> Option<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    let mut file = archive.by_name(name).ok()?;
    let mut out = String::new();
    file.read_to_string(&mut out).ok()?;
    Some(out)
}

pub fn entry_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("not a zip");
    (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .collect()
}

/// Parse a rendered workbook for assertions.
pub fn parse_workbook(bytes: &[u8]) -> OutBook {
    let entries = entry_names(bytes);
    let workbook_xml = read_part(bytes, "xl/workbook.xml").expect("workbook.xml");
    let rels_xml = read_part(bytes, "xl/_rels/workbook.xml.rels").unwrap_or_default();

    let rels = parse_rels(&rels_xml);
    let mut sheets = Vec::new();

    let mut reader = Reader::from_str(&workbook_xml);
    reader.trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Empty(ref e) | Event::Start(ref e))
                if e.local_name().as_ref() == b"sheet" =>
            {
                let mut name = String::new();
                let mut rid = String::new();
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"name" => name = String::from_utf8_lossy(&attr.value).to_string(),
                        key if key.ends_with(b":id") || key == b"id" => {
                            rid = String::from_utf8_lossy(&attr.value).to_string();
                        }
                        _ => {}
                    }
                }
                let path = rels
                    .get(&rid)
                    .cloned()
                    .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", sheets.len() + 1));
                if let Some(xml) = read_part(bytes, &path) {
                    sheets.push(parse_sheet(&name, &xml));
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    OutBook { sheets, entries }
}

fn parse_rels(xml: &str) -> BTreeMap<String, String> {
    let mut rels = BTreeMap::new();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Empty(ref e) | Event::Start(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = String::new();
                let mut target = String::new();
                let mut rel_type = String::new();
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = String::from_utf8_lossy(&attr.value).to_string(),
                        b"Target" => target = String::from_utf8_lossy(&attr.value).to_string(),
                        b"Type" => rel_type = String::from_utf8_lossy(&attr.value).to_string(),
                        _ => {}
                    }
                }
                if rel_type.contains("worksheet") {
                    let path = target
                        .strip_prefix('/')
                        .map_or_else(|| format!("xl/{target}"), str::to_string);
                    rels.insert(id, path);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    rels
}

fn cell_attrs(e: &quick_xml::events::BytesStart) -> (Option<(u32, u32)>, Option<u32>) {
    let mut pos = None;
    let mut style = None;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"r" => {
                let r = String::from_utf8_lossy(&attr.value).to_string();
                pos = Some(parse_ref(&r));
            }
            b"s" => style = String::from_utf8_lossy(&attr.value).parse::<u32>().ok(),
            _ => {}
        }
    }
    (pos, style)
}

fn parse_sheet(name: &str, xml: &str) -> OutSheet {
    let mut sheet = OutSheet {
        name: name.to_string(),
        raw_xml: xml.to_string(),
        ..Default::default()
    };

    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut current: Option<(u32, u32)> = None;
    let mut cell = OutCell::default();
    let mut capture: Option<u8> = None; // b'v' | b'f' | b't'
    let mut text_buf = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"c" => {
                    let (pos, style) = cell_attrs(e);
                    if let Some(pos) = pos {
                        sheet.max_row = sheet.max_row.max(pos.0 + 1);
                        sheet.cells.insert(
                            pos,
                            OutCell {
                                style,
                                ..Default::default()
                            },
                        );
                    }
                }
                b"mergeCell" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"ref" {
                            sheet
                                .merges
                                .push(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"c" => {
                    let (pos, style) = cell_attrs(e);
                    current = pos;
                    cell = OutCell {
                        style,
                        ..Default::default()
                    };
                }
                b"v" => {
                    capture = Some(b'v');
                    text_buf.clear();
                }
                b"f" => {
                    capture = Some(b'f');
                    text_buf.clear();
                }
                b"t" => {
                    capture = Some(b't');
                    text_buf.clear();
                }
                _ => {}
            },
            Ok(Event::Text(ref t)) => {
                if capture.is_some() {
                    text_buf.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"v" => {
                    cell.number = text_buf.trim().parse::<f64>().ok();
                    if cell.number.is_none() && !text_buf.is_empty() {
                        cell.text = Some(text_buf.clone());
                    }
                    capture = None;
                }
                b"f" => {
                    cell.formula = Some(text_buf.clone());
                    capture = None;
                }
                b"t" => {
                    cell.text = Some(text_buf.clone());
                    capture = None;
                }
                b"c" => {
                    if let Some(pos) = current.take() {
                        sheet.max_row = sheet.max_row.max(pos.0 + 1);
                        sheet.cells.insert(pos, cell.clone());
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    sheet.conditional = extract_conditional(xml);
    sheet
}

/// Pull `<conditionalFormatting>` blocks out of a sheet as `(sqref, inner)`.
fn extract_conditional(xml: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<conditionalFormatting") {
        let tail = &rest[start..];
        let Some(open_end) = tail.find('>') else { break };
        let open_tag = &tail[..open_end];
        let sqref = open_tag
            .split("sqref=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap_or_default()
            .to_string();
        let Some(close) = tail.find("</conditionalFormatting>") else {
            break;
        };
        let inner = tail[open_end + 1..close].to_string();
        blocks.push((sqref, inner));
        rest = &tail[close + "</conditionalFormatting>".len()..];
    }
    blocks
}
