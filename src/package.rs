//! OOXML package access: reading parts, patching the ZIP container,
//! relationship and content-type bookkeeping.
//!
//! Unmodified entries are copied via `raw_copy_file` (zero recompression
//! cost); only parts the engine regenerates are written fresh. Replacement
//! payloads may be byte buffers or streaming closures that write rows
//! directly into the entry.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Seek, Write};

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{EngineError, Result};
use crate::xml::{attr_string, escape};

/// Open a workbook package from bytes.
pub(crate) fn open(data: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    Ok(ZipArchive::new(Cursor::new(data))?)
}

/// Read a part as a UTF-8 string.
pub(crate) fn read_part_string<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String> {
    let mut file = archive.by_name(name)?;
    let mut out = String::with_capacity(usize::try_from(file.size()).unwrap_or(0));
    file.read_to_string(&mut out)?;
    Ok(out)
}

/// Read a part as a string when it exists.
pub(crate) fn try_read_part_string<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut out = String::new();
    file.read_to_string(&mut out).ok()?;
    Some(out)
}

/// Read a part as raw bytes when it exists.
pub(crate) fn try_read_part_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Option<Vec<u8>> {
    let mut file = archive.by_name(name).ok()?;
    let mut out = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
    file.read_to_end(&mut out).ok()?;
    Some(out)
}

/// Names of every entry in the package.
pub(crate) fn entry_names<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Vec<String> {
    (0..archive.len())
        .filter_map(|i| archive.by_index_raw(i).ok().map(|e| e.name().to_string()))
        .collect()
}

/// A replacement payload for one package entry.
pub(crate) enum PartPayload<'a> {
    Bytes(Vec<u8>),
    /// Streamed directly into the entry; rows never accumulate in memory.
    Stream(Box<dyn FnOnce(&mut dyn Write) -> Result<()> + 'a>),
}

/// A set of edits applied to the package in one pass.
#[derive(Default)]
pub(crate) struct PackagePatch<'a> {
    replacements: BTreeMap<String, PartPayload<'a>>,
    additions: BTreeMap<String, Vec<u8>>,
    drops: BTreeSet<String>,
}

impl<'a> PackagePatch<'a> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn replace_bytes(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.replacements
            .insert(name.into(), PartPayload::Bytes(bytes));
    }

    pub(crate) fn replace_string(&mut self, name: impl Into<String>, text: String) {
        self.replace_bytes(name, text.into_bytes());
    }

    pub(crate) fn replace_stream(
        &mut self,
        name: impl Into<String>,
        writer: Box<dyn FnOnce(&mut dyn Write) -> Result<()> + 'a>,
    ) {
        self.replacements
            .insert(name.into(), PartPayload::Stream(writer));
    }

    /// Add a brand-new entry (drawings, media, ...).
    pub(crate) fn add(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.additions.insert(name.into(), bytes);
    }

    pub(crate) fn drop_part(&mut self, name: impl Into<String>) {
        self.drops.insert(name.into());
    }

    /// A queued byte replacement as text, so later edits in the same patch
    /// build on earlier ones instead of the template's copy.
    pub(crate) fn replacement_text(&self, name: &str) -> Option<String> {
        match self.replacements.get(name)? {
            PartPayload::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
            PartPayload::Stream(_) => None,
        }
    }
}

/// Apply a patch to the template package, producing the output bytes.
///
/// Untouched entries pass through with `raw_copy_file`.
pub(crate) fn apply(template: &[u8], patch: PackagePatch) -> Result<Vec<u8>> {
    let mut archive = open(template)?;
    let PackagePatch {
        mut replacements,
        additions,
        drops,
    } = patch;

    let buf: Vec<u8> = Vec::with_capacity(template.len());
    let mut writer = ZipWriter::new(Cursor::new(buf));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let name = {
            let entry = archive.by_index_raw(i)?;
            entry.name().to_string()
        };

        if drops.contains(name.as_str()) {
            continue;
        }

        if let Some(payload) = replacements.remove(name.as_str()) {
            writer.start_file(&name, options)?;
            match payload {
                PartPayload::Bytes(bytes) => writer.write_all(&bytes)?,
                PartPayload::Stream(f) => f(&mut writer)?,
            }
            continue;
        }

        let entry = archive.by_index_raw(i)?;
        writer.raw_copy_file(entry)?;
    }

    // Replacements targeting entries the template never had become additions.
    for (name, payload) in replacements {
        writer.start_file(&name, options)?;
        match payload {
            PartPayload::Bytes(bytes) => writer.write_all(&bytes)?,
            PartPayload::Stream(f) => f(&mut writer)?,
        }
    }

    for (name, bytes) in additions {
        writer.start_file(&name, options)?;
        writer.write_all(&bytes)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

/// One `<Relationship>` entry of a `.rels` part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
}

/// Parse a `.rels` part into its relationship list.
pub(crate) fn parse_relationships(xml: &str) -> Vec<Relationship> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut rels = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Empty(ref e) | Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let id = attr_string(e, b"Id").unwrap_or_default();
                    let rel_type = attr_string(e, b"Type").unwrap_or_default();
                    let target = attr_string(e, b"Target").unwrap_or_default();
                    if !id.is_empty() && !target.is_empty() {
                        rels.push(Relationship {
                            id,
                            rel_type,
                            target,
                        });
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    rels
}

/// Serialize a relationship list back into a `.rels` part.
pub(crate) fn write_relationships(rels: &[Relationship]) -> String {
    let mut out = String::with_capacity(256 + rels.len() * 128);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push_str(
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for rel in rels {
        out.push_str(&format!(
            r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
            escape(&rel.id),
            escape(&rel.rel_type),
            escape(&rel.target)
        ));
    }
    out.push_str("</Relationships>");
    out
}

/// The `.rels` part path for a package part.
pub(crate) fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against the directory of its source part.
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(stripped) = target.strip_prefix('/') {
        return stripped.to_string();
    }
    let base_dir = source_part.rsplit_once('/').map_or("", |(dir, _)| dir);
    let mut segments: Vec<&str> = if base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').collect()
    };
    for piece in target.split('/') {
        match piece {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// The next unused `rId` number in a relationship list.
pub(crate) fn next_rid(rels: &[Relationship]) -> String {
    let max = rels
        .iter()
        .filter_map(|r| r.id.strip_prefix("rId").and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0);
    format!("rId{}", max + 1)
}

// ---------------------------------------------------------------------------
// [Content_Types].xml
// ---------------------------------------------------------------------------

/// Parsed `[Content_Types].xml`: extension defaults and part overrides.
#[derive(Debug, Clone, Default)]
pub(crate) struct ContentTypes {
    pub defaults: Vec<(String, String)>,
    pub overrides: Vec<(String, String)>,
}

impl ContentTypes {
    pub(crate) fn parse(xml: &str) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut types = Self::default();

        loop {
            match reader.read_event() {
                Ok(Event::Empty(ref e) | Event::Start(ref e)) => match e.local_name().as_ref() {
                    b"Default" => {
                        if let (Some(ext), Some(ct)) = (
                            attr_string(e, b"Extension"),
                            attr_string(e, b"ContentType"),
                        ) {
                            types.defaults.push((ext, ct));
                        }
                    }
                    b"Override" => {
                        if let (Some(part), Some(ct)) =
                            (attr_string(e, b"PartName"), attr_string(e, b"ContentType"))
                        {
                            types.overrides.push((part, ct));
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) | Err(_) => break,
                _ => {}
            }
        }

        types
    }

    /// Register an extension default unless one already exists.
    pub(crate) fn ensure_default(&mut self, extension: &str, content_type: &str) {
        if !self
            .defaults
            .iter()
            .any(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        {
            self.defaults
                .push((extension.to_string(), content_type.to_string()));
        }
    }

    /// Register a part override unless one already exists.
    pub(crate) fn ensure_override(&mut self, part_name: &str, content_type: &str) {
        if !self.overrides.iter().any(|(part, _)| part == part_name) {
            self.overrides
                .push((part_name.to_string(), content_type.to_string()));
        }
    }

    pub(crate) fn remove_override(&mut self, part_name: &str) {
        self.overrides.retain(|(part, _)| part != part_name);
    }

    pub(crate) fn to_xml(&self) -> String {
        let mut out = String::with_capacity(512);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        out.push_str(
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        );
        for (ext, ct) in &self.defaults {
            out.push_str(&format!(
                r#"<Default Extension="{}" ContentType="{}"/>"#,
                escape(ext),
                escape(ct)
            ));
        }
        for (part, ct) in &self.overrides {
            out.push_str(&format!(
                r#"<Override PartName="{}" ContentType="{}"/>"#,
                escape(part),
                escape(ct)
            ));
        }
        out.push_str("</Types>");
        out
    }
}

// ---------------------------------------------------------------------------
// Workbook-level hygiene for rendered output
// ---------------------------------------------------------------------------

/// Queue the edits that invalidate the template's calculation chain: the
/// chain indexes template coordinates that expansion moved, and a stale one
/// makes spreadsheet applications repair the file. Also flags the workbook
/// for a full recalculation on load.
pub(crate) fn invalidate_calc_chain(template: &[u8], patch: &mut PackagePatch) -> Result<()> {
    let mut archive = open(template)?;
    let names = entry_names(&mut archive);

    if names.iter().any(|n| n == "xl/calcChain.xml") {
        patch.drop_part("xl/calcChain.xml");

        if let Some(ct_xml) = try_read_part_string(&mut archive, "[Content_Types].xml") {
            let mut types = ContentTypes::parse(&ct_xml);
            types.remove_override("/xl/calcChain.xml");
            patch.replace_string("[Content_Types].xml", types.to_xml());
        }

        if let Some(rels_xml) = try_read_part_string(&mut archive, "xl/_rels/workbook.xml.rels") {
            let mut rels = parse_relationships(&rels_xml);
            rels.retain(|r| !r.target.contains("calcChain"));
            patch.replace_string("xl/_rels/workbook.xml.rels", write_relationships(&rels));
        }
    }

    let workbook_xml = read_part_string(&mut archive, "xl/workbook.xml")?;
    patch.replace_string("xl/workbook.xml", set_full_calc_on_load(&workbook_xml));
    Ok(())
}

/// Set `fullCalcOnLoad="1"` on `<calcPr>`, inserting the element when absent.
fn set_full_calc_on_load(workbook_xml: &str) -> String {
    if let Some(pos) = workbook_xml.find("<calcPr") {
        let tail = &workbook_xml[pos..];
        if let Some(end) = tail.find("/>") {
            let element = &tail[..end];
            if element.contains("fullCalcOnLoad") {
                return workbook_xml.to_string();
            }
            let mut out = String::with_capacity(workbook_xml.len() + 24);
            out.push_str(&workbook_xml[..pos + end]);
            out.push_str(r#" fullCalcOnLoad="1""#);
            out.push_str(&workbook_xml[pos + end..]);
            return out;
        }
    }
    if let Some(pos) = workbook_xml.rfind("</workbook>") {
        let mut out = String::with_capacity(workbook_xml.len() + 40);
        out.push_str(&workbook_xml[..pos]);
        out.push_str(r#"<calcPr fullCalcOnLoad="1"/>"#);
        out.push_str(&workbook_xml[pos..]);
        return out;
    }
    workbook_xml.to_string()
}

/// Fail with a package error carrying context.
pub(crate) fn package_err(context: impl Into<String>) -> EngineError {
    EngineError::Package(context.into())
}
