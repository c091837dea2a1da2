//! Image insertion: detects payload formats by magic bytes, writes media
//! parts, and anchors pictures in sheet drawings at their computed positions.

use std::collections::BTreeMap;

use crate::area::CellPos;
use crate::config::MissingData;
use crate::error::{EngineError, Result};
use crate::package::{self, PackagePatch, Relationship};
use crate::position::PositionCalculator;
use crate::provider::DataProvider;
use crate::types::{CellContent, SizeSpec, WorkbookSpec};
use crate::xml::escape;

/// EMUs per pixel at 96 DPI.
const EMU_PER_PX: u64 = 9_525;

const REL_TYPE_IMAGE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const REL_TYPE_DRAWING: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";

/// Payload format detected from magic bytes. Unknown payloads default to PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
}

impl ImageFormat {
    pub(crate) fn detect(bytes: &[u8]) -> Self {
        match bytes {
            [0x89, b'P', b'N', b'G', ..] => Self::Png,
            [0xFF, 0xD8, 0xFF, ..] => Self::Jpeg,
            [b'G', b'I', b'F', b'8', ..] => Self::Gif,
            [b'B', b'M', ..] => Self::Bmp,
            _ => Self::Png,
        }
    }

    pub(crate) fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
        }
    }

    pub(crate) fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
        }
    }
}

/// Intrinsic pixel dimensions, when the header carries them.
pub(crate) fn image_dimensions(format: ImageFormat, bytes: &[u8]) -> Option<(u32, u32)> {
    match format {
        ImageFormat::Png => {
            // IHDR: width/height big-endian at offsets 16/20.
            let w = u32::from_be_bytes(bytes.get(16..20)?.try_into().ok()?);
            let h = u32::from_be_bytes(bytes.get(20..24)?.try_into().ok()?);
            Some((w, h))
        }
        ImageFormat::Jpeg => jpeg_dimensions(bytes),
        ImageFormat::Gif => {
            let w = u16::from_le_bytes(bytes.get(6..8)?.try_into().ok()?);
            let h = u16::from_le_bytes(bytes.get(8..10)?.try_into().ok()?);
            Some((u32::from(w), u32::from(h)))
        }
        ImageFormat::Bmp => {
            let w = i32::from_le_bytes(bytes.get(18..22)?.try_into().ok()?);
            let h = i32::from_le_bytes(bytes.get(22..26)?.try_into().ok()?);
            Some((w.unsigned_abs(), h.unsigned_abs()))
        }
    }
}

/// Walk JPEG segments for the first start-of-frame header.
fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2usize;
    while i + 9 < bytes.len() {
        if bytes[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = *bytes.get(i + 1)?;
        // SOF0..SOF15 minus the arithmetic-coding/huffman table markers.
        if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            let h = u16::from_be_bytes(bytes.get(i + 5..i + 7)?.try_into().ok()?);
            let w = u16::from_be_bytes(bytes.get(i + 7..i + 9)?.try_into().ok()?);
            return Some((u32::from(w), u32::from(h)));
        }
        let len = u16::from_be_bytes(bytes.get(i + 2..i + 4)?.try_into().ok()?);
        i += 2 + usize::from(len);
    }
    None
}

/// One image to place: the marker plus its final anchor cell.
#[derive(Debug, Clone)]
pub(crate) struct ImagePlacement {
    pub sheet_index: usize,
    pub anchor: CellPos,
    pub name: String,
    pub size: SizeSpec,
}

/// Scan the blueprint for image markers and compute their output anchors.
pub(crate) fn collect_placements(
    spec: &WorkbookSpec,
    calcs: &[PositionCalculator],
) -> Vec<ImagePlacement> {
    let mut placements = Vec::new();
    for (sheet_index, sheet) in spec.sheets.iter().enumerate() {
        let Some(calc) = calcs.get(sheet_index) else {
            continue;
        };
        for row in &sheet.rows {
            for cell in &row.cells {
                if let CellContent::Image(marker) = &cell.content {
                    let template_anchor = marker
                        .position
                        .unwrap_or(CellPos::new(row.template_row, cell.col));
                    placements.push(ImagePlacement {
                        sheet_index,
                        anchor: calc.final_pos(template_anchor),
                        name: marker.name.clone(),
                        size: marker.size,
                    });
                }
            }
        }
    }
    placements
}

/// Place every image-marker payload into the package.
///
/// Returns, per sheet, the relationship id of a freshly created drawing part
/// (the sheet writer emits the matching `<drawing r:id="..."/>` element);
/// sheets whose drawing already existed return `None` there.
pub(crate) fn insert_images(
    template: &[u8],
    spec: &WorkbookSpec,
    calcs: &[PositionCalculator],
    provider: &dyn DataProvider,
    behavior: MissingData,
    patch: &mut PackagePatch,
) -> Result<Vec<Option<String>>> {
    let placements = collect_placements(spec, calcs);
    let mut new_rids: Vec<Option<String>> = vec![None; spec.sheets.len()];
    if placements.is_empty() {
        return Ok(new_rids);
    }

    let mut archive = package::open(template)?;
    let entry_names = package::entry_names(&mut archive);
    let mut media_counter = next_part_number(&entry_names, "xl/media/image");
    let mut drawing_counter = next_part_number(&entry_names, "xl/drawings/drawing");

    // Build on any content-types rewrite already queued in this patch.
    let ct_xml = patch
        .replacement_text("[Content_Types].xml")
        .or_else(|| package::try_read_part_string(&mut archive, "[Content_Types].xml"))
        .ok_or_else(|| package::package_err("missing [Content_Types].xml"))?;
    let mut content_types = package::ContentTypes::parse(&ct_xml);
    let mut content_types_dirty = false;

    let mut by_sheet: BTreeMap<usize, Vec<&ImagePlacement>> = BTreeMap::new();
    for placement in &placements {
        by_sheet.entry(placement.sheet_index).or_default().push(placement);
    }

    for (sheet_index, sheet_placements) in by_sheet {
        let Some(sheet) = spec.sheets.get(sheet_index) else {
            continue;
        };

        // Resolve payloads first; missing images follow the missing-data policy.
        let mut resolved: Vec<(&ImagePlacement, Vec<u8>, ImageFormat)> = Vec::new();
        for placement in sheet_placements {
            match provider.image(&placement.name) {
                Some(bytes) => {
                    let format = ImageFormat::detect(&bytes);
                    resolved.push((placement, bytes, format));
                }
                None => match behavior {
                    MissingData::Warn => {
                        log::warn!("no image payload for `{}`; marker skipped", placement.name);
                    }
                    MissingData::Throw => {
                        return Err(EngineError::MissingTemplateData {
                            name: placement.name.clone(),
                            sheet: Some(sheet.name.clone()),
                            cell: None,
                        });
                    }
                },
            }
        }
        if resolved.is_empty() {
            continue;
        }

        // Locate or create the sheet's drawing part.
        let sheet_rels_path = package::rels_path_for(&sheet.part_path);
        let mut sheet_rels = package::try_read_part_string(&mut archive, &sheet_rels_path)
            .map(|xml| package::parse_relationships(&xml))
            .unwrap_or_default();

        let existing_drawing = sheet.drawing_rid.as_ref().and_then(|rid| {
            sheet_rels
                .iter()
                .find(|r| &r.id == rid)
                .map(|r| package::resolve_target(&sheet.part_path, &r.target))
        });

        let (drawing_path, mut drawing_xml, created) = match existing_drawing {
            Some(path) => {
                let xml = package::try_read_part_string(&mut archive, &path)
                    .ok_or_else(|| package::package_err(format!("missing drawing part {path}")))?;
                (path, xml, false)
            }
            None => {
                let path = format!("xl/drawings/drawing{drawing_counter}.xml");
                drawing_counter += 1;
                (path, empty_drawing_xml(), true)
            }
        };

        let drawing_rels_path = package::rels_path_for(&drawing_path);
        let mut drawing_rels = package::try_read_part_string(&mut archive, &drawing_rels_path)
            .map(|xml| package::parse_relationships(&xml))
            .unwrap_or_default();

        let mut anchors = String::new();
        let mut shape_id = 1 + drawing_xml.matches("cNvPr").count() as u32;
        for (placement, bytes, format) in resolved {
            let media_path = format!("xl/media/image{media_counter}.{}", format.extension());
            media_counter += 1;
            content_types.ensure_default(format.extension(), format.content_type());
            content_types_dirty = true;
            patch.add(media_path.clone(), bytes.clone());

            let rid = package::next_rid(&drawing_rels);
            drawing_rels.push(Relationship {
                id: rid.clone(),
                rel_type: REL_TYPE_IMAGE.to_string(),
                target: format!("../media/{}", media_path.rsplit('/').next().unwrap_or_default()),
            });

            shape_id += 1;
            anchors.push_str(&anchor_xml(placement, &bytes, format, &rid, shape_id));
        }

        let Some(close) = drawing_xml.rfind("</xdr:wsDr>") else {
            return Err(package::package_err(format!(
                "drawing part {drawing_path} has no wsDr root"
            )));
        };
        drawing_xml.insert_str(close, &anchors);

        patch.replace_string(drawing_path.clone(), drawing_xml);
        patch.replace_string(
            drawing_rels_path,
            package::write_relationships(&drawing_rels),
        );

        if created {
            content_types.ensure_override(
                &format!("/{drawing_path}"),
                "application/vnd.openxmlformats-officedocument.drawing+xml",
            );
            content_types_dirty = true;

            let rid = package::next_rid(&sheet_rels);
            sheet_rels.push(Relationship {
                id: rid.clone(),
                rel_type: REL_TYPE_DRAWING.to_string(),
                target: format!(
                    "../drawings/{}",
                    drawing_path.rsplit('/').next().unwrap_or_default()
                ),
            });
            patch.replace_string(sheet_rels_path, package::write_relationships(&sheet_rels));
            new_rids[sheet_index] = Some(rid);
        }
    }

    if content_types_dirty {
        patch.replace_string("[Content_Types].xml", content_types.to_xml());
    }

    Ok(new_rids)
}

fn next_part_number(entries: &[String], prefix: &str) -> u32 {
    entries
        .iter()
        .filter_map(|name| {
            let rest = name.strip_prefix(prefix)?;
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0)
        + 1
}

fn empty_drawing_xml() -> String {
    concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" "#,
        r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" "#,
        r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
        "</xdr:wsDr>"
    )
    .to_string()
}

fn anchor_xml(
    placement: &ImagePlacement,
    bytes: &[u8],
    format: ImageFormat,
    rid: &str,
    shape_id: u32,
) -> String {
    let pic = picture_xml(&placement.name, rid, shape_id, placement, bytes, format);
    match placement.size {
        SizeSpec::FitToCell => format!(
            concat!(
                r#"<xdr:twoCellAnchor editAs="oneCell">"#,
                "<xdr:from><xdr:col>{c}</xdr:col><xdr:colOff>0</xdr:colOff>",
                "<xdr:row>{r}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>",
                "<xdr:to><xdr:col>{c2}</xdr:col><xdr:colOff>0</xdr:colOff>",
                "<xdr:row>{r2}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to>",
                "{pic}<xdr:clientData/></xdr:twoCellAnchor>"
            ),
            c = placement.anchor.col,
            r = placement.anchor.row,
            c2 = placement.anchor.col + 1,
            r2 = placement.anchor.row + 1,
            pic = pic
        ),
        SizeSpec::Original | SizeSpec::Fixed { .. } => {
            let (cx, cy) = extent_emu(placement.size, bytes, format);
            format!(
                concat!(
                    "<xdr:oneCellAnchor>",
                    "<xdr:from><xdr:col>{c}</xdr:col><xdr:colOff>0</xdr:colOff>",
                    "<xdr:row>{r}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>",
                    r#"<xdr:ext cx="{cx}" cy="{cy}"/>"#,
                    "{pic}<xdr:clientData/></xdr:oneCellAnchor>"
                ),
                c = placement.anchor.col,
                r = placement.anchor.row,
                cx = cx,
                cy = cy,
                pic = pic
            )
        }
    }
}

fn extent_emu(size: SizeSpec, bytes: &[u8], format: ImageFormat) -> (u64, u64) {
    let (w, h) = match size {
        SizeSpec::Fixed { width, height } => (width, height),
        _ => image_dimensions(format, bytes).unwrap_or((96, 96)),
    };
    (u64::from(w) * EMU_PER_PX, u64::from(h) * EMU_PER_PX)
}

fn picture_xml(
    name: &str,
    rid: &str,
    shape_id: u32,
    placement: &ImagePlacement,
    bytes: &[u8],
    format: ImageFormat,
) -> String {
    let (cx, cy) = extent_emu(placement.size, bytes, format);
    format!(
        concat!(
            "<xdr:pic><xdr:nvPicPr>",
            r#"<xdr:cNvPr id="{id}" name="{name}"/>"#,
            r#"<xdr:cNvPicPr><a:picLocks noChangeAspect="1"/></xdr:cNvPicPr>"#,
            "</xdr:nvPicPr><xdr:blipFill>",
            r#"<a:blip r:embed="{rid}"/><a:stretch><a:fillRect/></a:stretch>"#,
            "</xdr:blipFill><xdr:spPr><a:xfrm>",
            r#"<a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/>"#,
            r#"</a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></xdr:spPr></xdr:pic>"#
        ),
        id = shape_id,
        name = escape(name),
        rid = rid,
        cx = cx,
        cy = cy
    )
}
