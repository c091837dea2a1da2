//! Document metadata emission (docProps/core.xml and docProps/app.xml).
//!
//! Empty metadata is a no-op: both parts pass through byte-identical.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::Result;
use crate::xml::escape;

/// Document-level properties written into the output package on request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub company: Option<String>,
    pub manager: Option<String>,
    pub created: Option<chrono::NaiveDateTime>,
}

impl DocumentMetadata {
    /// Whether there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether any core-properties field is set.
    #[must_use]
    pub(crate) fn has_core_fields(&self) -> bool {
        self.title.is_some()
            || self.author.is_some()
            || self.subject.is_some()
            || !self.keywords.is_empty()
            || self.description.is_some()
            || self.category.is_some()
            || self.created.is_some()
    }

    /// Whether any extended-properties field is set.
    #[must_use]
    pub(crate) fn has_app_fields(&self) -> bool {
        self.company.is_some() || self.manager.is_some()
    }
}

/// Generate a complete `docProps/core.xml` for the given metadata.
pub(crate) fn write_core_properties(meta: &DocumentMetadata) -> String {
    let mut out = String::with_capacity(512);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push_str(
        r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:dcmitype="http://purl.org/dc/dcmitype/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
    );

    fn text_element(out: &mut String, tag: &str, value: &Option<String>) {
        if let Some(v) = value {
            out.push_str(&format!("<{tag}>{}</{tag}>", escape(v)));
        }
    }
    text_element(&mut out, "dc:title", &meta.title);
    text_element(&mut out, "dc:subject", &meta.subject);
    text_element(&mut out, "dc:creator", &meta.author);
    if !meta.keywords.is_empty() {
        out.push_str(&format!(
            "<cp:keywords>{}</cp:keywords>",
            escape(&meta.keywords.join(", "))
        ));
    }
    text_element(&mut out, "dc:description", &meta.description);
    text_element(&mut out, "cp:category", &meta.category);
    if let Some(created) = &meta.created {
        out.push_str(&format!(
            r#"<dcterms:created xsi:type="dcterms:W3CDTF">{}</dcterms:created>"#,
            created.format("%Y-%m-%dT%H:%M:%SZ")
        ));
    }
    out.push_str("</cp:coreProperties>");
    out
}

/// Patch `docProps/app.xml`, replacing (or appending) the Company and Manager
/// elements while leaving every other element untouched.
pub(crate) fn patch_app_properties(app_xml: &str, meta: &DocumentMetadata) -> Result<String> {
    let mut reader = Reader::from_str(app_xml);
    reader.trim_text(false);

    let mut out = String::with_capacity(app_xml.len() + 128);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);

    let mut skip_depth = 0usize;
    let mut wrote_company = false;
    let mut wrote_manager = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Decl(_) => {}
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if skip_depth > 0 {
                    skip_depth += 1;
                    continue;
                }
                match name.as_str() {
                    "Company" if meta.company.is_some() => {
                        if let Some(v) = &meta.company {
                            out.push_str(&format!("<Company>{}</Company>", escape(v)));
                        }
                        wrote_company = true;
                        skip_depth = 1;
                    }
                    "Manager" if meta.manager.is_some() => {
                        if let Some(v) = &meta.manager {
                            out.push_str(&format!("<Manager>{}</Manager>", escape(v)));
                        }
                        wrote_manager = true;
                        skip_depth = 1;
                    }
                    _ => {
                        out.push('<');
                        out.push_str(&name);
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref());
                            let value = String::from_utf8_lossy(&attr.value);
                            out.push_str(&format!(" {key}=\"{value}\""));
                        }
                        out.push('>');
                    }
                }
            }
            Event::Empty(e) => {
                if skip_depth > 0 {
                    continue;
                }
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                out.push('<');
                out.push_str(&name);
                for attr in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref());
                    let value = String::from_utf8_lossy(&attr.value);
                    out.push_str(&format!(" {key}=\"{value}\""));
                }
                out.push_str("/>");
            }
            Event::End(e) => {
                if skip_depth > 0 {
                    skip_depth -= 1;
                    continue;
                }
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "Properties" {
                    // Append any properties the template did not already carry.
                    if !wrote_company {
                        if let Some(v) = &meta.company {
                            out.push_str(&format!("<Company>{}</Company>", escape(v)));
                        }
                    }
                    if !wrote_manager {
                        if let Some(v) = &meta.manager {
                            out.push_str(&format!("<Manager>{}</Manager>", escape(v)));
                        }
                    }
                }
                out.push_str(&format!("</{name}>"));
            }
            Event::Text(t) => {
                if skip_depth > 0 {
                    continue;
                }
                out.push_str(&String::from_utf8_lossy(t.as_ref()));
            }
            _ => {}
        }
    }

    Ok(out)
}
