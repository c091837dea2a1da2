//! `${var}` substitution inside raw XML parts.
//!
//! Chart titles, shape text, text boxes, and SmartArt cannot be edited
//! through the sheet model with equivalent fidelity, so their parts are
//! rewritten textually at the package level. Substituted values are
//! XML-escaped; everything else in the part passes through byte-identical.

use crate::config::MissingData;
use crate::error::{EngineError, Result};
use crate::marker::substitute_tokens;
use crate::package::{self, PackagePatch};
use crate::provider::DataProvider;
use crate::xml::escape;

/// Whether a package part is a substitution target.
fn is_target(name: &str) -> bool {
    (name.starts_with("xl/charts/") || name.starts_with("xl/drawings/"))
        && name.ends_with(".xml")
}

/// Substitute `${name}` occurrences in every targeted part of the rendered
/// package.
pub(crate) fn replace_variables(
    rendered: &[u8],
    provider: &dyn DataProvider,
    behavior: MissingData,
) -> Result<Vec<u8>> {
    let mut archive = package::open(rendered)?;
    let names = package::entry_names(&mut archive);

    let mut patch = PackagePatch::new();
    for name in names.into_iter().filter(|n| is_target(n)) {
        let Some(xml) = package::try_read_part_string(&mut archive, &name) else {
            continue;
        };
        if !xml.contains("${") {
            continue;
        }

        let (replaced, missing) = substitute_tokens(&xml, |var| {
            resolve(provider, var).map(|text| escape(&text))
        });

        if let Some(var) = missing.first() {
            match behavior {
                MissingData::Warn => {
                    log::warn!("part {name}: no data for `{var}`; token kept");
                }
                MissingData::Throw => {
                    return Err(EngineError::MissingTemplateData {
                        name: var.clone(),
                        sheet: None,
                        cell: None,
                    });
                }
            }
        }

        if replaced != xml {
            patch.replace_string(name, replaced);
        }
    }

    package::apply(rendered, patch)
}

/// Resolve a possibly dotted name against the provider's scalars.
fn resolve(provider: &dyn DataProvider, name: &str) -> Option<String> {
    let mut parts = name.split('.');
    let root = parts.next()?;
    let mut value = provider.value(root)?;
    for segment in parts {
        value = value.get(segment)?;
    }
    Some(value.display_text())
}
