//! Marker grammar and parser.
//!
//! Recognized surface forms, textual and formula:
//!
//! - `${title}` / `${emp.dept.name}` — whole-cell simple substitution
//! - `${repeat(employees, A2:C2, emp, DOWN)}` — repeat declaration
//! - `${image(logo, B2, fit)}` — image declaration
//! - `${size(employees)}` — collection cardinality
//! - `TBEG_REPEAT(...)` / `TBEG_IMAGE(...)` / `TBEG_SIZE(...)` — formula
//!   forms, optionally prefixed with `=`
//! - formulas containing bare `${var}` tokens
//!
//! Parameters are positional or named (`var=emp`) but never mixed within one
//! marker; quoting accepts `"`, `'`, or backtick; a value of `NULL`
//! (case-insensitive) means omitted, as does an empty positional slot.
//!
//! The parser never fails for "no marker found" — plain text comes back as
//! [`CellContent::StaticString`]. Grammar violations surface as structured
//! errors carrying the offending literal.

use crate::area::CellPos;
use crate::cell_ref::{is_identifier, parse_cell_ref, parse_sheet_area};
use crate::error::{EngineError, Result};
use crate::types::{CellContent, Direction, ImageMarker, RangeRef, RepeatMarker, SizeSpec};

/// Parse the text content of a cell into a [`CellContent`].
pub fn parse_text_cell(text: &str) -> Result<CellContent> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(CellContent::Empty);
    }

    let Some(inner) = whole_cell_token(trimmed) else {
        // Not a single `${...}` token; mixed text stays static.
        return Ok(CellContent::StaticString(text.to_string()));
    };

    if let Some((name, args)) = marker_call(inner) {
        return parse_marker(name, args, trimmed);
    }

    Ok(parse_substitution(inner, trimmed))
}

/// Parse the formula text of a cell into a [`CellContent`].
pub fn parse_formula_cell(formula: &str) -> Result<CellContent> {
    let trimmed = formula.trim();
    let body = trimmed.strip_prefix('=').unwrap_or(trimmed).trim();

    if let Some(rest) = strip_prefix_ci(body, "TBEG_") {
        if let Some((name, args)) = marker_call_named(rest) {
            return parse_marker(name, args, trimmed);
        }
    }

    let names = scan_variable_names(formula);
    if names.is_empty() {
        Ok(CellContent::Formula(formula.to_string()))
    } else {
        Ok(CellContent::FormulaWithVariables {
            formula: formula.to_string(),
            names,
        })
    }
}

/// Collect the `${name}` / `${name.path}` tokens embedded in a string.
#[must_use]
pub fn scan_variable_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let name = after[..end].trim();
        if is_path(name) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[end + 1..];
    }
    names
}

/// Substitute every `${name}` token in `text` through `resolve`, leaving
/// unresolved tokens in place and reporting them.
pub fn substitute_tokens(
    text: &str,
    mut resolve: impl FnMut(&str) -> Option<String>,
) -> (String, Vec<String>) {
    let mut out = String::with_capacity(text.len());
    let mut missing = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = after[..end].trim();
        if let Some(replacement) = is_path(name).then(|| resolve(name)).flatten() {
            out.push_str(&replacement);
        } else {
            out.push_str(&rest[start..start + 2 + end + 1]);
            if is_path(name) {
                missing.push(name.to_string());
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    (out, missing)
}

/// Return the inner text when the trimmed cell is exactly one `${...}` token.
fn whole_cell_token(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("${")?.strip_suffix('}')?;
    // A second `${` means the cell holds more than one token.
    if inner.contains("${") || inner.contains('}') {
        return None;
    }
    Some(inner.trim())
}

/// Split `name(args)` into the lowercase marker name and raw argument text.
fn marker_call(inner: &str) -> Option<(MarkerName, &str)> {
    let open = inner.find('(')?;
    let name = inner[..open].trim();
    let rest = inner[open + 1..].trim_end();
    let args = rest.strip_suffix(')')?;
    MarkerName::from_str(name).map(|n| (n, args))
}

/// The formula form: `REPEAT(args)` after the `TBEG_` prefix was stripped.
fn marker_call_named(rest: &str) -> Option<(MarkerName, &str)> {
    let open = rest.find('(')?;
    let name = rest[..open].trim();
    let tail = rest[open + 1..].trim_end();
    let args = tail.strip_suffix(')')?;
    MarkerName::from_str(name).map(|n| (n, args))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MarkerName {
    Repeat,
    Image,
    Size,
}

impl MarkerName {
    fn from_str(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("repeat") {
            Some(Self::Repeat)
        } else if s.eq_ignore_ascii_case("image") {
            Some(Self::Image)
        } else if s.eq_ignore_ascii_case("size") {
            Some(Self::Size)
        } else {
            None
        }
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// `${var}` or `${item.path.segments}`.
fn parse_substitution(inner: &str, original: &str) -> CellContent {
    if !is_path(inner) {
        return CellContent::StaticString(original.to_string());
    }
    let segments: Vec<&str> = inner.split('.').collect();
    if segments.len() == 1 {
        CellContent::Variable {
            name: inner.to_string(),
            original: original.to_string(),
        }
    } else {
        CellContent::ItemField {
            item: segments[0].to_string(),
            path: segments[1..].iter().map(|s| (*s).to_string()).collect(),
            original: original.to_string(),
        }
    }
}

fn is_path(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

struct RawArg {
    name: Option<String>,
    /// `None` means explicitly omitted (empty slot or `NULL`).
    value: Option<String>,
}

/// Split marker arguments on top-level commas, honoring `"`, `'`, and
/// backtick quoting.
fn split_args(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in text.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' | '`' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ',' => {
                    parts.push(current.clone());
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }
    parts.push(current);
    parts
}

/// Strip one layer of matching quotes and map `NULL` to omitted.
fn normalize_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let unquoted = if trimmed.len() >= 2 {
        let first = trimmed.chars().next();
        let last = trimmed.chars().last();
        match (first, last) {
            (Some(q1), Some(q2)) if q1 == q2 && matches!(q1, '"' | '\'' | '`') => {
                &trimmed[1..trimmed.len() - 1]
            }
            _ => trimmed,
        }
    } else {
        trimmed
    };
    if unquoted.eq_ignore_ascii_case("null") {
        return None;
    }
    Some(unquoted.to_string())
}

fn parse_raw_args(text: &str, literal: &str) -> Result<Vec<RawArg>> {
    let mut args = Vec::new();
    for part in split_args(text) {
        let trimmed = part.trim();
        // Named form: `key=value` with an identifier key. An `=` inside a
        // quoted value does not make the argument named.
        let quoted = trimmed
            .chars()
            .next()
            .is_some_and(|c| matches!(c, '"' | '\'' | '`'));
        let named = (!quoted)
            .then(|| trimmed.split_once('='))
            .flatten()
            .filter(|(key, _)| is_identifier(key.trim()));
        if let Some((key, value)) = named {
            args.push(RawArg {
                name: Some(key.trim().to_string()),
                value: normalize_value(value),
            });
        } else {
            args.push(RawArg {
                name: None,
                value: normalize_value(trimmed),
            });
        }
    }

    let has_named = args.iter().any(|a| a.name.is_some());
    let has_positional = args.iter().any(|a| a.name.is_none() && a.value.is_some());
    if has_named && has_positional {
        return Err(EngineError::MarkerValidation {
            literal: literal.to_string(),
            rule: "positional and named parameters must not be mixed".to_string(),
        });
    }

    Ok(args)
}

/// Bind raw arguments to the marker's ordered parameter slots.
///
/// `slots` lists each parameter's accepted names, first name being canonical;
/// positional arguments bind in slot order.
fn bind_args(
    args: Vec<RawArg>,
    slots: &[&[&str]],
    literal: &str,
) -> Result<Vec<Option<String>>> {
    let mut bound: Vec<Option<String>> = vec![None; slots.len()];

    let named = args.iter().any(|a| a.name.is_some());
    if named {
        for arg in args {
            let Some(name) = arg.name else { continue };
            let Some(slot) = slots
                .iter()
                .position(|aliases| aliases.iter().any(|a| a.eq_ignore_ascii_case(&name)))
            else {
                return Err(EngineError::MarkerValidation {
                    literal: literal.to_string(),
                    rule: format!("unknown parameter `{name}`"),
                });
            };
            bound[slot] = arg.value;
        }
    } else {
        if args.iter().filter(|a| a.value.is_some()).count() > slots.len()
            || args.len() > slots.len()
        {
            return Err(EngineError::MarkerValidation {
                literal: literal.to_string(),
                rule: format!("at most {} parameters accepted", slots.len()),
            });
        }
        for (slot, arg) in args.into_iter().enumerate() {
            if let Some(target) = bound.get_mut(slot) {
                *target = arg.value;
            }
        }
    }

    Ok(bound)
}

fn parse_marker(name: MarkerName, args: &str, literal: &str) -> Result<CellContent> {
    let raw = parse_raw_args(args, literal)?;
    match name {
        MarkerName::Repeat => parse_repeat(raw, literal),
        MarkerName::Image => parse_image(raw, literal),
        MarkerName::Size => parse_size(raw, literal),
    }
}

fn require(
    value: Option<String>,
    parameter: &'static str,
    literal: &str,
) -> Result<String> {
    value.ok_or_else(|| EngineError::MissingRequiredParameter {
        parameter,
        literal: literal.to_string(),
    })
}

fn parse_range_ref(text: &str) -> Result<RangeRef> {
    if let Some((sheet, area)) = parse_sheet_area(text) {
        return Ok(RangeRef::Cells { sheet, area });
    }
    if is_identifier(text) {
        return Ok(RangeRef::Named(text.to_string()));
    }
    Err(EngineError::InvalidRangeFormat(text.to_string()))
}

fn parse_repeat(args: Vec<RawArg>, literal: &str) -> Result<CellContent> {
    const SLOTS: &[&[&str]] = &[
        &["collection"],
        &["range"],
        &["var", "variable"],
        &["direction"],
        &["empty", "emptyRange"],
    ];
    let mut bound = bind_args(args, SLOTS, literal)?.into_iter();
    let collection = require(bound.next().flatten(), "collection", literal)?;
    let range_text = require(bound.next().flatten(), "range", literal)?;
    let var = require(bound.next().flatten(), "var", literal)?;
    let direction_text = bound.next().flatten();
    let empty_text = bound.next().flatten();

    if !is_identifier(&collection) {
        return Err(EngineError::InvalidRepeatSyntax {
            literal: literal.to_string(),
            reason: format!("collection name `{collection}` is not an identifier"),
        });
    }
    if !is_identifier(&var) {
        return Err(EngineError::InvalidRepeatSyntax {
            literal: literal.to_string(),
            reason: format!("item variable `{var}` is not an identifier"),
        });
    }

    let range = parse_range_ref(&range_text)?;

    let direction = match direction_text.as_deref() {
        None => Direction::Down,
        Some(d) if d.eq_ignore_ascii_case("DOWN") => Direction::Down,
        Some(d) if d.eq_ignore_ascii_case("RIGHT") => Direction::Right,
        Some(other) => {
            return Err(EngineError::InvalidRepeatSyntax {
                literal: literal.to_string(),
                reason: format!("direction must be DOWN or RIGHT, got `{other}`"),
            })
        }
    };

    let empty_range = empty_text.as_deref().map(parse_range_ref).transpose()?;

    Ok(CellContent::Repeat(RepeatMarker {
        collection,
        range,
        var,
        direction,
        empty_range,
    }))
}

fn parse_image(args: Vec<RawArg>, literal: &str) -> Result<CellContent> {
    const SLOTS: &[&[&str]] = &[&["name"], &["position"], &["size"]];
    let mut bound = bind_args(args, SLOTS, literal)?.into_iter();
    let name = require(bound.next().flatten(), "name", literal)?;
    let position_text = bound.next().flatten();
    let size_text = bound.next().flatten();

    if !is_identifier(&name) {
        return Err(EngineError::InvalidParameterValue {
            literal: literal.to_string(),
            reason: format!("image name `{name}` is not an identifier"),
        });
    }

    let position = match position_text {
        None => None,
        Some(text) => {
            let Some((col, row)) = parse_cell_ref(&text) else {
                return Err(EngineError::InvalidParameterValue {
                    literal: literal.to_string(),
                    reason: format!("position `{text}` is not a cell reference"),
                });
            };
            Some(CellPos::new(row, col))
        }
    };

    let size = match size_text.as_deref() {
        None => SizeSpec::FitToCell,
        Some(text) => parse_size_spec(text, literal)?,
    };

    Ok(CellContent::Image(ImageMarker {
        name,
        position,
        size,
    }))
}

/// `fit` | `original` | `W:H` (non-negative integers; `-1:-1` ≡ original,
/// `0:0` ≡ fit).
fn parse_size_spec(text: &str, literal: &str) -> Result<SizeSpec> {
    if text.eq_ignore_ascii_case("fit") {
        return Ok(SizeSpec::FitToCell);
    }
    if text.eq_ignore_ascii_case("original") {
        return Ok(SizeSpec::Original);
    }
    if let Some((w, h)) = text.split_once(':') {
        let (w, h) = (w.trim(), h.trim());
        if w == "-1" && h == "-1" {
            return Ok(SizeSpec::Original);
        }
        if let (Ok(width), Ok(height)) = (w.parse::<u32>(), h.parse::<u32>()) {
            if width == 0 && height == 0 {
                return Ok(SizeSpec::FitToCell);
            }
            return Ok(SizeSpec::Fixed { width, height });
        }
    }
    Err(EngineError::MarkerValidation {
        literal: literal.to_string(),
        rule: format!("size must be fit, original, or W:H, got `{text}`"),
    })
}

fn parse_size(args: Vec<RawArg>, literal: &str) -> Result<CellContent> {
    const SLOTS: &[&[&str]] = &[&["collection"]];
    let mut bound = bind_args(args, SLOTS, literal)?.into_iter();
    let collection = require(bound.next().flatten(), "collection", literal)?;
    if !is_identifier(&collection) {
        return Err(EngineError::InvalidParameterValue {
            literal: literal.to_string(),
            reason: format!("collection name `{collection}` is not an identifier"),
        });
    }
    Ok(CellContent::Size { collection })
}
