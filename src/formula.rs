//! Formula reference rewriting under repeat expansion.
//!
//! A minimal A1-aware tokenizer walks the formula text and rewrites cell
//! references in place; the formula is never evaluated or fully parsed.
//! String literals (`"..."`), quoted sheet prefixes (`'Sheet X'!A1`), and
//! absolute markers (`$`) are preserved exactly. Sheet-qualified references
//! point at a fixed sheet's geometry and pass through unchanged.

use crate::cell_ref::{col_to_letter, format_cell_ref};
use crate::types::Direction;

/// A single A1 reference inside a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RefToken {
    col_abs: bool,
    col: u32,
    row_abs: bool,
    row: u32,
}

impl RefToken {
    fn print(&self) -> String {
        let mut out = String::new();
        if self.col_abs {
            out.push('$');
        }
        out.push_str(&col_to_letter(self.col));
        if self.row_abs {
            out.push('$');
        }
        out.push_str(&(self.row + 1).to_string());
        out
    }
}

/// A reference piece found by the scanner: single ref or a `start:end` range.
#[derive(Debug, Clone, Copy)]
enum Piece {
    Single(RefToken),
    Range(RefToken, RefToken),
}

impl Piece {
    fn print(&self) -> String {
        match self {
            Piece::Single(r) => r.print(),
            Piece::Range(a, b) => format!("{}:{}", a.print(), b.print()),
        }
    }
}

/// Try to parse one A1 reference starting at `bytes[i]`.
///
/// Returns the token and the index just past it. Up to three column letters
/// and seven row digits; anything longer is an identifier, not a reference.
fn parse_ref_at(bytes: &[u8], mut i: usize) -> Option<(RefToken, usize)> {
    let len = bytes.len();
    let mut col_abs = false;
    if i < len && bytes[i] == b'$' {
        col_abs = true;
        i += 1;
    }

    let letters_start = i;
    while i < len && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letter_count = i - letters_start;
    if letter_count == 0 || letter_count > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for &b in &bytes[letters_start..i] {
        col = col * 26 + u32::from(b.to_ascii_uppercase() - b'A') + 1;
    }

    let mut row_abs = false;
    if i < len && bytes[i] == b'$' {
        row_abs = true;
        i += 1;
    }

    let digits_start = i;
    while i < len && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let digit_count = i - digits_start;
    if digit_count == 0 || digit_count > 7 {
        return None;
    }
    let mut row: u32 = 0;
    for &b in &bytes[digits_start..i] {
        row = row * 10 + u32::from(b - b'0');
    }
    if row == 0 {
        return None;
    }

    // A trailing identifier character or a call paren means this was a name,
    // not a reference (LOG10(...), Tax2024_x).
    if i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'(') {
        return None;
    }

    Some((
        RefToken {
            col_abs,
            col: col - 1,
            row_abs,
            row: row - 1,
        },
        i,
    ))
}

/// Try to parse a ref or a `ref:ref` range at `bytes[i]`.
fn parse_piece_at(bytes: &[u8], i: usize) -> Option<(Piece, usize)> {
    let (first, after) = parse_ref_at(bytes, i)?;
    if after < bytes.len() && bytes[after] == b':' {
        if let Some((second, end)) = parse_ref_at(bytes, after + 1) {
            return Some((Piece::Range(first, second), end));
        }
    }
    Some((Piece::Single(first), after))
}

/// Walk the formula, rewriting each unqualified reference piece through `f`.
fn rewrite_refs(formula: &str, mut f: impl FnMut(Piece) -> String) -> String {
    let bytes = formula.as_bytes();
    let len = bytes.len();
    let mut out = String::with_capacity(len + 16);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        // String literal: copy verbatim, including "" escapes.
        if b == b'"' {
            let start = i;
            i += 1;
            while i < len {
                if bytes[i] == b'"' {
                    if i + 1 < len && bytes[i + 1] == b'"' {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                i += 1;
            }
            out.push_str(&formula[start..i]);
            continue;
        }

        // Quoted sheet name: copy verbatim, including '' escapes; the
        // following `!ref` is sheet-qualified and also copied verbatim.
        if b == b'\'' {
            let start = i;
            i += 1;
            while i < len {
                if bytes[i] == b'\'' {
                    if i + 1 < len && bytes[i + 1] == b'\'' {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                i += 1;
            }
            out.push_str(&formula[start..i]);
            continue;
        }

        // After `!` the reference belongs to a named sheet; pass it through.
        if b == b'!' {
            out.push('!');
            i += 1;
            if let Some((piece, end)) = parse_piece_at(bytes, i) {
                out.push_str(&formula[i..end]);
                let _ = piece;
                i = end;
            }
            continue;
        }

        let ref_start_allowed = b == b'$' || b.is_ascii_alphabetic();
        let prev_blocks = i > 0 && {
            let p = bytes[i - 1];
            p.is_ascii_alphanumeric() || p == b'_' || p == b'.' || p == b'$'
        };
        if ref_start_allowed && !prev_blocks {
            if let Some((piece, end)) = parse_piece_at(bytes, i) {
                // An unquoted sheet prefix looks like `Name!A1`; if the next
                // char is `!`, this "ref" was a sheet name.
                if end < len && bytes[end] == b'!' {
                    out.push_str(&formula[i..end]);
                    i = end;
                    continue;
                }
                out.push_str(&f(piece));
                i = end;
                continue;
            }
        }

        // Skip over identifiers wholesale so their inner letters never match.
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
            {
                i += 1;
            }
            out.push_str(&formula[start..i]);
            continue;
        }

        out.push(b as char);
        i += 1;
    }

    out
}

/// Shift relative references past an expanded downward repeat.
///
/// References to rows strictly below `repeat_end_row` move down by
/// `row_offset`; range end points inside the repeat extend by the same
/// amount, so `SUM(B2:B2)` over an expanded `A2:C2` region becomes
/// `SUM(B2:B4)`. Absolute rows never move.
#[must_use]
pub fn adjust_for_row_expansion(
    formula: &str,
    repeat_start_row: u32,
    repeat_end_row: u32,
    row_offset: u32,
) -> String {
    if row_offset == 0 {
        return formula.to_string();
    }
    let shift_below = |r: &mut RefToken| {
        if !r.row_abs && r.row > repeat_end_row {
            r.row += row_offset;
        }
    };
    rewrite_refs(formula, |piece| match piece {
        Piece::Single(mut r) => {
            shift_below(&mut r);
            Piece::Single(r).print()
        }
        Piece::Range(mut a, mut b) => {
            shift_below(&mut a);
            shift_below(&mut b);
            if !b.row_abs && b.row >= repeat_start_row && b.row <= repeat_end_row {
                b.row += row_offset;
            }
            Piece::Range(a, b).print()
        }
    })
}

/// Shift relative references past an expanded rightward repeat; the column
/// analog of [`adjust_for_row_expansion`].
#[must_use]
pub fn adjust_for_column_expansion(
    formula: &str,
    repeat_start_col: u32,
    repeat_end_col: u32,
    col_offset: u32,
) -> String {
    if col_offset == 0 {
        return formula.to_string();
    }
    let shift_past = |r: &mut RefToken| {
        if !r.col_abs && r.col > repeat_end_col {
            r.col += col_offset;
        }
    };
    rewrite_refs(formula, |piece| match piece {
        Piece::Single(mut r) => {
            shift_past(&mut r);
            Piece::Single(r).print()
        }
        Piece::Range(mut a, mut b) => {
            shift_past(&mut a);
            shift_past(&mut b);
            if !b.col_abs && b.col >= repeat_start_col && b.col <= repeat_end_col {
                b.col += col_offset;
            }
            Piece::Range(a, b).print()
        }
    })
}

/// Shift relative references for the `item_index`-th copy of a repeat unit,
/// by `item_index * unit_size` rows (DOWN) or columns (RIGHT).
#[must_use]
pub fn adjust_for_repeat_index(
    formula: &str,
    direction: Direction,
    item_index: u32,
    unit_size: u32,
) -> String {
    let shift = item_index * unit_size;
    if shift == 0 {
        return formula.to_string();
    }
    let move_ref = |r: &mut RefToken| match direction {
        Direction::Down => {
            if !r.row_abs {
                r.row += shift;
            }
        }
        Direction::Right => {
            if !r.col_abs {
                r.col += shift;
            }
        }
    };
    rewrite_refs(formula, |piece| match piece {
        Piece::Single(mut r) => {
            move_ref(&mut r);
            Piece::Single(r).print()
        }
        Piece::Range(mut a, mut b) => {
            move_ref(&mut a);
            move_ref(&mut b);
            Piece::Range(a, b).print()
        }
    })
}

/// Rewrite single-cell references inside a repeat region to cover every
/// emitted copy.
///
/// A single-unit-wide template produces a contiguous range
/// (`B2` → `B2:B4`); a wider unit produces a comma list (`B7` → `B7,D7,F7`).
/// Returns the rewritten formula and whether every rewrite stayed contiguous,
/// so the caller can enforce the 255-argument function limit on lists.
#[must_use]
pub fn expand_single_ref(
    formula: &str,
    region_start: u32,
    region_end: u32,
    item_count: u32,
    unit_size: u32,
    direction: Direction,
) -> (String, bool) {
    let items = item_count.max(1);
    if items == 1 {
        return (formula.to_string(), true);
    }
    let mut contiguous = true;
    let out = rewrite_refs(formula, |piece| match piece {
        Piece::Single(r) => {
            let (axis, axis_abs) = match direction {
                Direction::Down => (r.row, r.row_abs),
                Direction::Right => (r.col, r.col_abs),
            };
            if axis_abs || axis < region_start || axis > region_end {
                return Piece::Single(r).print();
            }
            if unit_size == 1 {
                let mut end = r;
                match direction {
                    Direction::Down => end.row += items - 1,
                    Direction::Right => end.col += items - 1,
                }
                Piece::Range(r, end).print()
            } else {
                contiguous = false;
                let mut parts = Vec::with_capacity(items as usize);
                for i in 0..items {
                    let mut copy = r;
                    match direction {
                        Direction::Down => copy.row += i * unit_size,
                        Direction::Right => copy.col += i * unit_size,
                    }
                    parts.push(copy.print());
                }
                parts.join(",")
            }
        }
        range => range.print(),
    });
    (out, contiguous)
}

/// Shift a plain range text (e.g. a chart data source `Sheet1!$B$2:$B$4`)
/// by the given row/column deltas, preserving sheet prefix and absolute
/// markers. Used where a whole reference is re-projected rather than
/// conditionally adjusted.
#[must_use]
pub fn shift_range_text(text: &str, row_delta: i64, col_delta: i64) -> String {
    let (prefix, range_part) = match text.rfind('!') {
        Some(pos) => (&text[..=pos], &text[pos + 1..]),
        None => ("", text),
    };
    let shift = |r: RefToken| -> RefToken {
        let row = i64::from(r.row) + row_delta;
        let col = i64::from(r.col) + col_delta;
        RefToken {
            col_abs: r.col_abs,
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            col: col.max(0) as u32,
            row_abs: r.row_abs,
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            row: row.max(0) as u32,
        }
    };
    let bytes = range_part.as_bytes();
    let Some((piece, end)) = parse_piece_at(bytes, 0) else {
        return text.to_string();
    };
    if end != bytes.len() {
        return text.to_string();
    }
    let rewritten = match piece {
        Piece::Single(r) => Piece::Single(shift(r)).print(),
        Piece::Range(a, b) => Piece::Range(shift(a), shift(b)).print(),
    };
    format!("{prefix}{rewritten}")
}

/// Resize and shift a range text to a new inclusive extent, keeping sheet
/// prefix and absolute markers of the original end points.
#[must_use]
pub fn retarget_range_text(text: &str, area: &crate::area::Area) -> String {
    let (prefix, range_part) = match text.rfind('!') {
        Some(pos) => (&text[..=pos], &text[pos + 1..]),
        None => ("", text),
    };
    let bytes = range_part.as_bytes();
    let Some((piece, end)) = parse_piece_at(bytes, 0) else {
        return text.to_string();
    };
    if end != bytes.len() {
        return text.to_string();
    }
    let (a, b) = match piece {
        Piece::Single(r) => (r, r),
        Piece::Range(a, b) => (a, b),
    };
    let start = RefToken {
        col_abs: a.col_abs,
        col: area.start.col,
        row_abs: a.row_abs,
        row: area.start.row,
    };
    let stop = RefToken {
        col_abs: b.col_abs,
        col: area.end.col,
        row_abs: b.row_abs,
        row: area.end.row,
    };
    if area.start == area.end {
        format!("{prefix}{}", start.print())
    } else {
        format!("{prefix}{}", Piece::Range(start, stop).print())
    }
}
