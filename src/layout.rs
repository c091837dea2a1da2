//! Layout re-projection: merged regions, conditional formatting ranges,
//! header/footer substitution, and column-width tables under the new sheet
//! geometry.
//!
//! Conditional formatting rule bodies are carried verbatim from the template,
//! so every emitted rule's `dxfId` equals the template's; only the `sqref`
//! ranges are recomputed.

use crate::area::Area;
use crate::marker::substitute_tokens;
use crate::position::PositionCalculator;
use crate::types::{ColSpec, ConditionalBlock, Direction, HeaderFooter};

/// Re-project merged regions.
///
/// A merge inside a repeat region is copied once per emitted unit, each copy
/// offset by the unit's row/column count; merges outside repeat areas
/// translate (and stretch around contained regions) through the calculator.
/// Copies never overlap because units tile the expanded area.
pub(crate) fn project_merges(merges: &[Area], calc: &PositionCalculator) -> Vec<Area> {
    let mut out = Vec::with_capacity(merges.len());
    for merge in merges {
        let containing = calc
            .expansions()
            .iter()
            .find(|e| e.area.contains_area(merge));
        match containing {
            Some(e) => {
                let base = Area::from_bounds(
                    merge.start.row + calc.row_offset(merge.start.row, merge.start.col),
                    merge.start.col + calc.col_offset(merge.start.row, merge.start.col),
                    merge.end.row + calc.row_offset(merge.start.row, merge.end.col),
                    merge.end.col + calc.col_offset(merge.end.row, merge.start.col),
                );
                for i in 0..e.effective_items {
                    let (dr, dc) = match e.direction {
                        Direction::Down => (i * e.unit_rows(), 0),
                        Direction::Right => (0, i * e.unit_cols()),
                    };
                    out.push(Area::from_bounds(
                        base.start.row + dr,
                        base.start.col + dc,
                        base.end.row + dr,
                        base.end.col + dc,
                    ));
                }
            }
            None => out.push(calc.project_area(merge)),
        }
    }
    out
}

/// Expand conditional-formatting ranges to cover emitted repeat rows; one
/// rule block covers the whole expanded range rather than one copy per unit.
pub(crate) fn project_conditional(
    blocks: &[ConditionalBlock],
    calc: &PositionCalculator,
) -> Vec<ConditionalBlock> {
    blocks
        .iter()
        .map(|block| ConditionalBlock {
            areas: block.areas.iter().map(|a| calc.project_area(a)).collect(),
            rules_xml: block.rules_xml.clone(),
        })
        .collect()
}

/// Substitute `${var}` tokens in each header/footer string independently.
///
/// Returns the substituted strings plus the names that could not be
/// resolved, for the caller's missing-data policy.
pub(crate) fn substitute_header_footer(
    hf: &HeaderFooter,
    mut resolve: impl FnMut(&str) -> Option<String>,
) -> (HeaderFooter, Vec<String>) {
    let mut missing = Vec::new();
    let mut apply = |text: &Option<String>| -> Option<String> {
        text.as_ref().map(|t| {
            let (out, mut misses) = substitute_tokens(t, &mut resolve);
            missing.append(&mut misses);
            out
        })
    };

    let substituted = HeaderFooter {
        attrs: hf.attrs.clone(),
        odd_header: apply(&hf.odd_header),
        odd_footer: apply(&hf.odd_footer),
        even_header: apply(&hf.even_header),
        even_footer: apply(&hf.even_footer),
        first_header: apply(&hf.first_header),
        first_footer: apply(&hf.first_footer),
    };
    (substituted, missing)
}

/// Total column shift to the right of every RIGHT region at or before `col`,
/// independent of rows (column widths are whole-column properties).
fn col_shift(calc: &PositionCalculator, col: u32) -> u32 {
    calc.expansions()
        .iter()
        .filter(|e| e.direction == Direction::Right && col > e.area.end.col)
        .map(|e| e.col_expansion)
        .sum()
}

/// Re-project the `<col>` width table: segments inside a RIGHT region repeat
/// once per emitted unit; segments past a region shift right.
pub(crate) fn project_cols(cols: &[ColSpec], calc: &PositionCalculator) -> Vec<ColSpec> {
    let right_regions: Vec<_> = calc
        .expansions()
        .iter()
        .filter(|e| e.direction == Direction::Right)
        .collect();

    let mut out = Vec::with_capacity(cols.len());
    for col in cols {
        for (seg_min, seg_max) in split_segments(col.min, col.max, &right_regions) {
            let region = right_regions
                .iter()
                .find(|e| seg_min >= e.area.start.col && seg_max <= e.area.end.col);
            match region {
                Some(e) => {
                    let base = seg_min + col_shift(calc, seg_min);
                    let width = seg_max - seg_min;
                    for i in 0..e.effective_items {
                        let offset = i * e.unit_cols();
                        out.push(ColSpec {
                            min: base + offset,
                            max: base + offset + width,
                            attrs: col.attrs.clone(),
                        });
                    }
                }
                None => {
                    let shift = col_shift(calc, seg_min);
                    out.push(ColSpec {
                        min: seg_min + shift,
                        max: seg_max + shift,
                        attrs: col.attrs.clone(),
                    });
                }
            }
        }
    }
    out
}

/// Split a column interval at RIGHT-region boundaries.
fn split_segments(
    min: u32,
    max: u32,
    regions: &[&crate::position::RepeatExpansion],
) -> Vec<(u32, u32)> {
    let mut breaks = vec![min, max + 1];
    for e in regions {
        for b in [e.area.start.col, e.area.end.col + 1] {
            if b > min && b <= max {
                breaks.push(b);
            }
        }
    }
    breaks.sort_unstable();
    breaks.dedup();

    breaks
        .windows(2)
        .map(|w| (w[0], w[1] - 1))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::area::CellPos;
    use crate::types::RepeatRegionSpec;
    use std::collections::BTreeMap;

    fn calc_with(regions: Vec<RepeatRegionSpec>, sizes: &[(&str, usize)]) -> PositionCalculator {
        let sizes: BTreeMap<String, usize> =
            sizes.iter().map(|(k, v)| ((*k).to_string(), *v)).collect();
        PositionCalculator::new(&regions, &sizes, 20, 20)
    }

    fn down_region(area: Area, name: &str) -> RepeatRegionSpec {
        RepeatRegionSpec {
            area,
            collection: name.to_string(),
            var: "it".to_string(),
            direction: Direction::Down,
            empty_range: None,
            marker_cell: CellPos::new(0, 0),
        }
    }

    fn right_region(area: Area, name: &str) -> RepeatRegionSpec {
        RepeatRegionSpec {
            direction: Direction::Right,
            ..down_region(area, name)
        }
    }

    #[test]
    fn merge_inside_down_region_copies_per_unit() {
        // Merge A2:B2 inside region A2:C2 with 3 items.
        let calc = calc_with(
            vec![down_region(Area::from_bounds(1, 0, 1, 2), "emp")],
            &[("emp", 3)],
        );
        let merges = project_merges(&[Area::from_bounds(1, 0, 1, 1)], &calc);
        assert_eq!(
            merges,
            vec![
                Area::from_bounds(1, 0, 1, 1),
                Area::from_bounds(2, 0, 2, 1),
                Area::from_bounds(3, 0, 3, 1),
            ]
        );
        // No two output merges overlap.
        for (i, a) in merges.iter().enumerate() {
            for b in merges.iter().skip(i + 1) {
                assert!(!a.overlaps(b));
            }
        }
    }

    #[test]
    fn merge_below_region_translates() {
        let calc = calc_with(
            vec![down_region(Area::from_bounds(1, 0, 1, 2), "emp")],
            &[("emp", 3)],
        );
        let merges = project_merges(&[Area::from_bounds(4, 0, 5, 2)], &calc);
        assert_eq!(merges, vec![Area::from_bounds(6, 0, 7, 2)]);
    }

    #[test]
    fn conditional_ranges_stretch_over_repeat() {
        let calc = calc_with(
            vec![down_region(Area::from_bounds(7, 0, 7, 2), "emp")],
            &[("emp", 3)],
        );
        let blocks = vec![ConditionalBlock {
            areas: vec![Area::from_bounds(7, 1, 7, 1)],
            rules_xml: r#"<cfRule type="cellIs" dxfId="2" priority="1" operator="greaterThanOrEqual"><formula>6000</formula></cfRule>"#.to_string(),
        }];
        let projected = project_conditional(&blocks, &calc);
        assert_eq!(projected[0].areas, vec![Area::from_bounds(7, 1, 9, 1)]);
        // Rule XML untouched: dxfId preserved verbatim.
        assert_eq!(projected[0].rules_xml, blocks[0].rules_xml);
    }

    #[test]
    fn header_footer_substitution_is_per_field() {
        let hf = HeaderFooter {
            odd_header: Some("&C${title}".to_string()),
            odd_footer: Some("&R${page_note}".to_string()),
            ..Default::default()
        };
        let (out, missing) = substitute_header_footer(&hf, |name| {
            (name == "title").then(|| "Q4".to_string())
        });
        assert_eq!(out.odd_header.as_deref(), Some("&CQ4"));
        assert_eq!(out.odd_footer.as_deref(), Some("&R${page_note}"));
        assert_eq!(missing, vec!["page_note".to_string()]);
    }

    #[test]
    fn cols_inside_right_region_repeat() {
        // Region B..C (cols 1..2), 3 items; one col spec covering B..C and
        // one covering D.
        let calc = calc_with(
            vec![right_region(Area::from_bounds(0, 1, 5, 2), "q")],
            &[("q", 3)],
        );
        let cols = vec![
            ColSpec {
                min: 1,
                max: 2,
                attrs: vec![("width".to_string(), "14".to_string())],
            },
            ColSpec {
                min: 3,
                max: 3,
                attrs: vec![("width".to_string(), "9".to_string())],
            },
        ];
        let projected = project_cols(&cols, &calc);
        let spans: Vec<(u32, u32)> = projected.iter().map(|c| (c.min, c.max)).collect();
        assert_eq!(spans, vec![(1, 2), (3, 4), (5, 6), (7, 7)]);
    }

    #[test]
    fn col_spanning_region_boundary_splits() {
        let calc = calc_with(
            vec![right_region(Area::from_bounds(0, 1, 5, 2), "q")],
            &[("q", 2)],
        );
        // One spec covering A..E: splits into A, B..C (repeated), D..E shifted.
        let cols = vec![ColSpec {
            min: 0,
            max: 4,
            attrs: Vec::new(),
        }];
        let projected = project_cols(&cols, &calc);
        let spans: Vec<(u32, u32)> = projected.iter().map(|c| (c.min, c.max)).collect();
        assert_eq!(spans, vec![(0, 0), (1, 2), (3, 4), (5, 6)]);
    }
}
