//! Position calculation: how repeat expansions propagate through 2D space.
//!
//! Given the repeat regions and the collection sizes, the calculator answers
//! where every template coordinate lands in the output, how many rows a sheet
//! produces, and which template row (and item index) any output row
//! originates from.

use std::collections::BTreeMap;

use crate::area::{Area, CellPos};
use crate::types::{Direction, RepeatRegionSpec};

/// One repeat region with its computed expansion.
#[derive(Debug, Clone)]
pub struct RepeatExpansion {
    /// Index into the sheet's region list.
    pub region_index: usize,
    pub area: Area,
    pub direction: Direction,
    pub collection: String,
    pub var: String,
    pub empty_range: Option<Area>,
    /// Raw collection size, as reported by the data provider.
    pub item_count: usize,
    /// `max(1, |C|)` — an empty collection still emits one blank unit.
    pub effective_items: u32,
    /// Region start shifted by earlier regions that dominate it.
    pub final_start: CellPos,
    /// Extra rows this region adds below itself (DOWN only).
    pub row_expansion: u32,
    /// Extra columns this region adds to its right (RIGHT only).
    pub col_expansion: u32,
}

impl RepeatExpansion {
    #[must_use]
    pub fn unit_rows(&self) -> u32 {
        self.area.row_count()
    }

    #[must_use]
    pub fn unit_cols(&self) -> u32 {
        self.area.col_count()
    }

    /// Whether the blank unit is filled from a declared empty range.
    #[must_use]
    pub fn uses_empty_range(&self) -> bool {
        self.item_count == 0 && self.empty_range.is_some()
    }
}

/// Origin of an output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrigin {
    /// Copied from a static template row.
    Static { template_row: u32 },
    /// Produced by the `item_index`-th copy of a repeat unit.
    Repeat {
        /// Index into [`PositionCalculator::expansions`].
        expansion: usize,
        item_index: u32,
        /// Row offset within the repeat unit.
        offset_in_unit: u32,
    },
}

/// Maps template coordinates to output coordinates for one sheet.
#[derive(Debug, Clone)]
pub struct PositionCalculator {
    expansions: Vec<RepeatExpansion>,
    template_last_row: u32,
    template_last_col: u32,
}

impl PositionCalculator {
    /// Build the calculator from a sheet's regions and collection sizes.
    ///
    /// Regions are processed in `(start.row, start.col)` order; each region's
    /// `final_start` accumulates the expansions of earlier regions that
    /// dominate it (same columns above for DOWN, same rows to the left for
    /// RIGHT).
    #[must_use]
    pub fn new(
        regions: &[RepeatRegionSpec],
        sizes: &BTreeMap<String, usize>,
        template_last_row: u32,
        template_last_col: u32,
    ) -> Self {
        let mut order: Vec<usize> = (0..regions.len()).collect();
        order.sort_by_key(|&i| (regions[i].area.start.row, regions[i].area.start.col));

        let mut expansions: Vec<RepeatExpansion> = Vec::with_capacity(regions.len());
        for region_index in order {
            let Some(region) = regions.get(region_index) else {
                continue;
            };
            let item_count = sizes.get(&region.collection).copied().unwrap_or(0);
            #[allow(clippy::cast_possible_truncation)]
            let effective_items = item_count.max(1).min(u32::MAX as usize) as u32;

            let mut final_start = region.area.start;
            for prior in &expansions {
                match prior.direction {
                    Direction::Down => {
                        if prior.area.end.row < region.area.start.row
                            && prior.area.overlaps_cols(&region.area)
                        {
                            final_start.row += prior.row_expansion;
                        }
                    }
                    Direction::Right => {
                        if prior.area.end.col < region.area.start.col
                            && prior.area.overlaps_rows(&region.area)
                        {
                            final_start.col += prior.col_expansion;
                        }
                    }
                }
            }

            let (row_expansion, col_expansion) = match region.direction {
                Direction::Down => ((effective_items - 1) * region.area.row_count(), 0),
                Direction::Right => (0, (effective_items - 1) * region.area.col_count()),
            };

            expansions.push(RepeatExpansion {
                region_index,
                area: region.area,
                direction: region.direction,
                collection: region.collection.clone(),
                var: region.var.clone(),
                empty_range: region.empty_range,
                item_count,
                effective_items,
                final_start,
                row_expansion,
                col_expansion,
            });
        }

        Self {
            expansions,
            template_last_row,
            template_last_col,
        }
    }

    /// The computed expansions in processing order.
    #[must_use]
    pub fn expansions(&self) -> &[RepeatExpansion] {
        &self.expansions
    }

    /// The expansion for a region (by the sheet's region index).
    #[must_use]
    pub fn expansion_for_region(&self, region_index: usize) -> Option<&RepeatExpansion> {
        self.expansions
            .iter()
            .find(|e| e.region_index == region_index)
    }

    /// Total row offset at a template coordinate: the sum of expansions of
    /// DOWN regions strictly above the row whose columns cover `col`.
    #[must_use]
    pub fn row_offset(&self, row: u32, col: u32) -> u32 {
        self.expansions
            .iter()
            .filter(|e| {
                e.direction == Direction::Down && row > e.area.end.row && e.area.contains_col(col)
            })
            .map(|e| e.row_expansion)
            .sum()
    }

    /// Total column offset at a template coordinate.
    #[must_use]
    pub fn col_offset(&self, row: u32, col: u32) -> u32 {
        self.expansions
            .iter()
            .filter(|e| {
                e.direction == Direction::Right && col > e.area.end.col && e.area.contains_row(row)
            })
            .map(|e| e.col_expansion)
            .sum()
    }

    /// Final coordinate of a template cell outside any repeat region.
    #[must_use]
    pub fn final_pos(&self, pos: CellPos) -> CellPos {
        CellPos::new(
            pos.row + self.row_offset(pos.row, pos.col),
            pos.col + self.col_offset(pos.row, pos.col),
        )
    }

    /// Project a template area to the output.
    ///
    /// Areas spanning multiple rows/columns move by the **maximum** offset
    /// over their span, so merged boxes survive asymmetric shifts; regions
    /// contained in the area stretch its far edge instead of moving it.
    #[must_use]
    pub fn project_area(&self, area: &Area) -> Area {
        let col_candidates = self.candidate_cols(area);
        let row_candidates = self.candidate_rows(area);

        let start_row_offset = col_candidates
            .iter()
            .map(|&c| self.row_offset(area.start.row, c))
            .max()
            .unwrap_or(0);
        let end_row_offset = col_candidates
            .iter()
            .map(|&c| {
                self.expansions
                    .iter()
                    .filter(|e| {
                        e.direction == Direction::Down
                            && e.area.end.row <= area.end.row
                            && e.area.contains_col(c)
                    })
                    .map(|e| e.row_expansion)
                    .sum::<u32>()
            })
            .max()
            .unwrap_or(0);

        let start_col_offset = row_candidates
            .iter()
            .map(|&r| self.col_offset(r, area.start.col))
            .max()
            .unwrap_or(0);
        let end_col_offset = row_candidates
            .iter()
            .map(|&r| {
                self.expansions
                    .iter()
                    .filter(|e| {
                        e.direction == Direction::Right
                            && e.area.end.col <= area.end.col
                            && e.area.contains_row(r)
                    })
                    .map(|e| e.col_expansion)
                    .sum::<u32>()
            })
            .max()
            .unwrap_or(0);

        Area::from_bounds(
            area.start.row + start_row_offset,
            area.start.col + start_col_offset,
            area.end.row + end_row_offset,
            area.end.col + end_col_offset,
        )
    }

    /// Offsets are piecewise-constant in the column axis with breaks at
    /// region edges; evaluating at these candidates finds the maximum.
    fn candidate_cols(&self, area: &Area) -> Vec<u32> {
        let mut cols = vec![area.start.col, area.end.col];
        for e in &self.expansions {
            for c in [e.area.start.col, e.area.end.col] {
                if c >= area.start.col && c <= area.end.col {
                    cols.push(c);
                }
            }
        }
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    fn candidate_rows(&self, area: &Area) -> Vec<u32> {
        let mut rows = vec![area.start.row, area.end.row];
        for e in &self.expansions {
            for r in [e.area.start.row, e.area.end.row] {
                if r >= area.start.row && r <= area.end.row {
                    rows.push(r);
                }
            }
        }
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    /// Which template row (or repeat copy) produces `actual_row`, considering
    /// every DOWN region on the sheet.
    #[must_use]
    pub fn row_origin(&self, actual_row: u32) -> RowOrigin {
        self.row_origin_filtered(actual_row, None)
    }

    /// Like [`Self::row_origin`], restricted to DOWN regions covering `col`.
    #[must_use]
    pub fn row_origin_for_column(&self, actual_row: u32, col: u32) -> RowOrigin {
        self.row_origin_filtered(actual_row, Some(col))
    }

    fn row_origin_filtered(&self, actual_row: u32, col: Option<u32>) -> RowOrigin {
        let mut offset = 0u32;
        for (idx, e) in self.expansions.iter().enumerate() {
            if e.direction != Direction::Down {
                continue;
            }
            if let Some(c) = col {
                if !e.area.contains_col(c) {
                    continue;
                }
            }
            let span_start = e.area.start.row + offset;
            let span_len = e.unit_rows() * e.effective_items;
            if actual_row < span_start {
                break;
            }
            if actual_row < span_start + span_len {
                let within = actual_row - span_start;
                return RowOrigin::Repeat {
                    expansion: idx,
                    item_index: within / e.unit_rows(),
                    offset_in_unit: within % e.unit_rows(),
                };
            }
            offset += e.row_expansion;
        }
        RowOrigin::Static {
            template_row: actual_row - offset,
        }
    }

    /// Number of rows the sheet emits.
    #[must_use]
    pub fn total_rows(&self) -> u32 {
        self.template_last_row
            + self
                .expansions
                .iter()
                .filter(|e| e.direction == Direction::Down)
                .map(|e| e.row_expansion)
                .sum::<u32>()
            + 1
    }

    /// Upper bound on the columns the sheet emits (for the dimension ref).
    #[must_use]
    pub fn total_cols(&self) -> u32 {
        self.template_last_col
            + self
                .expansions
                .iter()
                .filter(|e| e.direction == Direction::Right)
                .map(|e| e.col_expansion)
                .sum::<u32>()
            + 1
    }

    /// Whether a template cell belongs to an *active* empty range: a fallback
    /// area consumed by a region whose collection turned out empty. Such
    /// cells are suppressed at their original location.
    #[must_use]
    pub fn is_in_empty_range(&self, row: u32, col: u32) -> bool {
        self.expansions.iter().any(|e| {
            e.uses_empty_range()
                && e.empty_range
                    .as_ref()
                    .is_some_and(|area| area.contains(row, col))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn region(area: Area, collection: &str, direction: Direction) -> RepeatRegionSpec {
        RepeatRegionSpec {
            area,
            collection: collection.to_string(),
            var: "it".to_string(),
            direction,
            empty_range: None,
            marker_cell: area.start,
        }
    }

    fn sizes(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn single_down_region_offsets() {
        // A2:C2, 3 items: rows below shift by 2.
        let regions = vec![region(Area::from_bounds(1, 0, 1, 2), "emp", Direction::Down)];
        let calc = PositionCalculator::new(&regions, &sizes(&[("emp", 3)]), 2, 2);

        assert_eq!(calc.row_offset(0, 0), 0);
        assert_eq!(calc.row_offset(1, 0), 0);
        assert_eq!(calc.row_offset(2, 0), 2);
        // Outside the region's columns no shift applies.
        assert_eq!(calc.row_offset(2, 5), 0);
        assert_eq!(calc.total_rows(), 5);
    }

    #[test]
    fn row_origins_walk_through_copies() {
        // Template rows: 0 static, 1 repeat (1-row unit, 3 items), 2 static.
        let regions = vec![region(Area::from_bounds(1, 0, 1, 2), "emp", Direction::Down)];
        let calc = PositionCalculator::new(&regions, &sizes(&[("emp", 3)]), 2, 2);

        assert_eq!(calc.row_origin(0), RowOrigin::Static { template_row: 0 });
        for item in 0..3u32 {
            assert_eq!(
                calc.row_origin(1 + item),
                RowOrigin::Repeat {
                    expansion: 0,
                    item_index: item,
                    offset_in_unit: 0
                }
            );
        }
        assert_eq!(calc.row_origin(4), RowOrigin::Static { template_row: 2 });
    }

    #[test]
    fn multi_row_units_track_offset_in_unit() {
        // A2:C3 — a 2-row unit, 2 items.
        let regions = vec![region(Area::from_bounds(1, 0, 2, 2), "emp", Direction::Down)];
        let calc = PositionCalculator::new(&regions, &sizes(&[("emp", 2)]), 4, 2);

        assert_eq!(
            calc.row_origin(3),
            RowOrigin::Repeat {
                expansion: 0,
                item_index: 1,
                offset_in_unit: 0
            }
        );
        assert_eq!(
            calc.row_origin(4),
            RowOrigin::Repeat {
                expansion: 0,
                item_index: 1,
                offset_in_unit: 1
            }
        );
        // Template rows 3..4 shift down by one unit (2 rows).
        assert_eq!(calc.row_origin(5), RowOrigin::Static { template_row: 3 });
    }

    #[test]
    fn empty_collection_emits_one_blank_unit() {
        let regions = vec![region(Area::from_bounds(1, 0, 1, 2), "none", Direction::Down)];
        let calc = PositionCalculator::new(&regions, &sizes(&[]), 2, 2);

        let e = &calc.expansions()[0];
        assert_eq!(e.item_count, 0);
        assert_eq!(e.effective_items, 1);
        assert_eq!(e.row_expansion, 0);
        assert_eq!(calc.total_rows(), 3);
    }

    #[test]
    fn stacked_regions_dominate_later_ones() {
        // Two stacked DOWN regions sharing columns: rows 1 and 5.
        let regions = vec![
            region(Area::from_bounds(1, 0, 1, 2), "a", Direction::Down),
            region(Area::from_bounds(5, 0, 5, 2), "b", Direction::Down),
        ];
        let calc = PositionCalculator::new(&regions, &sizes(&[("a", 4), ("b", 2)]), 7, 2);

        let second = calc.expansion_for_region(1).unwrap();
        // Region b starts 3 rows lower (a expanded by 3).
        assert_eq!(second.final_start, CellPos::new(8, 0));
        // A row below both regions accumulates both expansions.
        assert_eq!(calc.row_offset(6, 0), 4);
        assert_eq!(calc.total_rows(), 7 + 3 + 1 + 1);
    }

    #[test]
    fn right_region_shifts_columns() {
        // B7:C7 RIGHT with 3 items adds 4 columns.
        let regions = vec![region(Area::from_bounds(6, 1, 6, 2), "q", Direction::Right)];
        let calc = PositionCalculator::new(&regions, &sizes(&[("q", 3)]), 7, 6);

        assert_eq!(calc.col_offset(6, 3), 4);
        assert_eq!(calc.col_offset(6, 2), 0);
        // Other rows unaffected.
        assert_eq!(calc.col_offset(0, 3), 0);
        assert_eq!(calc.final_pos(CellPos::new(6, 6)), CellPos::new(6, 10));
    }

    #[test]
    fn project_area_stretches_contained_regions() {
        // CF rule on B8:B8 with the repeat at A8:C8, 3 items.
        let regions = vec![region(Area::from_bounds(7, 0, 7, 2), "emp", Direction::Down)];
        let calc = PositionCalculator::new(&regions, &sizes(&[("emp", 3)]), 9, 3);

        let projected = calc.project_area(&Area::from_bounds(7, 1, 7, 1));
        assert_eq!(projected, Area::from_bounds(7, 1, 9, 1));

        // An area fully below the region translates instead.
        let below = calc.project_area(&Area::from_bounds(8, 0, 9, 2));
        assert_eq!(below, Area::from_bounds(10, 0, 11, 2));
    }

    #[test]
    fn project_area_uses_max_offset_across_span() {
        // Region covering only columns A..B; a merge spanning A..D moves by
        // the maximum offset over its columns.
        let regions = vec![region(Area::from_bounds(1, 0, 1, 1), "a", Direction::Down)];
        let calc = PositionCalculator::new(&regions, &sizes(&[("a", 3)]), 5, 5);

        let merged = calc.project_area(&Area::from_bounds(4, 0, 4, 3));
        assert_eq!(merged, Area::from_bounds(6, 0, 6, 3));
    }

    #[test]
    fn empty_range_membership() {
        let mut r = region(Area::from_bounds(5, 0, 5, 2), "none", Direction::Down);
        r.empty_range = Some(Area::from_bounds(12, 0, 12, 2));
        let calc = PositionCalculator::new(&[r], &sizes(&[]), 13, 3);

        assert!(calc.is_in_empty_range(12, 1));
        assert!(!calc.is_in_empty_range(11, 1));
        assert!(calc.expansions()[0].uses_empty_range());
    }

    #[test]
    fn monotone_and_matches_direct_formulas() {
        // Pseudo-random configurations: stacked non-overlapping regions with
        // varying sizes and directions.
        let mut seed: u64 = 0x1234_5678;
        let mut next = move || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (seed >> 33) as u32
        };

        for _ in 0..50 {
            let region_count = next() % 4 + 1;
            let mut regions = Vec::new();
            let mut row_cursor = 1u32;
            let mut size_map = BTreeMap::new();
            for i in 0..region_count {
                let rows = next() % 3 + 1;
                let col_start = next() % 3;
                let cols = next() % 3 + 1;
                let direction = if next() % 4 == 0 {
                    Direction::Right
                } else {
                    Direction::Down
                };
                let name = format!("c{i}");
                size_map.insert(name.clone(), (next() % 5) as usize);
                regions.push(region(
                    Area::from_bounds(row_cursor, col_start, row_cursor + rows - 1, col_start + cols - 1),
                    &name,
                    direction,
                ));
                row_cursor += rows + next() % 3 + 1;
            }
            let calc = PositionCalculator::new(&regions, &size_map, row_cursor + 2, 10);

            // Direct formula equality for every probed coordinate.
            for row in 0..row_cursor + 2 {
                for col in 0..10 {
                    let direct: u32 = calc
                        .expansions()
                        .iter()
                        .filter(|e| {
                            e.direction == Direction::Down
                                && row > e.area.end.row
                                && e.area.contains_col(col)
                        })
                        .map(|e| e.row_expansion)
                        .sum();
                    assert_eq!(calc.row_offset(row, col), direct);
                }
            }

            // Monotonicity of the final position in both axes.
            for col in 0..10 {
                let mut last = 0u32;
                for row in 0..row_cursor + 2 {
                    let fin = calc.final_pos(CellPos::new(row, col));
                    assert!(fin.row >= last);
                    last = fin.row;
                }
            }
            for row in 0..row_cursor + 2 {
                let mut last = 0u32;
                for col in 0..10 {
                    let fin = calc.final_pos(CellPos::new(row, col));
                    assert!(fin.col >= last);
                    last = fin.col;
                }
            }
        }
    }
}
