//! In-memory rendering strategy.
//!
//! Every required collection is materialized before the first sheet is
//! processed, and each sheet is assembled as one buffer before it enters the
//! package. Memory is proportional to the whole workbook; random re-reads of
//! items cost nothing.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::package::PackagePatch;
use crate::value::Value;

use super::emit::{MaterializedItems, SheetEmitter};
use super::{RenderState, RenderStrategy};

#[derive(Default)]
pub(super) struct InMemoryStrategy {
    collections: BTreeMap<String, Vec<Value>>,
}

impl RenderStrategy for InMemoryStrategy {
    fn before_process_sheets(&mut self, state: &RenderState) -> Result<()> {
        for name in &state.spec.required.collections {
            let items: Vec<Value> = state
                .provider
                .items(name)
                .map(Iterator::collect)
                .unwrap_or_default();
            self.collections.insert(name.clone(), items);
        }
        Ok(())
    }

    fn process_sheet<'s, 'a>(
        &mut self,
        state: &'s RenderState<'a>,
        sheet_index: usize,
        patch: &mut PackagePatch<'s>,
    ) -> Result<()> {
        let mut emitter = SheetEmitter::new(state, sheet_index)?;
        let mut items = MaterializedItems {
            collections: &self.collections,
        };

        let mut buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        emitter.emit(&mut buf, &mut items, usize::MAX)?;

        let part_path = state.spec.sheets[sheet_index].part_path.clone();
        patch.replace_bytes(part_path, buf);
        Ok(())
    }
}
