//! Streaming rendering strategy.
//!
//! Rows are generated while the package entry is being written: at most one
//! window of row XML is resident per sheet, and downward repeat collections
//! stay iterator-backed — the provider hands over one fresh iterator per
//! region emission and it is consumed strictly forward. A collection
//! iterator that fails mid-consumption surfaces its effect immediately: the
//! generation aborts and no partial workbook is retained.

use crate::error::Result;
use crate::package::PackagePatch;

use super::emit::{SheetEmitter, StreamingItems};
use super::{RenderState, RenderStrategy};

pub(super) struct StreamingStrategy;

impl RenderStrategy for StreamingStrategy {
    fn process_sheet<'s, 'a>(
        &mut self,
        state: &'s RenderState<'a>,
        sheet_index: usize,
        patch: &mut PackagePatch<'s>,
    ) -> Result<()> {
        let part_path = state.spec.sheets[sheet_index].part_path.clone();
        let window = state.config.stream_window_rows;

        patch.replace_stream(
            part_path,
            Box::new(move |out| {
                let mut emitter = SheetEmitter::new(state, sheet_index)?;
                let mut items = StreamingItems::new(state.provider);
                emitter.emit(out, &mut items, window)
            }),
        );
        Ok(())
    }
}
