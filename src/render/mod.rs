//! Rendering: produces the output workbook from blueprint + data.
//!
//! Two interchangeable strategies share the hook structure
//! (`before_process_sheets` / `process_sheet` / `after_process_sheets`) and
//! the emission core in [`emit`]:
//!
//! - **in-memory** materializes every collection and assembles each sheet
//!   as one buffer;
//! - **streaming** keeps collections iterator-backed and writes rows
//!   straight into the package entry in bounded windows.

mod emit;
mod in_memory;
mod sheet_writer;
mod streaming;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use crate::config::{CancelFlag, Config, MissingData, ProgressFn, StreamingMode};
use crate::error::{EngineError, Result};
use crate::images;
use crate::package::{self, PackagePatch};
use crate::position::PositionCalculator;
use crate::provider::DataProvider;
use crate::types::WorkbookSpec;
use crate::value::Value;

/// Shared, read-only render context. Interior mutability covers the scalar
/// cache and row accounting; everything is single-threaded within one
/// generation.
pub(crate) struct RenderState<'a> {
    pub spec: &'a WorkbookSpec,
    pub provider: &'a dyn DataProvider,
    pub config: &'a Config,
    pub sizes: BTreeMap<String, usize>,
    pub calcs: Vec<PositionCalculator>,
    pub new_drawing_rids: Vec<Option<String>>,
    pub cancel: CancelFlag,
    progress: Option<&'a ProgressFn>,
    scalars: RefCell<HashMap<String, Option<Value>>>,
    rows_emitted: Cell<u64>,
}

impl RenderState<'_> {
    /// Scalar lookup with per-generation caching: the provider sees each
    /// name at most once.
    pub(crate) fn scalar(&self, name: &str) -> Option<Value> {
        if let Some(cached) = self.scalars.borrow().get(name) {
            return cached.clone();
        }
        let value = self.provider.value(name);
        self.scalars
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        value
    }

    /// Account one emitted row and fire the progress callback on interval.
    pub(crate) fn note_row(&self) {
        let count = self.rows_emitted.get() + 1;
        self.rows_emitted.set(count);
        let interval = self.config.progress_report_interval;
        if interval > 0 && count % interval == 0 {
            if let Some(progress) = self.progress {
                progress(count);
            }
        }
    }

    pub(crate) fn rows_emitted(&self) -> u64 {
        self.rows_emitted.get()
    }
}

/// A rendering strategy: one of the two sheet-production pipelines.
pub(crate) trait RenderStrategy {
    fn before_process_sheets(&mut self, state: &RenderState) -> Result<()> {
        let _ = state;
        Ok(())
    }

    fn process_sheet<'s, 'a>(
        &mut self,
        state: &'s RenderState<'a>,
        sheet_index: usize,
        patch: &mut PackagePatch<'s>,
    ) -> Result<()>;

    fn after_process_sheets(&mut self, state: &RenderState) -> Result<()> {
        let _ = state;
        Ok(())
    }
}

/// Result of the render stage.
pub(crate) struct RenderOutput {
    pub bytes: Vec<u8>,
    pub calcs: Vec<PositionCalculator>,
    pub rows_emitted: u64,
}

/// Render the analyzed template with the configured strategy.
pub(crate) fn render<'a>(
    template: &'a [u8],
    spec: &'a WorkbookSpec,
    provider: &'a dyn DataProvider,
    config: &'a Config,
    cancel: CancelFlag,
    progress: Option<&'a ProgressFn>,
) -> Result<RenderOutput> {
    let sizes = collection_sizes(spec, provider, config)?;
    let calcs: Vec<PositionCalculator> = spec
        .sheets
        .iter()
        .map(|sheet| {
            PositionCalculator::new(
                &sheet.regions,
                &sizes,
                sheet.template_last_row,
                sheet.template_last_col,
            )
        })
        .collect();

    let mut patch = PackagePatch::new();
    package::invalidate_calc_chain(template, &mut patch)?;
    let new_drawing_rids = images::insert_images(
        template,
        spec,
        &calcs,
        provider,
        config.missing_data_behavior,
        &mut patch,
    )?;

    let state = RenderState {
        spec,
        provider,
        config,
        sizes,
        calcs,
        new_drawing_rids,
        cancel,
        progress,
        scalars: RefCell::new(HashMap::new()),
        rows_emitted: Cell::new(0),
    };

    let mut strategy = in_memory::InMemoryStrategy::default();
    let _ = config.streaming_mode;

    log::debug!(
        "rendering {} sheet(s), strategy {:?}",
        spec.sheets.len(),
        config.streaming_mode
    );

    strategy.before_process_sheets(&state)?;
    for sheet_index in 0..spec.sheets.len() {
        if state.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        strategy.process_sheet(&state, sheet_index, &mut patch)?;
    }
    strategy.after_process_sheets(&state)?;

    let bytes = package::apply(template, patch)?;

    Ok(RenderOutput {
        bytes,
        rows_emitted: state.rows_emitted(),
        calcs: state.calcs,
    })
}

/// Determine every required collection's size up front: the provider's count
/// fast path when available, otherwise one counted pass of a fresh iterator.
fn collection_sizes(
    spec: &WorkbookSpec,
    provider: &dyn DataProvider,
    config: &Config,
) -> Result<BTreeMap<String, usize>> {
    let mut sizes = BTreeMap::new();
    for name in &spec.required.collections {
        let size = match provider.item_count(name) {
            Some(n) => Some(n),
            None => provider.items(name).map(Iterator::count),
        };
        match size {
            Some(n) => {
                sizes.insert(name.clone(), n);
            }
            None => match config.missing_data_behavior {
                MissingData::Warn => {
                    log::warn!("no collection `{name}` in data; treated as empty");
                    sizes.insert(name.clone(), 0);
                }
                MissingData::Throw => {
                    return Err(EngineError::MissingTemplateData {
                        name: name.clone(),
                        sheet: None,
                        cell: None,
                    });
                }
            },
        }
    }
    Ok(sizes)
}
