//! Pipeline orchestration.
//!
//! One generation owns one [`ProcessingContext`], moved linearly through a
//! fixed processor sequence:
//!
//! `ChartExtract → PivotExtract → TemplateRender → NumberFormat →
//!  XmlVariableReplace → PivotRecreate → ChartRestore → Metadata`
//!
//! No processor observes a partial mutation from another; the host may run
//! separate generations in parallel, but each context is single-owner.

use crate::analyzer;
use crate::charts::{self, ChartPart};
use crate::config::{CancelFlag, Config, ProgressFn};
use crate::error::{EngineError, Result};
use crate::metadata::{self, DocumentMetadata};
use crate::numfmt;
use crate::package::{self, PackagePatch};
use crate::pivot::{self, PivotInfo};
use crate::position::PositionCalculator;
use crate::provider::DataProvider;
use crate::render;
use crate::types::{RequiredNames, WorkbookSpec};
use crate::xml_vars;

/// The state one generation threads through the processor sequence.
pub struct ProcessingContext<'a> {
    /// The immutable template package.
    pub template: &'a [u8],
    pub provider: &'a dyn DataProvider,
    pub config: Config,
    pub metadata: Option<DocumentMetadata>,
    /// The output package, rewritten as stages run.
    pub result: Vec<u8>,
    pub processed_row_count: u64,
    pub required_names: Option<RequiredNames>,
    pub cancel: CancelFlag,
    pub(crate) charts: Vec<ChartPart>,
    pub(crate) pivots: Vec<PivotInfo>,
    pub(crate) spec: Option<WorkbookSpec>,
    pub(crate) calcs: Vec<PositionCalculator>,
    pub(crate) progress: Option<&'a ProgressFn>,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(template: &'a [u8], provider: &'a dyn DataProvider, config: Config) -> Self {
        Self {
            template,
            provider,
            config,
            metadata: None,
            result: Vec::new(),
            processed_row_count: 0,
            required_names: None,
            cancel: CancelFlag::new(),
            charts: Vec::new(),
            pivots: Vec::new(),
            spec: None,
            calcs: Vec::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// One pipeline stage.
trait Processor {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: &mut ProcessingContext) -> Result<()>;
}

struct ChartExtract;

impl Processor for ChartExtract {
    fn name(&self) -> &'static str {
        "chart-extract"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        ctx.charts = charts::extract_charts(ctx.template)?;
        Ok(())
    }
}

struct PivotExtract;

impl Processor for PivotExtract {
    fn name(&self) -> &'static str {
        "pivot-extract"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        ctx.pivots = pivot::extract_pivots(ctx.template)?;
        Ok(())
    }
}

struct TemplateRender;

impl Processor for TemplateRender {
    fn name(&self) -> &'static str {
        "template-render"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let spec = analyzer::analyze(ctx.template)?;
        ctx.required_names = Some(spec.required.clone());

        let output = render::render(
            ctx.template,
            &spec,
            ctx.provider,
            &ctx.config,
            ctx.cancel.clone(),
            ctx.progress,
        )?;
        ctx.result = output.bytes;
        ctx.calcs = output.calcs;
        ctx.processed_row_count = output.rows_emitted;
        ctx.spec = Some(spec);
        Ok(())
    }
}

struct NumberFormat;

impl Processor for NumberFormat {
    fn name(&self) -> &'static str {
        "number-format"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        ctx.result = numfmt::apply_default_number_formats(&ctx.result, &ctx.config)?;
        Ok(())
    }
}

struct XmlVariableReplace;

impl Processor for XmlVariableReplace {
    fn name(&self) -> &'static str {
        "xml-variable-replace"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        ctx.result = xml_vars::replace_variables(
            &ctx.result,
            ctx.provider,
            ctx.config.missing_data_behavior,
        )?;
        Ok(())
    }
}

struct PivotRecreate;

impl Processor for PivotRecreate {
    fn name(&self) -> &'static str {
        "pivot-recreate"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let Some(spec) = ctx.spec.as_ref() else {
            return Ok(());
        };
        ctx.result = pivot::recreate_pivots(&ctx.result, &ctx.pivots, spec, &ctx.calcs)?;
        Ok(())
    }
}

struct ChartRestore;

impl Processor for ChartRestore {
    fn name(&self) -> &'static str {
        "chart-restore"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let Some(spec) = ctx.spec.as_ref() else {
            return Ok(());
        };
        ctx.result = charts::restore_charts(&ctx.result, &ctx.charts, spec, &ctx.calcs)?;
        Ok(())
    }
}

struct Metadata;

impl Processor for Metadata {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<()> {
        if ctx.metadata.is_none() {
            ctx.metadata = ctx.provider.metadata();
        }
        let Some(meta) = ctx.metadata.as_ref() else {
            return Ok(());
        };
        if meta.is_empty() {
            return Ok(());
        }

        let mut patch = PackagePatch::new();
        if meta.has_core_fields() {
            patch.replace_string("docProps/core.xml", metadata::write_core_properties(meta));
        }
        if meta.has_app_fields() {
            let mut archive = package::open(&ctx.result)?;
            if let Some(app_xml) = package::try_read_part_string(&mut archive, "docProps/app.xml")
            {
                patch.replace_string(
                    "docProps/app.xml",
                    metadata::patch_app_properties(&app_xml, meta)?,
                );
            }
        }
        ctx.result = package::apply(&ctx.result, patch)?;
        Ok(())
    }
}

/// Run the full processor sequence over a context, returning the output
/// workbook bytes.
pub fn run(mut ctx: ProcessingContext) -> Result<Vec<u8>> {
    let processors: [&dyn Processor; 8] = [
        &ChartExtract,
        &PivotExtract,
        &TemplateRender,
        &NumberFormat,
        &XmlVariableReplace,
        &PivotRecreate,
        &ChartRestore,
        &Metadata,
    ];

    for processor in processors {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        log::debug!("pipeline stage: {}", processor.name());
        processor.run(&mut ctx)?;
    }

    Ok(ctx.result)
}

/// Render `template` with `provider` under the default configuration.
pub fn generate(template: &[u8], provider: &dyn DataProvider) -> Result<Vec<u8>> {
    run(ProcessingContext::new(template, provider, Config::default()))
}

/// Render `template` with `provider` under an explicit configuration.
pub fn generate_with_config(
    template: &[u8],
    provider: &dyn DataProvider,
    config: Config,
) -> Result<Vec<u8>> {
    run(ProcessingContext::new(template, provider, config))
}
