//! Engine configuration and host-facing control primitives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Which rendering strategy produces the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamingMode {
    /// Emit rows sequentially with a bounded resident window.
    #[default]
    Enabled,
    /// Materialize each sheet fully in memory before writing.
    Disabled,
}

/// What to do when the data provider has no value for a required name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissingData {
    /// Keep the marker text in the output and log a warning.
    #[default]
    Warn,
    /// Abort the generation.
    Throw,
}

/// Output file naming policy for hosts that write to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileNamingMode {
    #[default]
    None,
    Timestamp,
}

/// What to do when the output file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileConflictPolicy {
    #[default]
    Error,
    Sequence,
}

/// Engine configuration. `Config::default()` matches production defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub streaming_mode: StreamingMode,
    pub missing_data_behavior: MissingData,
    /// Copy template column widths and row heights onto produced rows/columns.
    pub preserve_template_layout: bool,
    /// Rows kept resident before the streaming strategy flushes a window.
    pub stream_window_rows: usize,
    /// Emitted rows between progress callbacks (0 disables reporting).
    pub progress_report_interval: u64,
    /// Built-in number format applied to unstyled whole-number cells.
    pub integer_number_format_index: u16,
    /// Built-in number format applied to unstyled fractional cells.
    pub decimal_number_format_index: u16,
    pub file_naming_mode: FileNamingMode,
    /// `chrono` format string for [`FileNamingMode::Timestamp`].
    pub timestamp_format: String,
    pub file_conflict_policy: FileConflictPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            streaming_mode: StreamingMode::Enabled,
            missing_data_behavior: MissingData::Warn,
            preserve_template_layout: true,
            stream_window_rows: 1024,
            progress_report_interval: 0,
            integer_number_format_index: 3,  // #,##0
            decimal_number_format_index: 4,  // #,##0.00
            file_naming_mode: FileNamingMode::None,
            timestamp_format: "%Y%m%d_%H%M%S".to_string(),
            file_conflict_policy: FileConflictPolicy::Error,
        }
    }
}

/// Cooperative cancellation: the host sets the flag, the engine polls it
/// between pipeline stages and between emitted rows. Partial output is
/// discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress callback invoked with the cumulative emitted-row count.
pub type ProgressFn = dyn Fn(u64) + Send + Sync;
