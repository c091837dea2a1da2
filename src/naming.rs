//! Output file naming policies for hosts that write to disk.
//!
//! The engine itself is a pure `(template, data) → bytes` transformer; these
//! helpers implement the conventional naming/conflict policies around it.

use std::path::{Path, PathBuf};

use crate::config::{Config, FileConflictPolicy, FileNamingMode};
use crate::error::{EngineError, Result};

/// Resolve the output path for `base_name` (without extension) in `dir`,
/// applying the configured naming mode and conflict policy.
pub fn resolve_output_path(dir: &Path, base_name: &str, config: &Config) -> Result<PathBuf> {
    let stem = match config.file_naming_mode {
        FileNamingMode::None => base_name.to_string(),
        FileNamingMode::Timestamp => {
            let stamp = chrono::Local::now().format(&config.timestamp_format);
            format!("{base_name}_{stamp}")
        }
    };

    let candidate = dir.join(format!("{stem}.xlsx"));
    if !candidate.exists() {
        return Ok(candidate);
    }

    match config.file_conflict_policy {
        FileConflictPolicy::Error => Err(EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("output file already exists: {}", candidate.display()),
        ))),
        FileConflictPolicy::Sequence => {
            for n in 1..10_000u32 {
                let next = dir.join(format!("{stem} ({n}).xlsx"));
                if !next.exists() {
                    return Ok(next);
                }
            }
            Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free sequence slot for output file",
            )))
        }
    }
}
