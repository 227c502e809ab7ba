//! Profile artifact writers
//!
//! Each writer either leaves a complete file at the requested path or
//! removes whatever it managed to write, so a path handed back to callers
//! always points at a usable artifact.

use crate::collector::AllocatorCounters;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sampling rate of the execution-time recorder, in Hz
pub const CPU_SAMPLE_FREQUENCY: i32 = 1000;

/// Heap artifact contents
#[derive(Debug, Serialize)]
pub struct HeapSnapshot<'a> {
    pub function: &'a str,
    pub captured_at: DateTime<Utc>,
    pub before: AllocatorCounters,
    pub after: AllocatorCounters,
}

/// Write `snapshot` as pretty JSON, replacing any previous artifact
pub fn write_heap_snapshot(path: &Path, snapshot: &HeapSnapshot<'_>) -> Result<PathBuf> {
    let json = serde_json::to_vec_pretty(snapshot).context("Failed to encode heap snapshot")?;

    let temp_path = path.with_extension("json.tmp");
    let written = (|| -> Result<()> {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to move heap snapshot to {}", path.display()))
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(path.to_path_buf())
}

/// Sampling execution-time recorder
///
/// Only one recorder can run per process. Starting a second one while a
/// trace is in flight fails, and that trace gets no execution-time artifact.
#[cfg(unix)]
pub struct CpuRecorder {
    guard: pprof::ProfilerGuard<'static>,
}

#[cfg(unix)]
impl CpuRecorder {
    pub fn start(frequency: i32) -> Result<Self> {
        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(frequency)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()
            .context("Failed to start execution-time recorder")?;
        Ok(Self { guard })
    }

    /// Stop sampling and render a flamegraph to `path`
    pub fn finish(self, path: &Path) -> Result<PathBuf> {
        let report = self
            .guard
            .report()
            .build()
            .context("Failed to build execution-time report")?;
        drop(self.guard);

        if report.data.is_empty() {
            let _ = fs::remove_file(path);
            anyhow::bail!("no samples captured");
        }

        let rendered = (|| -> Result<()> {
            let file = fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            report
                .flamegraph(file)
                .context("Failed to render flamegraph")
        })();

        if let Err(e) = rendered {
            let _ = fs::remove_file(path);
            return Err(e);
        }
        Ok(path.to_path_buf())
    }
}

#[cfg(not(unix))]
pub struct CpuRecorder;

#[cfg(not(unix))]
impl CpuRecorder {
    pub fn start(_frequency: i32) -> Result<Self> {
        anyhow::bail!("execution-time recording is not supported on this platform")
    }

    pub fn finish(self, _path: &Path) -> Result<PathBuf> {
        anyhow::bail!("execution-time recording is not supported on this platform")
    }
}

/// Turn a function name into a file name stem
pub fn file_stem(name: &str) -> String {
    let stem: String = name
        .replace("::", "-")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let stem = stem.trim_matches(|c| c == '-' || c == '.');
    if stem.is_empty() {
        "anonymous".to_string()
    } else {
        stem.to_string()
    }
}
