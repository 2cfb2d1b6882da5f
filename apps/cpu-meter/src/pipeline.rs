use anyhow::{Context, Result};
use std::io;

use crate::extract::extract_cpu_usage;
use crate::uploader::OutputSink;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub lines: u64,
    pub skipped: u64,
    pub sent: u64,
    pub failed: u64,
}

/// Reads lines until the source ends, sending every parsable reading to `sink`.
///
/// Unparsable lines and failed sends are counted and skipped. A read error from
/// `lines` ends the loop with an error.
pub fn run<I, S>(lines: I, sink: &S) -> Result<PipelineStats>
where
    I: IntoIterator<Item = io::Result<String>>,
    S: OutputSink + ?Sized,
{
    let mut stats = PipelineStats::default();
    for line in lines {
        let line = line.context("failed to read sample file")?;
        stats.lines += 1;

        let Some(percent) = extract_cpu_usage(&line) else {
            stats.skipped += 1;
            tracing::trace!(line = %line, "skipping non-sample line");
            continue;
        };

        match sink.send(percent) {
            Ok(()) => stats.sent += 1,
            Err(err) => {
                stats.failed += 1;
                tracing::warn!(error = %format_args!("{err:#}"), percent = %percent, "output command dropped");
            }
        }
    }
    Ok(stats)
}
