//! Compact command implementation.

use super::{CliResult, Context};

/// Runs the compact command.
pub async fn run(ctx: &Context) -> CliResult<()> {
    let stats = ctx.store.compact().await?;
    ctx.emit(&stats, || {
        let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
        let percent = if stats.bytes_before > 0 {
            saved as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        };
        format!(
            "Compaction complete\n  Size before:    {} bytes\n  Size after:     {} bytes\n  Frames dropped: {}\n  Space saved:    {} bytes ({:.1}%)",
            stats.bytes_before, stats.bytes_after, stats.frames_dropped, saved, percent
        )
    })
}
