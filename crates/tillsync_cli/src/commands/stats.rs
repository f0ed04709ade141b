//! Stats command implementation.

use super::{CliResult, Context};
use serde::Serialize;
use tillsync_store::DatabaseStats;
use tillsync_sync::QueueStats;

/// Combined database and outbox statistics.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// Log and collection statistics.
    pub database: DatabaseStats,
    /// Outbox entries by status.
    pub queue: QueueStats,
}

/// Gathers the report.
pub async fn collect(ctx: &Context) -> CliResult<StatsReport> {
    Ok(StatsReport {
        database: ctx.store.stats().await?,
        queue: ctx.queue.get_stats().await?,
    })
}

/// Runs the stats command.
pub async fn run(ctx: &Context) -> CliResult<()> {
    let report = collect(ctx).await?;
    ctx.emit(&report, || render(&report))
}

fn render(report: &StatsReport) -> String {
    let db = &report.database;
    let q = &report.queue;
    let mut out = String::new();
    out.push_str(&format!("Database: {} (schema v{})\n", db.name, db.version));
    out.push_str(&format!("  Log size:    {} bytes\n", db.log_bytes));
    out.push_str(&format!(
        "  Frames:      {} ({} dead)\n",
        db.frames, db.dead_frames
    ));
    out.push_str("\nCollections:\n");
    for c in &db.collections {
        out.push_str(&format!(
            "  {:<12} {:>8} documents  [{}]\n",
            c.name,
            c.documents,
            c.indexes.join(", ")
        ));
    }
    out.push_str("\nOutbox:\n");
    out.push_str(&format!("  Total:   {}\n", q.total));
    out.push_str(&format!("  Pending: {}\n", q.pending));
    out.push_str(&format!("  Syncing: {}\n", q.syncing));
    out.push_str(&format!("  Synced:  {}\n", q.synced));
    out.push_str(&format!("  Error:   {}", q.error));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seeded;

    #[tokio::test]
    async fn counts_entries_by_status() {
        let (_dir, ctx, _) = seeded().await;
        let report = collect(&ctx).await.unwrap();
        assert_eq!(report.queue.total, 3);
        assert_eq!(
            (report.queue.pending, report.queue.error, report.queue.synced),
            (1, 1, 1)
        );

        let text = render(&report);
        assert!(text.contains("sync_queue"));
        assert!(text.contains("Error:   1"));
    }
}
