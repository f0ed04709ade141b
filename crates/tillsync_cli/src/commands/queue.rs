//! Outbox commands: listing, retrying, removing, and inspecting entries.

use super::{CliResult, Context};
use serde::Serialize;
use tillsync_sync::SyncOperation;

/// Runs the pending command.
pub async fn list_pending(ctx: &Context) -> CliResult<()> {
    let ops = ctx.queue.get_pending().await?;
    ctx.emit(&ops, || render_list(&ops, "No pending operations"))
}

/// Runs the failed command.
pub async fn list_failed(ctx: &Context) -> CliResult<()> {
    let ops = ctx.queue.get_failed().await?;
    ctx.emit(&ops, || render_list(&ops, "No failed operations"))
}

#[derive(Debug, Serialize)]
struct RetryOutcome {
    reset: usize,
}

/// Runs the retry command for one entry or, with `all`, every failed one.
pub async fn retry(ctx: &Context, id: Option<&str>, all: bool) -> CliResult<()> {
    let reset = match (id, all) {
        (_, true) => ctx.queue.retry_all().await?,
        (Some(id), false) => {
            if !ctx.queue.retry(id).await? {
                return Err(format!("No outbox entry {id}").into());
            }
            1
        }
        (None, false) => return Err("Either an entry id or --all is required".into()),
    };
    let outcome = RetryOutcome { reset };
    ctx.emit(&outcome, || format!("Reset {reset} operation(s) to pending"))
}

#[derive(Debug, Serialize)]
struct RemoveOutcome<'a> {
    id: &'a str,
    removed: bool,
}

/// Runs the remove command. Removing an unknown id is not an error.
pub async fn remove(ctx: &Context, id: &str) -> CliResult<()> {
    let removed = ctx.queue.remove(id).await?;
    let outcome = RemoveOutcome { id, removed };
    ctx.emit(&outcome, || {
        if removed {
            format!("Removed {id}")
        } else {
            format!("No outbox entry {id}; nothing removed")
        }
    })
}

#[derive(Debug, Serialize)]
struct ClearOutcome {
    removed: usize,
}

/// Runs the clear-synced command.
pub async fn clear_synced(ctx: &Context) -> CliResult<()> {
    let removed = ctx.queue.clear_synced().await?;
    let outcome = ClearOutcome { removed };
    ctx.emit(&outcome, || format!("Removed {removed} synced operation(s)"))
}

/// Runs the inspect command.
pub async fn inspect(ctx: &Context, id: &str) -> CliResult<()> {
    let op = ctx
        .queue
        .get(id)
        .await?
        .ok_or_else(|| format!("No outbox entry {id}"))?;
    ctx.emit(&op, || render_detail(&op))
}

fn render_list(ops: &[SyncOperation], empty: &str) -> String {
    if ops.is_empty() {
        return empty.to_string();
    }
    let mut out = format!("{} operation(s):", ops.len());
    for op in ops {
        out.push_str(&format!(
            "\n  {}  {:<6} {:<8} {:<20} {}/{}",
            op.id,
            op.op_type,
            op.entity,
            op.record_id().unwrap_or_else(|| "-".to_string()),
            op.retries,
            op.max_retries,
        ));
        if let Some(error) = &op.error {
            out.push_str(&format!("  {error}"));
        }
    }
    out
}

fn render_detail(op: &SyncOperation) -> String {
    let mut out = String::new();
    out.push_str(&format!("Operation: {}\n", op.id));
    out.push_str(&format!("  Type:      {}\n", op.op_type));
    out.push_str(&format!("  Entity:    {}\n", op.entity));
    out.push_str(&format!("  Status:    {}\n", op.status));
    out.push_str(&format!("  Timestamp: {}\n", op.timestamp));
    out.push_str(&format!("  Retries:   {}/{}\n", op.retries, op.max_retries));
    if let Some(local_id) = &op.local_id {
        out.push_str(&format!("  Local id:  {local_id}\n"));
    }
    if let Some(error) = &op.error {
        out.push_str(&format!("  Error:     {error}\n"));
    }
    let data = serde_json::to_string_pretty(&op.data).unwrap_or_else(|_| op.data.to_string());
    out.push_str("  Data:\n");
    for line in data.lines() {
        out.push_str(&format!("    {line}\n"));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seeded;
    use tillsync_sync::SyncStatus;

    #[tokio::test]
    async fn retry_all_resets_failed_entries() {
        let (_dir, ctx, [_, failed, _]) = seeded().await;
        retry(&ctx, None, true).await.unwrap();

        let op = ctx.queue.get(&failed).await.unwrap().unwrap();
        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.retries, 0);
        assert_eq!(ctx.queue.get_pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retry_of_unknown_id_fails() {
        let (_dir, ctx, _) = seeded().await;
        assert!(retry(&ctx, Some("nope"), false).await.is_err());
    }

    #[tokio::test]
    async fn retry_of_pending_entry_is_rejected() {
        let (_dir, ctx, [pending, _, _]) = seeded().await;
        assert!(retry(&ctx, Some(&pending), false).await.is_err());
    }

    #[tokio::test]
    async fn remove_and_clear_synced() {
        let (_dir, ctx, [pending, _, _]) = seeded().await;
        remove(&ctx, &pending).await.unwrap();
        remove(&ctx, "unknown").await.unwrap();
        clear_synced(&ctx).await.unwrap();

        let stats = ctx.queue.get_stats().await.unwrap();
        assert_eq!((stats.total, stats.error), (1, 1));
    }

    #[tokio::test]
    async fn inspect_renders_the_failure() {
        let (_dir, ctx, [_, failed, _]) = seeded().await;
        let op = ctx.queue.get(&failed).await.unwrap().unwrap();
        let text = render_detail(&op);
        assert!(text.contains("Status:    error"));
        assert!(text.contains("HTTP 500: boom"));
        assert!(text.contains("\"id\": \"r1\""));

        assert!(inspect(&ctx, "missing").await.is_err());
    }

    #[test]
    fn empty_list_has_a_message() {
        assert_eq!(render_list(&[], "nothing"), "nothing");
    }
}
