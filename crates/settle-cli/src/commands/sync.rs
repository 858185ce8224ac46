//! Remote sync command

use anyhow::Result;
use chrono::NaiveDate;
use settle_core::remote::ExpenseService;
use settle_core::{Database, ExpenseClient, RemoteSync};

pub async fn cmd_sync(
    db: &Database,
    remote: &ExpenseClient,
    start: NaiveDate,
    end: NaiveDate,
    dry_run: bool,
) -> Result<()> {
    println!(
        "🔄 Syncing {} to {} from {}{}...",
        start,
        end,
        remote.host(),
        if dry_run { " (dry run)" } else { "" }
    );

    let stats = RemoteSync::new(db, remote).sync(start, end, dry_run).await?;

    println!();
    println!("✅ Sync complete");
    println!("   Checked: {}", stats.checked);
    println!("   Inserted: {}", stats.inserted);
    println!("   Updated: {}", stats.updated);
    println!("   Linked to statement rows: {}", stats.linked);
    println!("   Marked deleted: {}", stats.marked_deleted);
    println!("   Unchanged: {}", stats.unchanged);
    if stats.not_participant > 0 {
        println!("   Not a participant: {}", stats.not_participant);
    }
    if stats.errors > 0 {
        println!("   ❌ Failed: {}", stats.errors);
    }
    Ok(())
}
