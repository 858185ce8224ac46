//! Refund command implementations (process, list, reset, link)

use anyhow::{Context, Result};
use settle_core::models::ReconciliationStatus;
use settle_core::{Database, ExpenseClient, LinkOptions, RefundLinker, RefundOutcome};

use super::truncate;

pub async fn cmd_refunds_process(
    db: &Database,
    remote: Option<&ExpenseClient>,
    allow_partial: bool,
    window_days: i64,
    dry_run: bool,
) -> Result<()> {
    let options = LinkOptions {
        dry_run,
        allow_partial,
        date_window_days: window_days,
    };
    let linker = RefundLinker::new(db, remote, options);
    let summary = linker.process_pending().await?;

    if summary.total == 0 {
        println!("✅ No pending refunds");
        return Ok(());
    }

    println!();
    println!("💸 Refund Linking{}", if dry_run { " (dry run)" } else { "" });
    println!("   ─────────────────────────────");
    for outcome in &summary.outcomes {
        println!("   {}", describe_outcome(outcome));
    }
    println!();
    println!("   Processed: {}", summary.total);
    println!("   Created: {}", summary.created);
    if summary.would_create > 0 {
        println!("   Would create: {}", summary.would_create);
    }
    println!("   Duplicate: {}", summary.duplicate);
    println!("   Unmatched: {}", summary.unmatched);
    println!("   Manual review: {}", summary.manual_review);
    if summary.errors > 0 {
        println!("   ❌ Errors: {}", summary.errors);
    }
    Ok(())
}

/// One-line description of a refund outcome
pub fn describe_outcome(outcome: &RefundOutcome) -> String {
    match outcome {
        RefundOutcome::Created {
            refund_id,
            original_id,
            external_id,
            method,
            math,
        } => format!(
            "#{} -> #{} created {} ({}, {:.1}%{})",
            refund_id,
            original_id,
            external_id,
            method,
            math.percentage,
            if math.is_partial { ", partial" } else { "" }
        ),
        RefundOutcome::WouldCreate {
            refund_id,
            original_id,
            method,
            math,
        } => format!(
            "#{} -> #{} would create ({}, {:.1}%)",
            refund_id, original_id, method, math.percentage
        ),
        RefundOutcome::Duplicate {
            refund_id,
            original_id,
        } => match original_id {
            Some(original_id) => format!("#{} duplicate of refund for #{}", refund_id, original_id),
            None => format!("#{} duplicate", refund_id),
        },
        RefundOutcome::Unmatched { refund_id, reason } => {
            format!("#{} unmatched: {}", refund_id, reason)
        }
        RefundOutcome::ManualReview { refund_id, reason } => {
            format!("#{} manual review: {}", refund_id, reason)
        }
        RefundOutcome::Error { refund_id, message } => {
            format!("#{} ❌ {}", refund_id, message)
        }
        RefundOutcome::Skipped { refund_id, status } => {
            format!("#{} skipped ({})", refund_id, status)
        }
    }
}

pub fn cmd_refunds_list(db: &Database, status: Option<&str>) -> Result<()> {
    let refunds = match status {
        Some(status) => {
            let status: ReconciliationStatus =
                status.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            db.refunds_by_status(status)?
        }
        None => db.unmatched_refunds()?,
    };

    if refunds.is_empty() {
        println!("No refunds found.");
        return Ok(());
    }

    println!();
    println!("💸 Refunds");
    println!("   ─────────────────────────────────────────────────────────────");
    for refund in &refunds {
        let status = refund
            .reconciliation_status
            .map(|s| s.as_str())
            .unwrap_or("-");
        let linked = refund
            .refund_for_txn_id
            .map(|id| format!("-> #{}", id))
            .unwrap_or_default();
        println!(
            "   #{:<5} {} {:<28} {:>9.2}  {:<13} {}",
            refund.id,
            refund.date,
            truncate(&refund.merchant, 28),
            refund.amount,
            status,
            linked
        );
        if let Some(note) = &refund.reconciliation_note {
            println!("          {}", note);
        }
    }
    println!();
    println!("   Total: {}", refunds.len());
    Ok(())
}

pub fn cmd_refunds_reset(db: &Database, id: i64) -> Result<()> {
    let refund = db
        .get_transaction(id)?
        .with_context(|| format!("Transaction {} not found", id))?;
    if !refund.is_refund {
        anyhow::bail!("Transaction {} is not a refund", id);
    }

    if db.reset_refund(id)? {
        println!("✅ Refund #{} reset to pending", id);
    } else {
        println!("Refund #{} was already pending", id);
    }
    Ok(())
}

pub async fn cmd_refunds_link(
    db: &Database,
    remote: Option<&ExpenseClient>,
    refund_id: i64,
    original_id: i64,
) -> Result<()> {
    let linker = RefundLinker::new(db, remote, LinkOptions::default());
    let outcome = linker.link_refund_manually(refund_id, original_id).await?;
    println!("   {}", describe_outcome(&outcome));

    match outcome {
        RefundOutcome::Created { .. } => {
            println!("✅ Linked");
            Ok(())
        }
        RefundOutcome::Error { message, .. } => anyhow::bail!("Manual link failed: {}", message),
        _ => Ok(()),
    }
}
