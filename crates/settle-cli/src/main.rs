//! Settle CLI - Personal finance reconciliation
//!
//! Usage:
//!   settle init                    Initialize the ledger
//!   settle import --file CSV       Import a statement (dedupe, categorize, link refunds)
//!   settle import-sheet --tab 2024 Load a spreadsheet tab into the ledger
//!   settle add --date ... --merchant ... --amount ...  Add one transaction
//!   settle refunds process         Link pending refunds to their purchases
//!   settle sync --from 2025-01-01  Pull remote expenses into the ledger
//!   settle review export|apply     Review merchant categories

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.config.as_deref(), cli.no_encrypt),
        Commands::Import {
            file,
            convention,
            mirror,
            offset,
            limit,
            merchant,
            from,
            to,
            no_refunds,
            dry_run,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let mut engine = commands::load_engine(cli.config.as_deref())?;
            let remote = commands::remote_from_env();
            if let Some(remote) = &remote {
                commands::merge_remote_categories(&mut engine, remote).await;
            }
            let args = commands::ImportArgs {
                convention,
                mirror,
                offset,
                limit,
                merchant,
                from,
                to,
                no_refunds,
                dry_run,
            };
            commands::cmd_import(&db, &engine, remote.as_ref(), &file, &args).await
        }
        Commands::Add {
            date,
            merchant,
            amount,
            description,
            reference,
            notes,
            shared,
            dry_run,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let engine = commands::load_engine(cli.config.as_deref())?;
            let entry = settle_core::ManualEntry {
                date: commands::parse_date(&date, "--date")?,
                merchant,
                amount,
                description,
                reference,
                notes,
                shared,
            };
            commands::cmd_add(&db, &engine, &entry, dry_run).await
        }
        Commands::ImportSheet {
            sheet,
            tab,
            dir,
            dry_run,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let engine = commands::load_engine(cli.config.as_deref())?;
            let workbook = commands::open_workbook(dir)?;
            commands::cmd_import_sheet(&db, &engine, &workbook, &sheet, &tab, dry_run).await
        }
        Commands::Review { action } => match action {
            ReviewAction::Export {
                from,
                to,
                all,
                sheet,
                tab,
                dir,
                dry_run,
            } => {
                let db = commands::open_db(&cli.db, cli.no_encrypt)?;
                let engine = commands::load_engine(cli.config.as_deref())?;
                let workbook = commands::open_workbook(dir)?;
                let options = settle_core::ReviewOptions {
                    sheet,
                    tab,
                    start_date: from.as_deref().map(|d| commands::parse_date(d, "--from")).transpose()?,
                    end_date: to.as_deref().map(|d| commands::parse_date(d, "--to")).transpose()?,
                    include_known: all,
                    dry_run,
                };
                commands::cmd_review_export(&db, &engine, &workbook, &options)
            }
            ReviewAction::Apply {
                sheet,
                tab,
                dir,
                dry_run,
            } => {
                let workbook = commands::open_workbook(dir)?;
                let config_path = commands::review_config_path(cli.config.as_deref())?;
                commands::cmd_review_apply(&workbook, &sheet, &tab, &config_path, dry_run)
            }
        },
        Commands::Refunds { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                RefundsAction::Process {
                    exact,
                    window_days,
                    dry_run,
                } => {
                    let remote = commands::remote_from_env();
                    commands::cmd_refunds_process(&db, remote.as_ref(), !exact, window_days, dry_run)
                        .await
                }
                RefundsAction::List { status } => commands::cmd_refunds_list(&db, status.as_deref()),
                RefundsAction::Reset { id } => commands::cmd_refunds_reset(&db, id),
                RefundsAction::Link {
                    refund_id,
                    original_id,
                } => {
                    let remote = commands::remote_from_env();
                    commands::cmd_refunds_link(&db, remote.as_ref(), refund_id, original_id).await
                }
            }
        }
        Commands::Sync { from, to, dry_run } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let remote = commands::require_remote()?;
            let (start, end) = commands::resolve_range(from.as_deref(), to.as_deref())?;
            commands::cmd_sync(&db, &remote, start, end, dry_run).await
        }
        Commands::Push { dry_run } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let engine = commands::load_engine(cli.config.as_deref())?;
            let remote = commands::require_remote()?;
            commands::cmd_push(&db, &engine, &remote, dry_run).await
        }
        Commands::Export {
            sheet,
            year,
            full,
            dir,
            dry_run,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let workbook = commands::open_workbook(dir)?;
            let year = year.unwrap_or_else(commands::current_year);
            commands::cmd_export(&db, &workbook, &sheet, year, full, dry_run)
        }
        Commands::Summary {
            year,
            sheet,
            dir,
            dry_run,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let year = year.unwrap_or_else(commands::current_year);
            match sheet {
                Some(sheet) => {
                    let workbook = commands::open_workbook(dir)?;
                    commands::cmd_summary(&db, Some((&workbook, sheet.as_str())), year, dry_run)
                }
                None => commands::cmd_summary(&db, None, year, dry_run),
            }
        }
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt),
        Commands::History { source, limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_history(&db, source.as_deref(), limit)
        }
    }
}
