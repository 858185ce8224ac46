//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Settle - Reconcile statements, shared expenses and refunds
#[derive(Parser)]
#[command(name = "settle")]
#[command(about = "Personal finance reconciliation and refund-linking engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Ledger database path
    #[arg(long, default_value = "settle.db", global = true)]
    pub db: PathBuf,

    /// Category configuration file (TOML or YAML)
    ///
    /// Defaults to ~/.local/share/settle/config/categories.toml when present,
    /// then the built-in configuration.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable ledger encryption (not recommended outside development)
    ///
    /// By default, the ledger is encrypted using SQLCipher.
    /// Set SETTLE_DB_KEY environment variable with your passphrase.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the ledger
    Init,

    /// Import a credit-card statement CSV
    Import {
        /// Statement file to import
        #[arg(short, long)]
        file: PathBuf,

        /// Amount sign convention: credits-negative (amex) or debits-negative (bofa)
        #[arg(long, default_value = "credits-negative")]
        convention: String,

        /// Create a remote expense for each new purchase
        #[arg(long)]
        mirror: bool,

        /// Skip this many rows (after date and merchant filters)
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Process at most this many rows
        #[arg(long)]
        limit: Option<usize>,

        /// Only rows whose description or merchant contains this text
        #[arg(long)]
        merchant: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Do not run refund linking after the import
        #[arg(long)]
        no_refunds: bool,

        /// Classify rows without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Add one transaction by hand
    Add {
        /// Transaction date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Merchant name
        #[arg(long)]
        merchant: String,

        /// Amount, negative for a refund
        #[arg(long, allow_hyphen_values = true)]
        amount: f64,

        /// Description (defaults to the merchant)
        #[arg(long)]
        description: Option<String>,

        /// Statement reference id
        #[arg(long)]
        reference: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,

        /// Mark as a shared expense
        #[arg(long)]
        shared: bool,

        /// Show the inferred category without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Load rows from a spreadsheet tab into the ledger
    ImportSheet {
        /// Spreadsheet name
        #[arg(long, default_value = "Expenses")]
        sheet: String,

        /// Tab to import (e.g. 2024)
        #[arg(long)]
        tab: String,

        /// Workbook directory (defaults to ~/.local/share/settle/sheets)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Classify rows without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Review merchant categories and feed corrections back into the config
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Link refunds to their original purchases
    Refunds {
        #[command(subcommand)]
        action: RefundsAction,
    },

    /// Pull remote expenses into the ledger
    Sync {
        /// Start date (YYYY-MM-DD), defaults to 30 days ago
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        to: Option<String>,

        /// Report changes without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Create remote expenses for ledger purchases that have none
    Push {
        /// List candidates without creating anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Write ledger rows to a yearly spreadsheet tab
    Export {
        /// Spreadsheet name
        #[arg(long, default_value = "Expenses")]
        sheet: String,

        /// Year to export (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,

        /// Rewrite the whole tab instead of appending unwritten rows
        #[arg(long)]
        full: bool,

        /// Workbook directory (defaults to ~/.local/share/settle/sheets)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Count rows without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Compute monthly spending summaries
    Summary {
        /// Year to summarize (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,

        /// Also write the Summary tab of this spreadsheet
        #[arg(long)]
        sheet: Option<String>,

        /// Workbook directory (defaults to ~/.local/share/settle/sheets)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Print summaries without caching or writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show ledger status (encryption, counts, remote configuration)
    Status,

    /// Show recent import runs
    History {
        /// Filter by source: csv, remote_api, sheets, manual
        #[arg(long)]
        source: Option<String>,

        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum RefundsAction {
    /// Process pending refunds
    Process {
        /// Only link originals whose amount equals the refund
        #[arg(long)]
        exact: bool,

        /// Days before the refund to search for the original
        #[arg(long, default_value = "90")]
        window_days: i64,

        /// Report decisions without writing or creating remote expenses
        #[arg(long)]
        dry_run: bool,
    },

    /// List refunds by reconciliation status
    List {
        /// Status: pending, matched, unmatched, manual_review (default: pending and unmatched)
        #[arg(long)]
        status: Option<String>,
    },

    /// Return a refund to pending so it is processed again
    Reset {
        /// Refund transaction ID
        id: i64,
    },

    /// Link a refund to an original purchase by hand
    Link {
        /// Refund transaction ID
        refund_id: i64,

        /// Original purchase transaction ID
        original_id: i64,
    },
}

#[derive(Subcommand)]
pub enum ReviewAction {
    /// Write one row per merchant with its inferred category
    Export {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Include merchants already in the lookup table
        #[arg(long)]
        all: bool,

        /// Spreadsheet name
        #[arg(long, default_value = "Merchant Review")]
        sheet: String,

        /// Tab name
        #[arg(long, default_value = "Merchants")]
        tab: String,

        /// Workbook directory (defaults to ~/.local/share/settle/sheets)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Count rows without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Write approved and corrected merchants into the category config
    Apply {
        /// Spreadsheet name
        #[arg(long, default_value = "Merchant Review")]
        sheet: String,

        /// Tab name
        #[arg(long, default_value = "Merchants")]
        tab: String,

        /// Workbook directory (defaults to ~/.local/share/settle/sheets)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Show changes without writing
        #[arg(long)]
        dry_run: bool,
    },
}
