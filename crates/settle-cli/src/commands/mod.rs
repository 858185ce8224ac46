//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, remote setup, date ranges)
//! - `import` - Statement import and pushing unmirrored rows
//! - `ingest` - Spreadsheet tab import and manual entries
//! - `refunds` - Refund processing, listing, reset and manual links
//! - `sync` - Remote to ledger sync
//! - `export` - Spreadsheet export and monthly summaries
//! - `review` - Merchant review export and apply
//! - `status` - Status and import history

pub mod core;
pub mod export;
pub mod import;
pub mod ingest;
pub mod refunds;
pub mod review;
pub mod status;
pub mod sync;

// Re-export command functions for main.rs
pub use core::*;
pub use export::*;
pub use import::*;
pub use ingest::*;
pub use refunds::*;
pub use review::*;
pub use status::*;
pub use sync::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
