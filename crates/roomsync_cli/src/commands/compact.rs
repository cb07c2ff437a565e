//! Compact command implementation.

use super::{format_size, open_account};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let account = open_account(path)?;

    println!("Compacting account cache at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let before = (
        account.state().stats().log_bytes,
        account.index().stats().log_bytes,
    );
    println!("  State log before: {}", format_size(before.0));
    println!("  Index log before: {}", format_size(before.1));

    if !dry_run {
        account.compact()?;
        let after = (
            account.state().stats().log_bytes,
            account.index().stats().log_bytes,
        );
        println!("  State log after:  {}", format_size(after.0));
        println!("  Index log after:  {}", format_size(after.1));
        let total_before = before.0 + before.1;
        let total_after = after.0 + after.1;
        println!(
            "  Space saved: {} ({:.1}%)",
            format_size(total_before.saturating_sub(total_after)),
            if total_before > 0 {
                (total_before.saturating_sub(total_after) as f64 / total_before as f64) * 100.0
            } else {
                0.0
            }
        );
        println!("✓ Compaction complete");
    }

    account.close()?;
    Ok(())
}
