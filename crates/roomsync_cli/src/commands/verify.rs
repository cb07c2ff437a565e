//! Verify command implementation.

use roomsync_store::{verify_dir, VerifyReport};
use std::path::Path;

/// Runs the verify command.
///
/// Works on a copy of the logs, so it is safe while a session holds the
/// account open.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying account cache at {:?}", path);
    println!();

    let report = verify_dir(path)?;
    print_report(&report);

    println!();
    if report.is_clean() {
        println!("✓ Account cache verification passed");
        Ok(())
    } else {
        println!("✗ Account cache verification failed");
        Err("Verification failed".into())
    }
}

fn print_report(report: &VerifyReport) {
    print_log("State log", report.state_frames, report.state_error.as_deref());
    print_log("Index log", report.index_frames, report.index_error.as_deref());
    println!();
    println!("Replayed contents:");
    println!("  Rooms:           {}", report.store.rooms);
    println!("  State events:    {}", report.store.state_events);
    println!("  Timeline events: {}", report.store.timeline_events);
    println!("  Indexed members: {}", report.members.entries);
}

fn print_log(name: &str, frames: usize, error: Option<&str>) {
    println!("  {} frames: {}", name, frames);
    if let Some(error) = error {
        println!("    ERROR: {} (tail would be truncated on next open)", error);
    }
}
