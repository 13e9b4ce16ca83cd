//! Cargo-style status output for blocksync
//!
//! ```text
//!     Scanned 12 files (37 blocks, 1.20 MiB)
//!    Uploaded notes.md
//!  Downloaded report.pdf
//!    Conflict draft.txt (took remote version)
//!      Synced 3 files in 42ms (up 12.00 KiB, down 1.10 MiB)
//! ```

use std::io::Write as _;
use std::time::Instant;

use blocksync_core::SyncReport;

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const SCANNED: &str = "Scanned";
    const UPLOADED: &str = "Uploaded";
    const DOWNLOADED: &str = "Downloaded";
    const DELETED: &str = "Deleted";
    const REMOVED: &str = "Removed";
    const CONFLICT: &str = "Conflict";
    const SYNCED: &str = "Synced";
    const FRESH: &str = "Fresh";
}

/// Print a cargo-style status line
pub fn print_status(status: &str, message: &str) {
    print_styled(console::Style::new().green().bold(), status, message);
}

fn print_warning(status: &str, message: &str) {
    print_styled(console::Style::new().yellow().bold(), status, message);
}

fn print_styled(style: console::Style, status: &str, message: &str) {
    let mut term = console::Term::stderr();
    let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
}

fn size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Summary line for `blocksync scan`
pub fn scanned(files: usize, blocks: usize, bytes: u64) {
    print_status(
        Status::SCANNED,
        &format!("{files} files ({blocks} blocks, {})", size(bytes)),
    );
}

/// Timer for one sync pass
pub struct SyncProgress {
    start: Instant,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Print one line per touched file, then the totals
    pub fn finish(&self, report: &SyncReport) {
        for name in &report.uploaded {
            print_status(Status::UPLOADED, name);
        }
        for name in &report.tombstoned {
            print_status(Status::DELETED, &format!("{name} (remote)"));
        }
        for name in &report.downloaded {
            print_status(Status::DOWNLOADED, name);
        }
        for name in &report.deleted_locally {
            print_status(Status::REMOVED, name);
        }
        for name in &report.conflicts {
            print_warning(Status::CONFLICT, &format!("{name} (took remote version)"));
        }

        let elapsed = self.start.elapsed();
        let elapsed_str = if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        };

        if report.is_noop() {
            print_status(Status::FRESH, &format!("everything up to date ({elapsed_str})"));
            return;
        }

        let touched = report.uploaded.len()
            + report.tombstoned.len()
            + report.downloaded.len()
            + report.deleted_locally.len();
        print_status(
            Status::SYNCED,
            &format!(
                "{touched} files in {elapsed_str} (up {}, down {})",
                size(report.bytes_uploaded),
                size(report.bytes_downloaded)
            ),
        );
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}
