//! Progress messages for interactive runs

use std::io::Write;

/// Prints status lines to stdout when enabled
///
/// Every message is also logged, so non-interactive runs still leave a trace
/// in the log file.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusPrinter {
    enabled: bool,
}

impl StatusPrinter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn print(&self, message: &str) {
        tracing::info!("{}", message);
        if self.enabled {
            let mut out = std::io::stdout().lock();
            // stdout going away is not worth failing a migration over
            let _ = writeln!(out, "{}", message);
            let _ = out.flush();
        }
    }
}
