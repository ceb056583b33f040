//! Progress reporting for long pipeline stages
//!
//! Fire-and-forget status strings; the sink never reports back.

/// Append-only channel for human-readable status updates.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, message: &str);
}

/// Prints status lines to stderr, keeping stdout free for the final snippet.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn progress(&self, message: &str) {
        eprintln!("  {}", message);
    }
}

/// Discards all updates. Used by tests and embedders that render elsewhere.
#[derive(Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn progress(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_sink_accepts_messages() {
        let sink = SilentProgress;
        sink.progress("Reviewing code...");
    }
}
