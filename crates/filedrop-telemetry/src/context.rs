//! Process-level span carrying the build identifier.

use tracing::Span;

use crate::init::build_sha;

/// Span wrapping the daemon's lifetime; fields attach to every event inside it.
#[must_use]
pub fn daemon_span() -> Span {
    tracing::info_span!("filedrop", build_sha = %build_sha(), pid = std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_span_can_be_entered_without_subscriber() {
        let span = daemon_span();
        let _entered = span.enter();
        assert_eq!(build_sha(), "dev");
    }
}
