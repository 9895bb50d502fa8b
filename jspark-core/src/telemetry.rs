// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Convenience tracing setup for binaries embedding this crate.
//! This crate itself never calls it: every `tracing::{debug,info,warn,error}` call made by
//! the dispatcher, inbox, and outbox is inert until some subscriber is installed, so the
//! embedding application stays in control of whether (and how) it logs.

/// Installs a global, compact, single-line `tracing` subscriber reading its level from the
/// `RUST_LOG` environment variable (falling back to `level` when unset). Intended for
/// binaries embedding this crate that haven't already installed a subscriber of their own --
/// calling this twice in the same process returns an error rather than panicking.
///
/// # Errors
///
/// Returns a [`miette::Report`] if a global subscriber has already been installed.
pub fn init_tracing(level: tracing::Level) -> miette::Result<()> {
    use miette::IntoDiagnostic;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_second_install_in_the_same_process_errors_instead_of_panicking() {
        // The first call may or may not win the race for the process-global default,
        // depending on test execution order; the second call here never can.
        let _ = init_tracing(tracing::Level::INFO);
        assert!(init_tracing(tracing::Level::INFO).is_err());
    }
}
