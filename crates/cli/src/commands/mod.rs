//! Command implementations.

mod info;
mod run;
mod stream;
mod validate;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

pub use info::run_info;
pub use run::run_acquisition;
pub use stream::run_stream;
pub use validate::run_validate;

/// Duration given in seconds on the command line
pub(crate) fn seconds(name: &str, value: f64) -> Result<Duration> {
    let duration = Duration::try_from_secs_f64(value)
        .with_context(|| format!("invalid {name}: {value} s"))?;
    if duration.is_zero() {
        anyhow::bail!("{name} must be positive");
    }
    Ok(duration)
}

/// Resolves on Ctrl+C or SIGTERM
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds() {
        assert_eq!(seconds("duration", 1.5).unwrap(), Duration::from_millis(1500));
        assert!(seconds("duration", 0.0).is_err());
        assert!(seconds("duration", -1.0).is_err());
        assert!(seconds("duration", f64::NAN).is_err());
    }
}
