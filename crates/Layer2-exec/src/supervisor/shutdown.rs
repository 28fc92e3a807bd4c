//! Termination signal and panic hooks

use std::sync::{Arc, Weak};
use tracing::{error, info};

/// Resolves on the first termination signal and returns its name
///
/// Ctrl-C everywhere; SIGTERM, SIGHUP and SIGQUIT on Unix.
pub async fn wait_for_termination() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut term, mut hup, mut quit) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
            signal(SignalKind::quit()),
        ) {
            (Ok(term), Ok(hup), Ok(quit)) => (term, hup, quit),
            _ => {
                error!("Failed to install unix signal handlers, listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return "SIGINT";
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
            _ = hup.recv() => "SIGHUP",
            _ = quit.recv() => "SIGQUIT",
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

/// Run `teardown` when any thread panics, then the previous hook
///
/// Only a weak reference is held so the hook never keeps its target alive.
pub(crate) fn install_panic_hook<T, F>(target: &Arc<T>, teardown: F)
where
    T: Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    let weak: Weak<T> = Arc::downgrade(target);
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        if let Some(target) = weak.upgrade() {
            error!(%panic_info, "Panic, tearing down child processes");
            teardown(&target);
        }
        previous(panic_info);
    }));

    info!("Panic hook installed");
}
