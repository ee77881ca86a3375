//! Run cancellation on SIGINT and SIGTERM.
//!
//! A cancelled CI job must not leave populate locks behind for workers on
//! other hosts, so the first signal cancels the run instead of killing the
//! process. The orchestrator then stops its toolchains and releases the
//! run's slots before `kiln build` exits.

use kiln_backend::CancelToken;

/// Cancels `token` when the process receives SIGINT or SIGTERM.
///
/// The handlers are registered before this returns; a background thread
/// waits for the signal.
pub fn cancel_on_signal(token: CancelToken) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    #[cfg(unix)]
    let (mut sigterm, mut sigint) = {
        use tokio::signal::unix::{signal, SignalKind};
        let _entered = runtime.enter();
        (signal(SignalKind::terminate())?, signal(SignalKind::interrupt())?)
    };

    std::thread::Builder::new()
        .name("kiln-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                #[cfg(unix)]
                tokio::select! {
                    _ = sigterm.recv() => tracing::warn!("received SIGTERM, cancelling run"),
                    _ = sigint.recv() => tracing::warn!("received SIGINT, cancelling run"),
                }
                #[cfg(not(unix))]
                {
                    if tokio::signal::ctrl_c().await.is_err() {
                        return;
                    }
                    tracing::warn!("received Ctrl-C, cancelling run");
                }
                token.cancel();
            });
        })?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn sigterm_cancels_the_run() {
        let token = CancelToken::new();
        cancel_on_signal(token.clone()).unwrap();
        assert!(!token.is_cancelled());

        // SAFETY: the handler installed above replaces the default action.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while !token.is_cancelled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(token.is_cancelled());
    }
}
