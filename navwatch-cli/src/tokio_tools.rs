//! Run the async commands from a sync main and stop them on a signal.

use std::future::Future;

use log::info;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::CliError;

/// run async function inside tokio instance on current thread
pub fn run_in_tokio<F, T>(my_function: F) -> F::Output
where
    F: Future<Output = Result<T, CliError>>,
{
    info!("starting Tokio");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(my_function)
}

/// Resolve when `ct` is cancelled or the process is asked to stop. Cancels `ct` on the way
/// out so everything sharing it winds down.
pub async fn wait_for_shutdown(ct: CancellationToken) -> Result<(), CliError> {
    let mut sig_terminate = signal(SignalKind::terminate())?;
    let mut sig_quit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = ct.cancelled() => {
            info!("Received Cancellation token");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c signal");
        },
        _ = sig_terminate.recv() => {
            info!("Received TERM signal");
        },
        _ = sig_quit.recv() => {
            info!("Received QUIT signal");
        },
    }
    ct.cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_in_tokio_returns_value() {
        let value = run_in_tokio(async { Ok::<_, CliError>(7) }).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_run_in_tokio_propagates_error() {
        let result = run_in_tokio(async { Err::<(), _>(CliError::Invalid("bad".to_owned())) });
        assert!(matches!(result, Err(CliError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_wait_for_cancelled_token() {
        let ct = CancellationToken::new();
        let child = ct.child_token();
        ct.cancel();
        wait_for_shutdown(ct).await.unwrap();
        assert!(child.is_cancelled());
    }
}
