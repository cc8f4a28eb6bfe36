//! operation/bridge.rs
//!
//! Uniform awaitable over a socket call that is either ready on its first
//! poll (completed inline, on the calling task) or completes later when the
//! reactor wakes us, possibly on another worker thread.
//!
//! Cancellation and the deadline are raced against the call; whichever is
//! observed first decides the result. Losing branches are dropped, which for
//! readiness-driven tokio I/O means no bytes move after that point. Buffers
//! stay owned by the caller's token, so they are returned exactly once no
//! matter which branch won.

use std::future::{Future, poll_fn};
use std::io;
use std::pin::pin;

use tokio::time;
use tracing::trace;

use super::token::Signals;
use crate::errors::EngineError;

// -----------------------------------------------------------------------------
// ----- Completed -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Ready on the first poll; no wakeup was needed.
    Inline,
    /// Parked at least once and resumed by the reactor.
    Deferred,
}

#[derive(Debug)]
pub struct Completed<T> {
    pub value: T,
    pub completion: Completion,
}

// -----------------------------------------------------------------------------
// ----- Bridge ----------------------------------------------------------------

pub async fn start<T, F>(signals: Signals, io: F) -> Result<Completed<T>, EngineError>
where
    F: Future<Output = io::Result<T>>,
{
    let kind = signals.kind;

    let cancelled = async {
        match &signals.cancel {
            Some(cancel) => cancel.cancelled().await,
            None => std::future::pending().await,
        }
    };

    let guarded = async {
        match signals.deadline {
            Some(after) => time::timeout(after, observe(io))
                .await
                .map_err(|_| EngineError::Timeout {
                    operation: kind,
                    after,
                }),
            None => Ok(observe(io).await),
        }
    };

    let (outcome, completion) = tokio::select! {
        biased;

        _ = cancelled => {
            trace!("{kind} cancelled");
            return Err(EngineError::Cancelled { operation: kind });
        }

        guarded = guarded => guarded?,
    };

    trace!("{kind} completed {completion:?}");

    let value = outcome.map_err(EngineError::transport(kind))?;
    Ok(Completed { value, completion })
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn observe<T, F>(io: F) -> (io::Result<T>, Completion)
where
    F: Future<Output = io::Result<T>>,
{
    let mut io = pin!(io);
    let mut polls = 0usize;

    let outcome = poll_fn(|cx| {
        polls += 1;
        io.as_mut().poll(cx)
    })
    .await;

    let completion = if polls == 1 {
        Completion::Inline
    } else {
        Completion::Deferred
    };

    (outcome, completion)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::operation::OperationKind;
    use crate::pool::BufferPool;

    #[tokio::test]
    async fn ready_call_completes_inline() {
        let done = start(Signals::new(OperationKind::Send), async { Ok(7usize) })
            .await
            .unwrap();
        assert_eq!(done.value, 7);
        assert_eq!(done.completion, Completion::Inline);
    }

    #[tokio::test]
    async fn parked_call_completes_deferred() {
        let done = start(Signals::new(OperationKind::Receive), async {
            time::sleep(Duration::from_millis(5)).await;
            Ok(3usize)
        })
        .await
        .unwrap();
        assert_eq!(done.value, 3);
        assert_eq!(done.completion, Completion::Deferred);
    }

    #[tokio::test]
    async fn io_error_becomes_transport_error() {
        let err = start(Signals::new(OperationKind::Connect), async {
            Err::<(), _>(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Transport {
                operation: OperationKind::Connect,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn deadline_fires_before_completion() {
        let signals =
            Signals::new(OperationKind::Receive).with_deadline(Some(Duration::from_millis(10)));
        let err = start(signals, std::future::pending::<io::Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn pre_cancelled_operation_is_never_polled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let polled = Arc::new(AtomicBool::new(false));
        let flag = polled.clone();

        let signals = Signals::new(OperationKind::Accept).with_cancel(cancel);
        let err = start(signals, async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Cancelled { .. }));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_racing_a_pending_call_returns_the_lease_once() {
        let pool = BufferPool::new(64, 1024, 4);
        let mut lease = pool.rent_filled(64);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let signals = Signals::new(OperationKind::Receive).with_cancel(cancel);
        let err = start(signals, async {
            time::sleep(Duration::from_secs(30)).await;
            lease[0] = 1;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));

        drop(lease);
        let stats = pool.stats();
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.outstanding, 0);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
