//! "First K successes out of M" over concurrent replica calls.
//!
//! Every call is spawned onto a [`JoinSet`]; the waiting task is the only
//! one that touches the result list. Once K successes arrive, or the quorum
//! becomes impossible, or the deadline passes, the remaining calls are
//! aborted.

use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinSet;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuorumError {
    /// Too many calls failed for `needed` successes to still be possible.
    #[error("quorum not reached: needed {needed}, got {got}")]
    NotReached { needed: usize, got: usize },
    /// The deadline passed before `needed` successes arrived.
    #[error("quorum timed out: needed {needed}, got {got}")]
    Timeout { needed: usize, got: usize },
}

/// Run `calls` concurrently and return the first `needed` successful
/// results, in completion order.
///
/// Failed calls are logged and never counted. Returns exactly `needed`
/// results on success; `needed == 0` succeeds immediately with nothing.
pub async fn await_quorum<T, E, F>(
    calls: Vec<F>,
    needed: usize,
    deadline: Instant,
) -> Result<Vec<T>, QuorumError>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    if needed == 0 {
        return Ok(Vec::new());
    }
    if needed > calls.len() {
        return Err(QuorumError::NotReached { needed, got: 0 });
    }

    let mut pending = JoinSet::new();
    for call in calls {
        pending.spawn(call);
    }

    let mut results = Vec::with_capacity(needed);
    while results.len() < needed {
        match tokio::time::timeout_at(deadline, pending.join_next()).await {
            Ok(Some(Ok(Ok(value)))) => results.push(value),
            Ok(Some(Ok(Err(e)))) => {
                tracing::debug!("quorum member failed: {}", e);
            }
            Ok(Some(Err(join_err))) => {
                tracing::warn!("quorum member task did not complete: {}", join_err);
            }
            Ok(None) => {
                return Err(QuorumError::NotReached {
                    needed,
                    got: results.len(),
                });
            }
            Err(_elapsed) => {
                return Err(QuorumError::Timeout {
                    needed,
                    got: results.len(),
                });
            }
        }

        if results.len() + pending.len() < needed {
            return Err(QuorumError::NotReached {
                needed,
                got: results.len(),
            });
        }
    }

    pending.abort_all();
    Ok(results)
}
