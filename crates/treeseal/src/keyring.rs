//! Wrapping and unwrapping the data key across every master key

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use treeseal_core::{timestamp, BackendError, TreesealError, TreesealResult};
use treeseal_crypto::DataKey;
use treeseal_keys::{Backends, KeyKind, KeySource, MasterKey};
use zeroize::Zeroizing;

use crate::engine::EngineConfig;

/// A master key that could not wrap the data key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFailure {
    pub kind: KeyKind,
    pub identifier: String,
    pub error: BackendError,
}

pub(crate) async fn call_with_timeout<T, F>(
    timeout: Option<Duration>,
    call: F,
) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| BackendError::Unavailable(format!("no response within {limit:?}")))?,
        None => call.await,
    }
}

/// Wrap `data_key` under every key of every source, concurrently.
///
/// Returns the sources with wrapped blobs filled in, minus failed keys and
/// minus sources left empty, plus one [`KeyFailure`] per failed key.
pub(crate) async fn wrap_all(
    backends: &Backends,
    sources: &[KeySource],
    data_key: &DataKey,
    config: &EngineConfig,
) -> TreesealResult<(Vec<KeySource>, Vec<KeyFailure>)> {
    let mut slots: Vec<Vec<Option<Result<String, BackendError>>>> =
        sources.iter().map(|s| vec![None; s.keys.len()]).collect();

    let targets = sources.iter().enumerate().flat_map(|(s, source)| {
        source
            .keys
            .iter()
            .enumerate()
            .map(move |(k, key)| (s, k, key))
    });

    let results: Vec<_> = stream::iter(targets)
        .map(|(s, k, key)| async move {
            let result =
                call_with_timeout(config.timeout, key.wrap_data_key(backends, data_key)).await;
            (s, k, result)
        })
        .buffer_unordered(config.max_concurrency.max(1))
        .collect()
        .await;

    for (s, k, result) in results {
        slots[s][k] = Some(result);
    }

    let wrapped_at = timestamp::now();
    let mut wrapped_sources = Vec::with_capacity(sources.len());
    let mut failures = Vec::new();

    for (source, source_slots) in sources.iter().zip(slots) {
        let mut wrapped = KeySource::new(source.kind);
        for (key, slot) in source.keys.iter().zip(source_slots) {
            match slot {
                Some(Ok(blob)) => {
                    let mut key = key.clone();
                    key.set_wrapped(blob, wrapped_at);
                    tracing::debug!(key = %key, "wrapped data key");
                    wrapped.keys.push(key);
                }
                Some(Err(error)) => {
                    tracing::warn!(
                        key = %key,
                        error = %error,
                        "master key failed to wrap data key, omitting it"
                    );
                    failures.push(KeyFailure {
                        kind: key.kind(),
                        identifier: key.identifier().to_owned(),
                        error,
                    });
                }
                None => {}
            }
        }
        if !wrapped.is_empty() {
            wrapped_sources.push(wrapped);
        }
    }

    if wrapped_sources.is_empty() {
        return Err(TreesealError::NoKeyAvailable {
            action: "wrap",
            attempts: failures.len(),
            last: failures.last().map(|f| f.error.clone()),
        });
    }

    tracing::info!(
        wrapped = wrapped_sources.iter().map(|s| s.keys.len()).sum::<usize>(),
        failed = failures.len(),
        "data key wrapped"
    );
    Ok((wrapped_sources, failures))
}

/// Recover the data key from the first master key, in persisted order, that
/// can unwrap it.
///
/// Up to `max_concurrency` attempts are in flight, but results are consumed
/// in order. Returning drops the stream, cancelling attempts still running.
pub(crate) async fn unwrap_first(
    backends: &Backends,
    sources: &[KeySource],
    config: &EngineConfig,
) -> TreesealResult<(Zeroizing<Vec<u8>>, MasterKey)> {
    let keys: Vec<&MasterKey> = sources.iter().flat_map(|s| s.keys.iter()).collect();
    let attempts = keys.len();

    let mut results = std::pin::pin!(stream::iter(keys)
        .map(|key| async move {
            let result = call_with_timeout(config.timeout, key.unwrap_data_key(backends)).await;
            (key, result)
        })
        .buffered(config.max_concurrency.max(1)));

    let mut last = None;
    while let Some((key, result)) = results.next().await {
        match result {
            Ok(bytes) => {
                tracing::info!(key = %key, "data key recovered");
                return Ok((bytes, key.clone()));
            }
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "master key failed to unwrap data key");
                last = Some(error);
            }
        }
    }

    Err(TreesealError::NoKeyAvailable {
        action: "unwrap",
        attempts,
        last,
    })
}
