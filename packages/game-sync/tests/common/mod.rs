#![allow(dead_code)]

pub mod proptest_prelude;

use std::future::Future;
use std::time::Duration;

use game_sync::{BackoffPolicy, SyncConfig};
use tokio::sync::watch;

// Logging is auto-installed for every test binary that declares `mod common;`
#[ctor::ctor]
fn init_logging() {
    sync_test_support::logging::init();
}

const WAIT: Duration = Duration::from_secs(10);

/// Config for in-memory tests: short fixed backoff, tight timeouts.
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_ws_url("ws://sync.test/ws")
        .with_backoff(BackoffPolicy::fixed(Duration::from_millis(50)))
        .with_credential_timeout(Duration::from_millis(500))
        .with_handshake_timeout(Duration::from_secs(2))
        .with_slow_sync_threshold(Duration::from_secs(1))
        .with_mutation_confirm_window(Duration::from_secs(3))
}

/// Wait until the watched value satisfies `pred` and return a copy of it.
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, mut pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(WAIT, rx.wait_for(|v| pred(v)))
        .await
        .expect("timed out waiting for watched value")
        .expect("watch sender dropped")
        .clone()
}

/// Poll `cond` until it holds, yielding to other tasks in between.
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) {
    let deadline = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT, deadline)
        .await
        .expect("condition never became true");
}

/// Await `fut` with the standard test timeout.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out")
}
