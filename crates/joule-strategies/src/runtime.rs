//! Uniform start/stop runtime for reconciliation loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, info};

use crate::error::Result;

/// Base tick between reconcile passes.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// One reconcile pass of a strategy. Errors are logged by the runtime and
/// swallowed; the loop retries next tick.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Runs one pass.
    async fn reconcile(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
}

struct Inner {
    initialized: bool,
    tx: mpsc::Sender<Command>,
    rx: Option<mpsc::Receiver<Command>>,
}

/// Named reconciliation loop with idempotent start/stop.
///
/// The background task is spawned lazily on the first `start`. Commands
/// travel over a bounded(1) channel — the closest tokio equivalent of a
/// rendezvous channel — and are drained non-blockingly at every tick, so a
/// tick never waits on an external start/stop and a command never waits
/// longer than one tick to take effect. Stop gates execution; it does not
/// cancel an in-flight reconcile.
pub struct StrategyRuntime {
    name: String,
    tick: Duration,
    reconciler: Arc<dyn Reconciler>,
    inner: tokio::sync::Mutex<Inner>,
    running: Arc<AtomicBool>,
}

impl StrategyRuntime {
    /// Creates a runtime with the default one-second tick.
    #[must_use]
    pub fn new(name: impl Into<String>, reconciler: Arc<dyn Reconciler>) -> Self {
        Self::with_tick(name, reconciler, DEFAULT_TICK)
    }

    /// Creates a runtime with a custom tick.
    #[must_use]
    pub fn with_tick(
        name: impl Into<String>,
        reconciler: Arc<dyn Reconciler>,
        tick: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            name: name.into(),
            tick,
            reconciler,
            inner: tokio::sync::Mutex::new(Inner {
                initialized: false,
                tx,
                rx: Some(rx),
            }),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The strategy's name, used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enables the loop, spawning the background task on first use.
    ///
    /// # Panics
    ///
    /// Panics if the command channel is closed, which means the background
    /// task died — a programming error recovered by process restart.
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        info!(strategy = %self.name, "starting strategy");
        if !inner.initialized {
            inner.initialized = true;
            let rx = inner.rx.take().expect("command receiver taken once");
            self.spawn_loop(rx);
        }
        inner
            .tx
            .send(Command::Start)
            .await
            .expect("strategy command channel closed");
        self.running.store(true, Ordering::SeqCst);
    }

    /// Disables the loop. The current reconcile, if any, completes.
    ///
    /// # Panics
    ///
    /// Panics if the command channel is closed, as with [`Self::start`].
    pub async fn stop(&self) {
        let inner = self.inner.lock().await;
        debug!(strategy = %self.name, "stopping strategy");
        if !inner.initialized {
            // Never started; nothing is listening and nothing runs.
            return;
        }
        inner
            .tx
            .send(Command::Stop)
            .await
            .expect("strategy command channel closed");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the loop is logically enabled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn spawn_loop(&self, mut rx: mpsc::Receiver<Command>) {
        let name = self.name.clone();
        let tick = self.tick;
        let reconciler = Arc::clone(&self.reconciler);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut run = false;
            loop {
                match rx.try_recv() {
                    Ok(Command::Start) => run = true,
                    Ok(Command::Stop) => run = false,
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => {
                        info!(strategy = %name, "command channel closed");
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
                if run {
                    if let Err(e) = reconciler.reconcile().await {
                        error!(strategy = %name, error = %e, "error while reconciling");
                    }
                }
                tokio::time::sleep(tick).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingReconciler {
        count: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Reconciler for CountingReconciler {
        async fn reconcile(&self) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::StrategyError::MissingCoreCount {
                    node: "node-a".into(),
                });
            }
            Ok(())
        }
    }

    fn counting(fail: bool) -> Arc<CountingReconciler> {
        Arc::new(CountingReconciler {
            count: AtomicU32::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn start_enables_reconciles() {
        let reconciler = counting(false);
        let runtime =
            StrategyRuntime::with_tick("test", reconciler.clone(), Duration::from_millis(5));

        assert!(!runtime.is_running());
        runtime.start().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(runtime.is_running());
        assert!(reconciler.count.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn stop_gates_execution() {
        let reconciler = counting(false);
        let runtime =
            StrategyRuntime::with_tick("test", reconciler.clone(), Duration::from_millis(5));

        runtime.start().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        runtime.stop().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!runtime.is_running());
        let frozen = reconciler.count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(reconciler.count.load(Ordering::SeqCst), frozen);
    }

    #[tokio::test]
    async fn restart_resumes() {
        let reconciler = counting(false);
        let runtime =
            StrategyRuntime::with_tick("test", reconciler.clone(), Duration::from_millis(5));

        runtime.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        runtime.stop().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let frozen = reconciler.count.load(Ordering::SeqCst);

        runtime.start().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(reconciler.count.load(Ordering::SeqCst) > frozen);
    }

    #[tokio::test]
    async fn reconcile_errors_do_not_kill_the_loop() {
        let reconciler = counting(true);
        let runtime =
            StrategyRuntime::with_tick("test", reconciler.clone(), Duration::from_millis(5));

        runtime.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(runtime.is_running());
        assert!(reconciler.count.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let runtime = StrategyRuntime::with_tick("test", counting(false), Duration::from_millis(5));
        runtime.stop().await;
        assert!(!runtime.is_running());
    }
}
