//! C5 — Control Loop. Drives the reconciler (C4) in response to watch
//! events and the materializer (C3) on a periodic timer (spec §4.5). Two
//! cooperative tasks under one supervisor; a single-flight reconciler
//! ensures overlapping triggers cannot produce interleaved writes for the
//! same shard (spec §5).

use crate::materializer::DefaultItemMaterializer;
use crate::mapper::ShardMapper;
use crate::model::WATCHED_KINDS;
use crate::store::UpsfStore;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

const WATCH_BACKOFF: Duration = Duration::from_secs(1);

/// Ensures at most one [`ShardMapper::reconcile`] sweep runs at a time.
/// `tokio::sync::Mutex` is a suspension point, not a busy-wait: a second
/// trigger simply waits for the in-flight sweep to finish before starting
/// its own (spec §5's single-flight requirement; later-queued triggers
/// still observe a fresh snapshot, so no signal is lost).
struct SingleFlightMapper {
    mapper: ShardMapper,
    lock: Mutex<()>,
}

impl SingleFlightMapper {
    async fn reconcile(&self) -> Result<(), crate::error::StoreError> {
        let _guard = self.lock.lock().await;
        self.mapper.reconcile().await
    }
}

pub struct ControlLoop {
    store: Arc<dyn UpsfStore>,
    mapper: Arc<SingleFlightMapper>,
    materializer: Arc<DefaultItemMaterializer>,
    registration_interval: Duration,
    auto_register: bool,
}

impl ControlLoop {
    pub fn new(
        store: Arc<dyn UpsfStore>,
        mapper: ShardMapper,
        materializer: DefaultItemMaterializer,
        registration_interval: Duration,
        auto_register: bool,
    ) -> Self {
        ControlLoop {
            store,
            mapper: Arc::new(SingleFlightMapper {
                mapper,
                lock: Mutex::new(()),
            }),
            materializer: Arc::new(materializer),
            registration_interval,
            auto_register,
        }
    }

    /// Runs both responsibilities until `shutdown` resolves. An initial
    /// sweep runs before either task starts (spec §4.4 "once at startup").
    ///
    /// The watch and timer loops run as spawned tasks racing only their
    /// *wait-for-next-trigger* points against a stop signal; a reconcile or
    /// materialize call, once started, is a plain unraced `.await` and is
    /// never dropped out from under itself. On shutdown this function joins
    /// both tasks rather than aborting them, so a sweep already in flight
    /// when `shutdown` resolves still runs to completion (spec §5
    /// Cancellation item 3) instead of being cancelled mid-write. This
    /// mirrors how `automations::server`'s task-polling loop stops
    /// dequeuing new work on shutdown but still waits out already-running
    /// work via its semaphore before returning.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        if let Err(err) = self.materializer.materialize().await {
            tracing::error!(error = %err, "initial materialization failed");
        }
        if let Err(err) = self.mapper.reconcile().await {
            tracing::error!(error = %err, "initial reconciliation failed");
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        let watch_handle = tokio::spawn(Self::run_watch_loop(
            self.store.clone(),
            self.mapper.clone(),
            stop_rx.clone(),
        ));
        let timer_handle = tokio::spawn(Self::run_timer_loop(
            self.materializer.clone(),
            self.registration_interval,
            self.auto_register,
            stop_rx,
        ));

        shutdown.await;
        tracing::info!("stop requested, draining in-flight work before shutdown");
        let _ = stop_tx.send(true);

        if let Err(err) = watch_handle.await {
            tracing::error!(error = %err, "watch loop task panicked");
        }
        if let Err(err) = timer_handle.await {
            tracing::error!(error = %err, "timer loop task panicked");
        }
    }

    /// Resolves immediately if `stop` is already set, otherwise waits for
    /// it to become set. Used in `select!` arms so a stop signal observed
    /// between two calls is never missed (`watch::Receiver::changed` alone
    /// only fires once per transition).
    async fn wait_stop(stop: &mut watch::Receiver<bool>) {
        if *stop.borrow() {
            return;
        }
        let _ = stop.changed().await;
    }

    async fn run_watch_loop(
        store: Arc<dyn UpsfStore>,
        mapper: Arc<SingleFlightMapper>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            if *stop.borrow() {
                return;
            }

            let mut stream = tokio::select! {
                result = store.watch(&WATCHED_KINDS) => match result {
                    Ok(stream) => stream,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to subscribe to watch stream, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(WATCH_BACKOFF) => {}
                            _ = Self::wait_stop(&mut stop) => return,
                        }
                        continue;
                    }
                },
                _ = Self::wait_stop(&mut stop) => return,
            };

            loop {
                let next = tokio::select! {
                    item = stream.next() => item,
                    _ = Self::wait_stop(&mut stop) => return,
                };
                match next {
                    Some(Ok(event)) => {
                        tracing::debug!(kind = ?event.kind, name = %event.name, "item notification received");
                        // Unraced: once a sweep starts it always finishes,
                        // even if shutdown fires mid-sweep.
                        if let Err(err) = mapper.reconcile().await {
                            tracing::error!(error = %err, "reconciliation sweep failed");
                        }
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "watch stream error, resubscribing");
                        break;
                    }
                    None => {
                        tracing::warn!("watch stream terminated, resubscribing");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(WATCH_BACKOFF) => {}
                _ = Self::wait_stop(&mut stop) => return,
            }
        }
    }

    async fn run_timer_loop(
        materializer: Arc<DefaultItemMaterializer>,
        interval: Duration,
        enabled: bool,
        mut stop: watch::Receiver<bool>,
    ) {
        if !enabled {
            Self::wait_stop(&mut stop).await;
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; the initial sweep in `run` already covered it
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = Self::wait_stop(&mut stop) => return,
            }
            // Unraced: runs to completion even if shutdown fires mid-sweep.
            if let Err(err) = materializer.materialize().await {
                tracing::error!(error = %err, "periodic materialization failed");
            }
        }
    }
}
