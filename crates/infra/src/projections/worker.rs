use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use cellarledger_events::{EventBus, EventEnvelope, Projection, ProjectionError, ProjectionRunner, Subscription};
use cellarledger_warehouse::{Change, LedgerError};

use crate::journal::Journal;
use crate::store::{ChangeEnvelope, LedgerStore};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("loading history: {0}")]
    History(#[from] LedgerError),

    #[error("projection {name} cannot catch up: {gap:?}")]
    CatchUp {
        name: &'static str,
        gap: ProjectionError,
    },

    #[error("projection runner lock poisoned")]
    Poisoned,

    #[error("spawning worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Handle to stop and join a background projection worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Feeds a bus subscription into a shared projection runner.
///
/// Readers lock the runner to query the read model, which lags the ledger by
/// however many envelopes are still queued.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    pub fn spawn<P>(
        name: &'static str,
        subscription: Subscription<EventEnvelope<P::Ev>>,
        runner: Arc<Mutex<ProjectionRunner<P>>>,
    ) -> io::Result<WorkerHandle>
    where
        P: Projection + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, subscription, shutdown_rx, runner))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Bring `runner` up to date with everything `store` has journaled, then
    /// follow its bus.
    ///
    /// The subscription is taken before the journal is read, so a commit that
    /// lands in between arrives twice and the runner skips the repeat.
    pub fn attach<P, J, B>(
        name: &'static str,
        store: &LedgerStore<J, B>,
        runner: Arc<Mutex<ProjectionRunner<P>>>,
    ) -> Result<WorkerHandle, WorkerError>
    where
        P: Projection<Ev = Change> + Send + 'static,
        J: Journal,
        B: EventBus<ChangeEnvelope>,
    {
        let subscription = store.bus().subscribe();
        let history = store.envelopes()?;
        {
            let mut runner = runner.lock().map_err(|_| WorkerError::Poisoned)?;
            runner
                .run(&history)
                .map_err(|gap| WorkerError::CatchUp { name, gap })?;
            tracing::info!(
                worker = name,
                envelopes = history.len(),
                cursor = runner.cursor().map(|c| c.last_sequence_number()),
                "projection caught up from journal"
            );
        }
        Ok(Self::spawn(name, subscription, runner)?)
    }
}

fn worker_loop<P>(
    name: &'static str,
    subscription: Subscription<EventEnvelope<P::Ev>>,
    shutdown_rx: mpsc::Receiver<()>,
    runner: Arc<Mutex<ProjectionRunner<P>>>,
) where
    P: Projection,
{
    let tick = Duration::from_millis(50);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(envelope) => {
                let Ok(mut runner) = runner.lock() else {
                    tracing::error!(worker = name, "projection runner lock poisoned; stopping");
                    break;
                };
                if let Err(err) = runner.apply(&envelope) {
                    tracing::warn!(worker = name, error = ?err, "projection worker could not apply envelope");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
