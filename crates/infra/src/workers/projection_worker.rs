use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use bodega_core::TenantId;
use bodega_events::{EventBus, Subscription, TenantScoped};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stops and joins a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the worker to stop and wait for it.
    ///
    /// Messages already queued on the subscription are drained first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(worker = self.name, "projection worker panicked");
            }
        }
    }
}

/// Feeds bus messages into an idempotent handler on a dedicated thread.
///
/// Delivery is at-least-once, so handlers must tolerate redelivery; the
/// movement journal and product catalog do through their stream cursors.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// `tenant_id` pins the worker to one tenant; other tenants' messages
    /// are dropped.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let subscription: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(name, subscription, shutdown_rx, tenant_id, &mut handler))?;

        debug!(worker = name, "projection worker started");
        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn run<M, H, E>(
    name: &'static str,
    subscription: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    M: TenantScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    let mut handle = |msg: M| {
        if tenant_id.is_some_and(|t| msg.tenant_id() != t) {
            return;
        }
        if let Err(err) = handler(msg) {
            warn!(worker = name, error = %err, "projection worker handler failed");
        }
    };

    loop {
        if shutdown_rx.try_recv().is_ok() {
            while let Ok(msg) = subscription.try_recv() {
                handle(msg);
            }
            break;
        }

        match subscription.recv_timeout(POLL_INTERVAL) {
            Ok(msg) => handle(msg),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "projection worker stopped");
}
