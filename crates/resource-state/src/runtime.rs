use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::backoff::{BackoffStrategy, ExponentialBackoffStrategy};
use crate::controller::{Activity, Controller, ControllerRuntime};
use crate::event::EventQueue;
use crate::store::State;
use crate::Context;

/// Runs a set of controllers against a shared [`State`].
///
/// Each controller gets its own event queue fed by watches on its inputs.
/// A controller that returns an error is restarted with exponential
/// backoff; a controller that returns `Ok` is considered finished.
pub struct Runtime {
    state: State,
    controllers: Vec<Arc<dyn Controller>>,
    backoff: ExponentialBackoffStrategy,
}

impl Runtime {
    /// A runtime with no controllers.
    pub fn new(state: State) -> Self {
        Runtime {
            state,
            controllers: Vec::new(),
            backoff: ExponentialBackoffStrategy::default(),
        }
    }

    /// Overrides the restart backoff.
    pub fn with_backoff(mut self, backoff: ExponentialBackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Registers a controller. Names must be unique.
    pub fn register(&mut self, controller: impl Controller + 'static) -> anyhow::Result<()> {
        let name = controller.name().to_string();
        if self.controllers.iter().any(|c| c.name() == name) {
            anyhow::bail!("controller {:?} is already registered", name);
        }
        self.controllers.push(Arc::new(controller));
        Ok(())
    }

    /// Names of the registered controllers.
    pub fn controllers(&self) -> Vec<String> {
        self.controllers.iter().map(|c| c.name().to_string()).collect()
    }

    /// Starts every controller and returns a handle to the running set.
    pub fn start(self, ctx: &Context) -> RunningRuntime {
        let activity = Arc::new(Activity::default());
        let mut queues = Vec::new();
        let mut tasks = Vec::new();
        for controller in self.controllers {
            let queue = EventQueue::new();
            queues.push(queue.clone());
            let span = info_span!("controller", controller = %controller.name());
            tasks.push(tokio::spawn(
                run_controller(
                    controller,
                    self.state.clone(),
                    ctx.clone(),
                    queue,
                    activity.clone(),
                    self.backoff.clone(),
                )
                .instrument(span),
            ));
        }
        RunningRuntime {
            activity,
            queues,
            tasks,
        }
    }

    /// Runs every controller until `ctx` is cancelled.
    pub async fn run(self, ctx: &Context) {
        self.start(ctx).join().await
    }
}

/// Handle to controllers started by [`Runtime::start`].
pub struct RunningRuntime {
    activity: Arc<Activity>,
    queues: Vec<EventQueue>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningRuntime {
    fn idle(&self) -> bool {
        self.activity.busy.load(Ordering::SeqCst) == 0 && self.queues.iter().all(EventQueue::is_empty)
    }

    /// Waits until every controller has been idle with no pending events
    /// for `quiet`, or until `timeout` elapses. Returns whether the
    /// controllers settled.
    pub async fn settle(&self, quiet: Duration, timeout: Duration) -> bool {
        let poll = Duration::from_millis(10).min(quiet);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut idle_since: Option<tokio::time::Instant> = None;
        while tokio::time::Instant::now() < deadline {
            if self.idle() {
                let since = *idle_since.get_or_insert_with(tokio::time::Instant::now);
                if since.elapsed() >= quiet {
                    return true;
                }
            } else {
                idle_since = None;
            }
            tokio::time::sleep(poll).await;
        }
        false
    }

    /// Waits for every controller task to finish.
    pub async fn join(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "controller task panicked");
            }
        }
    }
}

async fn run_controller(
    controller: Arc<dyn Controller>,
    state: State,
    ctx: Context,
    queue: EventQueue,
    activity: Arc<Activity>,
    mut backoff: ExponentialBackoffStrategy,
) {
    let name = controller.name().to_string();
    let watch_ctx = ctx.child_token();
    for input in controller.inputs() {
        if let Err(e) = state.watch_into(&watch_ctx, input.selector.clone(), &queue).await {
            if !e.is_cancelled() {
                error!(controller = %name, error = %e, "unable to watch controller input");
            }
            return;
        }
    }

    // The initial snapshot is covered by the first reconcile.
    while queue.try_recv().is_some() {}

    loop {
        info!(controller = %name, "starting controller");
        let mut runtime = ControllerRuntime::new(name.clone(), state.clone(), queue.clone(), activity.clone());
        let result = controller.run(&ctx, &mut runtime).await;
        let reconciled = runtime.reconciled();
        drop(runtime);
        match result {
            Ok(()) => {
                info!(controller = %name, "controller finished");
                break;
            }
            Err(e) if ctx.is_cancelled() => {
                warn!(controller = %name, error = %e, "controller failed during shutdown");
                break;
            }
            Err(e) => {
                let message = format!("{:#}", e);
                let delay = restart_delay(&mut backoff, reconciled);
                error!(controller = %name, error = %message, "controller failed, restarting in {:?}", delay);
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    watch_ctx.cancel();
}

/// A run that completed at least one reconcile counts as a success, so the
/// backoff starts over.
fn restart_delay<B: BackoffStrategy>(backoff: &mut B, reconciled: bool) -> Duration {
    if reconciled {
        backoff.reset();
    }
    backoff.next_duration()
}
