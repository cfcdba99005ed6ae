use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::event::EventQueue;
use crate::metadata::{Kind, Pointer, Selector};
use crate::resource::{Resource, ResourceSpec};
use crate::store::State;
use crate::Context;

/// How a controller depends on an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// Changes trigger a reconcile; the input is only read.
    Weak,
    /// Like `Weak`, but the controller may hold finalizers on the input.
    Strong,
}

/// A resource selection the controller reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Input {
    /// What to watch.
    pub selector: Selector,
    /// Dependency kind.
    pub kind: InputKind,
}

impl Input {
    /// Every resource of type `S`.
    pub fn weak<S: ResourceSpec>() -> Self {
        Input {
            selector: Selector::kind::<S>(),
            kind: InputKind::Weak,
        }
    }

    /// The single resource `id` of type `S`.
    pub fn weak_id<S: ResourceSpec>(id: impl Into<String>) -> Self {
        Input {
            selector: Selector::resource::<S>(id),
            kind: InputKind::Weak,
        }
    }

    /// Every resource of type `S`, with finalizers allowed.
    pub fn strong<S: ResourceSpec>() -> Self {
        Input {
            selector: Selector::kind::<S>(),
            kind: InputKind::Strong,
        }
    }
}

/// A resource type the controller produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Output {
    /// Produced kind.
    pub kind: Kind,
}

impl Output {
    /// Resources of type `S`.
    pub fn of<S: ResourceSpec>() -> Self {
        Output { kind: Kind::of::<S>() }
    }
}

/// A reactive task that watches some resources and produces others.
///
/// `run` is expected to loop on [`ControllerRuntime::event`] and reconcile
/// every time it returns `true`. Re-running a reconcile against unchanged
/// inputs must produce unchanged outputs.
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    /// Unique controller name, also recorded as owner of its outputs.
    fn name(&self) -> &str;

    /// Resources whose changes trigger a reconcile.
    fn inputs(&self) -> Vec<Input>;

    /// Resource types this controller writes.
    fn outputs(&self) -> Vec<Output>;

    /// Runs the controller until `ctx` is cancelled.
    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()>;
}

/// Shared bookkeeping used to decide when all controllers are idle.
#[derive(Debug, Default)]
pub(crate) struct Activity {
    pub(crate) busy: AtomicUsize,
}

/// The store as seen from inside a controller.
///
/// Writes carry the controller name as owner, so a controller can only
/// change its own outputs.
pub struct ControllerRuntime {
    name: String,
    state: State,
    queue: EventQueue,
    activity: Arc<Activity>,
    busy: bool,
    initial: bool,
    reconciled: bool,
}

impl ControllerRuntime {
    pub(crate) fn new(name: String, state: State, queue: EventQueue, activity: Arc<Activity>) -> Self {
        activity.busy.fetch_add(1, Ordering::SeqCst);
        ControllerRuntime {
            name,
            state,
            queue,
            activity,
            busy: true,
            initial: true,
            reconciled: false,
        }
    }

    /// Name of the controller, used as owner.
    pub fn owner(&self) -> &str {
        &self.name
    }

    /// The underlying store, for reads.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Waits for the next reconcile trigger.
    ///
    /// The first call returns immediately. Later calls wait for a change to
    /// any input, then drain every pending change so that a burst of
    /// updates costs a single reconcile. Returns `false` once `ctx` is
    /// cancelled.
    pub async fn event(&mut self, ctx: &Context) -> bool {
        if self.initial {
            self.initial = false;
            return !ctx.is_cancelled();
        }
        self.reconciled = true;
        self.set_busy(false);
        let received = self.queue.recv(ctx).await;
        if received.is_err() {
            return false;
        }
        while self.queue.try_recv().is_some() {}
        self.set_busy(true);
        true
    }

    /// True once a reconcile ran to completion and the controller asked
    /// for the next trigger.
    pub(crate) fn reconciled(&self) -> bool {
        self.reconciled
    }

    fn set_busy(&mut self, busy: bool) {
        if self.busy == busy {
            return;
        }
        self.busy = busy;
        if busy {
            self.activity.busy.fetch_add(1, Ordering::SeqCst);
        } else {
            self.activity.busy.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Reads the resource `id` of type `S`, `None` if absent.
    pub async fn get<S: ResourceSpec>(&self, ctx: &Context, id: &str) -> Result<Option<Resource<S>>> {
        self.state.try_get(ctx, id).await
    }

    /// Lists all resources of type `S`.
    pub async fn list<S: ResourceSpec>(&self, ctx: &Context) -> Result<Vec<Resource<S>>> {
        self.state.list(ctx).await
    }

    /// Creates or updates the output `id` with `f`.
    pub async fn modify<S, F>(&self, ctx: &Context, id: &str, f: F) -> Result<Resource<S>>
    where
        S: ResourceSpec + Default,
        F: FnOnce(&mut Resource<S>),
    {
        let mut template = Resource::new(id, S::default());
        template.metadata_mut().set_owner(self.name.clone());
        self.state.modify(ctx, template, f).await
    }

    /// Records a reconcile error on the output `id`, keeping its last spec.
    pub async fn set_error<S>(&self, ctx: &Context, id: &str, error: impl ToString) -> Result<Resource<S>>
    where
        S: ResourceSpec + Default,
    {
        let message = error.to_string();
        self.modify::<S, _>(ctx, id, move |r| r.metadata_mut().set_error(Some(message)))
            .await
    }

    /// Destroys the output `id` of type `S`. Missing outputs are ignored.
    pub async fn destroy<S: ResourceSpec>(&self, ctx: &Context, id: &str) -> Result<()> {
        match self.state.destroy(ctx, &Pointer::of::<S>(id), &self.name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Destroys every output of type `S` owned by this controller whose id
    /// isn't in `keep`.
    pub async fn cleanup<S: ResourceSpec>(&self, ctx: &Context, keep: &HashSet<String>) -> Result<()> {
        for resource in self.state.list::<S>(ctx).await? {
            let md = resource.metadata();
            if md.owner() != self.name || keep.contains(md.id()) {
                continue;
            }
            debug!(controller = %self.name, resource = %md, "removing stale output");
            self.destroy::<S>(ctx, md.id()).await?;
        }
        Ok(())
    }
}

impl Drop for ControllerRuntime {
    fn drop(&mut self) {
        self.set_busy(false);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Out {
        value: u32,
    }

    impl ResourceSpec for Out {
        const TYPE: &'static str = "Outs.test";
        const NAMESPACE: &'static str = "test";
    }

    fn runtime(state: &State) -> ControllerRuntime {
        ControllerRuntime::new("ctrl".into(), state.clone(), EventQueue::new(), Arc::default())
    }

    #[tokio::test]
    async fn first_event_is_immediate() {
        let ctx = Context::new();
        let state = State::new();
        let mut r = runtime(&state);
        assert!(r.event(&ctx).await);
        ctx.cancel();
        assert!(!r.event(&ctx).await);
    }

    #[tokio::test]
    async fn outputs_are_owned_by_the_controller() {
        let ctx = Context::new();
        let state = State::new();
        let r = runtime(&state);
        let out = r.modify::<Out, _>(&ctx, "x", |o| o.spec_mut().value = 1).await.unwrap();
        assert_eq!("ctrl", out.metadata().owner());

        let errored = r.set_error::<Out>(&ctx, "x", "bad input").await.unwrap();
        assert_eq!(Some("bad input"), errored.metadata().error());
        assert_eq!(1, errored.spec().value);
    }

    #[tokio::test]
    async fn cleanup_removes_unlisted_outputs() {
        let ctx = Context::new();
        let state = State::new();
        let r = runtime(&state);
        for id in &["a", "b", "c"] {
            r.modify::<Out, _>(&ctx, id, |_| {}).await.unwrap();
        }
        let keep: HashSet<String> = vec!["b".to_string()].into_iter().collect();
        r.cleanup::<Out>(&ctx, &keep).await.unwrap();

        let left: Vec<String> = r
            .list::<Out>(&ctx)
            .await
            .unwrap()
            .iter()
            .map(|o| o.metadata().id().to_string())
            .collect();
        assert_eq!(vec!["b".to_string()], left);
    }
}
