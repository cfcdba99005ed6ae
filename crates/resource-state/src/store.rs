use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::event::{Event, EventQueue, QueueInner};
use crate::metadata::{Kind, Phase, Pointer, Selector};
use crate::resource::{RawResource, Resource, ResourceSpec};
use crate::Context;

struct Watcher {
    selector: Selector,
    queue: Weak<QueueInner>,
    ctx: Context,
}

#[derive(Default)]
struct Bucket {
    objects: RwLock<BTreeMap<String, RawResource>>,
    watchers: Mutex<Vec<Watcher>>,
}

impl Bucket {
    /// Must be called with the `objects` write lock held so that events for
    /// one resource are queued in the order they happened.
    fn broadcast(&self, event: Event) {
        let id = match event.resource() {
            Some(r) => r.metadata.id().to_string(),
            None => return,
        };
        let mut watchers = match self.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        watchers.retain(|w| !w.ctx.is_cancelled() && w.queue.strong_count() > 0);
        for watcher in watchers.iter().filter(|w| w.selector.matches(&id)) {
            if let Some(queue) = watcher.queue.upgrade() {
                queue.push(event.clone());
            }
        }
    }
}

/// Shared in-memory resource store.
///
/// Resources are grouped into buckets per `(namespace, type)`; each bucket
/// has its own lock, so writers of different types never contend. Cloning a
/// `State` is cheap and yields a handle to the same store.
#[derive(Clone, Default)]
pub struct State {
    buckets: Arc<Mutex<HashMap<Kind, Arc<Bucket>>>>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").finish()
    }
}

fn check(ctx: &Context) -> Result<()> {
    if ctx.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

fn check_owner(existing: &RawResource, caller: &str) -> Result<()> {
    let owner = existing.metadata.owner();
    if owner.is_empty() || owner == caller {
        Ok(())
    } else {
        Err(Error::OwnerConflict {
            pointer: existing.metadata.pointer(),
            owner: owner.to_string(),
            caller: caller.to_string(),
        })
    }
}

impl State {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, kind: &Kind) -> Arc<Bucket> {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets.entry(kind.clone()).or_default().clone()
    }

    /// Stores a new resource. Fails with [`Error::Conflict`] if a resource
    /// with the same identity exists.
    pub async fn create<S: ResourceSpec>(&self, ctx: &Context, resource: Resource<S>) -> Result<Resource<S>> {
        let raw = self.create_raw(ctx, resource.to_raw()?).await?;
        Resource::from_raw(raw)
    }

    /// Type-erased [`State::create`].
    pub async fn create_raw(&self, ctx: &Context, mut resource: RawResource) -> Result<RawResource> {
        check(ctx)?;
        let pointer = resource.metadata.pointer();
        let bucket = self.bucket(&pointer.kind());
        let mut objects = bucket.objects.write().await;
        if objects.contains_key(&pointer.id) {
            return Err(Error::Conflict {
                pointer,
                reason: "resource already exists".to_string(),
            });
        }
        resource.metadata.stamp_created();
        resource.metadata.set_phase(Phase::Running);
        objects.insert(pointer.id.clone(), resource.clone());
        trace!(resource = %resource.metadata, "created");
        bucket.broadcast(Event::Created(resource.clone()));
        Ok(resource)
    }

    /// Fetches the resource `id` of type `S` from its default namespace.
    pub async fn get<S: ResourceSpec>(&self, ctx: &Context, id: &str) -> Result<Resource<S>> {
        let raw = self.get_raw(ctx, &Pointer::of::<S>(id)).await?;
        Resource::from_raw(raw)
    }

    /// Like [`State::get`], but maps [`Error::NotFound`] to `None`.
    pub async fn try_get<S: ResourceSpec>(&self, ctx: &Context, id: &str) -> Result<Option<Resource<S>>> {
        match self.get::<S>(ctx, id).await {
            Ok(r) => Ok(Some(r)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Type-erased [`State::get`].
    pub async fn get_raw(&self, ctx: &Context, pointer: &Pointer) -> Result<RawResource> {
        check(ctx)?;
        let bucket = self.bucket(&pointer.kind());
        let objects = bucket.objects.read().await;
        objects
            .get(&pointer.id)
            .cloned()
            .ok_or_else(|| Error::NotFound(pointer.clone()))
    }

    /// All resources of type `S` in its default namespace, ordered by id.
    pub async fn list<S: ResourceSpec>(&self, ctx: &Context) -> Result<Vec<Resource<S>>> {
        self.list_raw(ctx, &Kind::of::<S>())
            .await?
            .into_iter()
            .map(Resource::from_raw)
            .collect()
    }

    /// Type-erased [`State::list`].
    pub async fn list_raw(&self, ctx: &Context, kind: &Kind) -> Result<Vec<RawResource>> {
        check(ctx)?;
        let bucket = self.bucket(kind);
        let objects = bucket.objects.read().await;
        Ok(objects.values().cloned().collect())
    }

    /// Replaces a resource.
    ///
    /// The caller's owner must match the stored owner (or the stored resource
    /// must be unowned) and the caller's version must be the current one.
    /// Finalizers and phase are kept from the stored resource.
    pub async fn update<S: ResourceSpec>(&self, ctx: &Context, resource: Resource<S>) -> Result<Resource<S>> {
        let raw = self.update_raw(ctx, resource.to_raw()?).await?;
        Resource::from_raw(raw)
    }

    /// Type-erased [`State::update`].
    pub async fn update_raw(&self, ctx: &Context, mut resource: RawResource) -> Result<RawResource> {
        check(ctx)?;
        let pointer = resource.metadata.pointer();
        let bucket = self.bucket(&pointer.kind());
        let mut objects = bucket.objects.write().await;
        let existing = objects
            .get(&pointer.id)
            .ok_or_else(|| Error::NotFound(pointer.clone()))?;
        check_owner(existing, resource.metadata.owner())?;
        if existing.metadata.phase() == Phase::TearingDown {
            return Err(Error::PhaseConflict(pointer));
        }
        if existing.metadata.version() != resource.metadata.version() {
            return Err(Error::Conflict {
                pointer,
                reason: format!(
                    "version mismatch: stored {}, got {}",
                    existing.metadata.version(),
                    resource.metadata.version()
                ),
            });
        }
        resource.metadata.stamp_updated(&existing.metadata);
        resource.metadata.set_phase(existing.metadata.phase());
        *resource.metadata.finalizers_mut() = existing.metadata.finalizers().clone();
        objects.insert(pointer.id.clone(), resource.clone());
        trace!(resource = %resource.metadata, "updated");
        bucket.broadcast(Event::Updated(resource.clone()));
        Ok(resource)
    }

    /// Creates or updates the resource identified by `template`.
    ///
    /// When the resource exists, `f` is applied to the stored copy; otherwise
    /// it is applied to `template`. The owner of `template` is enforced and
    /// recorded. The version is only bumped when the spec or the reported
    /// error actually changed.
    pub async fn modify<S, F>(&self, ctx: &Context, template: Resource<S>, f: F) -> Result<Resource<S>>
    where
        S: ResourceSpec,
        F: FnOnce(&mut Resource<S>),
    {
        check(ctx)?;
        let pointer = template.metadata().pointer();
        let owner = template.metadata().owner().to_string();
        let bucket = self.bucket(&pointer.kind());
        let mut objects = bucket.objects.write().await;

        match objects.get(&pointer.id) {
            Some(existing) => {
                check_owner(existing, &owner)?;
                if existing.metadata.phase() == Phase::TearingDown {
                    return Err(Error::PhaseConflict(pointer));
                }
                let before: Resource<S> = Resource::from_raw(existing.clone())?;
                let mut after = before.clone();
                f(&mut after);
                after.metadata_mut().set_owner(owner);
                if after.spec() == before.spec() && after.metadata().error() == before.metadata().error() {
                    return Ok(before);
                }
                let mut raw = after.to_raw()?;
                raw.metadata.stamp_updated(&existing.metadata);
                objects.insert(pointer.id.clone(), raw.clone());
                trace!(resource = %raw.metadata, "modified");
                bucket.broadcast(Event::Updated(raw.clone()));
                Resource::from_raw(raw)
            }
            None => {
                let mut created = template;
                f(&mut created);
                created.metadata_mut().set_owner(owner);
                let mut raw = created.to_raw()?;
                raw.metadata.stamp_created();
                raw.metadata.set_phase(Phase::Running);
                objects.insert(pointer.id.clone(), raw.clone());
                trace!(resource = %raw.metadata, "created by modify");
                bucket.broadcast(Event::Created(raw.clone()));
                Resource::from_raw(raw)
            }
        }
    }

    /// Moves a resource to the tearing-down phase. Returns true when no
    /// finalizers are attached, i.e. the resource can be destroyed now.
    pub async fn teardown(&self, ctx: &Context, pointer: &Pointer, owner: &str) -> Result<bool> {
        check(ctx)?;
        let bucket = self.bucket(&pointer.kind());
        let mut objects = bucket.objects.write().await;
        let existing = objects
            .get_mut(&pointer.id)
            .ok_or_else(|| Error::NotFound(pointer.clone()))?;
        check_owner(existing, owner)?;
        let ready = existing.metadata.finalizers().is_empty();
        if existing.metadata.phase() != Phase::TearingDown {
            let previous = existing.metadata.clone();
            existing.metadata.set_phase(Phase::TearingDown);
            existing.metadata.stamp_updated(&previous);
            let snapshot = existing.clone();
            bucket.broadcast(Event::Updated(snapshot));
        }
        Ok(ready)
    }

    /// Removes a resource.
    ///
    /// If finalizers are attached the resource is moved to the tearing-down
    /// phase instead and [`Error::HasFinalizers`] is returned.
    pub async fn destroy(&self, ctx: &Context, pointer: &Pointer, owner: &str) -> Result<()> {
        check(ctx)?;
        let bucket = self.bucket(&pointer.kind());
        let mut objects = bucket.objects.write().await;
        let existing = objects
            .get_mut(&pointer.id)
            .ok_or_else(|| Error::NotFound(pointer.clone()))?;
        check_owner(existing, owner)?;
        if !existing.metadata.finalizers().is_empty() {
            let finalizers = existing.metadata.finalizers().iter().cloned().collect();
            if existing.metadata.phase() != Phase::TearingDown {
                let previous = existing.metadata.clone();
                existing.metadata.set_phase(Phase::TearingDown);
                existing.metadata.stamp_updated(&previous);
                let snapshot = existing.clone();
                bucket.broadcast(Event::Updated(snapshot));
            }
            return Err(Error::HasFinalizers {
                pointer: pointer.clone(),
                finalizers,
            });
        }
        if let Some(removed) = objects.remove(&pointer.id) {
            debug!(resource = %removed.metadata, "destroyed");
            bucket.broadcast(Event::Destroyed(removed));
        }
        Ok(())
    }

    /// Attaches finalizers to a resource. Readers use this to hold a
    /// resource until they have released what they derived from it.
    pub async fn add_finalizer(&self, ctx: &Context, pointer: &Pointer, finalizers: &[&str]) -> Result<()> {
        self.edit_finalizers(ctx, pointer, |set| {
            let mut changed = false;
            for f in finalizers {
                changed |= set.insert(f.to_string());
            }
            changed
        })
        .await
    }

    /// Detaches finalizers from a resource.
    pub async fn remove_finalizer(&self, ctx: &Context, pointer: &Pointer, finalizers: &[&str]) -> Result<()> {
        self.edit_finalizers(ctx, pointer, |set| {
            let mut changed = false;
            for f in finalizers {
                changed |= set.remove(*f);
            }
            changed
        })
        .await
    }

    async fn edit_finalizers<F>(&self, ctx: &Context, pointer: &Pointer, f: F) -> Result<()>
    where
        F: FnOnce(&mut std::collections::BTreeSet<String>) -> bool,
    {
        check(ctx)?;
        let bucket = self.bucket(&pointer.kind());
        let mut objects = bucket.objects.write().await;
        let existing = objects
            .get_mut(&pointer.id)
            .ok_or_else(|| Error::NotFound(pointer.clone()))?;
        let previous = existing.metadata.clone();
        if f(existing.metadata.finalizers_mut()) {
            existing.metadata.stamp_updated(&previous);
            let snapshot = existing.clone();
            bucket.broadcast(Event::Updated(snapshot));
        }
        Ok(())
    }

    /// Registers `queue` for changes matching `selector`.
    ///
    /// The current matching resources are queued first as `Created` events,
    /// followed by a single `Bootstrapped` marker. The registration lasts
    /// until `ctx` is cancelled or every handle to `queue` is dropped.
    pub async fn watch_into(&self, ctx: &Context, selector: impl Into<Selector>, queue: &EventQueue) -> Result<()> {
        check(ctx)?;
        let selector = selector.into();
        let bucket = self.bucket(&selector.kind);
        // Holding the read lock keeps writers (and their broadcasts) out
        // until the snapshot is queued and the watcher is registered.
        let objects = bucket.objects.read().await;
        for (id, resource) in objects.iter() {
            if selector.matches(id) {
                queue.push(Event::Created(resource.clone()));
            }
        }
        queue.push(Event::Bootstrapped(selector.kind.clone()));
        let mut watchers = match bucket.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        watchers.push(Watcher {
            selector,
            queue: queue.downgrade(),
            ctx: ctx.clone(),
        });
        Ok(())
    }

    /// Watches `selector` with a fresh queue.
    pub async fn watch(&self, ctx: &Context, selector: impl Into<Selector>) -> Result<EventQueue> {
        let queue = EventQueue::new();
        self.watch_into(ctx, selector, &queue).await?;
        Ok(queue)
    }

    /// Watches every resource of type `S` with a fresh queue.
    pub async fn watch_kind<S: ResourceSpec>(&self, ctx: &Context) -> Result<EventQueue> {
        self.watch(ctx, Selector::kind::<S>()).await
    }

    /// Waits until the resource `id` of type `S` exists and satisfies
    /// `predicate`, returning it.
    pub async fn watch_for<S, P>(&self, ctx: &Context, id: &str, predicate: P) -> Result<Resource<S>>
    where
        S: ResourceSpec,
        P: Fn(&Resource<S>) -> bool,
    {
        let watch_ctx = ctx.child_token();
        let queue = self.watch(&watch_ctx, Selector::resource::<S>(id)).await?;
        let result = loop {
            let event = match queue.recv(ctx).await {
                Ok(event) => event,
                Err(e) => break Err(e),
            };
            match event {
                Event::Created(raw) | Event::Updated(raw) => {
                    let resource = Resource::from_raw(raw)?;
                    if predicate(&resource) {
                        break Ok(resource);
                    }
                }
                Event::Errored(message) => {
                    break Err(Error::Timeout(format!("{}: {}", Pointer::of::<S>(id), message)))
                }
                Event::Destroyed(_) | Event::Bootstrapped(_) => {}
            }
        };
        watch_ctx.cancel();
        result
    }

    /// [`State::watch_for`] bounded by `timeout`.
    pub async fn watch_for_timeout<S, P>(
        &self,
        ctx: &Context,
        id: &str,
        timeout: Duration,
        predicate: P,
    ) -> Result<Resource<S>>
    where
        S: ResourceSpec,
        P: Fn(&Resource<S>) -> bool,
    {
        match tokio::time::timeout(timeout, self.watch_for(ctx, id, predicate)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(Pointer::of::<S>(id).to_string())),
        }
    }
}
