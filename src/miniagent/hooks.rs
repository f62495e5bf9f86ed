//! Hook pipeline: named transformations run at four extension points.
//!
//! Hooks live in two scopes. Instance hooks belong to one [`Agent`](crate::Agent);
//! class hooks are stored in a process-wide registry and apply to every agent,
//! including agents created before the hook was registered.
//!
//! Execution order at a point is fixed: class hooks first, then instance hooks,
//! each scope in registration order. Re-registering an existing name replaces the
//! hook in place and keeps its original position.
//!
//! Registering or clearing class hooks while a `reply`/`observe` is in flight is
//! allowed; the in-flight call sees whichever set was current when it took its
//! snapshot of the chain.

use crate::miniagent::error::{BoxError, HookError};
use crate::miniagent::message::Message;
use lazy_static::lazy_static;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Extension point a hook is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before an observed message is appended to memory.
    PreObserve,
    /// After an observed message has been appended.
    PostObserve,
    /// Before the user input of a `reply` is stored and sent to the model.
    PreReply,
    /// After each model response, before it is stored or spoken.
    PostReply,
}

impl HookPoint {
    pub const ALL: [HookPoint; 4] = [
        HookPoint::PreObserve,
        HookPoint::PostObserve,
        HookPoint::PreReply,
        HookPoint::PostReply,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPoint::PreObserve => "pre_observe",
            HookPoint::PostObserve => "post_observe",
            HookPoint::PreReply => "pre_reply",
            HookPoint::PostReply => "post_reply",
        }
    }

    fn index(&self) -> usize {
        match self {
            HookPoint::PreObserve => 0,
            HookPoint::PostObserve => 1,
            HookPoint::PreReply => 2,
            HookPoint::PostReply => 3,
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which registry a hook is stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookScope {
    /// Process-wide, shared by every agent.
    Class,
    /// Local to one agent.
    Instance,
}

/// Identifies the agent and point a hook is running for.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub agent_id: String,
    pub agent_name: String,
    pub point: HookPoint,
}

/// A hook receives the current value and returns the (possibly modified) value
/// handed to the next hook. Returning `Err` aborts the enclosing call.
pub type Hook = Arc<dyn Fn(&HookContext, Message) -> Result<Message, BoxError> + Send + Sync>;

/// Ordered, name-unique chain of hooks for one extension point.
#[derive(Clone, Default)]
struct HookChain {
    entries: Vec<(String, Hook)>,
}

impl HookChain {
    fn register(&mut self, name: String, hook: Hook) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = hook,
            None => self.entries.push((name, hook)),
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        self.entries.len() != before
    }
}

/// One scope's hooks, keyed by extension point.
#[derive(Clone, Default)]
pub struct HookSet {
    chains: [HookChain; 4],
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, point: HookPoint, name: impl Into<String>, hook: Hook) {
        self.chains[point.index()].register(name.into(), hook);
    }

    /// Remove a hook by name. Returns whether it existed.
    pub fn remove(&mut self, point: HookPoint, name: &str) -> bool {
        self.chains[point.index()].remove(name)
    }

    pub fn clear(&mut self) {
        for chain in self.chains.iter_mut() {
            chain.entries.clear();
        }
    }

    /// Number of hooks at `point`.
    pub fn len(&self, point: HookPoint) -> usize {
        self.chains[point.index()].entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.iter().all(|c| c.entries.is_empty())
    }

    /// Registered names at `point`, in execution order.
    pub fn names(&self, point: HookPoint) -> Vec<String> {
        self.chains[point.index()]
            .entries
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn entries(&self, point: HookPoint) -> &[(String, Hook)] {
        &self.chains[point.index()].entries
    }
}

lazy_static! {
    static ref CLASS_HOOKS: RwLock<HookSet> = RwLock::new(HookSet::new());
}

/// Register a process-wide hook applying to every agent.
pub fn register_class_hook<F>(point: HookPoint, name: impl Into<String>, hook: F)
where
    F: Fn(&HookContext, Message) -> Result<Message, BoxError> + Send + Sync + 'static,
{
    let name = name.into();
    log::debug!("hooks::register_class_hook({}, {})", point, name);
    let mut set = CLASS_HOOKS.write().unwrap_or_else(|e| e.into_inner());
    set.register(point, name, Arc::new(hook));
}

/// Remove one class hook. Returns whether it existed.
pub fn remove_class_hook(point: HookPoint, name: &str) -> bool {
    let mut set = CLASS_HOOKS.write().unwrap_or_else(|e| e.into_inner());
    set.remove(point, name)
}

/// Drop every class hook at every extension point.
pub fn clear_class_hooks() {
    log::debug!("hooks::clear_class_hooks()");
    let mut set = CLASS_HOOKS.write().unwrap_or_else(|e| e.into_inner());
    set.clear();
}

/// Names of the class hooks at `point`, in execution order.
pub fn class_hook_names(point: HookPoint) -> Vec<String> {
    let set = CLASS_HOOKS.read().unwrap_or_else(|e| e.into_inner());
    set.names(point)
}

/// The hook pipeline embedded in every agent: its own instance hooks plus a view
/// onto the shared class registry.
#[derive(Clone, Default)]
pub struct HookPipeline {
    instance: HookSet,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `hook` under `(scope, point, name)`, replacing any hook of that name.
    pub fn register<F>(&mut self, point: HookPoint, name: impl Into<String>, hook: F, scope: HookScope)
    where
        F: Fn(&HookContext, Message) -> Result<Message, BoxError> + Send + Sync + 'static,
    {
        match scope {
            HookScope::Instance => self.instance.register(point, name, Arc::new(hook)),
            HookScope::Class => register_class_hook(point, name, hook),
        }
    }

    pub fn remove(&mut self, point: HookPoint, name: &str, scope: HookScope) -> bool {
        match scope {
            HookScope::Instance => self.instance.remove(point, name),
            HookScope::Class => remove_class_hook(point, name),
        }
    }

    /// Remove every hook in `scope`. Clearing the class scope affects all agents.
    pub fn clear(&mut self, scope: HookScope) {
        match scope {
            HookScope::Instance => self.instance.clear(),
            HookScope::Class => clear_class_hooks(),
        }
    }

    /// Number of hooks at `point` in `scope`.
    pub fn len(&self, point: HookPoint, scope: HookScope) -> usize {
        match scope {
            HookScope::Instance => self.instance.len(point),
            HookScope::Class => CLASS_HOOKS
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .len(point),
        }
    }

    /// Registered names at `point` in `scope`, in execution order.
    pub fn names(&self, point: HookPoint, scope: HookScope) -> Vec<String> {
        match scope {
            HookScope::Instance => self.instance.names(point),
            HookScope::Class => class_hook_names(point),
        }
    }

    /// The effective chain at `point`: class hooks then instance hooks.
    /// The class registry lock is released before this returns.
    pub fn snapshot(&self, point: HookPoint) -> Vec<(String, Hook)> {
        let mut chain: Vec<(String, Hook)> = {
            let class = CLASS_HOOKS.read().unwrap_or_else(|e| e.into_inner());
            class.entries(point).to_vec()
        };
        chain.extend(self.instance.entries(point).iter().cloned());
        chain
    }

    /// Run the chain at `ctx.point` over `message`.
    pub fn apply(&self, ctx: &HookContext, message: Message) -> Result<Message, HookError> {
        run_chain(&self.snapshot(ctx.point), ctx, message)
    }
}

/// Apply `chain` in order, stopping at the first failure.
pub fn run_chain(
    chain: &[(String, Hook)],
    ctx: &HookContext,
    mut message: Message,
) -> Result<Message, HookError> {
    for (name, hook) in chain {
        message = hook(ctx, message).map_err(|source| {
            log::error!(
                "HookPipeline::apply({}): hook '{}' failed for agent '{}': {}",
                ctx.point,
                name,
                ctx.agent_name,
                source
            );
            HookError {
                point: ctx.point,
                hook: name.clone(),
                source,
            }
        })?;
    }
    Ok(message)
}
