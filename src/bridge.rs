//! Prioritised before/after callbacks on top of the raw hook handler.
//!
//! A callback "throws" by leaving an exception pending on the runtime.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::RwLock;

use crate::callbacks::{HookHandler, HookedCall, Runtime};
use crate::err::HookError;
use crate::hooker::{HookContext, HookManager};
use crate::types::{JObject, MethodId};

/// Priority of a callback that does not choose one.
pub const PRIORITY_DEFAULT: i32 = 50;
/// Run "before" last and "after" first.
pub const PRIORITY_LOWEST: i32 = -10000;
/// Run "before" first and "after" last.
pub const PRIORITY_HIGHEST: i32 = 10000;

/// The state of one hooked call, shared by every callback of the chain.
#[derive(Clone, Debug)]
pub struct MethodHookParam {
    /// The reflected handle of the backup, see [`HookedCall::method`]
    pub method: JObject,
    /// The receiver, null for static methods
    pub this_object: JObject,
    /// The boxed arguments, callbacks may replace them
    pub args: JObject,
    result: JObject,
    throwable: JObject,
    return_early: bool,
}

impl MethodHookParam {
    fn new(call: &HookedCall) -> Self {
        Self {
            method: call.method,
            this_object: call.this_object,
            args: call.args,
            result: JObject::NULL,
            throwable: JObject::NULL,
            return_early: false,
        }
    }

    /// The result so far.
    pub fn result(&self) -> JObject {
        self.result
    }

    /// Set the result. In a "before" callback this skips the original
    /// method and the remaining callbacks.
    pub fn set_result(&mut self, result: JObject) {
        self.result = result;
        self.throwable = JObject::NULL;
        self.return_early = true;
    }

    /// The throwable so far, null if none.
    pub fn throwable(&self) -> JObject {
        self.throwable
    }

    /// Whether the call ends by throwing.
    pub fn has_throwable(&self) -> bool {
        !self.throwable.is_null()
    }

    /// Make the call throw `throwable`. Like [`MethodHookParam::set_result`]
    /// it returns early when called from a "before" callback.
    pub fn set_throwable(&mut self, throwable: JObject) {
        self.throwable = throwable;
        self.result = JObject::NULL;
        self.return_early = true;
    }

    /// Whether the original method will be skipped.
    pub fn returns_early(&self) -> bool {
        self.return_early
    }

    fn reset(&mut self) {
        self.result = JObject::NULL;
        self.throwable = JObject::NULL;
        self.return_early = false;
    }
}

/// A callback run around every call of a hooked method.
pub trait MethodHook<R: Runtime>: Send + Sync {
    /// Ordering among the callbacks of one method, higher runs "before" first.
    fn priority(&self) -> i32 {
        PRIORITY_DEFAULT
    }

    /// Called before the original method.
    fn before_hooked_method(&self, _ctx: &HookContext<R>, _param: &mut MethodHookParam) {}

    /// Called after the original method, or after an early return.
    fn after_hooked_method(&self, _ctx: &HookContext<R>, _param: &mut MethodHookParam) {}
}

/// A callback replacing the body of the hooked method.
///
/// The closure's result becomes the call's result. An exception it leaves
/// pending becomes the call's throwable.
pub struct MethodReplacement<F> {
    priority: i32,
    replace: F,
}

impl<F> MethodReplacement<F> {
    /// Replace with `replace` at the default priority.
    pub fn new(replace: F) -> Self {
        Self::with_priority(PRIORITY_DEFAULT, replace)
    }

    /// Replace with `replace` at `priority`.
    pub fn with_priority(priority: i32, replace: F) -> Self {
        Self { priority, replace }
    }
}

impl<R, F> MethodHook<R> for MethodReplacement<F>
where
    R: Runtime,
    F: Fn(&HookContext<R>, &MethodHookParam) -> JObject + Send + Sync,
{
    fn priority(&self) -> i32 {
        self.priority
    }

    fn before_hooked_method(&self, ctx: &HookContext<R>, param: &mut MethodHookParam) {
        let rt = ctx.runtime();
        let result = (self.replace)(ctx, param);
        if rt.exception_pending() {
            let throwable = rt.exception_occurred();
            rt.exception_clear();
            param.set_throwable(throwable);
        } else {
            param.set_result(result);
        }
    }
}

/// A replacement returning `result` without calling the original method.
/// `result` must stay valid for as long as the callback is registered.
pub fn returns_constant<R: Runtime + 'static>(result: JObject) -> Arc<dyn MethodHook<R>> {
    Arc::new(MethodReplacement::new(
        move |_: &HookContext<R>, _: &MethodHookParam| result,
    ))
}

/// A replacement skipping the original method and returning null. It runs
/// before any other callback.
pub fn do_nothing<R: Runtime + 'static>() -> Arc<dyn MethodHook<R>> {
    Arc::new(MethodReplacement::with_priority(
        PRIORITY_HIGHEST * 2,
        |_: &HookContext<R>, _: &MethodHookParam| JObject::NULL,
    ))
}

type Snapshot<R> = Arc<[Arc<dyn MethodHook<R>>]>;

// Sorted by descending priority. Readers take a snapshot and never block
// writers for longer than a clone.
struct CallbackSet<R: Runtime> {
    elements: RwLock<Snapshot<R>>,
}

impl<R: Runtime> CallbackSet<R> {
    fn new() -> Self {
        Self {
            elements: RwLock::new(Arc::from(Vec::new())),
        }
    }

    fn add(&self, callback: Arc<dyn MethodHook<R>>) -> bool {
        let mut elements = self.elements.write();
        if elements.iter().any(|e| Arc::ptr_eq(e, &callback)) {
            return false;
        }
        let pos = elements
            .iter()
            .position(|e| e.priority() < callback.priority())
            .unwrap_or(elements.len());
        let mut next = elements.to_vec();
        next.insert(pos, callback);
        *elements = Arc::from(next);
        true
    }

    fn remove(&self, callback: &Arc<dyn MethodHook<R>>) -> bool {
        let mut elements = self.elements.write();
        let Some(pos) = elements.iter().position(|e| Arc::ptr_eq(e, callback)) else {
            return false;
        };
        let mut next = elements.to_vec();
        next.remove(pos);
        *elements = Arc::from(next);
        true
    }

    fn snapshot(&self) -> Snapshot<R> {
        self.elements.read().clone()
    }

    fn is_empty(&self) -> bool {
        self.elements.read().is_empty()
    }
}

/// A [`HookHandler`] running the registered [`MethodHook`]s of each method.
pub struct CallbackChain<R: Runtime> {
    callbacks: DashMap<MethodId, Arc<CallbackSet<R>>>,
}

impl<R: Runtime> Default for CallbackChain<R> {
    fn default() -> Self {
        Self {
            callbacks: DashMap::new(),
        }
    }
}

impl<R: Runtime> CallbackChain<R> {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `method`. Returns false if it already was.
    fn add(&self, method: MethodId, callback: Arc<dyn MethodHook<R>>) -> bool {
        // added under the map entry so `forget` never drops a set in use
        self.callbacks
            .entry(method)
            .or_insert_with(|| Arc::new(CallbackSet::new()))
            .add(callback)
    }

    // Undo `add` after a failed install, keeping other registrants.
    fn forget(&self, method: MethodId, callback: &Arc<dyn MethodHook<R>>) {
        self.remove(method, callback);
        self.callbacks.remove_if(&method, |_, set| set.is_empty());
    }

    /// Remove `callback` from `method`. Returns false if it was not
    /// registered.
    pub fn remove(&self, method: MethodId, callback: &Arc<dyn MethodHook<R>>) -> bool {
        let Some(set) = self.callbacks.get(&method).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        set.remove(callback)
    }

    /// The callbacks of `method`, in "before" order.
    pub fn snapshot(&self, method: MethodId) -> Snapshot<R> {
        self.callbacks
            .get(&method)
            .map(|s| s.snapshot())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    // Clear the pending exception of a misbehaving callback.
    fn swallow(rt: &R, method: MethodId, stage: &str) {
        let throwable = rt.exception_occurred();
        rt.exception_clear();
        warn!(
            "dexhook: {stage} callback of {} threw {}",
            rt.pretty_method(method),
            rt.pretty_type_of(throwable)
        );
        rt.delete_local_ref(throwable);
    }

    // Original call; only a throwing callee is turned into a throwable.
    fn call_original(ctx: &HookContext<R>, param: &mut MethodHookParam) -> Result<(), HookError> {
        match ctx.invoke_original(param.method, param.this_object, param.args) {
            Ok(result) => param.set_result(result),
            Err(HookError::InvocationTarget(cause)) => param.set_throwable(cause),
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

impl<R: Runtime> HookHandler<R> for CallbackChain<R> {
    fn handle_hooked_method(&self, ctx: &HookContext<R>, call: &HookedCall) -> JObject {
        let rt = ctx.runtime();
        let Some(method) = ctx.hooked_method(call.method) else {
            return JObject::NULL;
        };
        let callbacks = self.snapshot(method);
        let mut param = MethodHookParam::new(call);

        if callbacks.is_empty() {
            return match Self::call_original(ctx, &mut param) {
                Ok(()) if param.has_throwable() => {
                    rt.throw(param.throwable);
                    JObject::NULL
                }
                Ok(()) => param.result,
                Err(_) => JObject::NULL,
            };
        }

        let mut ran = 0;
        for callback in callbacks.iter() {
            ran += 1;
            callback.before_hooked_method(ctx, &mut param);
            if rt.exception_pending() {
                Self::swallow(rt, method, "before");
                param.reset();
                continue;
            }
            if param.return_early {
                debug!(
                    "dexhook: {} returned early before the original",
                    rt.pretty_method(method)
                );
                break;
            }
        }

        if !param.return_early && Self::call_original(ctx, &mut param).is_err() {
            return JObject::NULL;
        }

        for callback in callbacks[..ran].iter().rev() {
            let last_result = param.result;
            let last_throwable = param.throwable;
            callback.after_hooked_method(ctx, &mut param);
            if rt.exception_pending() {
                Self::swallow(rt, method, "after");
                if last_throwable.is_null() {
                    param.set_result(last_result);
                } else {
                    param.set_throwable(last_throwable);
                }
            }
        }

        if param.has_throwable() {
            rt.throw(param.throwable);
            return JObject::NULL;
        }
        param.result
    }
}

/// Handle to one registered callback.
pub struct Unhook<R: Runtime> {
    method: MethodId,
    callback: Arc<dyn MethodHook<R>>,
}

impl<R: Runtime> Unhook<R> {
    /// The hooked method.
    pub fn hooked_method(&self) -> MethodId {
        self.method
    }

    /// The registered callback.
    pub fn callback(&self) -> &Arc<dyn MethodHook<R>> {
        &self.callback
    }

    /// Remove the callback. The method itself stays hooked.
    pub fn unhook(&self, chain: &CallbackChain<R>) {
        chain.remove(self.method, &self.callback);
    }
}

impl<R: Runtime> HookManager<R, CallbackChain<R>> {
    /// Register `callback` for `member` and make sure `member` is hooked.
    /// On error `callback` is not registered.
    pub fn hook_method(
        &self,
        member: JObject,
        callback: Arc<dyn MethodHook<R>>,
    ) -> Result<Unhook<R>, HookError> {
        let method = self
            .runtime()
            .method_from_reflected(member)
            .ok_or(HookError::InvalidMember)?;
        let added = self.handler.add(method, Arc::clone(&callback));
        if let Err(e) = self.install_hook(member, JObject::NULL) {
            if added {
                self.handler.forget(method, &callback);
            }
            return Err(e);
        }
        Ok(Unhook { method, callback })
    }

    /// Remove `callback` from `member`. The method itself stays hooked.
    pub fn unhook_method(&self, member: JObject, callback: &Arc<dyn MethodHook<R>>) {
        if let Some(method) = self.runtime().method_from_reflected(member) {
            self.handler.remove(method, callback);
        }
    }
}
