use std::sync::Arc;

use bitflags::bitflags;
use log::{debug, info, warn};

use crate::abi::FrameLayout;
use crate::callbacks::{CallbackOption, HookHandler, Runtime, ThreadCallback};
use crate::err::HookError;
use crate::registry::{HookRecord, HookRegistry};
use crate::types::{AccessFlags, JObject, MemberKind, MethodId};
use crate::utils::ThreadSuspendingGuard;

bitflags! {
    /// Hook flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HookFlags: u32 {
        /// Always pass an argument array to the handler, even an empty one
        const LEGACY_EMPTY_ARGS = 0x1;
        /// Do not write reference arguments back into the frame after the
        /// handler returns
        const NO_REFERENCE_FIXUP = 0x2;
        /// Do not initialise the declaring class of a static method before
        /// hooking it
        const NO_CLASS_INIT = 0x4;
    }
}

/// Settings of a [`HookManager`].
pub struct HookConfig {
    trampoline: usize,
    layout: &'static FrameLayout,
    target_sdk_version: i32,
    flags: HookFlags,
    thread_cb: CallbackOption,
}

impl HookConfig {
    /// Create a config.
    ///
    /// # Arguments
    ///
    /// * `trampoline` - Address of the host stub every hooked method is
    ///   redirected to. The stub spills a `layout` frame and calls
    ///   [`HookManager::on_trampoline_entry`].
    /// * `layout` - The frame layout the stub spills.
    pub fn new(trampoline: usize, layout: &'static FrameLayout) -> Self {
        Self {
            trampoline,
            layout,
            target_sdk_version: 0,
            flags: HookFlags::empty(),
            thread_cb: CallbackOption::None,
        }
    }

    /// Target SDK version of the hosting application. Versions 1 to 21
    /// receive an empty argument array instead of null.
    pub fn target_sdk_version(mut self, version: i32) -> Self {
        self.target_sdk_version = version;
        self
    }

    /// Set hook flags.
    pub fn flags(mut self, flags: HookFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Callbacks run before and after every entry point rewrite.
    pub fn thread_callback(mut self, cb: Box<dyn ThreadCallback>) -> Self {
        self.thread_cb = CallbackOption::Some(cb);
        self
    }

    /// The trampoline address.
    pub fn trampoline(&self) -> usize {
        self.trampoline
    }

    /// The frame layout.
    pub fn layout(&self) -> &'static FrameLayout {
        self.layout
    }

    /// The configured flags.
    pub fn hook_flags(&self) -> HookFlags {
        self.flags
    }

    pub(crate) fn needs_args_array(&self, argc: usize) -> bool {
        argc > 0
            || (self.target_sdk_version > 0 && self.target_sdk_version <= 21)
            || self.flags.contains(HookFlags::LEGACY_EMPTY_ARGS)
    }
}

/// The runtime, the hook records and the config, as seen by handlers.
pub struct HookContext<R: Runtime> {
    pub(crate) runtime: R,
    pub(crate) registry: HookRegistry,
    pub(crate) config: HookConfig,
}

impl<R: Runtime> HookContext<R> {
    /// The host runtime.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// The config.
    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    /// The record of a hooked method.
    pub fn record(&self, method: MethodId) -> Option<Arc<HookRecord>> {
        self.registry.get(method)
    }

    fn is_hooked_method(&self, method: MethodId) -> bool {
        self.runtime.entry_point(method) == self.config.trampoline
    }

    /// The hooked method behind `member`, which is either the public handle
    /// of a hooked method or the reflected handle of its backup.
    pub fn hooked_method(&self, member: JObject) -> Option<MethodId> {
        let method = self.runtime.method_from_reflected(member)?;
        self.registry
            .backup_of(method)
            .or_else(|| self.registry.get(method).map(|r| r.method))
    }

    // Every allocation happens here, before the target is touched.
    fn build_record(
        &self,
        method: MethodId,
        additional_info: JObject,
        flags: AccessFlags,
    ) -> Result<HookRecord, HookError> {
        let rt = &self.runtime;
        let backup = rt
            .clone_method(method)
            .ok_or(HookError::MemoryAllocation)?;
        rt.set_access_flags(backup, flags | AccessFlags::PRIVATE);

        let kind = if flags.contains(AccessFlags::CONSTRUCTOR) {
            MemberKind::Constructor
        } else {
            MemberKind::Method
        };
        let wrapper = rt.new_reflected_member(backup, kind);
        if wrapper.is_null() {
            return Err(HookError::MemoryAllocation);
        }

        let reflected_handle = rt.new_global_ref(wrapper);
        rt.delete_local_ref(wrapper);
        if reflected_handle.is_null() {
            return Err(HookError::MemoryAllocation);
        }
        let info = if additional_info.is_null() {
            JObject::NULL
        } else {
            let info = rt.new_global_ref(additional_info);
            if info.is_null() {
                rt.delete_global_ref(reflected_handle);
                return Err(HookError::MemoryAllocation);
            }
            info
        };

        Ok(HookRecord {
            method,
            backup,
            reflected_handle,
            additional_info: info,
            saved_entry_point: rt.entry_point(method),
            saved_access_flags: flags,
        })
    }

    fn release_record(&self, record: &HookRecord) {
        [record.reflected_handle, record.additional_info]
            .into_iter()
            .filter(|g| !g.is_null())
            .for_each(|g| self.runtime.delete_global_ref(g));
    }

    fn uninstall(&self, method: MethodId) -> Result<(), HookError> {
        let rt = &self.runtime;
        let _transition = self.registry.lock_transitions();
        let record = self
            .registry
            .get(method)
            .ok_or(HookError::NotHooked(method))?;
        ThreadSuspendingGuard::new(&self.config.thread_cb).run(|| {
            rt.set_entry_point(method, record.saved_entry_point);
            rt.set_access_flags(method, record.saved_access_flags);
        })?;
        self.registry.remove(method);
        self.release_record(&record);
        info!("dexhook: unhooked {}", rt.pretty_method(method));
        Ok(())
    }
}

/// The entry struct in dexhook.
/// Please read the main doc to view usage.
pub struct HookManager<R: Runtime, H: HookHandler<R>> {
    pub(crate) ctx: HookContext<R>,
    pub(crate) handler: H,
}

impl<R: Runtime, H: HookHandler<R>> HookManager<R, H> {
    /// Create a manager dispatching every hooked call to `handler`.
    pub fn new(runtime: R, handler: H, config: HookConfig) -> Self {
        Self {
            ctx: HookContext {
                runtime,
                registry: HookRegistry::new(),
                config,
            },
            handler,
        }
    }

    /// The context passed to the handler.
    pub fn context(&self) -> &HookContext<R> {
        &self.ctx
    }

    /// The host runtime.
    pub fn runtime(&self) -> &R {
        &self.ctx.runtime
    }

    /// The handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Redirect every call of `member` to the trampoline. Hooking a method
    /// twice is a no-op; the first `additional_info` is kept.
    ///
    /// On error the method is left untouched. Host failures leave an
    /// exception pending.
    pub fn install_hook(&self, member: JObject, additional_info: JObject) -> Result<(), HookError> {
        let ctx = &self.ctx;
        let rt = &ctx.runtime;
        let method = rt
            .method_from_reflected(member)
            .ok_or(HookError::InvalidMember)?;
        if ctx.registry.backup_of(method).is_some() {
            return Err(HookError::BackupMethod(method));
        }

        // runs <clinit>, which may hook, so it must happen before the transition lock
        if rt.access_flags(method).contains(AccessFlags::STATIC)
            && !ctx.config.flags.contains(HookFlags::NO_CLASS_INIT)
            && !rt.ensure_initialized(method)
        {
            return Err(HookError::ExceptionPending);
        }

        let _transition = ctx.registry.lock_transitions();
        if ctx.registry.get(method).is_some() {
            debug!("dexhook: {} is already hooked", rt.pretty_method(method));
            return Ok(());
        }
        if ctx.is_hooked_method(method) {
            warn!(
                "dexhook: {} already enters the trampoline without a record",
                rt.pretty_method(method)
            );
            return Ok(());
        }

        let flags = rt.access_flags(method);
        let record = Arc::new(ctx.build_record(method, additional_info, flags)?);
        // published first: the trampoline looks the record up without locking
        ctx.registry.insert(Arc::clone(&record));
        let trampoline = ctx.config.trampoline;
        let rewritten = ThreadSuspendingGuard::new(&ctx.config.thread_cb).run(|| {
            rt.set_entry_point(method, trampoline);
            rt.set_access_flags(method, flags - AccessFlags::NATIVE);
        });
        if let Err(e) = rewritten {
            ctx.registry.remove(method);
            ctx.release_record(&record);
            return Err(e);
        }

        info!("dexhook: hooked {}", rt.pretty_method(method));
        Ok(())
    }

    /// Restore the entry point and access flags of a hooked method and
    /// release its record.
    ///
    /// # Safety
    ///
    /// No thread may be running inside the hook of `member`, nor use the
    /// handles of its record afterwards.
    pub unsafe fn uninstall_hook(&self, member: JObject) -> Result<(), HookError> {
        let method = self
            .ctx
            .runtime
            .method_from_reflected(member)
            .ok_or(HookError::InvalidMember)?;
        self.ctx.uninstall(method)
    }

    /// Uninstall every hook. Hooks removed concurrently are skipped.
    ///
    /// # Safety
    ///
    /// Same as [`HookManager::uninstall_hook`], for every hooked method.
    pub unsafe fn uninstall_all(&self) -> Result<(), HookError> {
        self.ctx
            .registry
            .methods()
            .into_iter()
            .try_for_each(|m| match self.ctx.uninstall(m) {
                Err(HookError::NotHooked(_)) => Ok(()),
                r => r,
            })
    }

    /// Whether calls of `member` currently enter the trampoline.
    pub fn is_hooked(&self, member: JObject) -> bool {
        self.ctx
            .runtime
            .method_from_reflected(member)
            .is_some_and(|m| self.ctx.is_hooked_method(m))
    }

    /// The record of a hooked member.
    pub fn record(&self, member: JObject) -> Option<Arc<HookRecord>> {
        let method = self.ctx.runtime.method_from_reflected(member)?;
        self.ctx.registry.get(method)
    }

    /// Number of installed hooks.
    pub fn hooked_count(&self) -> usize {
        self.ctx.registry.len()
    }
}

// When the HookManager drops, every hook is uninstalled.
impl<R: Runtime, H: HookHandler<R>> Drop for HookManager<R, H> {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.uninstall_all() } {
            warn!("dexhook: failed to uninstall hooks: {e}");
        }
    }
}
