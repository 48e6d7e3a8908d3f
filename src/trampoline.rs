use std::panic::{self, AssertUnwindSafe};

use log::{error, trace};

use crate::abi::{ArgSlot, FrameLayout, QuickArgumentVisitor};
use crate::callbacks::{HookHandler, Runtime};
use crate::hooker::{HookFlags, HookManager};
use crate::types::{AccessFlags, JObject, MethodId, MirrorRef, Shorty};
use crate::utils::{LocalFrameGuard, NoSuspensionGuard};
use crate::value::JValue;

// Arguments of one hooked call, as local references where needed.
struct FrameArgs {
    this_object: JObject,
    args: Vec<JValue>,
    references: Vec<(JObject, ArgSlot)>,
}

unsafe fn collect_arguments<R: Runtime>(
    rt: &R,
    layout: &FrameLayout,
    shorty: &Shorty,
    is_static: bool,
    receiver: MirrorRef,
    sp: *mut u8,
) -> FrameArgs {
    let slots = QuickArgumentVisitor::new(layout, is_static, shorty).visit();
    let mut args = Vec::with_capacity(slots.len());
    let mut references = Vec::new();
    for slot in slots {
        let raw = unsafe { slot.read(sp) };
        if slot.ty.is_reference() {
            let local = rt.add_local_ref(raw.mirror());
            references.push((local, slot));
            args.push(JValue::from_object(local));
        } else {
            args.push(raw);
        }
    }

    let this_object = if is_static {
        JObject::NULL
    } else {
        // the receiver slot was visited first
        args.remove(0);
        references[0].0
    };
    debug_assert!(is_static || rt.decode(this_object) == receiver);

    FrameArgs {
        this_object,
        args,
        references,
    }
}

// A moving collector may have relocated the referents while the handler ran.
unsafe fn fixup_references<R: Runtime>(rt: &R, sp: *mut u8, references: &[(JObject, ArgSlot)]) {
    for &(local, slot) in references {
        unsafe { slot.write_reference(sp, rt.decode(local)) };
        rt.delete_local_ref(local);
    }
}

impl<R: Runtime, H: HookHandler<R>> HookManager<R, H> {
    /// The body of the trampoline: called by the host stub with the hooked
    /// method, its receiver (null for static methods) and the stack pointer
    /// of the refs-and-args frame it spilled. Returns the raw result bits.
    ///
    /// With an exception pending on return the result is 0 and the stub
    /// must deliver the exception.
    ///
    /// # Safety
    ///
    /// `sp` must point at a writable frame of the configured layout holding
    /// the arguments of a call of `method`.
    pub unsafe fn on_trampoline_entry(
        &self,
        method: MethodId,
        receiver: MirrorRef,
        sp: *mut u8,
    ) -> u64 {
        let ctx = &self.ctx;
        let rt = &ctx.runtime;
        let Some(record) = ctx.registry.get(method) else {
            error!(
                "dexhook: {} entered the trampoline but is not hooked",
                rt.pretty_method(method)
            );
            std::process::abort();
        };
        trace!(
            "dexhook: enter {} from pc {:#x}",
            rt.pretty_method(method),
            unsafe { ctx.config.layout().calling_pc(sp) }
        );

        rt.set_top_of_stack(sp);
        let shorty = rt.shorty(method);
        let is_static = rt.access_flags(method).contains(AccessFlags::STATIC);
        let fixup = !ctx.config.hook_flags().contains(HookFlags::NO_REFERENCE_FIXUP);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            LocalFrameGuard::new(rt).run(|| {
                let frame = NoSuspensionGuard::new(rt, "Adding to IRT hooked method arguments")
                    .run(|| unsafe {
                        collect_arguments(rt, ctx.config.layout(), &shorty, is_static, receiver, sp)
                    });
                let result = self.dispatch(&record, &shorty, frame.this_object, &frame.args);
                if fixup {
                    unsafe { fixup_references(rt, sp, &frame.references) };
                }
                result
            })
        }));

        // unwinding must not reach the stub's frames
        let Ok(result) = result else {
            error!("dexhook: handler of {} panicked", rt.pretty_method(method));
            std::process::abort();
        };
        match result {
            Ok(Ok(value)) => value.bits(),
            _ => 0,
        }
    }
}
