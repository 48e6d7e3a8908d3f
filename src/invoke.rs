use log::trace;

use crate::callbacks::{HookHandler, Runtime};
use crate::err::HookError;
use crate::hooker::{HookContext, HookManager};
use crate::types::{AccessFlags, ExceptionKind, JObject, MethodId, MirrorRef, PrimitiveType};
use crate::value::{ArgArray, JValue};

fn box_result<R: Runtime>(rt: &R, ret: PrimitiveType, value: JValue) -> Result<JObject, HookError> {
    let obj = match ret {
        PrimitiveType::Void => return Ok(JObject::NULL),
        PrimitiveType::Not => {
            let mirror = value.mirror();
            if mirror.is_null() {
                return Ok(JObject::NULL);
            }
            rt.add_local_ref(mirror)
        }
        _ => rt.box_primitive(ret, value),
    };
    if obj.is_null() {
        return Err(HookError::ExceptionPending);
    }
    Ok(obj)
}

impl<R: Runtime> HookContext<R> {
    /// Invoke the method as it was before hooking. `member` is either the
    /// public handle of a hooked method or the handle of its backup.
    ///
    /// Returns the boxed result, null for void. If the method throws, the
    /// exception is cleared and returned as [`HookError::InvocationTarget`].
    pub fn invoke_original(
        &self,
        member: JObject,
        this_object: JObject,
        args: JObject,
    ) -> Result<JObject, HookError> {
        let method = self
            .runtime
            .method_from_reflected(member)
            .ok_or(HookError::InvalidMember)?;
        let target = match self.registry.get(method) {
            Some(record) => record.backup,
            None if self.registry.backup_of(method).is_some() => method,
            None => return Err(HookError::NotHooked(method)),
        };
        self.invoke_method(target, this_object, args)
    }

    /// Invoke the implementation `member` overrides on `this_object`. If that
    /// implementation is hooked, its original is invoked instead.
    pub fn invoke_super(
        &self,
        this_object: JObject,
        args: JObject,
        member: JObject,
        vtable_slot: u32,
    ) -> Result<JObject, HookError> {
        let method = self
            .runtime
            .method_from_reflected(member)
            .ok_or(HookError::InvalidMember)?;
        let super_method = self
            .runtime
            .find_super_method(method, vtable_slot)
            .ok_or(HookError::NoSuperMethod(method))?;
        let target = self
            .registry
            .get(super_method)
            .map_or(super_method, |record| record.backup);
        self.invoke_method(target, this_object, args)
    }

    /// Invoke `method` directly with boxed arguments.
    pub fn invoke_method(
        &self,
        method: MethodId,
        this_object: JObject,
        args: JObject,
    ) -> Result<JObject, HookError> {
        let rt = &self.runtime;
        if !rt.ensure_initialized(method) {
            return Err(HookError::ExceptionPending);
        }
        let shorty = rt.shorty(method);

        let receiver = if rt.access_flags(method).contains(AccessFlags::STATIC) {
            MirrorRef::NULL
        } else if this_object.is_null() {
            rt.throw_new(
                ExceptionKind::NullPointer,
                &format!("null receiver for {}", rt.pretty_method(method)),
            );
            return Err(HookError::ExceptionPending);
        } else if !rt.is_instance_of_declaring_class(this_object, method) {
            rt.throw_new(
                ExceptionKind::IllegalArgument,
                &format!(
                    "Expected receiver of {}, but got {}",
                    rt.pretty_method(method),
                    rt.pretty_type_of(this_object)
                ),
            );
            return Err(HookError::ExceptionPending);
        } else {
            rt.decode(this_object)
        };

        let arg_count = if args.is_null() {
            0
        } else {
            rt.array_length(args)
        };
        if arg_count != shorty.params().len() {
            rt.throw_new(
                ExceptionKind::IllegalArgument,
                &format!(
                    "Wrong number of arguments; expected {}, got {}",
                    shorty.params().len(),
                    arg_count
                ),
            );
            return Err(HookError::ExceptionPending);
        }

        let arg_array = ArgArray::from_object_array(rt, method, &shorty, receiver, args)?;
        trace!("dexhook: invoke {}", rt.pretty_method(method));
        let result = rt.invoke(method, &shorty, &arg_array);
        if rt.exception_pending() {
            let cause = rt.exception_occurred();
            rt.exception_clear();
            return Err(HookError::InvocationTarget(cause));
        }
        box_result(rt, shorty.return_type(), result)
    }
}

impl<R: Runtime, H: HookHandler<R>> HookManager<R, H> {
    /// See [`HookContext::invoke_original`].
    pub fn invoke_original(
        &self,
        member: JObject,
        this_object: JObject,
        args: JObject,
    ) -> Result<JObject, HookError> {
        self.ctx.invoke_original(member, this_object, args)
    }

    /// See [`HookContext::invoke_super`].
    pub fn invoke_super(
        &self,
        this_object: JObject,
        args: JObject,
        member: JObject,
        vtable_slot: u32,
    ) -> Result<JObject, HookError> {
        self.ctx.invoke_super(this_object, args, member, vtable_slot)
    }
}
