use crate::callbacks::{HookHandler, HookedCall, Runtime};
use crate::err::HookError;
use crate::hooker::{HookContext, HookManager};
use crate::registry::HookRecord;
use crate::types::{ExceptionKind, JObject, MethodId, PrimitiveType, Shorty};
use crate::value::{JValue, convert_primitive_value};

/// The call kind passed to the handler with every hooked call.
pub const ORIGINAL_METHOD_ID: i32 = 0;

impl<R: Runtime> HookContext<R> {
    /// Box raw arguments into an `Object[]`. Returns null when there are no
    /// arguments, unless an empty array is configured.
    fn box_arguments(&self, shorty: &Shorty, args: &[JValue]) -> Result<JObject, HookError> {
        let rt = &self.runtime;
        if !self.config.needs_args_array(args.len()) {
            return Ok(JObject::NULL);
        }
        let array = rt.new_object_array(args.len());
        if array.is_null() {
            return Err(HookError::ExceptionPending);
        }
        for (idx, (&ty, &value)) in shorty.params().iter().zip(args).enumerate() {
            let obj = if ty.is_reference() {
                value.object()
            } else {
                let boxed = rt.box_primitive(ty, value);
                if boxed.is_null() {
                    return Err(HookError::ExceptionPending);
                }
                boxed
            };
            rt.array_set(array, idx, obj);
        }
        Ok(array)
    }
}

impl<R: Runtime, H: HookHandler<R>> HookManager<R, H> {
    pub(crate) fn dispatch(
        &self,
        record: &HookRecord,
        shorty: &Shorty,
        this_object: JObject,
        args: &[JValue],
    ) -> Result<JValue, HookError> {
        let rt = &self.ctx.runtime;
        let call = HookedCall {
            method: record.reflected_handle,
            original_method_id: ORIGINAL_METHOD_ID,
            additional_info: record.additional_info,
            this_object,
            args: self.ctx.box_arguments(shorty, args)?,
        };
        let result = self.handler.handle_hooked_method(&self.ctx, &call);
        if rt.exception_pending() {
            return Err(HookError::ExceptionPending);
        }
        unbox_result(rt, record.method, shorty.return_type(), result)
    }
}

/// Convert the object returned by a handler to the raw return value of
/// `method`. Failures throw through the host and return
/// [`HookError::ExceptionPending`].
pub fn unbox_result<R: Runtime>(
    rt: &R,
    method: MethodId,
    ret: PrimitiveType,
    result: JObject,
) -> Result<JValue, HookError> {
    let class_cast = |target: &str| {
        rt.throw_new(
            ExceptionKind::ClassCast,
            &format!(
                "Couldn't convert result of type {} to {}",
                rt.pretty_type_of(result),
                target
            ),
        );
        HookError::ExceptionPending
    };

    match ret {
        PrimitiveType::Void => Ok(JValue::ZERO),
        PrimitiveType::Not if result.is_null() => Ok(JValue::ZERO),
        PrimitiveType::Not => {
            if !rt.is_instance_of_return_type(result, method) {
                return Err(class_cast(&rt.pretty_return_type(method)));
            }
            Ok(JValue::from_mirror(rt.decode(result)))
        }
        _ if result.is_null() => {
            rt.throw_new(
                ExceptionKind::NullPointer,
                &format!("Expected to unbox a '{ret}' primitive type but was returned null"),
            );
            Err(HookError::ExceptionPending)
        }
        _ => rt
            .unbox_primitive(result)
            .and_then(|(src, value)| convert_primitive_value(src, ret, value))
            .ok_or_else(|| class_cast(ret.name())),
    }
}
