use crate::hooker::HookContext;
use crate::types::{
    AccessFlags, ExceptionKind, JObject, MemberKind, MethodId, MirrorRef, PrimitiveType, Shorty,
};
use crate::value::{ArgArray, JValue};

/// The services of the host runtime that hooking relies on.
///
/// Every method acts on behalf of the calling thread: local references,
/// pending exceptions and suspension assertions are per thread, like a
/// `JNIEnv`. Failing allocations return a null handle (or `None`) and leave
/// an exception pending.
pub trait Runtime: Send + Sync {
    /// Resolve a `Method`/`Constructor` handle to its metadata.
    fn method_from_reflected(&self, member: JObject) -> Option<MethodId>;
    /// Shorty of the method.
    fn shorty(&self, method: MethodId) -> Shorty;
    /// Access flags of the method.
    fn access_flags(&self, method: MethodId) -> AccessFlags;
    /// Overwrite the access flags of the method.
    fn set_access_flags(&self, method: MethodId, flags: AccessFlags);
    /// The address the quick calling convention jumps to.
    fn entry_point(&self, method: MethodId) -> usize;
    /// Redirect the quick entry point.
    fn set_entry_point(&self, method: MethodId, entry: usize);
    /// Copy the full metadata of `method` into a newly allocated method.
    fn clone_method(&self, method: MethodId) -> Option<MethodId>;
    /// Allocate a reflective object of `kind` pointing at `method`.
    fn new_reflected_member(&self, method: MethodId, kind: MemberKind) -> JObject;
    /// Initialise the declaring class of `method`. Returns false with an
    /// exception pending if initialisation failed.
    fn ensure_initialized(&self, method: MethodId) -> bool;
    /// The implementation `method` overrides, starting the lookup at
    /// `vtable_slot` of the superclass when the host uses slots.
    fn find_super_method(&self, method: MethodId, vtable_slot: u32) -> Option<MethodId>;

    /// Create a global reference; null on failure.
    fn new_global_ref(&self, obj: JObject) -> JObject;
    /// Delete a global reference.
    fn delete_global_ref(&self, obj: JObject);
    /// Register a heap reference as a local reference.
    fn add_local_ref(&self, obj: MirrorRef) -> JObject;
    /// Delete a local reference.
    fn delete_local_ref(&self, obj: JObject);
    /// The current heap address of a handle's referent.
    fn decode(&self, obj: JObject) -> MirrorRef;
    /// Open a local reference frame; false on failure.
    fn push_local_frame(&self) -> bool;
    /// Close the innermost local reference frame.
    fn pop_local_frame(&self);

    /// Box a primitive into its wrapper object.
    fn box_primitive(&self, ty: PrimitiveType, value: JValue) -> JObject;
    /// Kind and value of a boxed primitive; `None` if `obj` is not a box.
    fn unbox_primitive(&self, obj: JObject) -> Option<(PrimitiveType, JValue)>;
    /// Whether `obj` is an instance of the declaring class of `method`.
    fn is_instance_of_declaring_class(&self, obj: JObject, method: MethodId) -> bool;
    /// Whether `obj` is assignable to the reference parameter `index`.
    fn is_instance_of_param_type(&self, obj: JObject, method: MethodId, index: usize) -> bool;
    /// Whether `obj` is assignable to the reference return type.
    fn is_instance_of_return_type(&self, obj: JObject, method: MethodId) -> bool;

    /// Allocate an `Object[]` of `len` null elements.
    fn new_object_array(&self, len: usize) -> JObject;
    /// Length of an array.
    fn array_length(&self, array: JObject) -> usize;
    /// Element `index` of an `Object[]` as a local reference.
    fn array_get(&self, array: JObject, index: usize) -> JObject;
    /// Store into an `Object[]`.
    fn array_set(&self, array: JObject, index: usize, value: JObject);

    /// Record the top quick frame so the stack stays walkable.
    fn set_top_of_stack(&self, sp: *mut u8);
    /// Forbid thread suspension until the matching end call.
    fn start_assert_no_suspension(&self, cause: &'static str) -> Option<&'static str>;
    /// End the region opened by `start_assert_no_suspension`.
    fn end_assert_no_suspension(&self, old_cause: Option<&'static str>);

    /// Whether an exception is pending.
    fn exception_pending(&self) -> bool;
    /// The pending throwable as a local reference, or null.
    fn exception_occurred(&self) -> JObject;
    /// Clear the pending exception.
    fn exception_clear(&self);
    /// Make `throwable` the pending exception.
    fn throw(&self, throwable: JObject);
    /// Allocate and throw an exception of `kind`.
    fn throw_new(&self, kind: ExceptionKind, msg: &str);

    /// Invoke `method` directly, without virtual dispatch and without going
    /// through its entry point lookup. An exception thrown by the method is
    /// left pending.
    fn invoke(&self, method: MethodId, shorty: &Shorty, args: &ArgArray) -> JValue;

    /// Human readable method name, used in messages.
    fn pretty_method(&self, method: MethodId) -> String;
    /// Human readable type of an object, used in messages.
    fn pretty_type_of(&self, obj: JObject) -> String;
    /// Human readable type of a reference parameter.
    fn pretty_param_type(&self, method: MethodId, index: usize) -> String;
    /// Human readable return type.
    fn pretty_return_type(&self, method: MethodId) -> String;
}

/// One interception, as passed to the handler.
#[derive(Clone, Debug)]
pub struct HookedCall {
    /// `Method`/`Constructor` handle of the backup. Pass it to
    /// [`HookContext::invoke_original`] to run the original code.
    pub method: JObject,
    /// Call kind, always 0
    pub original_method_id: i32,
    /// The payload given when installing the hook
    pub additional_info: JObject,
    /// The receiver, null for static methods
    pub this_object: JObject,
    /// `Object[]` of the boxed arguments, may be null when there are none
    pub args: JObject,
}

/// The callback every hooked call is dispatched to.
///
/// The returned object is unboxed against the hooked method's return type.
/// To throw, leave an exception pending on the runtime and return null.
pub trait HookHandler<R: Runtime>: Send + Sync {
    /// Handle one call of a hooked method.
    fn handle_hooked_method(&self, ctx: &HookContext<R>, call: &HookedCall) -> JObject;
}

/// Adapts a closure to a [`HookHandler`].
pub struct FnHandler<F>(pub F);

impl<R, F> HookHandler<R> for FnHandler<F>
where
    R: Runtime,
    F: Fn(&HookContext<R>, &HookedCall) -> JObject + Send + Sync,
{
    fn handle_hooked_method(&self, ctx: &HookContext<R>, call: &HookedCall) -> JObject {
        (self.0)(ctx, call)
    }
}

/// The trait which is called before and after rewriting an entry point.
/// Usually is used to suspend and resume all other threads, so that no thread
/// observes a half updated method.
pub trait ThreadCallback: Send + Sync {
    /// the callback before rewriting, should return true if success.
    fn pre(&self) -> bool;
    /// the callback after rewriting
    fn post(&self);
}

/// Option for thread callback
pub enum CallbackOption {
    /// Valid callback
    Some(Box<dyn ThreadCallback>),
    /// No callback
    None,
}
