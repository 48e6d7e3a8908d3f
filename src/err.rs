use thiserror::Error;

use crate::types::{JObject, MethodId};

/// Hook errors.
#[derive(Error, Debug)]
pub enum HookError {
    /// A shorty contains an unknown type character, or `V` in a parameter position
    #[error("invalid shorty: {0:?}")]
    InvalidShorty(String),

    /// The handle does not resolve to a method or constructor
    #[error("invalid member: not a method or constructor")]
    InvalidMember,

    /// The method is the backup of another hooked method
    #[error("method {0:?} is a hook backup and can not be hooked")]
    BackupMethod(MethodId),

    /// The method has no hook installed
    #[error("method {0:?} is not hooked")]
    NotHooked(MethodId),

    /// The host could not resolve a super implementation
    #[error("no super implementation of method {0:?}")]
    NoSuperMethod(MethodId),

    /// The host heap failed to allocate an object or a method copy
    #[error("memory allocation error")]
    MemoryAllocation,

    /// An exception is pending on the current thread
    #[error("an exception is pending on the current thread")]
    ExceptionPending,

    /// The invoked method threw. The pending exception has been cleared and
    /// its throwable is carried here.
    #[error("invocation target threw {0:?}")]
    InvocationTarget(JObject),

    /// The host could not open a local reference frame
    #[error("local reference frame error")]
    LocalFrame,

    /// The pre-hook thread callback failed
    #[error("pre hook failed")]
    PreHook,
}
