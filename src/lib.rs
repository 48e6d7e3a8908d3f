/*!
This crate provides method hooking for Android runtimes that execute compiled
"quick" code (ART).

HOOK is a mechanism that intercepts method calls and handles them by user-defined code.
A hooked method keeps its identity: callers, reflection and virtual dispatch
still find the same method, but its entry point now leads to a trampoline
that marshals the call to a handler. The handler may call the original
behavior through a backup copy made when the hook was installed.

# Installation

Add it to your `Cargo.toml` like so:

```toml
[dependencies]
dexhook = "0.1"
```

# The host runtime

The crate does not link against the runtime. Everything it needs from the
host (method metadata, references, boxing, exceptions and direct invocation)
is a method of the [`Runtime`] trait, and the host provides a trampoline stub
for its ISA that spills a refs-and-args frame (see [`abi`]) and calls
[`HookManager::on_trampoline_entry`].

# Raw handler

Every call of a hooked method is passed to one [`HookHandler`]:

```rust,ignore
use dexhook::{FnHandler, HookConfig, HookManager, abi};

let config = HookConfig::new(trampoline_address, abi::native().unwrap());
let manager = HookManager::new(runtime, FnHandler(|ctx, call| {
    // log the call, then run the original
    ctx.invoke_original(call.method, call.this_object, call.args)
        .unwrap_or_default()
}), config);

manager.install_hook(member, JObject::NULL)?;
```

The object returned by the handler is unboxed against the return type of the
hooked method. To throw, leave an exception pending on the runtime.

# Callback chain

[`bridge::CallbackChain`] is a handler running prioritised "before" and
"after" callbacks around the original method:

```rust,ignore
use dexhook::bridge::{CallbackChain, returns_constant};

let manager = HookManager::new(runtime, CallbackChain::new(), config);
let unhook = manager.hook_method(member, returns_constant(answer))?;
// ...
unhook.unhook(manager.handler());
```

# Notes

Installing a hook rewrites the method's entry point. Use
[`HookConfig::thread_callback`] to suspend other threads while it happens.

Uninstalling restores the method but releases the record's handles, so it is
unsafe while other threads may still be running inside the hook.

*/

#![warn(missing_docs)]

mod callbacks;
mod dispatch;
mod err;
mod hooker;
mod invoke;
mod registry;
mod trampoline;
mod types;
mod utils;
mod value;

pub use callbacks::*;
pub use dispatch::{ORIGINAL_METHOD_ID, unbox_result};
pub use err::HookError;
pub use hooker::{HookConfig, HookContext, HookFlags, HookManager};
pub use registry::HookRecord;
pub use types::*;
pub use value::{ArgArray, JValue, convert_primitive_value};

/// Quick frame layouts
pub mod abi;

/// The callback chain
pub mod bridge;
