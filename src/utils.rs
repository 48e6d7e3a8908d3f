use crate::callbacks::*;
use crate::err::HookError;

pub(crate) struct ThreadSuspendingGuard<'a> {
    cb: &'a CallbackOption,
}

impl<'a> ThreadSuspendingGuard<'a> {
    pub fn new(cb: &'a CallbackOption) -> Self {
        Self { cb }
    }

    pub fn run<T, F>(self, func: F) -> Result<T, HookError>
    where
        F: FnOnce() -> T,
    {
        if let CallbackOption::Some(cb) = self.cb {
            if !cb.pre() {
                return Err(HookError::PreHook);
            }
            let ret = func();
            cb.post();
            Ok(ret)
        } else {
            Ok(func())
        }
    }
}

pub(crate) struct NoSuspensionGuard<'a, R: Runtime> {
    rt: &'a R,
    cause: &'static str,
}

impl<'a, R: Runtime> NoSuspensionGuard<'a, R> {
    pub fn new(rt: &'a R, cause: &'static str) -> Self {
        Self { rt, cause }
    }

    pub fn run<T, F>(self, func: F) -> T
    where
        F: FnOnce() -> T,
    {
        let old_cause = self.rt.start_assert_no_suspension(self.cause);
        let ret = func();
        self.rt.end_assert_no_suspension(old_cause);
        ret
    }
}

pub(crate) struct LocalFrameGuard<'a, R: Runtime> {
    rt: &'a R,
}

impl<'a, R: Runtime> LocalFrameGuard<'a, R> {
    pub fn new(rt: &'a R) -> Self {
        Self { rt }
    }

    pub fn run<T, F>(self, func: F) -> Result<T, HookError>
    where
        F: FnOnce() -> T,
    {
        if !self.rt.push_local_frame() {
            return Err(HookError::LocalFrame);
        }
        let ret = func();
        self.rt.pop_local_frame();
        Ok(ret)
    }
}
