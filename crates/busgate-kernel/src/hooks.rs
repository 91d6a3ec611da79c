//! Guarded calls into module code.
//!
//! A module hook may return an error or panic; neither is allowed to unwind
//! past the supervisor. Both come back as a [`ModuleError`], logged once
//! here with the module id and hook name.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use busgate_types::ModuleError;
use futures_util::FutureExt;
use tracing::error;

pub(crate) async fn guarded<T, F>(module: &str, hook: &'static str, call: F) -> Result<T, ModuleError>
where
    F: Future<Output = Result<T, ModuleError>>,
{
    let result = match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(ModuleError::Panicked(panic_message(payload.as_ref()))),
    };
    if let Err(e) = &result {
        error!(module = %module, hook, error = %e, "module hook failed");
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
