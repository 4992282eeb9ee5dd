//! C ABI exported by the cdylib.
//!
//! # Responsibilities
//! - Host one process-wide manager on a private multi-thread tokio runtime
//! - Translate C strings in and out; every failure surfaces as a status, never a panic
//! - Forward status transitions to a registered C callback
//!
//! # Design Decisions
//! - Calls block the caller until the operation completes
//! - No signal handlers are installed; the embedding process owns its lifecycle
//! - Panics are caught at the boundary and logged
//! - `GetStatus` returns an empty string for unknown instances, `GetPort` returns -1
//! - Strings returned to the caller must be released with `FreeString`
//! - Callbacks run on manager threads and must not call `StopProxy`,
//!   `StopAll` or a start function re-entrantly

use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tokio::runtime::Runtime;

use crate::auth::AuthConfig;
use crate::config::{load_config, ManagerConfig, CONFIG_PATH_ENV};
use crate::instance::Status;
use crate::manager::{ProxyManager, StatusSink};
use crate::observability::logging::init_logging;

/// Status callback: `(instance, status, detail)`, all NUL-terminated UTF-8.
pub type StatusCallback = extern "C" fn(*const c_char, *const c_char, *const c_char);

struct Host {
    runtime: Runtime,
    manager: ProxyManager,
}

static HOST: OnceLock<Result<Host, String>> = OnceLock::new();

fn host() -> Option<&'static Host> {
    match HOST.get_or_init(create_host) {
        Ok(host) => Some(host),
        Err(e) => {
            tracing::error!(error = %e, "Proxy manager host unavailable");
            None
        }
    }
}

fn create_host() -> Result<Host, String> {
    let config = match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) => load_config(Path::new(&path)).map_err(|e| e.to_string())?,
        None => ManagerConfig::default(),
    };
    // The embedding process may already have installed a subscriber.
    let _ = init_logging(&config.observability);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sqlproxy-manager")
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    let manager = {
        let _guard = runtime.enter();
        ProxyManager::new(config).map_err(|e| e.to_string())?
    };
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Proxy manager host started");

    Ok(Host { runtime, manager })
}

/// Run `f`, turning a panic into `fallback`.
fn guarded<T>(operation: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!(operation, "Panic caught at FFI boundary");
            fallback
        }
    }
}

/// Borrow a C string argument. Null reads as empty.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
unsafe fn arg(ptr: *const c_char, what: &str) -> Option<String> {
    if ptr.is_null() {
        return Some(String::new());
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(s) => Some(s.to_string()),
        Err(e) => {
            tracing::error!(argument = what, error = %e, "Argument is not valid UTF-8");
            None
        }
    }
}

fn to_c_string(s: &str) -> CString {
    CString::new(s.replace('\0', " ")).unwrap_or_default()
}

struct CallbackSink(StatusCallback);

impl StatusSink for CallbackSink {
    fn on_status(&self, instance: &str, status: Status, detail: &str) {
        let instance = to_c_string(instance);
        let status = to_c_string(status.as_str());
        let detail = to_c_string(detail);
        (self.0)(instance.as_ptr(), status.as_ptr(), detail.as_ptr());
    }
}

fn start(instances: String, auth: AuthConfig) {
    let Some(host) = host() else { return };
    // Failures are reported through status and the callback.
    let _ = host.runtime.block_on(host.manager.start(&instances, auth));
}

/// Register the status callback, replacing any previous one. Null clears it.
#[export_name = "SetCallback"]
pub extern "C" fn set_callback(callback: Option<StatusCallback>) {
    guarded("SetCallback", (), || {
        let Some(host) = host() else { return };
        match callback {
            Some(callback) => host.manager.set_sink(Arc::new(CallbackSink(callback))),
            None => host.manager.remove_sink(),
        }
    })
}

#[export_name = "RemoveCallback"]
pub extern "C" fn remove_callback() {
    guarded("RemoveCallback", (), || {
        if let Some(host) = host() {
            host.manager.remove_sink();
        }
    })
}

/// Start `instances` authenticating with the credential file at `path`.
///
/// # Safety
/// Both arguments must be null or valid NUL-terminated strings.
#[export_name = "StartProxyWithCredentialFile"]
pub unsafe extern "C" fn start_proxy_with_credential_file(
    instances: *const c_char,
    path: *const c_char,
) {
    guarded("StartProxyWithCredentialFile", (), || {
        let (Some(instances), Some(path)) = (arg(instances, "instances"), arg(path, "path")) else {
            return;
        };
        start(instances, AuthConfig::file(path));
    })
}

/// Start `instances` authenticating with an inline credential JSON document.
///
/// # Safety
/// Both arguments must be null or valid NUL-terminated strings.
#[export_name = "StartProxyWithCredentialJson"]
pub unsafe extern "C" fn start_proxy_with_credential_json(
    instances: *const c_char,
    json: *const c_char,
) {
    guarded("StartProxyWithCredentialJson", (), || {
        let (Some(instances), Some(json)) = (arg(instances, "instances"), arg(json, "json")) else {
            return;
        };
        start(instances, AuthConfig::json(json));
    })
}

/// # Safety
/// `name` must be null or a valid NUL-terminated string.
#[export_name = "StopProxy"]
pub unsafe extern "C" fn stop_proxy(name: *const c_char) {
    guarded("StopProxy", (), || {
        let (Some(host), Some(name)) = (host(), arg(name, "name")) else {
            return;
        };
        host.runtime.block_on(host.manager.stop(&name));
    })
}

#[export_name = "StopAll"]
pub extern "C" fn stop_all() {
    guarded("StopAll", (), || {
        if let Some(host) = host() {
            host.runtime.block_on(host.manager.stop_all());
        }
    })
}

/// Status text of `name`, or an empty string when it is not registered.
/// Release the result with [`free_string`].
///
/// # Safety
/// `name` must be null or a valid NUL-terminated string.
#[export_name = "GetStatus"]
pub unsafe extern "C" fn get_status(name: *const c_char) -> *mut c_char {
    let status = guarded("GetStatus", None, || {
        let name = arg(name, "name")?;
        host()?.manager.status(&name)
    });
    to_c_string(status.map_or("", |s| s.as_str())).into_raw()
}

/// First listener port of `name`, or -1 when unknown or not bound.
///
/// # Safety
/// `name` must be null or a valid NUL-terminated string.
#[export_name = "GetPort"]
pub unsafe extern "C" fn get_port(name: *const c_char) -> c_int {
    guarded("GetPort", -1, || {
        let port = host()
            .zip(arg(name, "name"))
            .and_then(|(host, name)| host.manager.port(&name));
        port.map_or(-1, c_int::from)
    })
}

/// Release a string returned by this library.
///
/// # Safety
/// `s` must be null or a pointer previously returned by this library and not yet freed.
#[export_name = "FreeString"]
pub unsafe extern "C" fn free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
