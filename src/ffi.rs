//! FFI bindings for Motion Party
//!
//! C-compatible functions for running the detectors inside the phone app.
//! All functions use C strings (null-terminated) and return allocated memory
//! that must be freed by the caller using `party_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::config::PartyConfig;
use crate::controller::{Controller, ControllerStatus, LinkState};
use crate::error::PartyError;
use crate::protocol::ControllerMessage;
use crate::types::{AccelSample, PoseFrame, SensorSample};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Result of one push, returned as JSON
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushResult<'a> {
    /// Ready-to-send wire messages
    messages: &'a [ControllerMessage],
    status: ControllerStatus,
}

/// Opaque handle to a device-side controller
pub struct PartyDetectorHandle {
    controller: Controller,
}

impl PartyDetectorHandle {
    fn push(&mut self, sample: &SensorSample) -> *mut c_char {
        let messages = self.controller.on_sample(sample);
        let result = PushResult {
            messages: &messages,
            status: self.controller.status(),
        };
        match serde_json::to_string(&result) {
            Ok(json) => string_to_cstr(&json),
            Err(e) => {
                set_last_error(&e.to_string());
                ptr::null_mut()
            }
        }
    }
}

// ============================================================================
// Detector API
// ============================================================================

/// Create a detector for the game mode in `config_json`.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a pointer that must be freed with `party_detector_free`.
/// - Returns NULL on error; call `party_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn party_detector_new(
    config_json: *const c_char,
    with_lean: bool,
) -> *mut PartyDetectorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        PartyConfig::default()
    } else {
        let parsed = cstr_to_string(config_json)
            .ok_or_else(|| PartyError::ParseError("Invalid config string pointer".to_string()))
            .and_then(|json| PartyConfig::from_json(&json));
        match parsed {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let mut controller = Controller::new(&config);
    if with_lean {
        controller = controller.with_lean(&config);
    }
    Box::into_raw(Box::new(PartyDetectorHandle { controller }))
}

/// Free a detector.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `party_detector_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn party_detector_free(detector: *mut PartyDetectorHandle) {
    if !detector.is_null() {
        drop(Box::from_raw(detector));
    }
}

/// Feed one accelerometer reading (m/s²).
///
/// # Safety
/// - `detector` must be a valid pointer returned by `party_detector_new`.
/// - Returns a newly allocated JSON string `{messages, status}` that must be
///   freed with `party_free_string`.
/// - Returns NULL on error; call `party_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn party_detector_push_accel(
    detector: *mut PartyDetectorHandle,
    timestamp_ms: u64,
    x: f64,
    y: f64,
    z: f64,
    linear: bool,
) -> *mut c_char {
    clear_last_error();

    if detector.is_null() {
        set_last_error("Null detector pointer");
        return ptr::null_mut();
    }
    let handle = &mut *detector;

    let mut sample = AccelSample::new(timestamp_ms, x, y, z);
    sample.linear = linear;
    handle.push(&SensorSample::Accel(sample))
}

/// Feed one pose frame given as JSON `{timestamp_ms, landmarks: [{x, y, z, visibility}]}`.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `party_detector_new`.
/// - `frame_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `party_free_string`.
/// - Returns NULL on error; call `party_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn party_detector_push_pose(
    detector: *mut PartyDetectorHandle,
    frame_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if detector.is_null() {
        set_last_error("Null detector pointer");
        return ptr::null_mut();
    }
    let handle = &mut *detector;

    let json_str = match cstr_to_string(frame_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid frame string pointer");
            return ptr::null_mut();
        }
    };

    match serde_json::from_str::<PoseFrame>(&json_str) {
        Ok(frame) => handle.push(&SensorSample::Pose(frame)),
        Err(e) => {
            set_last_error(&PartyError::from(e).to_string());
            ptr::null_mut()
        }
    }
}

/// Report whether the app's socket to the session server is open.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `party_detector_new`.
#[no_mangle]
pub unsafe extern "C" fn party_detector_set_connected(
    detector: *mut PartyDetectorHandle,
    connected: bool,
) {
    if let Some(handle) = detector.as_mut() {
        handle.controller.set_link(if connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        });
    }
}

/// Report a sensor failure: `code` 1 = sensor unavailable, 2 = permission denied.
///
/// Returns 1 when the failure ends detection, 0 when it does not, -1 on bad input.
///
/// # Safety
/// - `detector` must be a valid pointer returned by `party_detector_new`.
/// - `detail` must be a valid null-terminated C string, or NULL.
#[no_mangle]
pub unsafe extern "C" fn party_detector_sensor_error(
    detector: *mut PartyDetectorHandle,
    code: i32,
    detail: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = detector.as_mut() else {
        set_last_error("Null detector pointer");
        return -1;
    };
    let detail = cstr_to_string(detail).unwrap_or_else(|| "sensor".to_string());
    let err = match code {
        1 => PartyError::SensorUnavailable(detail),
        2 => PartyError::PermissionDenied(detail),
        other => {
            set_last_error(&format!("Unknown sensor error code: {}", other));
            return -1;
        }
    };
    i32::from(handle.controller.on_sensor_error(&err))
}

/// Free a string returned by Motion Party functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Motion Party function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn party_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Motion Party call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn party_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn party_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
