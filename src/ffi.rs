//! FFI bindings for Learnstate
//!
//! C-compatible functions for driving a learning-state pipeline from other
//! languages. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using
//! `learnstate_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, TimeZone, Utc};

use crate::config::PipelineConfig;
use crate::pipeline::LearningStatePipeline;
use crate::schema::FrameRecord;

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

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

// ============================================================================
// Pipeline API
// ============================================================================

/// Opaque handle to a LearningStatePipeline
pub struct LearnstatePipelineHandle {
    pipeline: LearningStatePipeline,
}

/// Create a pipeline from a JSON configuration.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a pointer that must be freed with `learnstate_pipeline_free`.
/// - Returns NULL on error; call `learnstate_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn learnstate_pipeline_new(
    config_json: *const c_char,
) -> *mut LearnstatePipelineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        PipelineConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match PipelineConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match LearningStatePipeline::with_config(config) {
        Ok(pipeline) => Box::into_raw(Box::new(LearnstatePipelineHandle { pipeline })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a pipeline.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `learnstate_pipeline_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn learnstate_pipeline_free(handle: *mut LearnstatePipelineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Process one frame record and return the frame outcome as JSON.
///
/// A face payload that does not decode yields a `failed` outcome; only a
/// record whose header cannot be read returns NULL.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `learnstate_pipeline_new`.
/// - `record_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `learnstate_free_string`.
/// - Returns NULL on error; call `learnstate_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn learnstate_process_frame(
    handle: *mut LearnstatePipelineHandle,
    record_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    let json = match cstr_to_string(record_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid record string pointer");
            return ptr::null_mut();
        }
    };

    let record: FrameRecord = match serde_json::from_str(&json) {
        Ok(record) => record,
        Err(e) => {
            set_last_error(&format!("Invalid frame record: {}", e));
            return ptr::null_mut();
        }
    };

    let outcome = handle
        .pipeline
        .process_frame(record.model_output(), record.context());

    match serde_json::to_string(&outcome) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Dominant recent state at `now_ms` (Unix epoch milliseconds).
///
/// # Safety
/// - `handle` must be a valid pointer returned by `learnstate_pipeline_new`.
/// - Returns a newly allocated string (e.g. `"confused"`) that must be freed
///   with `learnstate_free_string`.
/// - Returns NULL on error; call `learnstate_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn learnstate_dominant_state(
    handle: *mut LearnstatePipelineHandle,
    now_ms: i64,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &*handle;

    let now = match millis_to_datetime(now_ms) {
        Some(now) => now,
        None => {
            set_last_error("Timestamp out of range");
            return ptr::null_mut();
        }
    };

    string_to_cstr(handle.pipeline.dominant_recent_state(now).as_str())
}

/// Serialize a snapshot of the pipeline (published state, stats, latest
/// detection) as JSON, evaluated at the current wall-clock time.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `learnstate_pipeline_new`.
/// - Returns a newly allocated string that must be freed with `learnstate_free_string`.
/// - Returns NULL on error; call `learnstate_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn learnstate_snapshot(handle: *mut LearnstatePipelineHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline pointer");
        return ptr::null_mut();
    }
    let handle = &*handle;

    match serde_json::to_string(&handle.pipeline.snapshot(Utc::now())) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Learnstate functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Learnstate function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn learnstate_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Learnstate function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn learnstate_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Learnstate library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn learnstate_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
