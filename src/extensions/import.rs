//! Host-side implementation of the extension capability table.
//!
//! Extensions call back into the core through plain C function pointers,
//! so the state these functions reach must live at process scope: the
//! variables created on behalf of extensions, the recording flag, the
//! session device pointer and the loaded-extension names. The movie
//! session installs the latter two at its boundaries.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use sdr_extension::{ImportData, API_VERSION};

use crate::console::{self, CommandArgs, Variable};

static IMPORT_VARS: Lazy<Mutex<Vec<Variable>>> = Lazy::new(|| Mutex::new(Vec::new()));
static EXTENSION_NAMES: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(Vec::new()));
static RECORDING: AtomicBool = AtomicBool::new(false);
static DEVICE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

/// Session start/end toggles what `is_recording_video` reports.
pub(crate) fn set_recording(active: bool) {
    RECORDING.store(active, Ordering::Release);
}

/// Installs the opaque device pointer handed out to extensions. Cleared
/// (null) outside a session.
pub(crate) fn set_graphics_device(device: *const c_void) {
    DEVICE.store(device as *mut c_void, Ordering::Release);
}

pub(crate) fn set_extension_names(names: Vec<String>) {
    *EXTENSION_NAMES.lock().unwrap() = names;
}

unsafe fn text_at(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// Copies `value` into the caller's buffer, nul-terminated, and returns
/// the full value length.
unsafe fn copy_out(value: &str, buf: *mut c_char, cap: usize) -> usize {
    if !buf.is_null() && cap > 0 {
        let count = value.len().min(cap - 1);
        unsafe {
            std::ptr::copy_nonoverlapping(value.as_ptr(), buf as *mut u8, count);
            *buf.add(count) = 0;
        }
    }
    value.len()
}

fn stored_var(key: u32) -> Option<Variable> {
    IMPORT_VARS.lock().unwrap().get(key as usize).cloned()
}

fn store_var(var: Variable) -> u32 {
    let mut vars = IMPORT_VARS.lock().unwrap();
    vars.push(var);
    (vars.len() - 1) as u32
}

unsafe fn args_at<'a>(ptr: *const c_void) -> Option<&'a CommandArgs> {
    unsafe { (ptr as *const CommandArgs).as_ref() }
}

// Log sinks given to every extension at initialize time.

pub(crate) unsafe extern "C" fn log_message(text: *const c_char) {
    log::info!("{}", unsafe { text_at(text) }.trim_end());
}

pub(crate) unsafe extern "C" fn log_message_color(r: u8, g: u8, b: u8, text: *const c_char) {
    // Console colors do not survive the log facade; the text does.
    let _ = (r, g, b);
    log::info!("{}", unsafe { text_at(text) }.trim_end());
}

pub(crate) unsafe extern "C" fn log_warning(text: *const c_char) {
    log::warn!("{}", unsafe { text_at(text) }.trim_end());
}

// Capability table entries.

unsafe extern "C" fn make_bool(name: *const c_char, value: *const c_char) -> u32 {
    let (name, value) = unsafe { (text_at(name), text_at(value)) };
    store_var(console::registry().make_bool(&name, &value))
}

unsafe extern "C" fn make_number(name: *const c_char, value: *const c_char) -> u32 {
    let (name, value) = unsafe { (text_at(name), text_at(value)) };
    store_var(console::registry().make_number(&name, &value))
}

unsafe extern "C" fn make_number_min(name: *const c_char, value: *const c_char, min: f32) -> u32 {
    let (name, value) = unsafe { (text_at(name), text_at(value)) };
    store_var(console::registry().make_number_min(&name, &value, min))
}

unsafe extern "C" fn make_number_min_max(
    name: *const c_char,
    value: *const c_char,
    min: f32,
    max: f32,
) -> u32 {
    let (name, value) = unsafe { (text_at(name), text_at(value)) };
    store_var(console::registry().make_number_min_max(&name, &value, min, max))
}

unsafe extern "C" fn make_number_min_max_string(
    name: *const c_char,
    value: *const c_char,
    min: f32,
    max: f32,
) -> u32 {
    let (name, value) = unsafe { (text_at(name), text_at(value)) };
    store_var(console::registry().make_number_min_max_string(&name, &value, min, max))
}

unsafe extern "C" fn make_string(name: *const c_char, value: *const c_char) -> u32 {
    let (name, value) = unsafe { (text_at(name), text_at(value)) };
    store_var(console::registry().make_string(&name, &value))
}

unsafe extern "C" fn get_bool(key: u32) -> bool {
    stored_var(key).map(|v| v.get_bool()).unwrap_or(false)
}

unsafe extern "C" fn get_int(key: u32) -> i32 {
    stored_var(key).map(|v| v.get_int()).unwrap_or(0)
}

unsafe extern "C" fn get_float(key: u32) -> f32 {
    stored_var(key).map(|v| v.get_float()).unwrap_or(0.0)
}

unsafe extern "C" fn get_string(key: u32, buf: *mut c_char, cap: usize) -> usize {
    let value = stored_var(key).map(|v| v.get_string()).unwrap_or_default();
    unsafe { copy_out(&value, buf, cap) }
}

unsafe extern "C" fn get_external_bool(name: *const c_char) -> bool {
    console::registry()
        .find(&unsafe { text_at(name) })
        .map(|v| v.get_bool())
        .unwrap_or(false)
}

unsafe extern "C" fn get_external_int(name: *const c_char) -> i32 {
    console::registry()
        .find(&unsafe { text_at(name) })
        .map(|v| v.get_int())
        .unwrap_or(0)
}

unsafe extern "C" fn get_external_float(name: *const c_char) -> f32 {
    console::registry()
        .find(&unsafe { text_at(name) })
        .map(|v| v.get_float())
        .unwrap_or(0.0)
}

unsafe extern "C" fn get_external_string(name: *const c_char, buf: *mut c_char, cap: usize) -> usize {
    let value = console::registry()
        .find(&unsafe { text_at(name) })
        .map(|v| v.get_string())
        .unwrap_or_default();
    unsafe { copy_out(&value, buf, cap) }
}

unsafe extern "C" fn make_command_void(name: *const c_char, func: sdr_extension::CommandCallbackVoid) {
    console::registry().make_command_native_void(&unsafe { text_at(name) }, func);
}

unsafe extern "C" fn make_command_args(name: *const c_char, func: sdr_extension::CommandCallbackArgs) {
    console::registry().make_command_native_args(&unsafe { text_at(name) }, func);
}

unsafe extern "C" fn get_command_argument_count(args: *const c_void) -> i32 {
    unsafe { args_at(args) }.map(|a| a.count() as i32).unwrap_or(0)
}

unsafe extern "C" fn get_command_argument_at(
    args: *const c_void,
    index: i32,
    buf: *mut c_char,
    cap: usize,
) -> usize {
    let value = unsafe { args_at(args) }
        .map(|a| a.at(index.max(0) as usize).to_string())
        .unwrap_or_default();
    unsafe { copy_out(&value, buf, cap) }
}

unsafe extern "C" fn get_command_argument_full(
    args: *const c_void,
    buf: *mut c_char,
    cap: usize,
) -> usize {
    let value = unsafe { args_at(args) }.map(|a| a.full_args()).unwrap_or_default();
    unsafe { copy_out(&value, buf, cap) }
}

unsafe extern "C" fn get_command_argument_full_value(
    args: *const c_void,
    buf: *mut c_char,
    cap: usize,
) -> usize {
    let value = unsafe { args_at(args) }
        .map(|a| a.full_value().to_string())
        .unwrap_or_default();
    unsafe { copy_out(&value, buf, cap) }
}

unsafe extern "C" fn get_time_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

unsafe extern "C" fn is_recording_video() -> bool {
    RECORDING.load(Ordering::Acquire)
}

unsafe extern "C" fn get_graphics_device() -> *const c_void {
    DEVICE.load(Ordering::Acquire)
}

unsafe extern "C" fn get_extension_count() -> u32 {
    EXTENSION_NAMES.lock().unwrap().len() as u32
}

unsafe extern "C" fn get_extension_file_name(key: u32, buf: *mut c_char, cap: usize) -> usize {
    let value = EXTENSION_NAMES
        .lock()
        .unwrap()
        .get(key as usize)
        .cloned()
        .unwrap_or_default();
    unsafe { copy_out(&value, buf, cap) }
}

/// Builds the capability table for the extension at `extension_key`.
pub(crate) fn import_data(extension_key: u32) -> ImportData {
    ImportData {
        api_version: API_VERSION,
        extension_key,
        make_bool,
        make_number,
        make_number_min,
        make_number_min_max,
        make_number_min_max_string,
        make_string,
        get_bool,
        get_int,
        get_float,
        get_string,
        get_external_bool,
        get_external_int,
        get_external_float,
        get_external_string,
        make_command_void,
        make_command_args,
        get_command_argument_count,
        get_command_argument_at,
        get_command_argument_full,
        get_command_argument_full_value,
        get_time_now,
        is_recording_video,
        get_graphics_device,
        get_extension_count,
        get_extension_file_name,
    }
}

/// Nul-terminated copy for handing short-lived strings across the ABI.
pub(crate) fn to_cstring(text: &str) -> CString {
    CString::new(text.replace('\0', "")).expect("interior nul removed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_table_round_trips_variables() {
        let name = to_cstring("ext_test_number");
        let value = to_cstring("5");

        let key = unsafe { make_number_min_max(name.as_ptr(), value.as_ptr(), 0.0, 10.0) };
        assert_eq!(unsafe { get_int(key) }, 5);
        assert!(unsafe { get_bool(key) });

        let mut buf = [0 as c_char; 8];
        let len = unsafe { get_string(key, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(len, 1);
        assert_eq!(buf[0] as u8, b'5');
        assert_eq!(buf[1], 0);
    }

    #[test]
    fn copy_out_truncates_but_reports_full_length() {
        let mut buf = [0 as c_char; 4];
        let len = unsafe { copy_out("abcdefgh", buf.as_mut_ptr(), buf.len()) };
        assert_eq!(len, 8);
        assert_eq!(buf[2] as u8, b'c');
        assert_eq!(buf[3], 0);
    }

    #[test]
    fn command_argument_accessors_follow_parse() {
        let args = CommandArgs::parse("mycmd one two");
        let ptr = &args as *const CommandArgs as *const c_void;

        assert_eq!(unsafe { get_command_argument_count(ptr) }, 3);

        let mut buf = [0 as c_char; 16];
        unsafe { get_command_argument_at(ptr, 2, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(buf[0] as u8, b't');

        let len = unsafe { get_command_argument_full_value(ptr, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(len, "one two".len());
    }
}
