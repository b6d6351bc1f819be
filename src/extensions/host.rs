//! # Extension Host
//!
//! Discovers dynamic libraries under `Extensions/Enabled/`, resolves their
//! exports, orders them per `Order.json` and dispatches the lifecycle
//! events. A module that fails to load or initialize is skipped and
//! reported; the recorder keeps working without it.
//!
//! The per-frame callback list is collected separately so the hot path
//! never walks extensions that do not implement it.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::path::Path;

use log::{info, warn};

use sdr_extension as ext;

use super::import;
use crate::error::{Error, Result};
use crate::graphics::ComputeContext;

/// Strings copied out of the module's query response.
#[derive(Debug, Default, Clone)]
pub struct ExtensionInfo {
    pub name: Option<String>,
    pub namespace_: Option<String>,
    pub author: Option<String>,
    pub contact: Option<String>,
    pub version: u32,
    pub dependencies: Option<String>,
}

struct Callbacks {
    config_handler: Option<ext::ConfigHandler>,
    ready: Option<ext::Ready>,
    start_movie: Option<ext::StartMovie>,
    end_movie: Option<ext::EndMovie>,
    new_video_frame: Option<ext::NewVideoFrame>,
}

pub struct Extension {
    pub file_name: String,
    pub info: ExtensionInfo,
    callbacks: Callbacks,
    // Keeps the module mapped for as long as its function pointers are
    // callable. Dropped last.
    _library: libloading::Library,
}

#[derive(Default)]
pub struct ExtensionHost {
    loaded: Vec<Extension>,
    new_video_frame: Vec<ext::NewVideoFrame>,
}

fn optional_text(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(
            unsafe { CStr::from_ptr(ptr) }
                .to_string_lossy()
                .into_owned(),
        )
    }
}

impl ExtensionHost {
    /// Loads every module in `Extensions/Enabled/` under the resource
    /// root and applies the order file. Failures are per-module.
    pub fn load_all(resource_root: &Path) -> Self {
        let mut host = Self::default();

        let dir = resource_root.join("Extensions").join("Enabled");
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return host,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_module = path
                .extension()
                .map(|e| e == std::env::consts::DLL_EXTENSION)
                .unwrap_or(false);
            if !is_module {
                continue;
            }

            match load_one(&path) {
                Ok(extension) => {
                    info!("loaded extension \"{}\"", extension.file_name);
                    host.loaded.push(extension);
                }
                Err(err) => warn!("skipping extension: {err}"),
            }
        }

        if let Some(order) = read_order(&dir) {
            host.loaded = reorder(std::mem::take(&mut host.loaded), &order, |e| {
                e.file_name.as_str()
            });
        }

        host.rebuild_hot_lists();
        import::set_extension_names(host.loaded.iter().map(|e| e.file_name.clone()).collect());

        host
    }

    fn rebuild_hot_lists(&mut self) {
        self.new_video_frame = self
            .loaded
            .iter()
            .filter_map(|e| e.callbacks.new_video_frame)
            .collect();
    }

    pub fn has_extensions(&self) -> bool {
        !self.loaded.is_empty()
    }

    pub fn count(&self) -> usize {
        self.loaded.len()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.loaded.iter().map(|e| e.file_name.clone()).collect()
    }

    /// Whether any loaded extension owns a namespace prefixing `key`.
    pub fn is_namespace_loaded(&self, key: &str) -> bool {
        self.loaded.iter().any(|e| {
            e.info
                .namespace_
                .as_deref()
                .map(|ns| key.starts_with(ns))
                .unwrap_or(false)
        })
    }

    /// Routes a config entry to the first extension whose namespace
    /// prefixes the key and that reports it handled.
    pub fn dispatch_config(&self, key: &str, value_json: &str) -> bool {
        let key_c = import::to_cstring(key);
        let value_c = import::to_cstring(value_json);

        for extension in &self.loaded {
            let Some(handler) = extension.callbacks.config_handler else {
                continue;
            };
            let Some(namespace_) = extension.info.namespace_.as_deref() else {
                continue;
            };

            if key.starts_with(namespace_)
                && unsafe { handler(key_c.as_ptr(), value_c.as_ptr()) }
            {
                return true;
            }
        }

        false
    }

    /// Fires `ready` in order, handing each extension the capability table
    /// with its own monotonically increasing key.
    pub fn event_ready(&self) {
        for (key, extension) in self.loaded.iter().enumerate() {
            if let Some(ready) = extension.callbacks.ready {
                let data = import::import_data(key as u32);
                unsafe { ready(&data) };
            }
        }
    }

    pub fn event_start_movie(&self, data: &ext::StartMovieData) {
        for extension in &self.loaded {
            if let Some(start) = extension.callbacks.start_movie {
                unsafe { start(data) };
            }
        }
    }

    pub fn event_end_movie(&self) {
        for extension in &self.loaded {
            if let Some(end) = extension.callbacks.end_movie {
                unsafe { end() };
            }
        }
    }

    /// Per-frame hot path, walks only the collected pointers.
    pub fn event_new_video_frame(&self, ctx: &ComputeContext, work_buffer: &wgpu::Buffer) {
        if self.new_video_frame.is_empty() {
            return;
        }

        let data = ext::NewVideoFrameData {
            device: ctx.device() as *const wgpu::Device as *const c_void,
            queue: ctx.queue() as *const wgpu::Queue as *const c_void,
            work_buffer: work_buffer as *const wgpu::Buffer as *const c_void,
            thread_groups_x: ctx.groups_x(),
            thread_groups_y: ctx.groups_y(),
        };

        for func in &self.new_video_frame {
            unsafe { func(&data) };
        }
    }

    /// Lines for the `sdr_extensions_list` command.
    pub fn list_lines(&self) -> Vec<String> {
        let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "N/A".to_string());

        self.loaded
            .iter()
            .flat_map(|e| {
                vec![
                    format!("file: \"{}\"", e.file_name),
                    format!("name: \"{}\"", text(&e.info.name)),
                    format!("namespace: \"{}\"", text(&e.info.namespace_)),
                    format!("author: \"{}\"", text(&e.info.author)),
                    format!("contact: \"{}\"", text(&e.info.contact)),
                    format!("version: {}", e.info.version),
                    format!("dependencies: \"{}\"", text(&e.info.dependencies)),
                ]
            })
            .collect()
    }
}

fn load_one(path: &Path) -> Result<Extension> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let library = unsafe { libloading::Library::new(path) }.map_err(|err| {
        Error::extension(format!("could not load \"{file_name}\"")).with_source(err)
    })?;

    unsafe {
        fn missing(file_name: &str, name: &[u8], err: libloading::Error) -> Error {
            Error::extension(format!(
                "\"{file_name}\" is missing required export \"{}\"",
                String::from_utf8_lossy(&name[..name.len() - 1])
            ))
            .with_source(err)
        }

        let query: ext::Query = *library
            .get::<ext::Query>(ext::exports::QUERY)
            .map_err(|err| missing(&file_name, ext::exports::QUERY, err))?;
        let initialize: ext::Initialize = *library
            .get::<ext::Initialize>(ext::exports::INITIALIZE)
            .map_err(|err| missing(&file_name, ext::exports::INITIALIZE, err))?;

        let callbacks = Callbacks {
            config_handler: library
                .get::<ext::ConfigHandler>(ext::exports::CONFIG_HANDLER)
                .ok()
                .map(|s| *s),
            ready: library.get::<ext::Ready>(ext::exports::READY).ok().map(|s| *s),
            start_movie: library
                .get::<ext::StartMovie>(ext::exports::START_MOVIE)
                .ok()
                .map(|s| *s),
            end_movie: library
                .get::<ext::EndMovie>(ext::exports::END_MOVIE)
                .ok()
                .map(|s| *s),
            new_video_frame: library
                .get::<ext::NewVideoFrame>(ext::exports::NEW_VIDEO_FRAME)
                .ok()
                .map(|s| *s),
        };

        let mut query_data = ext::QueryData::default();
        query(&mut query_data);

        let info = ExtensionInfo {
            name: optional_text(query_data.name),
            namespace_: optional_text(query_data.namespace_),
            author: optional_text(query_data.author),
            contact: optional_text(query_data.contact),
            version: query_data.version,
            dependencies: optional_text(query_data.dependencies),
        };

        let init_data = ext::InitializeData {
            message: import::log_message,
            message_color: import::log_message_color,
            warning: import::log_warning,
        };
        initialize(&init_data);

        Ok(Extension {
            file_name,
            info,
            callbacks,
            _library: library,
        })
    }
}

/// Reads `Order.json`, a JSON array of file names.
fn read_order(dir: &Path) -> Option<Vec<String>> {
    let text = std::fs::read_to_string(dir.join("Order.json")).ok()?;

    match serde_json::from_str::<Vec<String>>(&text) {
        Ok(order) => Some(order),
        Err(err) => {
            warn!("extension order config is not an array of names: {err}");
            None
        }
    }
}

/// Reorders `items` to match `order` by name; anything unlisted keeps its
/// discovery order at the end.
pub(crate) fn reorder<T>(items: Vec<T>, order: &[String], name: impl Fn(&T) -> &str) -> Vec<T> {
    if items.len() < 2 || order.is_empty() {
        return items;
    }

    let mut remaining: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut sorted = Vec::with_capacity(remaining.len());

    for wanted in order {
        if let Some(slot) = remaining
            .iter_mut()
            .find(|slot| slot.as_ref().map(|i| name(i) == wanted).unwrap_or(false))
        {
            sorted.push(slot.take().unwrap());
        }
    }

    sorted.extend(remaining.into_iter().flatten());
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[String]) -> Vec<&str> {
        items.iter().map(String::as_str).collect()
    }

    #[test]
    fn order_file_subset_reorders_and_appends() {
        let loaded = vec!["A.dll".to_string(), "B.dll".to_string(), "C.dll".to_string()];
        let order = vec!["C.dll".to_string(), "A.dll".to_string()];

        let sorted = reorder(loaded, &order, |s| s.as_str());
        assert_eq!(names(&sorted), ["C.dll", "A.dll", "B.dll"]);
    }

    #[test]
    fn unknown_order_entries_are_ignored() {
        let loaded = vec!["A.dll".to_string(), "B.dll".to_string()];
        let order = vec!["Z.dll".to_string(), "B.dll".to_string()];

        let sorted = reorder(loaded, &order, |s| s.as_str());
        assert_eq!(names(&sorted), ["B.dll", "A.dll"]);
    }

    #[test]
    fn single_extension_keeps_place() {
        let loaded = vec!["A.dll".to_string()];
        let order = vec!["B.dll".to_string()];

        let sorted = reorder(loaded, &order, |s| s.as_str());
        assert_eq!(names(&sorted), ["A.dll"]);
    }

    #[test]
    fn missing_directory_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let host = ExtensionHost::load_all(dir.path());
        assert!(!host.has_extensions());
        assert_eq!(host.count(), 0);
        assert!(host.list_lines().is_empty());
        assert!(!host.is_namespace_loaded("anything"));
    }
}
