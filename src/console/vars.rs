//! Typed console variables and commands.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use super::CommandArgs;
use crate::error::{Error, Result};

/// Numeric clamping applied on every write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bounds {
    None,
    Min(f32),
    MinMax(f32, f32),
}

impl Bounds {
    fn clamp(self, value: f32) -> f32 {
        match self {
            Bounds::None => value,
            Bounds::Min(min) => value.max(min),
            Bounds::MinMax(min, max) => value.clamp(min, max),
        }
    }
}

#[derive(Debug)]
struct VarInner {
    name: String,
    bounds: Bounds,
    numeric: bool,
    value: RwLock<String>,
}

/// Handle to a registered console variable. Cheap to clone; all handles for
/// a name share storage.
#[derive(Debug, Clone)]
pub struct Variable(Arc<VarInner>);

impl Variable {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn get_string(&self) -> String {
        self.0.value.read().unwrap().clone()
    }

    pub fn get_float(&self) -> f32 {
        self.0.value.read().unwrap().trim().parse().unwrap_or(0.0)
    }

    pub fn get_int(&self) -> i32 {
        let guard = self.0.value.read().unwrap();
        let text = guard.trim();
        text.parse::<i32>()
            .unwrap_or_else(|_| text.parse::<f32>().unwrap_or(0.0) as i32)
    }

    pub fn get_bool(&self) -> bool {
        self.get_float() != 0.0
    }

    /// Writes a new value, clamping numeric variables into their bounds.
    pub fn set<T: std::fmt::Display>(&self, value: T) {
        let mut text = value.to_string();

        if self.0.numeric {
            if let Ok(num) = text.trim().parse::<f32>() {
                let clamped = self.0.bounds.clamp(num);
                if clamped != num {
                    text = format_number(clamped);
                }
            }
        }

        *self.0.value.write().unwrap() = text;
    }

    /// Replaces the value and returns the previous one as an integer.
    /// Used for session-scoped overrides that are restored on end.
    pub fn set_get_old_int(&self, value: i32) -> i32 {
        let old = self.get_int();
        self.set(value);
        old
    }

    /// Same as [`Self::set_get_old_int`] for float-valued variables.
    pub fn set_get_old_float(&self, value: f32) -> f32 {
        let old = self.get_float();
        self.set(format_number(value));
        old
    }
}

/// Integral values print without a trailing `.0` so round-trips through the
/// string form stay stable.
fn format_number(value: f32) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Console command handler. Extensions register raw C function pointers,
/// the core registers closures.
pub enum CommandHandler {
    Void(Box<dyn Fn() + Send + Sync>),
    Args(Box<dyn Fn(&CommandArgs) + Send + Sync>),
    NativeVoid(sdr_extension::CommandCallbackVoid),
    NativeArgs(sdr_extension::CommandCallbackArgs),
}

/// Process-wide variable and command registry.
pub struct Registry {
    vars: RwLock<HashMap<String, Variable>>,
    commands: RwLock<HashMap<String, Arc<CommandHandler>>>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

impl Registry {
    pub fn new() -> Self {
        Self {
            vars: RwLock::new(HashMap::new()),
            commands: RwLock::new(HashMap::new()),
        }
    }

    fn make(&self, name: &str, default: &str, bounds: Bounds, numeric: bool) -> Variable {
        if let Some(existing) = self.find(name) {
            return existing;
        }

        let var = Variable(Arc::new(VarInner {
            name: name.to_string(),
            bounds,
            numeric,
            value: RwLock::new(String::new()),
        }));

        // Route the default through set() so it gets clamped too.
        var.set(default);

        self.vars
            .write()
            .unwrap()
            .insert(name.to_string(), var.clone());

        var
    }

    pub fn make_bool(&self, name: &str, default: &str) -> Variable {
        self.make(name, default, Bounds::MinMax(0.0, 1.0), true)
    }

    pub fn make_number(&self, name: &str, default: &str) -> Variable {
        self.make(name, default, Bounds::None, true)
    }

    pub fn make_number_min(&self, name: &str, default: &str, min: f32) -> Variable {
        self.make(name, default, Bounds::Min(min), true)
    }

    pub fn make_number_min_max(&self, name: &str, default: &str, min: f32, max: f32) -> Variable {
        self.make(name, default, Bounds::MinMax(min, max), true)
    }

    /// Number variable whose raw string form is preserved for passing on to
    /// collaborators that want text (encoder option dictionaries).
    pub fn make_number_min_max_string(
        &self,
        name: &str,
        default: &str,
        min: f32,
        max: f32,
    ) -> Variable {
        self.make(name, default, Bounds::MinMax(min, max), true)
    }

    pub fn make_string(&self, name: &str, default: &str) -> Variable {
        self.make(name, default, Bounds::None, false)
    }

    pub fn find(&self, name: &str) -> Option<Variable> {
        self.vars.read().unwrap().get(name).cloned()
    }

    /// Looks a variable up, registering it with the given default when the
    /// host has not provided it. Lets the session override engine settings
    /// it does not itself own.
    pub fn find_or_register(&self, name: &str, default: &str) -> Variable {
        self.find(name)
            .unwrap_or_else(|| self.make(name, default, Bounds::None, true))
    }

    pub fn make_command_void<F: Fn() + Send + Sync + 'static>(&self, name: &str, func: F) {
        self.insert_command(name, CommandHandler::Void(Box::new(func)));
    }

    pub fn make_command_args<F: Fn(&CommandArgs) + Send + Sync + 'static>(
        &self,
        name: &str,
        func: F,
    ) {
        self.insert_command(name, CommandHandler::Args(Box::new(func)));
    }

    pub fn make_command_native_void(&self, name: &str, func: sdr_extension::CommandCallbackVoid) {
        self.insert_command(name, CommandHandler::NativeVoid(func));
    }

    pub fn make_command_native_args(&self, name: &str, func: sdr_extension::CommandCallbackArgs) {
        self.insert_command(name, CommandHandler::NativeArgs(func));
    }

    fn insert_command(&self, name: &str, handler: CommandHandler) {
        self.commands
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::new(handler));
    }

    /// Parses and dispatches one command line. Variable assignment
    /// (`name value`) is handled here as well, like a console would.
    pub fn execute(&self, line: &str) -> Result<()> {
        let args = CommandArgs::parse(line);

        if args.count() == 0 {
            return Ok(());
        }

        let name = args.at(0).to_string();

        let handler = self.commands.read().unwrap().get(&name).cloned();

        if let Some(handler) = handler {
            match &*handler {
                CommandHandler::Void(func) => func(),
                CommandHandler::Args(func) => func(&args),
                CommandHandler::NativeVoid(func) => unsafe { func() },
                CommandHandler::NativeArgs(func) => unsafe {
                    func(&args as *const CommandArgs as *const std::os::raw::c_void)
                },
            }
            return Ok(());
        }

        if let Some(var) = self.find(&name) {
            if args.count() >= 2 {
                var.set(args.full_value());
            }
            return Ok(());
        }

        Err(Error::config(format!("unknown command \"{name}\"")))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_values_clamp_into_bounds() {
        let reg = Registry::new();
        let fps = reg.make_number_min_max("test_fps", "60", 30.0, 1000.0);

        assert_eq!(fps.get_int(), 60);

        fps.set(10);
        assert_eq!(fps.get_int(), 30);

        fps.set(5000);
        assert_eq!(fps.get_int(), 1000);
    }

    #[test]
    fn bool_reads_from_numeric_text() {
        let reg = Registry::new();
        let flag = reg.make_bool("test_flag", "0");

        assert!(!flag.get_bool());
        flag.set(1);
        assert!(flag.get_bool());

        // Bool vars clamp anything above one.
        flag.set(7);
        assert!(flag.get_bool());
        assert_eq!(flag.get_int(), 1);
    }

    #[test]
    fn registering_twice_returns_the_same_storage() {
        let reg = Registry::new();
        let a = reg.make_string("test_dir", "");
        let b = reg.make_string("test_dir", "other");

        a.set("outputs");
        assert_eq!(b.get_string(), "outputs");
    }

    #[test]
    fn execute_assigns_variables_and_runs_commands() {
        let reg = Registry::new();
        let var = reg.make_string("test_name", "");

        reg.execute("test_name hello").unwrap();
        assert_eq!(var.get_string(), "hello");

        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits2 = hits.clone();
        reg.make_command_void("test_cmd", move || {
            hits2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        reg.execute("test_cmd").unwrap();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);

        assert!(reg.execute("no_such_command").is_err());
    }
}
