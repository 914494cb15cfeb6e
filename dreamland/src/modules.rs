//! Loadable command modules.
//!
//! A module is a shared object exposing C-linkage entry points:
//! `module_info` (required), `module_init`, `module_commands` and
//! `module_cleanup`. Commands contributed by modules extend the CLI verb
//! set; collisions are first-loaded-wins.

use crate::error::{Error, Result};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, CStr, CString};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// ABI version this host accepts.
pub const MODULE_API_VERSION: c_int = 1;

/// Module descriptor returned by `module_info`.
#[repr(C)]
pub struct ModuleInfo {
    pub api_version: c_int,
    pub name: *const c_char,
    pub version: *const c_char,
    pub description: *const c_char,
    pub author: *const c_char,
}

/// One command in the table returned by `module_commands`.
#[repr(C)]
pub struct ModuleCommand {
    pub name: *const c_char,
    pub description: *const c_char,
    pub usage: *const c_char,
    pub handler: Option<CommandHandler>,
}

pub type CommandHandler = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;

type InfoFn = unsafe extern "C" fn() -> *const ModuleInfo;
type InitFn = unsafe extern "C" fn() -> c_int;
type CommandsFn = unsafe extern "C" fn(*mut c_int) -> *const ModuleCommand;
type CleanupFn = unsafe extern "C" fn();

/// An owned view of one module command.
#[derive(Clone)]
pub struct CommandEntry {
    pub name: String,
    pub description: String,
    pub usage: String,
    handler: CommandHandler,
}

/// A successfully loaded module. Dropping it releases the handle; the
/// cleanup entry point runs first if present.
pub struct LoadedModule {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub commands: Vec<CommandEntry>,
    cleanup: Option<CleanupFn>,
    // Kept alive for the handler and cleanup pointers above.
    _library: Library,
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup {
            unsafe { cleanup() };
        }
    }
}

/// The plugin host: every loaded module plus the command dispatch table.
#[derive(Default)]
pub struct ModuleHost {
    modules: Vec<LoadedModule>,
    /// command name -> (module index, command index); first writer wins
    dispatch: HashMap<String, (usize, usize)>,
}

impl ModuleHost {
    /// Scan the search directories (system first, then user) and load
    /// every shared object found. Load failures are logged and skipped.
    pub fn load_all(search_paths: &[PathBuf]) -> Self {
        let mut host = ModuleHost::default();
        for dir in search_paths {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some(std::env::consts::DLL_EXTENSION)
                {
                    continue;
                }
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                if host.modules.iter().any(|m| m.name == stem) {
                    debug!(module = %stem, "already loaded, skipping");
                    continue;
                }
                match load_module(&path) {
                    Ok(module) => host.add(module),
                    Err(e) => warn!(path = %path.display(), error = %e, "module rejected"),
                }
            }
        }
        host
    }

    fn add(&mut self, module: LoadedModule) {
        let module_idx = self.modules.len();
        for (cmd_idx, cmd) in module.commands.iter().enumerate() {
            if self.dispatch.contains_key(&cmd.name) {
                warn!(command = %cmd.name, module = %module.name, "command name collision, keeping first");
                continue;
            }
            self.dispatch.insert(cmd.name.clone(), (module_idx, cmd_idx));
        }
        debug!(module = %module.name, commands = module.commands.len(), "module loaded");
        self.modules.push(module);
    }

    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.dispatch.contains_key(name)
    }

    /// Dispatch a CLI verb to the owning module command. The handler
    /// receives (argc, argv) with the command name in argv[0]. Returns
    /// the handler's exit code.
    pub fn run_command(&self, name: &str, args: &[String]) -> Option<i32> {
        let &(module_idx, cmd_idx) = self.dispatch.get(name)?;
        let handler = self.modules[module_idx].commands[cmd_idx].handler;

        let mut owned: Vec<CString> = Vec::with_capacity(args.len() + 1);
        owned.push(CString::new(name).ok()?);
        for arg in args {
            owned.push(CString::new(arg.as_str()).ok()?);
        }
        let mut argv: Vec<*mut c_char> = owned
            .iter()
            .map(|s| s.as_ptr() as *mut c_char)
            .collect();
        argv.push(std::ptr::null_mut());

        let code = unsafe { handler(owned.len() as c_int, argv.as_mut_ptr()) };
        Some(code)
    }

    /// Unload a module and delete its object file (module removal path).
    pub fn unload_and_delete(&mut self, name: &str, modules_dir: &Path) -> Result<()> {
        if let Some(idx) = self.modules.iter().position(|m| m.name == name) {
            self.dispatch.retain(|_, (module_idx, _)| *module_idx != idx);
            // Indices above the removed module shift down.
            for (module_idx, _) in self.dispatch.values_mut() {
                if *module_idx > idx {
                    *module_idx -= 1;
                }
            }
            // Drop runs cleanup and releases the handle.
            self.modules.remove(idx);
        }

        let object = modules_dir.join(format!("{}.{}", name, std::env::consts::DLL_EXTENSION));
        if object.exists() {
            std::fs::remove_file(&object)?;
        }
        Ok(())
    }
}

fn load_module(path: &Path) -> Result<LoadedModule> {
    let reject = |reason: &str| Error::ModuleRejected {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    unsafe {
        let library = Library::new(path).map_err(|e| reject(&e.to_string()))?;

        let info_fn = library
            .get::<InfoFn>(b"module_info\0")
            .map_err(|_| reject("no module_info entry point"))?;
        let info = info_fn();
        if info.is_null() {
            return Err(reject("module_info returned NULL"));
        }
        if (*info).api_version != MODULE_API_VERSION {
            return Err(reject(&format!(
                "ABI version {} does not match host version {}",
                (*info).api_version,
                MODULE_API_VERSION
            )));
        }

        if let Ok(init_fn) = library.get::<InitFn>(b"module_init\0") {
            let rc = init_fn();
            if rc != 0 {
                return Err(reject(&format!("module_init returned {}", rc)));
            }
        }

        let mut commands = Vec::new();
        if let Ok(commands_fn) = library.get::<CommandsFn>(b"module_commands\0") {
            let mut count: c_int = 0;
            let table = commands_fn(&mut count);
            if !table.is_null() && count > 0 {
                for cmd in std::slice::from_raw_parts(table, count as usize) {
                    let Some(handler) = cmd.handler else { continue };
                    commands.push(CommandEntry {
                        name: owned_str(cmd.name),
                        description: owned_str(cmd.description),
                        usage: owned_str(cmd.usage),
                        handler,
                    });
                }
            }
        }

        let cleanup = library
            .get::<CleanupFn>(b"module_cleanup\0")
            .ok()
            .map(|sym| *sym);

        Ok(LoadedModule {
            name: owned_str((*info).name),
            version: owned_str((*info).version),
            description: owned_str((*info).description),
            author: owned_str((*info).author),
            commands,
            cleanup,
            _library: library,
        })
    }
}

unsafe fn owned_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
