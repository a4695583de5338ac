//! Module, class and function registries, and module loading.
//!
//! The module manager owns every runtime module, class and function, keyed
//! by small ids. Loading a module file goes through three steps: read a tape
//! from disk (dispatching on the file extension), hydrate the tape's symbol
//! tables into runtime entries, and install the reflection objects user code
//! sees. Module reflections are heap roots; everything else hangs off them
//! through member edges.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::IndexMap;

use jv_core::tape::FnFlags;
use jv_core::{ClassRef, Entity, StaticError, Symbol, Tape};

use crate::class::{Class, ClassId, CoreClasses, NativeInitFn};
use crate::error::{VmError, VmResult};
use crate::function::{Function, FunctionBody, FunctionId, NativeFn};
use crate::heap::Heap;
use crate::module::{Module, ModuleId};
use crate::object::{NativeDeleteFn, Payload};

/// Key under which a class reflection exposes its field-name array.
pub const FIELDS_KEY: &str = "__fields";

/// Bound on super-chain walks; a longer chain means a cyclic hierarchy.
pub(crate) const MAX_SUPER_DEPTH: usize = 64;

/// Owns modules, classes and functions, and loads module files on demand.
#[derive(Debug, Default)]
pub struct ModuleManager {
    pub(crate) modules: Vec<Module>,
    pub(crate) classes: Vec<Class>,
    pub(crate) functions: Vec<Function>,
    by_name: HashMap<Symbol, ModuleId>,
    registered: HashMap<Symbol, PathBuf>,
    pub(crate) core: Option<CoreClasses>,
    pub(crate) builtin_module: Option<ModuleId>,
}

impl ModuleManager {
    /// Creates an empty manager. Core classes are installed by the VM at
    /// startup.
    pub fn new() -> Self {
        ModuleManager::default()
    }

    /// The core class handles.
    pub fn core(&self) -> CoreClasses {
        self.core.expect("core classes not installed")
    }

    /// The builtin module.
    pub fn builtin_module(&self) -> ModuleId {
        self.builtin_module.expect("builtin module not installed")
    }

    /// Returns the class behind an id.
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    /// Returns the function behind an id.
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    /// Returns the module behind an id.
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    /// Returns the module behind an id, mutably.
    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.index()]
    }

    /// Returns a loaded module by name.
    pub fn module_by_name(&self, name: Symbol) -> Option<ModuleId> {
        self.by_name.get(&name).copied()
    }

    /// Looks `name` up along the class chain, bounded by
    /// [`MAX_SUPER_DEPTH`].
    pub fn find_method(&self, class: ClassId, name: Symbol) -> VmResult<Option<FunctionId>> {
        let mut current = Some(class);
        for _ in 0..MAX_SUPER_DEPTH {
            let Some(id) = current else {
                return Ok(None);
            };
            let class = self.class(id);
            if let Some(f) = class.methods.get(&name) {
                return Ok(Some(*f));
            }
            current = class.super_class;
        }
        Err(VmError::internal(format!(
            "super chain of '{}' exceeds {MAX_SUPER_DEPTH} classes",
            self.class(class).name
        )))
    }

    /// True when `class` is `wanted` or inherits from it.
    pub fn inherits_from(&self, class: ClassId, wanted: ClassId) -> bool {
        let mut current = Some(class);
        for _ in 0..MAX_SUPER_DEPTH {
            match current {
                None => return false,
                Some(id) if id == wanted => return true,
                Some(id) => current = self.class(id).super_class,
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Registry construction
    // ------------------------------------------------------------------

    pub(crate) fn push_module(&mut self, module: Module) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.by_name.insert(module.name, id);
        self.modules.push(module);
        id
    }

    pub(crate) fn add_function(
        &mut self,
        heap: &mut Heap,
        module: ModuleId,
        class: Option<ClassId>,
        name: Symbol,
        flags: FnFlags,
        body: FunctionBody,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        let reflection = heap.new_object(self.core().function, Payload::Function(id));
        self.functions.push(Function {
            name,
            module,
            class,
            flags,
            body,
            reflection,
        });
        id
    }

    pub(crate) fn add_class(
        &mut self,
        heap: &mut Heap,
        module: ModuleId,
        name: Symbol,
        super_class: Option<ClassId>,
    ) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        let reflection = heap.new_object(self.core().class, Payload::Class(id));
        self.classes.push(Class {
            name,
            super_class,
            fields: Vec::new(),
            methods: IndexMap::new(),
            module,
            init_hook: None,
            delete_hook: None,
            reflection,
        });
        id
    }

    // ------------------------------------------------------------------
    // Native registry
    // ------------------------------------------------------------------

    /// Registers a host function on a module and exposes it through the
    /// module's reflection.
    pub fn native_function(
        &mut self,
        heap: &mut Heap,
        module: ModuleId,
        name: &str,
        body: NativeFn,
    ) -> FunctionId {
        let name = Symbol::intern(name);
        let id = self.add_function(
            heap,
            module,
            None,
            name,
            FnFlags::empty(),
            FunctionBody::Native(body),
        );
        let reflection = self.function(id).reflection;
        let module_reflection = self.module(module).reflection;
        self.module_mut(module).functions.insert(name, id);
        heap.set_member_obj(module_reflection, name, reflection);
        id
    }

    /// Registers a host method on a class and exposes it through the class's
    /// reflection.
    pub fn native_method(
        &mut self,
        heap: &mut Heap,
        class: ClassId,
        name: &str,
        body: NativeFn,
    ) -> FunctionId {
        let name = Symbol::intern(name);
        let module = self.class(class).module;
        let id = self.add_function(
            heap,
            module,
            Some(class),
            name,
            FnFlags::empty(),
            FunctionBody::Native(body),
        );
        let reflection = self.function(id).reflection;
        let class_reflection = self.class(class).reflection;
        self.classes[class.index()].methods.insert(name, id);
        heap.set_member_obj(class_reflection, name, reflection);
        id
    }

    /// Registers a host class with optional payload hooks and exposes it
    /// through the module's reflection.
    pub fn native_class(
        &mut self,
        heap: &mut Heap,
        module: ModuleId,
        name: &str,
        init_hook: Option<NativeInitFn>,
        delete_hook: Option<NativeDeleteFn>,
    ) -> ClassId {
        let name = Symbol::intern(name);
        let id = self.add_class(heap, module, name, Some(self.core().object));
        self.classes[id.index()].init_hook = init_hook;
        self.classes[id.index()].delete_hook = delete_hook;
        let reflection = self.class(id).reflection;
        let module_reflection = self.module(module).reflection;
        self.module_mut(module).classes.insert(name, id);
        heap.set_member_obj(module_reflection, name, reflection);
        id
    }

    // ------------------------------------------------------------------
    // Registration and loading
    // ------------------------------------------------------------------

    /// Registers a module file under its stem name. Registering the same
    /// name twice keeps the first path.
    pub fn register_file(&mut self, path: &Path) -> Result<Symbol, StaticError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StaticError::io(format!("bad module path '{}'", path.display())))?;
        let name = Symbol::intern(stem);
        if self.by_name.contains_key(&name) || self.registered.contains_key(&name) {
            log::debug!("module '{name}' already registered");
            return Ok(name);
        }
        self.registered.insert(name, path.to_path_buf());
        Ok(name)
    }

    /// Returns the module named `name`, loading its registered file if it
    /// has not been hydrated yet. `Ok(None)` means the name is unknown.
    pub fn lookup_or_load(
        &mut self,
        heap: &mut Heap,
        name: Symbol,
    ) -> VmResult<Option<ModuleId>> {
        if let Some(id) = self.by_name.get(&name) {
            return Ok(Some(*id));
        }
        let Some(path) = self.registered.remove(&name) else {
            return Ok(None);
        };
        let tape = read_tape(&path)?;
        let id = self.hydrate(heap, Arc::new(tape))?;
        Ok(Some(id))
    }

    /// Hydrates a tape into a loaded module: runtime function and class
    /// entries, reflection objects, and a rooted module reflection.
    pub fn hydrate(&mut self, heap: &mut Heap, tape: Arc<Tape>) -> VmResult<ModuleId> {
        let name = tape.module_name();
        if self.by_name.contains_key(&name) {
            return Err(VmError::internal(format!(
                "module '{name}' already exists"
            )));
        }

        let reflection = heap.new_object(self.core().module, Payload::None);
        let id = self.push_module(Module {
            name,
            tape: Arc::clone(&tape),
            functions: IndexMap::new(),
            classes: IndexMap::new(),
            is_initialized: false,
            reflection,
        });
        heap.get_mut(reflection).payload = Payload::Module(id);

        for fref in tape.functions().values() {
            let fid = self.add_function(
                heap,
                id,
                None,
                fref.name,
                fref.flags,
                FunctionBody::Bytecode(fref.index),
            );
            self.module_mut(id).functions.insert(fref.name, fid);
        }

        // Classes may name supers declared later in the table; requeue until
        // every super resolves.
        let mut pending: Vec<&ClassRef> = tape.classes().values().collect();
        let mut stalled = 0;
        while let Some(cref) = pending.first().copied() {
            pending.remove(0);
            if self.hydrate_class(heap, id, cref)? {
                stalled = 0;
                continue;
            }
            pending.push(cref);
            stalled += 1;
            if stalled > pending.len() {
                return Err(VmError::internal(format!(
                    "unresolvable super class for '{}' in module '{name}'",
                    cref.name
                )));
            }
        }

        self.install_reflection(heap, id);
        heap.make_root(self.module(id).reflection);
        Ok(id)
    }

    /// Adds one class from a tape. Returns false when its super is not yet
    /// resolvable.
    fn hydrate_class(
        &mut self,
        heap: &mut Heap,
        module: ModuleId,
        cref: &ClassRef,
    ) -> VmResult<bool> {
        let super_class = match cref.supers.first() {
            None => Some(self.core().object),
            Some(super_name) => match self.resolve_class(module, *super_name) {
                Some(found) => Some(found),
                None => return Ok(false),
            },
        };
        let id = self.add_class(heap, module, cref.name, super_class);
        self.classes[id.index()].fields = cref.fields.clone();
        for mref in cref.methods.values() {
            let fid = self.add_function(
                heap,
                module,
                Some(id),
                mref.name,
                mref.flags,
                FunctionBody::Bytecode(mref.index),
            );
            self.classes[id.index()].methods.insert(mref.name, fid);
        }
        self.module_mut(module).classes.insert(cref.name, id);
        Ok(true)
    }

    /// Resolves a class name in a module: own classes first, then the
    /// builtin module's.
    pub fn resolve_class(&self, module: ModuleId, name: Symbol) -> Option<ClassId> {
        if let Some(id) = self.module(module).classes.get(&name) {
            return Some(*id);
        }
        let builtin = self.builtin_module?;
        self.module(builtin).classes.get(&name).copied()
    }

    /// Installs the reflection members of a module: its functions, its
    /// classes, their methods, and each class's field-name array.
    pub(crate) fn install_reflection(&mut self, heap: &mut Heap, module: ModuleId) {
        let module_reflection = self.module(module).reflection;

        let functions: Vec<FunctionId> = self.module(module).functions.values().copied().collect();
        for fid in functions {
            let f = self.function(fid);
            heap.set_member_obj(module_reflection, f.name, f.reflection);
        }

        let classes: Vec<ClassId> = self.module(module).classes.values().copied().collect();
        for cid in classes {
            let class_reflection = self.class(cid).reflection;
            let class_name = self.class(cid).name;
            heap.set_member_obj(module_reflection, class_name, class_reflection);

            let methods: Vec<FunctionId> = self.class(cid).methods.values().copied().collect();
            for fid in methods {
                let f = self.function(fid);
                heap.set_member_obj(class_reflection, f.name, f.reflection);
            }

            let fields = self.class(cid).fields.clone();
            let field_array = heap.new_object(self.core().array, Payload::Array(Vec::new()));
            heap.set_member_obj(class_reflection, Symbol::intern(FIELDS_KEY), field_array);
            for field in fields {
                let name_obj = heap.new_object(
                    self.core().string,
                    Payload::Str(field.as_str().to_owned()),
                );
                heap.array_add(field_array, Entity::Object(name_obj));
            }
        }
    }

    /// Reads a module reflection member, used by name resolution and calls.
    pub fn module_member(
        &self,
        heap: &Heap,
        module: ModuleId,
        name: Symbol,
    ) -> Option<Entity> {
        heap.get(self.module(module).reflection).get_member(name)
    }
}

/// Reads a tape from a module file, dispatching on the extension: `.ja` is
/// assembled, `.jb` is decoded, `.jv` requires a compiler front-end this
/// workspace does not link.
pub fn read_tape(path: &Path) -> Result<Tape, StaticError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module");
    match ext {
        "ja" => {
            let text = std::fs::read_to_string(path)?;
            jv_asm::tape_read(&text, &path.display().to_string(), stem)
        }
        "jb" => {
            let bytes = std::fs::read(path)?;
            jv_core::tape_read_binary(&bytes)
        }
        "jv" => Err(StaticError::UnsupportedExtension {
            path: format!("{} (no compiler front-end linked)", path.display()),
        }),
        _ => Err(StaticError::UnsupportedExtension {
            path: path.display().to_string(),
        }),
    }
}
