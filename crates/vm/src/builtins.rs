//! The builtin module: core classes and host natives.
//!
//! Installed into the main process's heap at startup. The builtin module
//! carries the root class hierarchy (`Object`, `String`, `Array`, ...), the
//! free functions every program can reach (`print`, `str`,
//! `__collect_garbage`, ...), and the `Range` native class that exercises
//! the payload-hook surface.

use std::sync::Arc;

use indexmap::IndexMap;

use jv_core::{Entity, Primitive, Symbol, TapeBuilder};

use crate::class::{ClassId, CoreClasses};
use crate::execution_engine::stringify;
use crate::function::{NativeCall, NativeRaise, NativeResult};
use crate::heap::Heap;
use crate::module::{Module, ModuleId};
use crate::module_manager::ModuleManager;
use crate::object::Payload;
use crate::process::Process;

const CORE_CLASS_NAMES: [&str; 11] = [
    "Object",
    "String",
    "Array",
    "Tuple",
    "Function",
    "FunctionRef",
    "Class",
    "Module",
    "Task",
    "Error",
    "StackLine",
];

/// Installs the builtin module, core classes and natives into `heap`.
pub fn install(mm: &mut ModuleManager, heap: &mut Heap) -> ModuleId {
    let base = mm.classes.len() as u32;
    let core = CoreClasses {
        object: ClassId(base),
        string: ClassId(base + 1),
        array: ClassId(base + 2),
        tuple: ClassId(base + 3),
        function: ClassId(base + 4),
        function_ref: ClassId(base + 5),
        class: ClassId(base + 6),
        module: ClassId(base + 7),
        task: ClassId(base + 8),
        error: ClassId(base + 9),
        stack_line: ClassId(base + 10),
    };
    mm.core = Some(core);

    let name = Symbol::intern("builtin");
    let tape = Arc::new(TapeBuilder::new(name).finish());
    let reflection = heap.new_object(core.module, Payload::None);
    let module = mm.push_module(Module {
        name,
        tape,
        functions: IndexMap::new(),
        classes: IndexMap::new(),
        is_initialized: true,
        reflection,
    });
    heap.get_mut(reflection).payload = Payload::Module(module);
    mm.builtin_module = Some(module);

    for (i, class_name) in CORE_CLASS_NAMES.iter().enumerate() {
        let super_class = if i == 0 { None } else { Some(core.object) };
        let symbol = Symbol::intern(class_name);
        let id = mm.add_class(heap, module, symbol, super_class);
        mm.module_mut(module).classes.insert(symbol, id);
    }
    mm.classes[core.string.index()].init_hook = Some(|| Payload::Str(String::new()));
    mm.classes[core.array.index()].init_hook = Some(|| Payload::Array(Vec::new()));
    mm.classes[core.tuple.index()].init_hook = Some(|| Payload::Tuple(Box::new([])));

    mm.install_reflection(heap, module);
    heap.make_root(reflection);

    // Free functions.
    mm.native_function(heap, module, "print", native_print);
    mm.native_function(heap, module, "println", native_println);
    mm.native_function(heap, module, "errorln", native_errorln);
    mm.native_function(heap, module, "str", native_str);
    mm.native_function(heap, module, "int", native_int);
    mm.native_function(heap, module, "float", native_float);
    mm.native_function(heap, module, "bool", native_bool);
    mm.native_function(heap, module, "__collect_garbage", native_collect_garbage);

    // Class methods.
    mm.native_method(heap, core.string, "len", native_string_len);
    mm.native_method(heap, core.string, "cmp", native_string_cmp);
    mm.native_method(heap, core.string, "__eq__", native_string_eq);
    mm.native_method(heap, core.string, "__neq__", native_string_neq);
    mm.native_method(heap, core.string, "extend", native_string_extend);
    mm.native_method(heap, core.string, "__index__", native_string_index);
    mm.native_method(heap, core.array, "len", native_array_len);
    mm.native_method(heap, core.array, "append", native_array_append);
    mm.native_method(heap, core.array, "remove", native_array_remove);
    mm.native_method(heap, core.tuple, "len", native_tuple_len);
    mm.native_method(heap, core.object, "class", native_object_class);
    mm.native_method(heap, core.object, "hash", native_object_hash);
    mm.native_method(heap, core.class, "name", native_class_name);
    mm.native_method(heap, core.module, "name", native_module_name);
    mm.native_method(heap, core.function, "name", native_function_name);
    mm.native_method(heap, core.function, "module", native_function_module);

    // The Range native class: payload hooks plus a constructor.
    let range = mm.native_class(
        heap,
        module,
        "Range",
        Some(|| Payload::Native(Box::new(Range::default()))),
        None,
    );
    mm.native_method(heap, range, "new", native_range_new);
    mm.native_method(heap, range, "start", native_range_start);
    mm.native_method(heap, range, "end", native_range_end);
    mm.native_method(heap, range, "inc", native_range_inc);

    module
}

/// The payload of a `Range` instance.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    /// First value produced
    pub start: i32,
    /// One past the last value
    pub end: i32,
    /// Step
    pub inc: i32,
}

impl Default for Range {
    fn default() -> Self {
        Range {
            start: 0,
            end: 0,
            inc: 1,
        }
    }
}

// ----------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------

/// Flattens the caller's resval into an argument list: a tuple spreads,
/// anything else is a single argument.
fn arg_list(process: &Process, args: Entity) -> Vec<Entity> {
    if let Entity::Object(h) = args {
        if let Some(items) = process.heap.get(h).as_tuple() {
            return items.to_vec();
        }
    }
    vec![args]
}

fn string_of(process: &Process, entity: Entity) -> Option<String> {
    entity
        .as_object()
        .and_then(|h| process.heap.get(h).as_str().map(str::to_owned))
}

fn new_string(call: &mut NativeCall<'_>, text: String) -> Entity {
    let handle = call
        .process
        .heap
        .new_object(call.mm.core().string, Payload::Str(text));
    Entity::Object(handle)
}

// ----------------------------------------------------------------------
// Free functions
// ----------------------------------------------------------------------

fn native_print(call: &mut NativeCall<'_>, _self: Entity, args: Entity) -> NativeResult {
    let text = stringify(call.mm, call.process, args, 0);
    call.output.write(&text);
    Ok(Entity::Nil)
}

fn native_println(call: &mut NativeCall<'_>, _self: Entity, args: Entity) -> NativeResult {
    let text = stringify(call.mm, call.process, args, 0);
    call.output.write(&text);
    call.output.write("\n");
    Ok(Entity::Nil)
}

fn native_errorln(call: &mut NativeCall<'_>, _self: Entity, args: Entity) -> NativeResult {
    let text = render_error(call.mm, call.process, args);
    call.output.write_err(&text);
    call.output.write_err("\n");
    Ok(Entity::Nil)
}

/// Renders an error object with its stack trace; used by `errorln` and the
/// scheduler's uncaught-error path.
pub(crate) fn render_error(mm: &ModuleManager, process: &Process, entity: Entity) -> String {
    let Some(handle) = entity.as_object() else {
        return format!("Uncaught error: {}", stringify(mm, process, entity, 0));
    };
    let object = process.heap.get(handle);
    if object.class != mm.core().error {
        return format!("Uncaught error: {}", stringify(mm, process, entity, 0));
    }
    let msg = object
        .get_member(Symbol::intern("msg"))
        .map(|m| stringify(mm, process, m, 0))
        .unwrap_or_default();
    let mut out = format!("Error: {msg}");
    let trace = object
        .get_member(Symbol::intern("trace"))
        .and_then(|t| t.as_object());
    if let Some(trace) = trace {
        if let Some(lines) = process.heap.get(trace).as_array() {
            for line in lines {
                let Some(line) = line.as_object() else {
                    continue;
                };
                let line = process.heap.get(line);
                let module = line
                    .get_member(Symbol::intern("module"))
                    .map(|m| stringify(mm, process, m, 0))
                    .unwrap_or_default();
                let line_num = line
                    .get_member(Symbol::intern("line_num"))
                    .and_then(|e| e.as_primitive())
                    .map(|p| p.as_int())
                    .unwrap_or(0);
                let text = line
                    .get_member(Symbol::intern("text"))
                    .map(|m| stringify(mm, process, m, 0))
                    .unwrap_or_default();
                out.push_str(&format!("\n  at {module}({line_num}): {text}"));
            }
        }
    }
    out
}

fn native_str(call: &mut NativeCall<'_>, _self: Entity, args: Entity) -> NativeResult {
    let text = stringify(call.mm, call.process, args, 0);
    Ok(new_string(call, text))
}

fn native_int(call: &mut NativeCall<'_>, _self: Entity, args: Entity) -> NativeResult {
    match args {
        Entity::Nil => Ok(Entity::int(0)),
        Entity::Primitive(p) => Ok(Entity::int(p.as_int())),
        Entity::Object(_) => {
            let Some(text) = string_of(call.process, args) else {
                return Err(NativeRaise::new("Cannot convert input to Int."));
            };
            text.trim()
                .parse::<i32>()
                .map(Entity::int)
                .map_err(|_| NativeRaise::new(format!("Cannot convert input '{text}' to Int.")))
        }
    }
}

fn native_float(call: &mut NativeCall<'_>, _self: Entity, args: Entity) -> NativeResult {
    match args {
        Entity::Nil => Ok(Entity::float(0.0)),
        Entity::Primitive(p) => Ok(Entity::float(p.as_float())),
        Entity::Object(_) => {
            let Some(text) = string_of(call.process, args) else {
                return Err(NativeRaise::new("Cannot convert input to Float."));
            };
            text.trim()
                .parse::<f64>()
                .map(Entity::float)
                .map_err(|_| NativeRaise::new(format!("Cannot convert input '{text}' to Float.")))
        }
    }
}

fn native_bool(call: &mut NativeCall<'_>, _self: Entity, args: Entity) -> NativeResult {
    match args {
        Entity::Nil => Ok(Entity::Nil),
        Entity::Primitive(_) => Ok(Entity::truthy()),
        Entity::Object(_) => {
            let Some(text) = string_of(call.process, args) else {
                return Err(NativeRaise::new("Cannot convert input to Bool."));
            };
            match text.as_str() {
                "True" | "true" | "T" | "t" => Ok(Entity::truthy()),
                "False" | "false" | "F" | "f" => Ok(Entity::Nil),
                _ => Err(NativeRaise::new(format!(
                    "Cannot convert input '{text}' to Bool."
                ))),
            }
        }
    }
}

fn native_collect_garbage(call: &mut NativeCall<'_>, _self: Entity, _args: Entity) -> NativeResult {
    let freed = call.process.collect_garbage();
    Ok(Entity::int(freed as i32))
}

// ----------------------------------------------------------------------
// String methods
// ----------------------------------------------------------------------

fn self_string(call: &NativeCall<'_>, self_entity: Entity) -> Result<String, NativeRaise> {
    string_of(call.process, self_entity)
        .ok_or_else(|| NativeRaise::new("Method receiver is not a String."))
}

fn native_string_len(call: &mut NativeCall<'_>, self_entity: Entity, _args: Entity) -> NativeResult {
    let s = self_string(call, self_entity)?;
    Ok(Entity::int(s.len() as i32))
}

fn native_string_cmp(call: &mut NativeCall<'_>, self_entity: Entity, args: Entity) -> NativeResult {
    let s = self_string(call, self_entity)?;
    let Some(other) = string_of(call.process, args) else {
        return Ok(Entity::Nil);
    };
    Ok(Entity::int(match s.cmp(&other) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

fn native_string_eq(call: &mut NativeCall<'_>, self_entity: Entity, args: Entity) -> NativeResult {
    let s = self_string(call, self_entity)?;
    Ok(Entity::from_bool(
        string_of(call.process, args).map(|o| o == s).unwrap_or(false),
    ))
}

fn native_string_neq(call: &mut NativeCall<'_>, self_entity: Entity, args: Entity) -> NativeResult {
    let s = self_string(call, self_entity)?;
    Ok(Entity::from_bool(
        string_of(call.process, args).map(|o| o != s).unwrap_or(true),
    ))
}

fn native_string_extend(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    args: Entity,
) -> NativeResult {
    let Some(other) = string_of(call.process, args) else {
        return Err(NativeRaise::new(
            "Cannot extend a string with something not a string.",
        ));
    };
    let handle = self_entity
        .as_object()
        .ok_or_else(|| NativeRaise::new("Method receiver is not a String."))?;
    match &mut call.process.heap.get_mut(handle).payload {
        Payload::Str(s) => {
            s.push_str(&other);
            Ok(self_entity)
        }
        _ => Err(NativeRaise::new("Method receiver is not a String.")),
    }
}

fn native_string_index(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    args: Entity,
) -> NativeResult {
    let s = self_string(call, self_entity)?;
    let Some(Primitive::Int(index)) = args.as_primitive() else {
        return Err(NativeRaise::new("Bad string index input"));
    };
    if index < 0 || index as usize >= s.len() {
        return Err(NativeRaise::new("Index out of bounds."));
    }
    Ok(Entity::char(s.as_bytes()[index as usize]))
}

// ----------------------------------------------------------------------
// Array and tuple methods
// ----------------------------------------------------------------------

fn self_array_handle(
    call: &NativeCall<'_>,
    self_entity: Entity,
) -> Result<jv_core::ObjHandle, NativeRaise> {
    let handle = self_entity
        .as_object()
        .ok_or_else(|| NativeRaise::new("Method receiver is not an Array."))?;
    if call.process.heap.get(handle).as_array().is_none() {
        return Err(NativeRaise::new("Method receiver is not an Array."));
    }
    Ok(handle)
}

fn native_array_len(call: &mut NativeCall<'_>, self_entity: Entity, _args: Entity) -> NativeResult {
    let handle = self_array_handle(call, self_entity)?;
    let len = call.process.heap.get(handle).as_array().map(Vec::len).unwrap_or(0);
    Ok(Entity::int(len as i32))
}

fn native_array_append(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    args: Entity,
) -> NativeResult {
    let handle = self_array_handle(call, self_entity)?;
    call.process.heap.array_add(handle, args);
    Ok(self_entity)
}

fn native_array_remove(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    args: Entity,
) -> NativeResult {
    let handle = self_array_handle(call, self_entity)?;
    let Some(Primitive::Int(index)) = args.as_primitive() else {
        return Err(NativeRaise::new("Array.remove expects an int index."));
    };
    if index < 0 {
        return Err(NativeRaise::new("Array.remove expects an int index."));
    }
    Ok(call.process.heap.array_remove(handle, index as usize))
}

fn native_tuple_len(call: &mut NativeCall<'_>, self_entity: Entity, _args: Entity) -> NativeResult {
    let len = self_entity
        .as_object()
        .and_then(|h| call.process.heap.get(h).as_tuple().map(<[Entity]>::len));
    match len {
        Some(len) => Ok(Entity::int(len as i32)),
        None => Err(NativeRaise::new("Method receiver is not a Tuple.")),
    }
}

// ----------------------------------------------------------------------
// Reflection methods
// ----------------------------------------------------------------------

fn native_object_class(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    _args: Entity,
) -> NativeResult {
    let Some(handle) = self_entity.as_object() else {
        return Ok(Entity::Nil);
    };
    let class = call.process.heap.get(handle).class;
    Ok(Entity::Object(call.mm.class(class).reflection))
}

fn native_object_hash(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    _args: Entity,
) -> NativeResult {
    let _ = call;
    match self_entity.as_object() {
        Some(handle) => Ok(Entity::int(handle.index() as i32)),
        None => Ok(Entity::Nil),
    }
}

fn native_class_name(call: &mut NativeCall<'_>, self_entity: Entity, _args: Entity) -> NativeResult {
    let class = self_entity.as_object().and_then(|h| {
        match call.process.heap.get(h).payload {
            Payload::Class(id) => Some(id),
            _ => None,
        }
    });
    let Some(class) = class else {
        return Err(NativeRaise::new("Method receiver is not a Class."));
    };
    let name = call.mm.class(class).name.as_str().to_owned();
    Ok(new_string(call, name))
}

fn native_module_name(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    _args: Entity,
) -> NativeResult {
    let module = self_entity.as_object().and_then(|h| {
        match call.process.heap.get(h).payload {
            Payload::Module(id) => Some(id),
            _ => None,
        }
    });
    let Some(module) = module else {
        return Err(NativeRaise::new("Method receiver is not a Module."));
    };
    let name = call.mm.module(module).name.as_str().to_owned();
    Ok(new_string(call, name))
}

fn function_of(call: &NativeCall<'_>, self_entity: Entity) -> Option<crate::function::FunctionId> {
    self_entity.as_object().and_then(|h| {
        match call.process.heap.get(h).payload {
            Payload::Function(id) => Some(id),
            Payload::FunctionRef { function, .. } => Some(function),
            _ => None,
        }
    })
}

fn native_function_name(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    _args: Entity,
) -> NativeResult {
    let Some(function) = function_of(call, self_entity) else {
        return Err(NativeRaise::new("Method receiver is not a Function."));
    };
    let name = call.mm.function(function).name.as_str().to_owned();
    Ok(new_string(call, name))
}

fn native_function_module(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    _args: Entity,
) -> NativeResult {
    let Some(function) = function_of(call, self_entity) else {
        return Err(NativeRaise::new("Method receiver is not a Function."));
    };
    let module = call.mm.function(function).module;
    Ok(Entity::Object(call.mm.module(module).reflection))
}

// ----------------------------------------------------------------------
// Range
// ----------------------------------------------------------------------

fn native_range_new(call: &mut NativeCall<'_>, self_entity: Entity, args: Entity) -> NativeResult {
    let items = arg_list(call.process, args);
    let ints: Vec<i32> = items
        .iter()
        .filter_map(|e| match e.as_primitive() {
            Some(Primitive::Int(i)) => Some(i),
            _ => None,
        })
        .collect();
    if ints.len() != items.len() || !(2..=3).contains(&ints.len()) {
        return Err(NativeRaise::new("Range expects (start, end[, inc]) ints."));
    }
    let handle = self_entity
        .as_object()
        .ok_or_else(|| NativeRaise::new("Method receiver is not a Range."))?;
    let range = call
        .process
        .heap
        .get_mut(handle)
        .native_payload_mut::<Range>()
        .ok_or_else(|| NativeRaise::new("Method receiver is not a Range."))?;
    range.start = ints[0];
    range.end = ints[1];
    range.inc = ints.get(2).copied().unwrap_or(1);
    Ok(self_entity)
}

fn range_field(
    call: &mut NativeCall<'_>,
    self_entity: Entity,
    pick: fn(&Range) -> i32,
) -> NativeResult {
    let range = self_entity
        .as_object()
        .and_then(|h| call.process.heap.get(h).native_payload::<Range>().copied());
    match range {
        Some(range) => Ok(Entity::int(pick(&range))),
        None => Err(NativeRaise::new("Method receiver is not a Range.")),
    }
}

fn native_range_start(call: &mut NativeCall<'_>, self_entity: Entity, _args: Entity) -> NativeResult {
    range_field(call, self_entity, |r| r.start)
}

fn native_range_end(call: &mut NativeCall<'_>, self_entity: Entity, _args: Entity) -> NativeResult {
    range_field(call, self_entity, |r| r.end)
}

fn native_range_inc(call: &mut NativeCall<'_>, self_entity: Entity, _args: Entity) -> NativeResult {
    range_field(call, self_entity, |r| r.inc)
}
