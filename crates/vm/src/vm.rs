//! The virtual machine.
//!
//! Owns the module manager and the processes, drives the scheduler, and
//! provides the embedding surface: register module files, hydrate tapes,
//! set program arguments, run a module.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use jv_core::{Entity, StaticError, Symbol, Tape};

use crate::builtins;
use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::module::ModuleId;
use crate::module_manager::ModuleManager;
use crate::object::Payload;
use crate::process::Process;
use crate::task::{TaskId, TaskState};

/// Where program output goes: the real streams, or an in-memory capture
/// used by embedders and tests.
#[derive(Debug, Clone, Default)]
pub enum Output {
    /// stdout / stderr
    #[default]
    Standard,
    /// Both streams into one shared buffer
    Capture(Arc<Mutex<String>>),
}

impl Output {
    /// Creates a capturing sink and the handle to read it.
    pub fn capture() -> (Output, Arc<Mutex<String>>) {
        let buffer = Arc::new(Mutex::new(String::new()));
        (Output::Capture(Arc::clone(&buffer)), buffer)
    }

    /// Writes to the out stream.
    pub fn write(&mut self, text: &str) {
        match self {
            Output::Standard => print!("{text}"),
            Output::Capture(buffer) => buffer.lock().push_str(text),
        }
    }

    /// Writes to the error stream.
    pub fn write_err(&mut self, text: &str) {
        match self {
            Output::Standard => eprint!("{text}"),
            Output::Capture(buffer) => buffer.lock().push_str(text),
        }
    }
}

/// A running Jv machine: registries, processes and the output sink.
pub struct Vm {
    /// Module, class and function registries
    pub mm: ModuleManager,
    processes: Vec<Process>,
    main: usize,
    output: Output,
}

impl Vm {
    /// Creates a machine with its main process and the builtin module
    /// installed.
    pub fn new() -> Self {
        Self::with_output(Output::Standard)
    }

    /// Creates a machine writing program output to `output`.
    pub fn with_output(output: Output) -> Self {
        let mut mm = ModuleManager::new();
        // The process needs the Task and Object class ids, which only exist
        // after the builtin install; bootstrap with a bare heap.
        let mut heap = crate::heap::Heap::new();
        builtins::install(&mut mm, &mut heap);
        let core = mm.core();
        let mut main_process = Process::new(core.task, core.object);
        main_process.heap = heap;
        Vm {
            mm,
            processes: vec![main_process],
            main: 0,
            output,
        }
    }

    /// Creates a machine whose output is captured, returning the capture
    /// handle alongside it.
    pub fn with_capture() -> (Self, Arc<Mutex<String>>) {
        let (output, buffer) = Output::capture();
        (Self::with_output(output), buffer)
    }

    /// The main process.
    pub fn main_process(&mut self) -> &mut Process {
        &mut self.processes[self.main]
    }

    /// Registers a module file for lazy loading; returns the module name.
    pub fn register_file(&mut self, path: &Path) -> Result<Symbol, StaticError> {
        self.mm.register_file(path)
    }

    /// Hydrates a tape directly into the main process.
    pub fn load_tape(&mut self, tape: Tape) -> VmResult<ModuleId> {
        let heap = &mut self.processes[self.main].heap;
        self.mm.hydrate(heap, Arc::new(tape))
    }

    /// Installs `--args` key/value pairs as members of a global `args`
    /// object on the builtin module.
    pub fn set_args(&mut self, pairs: &[(String, String)]) {
        let core = self.mm.core();
        let heap = &mut self.processes[self.main].heap;
        let args = heap.new_object(core.object, Payload::None);
        for (key, value) in pairs {
            let value_obj = heap.new_object(core.string, Payload::Str(value.clone()));
            heap.set_member_obj(args, Symbol::intern(key), value_obj);
        }
        let builtin_reflection = self.mm.module(self.mm.builtin_module()).reflection;
        heap.set_member_obj(builtin_reflection, Symbol::intern("args"), args);
    }

    /// Runs a loaded module's top-level code to completion, returning the
    /// root task's final resval.
    pub fn run_module(&mut self, module: ModuleId) -> VmResult<Entity> {
        self.mm.module_mut(module).is_initialized = true;
        let reflection = self.mm.module(module).reflection;
        let process = &mut self.processes[self.main];
        let root = process.create_task();
        process.create_context(root, Entity::Object(reflection), module, 0);
        self.run_process(self.main)?;
        Ok(self.processes[self.main].task(root).resval)
    }

    /// Loads (if needed) and runs the module named `name`.
    pub fn run_main(&mut self, name: Symbol) -> VmResult<Entity> {
        let heap = &mut self.processes[self.main].heap;
        let module = self.mm.lookup_or_load(heap, name)?.ok_or_else(|| {
            VmError::Load(StaticError::ModuleNotFound {
                name: name.as_str().to_owned(),
            })
        })?;
        self.run_module(module)
    }

    /// Drains a process's ready queue, routing each stopped task per its
    /// state: waiting tasks park, completed tasks resume their dependent,
    /// errored tasks reroute the error or report it.
    pub fn run_process(&mut self, index: usize) -> VmResult<()> {
        loop {
            let Some(task) = self.processes[index].queued_tasks.pop_front() else {
                return Ok(());
            };
            let state = {
                let process = &mut self.processes[index];
                let mut engine = ExecutionEngine::new(&mut self.mm, process, &mut self.output);
                engine.execute_task(task)?
            };
            log::debug!("task {task} stopped: {state:?}");
            match state {
                TaskState::Waiting => {
                    self.processes[index].waiting_tasks.insert(task);
                }
                TaskState::Complete => {
                    self.finish_task(index, task, false);
                }
                TaskState::Error => {
                    self.finish_task(index, task, true);
                }
                other => {
                    return Err(VmError::internal(format!(
                        "task {task} stopped in state {other:?}"
                    )));
                }
            }
        }
    }

    /// Completion/error bookkeeping for one stopped task. Completed and
    /// errored tasks are retired as soon as their dependent holds the
    /// result, releasing the task's heap pins.
    fn finish_task(&mut self, index: usize, task: TaskId, errored: bool) {
        let process = &mut self.processes[index];
        process.completed_tasks.insert(task);
        let dependent = process.task(task).dependent_task;
        match dependent {
            Some(dep) => {
                if errored {
                    let resval = process.task(task).resval;
                    let t = process.task_mut(dep);
                    t.child_task_has_error = true;
                    t.resval = resval;
                }
                process.waiting_tasks.remove(&dep);
                process.queued_tasks.push_back(dep);
            }
            None if errored => {
                let resval = process.task(task).resval;
                let text = builtins::render_error(&self.mm, process, resval);
                self.output.write_err(&text);
                self.output.write_err("\n");
            }
            None => {}
        }
        self.processes[index].retire_task(task);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
