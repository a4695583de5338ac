//! The execution loop.
//!
//! Runs one task until it returns, suspends, errors or completes. Dispatch
//! is a single match over the op of the fetched instruction; the operand
//! form selects the exact variant executed. Calls, module loads and
//! user-operator dispatch suspend the task after advancing the instruction
//! pointer, so the continuation resumes on the next op.

use std::sync::Arc;

use jv_core::keywords;
use jv_core::primitive::{self, Primitive, PrimitiveResult};
use jv_core::{Arg, Entity, Instruction, ObjHandle, Op, Symbol};

use crate::error::{VmError, VmResult};
use crate::function::{FunctionBody, FunctionId, NativeCall};
use crate::module::ModuleId;
use crate::module_manager::ModuleManager;
use crate::object::Payload;
use crate::process::Process;
use crate::task::{TaskId, TaskState, WaitReason};
use crate::vm::Output;

/// What the dispatched instruction asks the loop to do next.
enum Flow {
    /// Advance to the next instruction
    Continue,
    /// The instruction pointer was set absolutely
    Goto,
    /// Suspend the task; the continuation starts at the next instruction
    Suspend(WaitReason),
    /// The task is done
    Complete,
}

/// Executes tasks of one process against the shared registries.
pub struct ExecutionEngine<'a> {
    /// Module, class and function registries
    pub mm: &'a mut ModuleManager,
    /// The process being driven
    pub process: &'a mut Process,
    /// Output sink for `prnt` and the print natives
    pub output: &'a mut Output,
}

impl<'a> ExecutionEngine<'a> {
    /// Creates an engine over a process.
    pub fn new(
        mm: &'a mut ModuleManager,
        process: &'a mut Process,
        output: &'a mut Output,
    ) -> Self {
        ExecutionEngine {
            mm,
            process,
            output,
        }
    }

    /// Runs `task` to its next stop, returning its state.
    pub fn execute_task(&mut self, task: TaskId) -> VmResult<TaskState> {
        self.process.current_task = Some(task);
        {
            let t = self.process.task_mut(task);
            t.state = TaskState::Running;
            t.wait_reason = WaitReason::NotWaiting;
        }

        // An error that bubbled to a task with no remaining frames.
        if self.process.task(task).contexts.is_empty() {
            self.process.task_mut(task).state = TaskState::Complete;
            self.process.current_task = None;
            return Ok(TaskState::Complete);
        }

        if self.process.task(task).child_task_has_error {
            let Entity::Object(err) = self.process.task(task).resval else {
                return Err(VmError::internal(
                    "child_task_has_error without an Error object in resval",
                ));
            };
            self.ctx_mut(task).error = Some(err);
            self.process.task_mut(task).child_task_has_error = false;
        }

        loop {
            if self.ctx(task).error.is_some() && !self.attempt_catch(task) {
                self.process.task_mut(task).state = TaskState::Error;
                break;
            }

            let (module, ip) = {
                let ctx = self.ctx(task);
                (ctx.module, ctx.ins)
            };
            let tape = Arc::clone(&self.mm.module(module).tape);
            let Some(ins) = tape.get(ip).copied() else {
                // Falling off the tape returns to the caller.
                let resval = self.process.task(task).resval;
                self.write_return_value(task, resval);
                self.process.task_mut(task).state = TaskState::Complete;
                break;
            };
            log::trace!("task {task} [{module:?}:{ip}] {ins}");

            match self.dispatch(task, &ins)? {
                Flow::Continue => self.ctx_mut(task).ins += 1,
                Flow::Goto => {}
                Flow::Suspend(reason) => {
                    self.ctx_mut(task).ins += 1;
                    let t = self.process.task_mut(task);
                    t.state = TaskState::Waiting;
                    t.wait_reason = reason;
                    break;
                }
                Flow::Complete => {
                    // BBLK popping the last frame completes with no frame
                    // left to advance.
                    if let Some(ctx) = self.process.task_mut(task).current_context_mut() {
                        ctx.ins += 1;
                    }
                    self.process.task_mut(task).state = TaskState::Complete;
                    break;
                }
            }
        }

        self.process.current_task = None;
        Ok(self.process.task(task).state)
    }

    // ------------------------------------------------------------------
    // Frame helpers
    // ------------------------------------------------------------------

    fn ctx(&self, task: TaskId) -> &crate::context::Context {
        self.process
            .task(task)
            .current_context()
            .expect("task has no context")
    }

    fn ctx_mut(&mut self, task: TaskId) -> &mut crate::context::Context {
        self.process
            .task_mut(task)
            .current_context_mut()
            .expect("task has no context")
    }

    fn resval(&self, task: TaskId) -> Entity {
        self.process.task(task).resval
    }

    fn set_resval(&mut self, task: TaskId, value: Entity) {
        self.process.task_mut(task).resval = value;
    }

    /// Resolves an identifier: `self`, then the frame chain, then the
    /// current module's reflection members, then the builtin module's.
    fn lookup(&self, task: TaskId, name: Symbol) -> Option<Entity> {
        if name == *keywords::SELF {
            return Some(self.ctx(task).self_entity);
        }
        if let Some(value) = self.process.lookup_local(task, name) {
            return Some(value);
        }
        let module = self.ctx(task).module;
        if let Some(value) = self.mm.module_member(&self.process.heap, module, name) {
            return Some(value);
        }
        let builtin = self.mm.builtin_module();
        if builtin != module {
            return self.mm.module_member(&self.process.heap, builtin, name);
        }
        None
    }

    /// Binds `name` in the current frame.
    fn bind(&mut self, task: TaskId, name: Symbol, value: Entity, is_const: bool) {
        let member_obj = self.ctx(task).member_obj;
        self.process.heap.set_member(member_obj, name, value);
        if is_const {
            self.ctx_mut(task).const_names.insert(name);
        }
    }

    /// Assigns `name`: updates the nearest enclosing binding, or defines it
    /// in the current frame. Raises on const bindings.
    fn assign(&mut self, task: TaskId, name: Symbol, value: Entity, mark_const: bool) {
        let frame = self
            .process
            .task(task)
            .contexts
            .iter()
            .rposition(|ctx| self.process.heap.get(ctx.member_obj).members.contains_key(&name));
        match frame {
            Some(index) => {
                let ctx = &self.process.task(task).contexts[index];
                if ctx.const_names.contains(&name) {
                    self.raise(task, format!("Cannot reassign const '{name}'."));
                    return;
                }
                let member_obj = ctx.member_obj;
                self.process.heap.set_member(member_obj, name, value);
                if mark_const {
                    self.process.task_mut(task).contexts[index]
                        .const_names
                        .insert(name);
                }
            }
            None => self.bind(task, name, value, mark_const),
        }
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    /// Builds a String object.
    pub(crate) fn string_object(&mut self, text: String) -> ObjHandle {
        self.process
            .heap
            .new_object(self.mm.core().string, Payload::Str(text))
    }

    /// Builds an Error object with `msg` and a stack trace walked from the
    /// raising task's frames.
    pub(crate) fn make_error(&mut self, task: TaskId, message: String) -> ObjHandle {
        let core = self.mm.core();
        let error = self.process.heap.new_object(core.error, Payload::None);
        let msg = self.string_object(message);
        self.process
            .heap
            .set_member_obj(error, Symbol::intern("msg"), msg);

        let trace = self
            .process
            .heap
            .new_object(core.array, Payload::Array(Vec::new()));
        self.process
            .heap
            .set_member_obj(error, Symbol::intern("trace"), trace);

        let frames: Vec<(ModuleId, usize)> = self
            .process
            .task(task)
            .contexts
            .iter()
            .rev()
            .map(|ctx| (ctx.module, ctx.ins))
            .collect();
        for (module, ins) in frames {
            let tape = Arc::clone(&self.mm.module(module).tape);
            let module_name = self.mm.module(module).name;
            let line_num = tape.line_of(ins);
            let text = tape
                .source_map()
                .and_then(|sm| sm.line_text(line_num))
                .unwrap_or("")
                .trim()
                .to_owned();

            let line = self.process.heap.new_object(core.stack_line, Payload::None);
            let module_str = self.string_object(module_name.as_str().to_owned());
            self.process
                .heap
                .set_member_obj(line, Symbol::intern("module"), module_str);
            self.process.heap.set_member(
                line,
                Symbol::intern("line_num"),
                Entity::int(line_num as i32),
            );
            let text_str = self.string_object(text);
            self.process
                .heap
                .set_member_obj(line, Symbol::intern("text"), text_str);
            self.process.heap.array_add(trace, Entity::Object(line));
        }
        error
    }

    /// Raises a runtime error on the task: resval and the frame error slot
    /// both hold the Error object; unwinding happens on the next step.
    pub(crate) fn raise(&mut self, task: TaskId, message: String) {
        let error = self.make_error(task, message);
        self.ctx_mut(task).error = Some(error);
        self.set_resval(task, Entity::Object(error));
    }

    /// Unwinds frames until one has a catch target; jumps there and clears
    /// the error. False when the task has no enclosing catch.
    fn attempt_catch(&mut self, task: TaskId) -> bool {
        loop {
            let ctx = self.ctx(task);
            if let Some(catch) = ctx.catch_ins {
                let ctx = self.ctx_mut(task);
                ctx.ins = catch;
                ctx.error = None;
                ctx.catch_ins = None;
                return true;
            }
            let error = ctx.error;
            let t = self.process.task_mut(task);
            t.contexts.pop();
            match t.contexts.last_mut() {
                Some(previous) => previous.error = error,
                None => return false,
            }
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// The printable form of an entity.
    pub(crate) fn stringify(&self, entity: Entity) -> String {
        stringify(self.mm, self.process, entity, 0)
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Spawns a sub-task at `module`/`ins` whose completion resumes
    /// `caller`. The caller's resval carries the arguments across.
    fn spawn_sub_task(
        &mut self,
        caller: TaskId,
        self_entity: Entity,
        module: ModuleId,
        ins: usize,
    ) -> TaskId {
        let sub = self.process.create_task();
        let resval = self.resval(caller);
        {
            let t = self.process.task_mut(sub);
            t.dependent_task = Some(caller);
            t.resval = resval;
        }
        self.process.create_context(sub, self_entity, module, ins);
        sub
    }

    /// Invokes a function: natives run synchronously into the caller's
    /// resval; bytecode spawns a dependent sub-task. Returns true when the
    /// caller must suspend.
    fn call_function_base(
        &mut self,
        task: TaskId,
        function: FunctionId,
        self_entity: Entity,
    ) -> VmResult<bool> {
        let (body, module) = {
            let f = self.mm.function(function);
            (f.body, f.module)
        };
        match body {
            FunctionBody::Native(native) => {
                let args = self.resval(task);
                let result = {
                    let mut call = NativeCall {
                        mm: self.mm,
                        process: self.process,
                        task,
                        output: self.output,
                    };
                    native(&mut call, self_entity, args)
                };
                match result {
                    Ok(value) => self.set_resval(task, value),
                    Err(raised) => self.raise(task, raised.message),
                }
                Ok(false)
            }
            FunctionBody::Bytecode(ins) => {
                self.spawn_sub_task(task, self_entity, module, ins);
                Ok(true)
            }
        }
    }

    /// Dispatches a method along the receiver's class chain.
    fn call_method(&mut self, task: TaskId, receiver: ObjHandle, name: Symbol) -> VmResult<bool> {
        let class = self.process.heap.get(receiver).class;
        match self.mm.find_method(class, name)? {
            Some(function) => self.call_function_base(task, function, Entity::Object(receiver)),
            None => {
                let class_name = self.mm.class(class).name;
                self.raise(
                    task,
                    format!("Failed to find method '{name}' on {class_name}"),
                );
                Ok(false)
            }
        }
    }

    /// The CALL/CLLN op. Returns true when the task suspends on a spawned
    /// sub-task.
    fn execute_call(&mut self, task: TaskId, ins: &Instruction) -> VmResult<bool> {
        let clln = ins.op == Op::CLLN;
        let callable: Entity;

        match ins.arg {
            Arg::Id(name) => {
                if clln {
                    self.set_resval(task, Entity::Nil);
                }
                let receiver = self.process.task_mut(task).pop_stack();
                let Entity::Object(obj) = receiver else {
                    self.raise(task, "Calling function on non-object.".to_owned());
                    return Ok(false);
                };
                let class = self.process.heap.get(obj).class;
                if class == self.mm.core().module {
                    let Payload::Module(module) = self.process.heap.get(obj).payload else {
                        return Err(VmError::internal("module object without module payload"));
                    };
                    match self.mm.module_member(&self.process.heap, module, name) {
                        Some(found) => callable = found,
                        None => return self.call_method(task, obj, name),
                    }
                } else {
                    return self.call_method(task, obj, name);
                }
            }
            Arg::None => {
                callable = self.process.task_mut(task).pop_stack();
            }
            _ => return Err(VmError::invalid_operand(ins.op)),
        }

        self.invoke_callable(task, callable, clln)
    }

    /// Calls a callable entity popped from the stack or looked up on a
    /// module: a Class (instantiation), a FunctionRef, or a Function.
    fn invoke_callable(&mut self, task: TaskId, callable: Entity, clln: bool) -> VmResult<bool> {
        let Entity::Object(handle) = callable else {
            self.raise(
                task,
                "Attempted to call something not a function.".to_owned(),
            );
            return Ok(false);
        };
        let core = self.mm.core();
        let class_of = self.process.heap.get(handle).class;

        if class_of == core.class {
            let Payload::Class(class) = self.process.heap.get(handle).payload else {
                return Err(VmError::internal("class object without class payload"));
            };
            let payload = self.mm.class(class).initial_payload();
            let delete_hook = self.mm.class(class).delete_hook;
            let instance = self
                .process
                .heap
                .new_object_full(class, payload, delete_hook);
            let constructor = self
                .mm
                .class(class)
                .methods
                .get(&*keywords::CONSTRUCTOR)
                .copied();
            return match constructor {
                None => {
                    self.set_resval(task, Entity::Object(instance));
                    Ok(false)
                }
                Some(function) => {
                    if clln {
                        self.set_resval(task, Entity::Nil);
                    }
                    self.call_function_base(task, function, Entity::Object(instance))
                }
            };
        }

        if class_of == core.function_ref {
            let Payload::FunctionRef { function, receiver } = self.process.heap.get(handle).payload
            else {
                return Err(VmError::internal("function ref without payload"));
            };
            if clln {
                self.set_resval(task, Entity::Nil);
            }
            return self.call_function_base(task, function, Entity::Object(receiver));
        }

        if class_of == core.function {
            let Payload::Function(function) = self.process.heap.get(handle).payload else {
                return Err(VmError::internal("function object without payload"));
            };
            if clln {
                self.set_resval(task, Entity::Nil);
            }
            let module = self.mm.function(function).module;
            let module_reflection = self.mm.module(module).reflection;
            return self.call_function_base(task, function, Entity::Object(module_reflection));
        }

        self.raise(
            task,
            "Attempted to call something not a function.".to_owned(),
        );
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Primitive operations
    // ------------------------------------------------------------------

    /// Fetches the (lhs, rhs) pair for a primitive op per the operand form,
    /// raising when either side is not primitive. `None` means a raise
    /// happened.
    fn primitive_operands(
        &mut self,
        task: TaskId,
        ins: &Instruction,
    ) -> VmResult<Option<(Primitive, Primitive)>> {
        let op = ins.op;
        let check = |engine: &mut Self, task: TaskId, side: &str, e: Entity| match e {
            Entity::Primitive(p) => Some(p),
            _ => {
                engine.raise(task, format!("{side} for op '{op}' must be primitive."));
                None
            }
        };
        match ins.arg {
            Arg::None => {
                let second = self.process.task_mut(task).pop_stack();
                let Some(rhs) = check(self, task, "RHS", second) else {
                    return Ok(None);
                };
                let first = self.process.task_mut(task).pop_stack();
                let Some(lhs) = check(self, task, "LHS", first) else {
                    return Ok(None);
                };
                Ok(Some((lhs, rhs)))
            }
            Arg::Id(name) => {
                let Some(lhs) = check(self, task, "LHS", self.resval(task)) else {
                    return Ok(None);
                };
                let looked_up = self.lookup(task, name).unwrap_or(Entity::Nil);
                let Some(rhs) = check(self, task, "RHS", looked_up) else {
                    return Ok(None);
                };
                Ok(Some((lhs, rhs)))
            }
            Arg::Primitive(rhs) => {
                let Some(lhs) = check(self, task, "LHS", self.resval(task)) else {
                    return Ok(None);
                };
                Ok(Some((lhs, rhs)))
            }
            Arg::Text(_) => Err(VmError::invalid_operand(op)),
        }
    }

    /// Arithmetic ops: the result lands in resval.
    fn arith_op(
        &mut self,
        task: TaskId,
        ins: &Instruction,
        f: fn(Primitive, Primitive) -> PrimitiveResult,
    ) -> VmResult<()> {
        let Some((lhs, rhs)) = self.primitive_operands(task, ins)? else {
            return Ok(());
        };
        match f(lhs, rhs) {
            Ok(result) => self.set_resval(task, Entity::Primitive(result)),
            Err(err) => self.raise(task, err.to_string()),
        }
        Ok(())
    }

    /// Comparison ops: truthy `1` or nil lands in resval.
    fn compare_op(
        &mut self,
        task: TaskId,
        ins: &Instruction,
        f: fn(Primitive, Primitive) -> bool,
    ) -> VmResult<()> {
        let Some((lhs, rhs)) = self.primitive_operands(task, ins)? else {
            return Ok(());
        };
        self.set_resval(task, Entity::from_bool(f(lhs, rhs)));
        Ok(())
    }

    /// EQ/NEQ: object receivers with a user-defined operator dispatch as a
    /// method call (true = suspend); otherwise primitive comparison.
    fn execute_eq(&mut self, task: TaskId, ins: &Instruction) -> VmResult<bool> {
        let negate = ins.op == Op::NEQ;
        match ins.arg {
            Arg::None => {
                let second = self.process.task_mut(task).pop_stack();
                let first = self.process.task_mut(task).pop_stack();
                if let Entity::Object(obj) = first {
                    let op_name = if negate {
                        *keywords::NEQ_FN
                    } else {
                        *keywords::EQ_FN
                    };
                    let class = self.process.heap.get(obj).class;
                    if let Some(function) = self.mm.find_method(class, op_name)? {
                        self.set_resval(task, second);
                        return self.call_function_base(task, function, first);
                    }
                }
                let (Entity::Primitive(lhs), Entity::Primitive(rhs)) = (first, second) else {
                    let side = if first.as_primitive().is_none() {
                        "LHS"
                    } else {
                        "RHS"
                    };
                    self.raise(task, format!("{side} for op 'EQ' must be primitive."));
                    return Ok(false);
                };
                let equal = primitive::eq(lhs, rhs);
                self.set_resval(task, Entity::from_bool(equal != negate));
                Ok(false)
            }
            _ => {
                // Id and literal forms compare the current resval against
                // the operand.
                let Some((lhs, rhs)) = self.primitive_operands(task, ins)? else {
                    return Ok(false);
                };
                let equal = primitive::eq(lhs, rhs);
                self.set_resval(task, Entity::from_bool(equal != negate));
                Ok(false)
            }
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn dispatch(&mut self, task: TaskId, ins: &Instruction) -> VmResult<Flow> {
        match ins.op {
            Op::NOP => Ok(Flow::Continue),

            Op::RES => {
                let value = match ins.arg {
                    Arg::None => self.process.task_mut(task).pop_stack(),
                    Arg::Id(name) => self.lookup(task, name).unwrap_or(Entity::Nil),
                    Arg::Primitive(p) => Entity::Primitive(p),
                    Arg::Text(text) => {
                        let contents = unquote(text.as_str());
                        Entity::Object(self.string_object(contents))
                    }
                };
                self.set_resval(task, value);
                Ok(Flow::Continue)
            }

            Op::RNIL => {
                self.set_resval(task, Entity::Nil);
                Ok(Flow::Continue)
            }

            Op::PUSH => {
                let value = match ins.arg {
                    Arg::None => self.resval(task),
                    Arg::Id(name) => self.lookup(task, name).unwrap_or(Entity::Nil),
                    Arg::Primitive(p) => Entity::Primitive(p),
                    Arg::Text(_) => return Err(VmError::invalid_operand(ins.op)),
                };
                self.process.task_mut(task).push_stack(value);
                Ok(Flow::Continue)
            }

            Op::PNIL => {
                self.process.task_mut(task).push_stack(Entity::Nil);
                Ok(Flow::Continue)
            }

            Op::PSRS => {
                let value = match ins.arg {
                    Arg::Id(name) => self.lookup(task, name).unwrap_or(Entity::Nil),
                    Arg::Primitive(p) => Entity::Primitive(p),
                    Arg::Text(text) => {
                        let contents = unquote(text.as_str());
                        Entity::Object(self.string_object(contents))
                    }
                    Arg::None => return Err(VmError::invalid_operand(ins.op)),
                };
                self.process.task_mut(task).push_stack(value);
                self.set_resval(task, value);
                Ok(Flow::Continue)
            }

            Op::PEEK => {
                let value = match ins.arg {
                    Arg::None => self.process.task(task).peek_stack(),
                    Arg::Id(name) => self.lookup(task, name).unwrap_or(Entity::Nil),
                    _ => return Err(VmError::invalid_operand(ins.op)),
                };
                self.set_resval(task, value);
                Ok(Flow::Continue)
            }

            Op::DUP => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                let top = self.process.task(task).peek_stack();
                self.process.task_mut(task).push_stack(top);
                Ok(Flow::Continue)
            }

            Op::LET | Op::LETC => {
                let Some(name) = ins.arg.as_id() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                let value = self.resval(task);
                self.bind(task, name, value, ins.op == Op::LETC);
                Ok(Flow::Continue)
            }

            Op::SET | Op::SETC => {
                let Some(name) = ins.arg.as_id() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                let value = self.resval(task);
                self.assign(task, name, value, ins.op == Op::SETC);
                Ok(Flow::Continue)
            }

            Op::GET | Op::GTSH => {
                let Some(name) = ins.arg.as_id() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                let resval = self.resval(task);
                let Entity::Object(obj) = resval else {
                    let kind = if matches!(resval, Entity::Nil) {
                        "Nil"
                    } else {
                        "Primitive"
                    };
                    self.raise(
                        task,
                        format!("Attempted to get field '{name}' from a {kind}."),
                    );
                    return Ok(Flow::Continue);
                };
                let mut member = self.process.heap.get(obj).get_member(name);
                if member.is_none() {
                    let class = self.process.heap.get(obj).class;
                    if let Some(function) = self.mm.find_method(class, name)? {
                        let fn_ref = self.process.heap.new_object(
                            self.mm.core().function_ref,
                            Payload::FunctionRef {
                                function,
                                receiver: obj,
                            },
                        );
                        self.process.heap.set_member_obj(obj, name, fn_ref);
                        member = Some(Entity::Object(fn_ref));
                    }
                }
                let value = member.unwrap_or(Entity::Nil);
                self.set_resval(task, value);
                if ins.op == Op::GTSH {
                    self.process.task_mut(task).push_stack(value);
                }
                Ok(Flow::Continue)
            }

            Op::FLD => {
                let Some(name) = ins.arg.as_id() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                let Entity::Object(obj) = self.resval(task) else {
                    self.raise(
                        task,
                        format!("Attempted to set field '{name}' on something not an object."),
                    );
                    return Ok(Flow::Continue);
                };
                let value = self.process.task_mut(task).pop_stack();
                self.process.heap.set_member(obj, name, value);
                Ok(Flow::Continue)
            }

            Op::CALL | Op::CLLN => {
                if self.execute_call(task, ins)? {
                    Ok(Flow::Suspend(WaitReason::OnFnCall))
                } else {
                    Ok(Flow::Continue)
                }
            }

            Op::RET => {
                let value = match ins.arg {
                    Arg::None => self.resval(task),
                    Arg::Id(name) => self.lookup(task, name).unwrap_or(Entity::Nil),
                    Arg::Primitive(p) => Entity::Primitive(p),
                    Arg::Text(_) => return Err(VmError::invalid_operand(ins.op)),
                };
                self.write_return_value(task, value);
                Ok(Flow::Complete)
            }

            Op::NBLK => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                let (module, self_entity, ins_pos) = {
                    let ctx = self.ctx(task);
                    (ctx.module, ctx.self_entity, ctx.ins)
                };
                self.process.create_context(task, self_entity, module, ins_pos);
                Ok(Flow::Continue)
            }

            Op::BBLK => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                if self.process.back_context(task) {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Complete)
                }
            }

            Op::JMP => {
                let Some(offset) = ins.arg.as_int() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                self.relative_jump(task, offset)?;
                Ok(Flow::Goto)
            }

            Op::IF | Op::IFN => {
                let Some(offset) = ins.arg.as_int() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                let truthy = self.resval(task).is_truthy();
                if truthy == (ins.op == Op::IF) {
                    self.relative_jump(task, offset)?;
                    Ok(Flow::Goto)
                } else {
                    Ok(Flow::Continue)
                }
            }

            Op::GOTO => {
                let Some(target) = ins.arg.as_int() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                if target < 0 {
                    return Err(VmError::internal(format!("goto to {target}")));
                }
                self.ctx_mut(task).ins = target as usize;
                Ok(Flow::Goto)
            }

            Op::EXIT => {
                let Some(p) = ins.arg.as_primitive() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                self.set_resval(task, Entity::Primitive(p));
                Ok(Flow::Complete)
            }

            Op::ADD => self.arith_op(task, ins, ok_add).map(|_| Flow::Continue),
            Op::SUB => self.arith_op(task, ins, ok_sub).map(|_| Flow::Continue),
            Op::MULT => self.arith_op(task, ins, ok_mult).map(|_| Flow::Continue),
            Op::DIV => self.arith_op(task, ins, primitive::div).map(|_| Flow::Continue),
            Op::MOD => self
                .arith_op(task, ins, primitive::modulo)
                .map(|_| Flow::Continue),
            Op::AND => self.arith_op(task, ins, primitive::and).map(|_| Flow::Continue),
            Op::OR => self.arith_op(task, ins, primitive::or).map(|_| Flow::Continue),
            Op::XOR => self.arith_op(task, ins, primitive::xor).map(|_| Flow::Continue),

            Op::LT => self.compare_op(task, ins, primitive::lt).map(|_| Flow::Continue),
            Op::GT => self.compare_op(task, ins, primitive::gt).map(|_| Flow::Continue),
            Op::LTE => self
                .compare_op(task, ins, primitive::lte)
                .map(|_| Flow::Continue),
            Op::GTE => self
                .compare_op(task, ins, primitive::gte)
                .map(|_| Flow::Continue),

            Op::EQ | Op::NEQ => {
                if self.execute_eq(task, ins)? {
                    Ok(Flow::Suspend(WaitReason::OnFnCall))
                } else {
                    Ok(Flow::Continue)
                }
            }

            Op::NOT => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                let falsy = !self.resval(task).is_truthy();
                self.set_resval(task, Entity::from_bool(falsy));
                Ok(Flow::Continue)
            }

            Op::NOTC => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                let falsy = !self.resval(task).is_truthy();
                self.set_resval(task, Entity::int(falsy as i32));
                Ok(Flow::Continue)
            }

            Op::INC | Op::DEC | Op::SINC => self.execute_increment(task, ins).map(|_| Flow::Continue),
            Op::FINC | Op::FDEC => self.execute_field_increment(task, ins).map(|_| Flow::Continue),

            Op::IS => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                let rhs = self.process.task_mut(task).pop_stack();
                let lhs = self.process.task_mut(task).pop_stack();
                let rhs_class = rhs.as_object().and_then(|h| {
                    match self.process.heap.get(h).payload {
                        Payload::Class(id) if self.process.heap.get(h).class == self.mm.core().class => {
                            Some(id)
                        }
                        _ => None,
                    }
                });
                let Some(wanted) = rhs_class else {
                    self.raise(
                        task,
                        "Cannot perform type-check against a non-object type.".to_owned(),
                    );
                    return Ok(Flow::Continue);
                };
                let result = match lhs {
                    Entity::Object(h) => {
                        let class = self.process.heap.get(h).class;
                        self.mm.inherits_from(class, wanted)
                    }
                    _ => false,
                };
                self.set_resval(task, Entity::from_bool(result));
                Ok(Flow::Continue)
            }

            Op::ADR => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                let value = self.process.task_mut(task).pop_stack();
                let reflection = value.as_object().map(|h| {
                    let class = self.process.heap.get(h).class;
                    self.mm.class(class).reflection
                });
                self.set_resval(
                    task,
                    reflection.map(Entity::Object).unwrap_or(Entity::Nil),
                );
                Ok(Flow::Continue)
            }

            Op::ANEW => self.execute_anew(task, ins).map(|_| Flow::Continue),
            Op::AIDX => {
                if self.execute_aidx(task, ins)? {
                    Ok(Flow::Suspend(WaitReason::OnFnCall))
                } else {
                    Ok(Flow::Continue)
                }
            }
            Op::ASET => {
                if self.execute_aset(task, ins)? {
                    Ok(Flow::Suspend(WaitReason::OnFnCall))
                } else {
                    Ok(Flow::Continue)
                }
            }

            Op::TUPL => self.execute_tupl(task, ins).map(|_| Flow::Continue),
            Op::TLEN => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                let top = self.process.task(task).peek_stack();
                let length = top
                    .as_object()
                    .and_then(|h| self.process.heap.get(h).as_tuple().map(|t| t.len() as i32));
                self.set_resval(task, Entity::int(length.unwrap_or(-1)));
                Ok(Flow::Continue)
            }
            Op::TGET => self.execute_tget(task, ins).map(|_| Flow::Continue),
            Op::TGTE | Op::TLTE | Op::TEQ => {
                let Some(n) = ins.arg.as_int() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                let length = self
                    .resval(task)
                    .as_object()
                    .and_then(|h| self.process.heap.get(h).as_tuple().map(|t| t.len() as i32));
                let result = match length {
                    None => false,
                    Some(len) => match ins.op {
                        Op::TGTE => len > n,
                        Op::TLTE => len < n,
                        _ => len == n,
                    },
                };
                self.set_resval(task, Entity::from_bool(result));
                Ok(Flow::Continue)
            }

            Op::LMDL => {
                if self.execute_lmdl(task, ins)? {
                    Ok(Flow::Suspend(WaitReason::OnFnCall))
                } else {
                    Ok(Flow::Continue)
                }
            }

            Op::CTCH => {
                let Some(offset) = ins.arg.as_int() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                let ctx = self.ctx_mut(task);
                let target = ctx.ins as i64 + offset as i64 + 1;
                if target < 0 {
                    return Err(VmError::internal(format!("catch target {target}")));
                }
                ctx.catch_ins = Some(target as usize);
                Ok(Flow::Continue)
            }

            Op::RAIS => {
                if !ins.arg.is_none() {
                    return Err(VmError::invalid_operand(ins.op));
                }
                let value = self.resval(task);
                let error = match value {
                    Entity::Object(h) if self.process.heap.get(h).class == self.mm.core().error => h,
                    other => {
                        let message = self.stringify(other);
                        self.make_error(task, message)
                    }
                };
                self.ctx_mut(task).error = Some(error);
                self.set_resval(task, Entity::Object(error));
                Ok(Flow::Continue)
            }

            Op::PRNT => {
                let text = self.stringify(self.resval(task));
                self.output.write(&text);
                self.output.write("\n");
                Ok(Flow::Continue)
            }

            Op::SGET | Op::CNST => {
                let Some(name) = ins.arg.as_id() else {
                    return Err(VmError::invalid_operand(ins.op));
                };
                let module = self.ctx(task).module;
                let value = self
                    .mm
                    .module_member(&self.process.heap, module, name)
                    .or_else(|| {
                        self.mm
                            .module_member(&self.process.heap, self.mm.builtin_module(), name)
                    })
                    .unwrap_or(Entity::Nil);
                self.set_resval(task, value);
                Ok(Flow::Continue)
            }
        }
    }

    // ------------------------------------------------------------------
    // Op bodies too large for the match
    // ------------------------------------------------------------------

    /// Sets the instruction pointer to `ins + 1 + offset`; a zero offset is
    /// a plain step-over.
    fn relative_jump(&mut self, task: TaskId, offset: i32) -> VmResult<()> {
        let ctx = self.ctx_mut(task);
        let target = ctx.ins as i64 + 1 + offset as i64;
        if target < 0 {
            return Err(VmError::internal(format!("jump to {target}")));
        }
        ctx.ins = target as usize;
        Ok(())
    }

    fn write_return_value(&mut self, task: TaskId, value: Entity) {
        if let Some(dependent) = self.process.task(task).dependent_task {
            self.process.task_mut(dependent).resval = value;
        }
    }

    fn execute_increment(&mut self, task: TaskId, ins: &Instruction) -> VmResult<()> {
        let Some(name) = ins.arg.as_id() else {
            return Err(VmError::invalid_operand(ins.op));
        };
        let current = self.lookup(task, name).unwrap_or(Entity::Nil);
        let Entity::Primitive(p) = current else {
            self.raise(task, format!("Cannot increment non-primitive '{name}'."));
            return Ok(());
        };
        let delta = if ins.op == Op::DEC { -1 } else { 1 };
        let updated = primitive::add(p, Primitive::Int(delta));
        self.assign(task, name, Entity::Primitive(updated), false);
        let result = if ins.op == Op::SINC {
            Entity::Primitive(p)
        } else {
            Entity::Primitive(updated)
        };
        self.set_resval(task, result);
        Ok(())
    }

    fn execute_field_increment(&mut self, task: TaskId, ins: &Instruction) -> VmResult<()> {
        let Some(name) = ins.arg.as_id() else {
            return Err(VmError::invalid_operand(ins.op));
        };
        let Entity::Object(obj) = self.resval(task) else {
            self.raise(
                task,
                format!("Attempted to increment field '{name}' on something not an object."),
            );
            return Ok(());
        };
        let Some(Entity::Primitive(p)) = self.process.heap.get(obj).get_member(name) else {
            self.raise(task, format!("Cannot increment non-primitive '{name}'."));
            return Ok(());
        };
        let delta = if ins.op == Op::FDEC { -1 } else { 1 };
        let updated = primitive::add(p, Primitive::Int(delta));
        self.process
            .heap
            .set_member(obj, name, Entity::Primitive(updated));
        self.set_resval(task, Entity::Primitive(updated));
        Ok(())
    }

    fn execute_anew(&mut self, task: TaskId, ins: &Instruction) -> VmResult<()> {
        let array = self
            .process
            .heap
            .new_object(self.mm.core().array, Payload::Array(Vec::new()));
        self.set_resval(task, Entity::Object(array));
        match ins.arg {
            Arg::None => Ok(()),
            Arg::Primitive(Primitive::Int(count)) if count >= 0 => {
                for _ in 0..count {
                    let value = self.process.task_mut(task).pop_stack();
                    self.process.heap.array_add(array, value);
                }
                Ok(())
            }
            _ => Err(VmError::invalid_operand(ins.op)),
        }
    }

    fn execute_tupl(&mut self, task: TaskId, ins: &Instruction) -> VmResult<()> {
        let Some(count) = ins.arg.as_int().filter(|n| *n >= 0) else {
            return Err(VmError::invalid_operand(ins.op));
        };
        let storage = vec![Entity::Nil; count as usize].into_boxed_slice();
        let tuple = self
            .process
            .heap
            .new_object(self.mm.core().tuple, Payload::Tuple(storage));
        self.set_resval(task, Entity::Object(tuple));
        for i in 0..count as usize {
            let value = self.process.task_mut(task).pop_stack();
            self.process.heap.tuple_set(tuple, i, value);
        }
        Ok(())
    }

    fn execute_tget(&mut self, task: TaskId, ins: &Instruction) -> VmResult<()> {
        let Some(index) = ins.arg.as_int() else {
            self.raise(task, "Invalid TGET type.".to_owned());
            return Ok(());
        };
        let resval = self.resval(task);
        let tuple = resval
            .as_object()
            .and_then(|h| self.process.heap.get(h).as_tuple().map(|t| t.to_vec()));
        let Some(items) = tuple else {
            // A non-tuple stands for its own first element.
            if index == 0 && !matches!(resval, Entity::Nil) {
                return Ok(());
            }
            self.raise(task, "Attempted to index something not a tuple.".to_owned());
            return Ok(());
        };
        if index < 0 || index as usize >= items.len() {
            self.raise(
                task,
                format!(
                    "Tuple index out of bounds. Index={index}, Tuple.len={}.",
                    items.len()
                ),
            );
            return Ok(());
        }
        self.set_resval(task, items[index as usize]);
        Ok(())
    }

    fn execute_aidx(&mut self, task: TaskId, ins: &Instruction) -> VmResult<bool> {
        let indexable = self.process.task_mut(task).pop_stack();
        let Entity::Object(obj) = indexable else {
            self.raise(task, "Invalid array index on non-indexable.".to_owned());
            return Ok(false);
        };

        let index = match ins.arg {
            Arg::None => self.resval(task),
            Arg::Id(name) => self.lookup(task, name).unwrap_or(Entity::Nil),
            Arg::Primitive(p) => {
                if !p.is_int() || p.as_int() < 0 {
                    self.raise(task, "Invalid array index.".to_owned());
                    return Ok(false);
                }
                Entity::Primitive(p)
            }
            Arg::Text(_) => return Err(VmError::invalid_operand(ins.op)),
        };

        let core = self.mm.core();
        let class = self.process.heap.get(obj).class;
        if class == core.array || class == core.tuple {
            let Some(i) = as_index(index) else {
                let kind = if class == core.array { "array" } else { "tuple" };
                self.raise(task, format!("Invalid {kind} index."));
                return Ok(false);
            };
            let item = {
                let object = self.process.heap.get(obj);
                let items: &[Entity] = match &object.payload {
                    Payload::Array(v) => v,
                    Payload::Tuple(t) => t,
                    _ => &[],
                };
                items.get(i).copied()
            };
            match item {
                Some(value) => {
                    self.set_resval(task, value);
                }
                None => {
                    let kind = if class == core.array { "array" } else { "tuple" };
                    self.raise(task, format!("Invalid {kind} index."));
                }
            }
            return Ok(false);
        }

        // User-defined index operator.
        if let Some(function) = self.mm.find_method(class, *keywords::INDEX_FN)? {
            self.set_resval(task, index);
            return self.call_function_base(task, function, Entity::Object(obj));
        }
        self.raise(task, "Invalid array index on non-indexable.".to_owned());
        Ok(false)
    }

    fn execute_aset(&mut self, task: TaskId, ins: &Instruction) -> VmResult<bool> {
        if !ins.arg.is_none() {
            return Err(VmError::invalid_operand(ins.op));
        }
        let indexable = self.process.task_mut(task).pop_stack();
        let new_value = self.process.task_mut(task).pop_stack();
        let index = self.resval(task);

        let Entity::Object(obj) = indexable else {
            self.raise(task, "Cannot set index value on non-indexable.".to_owned());
            return Ok(false);
        };
        let Some(Primitive::Int(i)) = index.as_primitive().filter(|p| p.is_int()) else {
            self.raise(task, "Cannot index with non-int.".to_owned());
            return Ok(false);
        };

        let class = self.process.heap.get(obj).class;
        if class == self.mm.core().array {
            if i < 0 {
                self.raise(task, "Invalid array index.".to_owned());
                return Ok(false);
            }
            self.process.heap.array_set(obj, i as usize, new_value);
            return Ok(false);
        }

        if let Some(function) = self.mm.find_method(class, *keywords::SET_FN)? {
            let storage = vec![Entity::Nil; 2].into_boxed_slice();
            let args = self
                .process
                .heap
                .new_object(self.mm.core().tuple, Payload::Tuple(storage));
            self.process.heap.tuple_set(args, 0, index);
            self.process.heap.tuple_set(args, 1, new_value);
            self.set_resval(task, Entity::Object(args));
            return self.call_function_base(task, function, Entity::Object(obj));
        }
        self.raise(task, "Cannot set index value on non-indexable.".to_owned());
        Ok(false)
    }

    fn execute_lmdl(&mut self, task: TaskId, ins: &Instruction) -> VmResult<bool> {
        let Some(name) = ins.arg.as_id() else {
            return Err(VmError::invalid_operand(ins.op));
        };
        let loaded = match self.mm.lookup_or_load(&mut self.process.heap, name) {
            Ok(found) => found,
            Err(error) => {
                self.raise(task, format!("Module '{name}' failed to load: {error}"));
                return Ok(false);
            }
        };
        let Some(module) = loaded else {
            self.raise(task, format!("Module '{name}' not found."));
            return Ok(false);
        };

        let importer = self.ctx(task).module;
        let importer_reflection = self.mm.module(importer).reflection;
        let module_reflection = self.mm.module(module).reflection;
        self.process
            .heap
            .set_member_obj(importer_reflection, name, module_reflection);

        if self.mm.module(module).is_initialized {
            return Ok(false);
        }
        self.mm.module_mut(module).is_initialized = true;
        self.spawn_sub_task(task, Entity::Object(module_reflection), module, 0);
        Ok(true)
    }
}

fn as_index(entity: Entity) -> Option<usize> {
    match entity.as_primitive() {
        Some(Primitive::Int(i)) if i >= 0 => Some(i as usize),
        _ => None,
    }
}

fn ok_add(a: Primitive, b: Primitive) -> PrimitiveResult {
    Ok(primitive::add(a, b))
}

fn ok_sub(a: Primitive, b: Primitive) -> PrimitiveResult {
    Ok(primitive::sub(a, b))
}

fn ok_mult(a: Primitive, b: Primitive) -> PrimitiveResult {
    Ok(primitive::mult(a, b))
}

/// Strips the quotes off a string-literal operand and resolves escapes.
pub(crate) fn unquote(literal: &str) -> String {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Renders an entity for printing. Depth-bounded so cyclic aggregates
/// terminate.
pub(crate) fn stringify(
    mm: &ModuleManager,
    process: &Process,
    entity: Entity,
    depth: usize,
) -> String {
    const MAX_DEPTH: usize = 6;
    match entity {
        Entity::Nil => "Nil".to_owned(),
        Entity::Primitive(p) => p.to_string(),
        Entity::Object(handle) => {
            if depth >= MAX_DEPTH {
                return "...".to_owned();
            }
            let object = process.heap.get(handle);
            match &object.payload {
                Payload::Str(s) => s.clone(),
                Payload::Array(items) => {
                    let rendered: Vec<String> = items
                        .iter()
                        .map(|e| stringify(mm, process, *e, depth + 1))
                        .collect();
                    format!("[{}]", rendered.join(", "))
                }
                Payload::Tuple(items) => {
                    let rendered: Vec<String> = items
                        .iter()
                        .map(|e| stringify(mm, process, *e, depth + 1))
                        .collect();
                    format!("({})", rendered.join(", "))
                }
                Payload::Class(id) => format!("class {}", mm.class(*id).name),
                Payload::Module(id) => format!("module {}", mm.module(*id).name),
                Payload::Function(id) => format!("function {}", mm.function(*id).name),
                Payload::FunctionRef { function, .. } => {
                    format!("function {}", mm.function(*function).name)
                }
                Payload::Task(id) => format!("task {id}"),
                _ => {
                    if object.class == mm.core().error {
                        let msg = object
                            .get_member(Symbol::intern("msg"))
                            .map(|m| stringify(mm, process, m, depth + 1))
                            .unwrap_or_default();
                        format!("Error: {msg}")
                    } else {
                        format!("{}@{}", mm.class(object.class).name, handle.index())
                    }
                }
            }
        }
    }
}
