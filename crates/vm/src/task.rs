//! Tasks.

use jv_core::{Entity, ObjHandle};

use crate::context::Context;

/// Index of a task within its process.
pub type TaskId = usize;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created but never scheduled
    Created,
    /// Currently executing
    Running,
    /// Suspended until a child task finishes
    Waiting,
    /// Finished normally
    Complete,
    /// Finished with an uncaught error
    Error,
}

/// Why a task is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitReason {
    /// Not waiting
    #[default]
    NotWaiting,
    /// Suspended on a spawned function call
    OnFnCall,
}

/// A unit of execution: a stack of call frames, one operand stack, and the
/// resval register. `dependent_task` is resumed when this task completes or
/// errors.
#[derive(Debug)]
pub struct Task {
    /// The call-frame stack; the last entry is executing
    pub contexts: Vec<Context>,
    /// The operand stack
    pub stack: Vec<Entity>,
    /// The result register
    pub resval: Entity,
    /// Task to resume when this one finishes
    pub dependent_task: Option<TaskId>,
    /// Lifecycle state
    pub state: TaskState,
    /// Why the task is waiting, when it is
    pub wait_reason: WaitReason,
    /// Set when a child task errored; resval then holds the Error object
    pub child_task_has_error: bool,
    /// The user-visible reflection object; also the anchor the collector
    /// bumps live references from during a collection
    pub reflection: ObjHandle,
}

impl Task {
    /// Creates an empty task.
    pub fn new(reflection: ObjHandle) -> Self {
        Task {
            contexts: Vec::new(),
            stack: Vec::new(),
            resval: Entity::Nil,
            dependent_task: None,
            state: TaskState::Created,
            wait_reason: WaitReason::NotWaiting,
            child_task_has_error: false,
            reflection,
        }
    }

    /// Pops the operand stack; an empty stack yields nil.
    pub fn pop_stack(&mut self) -> Entity {
        self.stack.pop().unwrap_or(Entity::Nil)
    }

    /// Reads the top of the operand stack; an empty stack yields nil.
    pub fn peek_stack(&self) -> Entity {
        self.stack.last().copied().unwrap_or(Entity::Nil)
    }

    /// Pushes onto the operand stack.
    pub fn push_stack(&mut self, value: Entity) {
        self.stack.push(value);
    }

    /// The executing frame.
    pub fn current_context(&self) -> Option<&Context> {
        self.contexts.last()
    }

    /// The executing frame, mutably.
    pub fn current_context_mut(&mut self) -> Option<&mut Context> {
        self.contexts.last_mut()
    }
}
