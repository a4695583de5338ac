//! Processes.
//!
//! A process is a scheduling domain: one heap, a FIFO ready queue, a waiting
//! set and a completed set of tasks. Scheduling is cooperative and
//! single-threaded within a process; isolation between processes is by
//! ownership, so only the owning process ever touches its heap.

use std::collections::VecDeque;

use hashbrown::HashSet;

use jv_core::{Entity, Symbol};

use crate::class::ClassId;
use crate::context::Context;
use crate::heap::Heap;
use crate::module::ModuleId;
use crate::object::Payload;
use crate::task::{Task, TaskId};

/// A scheduling domain with one heap and one ready queue.
#[derive(Debug)]
pub struct Process {
    /// The object heap owned by this process
    pub heap: Heap,
    /// All tasks ever created in this process, addressed by id
    pub tasks: Vec<Task>,
    /// FIFO ready queue
    pub queued_tasks: VecDeque<TaskId>,
    /// Tasks suspended on a child
    pub waiting_tasks: HashSet<TaskId>,
    /// Finished tasks not yet retired
    pub completed_tasks: HashSet<TaskId>,
    /// The task currently executing, while one is
    pub current_task: Option<TaskId>,
    task_class: ClassId,
    object_class: ClassId,
}

impl Process {
    /// Creates a process with an empty heap. The class ids anchor task
    /// reflections and local-scope member objects.
    pub fn new(task_class: ClassId, object_class: ClassId) -> Self {
        Process {
            heap: Heap::new(),
            tasks: Vec::new(),
            queued_tasks: VecDeque::new(),
            waiting_tasks: HashSet::new(),
            completed_tasks: HashSet::new(),
            current_task: None,
            task_class,
            object_class,
        }
    }

    /// Returns a task by id.
    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id]
    }

    /// Returns a task by id, mutably.
    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id]
    }

    /// Creates a task and enqueues it. The task's reflection object is a
    /// heap root until the task is retired.
    pub fn create_task(&mut self) -> TaskId {
        let id = self.tasks.len();
        let reflection = self
            .heap
            .new_object(self.task_class, Payload::Task(id));
        self.heap.make_root(reflection);
        self.tasks.push(Task::new(reflection));
        self.queued_tasks.push_back(id);
        id
    }

    /// Pushes a call frame onto a task, allocating its locals object.
    pub fn create_context(
        &mut self,
        task: TaskId,
        self_entity: Entity,
        module: ModuleId,
        ins: usize,
    ) -> &mut Context {
        let member_obj = self.heap.new_object(self.object_class, Payload::None);
        let contexts = &mut self.tasks[task].contexts;
        contexts.push(Context::new(module, self_entity, member_obj, ins));
        contexts.last_mut().expect("just pushed")
    }

    /// Pops a task's top frame, carrying the instruction pointer into the
    /// frame below. Returns false when no frame remains.
    pub fn back_context(&mut self, task: TaskId) -> bool {
        let contexts = &mut self.tasks[task].contexts;
        let Some(popped) = contexts.pop() else {
            return false;
        };
        if let Some(previous) = contexts.last_mut() {
            previous.ins = popped.ins;
            true
        } else {
            false
        }
    }

    /// Retires a completed or errored task once its dependent has been
    /// resumed: drops it from the completed set and releases its reflection
    /// root so its garbage becomes collectable.
    pub fn retire_task(&mut self, id: TaskId) {
        if self.completed_tasks.remove(&id) {
            let reflection = self.tasks[id].reflection;
            self.heap.clear_root(reflection);
        }
    }

    /// Runs a collection with every live task's reachable objects pinned.
    ///
    /// Tasks do not maintain graph edges for their operand stacks, resvals
    /// or frames during normal execution; a collection may only happen here,
    /// where each live task's references are bumped from its reflection
    /// object for the duration. Single-threaded scheduling means no task is
    /// mutating the heap concurrently.
    pub fn collect_garbage(&mut self) -> u32 {
        let live: Vec<TaskId> = self.live_task_ids();
        for id in &live {
            self.bump_task_refs(*id, true);
        }
        let freed = self.heap.collect_garbage();
        for id in &live {
            self.bump_task_refs(*id, false);
        }
        freed
    }

    fn live_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = Vec::new();
        if let Some(current) = self.current_task {
            ids.push(current);
        }
        ids.extend(self.queued_tasks.iter().copied());
        ids.extend(self.waiting_tasks.iter().copied());
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn bump_task_refs(&mut self, id: TaskId, add: bool) {
        let reflection = self.tasks[id].reflection;
        let mut touch = |heap: &mut Heap, entity: Entity| {
            if let Entity::Object(obj) = entity {
                if add {
                    heap.inc_edge(reflection, obj);
                } else {
                    heap.dec_edge(reflection, obj);
                }
            }
        };

        let stack: Vec<Entity> = self.tasks[id].stack.clone();
        for entity in stack {
            touch(&mut self.heap, entity);
        }
        let resval = self.tasks[id].resval;
        touch(&mut self.heap, resval);

        let frames: Vec<(Entity, jv_core::ObjHandle, Option<jv_core::ObjHandle>)> = self.tasks
            [id]
            .contexts
            .iter()
            .map(|c| (c.self_entity, c.member_obj, c.error))
            .collect();
        for (self_entity, member_obj, error) in frames {
            touch(&mut self.heap, self_entity);
            touch(&mut self.heap, Entity::Object(member_obj));
            if let Some(err) = error {
                touch(&mut self.heap, Entity::Object(err));
            }
        }
    }

    /// Looks up a name in the frame chain of a task: innermost locals
    /// first, walking outward.
    pub fn lookup_local(&self, task: TaskId, name: Symbol) -> Option<Entity> {
        for context in self.tasks[task].contexts.iter().rev() {
            if let Some(value) = self.heap.get(context.member_obj).get_member(name) {
                return Some(value);
            }
        }
        None
    }
}
