use crate::task::TaskRef;
use std::cell::Cell;
use std::fmt;

/// Links a child task to its parent and to its next sibling.
///
/// Present exactly on tasks created with
/// [`TaskFlags::IS_CHILD_TASK`](crate::job::TaskFlags::IS_CHILD_TASK). The
/// parent is fixed at creation; the sibling link is only rewritten by
/// [`ChildTaskStatusRecord::add_child`](crate::task::ChildTaskStatusRecord::add_child).
pub struct ChildFragment {
    parent: TaskRef,
    next_child: Cell<Option<TaskRef>>,
}

impl ChildFragment {
    pub(crate) fn new(parent: TaskRef) -> ChildFragment {
        ChildFragment {
            parent,
            next_child: Cell::new(None),
        }
    }

    pub fn parent(&self) -> TaskRef {
        self.parent
    }

    pub fn next_child(&self) -> Option<TaskRef> {
        self.next_child.get()
    }

    pub(crate) fn set_next_child(&self, next: Option<TaskRef>) {
        self.next_child.set(next);
    }
}

impl fmt::Debug for ChildFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildFragment")
            .field("parent", &self.parent)
            .field("next_child", &self.next_child.get())
            .finish()
    }
}
