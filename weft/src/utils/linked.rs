use std::fmt;
use std::iter::FusedIterator;
use std::ptr::NonNull;

/// Walks an intrusive singly-linked list from `head` towards its end.
///
/// The successor of a node is obtained through `parent_of` instead of a fixed
/// field, so heterogeneous node kinds sharing a common header can live in one
/// list.
pub struct LinkedIter<T, F> {
    next: Option<NonNull<T>>,
    parent_of: F,
}

impl<T, F> LinkedIter<T, F>
where
    F: FnMut(NonNull<T>) -> Option<NonNull<T>>,
{
    pub(crate) fn new(head: Option<NonNull<T>>, parent_of: F) -> Self {
        LinkedIter {
            next: head,
            parent_of,
        }
    }
}

impl<T, F> Iterator for LinkedIter<T, F>
where
    F: FnMut(NonNull<T>) -> Option<NonNull<T>>,
{
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let curr = self.next?;
        self.next = (self.parent_of)(curr);
        Some(curr)
    }
}

impl<T, F> FusedIterator for LinkedIter<T, F> where F: FnMut(NonNull<T>) -> Option<NonNull<T>> {}

impl<T, F> fmt::Debug for LinkedIter<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedIter")
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}
