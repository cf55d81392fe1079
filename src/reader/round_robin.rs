/// Fixed set of items with a rotating pointer.
///
/// The pointer only moves on [`RoundRobin::rotate`], so callers decide when
/// to stay on the current item and when to move on.
#[derive(Debug)]
pub struct RoundRobin<T> {
    items: Vec<T>,
    pointer: usize,
}

impl<T> RoundRobin<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, pointer: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Item at the pointer, or `None` when empty.
    pub fn current(&self) -> Option<&T> {
        self.items.get(self.pointer)
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        self.items.get_mut(self.pointer)
    }

    /// Move the pointer to the next item, wrapping at the end.
    pub fn rotate(&mut self) {
        if !self.items.is_empty() {
            self.pointer = (self.pointer + 1) % self.items.len();
        }
    }

    /// Items in their fixed order, independent of the pointer.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }
}
