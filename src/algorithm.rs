mod find;
mod minmax;

pub use find::{make_find_if_not_task, make_find_if_task};
pub use minmax::{make_max_element_task, make_min_element_task};

/// A shared random-access view over the elements a parallel algorithm
/// iterates.
///
/// Cloning is cheap; every spawned sub-task holds its own clone, so the
/// elements stay alive until the last sub-task releases its share of the
/// algorithm state.
#[derive(Debug)]
pub struct RangeView<T> {
    data: std::sync::Arc<[T]>,
}

impl<T> Clone for RangeView<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<T> RangeView<T> {
    pub fn new(data: impl Into<std::sync::Arc<[T]>>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T> From<Vec<T>> for RangeView<T> {
    fn from(data: Vec<T>) -> Self {
        Self::new(data)
    }
}

impl<T: Clone> From<&[T]> for RangeView<T> {
    fn from(data: &[T]) -> Self {
        Self { data: data.into() }
    }
}
