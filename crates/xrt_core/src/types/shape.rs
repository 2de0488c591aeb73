use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Static, row-major tensor shape. Rank 0 is a scalar.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: SmallVec<[usize; 6]>,
}

impl Shape {
    /// Creates a new shape from a slice of dimensions.
    #[inline]
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Creates a scalar shape (0 dimensions).
    #[inline]
    pub fn scalar() -> Self {
        Self { dims: SmallVec::new() }
    }

    /// Returns the dimensions as a slice.
    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.to_vec()
    }

    /// Returns the number of dimensions (rank).
    #[inline]
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Row-major strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.ndim()];
        for i in (0..self.ndim().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Checks if this shape can be broadcast to the target shape (numpy rules).
    pub fn can_broadcast_to(&self, target: &Shape) -> bool {
        if self.ndim() > target.ndim() {
            return false;
        }

        let offset = target.ndim() - self.ndim();
        self.dims
            .iter()
            .enumerate()
            .all(|(i, &dim)| dim == 1 || dim == target.dims[i + offset])
    }

    /// Computes the broadcast shape between two shapes.
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> Option<Shape> {
        let ndim = lhs.ndim().max(rhs.ndim());
        let mut dims = SmallVec::with_capacity(ndim);

        for i in 0..ndim {
            // Align from the right; missing leading dims act as 1.
            let l = (i + lhs.ndim()).checked_sub(ndim).map_or(1, |j| lhs.dims[j]);
            let r = (i + rhs.ndim()).checked_sub(ndim).map_or(1, |j| rhs.dims[j]);

            if l != r && l != 1 && r != 1 {
                return None;
            }
            dims.push(l.max(r));
        }

        Some(Shape { dims })
    }

    /// Shape with the given axes removed.
    pub fn without_axes(&self, axes: &[usize]) -> Shape {
        let dims = self
            .dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect();
        Shape { dims }
    }

    /// Shape with the given axes set to 1.
    pub fn with_unit_axes(&self, axes: &[usize]) -> Shape {
        let dims = self
            .dims
            .iter()
            .enumerate()
            .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
            .collect();
        Shape { dims }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self {
            dims: SmallVec::from_vec(dims),
        }
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims)
    }
}

impl From<&Shape> for Shape {
    fn from(shape: &Shape) -> Self {
        shape.clone()
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(&dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shape_right_aligned() {
        let a = Shape::from([2, 3]);
        let b = Shape::from([3]);
        assert_eq!(Shape::broadcast_shape(&a, &b), Some(Shape::from([2, 3])));

        let s = Shape::scalar();
        assert_eq!(Shape::broadcast_shape(&s, &a), Some(a.clone()));

        let c = Shape::from([4, 1]);
        let d = Shape::from([1, 5]);
        assert_eq!(Shape::broadcast_shape(&c, &d), Some(Shape::from([4, 5])));

        assert_eq!(Shape::broadcast_shape(&a, &Shape::from([4])), None);
    }

    #[test]
    fn test_strides() {
        assert_eq!(Shape::from([2, 3, 4]).strides(), vec![12, 4, 1]);
        assert!(Shape::scalar().strides().is_empty());
    }

    #[test]
    fn test_can_broadcast_to() {
        assert!(Shape::from([1, 3]).can_broadcast_to(&Shape::from([2, 3])));
        assert!(Shape::scalar().can_broadcast_to(&Shape::from([2, 3])));
        assert!(!Shape::from([2, 3]).can_broadcast_to(&Shape::from([3])));
    }
}
