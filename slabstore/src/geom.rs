/// An n-dimensional box of element addresses, `start` inclusive and `end` exclusive on every
/// axis.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub start: Vec<u64>,
    pub end: Vec<u64>,
}

impl Bounds {
    pub(crate) fn new(start: Vec<u64>, end: Vec<u64>) -> Self {
        debug_assert_eq!(start.len(), end.len());
        Self { start, end }
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    /// Whether `other` lies entirely inside these bounds.
    ///
    pub fn contains(&self, other: &Bounds) -> bool {
        self.rank() == other.rank()
            && (0..self.rank())
                .all(|i| self.start[i] <= other.start[i] && other.end[i] <= self.end[i])
    }

    /// The overlap of two boxes, if they have one.
    ///
    pub fn intersect(&self, other: &Bounds) -> Option<Bounds> {
        if self.rank() != other.rank() {
            return None;
        }

        let mut start = Vec::with_capacity(self.rank());
        let mut end = Vec::with_capacity(self.rank());
        for i in 0..self.rank() {
            let lo = self.start[i].max(other.start[i]);
            let hi = self.end[i].min(other.end[i]);
            if lo >= hi {
                return None;
            }
            start.push(lo);
            end.push(hi);
        }

        Some(Bounds::new(start, end))
    }

    /// Iterate over the first address of every contiguous row (run along the last axis), in
    /// row-major order.
    ///
    pub fn rows(&self) -> RowIter {
        RowIter {
            current: if self.rank() == 0 {
                None
            } else {
                Some(self.start.clone())
            },
            start: self.start.clone(),
            end: self.end.clone(),
        }
    }

    /// Row-major offset, in elements, of `address` relative to the origin of these bounds.
    ///
    fn linear_index(&self, address: &[u64]) -> usize {
        let mut index = 0_usize;
        for i in 0..self.rank() {
            let len = (self.end[i] - self.start[i]) as usize;
            index = index * len + (address[i] - self.start[i]) as usize;
        }

        index
    }
}

pub struct RowIter {
    current: Option<Vec<u64>>,
    start: Vec<u64>,
    end: Vec<u64>,
}

impl Iterator for RowIter {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.current.take()?;

        // Advance an odometer over every axis but the last
        let mut next = row.clone();
        let mut axis = next.len() - 1;
        while axis > 0 {
            axis -= 1;
            next[axis] += 1;
            if next[axis] < self.end[axis] {
                self.current = Some(next);
                break;
            }
            next[axis] = self.start[axis];
        }

        Some(row)
    }
}

/// Copy the elements of `overlap` from a buffer laid out over `src_bounds` into a buffer laid
/// out over `dst_bounds`.
///
/// `overlap` must lie inside both `src_bounds` and `dst_bounds`.
///
pub(crate) fn copy_overlap(
    overlap: &Bounds,
    src_bounds: &Bounds,
    src: &[u8],
    dst_bounds: &Bounds,
    dst: &mut [u8],
    element_size: usize,
) {
    let last = overlap.rank() - 1;
    let run = (overlap.end[last] - overlap.start[last]) as usize * element_size;
    for row in overlap.rows() {
        let from = src_bounds.linear_index(&row) * element_size;
        let to = dst_bounds.linear_index(&row) * element_size;
        dst[to..to + run].copy_from_slice(&src[from..from + run]);
    }
}
