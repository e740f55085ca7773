use crate::component::Component;

/// Physical value storage behind a [`DenseStore`](super::DenseStore).
///
/// The buffer only manages raw slots; the store layers the logical count,
/// the id column and the sparse index on top. Two implementations share this
/// contract and a store picks one at construction, so mixing strategies
/// within a store is impossible by shape.
pub(crate) trait ComponentBuffer<T: Component> {
    /// Number of physically occupied slots (may exceed the store's logical
    /// count while removed values are parked at the tail).
    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    /// Append a value at the physical end.
    fn push(&mut self, value: T);

    /// Overwrite an occupied slot.
    fn set(&mut self, index: usize, value: T);

    /// Swap two occupied slots.
    fn swap(&mut self, a: usize, b: usize);

    /// Move a value out by swapping it with the physical last slot and
    /// shrinking by one.
    fn take_at(&mut self, index: usize) -> T;

    fn get(&self, index: usize) -> &T;

    fn get_mut(&mut self, index: usize) -> &mut T;

    fn as_slice(&self) -> &[T];

    fn as_mut_slice(&mut self) -> &mut [T];

    fn reserve(&mut self, additional: usize);

    /// Drop slots past `len`, keeping capacity.
    fn truncate(&mut self, len: usize);

    /// Drop everything, keeping capacity.
    fn clear(&mut self);

    /// Append every value onto `dst` in order, leaving this buffer empty
    /// with capacity intact.
    fn move_all(&mut self, dst: &mut dyn ComponentBuffer<T>);

    /// Fresh empty buffer of the same strategy.
    fn boxed_empty(&self) -> Box<dyn ComponentBuffer<T>>;
}

/// Vec-backed strategy for payloads the host runtime tracks: owned heap
/// data, drop glue, anything `'static`.
pub(crate) struct TrackedBuffer<T> {
    values: Vec<T>,
}

impl<T> TrackedBuffer<T> {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T: Component> ComponentBuffer<T> for TrackedBuffer<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn capacity(&self) -> usize {
        self.values.capacity()
    }

    fn push(&mut self, value: T) {
        self.values.push(value);
    }

    fn set(&mut self, index: usize, value: T) {
        if index == self.values.len() {
            self.values.push(value);
        } else {
            self.values[index] = value;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.values.swap(a, b);
    }

    fn take_at(&mut self, index: usize) -> T {
        self.values.swap_remove(index)
    }

    fn get(&self, index: usize) -> &T {
        &self.values[index]
    }

    fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self.values[index]
    }

    fn as_slice(&self) -> &[T] {
        &self.values
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }

    fn reserve(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    fn move_all(&mut self, dst: &mut dyn ComponentBuffer<T>) {
        for value in self.values.drain(..) {
            dst.push(value);
        }
    }

    fn boxed_empty(&self) -> Box<dyn ComponentBuffer<T>> {
        Box::new(TrackedBuffer::<T>::new())
    }
}

/// Contiguous typed storage for plain fixed-layout payloads.
///
/// The `Pod` bound restricts this strategy to copyable bytes with no drop
/// glue, so every move is a plain copy and truncation is a length
/// adjustment. The backing vector carries `T`'s own alignment, over-aligned
/// payloads included.
pub(crate) struct RawBuffer<T> {
    values: Vec<T>,
}

impl<T: bytemuck::Pod> RawBuffer<T> {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T: Component + bytemuck::Pod> ComponentBuffer<T> for RawBuffer<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn capacity(&self) -> usize {
        self.values.capacity()
    }

    fn push(&mut self, value: T) {
        self.values.push(value);
    }

    fn set(&mut self, index: usize, value: T) {
        if index == self.values.len() {
            self.values.push(value);
        } else {
            self.values[index] = value;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.values.swap(a, b);
    }

    fn take_at(&mut self, index: usize) -> T {
        self.values.swap_remove(index)
    }

    fn get(&self, index: usize) -> &T {
        &self.values[index]
    }

    fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self.values[index]
    }

    fn as_slice(&self) -> &[T] {
        &self.values
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }

    fn reserve(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    fn move_all(&mut self, dst: &mut dyn ComponentBuffer<T>) {
        dst.reserve(self.values.len());
        for &value in &self.values {
            dst.push(value);
        }
        self.values.clear();
    }

    fn boxed_empty(&self) -> Box<dyn ComponentBuffer<T>> {
        Box::new(RawBuffer::<T>::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Cell(u64);
    impl Component for Cell {}

    #[derive(Debug, Clone, PartialEq)]
    struct Label(String);
    impl Component for Label {}

    #[derive(Debug, Copy, Clone, PartialEq)]
    #[repr(C, align(32))]
    struct WideCell {
        lanes: [f32; 8],
    }
    // 32 bytes of lanes exactly fill the declared alignment, leaving no padding
    unsafe impl bytemuck::Zeroable for WideCell {}
    unsafe impl bytemuck::Pod for WideCell {}
    impl Component for WideCell {}

    fn wide(seed: f32) -> WideCell {
        WideCell { lanes: [seed; 8] }
    }

    fn exercise<B: ComponentBuffer<Cell>>(mut buf: B) {
        buf.push(Cell(10));
        buf.push(Cell(20));
        buf.push(Cell(30));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.as_slice(), &[Cell(10), Cell(20), Cell(30)]);

        buf.swap(0, 2);
        assert_eq!(buf.get(0), &Cell(30));

        buf.set(1, Cell(21));
        assert_eq!(buf.take_at(0).0, 30);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.get(0), &Cell(10));

        buf.truncate(1);
        assert_eq!(buf.as_slice(), &[Cell(10)]);

        buf.clear();
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn tracked_buffer_contract() {
        exercise(TrackedBuffer::<Cell>::new());
    }

    #[test]
    fn raw_buffer_contract() {
        exercise(RawBuffer::<Cell>::new());
    }

    #[test]
    fn tracked_buffer_moves_owned_values() {
        let mut buf = TrackedBuffer::<Label>::new();
        buf.push(Label("alpha".into()));
        buf.push(Label("beta".into()));
        let taken = buf.take_at(0);
        assert_eq!(taken.0, "alpha");
        assert_eq!(buf.get(0), &Label("beta".into()));
    }

    #[test]
    fn raw_buffer_holds_over_aligned_payloads() {
        let mut buf = RawBuffer::<WideCell>::new();
        buf.push(wide(1.0));
        buf.push(wide(2.0));
        buf.push(wide(3.0));
        assert_eq!(
            buf.as_slice().as_ptr() as usize % std::mem::align_of::<WideCell>(),
            0
        );

        buf.swap(0, 2);
        buf.set(1, wide(4.0));
        assert_eq!(buf.as_slice(), &[wide(3.0), wide(4.0), wide(1.0)]);
        assert_eq!(buf.take_at(0), wide(3.0));
        assert_eq!(buf.as_slice(), &[wide(1.0), wide(4.0)]);
    }

    #[test]
    fn set_at_physical_end_appends() {
        let mut buf = RawBuffer::<Cell>::new();
        buf.set(0, Cell(1));
        buf.set(1, Cell(2));
        assert_eq!(buf.as_slice(), &[Cell(1), Cell(2)]);
    }

    #[test]
    fn move_all_preserves_order_and_empties_source() {
        let mut src = RawBuffer::<Cell>::new();
        let mut dst = RawBuffer::<Cell>::new();
        src.push(Cell(1));
        src.push(Cell(2));
        dst.push(Cell(0));
        src.move_all(&mut dst);
        assert_eq!(dst.as_slice(), &[Cell(0), Cell(1), Cell(2)]);
        assert_eq!(src.len(), 0);
    }
}
