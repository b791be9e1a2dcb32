// column.rs - Type-erased component column
//
// One contiguous, properly aligned allocation per component per table.
// Growth doubles capacity; removal is swap-remove so rows stay dense.

use crate::ecs::component::TypeInfo;
use crate::ecs::error::ComponentError;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

/// Dense, untyped storage for a single component type.
///
/// Values are constructed, moved, copied and destroyed only through the
/// hooks of the column's [`TypeInfo`].
pub struct Column {
    info: Arc<TypeInfo>,
    data: NonNull<u8>,
    len: usize,
    capacity: usize,
}

// SAFETY: a column owns its values. Rust components are Send + Sync by the
// `Component` bound; runtime components are registered as plain data.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create a column for a non-tag component.
    pub fn new(info: Arc<TypeInfo>, capacity: usize) -> Self {
        debug_assert!(!info.is_tag(), "tags have no column");
        let mut column = Self {
            data: dangling(info.align),
            info,
            len: 0,
            capacity: 0,
        };
        if capacity > 0 {
            column.reserve_exact(capacity);
        }
        column
    }

    #[inline]
    pub fn info(&self) -> &Arc<TypeInfo> {
        &self.info
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn layout(&self, capacity: usize) -> Layout {
        let bytes = self
            .info
            .size
            .checked_mul(capacity)
            .expect("column capacity overflow");
        Layout::from_size_align(bytes, self.info.align).expect("invalid column layout")
    }

    fn reserve_exact(&mut self, new_capacity: usize) {
        if new_capacity <= self.capacity {
            return;
        }
        let new_layout = self.layout(new_capacity);
        // SAFETY: size > 0 for non-tag columns, so the layouts are non-zero.
        let ptr = unsafe {
            if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                alloc::realloc(self.data.as_ptr(), self.layout(self.capacity), new_layout.size())
            }
        };
        self.data = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(new_layout));
        self.capacity = new_capacity;
    }

    /// Make room for at least `additional` more rows (amortized doubling).
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.len + additional;
        if needed > self.capacity {
            self.reserve_exact(needed.max(self.capacity * 2).max(4));
        }
    }

    #[inline]
    pub fn ptr(&self, row: usize) -> *const u8 {
        debug_assert!(row < self.len);
        // SAFETY: row is in bounds of the allocation.
        unsafe { self.data.as_ptr().add(row * self.info.size) }
    }

    #[inline]
    pub fn ptr_mut(&mut self, row: usize) -> *mut u8 {
        debug_assert!(row < self.len);
        // SAFETY: row is in bounds of the allocation.
        unsafe { self.data.as_ptr().add(row * self.info.size) }
    }

    /// Append an uninitialized row and return a pointer to it.
    ///
    /// # Safety
    /// The caller must initialize the row before it is read or dropped.
    unsafe fn push_uninit(&mut self) -> *mut u8 {
        self.reserve(1);
        let row = self.len;
        self.len += 1;
        // SAFETY: reserve guaranteed space for `row`.
        unsafe { self.data.as_ptr().add(row * self.info.size) }
    }

    /// Append a default-constructed value (ctor hook or zero fill).
    pub fn push_default(&mut self) {
        // SAFETY: the row is immediately constructed.
        unsafe {
            let dst = self.push_uninit();
            self.info.construct(dst);
        }
    }

    /// Append a value moved out of `src`.
    ///
    /// # Safety
    /// `src` must point at an initialized value of this column's type; it is
    /// logically uninitialized afterwards.
    pub unsafe fn push_moved(&mut self, src: *mut u8) {
        unsafe {
            let dst = self.push_uninit();
            self.info.move_into(dst, src);
        }
    }

    /// Append a copy of `src`.
    ///
    /// # Safety
    /// `src` must point at an initialized value of this column's type.
    pub unsafe fn push_copied(&mut self, src: *const u8) -> Result<(), ComponentError> {
        unsafe {
            let dst = self.push_uninit();
            if let Err(err) = self.info.copy_into(dst, src) {
                self.len -= 1;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Replace the value at `row` with one moved out of `src`.
    ///
    /// # Safety
    /// Same contract as [`Column::push_moved`].
    pub unsafe fn replace_moved(&mut self, row: usize, src: *mut u8) {
        let dst = self.ptr_mut(row);
        unsafe {
            self.info.destruct(dst);
            self.info.move_into(dst, src);
        }
    }

    /// Destroy the value at `row` and fill the hole with the last row.
    pub fn swap_remove(&mut self, row: usize) {
        let ptr = self.ptr_mut(row);
        // SAFETY: row is initialized; it is overwritten below.
        unsafe { self.info.destruct(ptr) };
        self.swap_remove_forget(row);
    }

    /// Fill `row` with the last row without destroying it. Used after the
    /// value at `row` has been moved elsewhere.
    pub fn swap_remove_forget(&mut self, row: usize) {
        debug_assert!(row < self.len);
        let last = self.len - 1;
        if row != last {
            let src = self.ptr_mut(last);
            let dst = self.ptr_mut(row);
            // SAFETY: distinct rows never overlap; dst holds no live value.
            unsafe { self.info.move_into(dst, src) };
        }
        self.len -= 1;
    }

    /// Destroy every value, keeping the allocation.
    pub fn clear(&mut self) {
        if self.info.hooks.dtor.is_some() {
            for row in 0..self.len {
                let ptr = self.ptr_mut(row);
                // SAFETY: every row below len is initialized.
                unsafe { self.info.destruct(ptr) };
            }
        }
        self.len = 0;
    }

    /// Typed view. The caller must have checked the column's type.
    pub(crate) fn as_slice<T>(&self) -> &[T] {
        debug_assert_eq!(std::mem::size_of::<T>(), self.info.size);
        // SAFETY: the data is aligned for T and holds `len` initialized values.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr() as *const T, self.len) }
    }

    /// Typed mutable view. The caller must have checked the column's type.
    pub(crate) fn as_slice_mut<T>(&mut self) -> &mut [T] {
        debug_assert_eq!(std::mem::size_of::<T>(), self.info.size);
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr() as *mut T, self.len) }
    }

    /// Base of the data allocation. Views built from it must respect the
    /// borrow rules of whoever owns the column.
    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Overwrite the value at `row` with raw bytes.
    pub(crate) fn write_bytes(&mut self, row: usize, bytes: &[u8]) -> Result<(), ComponentError> {
        if bytes.len() != self.info.size {
            return Err(ComponentError::SizeMismatch {
                expected: self.info.size,
                actual: bytes.len(),
            });
        }
        let dst = self.ptr_mut(row);
        // SAFETY: row is initialized and exactly `size` bytes long.
        unsafe {
            self.info.destruct(dst);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        Ok(())
    }

    /// Raw bytes of one row.
    pub fn row_bytes(&self, row: usize) -> &[u8] {
        // SAFETY: row is in bounds and initialized.
        unsafe { std::slice::from_raw_parts(self.ptr(row), self.info.size) }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear();
        if self.capacity > 0 {
            // SAFETY: allocated with this exact layout.
            unsafe { alloc::dealloc(self.data.as_ptr(), self.layout(self.capacity)) };
        }
    }
}

fn dangling(align: usize) -> NonNull<u8> {
    // An aligned, non-null address that is never dereferenced.
    NonNull::new(align as *mut u8).unwrap_or(NonNull::dangling())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_component;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Label(String);
    define_component!(Label);

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    #[repr(align(16))]
    struct Wide {
        v: [f32; 4],
    }
    define_component!(Wide);

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default, Clone)]
    struct Counted;
    impl Drop for Counted {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }
    // Not zero-sized: a u8 keeps it out of the tag path.
    #[derive(Default, Clone)]
    struct CountedBox {
        _c: Counted,
        _pad: u8,
    }
    define_component!(CountedBox);

    fn label_column() -> Column {
        Column::new(Arc::new(TypeInfo::of::<Label>()), 0)
    }

    #[test]
    fn grows_and_keeps_values() {
        let mut col = label_column();
        for i in 0..100 {
            let mut value = std::mem::ManuallyDrop::new(Label(format!("v{i}")));
            unsafe { col.push_moved(&mut *value as *mut Label as *mut u8) };
        }
        assert_eq!(col.len(), 100);
        assert!(col.capacity() >= 100);
        assert_eq!(col.as_slice::<Label>()[42], Label("v42".into()));
    }

    #[test]
    fn swap_remove_moves_last_row() {
        let mut col = label_column();
        for name in ["a", "b", "c"] {
            let mut value = std::mem::ManuallyDrop::new(Label(name.into()));
            unsafe { col.push_moved(&mut *value as *mut Label as *mut u8) };
        }
        col.swap_remove(0);
        assert_eq!(col.as_slice::<Label>(), &[Label("c".into()), Label("b".into())]);
        col.swap_remove(1);
        assert_eq!(col.as_slice::<Label>(), &[Label("c".into())]);
    }

    #[test]
    fn respects_alignment() {
        let mut col = Column::new(Arc::new(TypeInfo::of::<Wide>()), 1);
        col.push_default();
        col.push_default();
        assert_eq!(col.ptr(1) as usize % 16, 0);
        col.as_slice_mut::<Wide>()[1].v[3] = 2.0;
        assert_eq!(col.as_slice::<Wide>()[1].v, [0.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn drop_runs_destructors() {
        DROPS.store(0, Ordering::SeqCst);
        {
            let mut col = Column::new(Arc::new(TypeInfo::of::<CountedBox>()), 0);
            col.push_default();
            col.push_default();
            col.push_default();
            col.swap_remove(1);
            assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 3);
    }
}
