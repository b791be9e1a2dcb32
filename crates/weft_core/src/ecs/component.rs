// component.rs - Runtime component registration
//
// Components are identified by entity ids, not Rust TypeIds. This lets
// runtime-defined components (registered by layout) coexist with Rust
// components. Registration is per world; there is no global registry.

use crate::ecs::error::ComponentError;
use crate::ecs::{EntityIdx, Id, WILDCARD_INDEX};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::mem::{align_of, needs_drop, size_of};
use std::sync::Arc;

/// Construct a value in place at `dst`.
pub type CtorHook = unsafe fn(dst: *mut u8);
/// Destruct the value at `ptr`, leaving the memory uninitialized.
pub type DtorHook = unsafe fn(ptr: *mut u8);
/// Clone `src` into uninitialized `dst`.
pub type CopyHook = unsafe fn(dst: *mut u8, src: *const u8);
/// Move `src` into uninitialized `dst`; `src` is left uninitialized.
pub type MoveHook = unsafe fn(dst: *mut u8, src: *mut u8);

/// Lifecycle hooks for a component type.
///
/// Missing `ctor` means zero-filled construction, missing `move` means a
/// bitwise move. Types that own resources must provide `ctor` + `dtor`.
#[derive(Clone, Copy, Default)]
pub struct TypeHooks {
    pub ctor: Option<CtorHook>,
    pub dtor: Option<DtorHook>,
    pub copy: Option<CopyHook>,
    pub move_: Option<MoveHook>,
}

impl fmt::Debug for TypeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHooks")
            .field("ctor", &self.ctor.is_some())
            .field("dtor", &self.dtor.is_some())
            .field("copy", &self.copy.is_some())
            .field("move", &self.move_.is_some())
            .finish()
    }
}

/// Metadata describing a component's memory layout and lifecycle.
#[derive(Clone, Debug)]
pub struct TypeInfo {
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub hooks: TypeHooks,
    pub(crate) type_id: Option<TypeId>,
}

impl TypeInfo {
    /// Type info for a Rust component.
    pub fn of<T: Component>() -> Self {
        unsafe fn ctor<T: Default>(dst: *mut u8) {
            unsafe { dst.cast::<T>().write(T::default()) }
        }
        unsafe fn dtor<T>(ptr: *mut u8) {
            unsafe { std::ptr::drop_in_place(ptr.cast::<T>()) }
        }
        unsafe fn copy<T: Clone>(dst: *mut u8, src: *const u8) {
            unsafe { dst.cast::<T>().write((*src.cast::<T>()).clone()) }
        }

        Self {
            name: T::NAME.to_string(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            hooks: TypeHooks {
                ctor: Some(ctor::<T>),
                dtor: needs_drop::<T>().then_some(dtor::<T> as DtorHook),
                copy: Some(copy::<T>),
                move_: None,
            },
            type_id: Some(TypeId::of::<T>()),
        }
    }

    /// Type info for a runtime-defined component.
    pub fn from_layout(name: impl Into<String>, size: usize, align: usize, hooks: TypeHooks) -> Self {
        Self {
            name: name.into(),
            size,
            align,
            hooks,
            type_id: None,
        }
    }

    /// Check layout and hook consistency.
    pub fn validate(&self) -> Result<(), ComponentError> {
        if !self.align.is_power_of_two() {
            return Err(ComponentError::BadAlignment { align: self.align });
        }
        if self.size % self.align != 0 {
            return Err(ComponentError::SizeNotAligned {
                size: self.size,
                align: self.align,
            });
        }
        if self.hooks.ctor.is_none() {
            if self.hooks.dtor.is_some() {
                return Err(ComponentError::MissingCtor { hook: "dtor" });
            }
            if self.hooks.copy.is_some() {
                return Err(ComponentError::MissingCtor { hook: "copy" });
            }
        }
        Ok(())
    }

    /// Zero-sized components are stored as tags (no column).
    #[inline]
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub(crate) fn is_type<T: 'static>(&self) -> bool {
        self.type_id == Some(TypeId::of::<T>())
    }

    /// # Safety
    /// `dst` must be valid for writes of `size` bytes and suitably aligned.
    #[inline]
    pub(crate) unsafe fn construct(&self, dst: *mut u8) {
        match self.hooks.ctor {
            Some(ctor) => unsafe { ctor(dst) },
            None => unsafe { std::ptr::write_bytes(dst, 0, self.size) },
        }
    }

    /// # Safety
    /// `ptr` must point at an initialized value of this type.
    #[inline]
    pub(crate) unsafe fn destruct(&self, ptr: *mut u8) {
        if let Some(dtor) = self.hooks.dtor {
            unsafe { dtor(ptr) }
        }
    }

    /// # Safety
    /// `src` must be initialized, `dst` uninitialized; they must not overlap.
    #[inline]
    pub(crate) unsafe fn move_into(&self, dst: *mut u8, src: *mut u8) {
        match self.hooks.move_ {
            Some(mv) => unsafe { mv(dst, src) },
            None => unsafe { std::ptr::copy_nonoverlapping(src, dst, self.size) },
        }
    }

    /// # Safety
    /// `src` must be initialized, `dst` uninitialized; they must not overlap.
    #[inline]
    pub(crate) unsafe fn copy_into(&self, dst: *mut u8, src: *const u8) -> Result<(), ComponentError> {
        match self.hooks.copy {
            Some(copy) => unsafe { copy(dst, src) },
            None if self.hooks.dtor.is_none() => unsafe {
                std::ptr::copy_nonoverlapping(src, dst, self.size)
            },
            None => return Err(ComponentError::MissingCopy),
        }
        Ok(())
    }
}

/// Trait for Rust-defined components.
///
/// Use [`define_component!`](crate::define_component) to implement it.
/// Zero-sized implementors are treated as tags.
pub trait Component: 'static + Sized + Send + Sync + Default + Clone {
    /// Human-readable name for debugging.
    const NAME: &'static str;
}

/// Helper macro to implement the `Component` trait.
///
/// # Example
/// ```ignore
/// #[derive(Clone, Copy, Default)]
/// struct Position { x: f32, y: f32 }
///
/// define_component!(Position);
/// define_component!(Velocity, "Velocity");
/// ```
#[macro_export]
macro_rules! define_component {
    ($ty:ty) => {
        $crate::define_component!($ty, stringify!($ty));
    };
    ($ty:ty, $name:expr) => {
        impl $crate::ecs::Component for $ty {
            const NAME: &'static str = $name;
        }
    };
}

/// Per-world table of registered component layouts.
#[derive(Default)]
pub(crate) struct ComponentRegistry {
    by_type: HashMap<TypeId, EntityIdx>,
    infos: HashMap<EntityIdx, Arc<TypeInfo>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_type<T: 'static>(&self) -> Option<EntityIdx> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Register metadata for `index`. Re-registration must match the
    /// previous layout.
    pub fn insert(&mut self, index: EntityIdx, info: TypeInfo) -> Result<Arc<TypeInfo>, ComponentError> {
        info.validate()?;
        if let Some(prev) = self.infos.get(&index) {
            if prev.size != info.size || prev.align != info.align {
                return Err(ComponentError::LayoutMismatch {
                    size: prev.size,
                    align: prev.align,
                });
            }
            return Ok(Arc::clone(prev));
        }
        if let Some(type_id) = info.type_id {
            self.by_type.insert(type_id, index);
        }
        let info = Arc::new(info);
        self.infos.insert(index, Arc::clone(&info));
        Ok(info)
    }

    pub fn remove(&mut self, index: EntityIdx) {
        if let Some(info) = self.infos.remove(&index) {
            if let Some(type_id) = info.type_id {
                self.by_type.remove(&type_id);
            }
        }
    }

    pub fn get(&self, index: EntityIdx) -> Option<&Arc<TypeInfo>> {
        self.infos.get(&index)
    }

    /// Type info stored for `id`.
    ///
    /// A pair takes the relationship's type if it has data, otherwise the
    /// target's. Tags and wildcards have none.
    pub fn for_id(&self, id: Id) -> Option<&Arc<TypeInfo>> {
        if id.is_wildcard() {
            return None;
        }
        let data = |idx: EntityIdx| {
            if idx == WILDCARD_INDEX {
                return None;
            }
            self.infos.get(&idx).filter(|info| !info.is_tag())
        };
        if id.is_pair() {
            data(id.first()).or_else(|| data(id.second()))
        } else {
            data(id.first())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Name(String);
    define_component!(Name);

    #[derive(Clone, Copy, Default)]
    struct Marker;
    define_component!(Marker, "Marker");

    fn noop_dtor_hooks() -> TypeHooks {
        unsafe fn dtor(_: *mut u8) {}
        TypeHooks {
            dtor: Some(dtor),
            ..TypeHooks::default()
        }
    }

    #[test]
    fn rust_types_get_drop_and_clone_hooks() {
        let info = TypeInfo::of::<Name>();
        assert_eq!(info.name, "Name");
        assert!(info.hooks.ctor.is_some());
        assert!(info.hooks.dtor.is_some());
        assert!(info.hooks.copy.is_some());
        assert!(info.validate().is_ok());

        let tag = TypeInfo::of::<Marker>();
        assert!(tag.is_tag());
        assert!(tag.hooks.dtor.is_none());
    }

    #[test]
    fn layout_validation() {
        let bad = TypeInfo::from_layout("bad", 8, 3, TypeHooks::default());
        assert_eq!(bad.validate(), Err(ComponentError::BadAlignment { align: 3 }));

        let bad = TypeInfo::from_layout("bad", 6, 4, TypeHooks::default());
        assert!(matches!(bad.validate(), Err(ComponentError::SizeNotAligned { .. })));

        let bad = TypeInfo::from_layout("bad", 8, 8, noop_dtor_hooks());
        assert_eq!(bad.validate(), Err(ComponentError::MissingCtor { hook: "dtor" }));
    }

    #[test]
    fn re_registration_must_match() {
        let mut registry = ComponentRegistry::new();
        registry
            .insert(10, TypeInfo::from_layout("a", 8, 8, TypeHooks::default()))
            .unwrap();
        assert!(registry
            .insert(10, TypeInfo::from_layout("a", 8, 8, TypeHooks::default()))
            .is_ok());
        assert_eq!(
            registry
                .insert(10, TypeInfo::from_layout("a", 16, 8, TypeHooks::default()))
                .unwrap_err(),
            ComponentError::LayoutMismatch { size: 8, align: 8 }
        );
    }

    #[test]
    fn pair_type_comes_from_relationship_then_target() {
        let mut registry = ComponentRegistry::new();
        registry.insert(10, TypeInfo::of::<Name>()).unwrap();
        registry.insert(11, TypeInfo::of::<Marker>()).unwrap();

        let rel_data = Id::pair_from_indices(10, 50);
        assert_eq!(registry.for_id(rel_data).unwrap().name, "Name");

        let tag_rel = Id::pair_from_indices(11, 10);
        assert_eq!(registry.for_id(tag_rel).unwrap().name, "Name");

        let neither = Id::pair_from_indices(50, 51);
        assert!(registry.for_id(neither).is_none());
        assert!(registry.for_id(Id::pair_from_indices(10, WILDCARD_INDEX)).is_none());
    }
}
