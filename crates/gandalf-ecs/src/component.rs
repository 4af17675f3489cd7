//! Component type registration and metadata.
//!
//! Any `'static` type can be stored as a component. The first time a type is
//! inserted into a [`World`](crate::world::World) it is assigned a dense
//! [`ComponentTypeId`] which indexes the per-type storage. Types that should
//! take part in scene snapshots are additionally registered with a name and a
//! pair of serde-backed (de)serialization functions, which act as the per-type
//! field-descriptor table consumed by the snapshot code.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Component / ComponentKey
// ---------------------------------------------------------------------------

/// Marker trait for anything storable in the ECS.
pub trait Component: Any {}

impl<T: Any> Component for T {}

/// Identifies a component type independently of any world.
///
/// Systems describe their filters with keys so they can be built before the
/// world has seen the type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl ComponentKey {
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// The type name without its module path.
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.type_name)
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentKey({})", self.short_name())
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    // Generic parameters may themselves contain paths, so only strip the
    // prefix before the first `<`.
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

// ---------------------------------------------------------------------------
// ComponentSet -- tuples of component types
// ---------------------------------------------------------------------------

/// A tuple of component types, used to declare system filters.
///
/// ```
/// use gandalf_ecs::component::{ComponentKey, ComponentSet};
///
/// struct A;
/// struct B;
/// let keys = <(A, B)>::keys();
/// assert_eq!(keys, vec![ComponentKey::of::<A>(), ComponentKey::of::<B>()]);
/// ```
pub trait ComponentSet {
    fn keys() -> Vec<ComponentKey>;
}

macro_rules! impl_component_set {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            fn keys() -> Vec<ComponentKey> {
                vec![$(ComponentKey::of::<$name>()),+]
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Dense, world-local identifier for a component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Serialization hooks
// ---------------------------------------------------------------------------

/// Turns a type-erased component into JSON.
pub type SerializeFn = Box<dyn Fn(&dyn Any) -> Result<serde_json::Value, String>>;

/// Builds a type-erased component from JSON.
pub type DeserializeFn = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Any>, String>>;

/// The (de)serialization pair registered for a component type.
pub struct SerdeHooks {
    pub serialize: SerializeFn,
    pub deserialize: DeserializeFn,
}

impl SerdeHooks {
    /// Hooks backed by the type's serde implementation.
    pub fn serde<T>() -> Self
    where
        T: Component + serde::Serialize + serde::de::DeserializeOwned,
    {
        Self {
            serialize: Box::new(|value: &dyn Any| {
                let typed = value
                    .downcast_ref::<T>()
                    .ok_or_else(|| format!("value is not a {}", std::any::type_name::<T>()))?;
                serde_json::to_value(typed).map_err(|e| e.to_string())
            }),
            deserialize: Box::new(|value: &serde_json::Value| {
                let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(Box::new(typed) as Box<dyn Any>)
            }),
        }
    }
}

impl fmt::Debug for SerdeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SerdeHooks")
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a component type known to a world.
#[derive(Debug)]
pub struct ComponentInfo {
    pub id: ComponentTypeId,
    pub key: ComponentKey,
    /// Registered name, or the short type name for implicitly seen types.
    pub name: String,
    /// Present only for types registered as serializable.
    pub hooks: Option<SerdeHooks>,
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping Rust types to [`ComponentTypeId`]s and their metadata.
///
/// A type is only ever assigned one id; registering it again under another
/// name only attaches the serialization hooks.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_name: HashMap<String, ComponentTypeId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `key`, assigning one if the type is new.
    pub fn ensure(&mut self, key: ComponentKey) -> ComponentTypeId {
        if let Some(&existing) = self.by_type.get(&key.type_id) {
            return existing;
        }
        let id = ComponentTypeId(self.infos.len() as u32);
        let name = key.short_name().to_owned();
        self.infos.push(ComponentInfo {
            id,
            key,
            name: name.clone(),
            hooks: None,
        });
        self.by_type.insert(key.type_id, id);
        self.by_name.entry(name).or_insert(id);
        id
    }

    /// Register `T` as serializable under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already used by a different serializable type.
    pub fn register_serde<T>(&mut self, name: &str) -> ComponentTypeId
    where
        T: Component + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.register_with_hooks(ComponentKey::of::<T>(), name, SerdeHooks::serde::<T>())
    }

    /// Register custom (de)serialization hooks for a component type.
    pub fn register_with_hooks(
        &mut self,
        key: ComponentKey,
        name: &str,
        hooks: SerdeHooks,
    ) -> ComponentTypeId {
        let id = self.ensure(key);
        if let Some(&owner) = self.by_name.get(name) {
            if owner != id && self.infos[owner.index()].hooks.is_some() {
                panic!(
                    "component name '{}' is already registered for a different type",
                    name
                );
            }
        }
        let info = &mut self.infos[id.index()];
        if self.by_name.get(&info.name) == Some(&id) {
            self.by_name.remove(&info.name);
        }
        info.name = name.to_owned();
        info.hooks = Some(hooks);
        self.by_name.insert(name.to_owned(), id);
        id
    }

    pub fn lookup(&self, key: &ComponentKey) -> Option<ComponentTypeId> {
        self.by_type.get(&key.type_id).copied()
    }

    pub fn lookup_type<T: Component>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Names of all types that carry serialization hooks, sorted.
    pub fn serializable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .infos
            .iter()
            .filter(|info| info.hooks.is_some())
            .map(|info| info.name.as_str())
            .collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Pos {
        x: f32,
        y: f32,
    }

    struct Opaque;

    #[test]
    fn ensure_is_stable() {
        let mut reg = ComponentRegistry::new();
        let a = reg.ensure(ComponentKey::of::<Pos>());
        let b = reg.ensure(ComponentKey::of::<Pos>());
        let c = reg.ensure(ComponentKey::of::<Opaque>());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn implicit_types_use_short_name() {
        let mut reg = ComponentRegistry::new();
        let id = reg.ensure(ComponentKey::of::<Opaque>());
        assert_eq!(reg.get_info(id).unwrap().name, "Opaque");
        assert_eq!(reg.lookup_by_name("Opaque"), Some(id));
    }

    #[test]
    fn register_serde_renames_and_attaches_hooks() {
        let mut reg = ComponentRegistry::new();
        let implicit = reg.ensure(ComponentKey::of::<Pos>());
        let id = reg.register_serde::<Pos>("position");
        assert_eq!(implicit, id);
        assert_eq!(reg.lookup_by_name("position"), Some(id));
        assert_eq!(reg.lookup_by_name("Pos"), None);
        assert_eq!(reg.serializable_names(), vec!["position"]);

        let hooks = reg.get_info(id).unwrap().hooks.as_ref().unwrap();
        let json = (hooks.serialize)(&Pos { x: 1.0, y: 2.0 }).unwrap();
        assert_eq!(json, serde_json::json!({"x": 1.0, "y": 2.0}));
        let back = (hooks.deserialize)(&json).unwrap();
        assert_eq!(back.downcast_ref::<Pos>().unwrap().y, 2.0);
    }

    #[test]
    fn serialize_hook_rejects_wrong_type() {
        let hooks = SerdeHooks::serde::<Pos>();
        assert!((hooks.serialize)(&5u32).is_err());
    }

    #[test]
    fn short_name_strips_module_path() {
        assert_eq!(ComponentKey::of::<Pos>().short_name(), "Pos");
        assert_eq!(short_type_name("a::b::Wrapper<c::D>"), "Wrapper<c::D>");
    }
}
