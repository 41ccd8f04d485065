//! Event type model.
//!
//! Rust has no class inheritance, so the type hierarchy the bus matches on is
//! **declared**: every type that may appear in it implements [`EventType`] and
//! names its direct supertypes. Supertypes can be other concrete events or
//! marker "interface" types that are never instantiated.
//!
//! ```ignore
//! struct Auditable;
//! event_type!(Auditable);
//!
//! #[derive(Debug)]
//! struct OrderEvent { id: u64 }
//! event_type!(OrderEvent: Auditable);
//!
//! #[derive(Debug)]
//! struct OrderShipped { id: u64 }
//! event_type!(OrderShipped: OrderEvent);
//! ```
//!
//! The root of every hierarchy is [`AnyEvent`]; it does not need to be listed.

use core::any::{Any, TypeId};
use core::fmt;
use core::hash::{Hash, Hasher};

/// A node in the declared event type hierarchy.
///
/// Implemented for concrete event types as well as marker types that only serve
/// as shared supertypes (the equivalent of interfaces).
pub trait EventType: Any {
    /// Direct supertypes of this type.
    ///
    /// The root ([`AnyEvent`]) is implicit and does not need to be returned.
    fn supertypes() -> Vec<TypeKey>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

/// Runtime identity of an [`EventType`].
///
/// Equality and hashing use the `TypeId` only; the name is for logs and the
/// supertype function drives hierarchy traversal.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
    supertypes: fn() -> Vec<TypeKey>,
}

impl TypeKey {
    pub fn of<T: EventType>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: core::any::type_name::<T>(),
            supertypes: <T as EventType>::supertypes,
        }
    }

    /// Key of the hierarchy root.
    pub fn root() -> Self {
        Self::of::<AnyEvent>()
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared direct supertypes (not transitive).
    pub fn supertypes(&self) -> Vec<TypeKey> {
        (self.supertypes)()
    }

    pub fn is_root(&self) -> bool {
        self.id == TypeId::of::<AnyEvent>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeKey").field(&self.name).finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Root of every event type hierarchy.
///
/// A handler registered for `AnyEvent` is notified of every published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnyEvent;

impl EventType for AnyEvent {}

/// A published event value.
///
/// Object-safe view over any [`EventType`] that can cross threads. The bus does
/// not inspect events beyond their [`TypeKey`].
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// Runtime type of this event.
    fn type_key(&self) -> TypeKey;

    fn as_any(&self) -> &dyn Any;
}

impl<T> Event for T
where
    T: EventType + Send + Sync + fmt::Debug,
{
    fn type_key(&self) -> TypeKey {
        TypeKey::of::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn Event {
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Declare an [`EventType`] impl, optionally with direct supertypes.
///
/// ```ignore
/// event_type!(Parent);
/// event_type!(Child: Parent, SomeMarker);
/// ```
#[macro_export]
macro_rules! event_type {
    ($t:ty) => {
        impl $crate::EventType for $t {}
    };
    ($t:ty : $($parent:ty),+ $(,)?) => {
        impl $crate::EventType for $t {
            fn supertypes() -> ::std::vec::Vec<$crate::TypeKey> {
                ::std::vec![$($crate::TypeKey::of::<$parent>()),+]
            }
        }
    };
}
