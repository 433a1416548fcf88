//! Actor identity.

use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Unique, immutable actor identifier
///
/// Carries the declared type name of the actor state for diagnostics.
/// Equality and hashing only look at the id.
#[derive(Debug, Clone)]
pub struct ActorHandle {
    id: Uuid,
    type_name: &'static str,
}

impl ActorHandle {
    /// Create a handle for an actor whose state is `S`
    pub fn new<S: ?Sized + 'static>() -> Self {
        Self {
            id: Uuid::new_v4(),
            type_name: type_name::<S>(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Fully qualified type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Last path segment of the type name, generics kept
    pub fn short_type_name(&self) -> &'static str {
        let head = self.type_name.split('<').next().unwrap_or(self.type_name);
        match head.rfind("::") {
            Some(pos) => &self.type_name[pos + 2..],
            None => self.type_name,
        }
    }
}

impl PartialEq for ActorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActorHandle {}

impl Hash for ActorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.id.simple())
    }
}
