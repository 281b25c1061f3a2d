//! The typed service map fibers inherit.

use core::fmt;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Service = (&'static str, Arc<dyn Any + Send + Sync>);

/// An immutable map from service type to service instance.
///
/// Cloning is cheap; adding a service copies the map only when it is shared.
#[derive(Clone, Default)]
pub struct Environment {
    services: Arc<HashMap<TypeId, Service>>,
}

impl Environment {
    /// An empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns this environment with `service` added, replacing any service
    /// of the same type.
    #[must_use]
    pub fn with<T>(mut self, service: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.services).insert(
            TypeId::of::<T>(),
            (std::any::type_name::<T>(), Arc::new(service)),
        );
        self
    }

    /// The service of type `T`, if present.
    #[must_use]
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let (_, service) = self.services.get(&TypeId::of::<T>())?;
        Arc::clone(service).downcast::<T>().ok()
    }

    /// Returns true if a service of type `T` is present.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if there are no services.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.services.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_set().entries(names).finish()
    }
}
