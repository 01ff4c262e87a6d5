use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ExecutionError, ExecutionResult};

/// An identifier backed by a counter.
pub trait IdType: Copy {
    /// The identifier handed out first by a fresh generator.
    const FIRST: Self;

    fn successor(self) -> Option<Self>;
}

macro_rules! define_id_type {
    ($(#[$meta:meta])* $name:ident, $value_type:ty, $first:expr) => {
        $(#[$meta])*
        #[derive(
            Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize,
        )]
        #[serde(transparent)]
        pub struct $name($value_type);

        impl IdType for $name {
            const FIRST: Self = Self($first);

            fn successor(self) -> Option<Self> {
                self.0.checked_add(1).map(Self)
            }
        }

        impl From<$value_type> for $name {
            fn from(id: $value_type) -> Self {
                Self(id)
            }
        }

        impl From<$name> for $value_type {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

define_id_type!(AppId, u64, 1);
define_id_type!(TaskId, u64, 1);
define_id_type!(ActionId, u64, 1);
define_id_type!(WorkerId, u64, 1);
define_id_type!(DataId, u64, 1);
define_id_type!(CreationId, u64, 1);
define_id_type!(
    /// Position of a core element in every per-core table.
    CoreId,
    usize,
    0
);
define_id_type!(
    /// Position of an implementation within its core element.
    ImplId,
    usize,
    0
);

impl CoreId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl ImplId {
    pub fn index(self) -> usize {
        self.0
    }
}

fn overflow<T>() -> ExecutionError {
    ExecutionError::internal(format!("{} overflow", std::any::type_name::<T>()))
}

#[derive(Debug)]
pub struct IdGenerator<T: IdType> {
    upcoming: Option<T>,
}

impl<T: IdType> IdGenerator<T> {
    pub fn new() -> Self {
        Self {
            upcoming: Some(T::FIRST),
        }
    }

    pub fn next(&mut self) -> ExecutionResult<T> {
        let id = self.upcoming.ok_or_else(overflow::<T>)?;
        self.upcoming = id.successor();
        Ok(id)
    }
}

impl<T: IdType> Default for IdGenerator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out process-wide identifiers from any thread.
/// Task IDs are unique across applications, so every submission draws from one counter.
#[derive(Debug)]
pub struct AtomicIdGenerator<T> {
    counter: AtomicU64,
    phantom: PhantomData<T>,
}

impl<T: IdType + From<u64>> AtomicIdGenerator<T>
where
    u64: From<T>,
{
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(u64::from(T::FIRST)),
            phantom: PhantomData,
        }
    }

    pub fn next(&self) -> ExecutionResult<T> {
        self.counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .map(T::from)
            .map_err(|_| overflow::<T>())
    }
}

impl<T: IdType + From<u64>> Default for AtomicIdGenerator<T>
where
    u64: From<T>,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_id_generator() {
        let mut tasks = IdGenerator::<TaskId>::new();
        assert_eq!(tasks.next().unwrap(), TaskId::from(1));
        assert_eq!(tasks.next().unwrap(), TaskId::from(2));
        let mut cores = IdGenerator::<CoreId>::new();
        assert_eq!(cores.next().unwrap().index(), 0);
    }

    #[test]
    fn test_atomic_id_generator_is_unique_across_threads() {
        let generator = Arc::new(AtomicIdGenerator::<TaskId>::new());
        let handles = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| generator.next().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let ids = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), 400);
        assert!(ids.contains(&TaskId::from(1)));
        assert!(ids.contains(&TaskId::from(400)));
    }
}
