use std::fmt;

use super::TransformError;

/// Opaque reference to one or more payload ops.
///
/// Handles are positional: a restructuring transformation (bufferization)
/// bumps the arena generation, after which every older handle is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    id: u32,
    generation: u32,
}

impl Handle {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.id)
    }
}

/// Issues handles and tracks which generation is still valid.
#[derive(Clone, Debug, Default)]
pub struct HandleArena {
    next_id: u32,
    generation: u32,
}

impl HandleArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Issue a new handle in the current generation.
    pub fn fresh(&mut self) -> Handle {
        let handle = Handle {
            id: self.next_id,
            generation: self.generation,
        };
        self.next_id += 1;
        handle
    }

    /// Fail if `handle` was issued before the last invalidation.
    pub fn check(&self, handle: Handle) -> Result<Handle, TransformError> {
        if handle.generation != self.generation || handle.id >= self.next_id {
            return Err(TransformError::StaleHandle {
                handle: handle.to_string(),
                generation: handle.generation,
                current: self.generation,
            });
        }
        Ok(handle)
    }

    /// Invalidate every handle issued so far.
    pub fn invalidate_all(&mut self) {
        self.generation += 1;
    }
}
