//! Opaque per-request context storage.
//!
//! The original design packs a value-type record plus its array tails
//! into one contiguous buffer and rewrites pointer/length pairs to point
//! inside it (spec.md §4.9), so an abstract aggregate can hold an
//! undeclared context without ever naming its type. Rewriting raw
//! pointers into a relocatable buffer has no safe equivalent once values
//! can move, so `OpaqueContext` gets the same effect two different ways:
//! a reusable scratch `Vec<u8>` for callers that want to do their own
//! packing, and a `Box<dyn Any + Send>` slot for callers that just want
//! type-erased storage recovered by `downcast`.

use std::any::Any;

/// Holds at most one type-erased value plus a scratch buffer a caller
/// can reuse across requests to avoid reallocating.
#[derive(Default)]
pub struct OpaqueContext {
    buffer: Vec<u8>,
    value: Option<Box<dyn Any + Send>>,
}

impl OpaqueContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send>(&mut self, value: T) {
        self.value = Some(Box::new(value));
    }

    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.value.as_deref()?.downcast_ref()
    }

    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.value.as_deref_mut()?.downcast_mut()
    }

    /// Removes and returns the stored value, leaving the slot empty.
    pub fn take<T: Any + Send>(&mut self) -> Option<T> {
        let boxed = self.value.take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(boxed) => {
                self.value = Some(boxed);
                None
            }
        }
    }

    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Drops the stored value and resets the scratch buffer so the
    /// context can be lent to the next request.
    pub fn clear(&mut self) {
        self.value = None;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cursor {
        offset: usize,
    }

    #[test]
    fn stores_and_recovers_a_typed_value() {
        let mut ctx = OpaqueContext::new();
        ctx.set(Cursor { offset: 12 });
        assert_eq!(ctx.get::<Cursor>().unwrap().offset, 12);
    }

    #[test]
    fn wrong_type_get_returns_none() {
        let mut ctx = OpaqueContext::new();
        ctx.set(42u32);
        assert!(ctx.get::<Cursor>().is_none());
    }

    #[test]
    fn take_empties_the_slot() {
        let mut ctx = OpaqueContext::new();
        ctx.set(Cursor { offset: 3 });
        let taken = ctx.take::<Cursor>().unwrap();
        assert_eq!(taken.offset, 3);
        assert!(ctx.get::<Cursor>().is_none());
    }

    #[test]
    fn clear_resets_buffer_and_value() {
        let mut ctx = OpaqueContext::new();
        ctx.buffer_mut().extend_from_slice(b"scratch");
        ctx.set(7u8);
        ctx.clear();
        assert!(ctx.buffer_mut().is_empty());
        assert!(ctx.get::<u8>().is_none());
    }
}
