//! Generational handles for GPU resources.
//!
//! A handle is a 64-bit value: the lower 32 bits index a slot in a [`ResourcePool`], the upper
//! 32 bits are the generation that slot had when the resource was created. The generation lets
//! the pool reject lookups through handles whose resource has since been destroyed, even after
//! the slot has been reused.
//!
//! [`ResourcePool`]: crate::rhi::ResourcePool

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// An opaque generational identifier for a pooled GPU resource.
///
/// Handles are plain values: copying one does not affect the resource, and every operation on
/// the resource goes back through the [`Device`] that minted the handle.
///
/// [`Device`]: crate::rhi::Device
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _tag: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Creates a handle from a slot index and the slot's generation.
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Handle {
            index,
            generation,
            _tag: PhantomData,
        }
    }

    /// The sentinel handle that never names a live resource.
    ///
    /// Pool generations start at 1, so a zero generation can never match a slot.
    pub fn invalid() -> Self {
        Handle::new(0, 0)
    }

    /// True unless this is the invalid sentinel.
    pub fn is_valid(&self) -> bool {
        self.generation != 0
    }

    /// The pool slot this handle points at.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generation the slot had when this handle was minted.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the handle into its 64-bit wire form: `generation << 32 | index`.
    pub fn as_u64(&self) -> u64 {
        u64::from(self.generation) << 32 | u64::from(self.index)
    }

    /// Unpacks a handle from its 64-bit wire form.
    pub fn from_u64(value: u64) -> Self {
        Handle::new(value as u32, (value >> 32) as u32)
    }
}

// Manual impls: deriving would bound them on `T`, but the tag is phantom.

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_u64().hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}, {})", self.index, self.generation)
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Handle::invalid()
    }
}

macro_rules! handle_types {
    ($($(#[$attr:meta])* $tag:ident => $alias:ident,)*) => {
        $(
            $(#[$attr])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $tag {}

            $(#[$attr])*
            pub type $alias = Handle<$tag>;
        )*
    };
}

handle_types! {
    /// Tag for buffer handles.
    BufferTag => BufferHandle,
    /// Tag for image handles.
    ImageTag => ImageHandle,
    /// Tag for image view handles.
    ImageViewTag => ImageViewHandle,
    /// Tag for sampler handles.
    SamplerTag => SamplerHandle,
    /// Tag for graphics pipeline handles.
    PipelineTag => PipelineHandle,
    /// Tag for pipeline layout handles.
    PipelineLayoutTag => PipelineLayoutHandle,
    /// Tag for bind group layout handles.
    BindGroupLayoutTag => BindGroupLayoutHandle,
    /// Tag for bind group handles.
    BindGroupTag => BindGroupHandle,
    /// Tag for shader module handles.
    ShaderModuleTag => ShaderModuleHandle,
    /// Tag for semaphore handles.
    SemaphoreTag => SemaphoreHandle,
    /// Tag for fence handles.
    FenceTag => FenceHandle,
    /// Tag for render pass handles (driver interop only; the built-in backends render
    /// dynamically and never mint one).
    RenderPassTag => RenderPassHandle,
    /// Tag for framebuffer handles (driver interop only, as with render passes).
    FramebufferTag => FramebufferHandle,
    /// Tag for command allocator handles.
    CommandAllocatorTag => CommandAllocatorHandle,
    /// Tag for command list handles.
    CommandListTag => CommandListHandle,
    /// Tag for swapchain handles.
    SwapchainTag => SwapchainHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u64() {
        let handle = BufferHandle::new(42, 7);
        let packed = handle.as_u64();
        assert_eq!(packed, 7u64 << 32 | 42);
        assert_eq!(BufferHandle::from_u64(packed), handle);
    }

    #[test]
    fn invalid_sentinel_is_not_valid() {
        assert!(!ImageHandle::invalid().is_valid());
        assert!(ImageHandle::new(0, 1).is_valid());
    }

    #[test]
    fn handles_of_equal_parts_are_equal() {
        assert_eq!(FenceHandle::new(3, 2), FenceHandle::new(3, 2));
        assert_ne!(FenceHandle::new(3, 2), FenceHandle::new(3, 3));
        assert_ne!(FenceHandle::new(3, 2), FenceHandle::new(4, 2));
    }
}
