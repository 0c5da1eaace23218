//! Scoped ownership on top of explicit destroy.
//!
//! `Device::destroy_*` is the primitive; [`UniqueHandle`] is the optional wrapper for code
//! that wants ownership made explicit in the types. The wrapper deliberately does not hold a
//! reference back to its device - that would either freeze the device for the wrapper's
//! lifetime or reintroduce the cyclic ownership the handle model exists to avoid - so the
//! device is passed in at destroy time instead.

use crate::rhi::handle::*;
use crate::rhi::rhi_enums::RhiError;
use crate::rhi::rhi_traits::Device;

/// Uniform destroy dispatch: maps a handle's tag to the right `Device::destroy_*` method.
pub trait Destroy<Tag> {
    /// Destroys the resource named by `handle`.
    fn destroy(&mut self, handle: Handle<Tag>) -> Result<(), RhiError>;
}

macro_rules! destroy_dispatch {
    ($($tag:ty => $method:ident,)*) => {
        $(
            impl<D: Device> Destroy<$tag> for D {
                fn destroy(&mut self, handle: Handle<$tag>) -> Result<(), RhiError> {
                    self.$method(handle)
                }
            }
        )*
    };
}

destroy_dispatch! {
    BufferTag => destroy_buffer,
    ImageTag => destroy_image,
    ImageViewTag => destroy_image_view,
    SamplerTag => destroy_sampler,
    ShaderModuleTag => destroy_shader_module,
    BindGroupLayoutTag => destroy_bind_group_layout,
    BindGroupTag => destroy_bind_group,
    PipelineLayoutTag => destroy_pipeline_layout,
    PipelineTag => destroy_pipeline,
    SemaphoreTag => destroy_semaphore,
    FenceTag => destroy_fence,
    CommandAllocatorTag => destroy_command_allocator,
    CommandListTag => destroy_command_list,
    SwapchainTag => destroy_swapchain,
}

/// A handle that owns its resource: it expects to be destroyed or released, exactly once.
///
/// Dropping an armed wrapper does not free anything (the device cleans every live resource
/// up at teardown regardless); it logs in debug builds so leaks are visible during
/// development.
#[derive(Debug)]
pub struct UniqueHandle<Tag> {
    handle: Handle<Tag>,
    armed: bool,
}

impl<Tag> UniqueHandle<Tag> {
    /// Takes ownership of `handle`.
    pub fn new(handle: Handle<Tag>) -> Self {
        UniqueHandle { handle, armed: true }
    }

    /// The wrapped handle, for binding and lookups. Ownership stays with the wrapper.
    pub fn get(&self) -> Handle<Tag> {
        self.handle
    }

    /// Gives up ownership without destroying; the caller is responsible for the handle again.
    pub fn release(mut self) -> Handle<Tag> {
        self.armed = false;
        self.handle
    }

    /// Destroys the resource through `device`.
    pub fn destroy<D: Destroy<Tag>>(mut self, device: &mut D) -> Result<(), RhiError> {
        self.armed = false;
        device.destroy(self.handle)
    }
}

impl<Tag> Drop for UniqueHandle<Tag> {
    fn drop(&mut self) {
        if self.armed && cfg!(debug_assertions) {
            log::warn!(
                "UniqueHandle dropped while still owning slot {} gen {}",
                self.handle.index(),
                self.handle.generation()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A test-local tag keeps these impls clear of the blanket dispatch for the real tags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestTag {}

    struct CountingDevice {
        destroyed: Vec<Handle<TestTag>>,
    }

    impl Destroy<TestTag> for CountingDevice {
        fn destroy(&mut self, handle: Handle<TestTag>) -> Result<(), RhiError> {
            self.destroyed.push(handle);
            Ok(())
        }
    }

    #[test]
    fn destroy_consumes_the_wrapper() {
        let mut device = CountingDevice { destroyed: Vec::new() };
        let handle = Handle::<TestTag>::new(3, 1);

        let unique = UniqueHandle::new(handle);
        assert_eq!(unique.get(), handle);
        unique.destroy(&mut device).unwrap();

        assert_eq!(device.destroyed, vec![handle]);
    }

    #[test]
    fn release_transfers_ownership_back() {
        let mut device = CountingDevice { destroyed: Vec::new() };
        let handle = Handle::<TestTag>::new(4, 2);

        let unique = UniqueHandle::new(handle);
        let returned = unique.release();
        assert_eq!(returned, handle);
        assert!(device.destroyed.is_empty());

        device.destroy(returned).unwrap();
        assert_eq!(device.destroyed, vec![handle]);
    }
}
