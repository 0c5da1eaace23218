//! The backend contract.
//!
//! Every backend realizes these traits on a concrete driver. Handles - not associated types -
//! are the canonical identity of every resource, so the traits stay small: a backend is just
//! the thing that mints handles, records their lifetimes, and turns recorded command streams
//! into driver work. Validation and logging live in the backend's method bodies at the driver
//! boundary, not in the traits.

use crate::rhi::command::CommandList;
use crate::rhi::handle::*;
use crate::rhi::rhi_enums::*;
use crate::rhi::rhi_structs::*;
use crate::surface::{RawWindowHandle, Surface};

/// Top-level trait for functions that don't belong to any specific device.
///
/// Owns the driver instance and the debug message sink. Dropping it after its devices is the
/// caller's responsibility, same as with the raw driver.
pub trait GraphicsApi {
    /// The device type this API creates.
    type Device: Device;

    /// Lists the adapters the driver exposes, in driver order.
    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterDesc>, RhiError>;

    /// Creates a device on the adapter at `adapter_index`.
    ///
    /// Queue families are chosen once here: a graphics-capable family is required, and
    /// dedicated transfer/compute families are preferred over reusing graphics.
    fn create_device(&mut self, adapter_index: u32) -> Result<Self::Device, RhiError>;
}

/// A logical GPU: the owner of every pool, queue and driver object the RHI hands out.
///
/// Creation ops take a descriptor struct by value and return a typed handle; descriptor
/// invariant violations fail with `InvalidArgument`, driver allocation failures with
/// `OutOfMemory` or `Driver`. Destruction is deferred: `destroy_*` makes the handle stale
/// immediately but the driver object lives until the frame that might reference it has
/// provably retired (see [`flush_deferred`](Device::flush_deferred)).
///
/// A device is single-threaded cooperative: it is not safe to share across host threads
/// without external synchronization.
pub trait Device {
    /// The shader front-end paired with this device.
    type ShaderCompiler: ShaderCompiler;

    /// Creates a shader compiler targeting this device's IR.
    fn create_shader_compiler(&self) -> Result<Self::ShaderCompiler, RhiError>;

    /// Creates a buffer.
    fn create_buffer(&mut self, info: BufferCreateInfo) -> Result<BufferHandle, RhiError>;

    /// Creates an image.
    fn create_image(&mut self, info: ImageCreateInfo) -> Result<ImageHandle, RhiError>;

    /// Creates a view onto an image.
    fn create_image_view(&mut self, info: ImageViewCreateInfo) -> Result<ImageViewHandle, RhiError>;

    /// Creates a sampler.
    fn create_sampler(&mut self, info: SamplerCreateInfo) -> Result<SamplerHandle, RhiError>;

    /// Creates a shader module from a driver-IR blob.
    fn create_shader_module(&mut self, info: ShaderModuleCreateInfo) -> Result<ShaderModuleHandle, RhiError>;

    /// Creates a bind group layout.
    ///
    /// Bindings are ordered strictly by the index they request; duplicate indices are
    /// `InvalidArgument`. Identical layouts resolve to the same cached handle.
    fn create_bind_group_layout(&mut self, info: BindGroupLayoutCreateInfo) -> Result<BindGroupLayoutHandle, RhiError>;

    /// Creates a bind group: a snapshot of concrete resources matching a layout.
    ///
    /// Every filled binding must match a declared binding of the correct kind; unfilled
    /// bindings stay unbound.
    fn create_bind_group(&mut self, info: BindGroupCreateInfo) -> Result<BindGroupHandle, RhiError>;

    /// Updates slots of an existing bind group.
    ///
    /// The caller must not write a group that a command list still executing on the GPU has
    /// bound; that contract is the caller's, per the crate's concurrency model.
    fn write_bind_group(&mut self, bind_group: BindGroupHandle, writes: Vec<BindGroupWrite>) -> Result<(), RhiError>;

    /// Creates (or returns the cached) pipeline layout for the given layout list.
    fn create_pipeline_layout(&mut self, info: PipelineLayoutCreateInfo) -> Result<PipelineLayoutHandle, RhiError>;

    /// Creates a graphics pipeline.
    fn create_graphics_pipeline(&mut self, info: GraphicsPipelineCreateInfo) -> Result<PipelineHandle, RhiError>;

    /// Creates a device-side ordering semaphore.
    fn create_semaphore(&mut self) -> Result<SemaphoreHandle, RhiError>;

    /// Creates a host-visible fence.
    fn create_fence(&mut self, info: FenceCreateInfo) -> Result<FenceHandle, RhiError>;

    /// Creates a command allocator: the owner of command-list backing memory.
    fn create_command_allocator(&mut self, info: CommandAllocatorCreateInfo)
        -> Result<CommandAllocatorHandle, RhiError>;

    /// Creates a command list on an allocator.
    fn create_command_list(&mut self, info: CommandListCreateInfo) -> Result<CommandListHandle, RhiError>;

    /// Creates a swapchain on a platform surface.
    fn create_swapchain(
        &mut self,
        surface: &mut dyn Surface<RawWindowHandle>,
        info: SwapchainCreateInfo,
    ) -> Result<SwapchainHandle, RhiError>;

    /// Borrows a command list for recording.
    fn command_list_mut(&mut self, command_list: CommandListHandle) -> Result<&mut CommandList, RhiError>;

    /// Resets an allocator, invalidating every command list allocated from it.
    fn reset_command_allocator(&mut self, allocator: CommandAllocatorHandle) -> Result<(), RhiError>;

    /// Destroys a buffer. The handle is stale immediately; the driver object is released once
    /// the destroying frame retires.
    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), RhiError>;

    /// Destroys an image. Swapchain-owned images cannot be destroyed directly.
    fn destroy_image(&mut self, image: ImageHandle) -> Result<(), RhiError>;

    /// Destroys an image view.
    fn destroy_image_view(&mut self, image_view: ImageViewHandle) -> Result<(), RhiError>;

    /// Destroys a sampler.
    fn destroy_sampler(&mut self, sampler: SamplerHandle) -> Result<(), RhiError>;

    /// Destroys a shader module.
    fn destroy_shader_module(&mut self, shader_module: ShaderModuleHandle) -> Result<(), RhiError>;

    /// Destroys a bind group layout and evicts it from the layout cache.
    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) -> Result<(), RhiError>;

    /// Destroys a bind group.
    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) -> Result<(), RhiError>;

    /// Destroys a pipeline layout and evicts it from the layout cache.
    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) -> Result<(), RhiError>;

    /// Destroys a graphics pipeline.
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RhiError>;

    /// Destroys a semaphore.
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) -> Result<(), RhiError>;

    /// Destroys a fence.
    fn destroy_fence(&mut self, fence: FenceHandle) -> Result<(), RhiError>;

    /// Destroys a command allocator and every list still allocated from it.
    fn destroy_command_allocator(&mut self, allocator: CommandAllocatorHandle) -> Result<(), RhiError>;

    /// Destroys a command list record.
    fn destroy_command_list(&mut self, command_list: CommandListHandle) -> Result<(), RhiError>;

    /// Destroys a swapchain, its surface and its image handles.
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> Result<(), RhiError>;

    /// Releases every driver object whose frame has retired.
    ///
    /// The frame orchestrator calls this once per frame, right after waiting on the oldest
    /// frame's fence.
    fn flush_deferred(&mut self);

    /// Maps a host-visible buffer for sequential writes.
    ///
    /// The pointer is valid until [`unmap`](Device::unmap). Mapping a non-host-visible buffer,
    /// or mapping twice without an unmap in between, is `InvalidArgument`.
    fn map(&mut self, buffer: BufferHandle) -> Result<*mut u8, RhiError>;

    /// Unmaps a previously mapped buffer. Unmapping an unmapped buffer is `InvalidArgument`.
    fn unmap(&mut self, buffer: BufferHandle) -> Result<(), RhiError>;

    /// Blocks until `fence` signals, then resets it to the unsignaled state.
    fn wait_for_fence(&mut self, fence: FenceHandle) -> Result<(), RhiError>;

    /// Blocks until a queue has drained.
    fn wait_queue_idle(&mut self, queue_type: QueueType) -> Result<(), RhiError>;

    /// Blocks until the whole device has drained.
    fn wait_idle(&mut self) -> Result<(), RhiError>;

    /// Enqueues a semaphore wait onto a queue. Applies to that queue's next submit only.
    fn queue_wait(&mut self, queue_type: QueueType, semaphore: SemaphoreHandle) -> Result<(), RhiError>;

    /// Enqueues a semaphore signal onto a queue. Applies to that queue's next submit only.
    fn queue_signal(&mut self, queue_type: QueueType, semaphore: SemaphoreHandle) -> Result<(), RhiError>;

    /// Submits recorded command lists along with the queue's pending waits and signals.
    ///
    /// Lists must be `Recorded` and free of latent errors, and must come from allocators that
    /// have not been reset since; otherwise nothing is enqueued and the error is returned.
    fn submit(&mut self, info: SubmitInfo, signal_fence: Option<FenceHandle>) -> Result<(), RhiError>;

    /// Submits and blocks until a transient fence signals.
    fn submit_immediate(&mut self, info: SubmitInfo) -> Result<(), RhiError>;

    /// The index of the current swapchain image, lazily acquiring the next one after a
    /// present. The acquire signals the swapchain's internal image-available semaphore.
    fn swapchain_image_index(&mut self, swapchain: SwapchainHandle) -> Result<u32, RhiError>;

    /// Like [`swapchain_image_index`](Device::swapchain_image_index), but a lazily triggered
    /// acquire signals `signal_semaphore` instead of the internal semaphore. This is the
    /// orchestrator's entry point: the frame's submit then waits that semaphore.
    fn acquire_next_image(&mut self, swapchain: SwapchainHandle, signal_semaphore: SemaphoreHandle)
        -> Result<u32, RhiError>;

    /// The handle of the swapchain image at `image_index`. Swapchain images are driver-owned;
    /// they are transitioned and rendered to, never destroyed individually.
    fn swapchain_image(&self, swapchain: SwapchainHandle, image_index: u32) -> Result<ImageHandle, RhiError>;

    /// Recreates the swapchain with new properties, passing the old one to the driver as a
    /// migration hint. The caller must have quiesced rendering to the old images first.
    fn resize_swapchain(&mut self, swapchain: SwapchainHandle, info: SwapchainCreateInfo) -> Result<(), RhiError>;

    /// Queue-presents the current image, then arranges for the next image to be acquired on
    /// next use. Waits `wait_semaphores` (plus the internal image-available semaphore when the
    /// pending acquire used it). A suboptimal swapchain logs a warning and carries on; any
    /// other driver failure is returned.
    fn present(&mut self, swapchain: SwapchainHandle, wait_semaphores: &[SemaphoreHandle]) -> Result<(), RhiError>;
}

/// A shader front-end: text in, driver IR out.
pub trait ShaderCompiler {
    /// Compiles `info.source` for `info.stage`, returning the driver's IR bytes.
    ///
    /// Front-end diagnostics come back as `ShaderCompile { log }`.
    fn compile(&mut self, info: &ShaderCompileInfo) -> Result<Vec<u8>, RhiError>;

    /// Reflects a compiled blob, returning the bindings it declares so a higher layer can
    /// build a pipeline layout without duplicating shader metadata.
    fn reflect(&self, ir: &[u8]) -> Result<Vec<ShaderBindingReflection>, RhiError>;
}
