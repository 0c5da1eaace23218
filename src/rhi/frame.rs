//! Per-frame orchestration.
//!
//! The engine renders into a small ring of per-frame records so the CPU can record frame N
//! while the GPU still chews on frame N-1. Each record owns the command memory and sync
//! objects for one slot of the ring; before a slot is reused its fence is waited on, the
//! device's deferred deletions for it are flushed, and its allocator is reset.

use crate::rhi::handle::{CommandAllocatorHandle, CommandListHandle, FenceHandle, SemaphoreHandle, SwapchainHandle};
use crate::rhi::rhi_enums::{QueueType, RhiError};
use crate::rhi::rhi_structs::{CommandAllocatorCreateInfo, FenceCreateInfo, SubmitInfo};
use crate::rhi::rhi_traits::Device;

/// How many frames may be in flight at once.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// The command memory and sync state of one ring slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord {
    /// Allocator all of this frame's command lists come from.
    pub command_allocator: CommandAllocatorHandle,

    /// Signaled when this frame's submission finishes on the GPU.
    pub fence: FenceHandle,

    /// Signaled by the swapchain acquire, waited by this frame's submit.
    pub image_available: SemaphoreHandle,

    /// Signaled by this frame's submit, waited by present.
    pub render_done: SemaphoreHandle,
}

/// Rotates the per-frame ring and drives the fence/reset/flush discipline.
pub struct FrameContext {
    frames: Vec<FrameRecord>,
    current: usize,
    frame_count: u64,
}

impl FrameContext {
    /// Creates the ring, building each slot's allocator, fence and semaphores on `device`.
    ///
    /// Fences start signaled so the first pass over the ring doesn't block on work that was
    /// never submitted.
    pub fn new<D: Device>(device: &mut D) -> Result<Self, RhiError> {
        let mut frames = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            frames.push(FrameRecord {
                command_allocator: device.create_command_allocator(CommandAllocatorCreateInfo {
                    queue_type: QueueType::Graphics,
                })?,
                fence: device.create_fence(FenceCreateInfo { signaled: true })?,
                image_available: device.create_semaphore()?,
                render_done: device.create_semaphore()?,
            });
        }

        Ok(FrameContext {
            frames,
            // One before the first slot, so the first advance lands on 0.
            current: FRAMES_IN_FLIGHT - 1,
            frame_count: 0,
        })
    }

    /// Starts the next frame: advances the ring, waits on the slot's fence, flushes the
    /// device's retired deletions, and resets the slot's command allocator.
    pub fn begin_frame<D: Device>(&mut self, device: &mut D) -> Result<FrameRecord, RhiError> {
        self.current = (self.current + 1) % FRAMES_IN_FLIGHT;
        self.frame_count += 1;

        let frame = self.frames[self.current];
        device.wait_for_fence(frame.fence)?;
        device.flush_deferred();
        device.reset_command_allocator(frame.command_allocator)?;

        Ok(frame)
    }

    /// The slot currently being recorded.
    pub fn current(&self) -> FrameRecord {
        self.frames[self.current]
    }

    /// Index of the slot currently being recorded.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Index of the previously recorded slot, if a previous frame exists.
    pub fn previous_index(&self) -> Option<usize> {
        if self.frame_count < 2 {
            None
        } else {
            Some((self.current + FRAMES_IN_FLIGHT - 1) % FRAMES_IN_FLIGHT)
        }
    }

    /// Number of frames begun so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Lazily acquires the frame's swapchain image, signaling the frame's image-available
    /// semaphore.
    pub fn acquire_image<D: Device>(&self, device: &mut D, swapchain: SwapchainHandle) -> Result<u32, RhiError> {
        device.acquire_next_image(swapchain, self.current().image_available)
    }

    /// Submits the frame's command lists on the graphics queue: waits image-available,
    /// signals render-done, signals the frame's fence.
    pub fn submit_frame<D: Device>(
        &self,
        device: &mut D,
        command_lists: Vec<CommandListHandle>,
    ) -> Result<(), RhiError> {
        let frame = self.current();
        device.queue_wait(QueueType::Graphics, frame.image_available)?;
        device.queue_signal(QueueType::Graphics, frame.render_done)?;
        device.submit(
            SubmitInfo {
                queue_type: QueueType::Graphics,
                command_lists,
            },
            Some(frame.fence),
        )
    }

    /// Presents the frame, waiting on its render-done semaphore.
    pub fn present_frame<D: Device>(&self, device: &mut D, swapchain: SwapchainHandle) -> Result<(), RhiError> {
        device.present(swapchain, &[self.current().render_done])
    }

    /// Destroys every slot's objects. Call after a full device wait.
    pub fn destroy<D: Device>(self, device: &mut D) -> Result<(), RhiError> {
        for frame in self.frames {
            device.destroy_command_allocator(frame.command_allocator)?;
            device.destroy_fence(frame.fence)?;
            device.destroy_semaphore(frame.image_available)?;
            device.destroy_semaphore(frame.render_done)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::command::CommandList;
    use crate::rhi::handle::*;
    use crate::rhi::rhi_enums::*;
    use crate::rhi::rhi_structs::*;
    use crate::rhi::rhi_traits::{Device, GraphicsApi, ShaderCompiler};
    use crate::surface::{RawWindowHandle, Surface};

    /// What the mock device saw, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        WaitFence(FenceHandle),
        FlushDeferred,
        ResetAllocator(CommandAllocatorHandle),
        Submit { fence: Option<FenceHandle> },
    }

    /// A device that mints fake handles and records the calls the orchestrator makes.
    #[derive(Default)]
    struct MockDevice {
        next_id: u32,
        events: Vec<Event>,
    }

    impl MockDevice {
        fn mint<T>(&mut self) -> Handle<T> {
            self.next_id += 1;
            Handle::new(self.next_id, 1)
        }
    }

    struct NullCompiler;

    impl ShaderCompiler for NullCompiler {
        fn compile(&mut self, _: &ShaderCompileInfo) -> Result<Vec<u8>, RhiError> {
            unimplemented!()
        }

        fn reflect(&self, _: &[u8]) -> Result<Vec<ShaderBindingReflection>, RhiError> {
            unimplemented!()
        }
    }

    impl Device for MockDevice {
        type ShaderCompiler = NullCompiler;

        fn create_shader_compiler(&self) -> Result<NullCompiler, RhiError> {
            unimplemented!()
        }

        fn create_buffer(&mut self, _: BufferCreateInfo) -> Result<BufferHandle, RhiError> {
            unimplemented!()
        }

        fn create_image(&mut self, _: ImageCreateInfo) -> Result<ImageHandle, RhiError> {
            unimplemented!()
        }

        fn create_image_view(&mut self, _: ImageViewCreateInfo) -> Result<ImageViewHandle, RhiError> {
            unimplemented!()
        }

        fn create_sampler(&mut self, _: SamplerCreateInfo) -> Result<SamplerHandle, RhiError> {
            unimplemented!()
        }

        fn create_shader_module(&mut self, _: ShaderModuleCreateInfo) -> Result<ShaderModuleHandle, RhiError> {
            unimplemented!()
        }

        fn create_bind_group_layout(
            &mut self,
            _: BindGroupLayoutCreateInfo,
        ) -> Result<BindGroupLayoutHandle, RhiError> {
            unimplemented!()
        }

        fn create_bind_group(&mut self, _: BindGroupCreateInfo) -> Result<BindGroupHandle, RhiError> {
            unimplemented!()
        }

        fn write_bind_group(&mut self, _: BindGroupHandle, _: Vec<BindGroupWrite>) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn create_pipeline_layout(&mut self, _: PipelineLayoutCreateInfo) -> Result<PipelineLayoutHandle, RhiError> {
            unimplemented!()
        }

        fn create_graphics_pipeline(&mut self, _: GraphicsPipelineCreateInfo) -> Result<PipelineHandle, RhiError> {
            unimplemented!()
        }

        fn create_semaphore(&mut self) -> Result<SemaphoreHandle, RhiError> {
            Ok(self.mint())
        }

        fn create_fence(&mut self, _: FenceCreateInfo) -> Result<FenceHandle, RhiError> {
            Ok(self.mint())
        }

        fn create_command_allocator(
            &mut self,
            _: CommandAllocatorCreateInfo,
        ) -> Result<CommandAllocatorHandle, RhiError> {
            Ok(self.mint())
        }

        fn create_command_list(&mut self, _: CommandListCreateInfo) -> Result<CommandListHandle, RhiError> {
            unimplemented!()
        }

        fn create_swapchain(
            &mut self,
            _: &mut dyn Surface<RawWindowHandle>,
            _: SwapchainCreateInfo,
        ) -> Result<SwapchainHandle, RhiError> {
            unimplemented!()
        }

        fn command_list_mut(&mut self, _: CommandListHandle) -> Result<&mut CommandList, RhiError> {
            unimplemented!()
        }

        fn reset_command_allocator(&mut self, allocator: CommandAllocatorHandle) -> Result<(), RhiError> {
            self.events.push(Event::ResetAllocator(allocator));
            Ok(())
        }

        fn destroy_buffer(&mut self, _: BufferHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_image(&mut self, _: ImageHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_image_view(&mut self, _: ImageViewHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_sampler(&mut self, _: SamplerHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_shader_module(&mut self, _: ShaderModuleHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_bind_group_layout(&mut self, _: BindGroupLayoutHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_bind_group(&mut self, _: BindGroupHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_pipeline_layout(&mut self, _: PipelineLayoutHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_pipeline(&mut self, _: PipelineHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_semaphore(&mut self, _: SemaphoreHandle) -> Result<(), RhiError> {
            Ok(())
        }

        fn destroy_fence(&mut self, _: FenceHandle) -> Result<(), RhiError> {
            Ok(())
        }

        fn destroy_command_allocator(&mut self, _: CommandAllocatorHandle) -> Result<(), RhiError> {
            Ok(())
        }

        fn destroy_command_list(&mut self, _: CommandListHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn destroy_swapchain(&mut self, _: SwapchainHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn flush_deferred(&mut self) {
            self.events.push(Event::FlushDeferred);
        }

        fn map(&mut self, _: BufferHandle) -> Result<*mut u8, RhiError> {
            unimplemented!()
        }

        fn unmap(&mut self, _: BufferHandle) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn wait_for_fence(&mut self, fence: FenceHandle) -> Result<(), RhiError> {
            self.events.push(Event::WaitFence(fence));
            Ok(())
        }

        fn wait_queue_idle(&mut self, _: QueueType) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn wait_idle(&mut self) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn queue_wait(&mut self, _: QueueType, _: SemaphoreHandle) -> Result<(), RhiError> {
            Ok(())
        }

        fn queue_signal(&mut self, _: QueueType, _: SemaphoreHandle) -> Result<(), RhiError> {
            Ok(())
        }

        fn submit(&mut self, _: SubmitInfo, signal_fence: Option<FenceHandle>) -> Result<(), RhiError> {
            self.events.push(Event::Submit { fence: signal_fence });
            Ok(())
        }

        fn submit_immediate(&mut self, _: SubmitInfo) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn swapchain_image_index(&mut self, _: SwapchainHandle) -> Result<u32, RhiError> {
            unimplemented!()
        }

        fn acquire_next_image(&mut self, _: SwapchainHandle, _: SemaphoreHandle) -> Result<u32, RhiError> {
            unimplemented!()
        }

        fn swapchain_image(&self, _: SwapchainHandle, _: u32) -> Result<ImageHandle, RhiError> {
            unimplemented!()
        }

        fn resize_swapchain(&mut self, _: SwapchainHandle, _: SwapchainCreateInfo) -> Result<(), RhiError> {
            unimplemented!()
        }

        fn present(&mut self, _: SwapchainHandle, _: &[SemaphoreHandle]) -> Result<(), RhiError> {
            unimplemented!()
        }
    }

    /// `GraphicsApi` impl so the mock exercises the same seams a backend does.
    struct MockApi;

    impl GraphicsApi for MockApi {
        type Device = MockDevice;

        fn enumerate_adapters(&mut self) -> Result<Vec<AdapterDesc>, RhiError> {
            Ok(vec![AdapterDesc {
                index: 0,
                name: "mock".to_string(),
                kind: AdapterKind::Other,
            }])
        }

        fn create_device(&mut self, _: u32) -> Result<MockDevice, RhiError> {
            Ok(MockDevice::default())
        }
    }

    #[test]
    fn ring_advances_and_wraps() {
        let mut device = MockApi.create_device(0).unwrap();
        let mut frames = FrameContext::new(&mut device).unwrap();

        assert_eq!(frames.frame_count(), 0);
        assert_eq!(frames.previous_index(), None);

        frames.begin_frame(&mut device).unwrap();
        assert_eq!(frames.current_index(), 0);
        assert_eq!(frames.previous_index(), None);

        frames.begin_frame(&mut device).unwrap();
        assert_eq!(frames.current_index(), 1);
        assert_eq!(frames.previous_index(), Some(0));

        frames.begin_frame(&mut device).unwrap();
        assert_eq!(frames.current_index(), 0);
        assert_eq!(frames.previous_index(), Some(1));
    }

    #[test]
    fn begin_frame_waits_then_flushes_then_resets() {
        let mut device = MockApi.create_device(0).unwrap();
        let mut frames = FrameContext::new(&mut device).unwrap();

        let frame = frames.begin_frame(&mut device).unwrap();
        assert_eq!(
            device.events,
            vec![
                Event::WaitFence(frame.fence),
                Event::FlushDeferred,
                Event::ResetAllocator(frame.command_allocator),
            ]
        );
    }

    #[test]
    fn slot_reuse_waits_on_the_fence_submitted_frames_in_flight_ago() {
        let mut device = MockApi.create_device(0).unwrap();
        let mut frames = FrameContext::new(&mut device).unwrap();

        let mut submitted = Vec::new();
        for _ in 0..FRAMES_IN_FLIGHT + 1 {
            let frame = frames.begin_frame(&mut device).unwrap();
            frames.submit_frame(&mut device, Vec::new()).unwrap();
            submitted.push(frame.fence);
        }

        // The last begin_frame reused the first slot: it must have waited on the fence the
        // first frame's submit signaled.
        let waits: Vec<&Event> = device
            .events
            .iter()
            .filter(|event| matches!(event, Event::WaitFence(_)))
            .collect();
        assert_eq!(waits[FRAMES_IN_FLIGHT], &Event::WaitFence(submitted[0]));

        // And the wait happened after that submit, not before.
        let submit_position = device
            .events
            .iter()
            .position(|event| matches!(event, Event::Submit { fence: Some(f) } if *f == submitted[0]))
            .unwrap();
        let wait_position = device
            .events
            .iter()
            .rposition(|event| *event == Event::WaitFence(submitted[0]))
            .unwrap();
        assert!(wait_position > submit_position);
    }

    #[test]
    fn submit_frame_signals_the_current_fence() {
        let mut device = MockApi.create_device(0).unwrap();
        let mut frames = FrameContext::new(&mut device).unwrap();

        let frame = frames.begin_frame(&mut device).unwrap();
        frames.submit_frame(&mut device, Vec::new()).unwrap();

        assert!(device
            .events
            .contains(&Event::Submit { fence: Some(frame.fence) }));
    }
}
