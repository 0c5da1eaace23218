#![allow(unsafe_code)]

//! Queue submission state.
//!
//! One `VulkanQueue` exists per distinct queue family. Semaphore waits and signals batched
//! onto a queue apply to its next submit only; the submit flushes them along with the command
//! buffers and clears the pending lists.

use crate::rhi::vulkan::vulkan_conversions::map_vk_result;
use crate::rhi::RhiError;

use ash::vk;

pub(crate) struct VulkanQueue {
    queue: vk::Queue,
    family_index: u32,
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signal_semaphores: Vec<vk::Semaphore>,
}

impl VulkanQueue {
    pub fn new(queue: vk::Queue, family_index: u32) -> Self {
        VulkanQueue {
            queue,
            family_index,
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            signal_semaphores: Vec::new(),
        }
    }

    pub fn vk_queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Enqueues a wait for the next submit. The wait blocks all commands; deriving a tighter
    /// stage mask would need knowledge of what the semaphore guards, which the RHI doesn't
    /// track.
    pub fn add_wait(&mut self, semaphore: vk::Semaphore) {
        self.wait_semaphores.push(semaphore);
        self.wait_stages.push(vk::PipelineStageFlags::ALL_COMMANDS);
    }

    /// Enqueues a signal for the next submit.
    pub fn add_signal(&mut self, semaphore: vk::Semaphore) {
        self.signal_semaphores.push(semaphore);
    }

    /// Submits `command_buffers` together with every pending wait and signal, then clears the
    /// pending lists. `fence` may be null.
    pub fn submit(
        &mut self,
        device: &ash::Device,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&self.wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&self.signal_semaphores)
            .build();

        let result = unsafe { device.queue_submit(self.queue, &[submit_info], fence) };

        self.wait_semaphores.clear();
        self.wait_stages.clear();
        self.signal_semaphores.clear();

        result.map_err(map_vk_result)
    }

    /// Blocks the host until this queue has drained.
    pub fn wait_idle(&self, device: &ash::Device) -> Result<(), RhiError> {
        unsafe { device.queue_wait_idle(self.queue) }.map_err(map_vk_result)
    }
}
