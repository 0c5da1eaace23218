#![allow(unsafe_code)]

//! Swapchain state: the surface, the driver image ring, and the lazy-acquire bookkeeping.

use crate::rhi::vulkan::vulkan_conversions::map_vk_result;
use crate::rhi::{Format, ImageHandle, ImageUsageFlags, PresentMode, RhiError};

use ash::extensions::khr;
use ash::vk;
use cgmath::Vector2;

/// Whether an image is currently acquired, and which semaphore the acquire signaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingAcquire {
    /// No image held; the next use acquires one.
    None,
    /// Acquired through the swapchain's internal semaphore; present must wait it, since
    /// nothing else will consume the signal.
    Internal(u32),
    /// Acquired through a caller-provided semaphore; the caller's submit consumes the signal
    /// and present only waits what the caller passes in.
    External(u32),
}

impl PendingAcquire {
    pub fn image_index(self) -> Option<u32> {
        match self {
            PendingAcquire::None => None,
            PendingAcquire::Internal(index) | PendingAcquire::External(index) => Some(index),
        }
    }
}

/// One swapchain: a platform surface plus the driver-owned ring of presentable images.
pub(crate) struct VulkanSwapchain {
    pub surface: vk::SurfaceKHR,
    pub swapchain: vk::SwapchainKHR,
    pub format: Format,
    pub extent: Vector2<u32>,
    pub usage: ImageUsageFlags,
    pub present_mode: PresentMode,
    /// Signaled by acquires that no caller semaphore was supplied for.
    pub image_available: vk::Semaphore,
    /// Handles of the driver-owned images, minted into the device's image pool.
    pub images: Vec<ImageHandle>,
    pub acquire: PendingAcquire,
}

impl VulkanSwapchain {
    /// Returns the current image index, acquiring a new image if none is held.
    ///
    /// A lazily triggered acquire signals `semaphore`; `external` records whose semaphore
    /// that was so present knows whether the signal still needs consuming.
    pub fn acquire_if_needed(
        &mut self,
        loader: &khr::Swapchain,
        semaphore: vk::Semaphore,
        external: bool,
    ) -> Result<u32, RhiError> {
        if let Some(index) = self.acquire.image_index() {
            return Ok(index);
        }

        let (index, suboptimal) = unsafe {
            loader.acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
        .map_err(map_vk_result)?;
        if suboptimal {
            log::warn!("Acquired image from a suboptimal swapchain");
        }

        self.acquire = if external {
            PendingAcquire::External(index)
        } else {
            PendingAcquire::Internal(index)
        };
        Ok(index)
    }

    /// Queue-presents the held image, waiting `wait_semaphores` plus the internal semaphore
    /// when the pending acquire signaled it. Flags the swapchain to acquire again on next use.
    ///
    /// A suboptimal present logs a warning and succeeds; any other non-success is returned.
    pub fn present(
        &mut self,
        loader: &khr::Swapchain,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<(), RhiError> {
        // Nothing acquired yet: acquire with the internal semaphore so the present below has
        // an image and a signal to wait on.
        let image_index = match self.acquire.image_index() {
            Some(index) => index,
            None => self.acquire_if_needed(loader, self.image_available, false)?,
        };

        let mut waits = Vec::with_capacity(wait_semaphores.len() + 1);
        if let PendingAcquire::Internal(_) = self.acquire {
            waits.push(self.image_available);
        }
        waits.extend_from_slice(wait_semaphores);

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { loader.queue_present(queue, &present_info) } {
            Ok(false) => {}
            Ok(true) => log::warn!("Swapchain is suboptimal"),
            Err(vk::Result::SUBOPTIMAL_KHR) => log::warn!("Swapchain is suboptimal"),
            Err(result) => return Err(map_vk_result(result)),
        }

        self.acquire = PendingAcquire::None;
        Ok(())
    }
}
