#![allow(unsafe_code)]

//! The Vulkan realization of [`Device`].
//!
//! Owns the logical device, one queue per distinct family, the typed resource pools, the
//! layout caches, and the deferred-deletion ring. Every handle the outside world holds
//! resolves through the pools here; the driver objects themselves never leave this module.

use crate::rhi::vulkan::vulkan_command::VulkanCommandAllocator;
use crate::rhi::vulkan::vulkan_conversions::*;
use crate::rhi::vulkan::vulkan_memory;
use crate::rhi::vulkan::vulkan_queue::VulkanQueue;
use crate::rhi::vulkan::vulkan_shader::VulkanShaderCompiler;
use crate::rhi::vulkan::vulkan_swapchain::{PendingAcquire, VulkanSwapchain};
use crate::rhi::*;
use crate::surface::{RawWindowHandle, Surface};

use ash::extensions::khr;
use ash::vk;
use std::ffi::CString;

/// How many descriptors of each kind the device-internal descriptor pool holds.
const DESCRIPTOR_POOL_CAPACITY: u32 = 1024;

#[derive(Debug, Clone, Copy)]
pub(crate) struct VulkanQueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl VulkanQueueFamilies {
    pub fn get(&self, queue_type: QueueType) -> u32 {
        match queue_type {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }

    /// The distinct family indices, sorted. Sharing-mode decisions and queue construction
    /// both key off this list.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.compute, self.transfer];
        families.sort_unstable();
        families.dedup();
        families
    }
}

pub(crate) struct BufferRecord {
    pub vk_buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub usage: BufferUsageFlags,
    pub host_visible: bool,
    pub mapped: bool,
}

pub(crate) struct ImageRecord {
    pub vk_image: vk::Image,
    /// `None` for swapchain-owned images; the driver owns their memory.
    pub memory: Option<vk::DeviceMemory>,
    pub format: Format,
    pub extent: vk::Extent3D,
    pub usage: ImageUsageFlags,
}

pub(crate) struct BindGroupLayoutRecord {
    pub vk_layout: vk::DescriptorSetLayout,
    /// Bindings sorted by binding index; bind-group validation walks this.
    pub bindings: Vec<BindGroupLayoutBinding>,
    pub hash: u64,
}

pub(crate) struct BindGroupRecord {
    pub vk_set: vk::DescriptorSet,
    pub layout: BindGroupLayoutHandle,
}

pub(crate) struct PipelineLayoutRecord {
    pub vk_layout: vk::PipelineLayout,
    pub hash: u64,
}

/// A driver object whose handle is already stale, parked until its frame retires.
pub(crate) enum DeferredRelease {
    Buffer { buffer: vk::Buffer, memory: vk::DeviceMemory },
    Image { image: vk::Image, memory: Option<vk::DeviceMemory> },
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    ShaderModule(vk::ShaderModule),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorSet(vk::DescriptorSet),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
    CommandPool(vk::CommandPool),
    Swapchain(vk::SwapchainKHR),
    SurfaceKhr(vk::SurfaceKHR),
}

/// A logical Vulkan device and everything it minted.
pub struct VulkanDevice {
    entry: ash::Entry,
    instance: ash::Instance,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,

    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
    dynamic_rendering_loader: khr::DynamicRendering,

    queue_families: VulkanQueueFamilies,
    queues: Vec<VulkanQueue>,

    descriptor_pool: vk::DescriptorPool,

    buffers: ResourcePool<BufferTag, BufferRecord>,
    images: ResourcePool<ImageTag, ImageRecord>,
    image_views: ResourcePool<ImageViewTag, vk::ImageView>,
    samplers: ResourcePool<SamplerTag, vk::Sampler>,
    shader_modules: ResourcePool<ShaderModuleTag, vk::ShaderModule>,
    bind_group_layouts: ResourcePool<BindGroupLayoutTag, BindGroupLayoutRecord>,
    bind_groups: ResourcePool<BindGroupTag, BindGroupRecord>,
    pipeline_layouts: ResourcePool<PipelineLayoutTag, PipelineLayoutRecord>,
    pipelines: ResourcePool<PipelineTag, vk::Pipeline>,
    semaphores: ResourcePool<SemaphoreTag, vk::Semaphore>,
    fences: ResourcePool<FenceTag, vk::Fence>,
    command_allocators: ResourcePool<CommandAllocatorTag, VulkanCommandAllocator>,
    command_lists: ResourcePool<CommandListTag, CommandList>,
    swapchains: ResourcePool<SwapchainTag, VulkanSwapchain>,

    bind_group_layout_cache: LayoutCache<BindGroupLayoutHandle>,
    pipeline_layout_cache: LayoutCache<PipelineLayoutHandle>,
    deferred: DeferredQueue<DeferredRelease>,
}

impl VulkanDevice {
    pub(crate) fn new(
        entry: ash::Entry,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_families: VulkanQueueFamilies,
    ) -> Result<VulkanDevice, RhiError> {
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let swapchain_loader = khr::Swapchain::new(&instance, &device);
        let dynamic_rendering_loader = khr::DynamicRendering::new(&instance, &device);

        let queues = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                let queue = unsafe { device.get_device_queue(family, 0) };
                VulkanQueue::new(queue, family)
            })
            .collect();

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: DESCRIPTOR_POOL_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: DESCRIPTOR_POOL_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: DESCRIPTOR_POOL_CAPACITY,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: DESCRIPTOR_POOL_CAPACITY,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(DESCRIPTOR_POOL_CAPACITY)
            .pool_sizes(&pool_sizes);
        let descriptor_pool =
            unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(map_vk_result)?;

        Ok(VulkanDevice {
            entry,
            instance,
            device,
            physical_device,
            memory_properties,
            surface_loader,
            swapchain_loader,
            dynamic_rendering_loader,
            queue_families,
            queues,
            descriptor_pool,
            buffers: ResourcePool::new(),
            images: ResourcePool::new(),
            image_views: ResourcePool::new(),
            samplers: ResourcePool::new(),
            shader_modules: ResourcePool::new(),
            bind_group_layouts: ResourcePool::new(),
            bind_groups: ResourcePool::new(),
            pipeline_layouts: ResourcePool::new(),
            pipelines: ResourcePool::new(),
            semaphores: ResourcePool::new(),
            fences: ResourcePool::new(),
            command_allocators: ResourcePool::new(),
            command_lists: ResourcePool::new(),
            swapchains: ResourcePool::new(),
            bind_group_layout_cache: LayoutCache::new(),
            pipeline_layout_cache: LayoutCache::new(),
            deferred: DeferredQueue::new(FRAMES_IN_FLIGHT),
        })
    }

    pub(crate) fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    pub(crate) fn dynamic_rendering_loader(&self) -> &khr::DynamicRendering {
        &self.dynamic_rendering_loader
    }

    pub(crate) fn buffer_record(&self, handle: BufferHandle) -> Result<&BufferRecord, RhiError> {
        self.buffers.get(handle).ok_or(RhiError::InvalidArgument {
            reason: "stale buffer handle",
        })
    }

    pub(crate) fn image_record(&self, handle: ImageHandle) -> Result<&ImageRecord, RhiError> {
        self.images.get(handle).ok_or(RhiError::InvalidArgument {
            reason: "stale image handle",
        })
    }

    pub(crate) fn vk_buffer(&self, handle: BufferHandle) -> Result<vk::Buffer, RhiError> {
        self.buffer_record(handle).map(|record| record.vk_buffer)
    }

    pub(crate) fn vk_image_view(&self, handle: ImageViewHandle) -> Result<vk::ImageView, RhiError> {
        self.image_views.get(handle).copied().ok_or(RhiError::InvalidArgument {
            reason: "stale image view handle",
        })
    }

    pub(crate) fn vk_pipeline(&self, handle: PipelineHandle) -> Result<vk::Pipeline, RhiError> {
        self.pipelines.get(handle).copied().ok_or(RhiError::InvalidArgument {
            reason: "stale pipeline handle",
        })
    }

    pub(crate) fn vk_pipeline_layout(&self, handle: PipelineLayoutHandle) -> Result<vk::PipelineLayout, RhiError> {
        self.pipeline_layouts
            .get(handle)
            .map(|record| record.vk_layout)
            .ok_or(RhiError::InvalidArgument {
                reason: "stale pipeline layout handle",
            })
    }

    pub(crate) fn vk_bind_group(&self, handle: BindGroupHandle) -> Result<vk::DescriptorSet, RhiError> {
        self.bind_groups
            .get(handle)
            .map(|record| record.vk_set)
            .ok_or(RhiError::InvalidArgument {
                reason: "stale bind group handle",
            })
    }

    fn vk_semaphore(&self, handle: SemaphoreHandle) -> Result<vk::Semaphore, RhiError> {
        self.semaphores.get(handle).copied().ok_or(RhiError::InvalidArgument {
            reason: "stale semaphore handle",
        })
    }

    fn vk_fence(&self, handle: FenceHandle) -> Result<vk::Fence, RhiError> {
        self.fences.get(handle).copied().ok_or(RhiError::InvalidArgument {
            reason: "stale fence handle",
        })
    }

    fn queue_mut(&mut self, queue_type: QueueType) -> &mut VulkanQueue {
        let family = self.queue_families.get(queue_type);
        self.queues
            .iter_mut()
            .find(|queue| queue.family_index() == family)
            .expect("device construction created a queue per unique family")
    }

    fn queue(&self, queue_type: QueueType) -> &VulkanQueue {
        let family = self.queue_families.get(queue_type);
        self.queues
            .iter()
            .find(|queue| queue.family_index() == family)
            .expect("device construction created a queue per unique family")
    }

    #[cfg(windows)]
    fn create_platform_surface(&self, handle: RawWindowHandle) -> Result<vk::SurfaceKHR, RhiError> {
        match handle {
            RawWindowHandle::Win32 { hinstance, hwnd } => {
                let loader = khr::Win32Surface::new(&self.entry, &self.instance);
                let info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance as *const std::ffi::c_void)
                    .hwnd(hwnd as *const std::ffi::c_void);
                unsafe { loader.create_win32_surface(&info, None) }.map_err(map_vk_result)
            }
            _ => Err(RhiError::Unsupported {
                what: "window handles for another platform",
            }),
        }
    }

    #[cfg(all(unix, not(target_os = "android")))]
    fn create_platform_surface(&self, handle: RawWindowHandle) -> Result<vk::SurfaceKHR, RhiError> {
        match handle {
            RawWindowHandle::Xlib { display, window } => {
                let loader = khr::XlibSurface::new(&self.entry, &self.instance);
                let info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(display as *mut vk::Display)
                    .window(window as vk::Window);
                unsafe { loader.create_xlib_surface(&info, None) }.map_err(map_vk_result)
            }
            _ => Err(RhiError::Unsupported {
                what: "window handles for another platform",
            }),
        }
    }

    fn create_vk_swapchain(
        &self,
        surface: vk::SurfaceKHR,
        info: &SwapchainCreateInfo,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<vk::SwapchainKHR, RhiError> {
        if info.extent.x == 0 || info.extent.y == 0 {
            return Err(RhiError::InvalidArgument {
                reason: "swapchain extent must be non-zero",
            });
        }
        if info.image_count == 0 {
            return Err(RhiError::InvalidArgument {
                reason: "swapchain image count must be non-zero",
            });
        }

        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, surface)
        }
        .map_err(map_vk_result)?;

        if info.image_count < capabilities.min_image_count {
            return Err(RhiError::InvalidArgument {
                reason: "swapchain image count is below the surface minimum",
            });
        }
        if capabilities.max_image_count != 0 && info.image_count > capabilities.max_image_count {
            return Err(RhiError::InvalidArgument {
                reason: "swapchain image count exceeds the surface maximum",
            });
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(info.image_count)
            .image_format(to_vk_format(info.format))
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(vk::Extent2D {
                width: info.extent.x,
                height: info.extent.y,
            })
            .image_array_layers(1)
            .image_usage(to_vk_image_usage(info.usage))
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(to_vk_present_mode(info.present_mode))
            .clipped(true)
            .old_swapchain(old_swapchain);

        unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }.map_err(map_vk_result)
    }

    /// Mints image handles for the driver-owned images of a swapchain.
    fn register_swapchain_images(
        &mut self,
        swapchain: vk::SwapchainKHR,
        info: &SwapchainCreateInfo,
    ) -> Result<Vec<ImageHandle>, RhiError> {
        let vk_images =
            unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }.map_err(map_vk_result)?;

        Ok(vk_images
            .into_iter()
            .map(|vk_image| {
                self.images.insert(ImageRecord {
                    vk_image,
                    memory: None,
                    format: info.format,
                    extent: vk::Extent3D {
                        width: info.extent.x,
                        height: info.extent.y,
                        depth: 1,
                    },
                    usage: info.usage,
                })
            })
            .collect())
    }

    /// Validates a set of bind group writes against the layout's declared bindings.
    fn validate_bindings(
        bindings: &[BindGroupLayoutBinding],
        buffers: &[BufferBinding],
        views: &[ImageViewBinding],
        samplers: &[SamplerBinding],
    ) -> Result<(), RhiError> {
        let declared = |index: u32| bindings.iter().find(|binding| binding.binding == index);

        for buffer in buffers {
            match buffer.descriptor_type {
                DescriptorType::ConstantBuffer | DescriptorType::StorageBuffer => {}
                _ => {
                    return Err(RhiError::InvalidArgument {
                        reason: "buffer binding declared with a non-buffer descriptor type",
                    });
                }
            }
            match declared(buffer.binding) {
                Some(binding) if binding.descriptor_type == buffer.descriptor_type => {}
                Some(_) => {
                    return Err(RhiError::InvalidArgument {
                        reason: "buffer binding kind does not match the layout",
                    });
                }
                None => {
                    return Err(RhiError::InvalidArgument {
                        reason: "buffer binding index is not declared by the layout",
                    });
                }
            }
        }

        for view in views {
            match declared(view.binding) {
                Some(binding) if binding.descriptor_type == DescriptorType::SampledImage => {}
                Some(_) => {
                    return Err(RhiError::InvalidArgument {
                        reason: "image view bound to a non-image binding",
                    });
                }
                None => {
                    return Err(RhiError::InvalidArgument {
                        reason: "image view binding index is not declared by the layout",
                    });
                }
            }
        }

        for sampler in samplers {
            match declared(sampler.binding) {
                Some(binding) if binding.descriptor_type == DescriptorType::Sampler => {}
                Some(_) => {
                    return Err(RhiError::InvalidArgument {
                        reason: "sampler bound to a non-sampler binding",
                    });
                }
                None => {
                    return Err(RhiError::InvalidArgument {
                        reason: "sampler binding index is not declared by the layout",
                    });
                }
            }
        }

        Ok(())
    }

    /// Writes the given resources into `set`. Callers have already validated against the
    /// layout.
    fn write_descriptors(
        &self,
        set: vk::DescriptorSet,
        buffers: &[BufferBinding],
        views: &[ImageViewBinding],
        samplers: &[SamplerBinding],
    ) -> Result<(), RhiError> {
        let mut buffer_infos = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            buffer_infos.push(vk::DescriptorBufferInfo {
                buffer: self.vk_buffer(buffer.buffer)?,
                offset: buffer.offset,
                range: buffer.size,
            });
        }

        let mut image_infos = Vec::with_capacity(views.len() + samplers.len());
        for view in views {
            image_infos.push(vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: self.vk_image_view(view.image_view)?,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            });
        }
        for sampler in samplers {
            image_infos.push(vk::DescriptorImageInfo {
                sampler: self.samplers.get(sampler.sampler).copied().ok_or(
                    RhiError::InvalidArgument {
                        reason: "stale sampler handle",
                    },
                )?,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            });
        }

        let mut writes = Vec::with_capacity(buffers.len() + views.len() + samplers.len());
        for (index, buffer) in buffers.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(buffer.binding)
                    .descriptor_type(to_vk_descriptor_type(buffer.descriptor_type))
                    .buffer_info(std::slice::from_ref(&buffer_infos[index]))
                    .build(),
            );
        }
        for (index, view) in views.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(view.binding)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(std::slice::from_ref(&image_infos[index]))
                    .build(),
            );
        }
        for (index, sampler) in samplers.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(sampler.binding)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(std::slice::from_ref(&image_infos[views.len() + index]))
                    .build(),
            );
        }

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    /// Checks that every list in `handles` is submittable on `queue_type`, then records each
    /// recorded stream into a fresh driver command buffer from its allocator's pool.
    fn prepare_submission(
        &self,
        queue_type: QueueType,
        handles: &[CommandListHandle],
    ) -> Result<Vec<vk::CommandBuffer>, RhiError> {
        let mut command_buffers = Vec::with_capacity(handles.len());
        for &handle in handles {
            let list = self.command_lists.get(handle).ok_or(RhiError::InvalidArgument {
                reason: "stale command list handle (was its allocator reset?)",
            })?;
            if list.state() != CommandListState::Recorded {
                return Err(RhiError::InvalidArgument {
                    reason: "command list submitted before end()",
                });
            }
            if let Some(error) = list.latent_error() {
                return Err(error.clone());
            }

            let allocator = self
                .command_allocators
                .get(list.allocator())
                .ok_or(RhiError::InvalidArgument {
                    reason: "command list's allocator was destroyed",
                })?;
            if self.queue_families.get(allocator.queue_type) != self.queue_families.get(queue_type) {
                return Err(RhiError::InvalidArgument {
                    reason: "command list was allocated for a different queue family",
                });
            }

            command_buffers.push(self.record_into_pool(allocator.command_pool, list)?);
        }
        Ok(command_buffers)
    }

    fn destroy_deferred_item(&self, item: DeferredRelease) {
        unsafe {
            match item {
                DeferredRelease::Buffer { buffer, memory } => {
                    self.device.destroy_buffer(buffer, None);
                    self.device.free_memory(memory, None);
                }
                DeferredRelease::Image { image, memory } => {
                    self.device.destroy_image(image, None);
                    if let Some(memory) = memory {
                        self.device.free_memory(memory, None);
                    }
                }
                DeferredRelease::ImageView(view) => self.device.destroy_image_view(view, None),
                DeferredRelease::Sampler(sampler) => self.device.destroy_sampler(sampler, None),
                DeferredRelease::ShaderModule(module) => self.device.destroy_shader_module(module, None),
                DeferredRelease::DescriptorSetLayout(layout) => {
                    self.device.destroy_descriptor_set_layout(layout, None)
                }
                DeferredRelease::DescriptorSet(set) => {
                    // Best effort; the pool is drained wholesale at device teardown anyway.
                    let _ = self.device.free_descriptor_sets(self.descriptor_pool, &[set]);
                }
                DeferredRelease::PipelineLayout(layout) => self.device.destroy_pipeline_layout(layout, None),
                DeferredRelease::Pipeline(pipeline) => self.device.destroy_pipeline(pipeline, None),
                DeferredRelease::Semaphore(semaphore) => self.device.destroy_semaphore(semaphore, None),
                DeferredRelease::Fence(fence) => self.device.destroy_fence(fence, None),
                DeferredRelease::CommandPool(pool) => self.device.destroy_command_pool(pool, None),
                DeferredRelease::Swapchain(swapchain) => {
                    self.swapchain_loader.destroy_swapchain(swapchain, None)
                }
                DeferredRelease::SurfaceKhr(surface) => self.surface_loader.destroy_surface(surface, None),
            }
        }
    }
}

impl Device for VulkanDevice {
    type ShaderCompiler = VulkanShaderCompiler;

    fn create_shader_compiler(&self) -> Result<VulkanShaderCompiler, RhiError> {
        VulkanShaderCompiler::new()
    }

    fn create_buffer(&mut self, info: BufferCreateInfo) -> Result<BufferHandle, RhiError> {
        if info.size == 0 {
            return Err(RhiError::InvalidArgument {
                reason: "buffer size must be non-zero",
            });
        }
        if info.usage.is_empty() {
            return Err(RhiError::InvalidArgument {
                reason: "buffer usage must not be empty",
            });
        }

        // Transfer sources are read by the transfer queue while the graphics queue may still
        // own them, so they get concurrent sharing when the families actually differ.
        let unique_families = self.queue_families.unique();
        let concurrent = info.usage.contains(BufferUsageFlags::TRANSFER_SRC) && unique_families.len() > 1;

        let shared_families: &[u32] = if concurrent { &unique_families } else { &[] };
        let create_info = vk::BufferCreateInfo::builder()
            .size(info.size)
            .usage(to_vk_buffer_usage(info.usage))
            .sharing_mode(if concurrent {
                vk::SharingMode::CONCURRENT
            } else {
                vk::SharingMode::EXCLUSIVE
            })
            .queue_family_indices(shared_families);

        let vk_buffer = unsafe { self.device.create_buffer(&create_info, None) }.map_err(map_vk_result)?;
        let memory = vulkan_memory::allocate_buffer_memory(
            &self.device,
            &self.memory_properties,
            vk_buffer,
            info.host_visible,
        )
        .map_err(|error| {
            unsafe { self.device.destroy_buffer(vk_buffer, None) };
            error
        })?;

        Ok(self.buffers.insert(BufferRecord {
            vk_buffer,
            memory,
            size: info.size,
            usage: info.usage,
            host_visible: info.host_visible,
            mapped: false,
        }))
    }

    fn create_image(&mut self, info: ImageCreateInfo) -> Result<ImageHandle, RhiError> {
        if info.format == Format::Unknown {
            return Err(RhiError::InvalidArgument {
                reason: "image format must be known",
            });
        }
        if info.width == 0 || info.height == 0 || info.depth == 0 {
            return Err(RhiError::InvalidArgument {
                reason: "image extent must be non-zero",
            });
        }
        if info.mip_levels == 0 || info.array_layers == 0 {
            return Err(RhiError::InvalidArgument {
                reason: "image mip and layer counts must be non-zero",
            });
        }
        if info.sample_count == 0 || !info.sample_count.is_power_of_two() {
            return Err(RhiError::InvalidArgument {
                reason: "image sample count must be a power of two",
            });
        }
        if info.usage.is_empty() {
            return Err(RhiError::InvalidArgument {
                reason: "image usage must not be empty",
            });
        }

        let extent = vk::Extent3D {
            width: info.width,
            height: info.height,
            depth: info.depth,
        };
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(to_vk_image_type(info.image_type))
            .format(to_vk_format(info.format))
            .extent(extent)
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(vk::SampleCountFlags::from_raw(info.sample_count))
            .tiling(to_vk_tiling(info.tiling))
            .usage(to_vk_image_usage(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let vk_image = unsafe { self.device.create_image(&create_info, None) }.map_err(map_vk_result)?;
        let memory = vulkan_memory::allocate_image_memory(
            &self.device,
            &self.memory_properties,
            vk_image,
            info.host_visible,
        )
        .map_err(|error| {
            unsafe { self.device.destroy_image(vk_image, None) };
            error
        })?;

        Ok(self.images.insert(ImageRecord {
            vk_image,
            memory: Some(memory),
            format: info.format,
            extent,
            usage: info.usage,
        }))
    }

    fn create_image_view(&mut self, info: ImageViewCreateInfo) -> Result<ImageViewHandle, RhiError> {
        let vk_image = self.image_record(info.image)?.vk_image;
        if info.format == Format::Unknown {
            return Err(RhiError::InvalidArgument {
                reason: "image view format must be known",
            });
        }

        let create_info = vk::ImageViewCreateInfo::builder()
            .image(vk_image)
            .view_type(to_vk_image_view_type(info.view_type))
            .format(to_vk_format(info.format))
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(format_aspect_mask(info.format))
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS)
                    .build(),
            );

        let view = unsafe { self.device.create_image_view(&create_info, None) }.map_err(map_vk_result)?;
        Ok(self.image_views.insert(view))
    }

    fn create_sampler(&mut self, info: SamplerCreateInfo) -> Result<SamplerHandle, RhiError> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(to_vk_filter(info.filter))
            .min_filter(to_vk_filter(info.filter))
            .mipmap_mode(match info.filter {
                Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
                Filter::Linear => vk::SamplerMipmapMode::LINEAR,
            })
            .address_mode_u(to_vk_address_mode(info.address_mode_u))
            .address_mode_v(to_vk_address_mode(info.address_mode_v))
            .address_mode_w(to_vk_address_mode(info.address_mode_w))
            .mip_lod_bias(info.mip_lod_bias)
            .compare_enable(info.compare_op.is_some())
            .compare_op(info.compare_op.map(to_vk_compare_op).unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(info.min_lod)
            .max_lod(info.max_lod)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);

        let sampler = unsafe { self.device.create_sampler(&create_info, None) }.map_err(map_vk_result)?;
        Ok(self.samplers.insert(sampler))
    }

    fn create_shader_module(&mut self, info: ShaderModuleCreateInfo) -> Result<ShaderModuleHandle, RhiError> {
        if info.code.is_empty() || info.code.len() % 4 != 0 {
            return Err(RhiError::InvalidArgument {
                reason: "shader module code must be a non-empty multiple of four bytes",
            });
        }

        let words: Vec<u32> = info
            .code
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

        let module = unsafe { self.device.create_shader_module(&create_info, None) }.map_err(map_vk_result)?;
        Ok(self.shader_modules.insert(module))
    }

    fn create_bind_group_layout(&mut self, info: BindGroupLayoutCreateInfo) -> Result<BindGroupLayoutHandle, RhiError> {
        let mut bindings = info.bindings;
        bindings.sort_by_key(|binding| binding.binding);
        for pair in bindings.windows(2) {
            if pair[0].binding == pair[1].binding {
                return Err(RhiError::InvalidArgument {
                    reason: "duplicate binding index in bind group layout",
                });
            }
        }

        let hash = LayoutCache::<BindGroupLayoutHandle>::hash_key(&bindings);
        if let Some(handle) = self.bind_group_layout_cache.get(hash) {
            log::trace!("Found cached bind group layout");
            return Ok(handle);
        }

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(to_vk_descriptor_type(binding.descriptor_type))
                    .descriptor_count(binding.count)
                    .stage_flags(to_vk_shader_stages(binding.stages))
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);

        let vk_layout =
            unsafe { self.device.create_descriptor_set_layout(&create_info, None) }.map_err(map_vk_result)?;

        let handle = self.bind_group_layouts.insert(BindGroupLayoutRecord {
            vk_layout,
            bindings,
            hash,
        });
        self.bind_group_layout_cache.insert(hash, handle);
        Ok(handle)
    }

    fn create_bind_group(&mut self, info: BindGroupCreateInfo) -> Result<BindGroupHandle, RhiError> {
        let layout_record = self
            .bind_group_layouts
            .get(info.layout)
            .ok_or(RhiError::InvalidArgument {
                reason: "stale bind group layout handle",
            })?;
        VulkanDevice::validate_bindings(&layout_record.bindings, &info.buffers, &info.views, &info.samplers)?;
        let vk_layout = layout_record.vk_layout;

        let set_layouts = [vk_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let vk_set = unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .map_err(map_vk_result)?
            .remove(0);

        self.write_descriptors(vk_set, &info.buffers, &info.views, &info.samplers)?;

        Ok(self.bind_groups.insert(BindGroupRecord {
            vk_set,
            layout: info.layout,
        }))
    }

    fn write_bind_group(&mut self, bind_group: BindGroupHandle, writes: Vec<BindGroupWrite>) -> Result<(), RhiError> {
        let record = self.bind_groups.get(bind_group).ok_or(RhiError::InvalidArgument {
            reason: "stale bind group handle",
        })?;
        let vk_set = record.vk_set;
        let layout = record.layout;

        let mut buffers = Vec::new();
        let mut views = Vec::new();
        let mut samplers = Vec::new();
        for write in writes {
            match write {
                BindGroupWrite::Buffer(binding) => buffers.push(binding),
                BindGroupWrite::ImageView(binding) => views.push(binding),
                BindGroupWrite::Sampler(binding) => samplers.push(binding),
            }
        }

        let layout_record = self.bind_group_layouts.get(layout).ok_or(RhiError::InvalidArgument {
            reason: "bind group's layout was destroyed",
        })?;
        VulkanDevice::validate_bindings(&layout_record.bindings, &buffers, &views, &samplers)?;

        self.write_descriptors(vk_set, &buffers, &views, &samplers)
    }

    fn create_pipeline_layout(&mut self, info: PipelineLayoutCreateInfo) -> Result<PipelineLayoutHandle, RhiError> {
        // The cache key folds in the *content* hash of each referenced layout, so two layout
        // lists with equal contents hit the same entry even through distinct handles.
        let mut layout_hashes = Vec::with_capacity(info.bind_group_layouts.len());
        let mut set_layouts = Vec::with_capacity(info.bind_group_layouts.len());
        for &layout in &info.bind_group_layouts {
            let record = self.bind_group_layouts.get(layout).ok_or(RhiError::InvalidArgument {
                reason: "stale bind group layout handle in pipeline layout",
            })?;
            layout_hashes.push(record.hash);
            set_layouts.push(record.vk_layout);
        }

        let hash = LayoutCache::<PipelineLayoutHandle>::hash_key(&(layout_hashes, &info.push_constant_ranges));
        if let Some(handle) = self.pipeline_layout_cache.get(hash) {
            log::trace!("Found cached pipeline layout");
            return Ok(handle);
        }

        let push_constant_ranges: Vec<vk::PushConstantRange> = info
            .push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: to_vk_shader_stages(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();

        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let vk_layout =
            unsafe { self.device.create_pipeline_layout(&create_info, None) }.map_err(map_vk_result)?;

        let handle = self.pipeline_layouts.insert(PipelineLayoutRecord { vk_layout, hash });
        self.pipeline_layout_cache.insert(hash, handle);
        Ok(handle)
    }

    fn create_graphics_pipeline(&mut self, info: GraphicsPipelineCreateInfo) -> Result<PipelineHandle, RhiError> {
        if info.blend.render_targets.len() != info.render_target_formats.len() {
            return Err(RhiError::InvalidArgument {
                reason: "blend state and render target format counts differ",
            });
        }

        let vk_layout = self.vk_pipeline_layout(info.layout)?;
        let vertex_module = self
            .shader_modules
            .get(info.vertex_shader.module)
            .copied()
            .ok_or(RhiError::InvalidArgument {
                reason: "stale vertex shader module handle",
            })?;
        let fragment_module = self
            .shader_modules
            .get(info.fragment_shader.module)
            .copied()
            .ok_or(RhiError::InvalidArgument {
                reason: "stale fragment shader module handle",
            })?;

        let vertex_entry = CString::new(info.vertex_shader.entry_point.as_str()).map_err(|_| {
            RhiError::InvalidArgument {
                reason: "vertex entry point contains a NUL byte",
            }
        })?;
        let fragment_entry = CString::new(info.fragment_shader.entry_point.as_str()).map_err(|_| {
            RhiError::InvalidArgument {
                reason: "fragment entry point contains a NUL byte",
            }
        })?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(&vertex_entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(&fragment_entry)
                .build(),
        ];

        // Attribute offsets default to a running tightly-packed offset when unspecified;
        // locations are assigned in declaration order across all bindings.
        let mut vertex_bindings = Vec::with_capacity(info.vertex_bindings.len());
        let mut vertex_attributes = Vec::new();
        let mut location = 0u32;
        for (binding_index, binding) in info.vertex_bindings.iter().enumerate() {
            let mut packed_offset = 0u32;
            for attribute in &binding.attributes {
                let offset = attribute.offset.unwrap_or(packed_offset);
                packed_offset = offset + attribute.format.size_bytes();
                vertex_attributes.push(vk::VertexInputAttributeDescription {
                    location,
                    binding: binding_index as u32,
                    format: to_vk_format(attribute.format),
                    offset,
                });
                location += 1;
            }
            vertex_bindings.push(vk::VertexInputBindingDescription {
                binding: binding_index as u32,
                stride: binding.stride,
                input_rate: match binding.input_rate {
                    VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
                    VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
                },
            });
        }

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(to_vk_topology(info.input_assembly.topology))
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic; only the counts are baked in.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(to_vk_polygon_mode(info.rasterizer.fill_mode))
            .cull_mode(to_vk_cull_mode(info.rasterizer.cull_mode))
            .front_face(to_vk_front_face(info.rasterizer.front_face))
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = match &info.depth_stencil {
            Some(state) => vk::PipelineDepthStencilStateCreateInfo::builder()
                .depth_test_enable(state.depth_enable)
                .depth_write_enable(state.depth_write_enable)
                .depth_compare_op(to_vk_compare_op(state.compare_op))
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false),
            None => vk::PipelineDepthStencilStateCreateInfo::builder()
                .depth_test_enable(false)
                .depth_write_enable(false),
        };

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = info
            .blend
            .render_targets
            .iter()
            .map(|target| {
                vk::PipelineColorBlendAttachmentState::builder()
                    .blend_enable(target.blend_enable)
                    .src_color_blend_factor(to_vk_blend_factor(target.src_blend))
                    .dst_color_blend_factor(to_vk_blend_factor(target.dst_blend))
                    .color_blend_op(to_vk_blend_op(target.blend_op))
                    .src_alpha_blend_factor(to_vk_blend_factor(target.src_alpha_blend))
                    .dst_alpha_blend_factor(to_vk_blend_factor(target.dst_alpha_blend))
                    .alpha_blend_op(to_vk_blend_op(target.alpha_blend_op))
                    .color_write_mask(to_vk_color_components(target.color_write_mask))
                    .build()
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments)
            .blend_constants(info.blend.blend_constants);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // No render pass object: the attachment formats ride in through dynamic rendering.
        let color_formats: Vec<vk::Format> =
            info.render_target_formats.iter().map(|&format| to_vk_format(format)).collect();
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(info.depth_format.map(to_vk_format).unwrap_or(vk::Format::UNDEFINED));

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .push_next(&mut rendering_info)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(vk_layout)
            .build();

        let pipeline = match unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        } {
            Ok(mut pipelines) => pipelines.remove(0),
            Err((_, result)) => return Err(map_vk_result(result)),
        };

        Ok(self.pipelines.insert(pipeline))
    }

    fn create_semaphore(&mut self) -> Result<SemaphoreHandle, RhiError> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }.map_err(map_vk_result)?;
        Ok(self.semaphores.insert(semaphore))
    }

    fn create_fence(&mut self, info: FenceCreateInfo) -> Result<FenceHandle, RhiError> {
        let create_info = vk::FenceCreateInfo::builder().flags(if info.signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        });
        let fence = unsafe { self.device.create_fence(&create_info, None) }.map_err(map_vk_result)?;
        Ok(self.fences.insert(fence))
    }

    fn create_command_allocator(
        &mut self,
        info: CommandAllocatorCreateInfo,
    ) -> Result<CommandAllocatorHandle, RhiError> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.queue_families.get(info.queue_type));
        let command_pool =
            unsafe { self.device.create_command_pool(&create_info, None) }.map_err(map_vk_result)?;

        Ok(self.command_allocators.insert(VulkanCommandAllocator {
            command_pool,
            queue_type: info.queue_type,
            lists: Vec::new(),
        }))
    }

    fn create_command_list(&mut self, info: CommandListCreateInfo) -> Result<CommandListHandle, RhiError> {
        if self.command_allocators.get(info.command_allocator).is_none() {
            return Err(RhiError::InvalidArgument {
                reason: "stale command allocator handle",
            });
        }

        let handle = self.command_lists.insert(CommandList::new(info.command_allocator));
        self.command_allocators
            .get_mut(info.command_allocator)
            .expect("allocator checked above")
            .lists
            .push(handle);
        Ok(handle)
    }

    fn create_swapchain(
        &mut self,
        surface: &mut dyn Surface<RawWindowHandle>,
        info: SwapchainCreateInfo,
    ) -> Result<SwapchainHandle, RhiError> {
        let window_handle = surface.platform_object().map_err(|error| {
            log::error!("Surface could not produce its platform object: {}", error);
            RhiError::InvalidArgument {
                reason: "surface could not produce its platform window handles",
            }
        })?;
        let vk_surface = self.create_platform_surface(window_handle)?;

        let supported = unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.physical_device,
                self.queue_families.graphics,
                vk_surface,
            )
        }
        .map_err(map_vk_result)?;
        if !supported {
            unsafe { self.surface_loader.destroy_surface(vk_surface, None) };
            return Err(RhiError::Unsupported {
                what: "presentation from the graphics queue family on this surface",
            });
        }

        let vk_swapchain = match self.create_vk_swapchain(vk_surface, &info, vk::SwapchainKHR::null()) {
            Ok(swapchain) => swapchain,
            Err(error) => {
                unsafe { self.surface_loader.destroy_surface(vk_surface, None) };
                return Err(error);
            }
        };

        let images = match self.register_swapchain_images(vk_swapchain, &info) {
            Ok(images) => images,
            Err(error) => {
                unsafe {
                    self.swapchain_loader.destroy_swapchain(vk_swapchain, None);
                    self.surface_loader.destroy_surface(vk_surface, None);
                }
                return Err(error);
            }
        };
        let image_available = {
            let create_info = vk::SemaphoreCreateInfo::builder();
            unsafe { self.device.create_semaphore(&create_info, None) }.map_err(map_vk_result)?
        };

        Ok(self.swapchains.insert(VulkanSwapchain {
            surface: vk_surface,
            swapchain: vk_swapchain,
            format: info.format,
            extent: info.extent,
            usage: info.usage,
            present_mode: info.present_mode,
            image_available,
            images,
            acquire: PendingAcquire::None,
        }))
    }

    fn command_list_mut(&mut self, command_list: CommandListHandle) -> Result<&mut CommandList, RhiError> {
        self.command_lists
            .get_mut(command_list)
            .ok_or(RhiError::InvalidArgument {
                reason: "stale command list handle (was its allocator reset?)",
            })
    }

    fn reset_command_allocator(&mut self, allocator: CommandAllocatorHandle) -> Result<(), RhiError> {
        let record = self.command_allocators.get_mut(allocator).ok_or(RhiError::InvalidArgument {
            reason: "stale command allocator handle",
        })?;
        let command_pool = record.command_pool;
        let lists = std::mem::replace(&mut record.lists, Vec::new());

        unsafe {
            self.device
                .reset_command_pool(command_pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(map_vk_result)?;

        // Every list allocated from this pool is now invalid; dropping the records makes
        // their handles stale, which is exactly the contract.
        for list in lists {
            let _ = self.command_lists.remove(list);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), RhiError> {
        let record = self.buffers.remove(buffer)?;
        if record.mapped {
            unsafe { self.device.unmap_memory(record.memory) };
        }
        self.deferred.push(DeferredRelease::Buffer {
            buffer: record.vk_buffer,
            memory: record.memory,
        });
        Ok(())
    }

    fn destroy_image(&mut self, image: ImageHandle) -> Result<(), RhiError> {
        if let Some(record) = self.images.get(image) {
            if record.memory.is_none() {
                return Err(RhiError::InvalidArgument {
                    reason: "swapchain images are driver-owned and cannot be destroyed",
                });
            }
        }
        let record = self.images.remove(image)?;
        self.deferred.push(DeferredRelease::Image {
            image: record.vk_image,
            memory: record.memory,
        });
        Ok(())
    }

    fn destroy_image_view(&mut self, image_view: ImageViewHandle) -> Result<(), RhiError> {
        let view = self.image_views.remove(image_view)?;
        self.deferred.push(DeferredRelease::ImageView(view));
        Ok(())
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) -> Result<(), RhiError> {
        let vk_sampler = self.samplers.remove(sampler)?;
        self.deferred.push(DeferredRelease::Sampler(vk_sampler));
        Ok(())
    }

    fn destroy_shader_module(&mut self, shader_module: ShaderModuleHandle) -> Result<(), RhiError> {
        let module = self.shader_modules.remove(shader_module)?;
        self.deferred.push(DeferredRelease::ShaderModule(module));
        Ok(())
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) -> Result<(), RhiError> {
        let record = self.bind_group_layouts.remove(layout)?;
        self.bind_group_layout_cache.remove(record.hash);
        self.deferred.push(DeferredRelease::DescriptorSetLayout(record.vk_layout));
        Ok(())
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) -> Result<(), RhiError> {
        let record = self.bind_groups.remove(bind_group)?;
        self.deferred.push(DeferredRelease::DescriptorSet(record.vk_set));
        Ok(())
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) -> Result<(), RhiError> {
        let record = self.pipeline_layouts.remove(layout)?;
        self.pipeline_layout_cache.remove(record.hash);
        self.deferred.push(DeferredRelease::PipelineLayout(record.vk_layout));
        Ok(())
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), RhiError> {
        let vk_pipeline = self.pipelines.remove(pipeline)?;
        self.deferred.push(DeferredRelease::Pipeline(vk_pipeline));
        Ok(())
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) -> Result<(), RhiError> {
        let vk_semaphore = self.semaphores.remove(semaphore)?;
        self.deferred.push(DeferredRelease::Semaphore(vk_semaphore));
        Ok(())
    }

    fn destroy_fence(&mut self, fence: FenceHandle) -> Result<(), RhiError> {
        let vk_fence = self.fences.remove(fence)?;
        self.deferred.push(DeferredRelease::Fence(vk_fence));
        Ok(())
    }

    fn destroy_command_allocator(&mut self, allocator: CommandAllocatorHandle) -> Result<(), RhiError> {
        let record = self.command_allocators.remove(allocator)?;
        for list in record.lists {
            let _ = self.command_lists.remove(list);
        }
        self.deferred.push(DeferredRelease::CommandPool(record.command_pool));
        Ok(())
    }

    fn destroy_command_list(&mut self, command_list: CommandListHandle) -> Result<(), RhiError> {
        let list = self.command_lists.remove(command_list)?;
        if let Some(allocator) = self.command_allocators.get_mut(list.allocator()) {
            allocator.lists.retain(|&handle| handle != command_list);
        }
        Ok(())
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> Result<(), RhiError> {
        let record = self.swapchains.remove(swapchain)?;
        for image in record.images {
            let _ = self.images.remove(image);
        }
        self.deferred.push(DeferredRelease::Semaphore(record.image_available));
        self.deferred.push(DeferredRelease::Swapchain(record.swapchain));
        self.deferred.push(DeferredRelease::SurfaceKhr(record.surface));
        Ok(())
    }

    fn flush_deferred(&mut self) {
        for item in self.deferred.flush() {
            self.destroy_deferred_item(item);
        }
    }

    fn map(&mut self, buffer: BufferHandle) -> Result<*mut u8, RhiError> {
        let record = self.buffers.get_mut(buffer).ok_or(RhiError::InvalidArgument {
            reason: "stale buffer handle",
        })?;
        if !record.host_visible {
            return Err(RhiError::InvalidArgument {
                reason: "mapped buffer must be host-visible",
            });
        }
        if record.mapped {
            return Err(RhiError::InvalidArgument {
                reason: "buffer is already mapped",
            });
        }

        let memory = record.memory;
        let pointer = unsafe {
            self.device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
        .map_err(map_vk_result)?;

        // Re-borrow: the driver call above must not overlap the pool borrow.
        self.buffers
            .get_mut(buffer)
            .expect("buffer checked above")
            .mapped = true;
        Ok(pointer as *mut u8)
    }

    fn unmap(&mut self, buffer: BufferHandle) -> Result<(), RhiError> {
        let record = self.buffers.get_mut(buffer).ok_or(RhiError::InvalidArgument {
            reason: "stale buffer handle",
        })?;
        if !record.mapped {
            return Err(RhiError::InvalidArgument {
                reason: "buffer is not mapped",
            });
        }
        record.mapped = false;
        let memory = record.memory;
        unsafe { self.device.unmap_memory(memory) };
        Ok(())
    }

    fn wait_for_fence(&mut self, fence: FenceHandle) -> Result<(), RhiError> {
        let vk_fence = self.vk_fence(fence)?;
        unsafe {
            self.device
                .wait_for_fences(&[vk_fence], true, u64::MAX)
                .map_err(map_vk_result)?;
            self.device.reset_fences(&[vk_fence]).map_err(map_vk_result)
        }
    }

    fn wait_queue_idle(&mut self, queue_type: QueueType) -> Result<(), RhiError> {
        let device = self.device.clone();
        self.queue(queue_type).wait_idle(&device)
    }

    fn wait_idle(&mut self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle() }.map_err(map_vk_result)
    }

    fn queue_wait(&mut self, queue_type: QueueType, semaphore: SemaphoreHandle) -> Result<(), RhiError> {
        let vk_semaphore = self.vk_semaphore(semaphore)?;
        self.queue_mut(queue_type).add_wait(vk_semaphore);
        Ok(())
    }

    fn queue_signal(&mut self, queue_type: QueueType, semaphore: SemaphoreHandle) -> Result<(), RhiError> {
        let vk_semaphore = self.vk_semaphore(semaphore)?;
        self.queue_mut(queue_type).add_signal(vk_semaphore);
        Ok(())
    }

    fn submit(&mut self, info: SubmitInfo, signal_fence: Option<FenceHandle>) -> Result<(), RhiError> {
        let vk_fence = match signal_fence {
            Some(fence) => self.vk_fence(fence)?,
            None => vk::Fence::null(),
        };
        let command_buffers = self.prepare_submission(info.queue_type, &info.command_lists)?;

        let device = self.device.clone();
        self.queue_mut(info.queue_type).submit(&device, &command_buffers, vk_fence)
    }

    fn submit_immediate(&mut self, info: SubmitInfo) -> Result<(), RhiError> {
        let command_buffers = self.prepare_submission(info.queue_type, &info.command_lists)?;

        let fence_info = vk::FenceCreateInfo::builder();
        let immediate_fence =
            unsafe { self.device.create_fence(&fence_info, None) }.map_err(map_vk_result)?;

        let device = self.device.clone();
        let submitted = self
            .queue_mut(info.queue_type)
            .submit(&device, &command_buffers, immediate_fence);
        let result = submitted.and_then(|_| {
            unsafe { self.device.wait_for_fences(&[immediate_fence], true, u64::MAX) }.map_err(map_vk_result)
        });

        unsafe { self.device.destroy_fence(immediate_fence, None) };
        result
    }

    fn swapchain_image_index(&mut self, swapchain: SwapchainHandle) -> Result<u32, RhiError> {
        let loader = self.swapchain_loader.clone();
        let record = self.swapchains.get_mut(swapchain).ok_or(RhiError::InvalidArgument {
            reason: "stale swapchain handle",
        })?;
        let semaphore = record.image_available;
        record.acquire_if_needed(&loader, semaphore, false)
    }

    fn acquire_next_image(
        &mut self,
        swapchain: SwapchainHandle,
        signal_semaphore: SemaphoreHandle,
    ) -> Result<u32, RhiError> {
        let vk_semaphore = self.vk_semaphore(signal_semaphore)?;
        let loader = self.swapchain_loader.clone();
        let record = self.swapchains.get_mut(swapchain).ok_or(RhiError::InvalidArgument {
            reason: "stale swapchain handle",
        })?;
        record.acquire_if_needed(&loader, vk_semaphore, true)
    }

    fn swapchain_image(&self, swapchain: SwapchainHandle, image_index: u32) -> Result<ImageHandle, RhiError> {
        let record = self.swapchains.get(swapchain).ok_or(RhiError::InvalidArgument {
            reason: "stale swapchain handle",
        })?;
        record
            .images
            .get(image_index as usize)
            .copied()
            .ok_or(RhiError::InvalidArgument {
                reason: "swapchain image index out of range",
            })
    }

    fn resize_swapchain(&mut self, swapchain: SwapchainHandle, info: SwapchainCreateInfo) -> Result<(), RhiError> {
        let (surface, old_swapchain, old_images) = {
            let record = self.swapchains.get(swapchain).ok_or(RhiError::InvalidArgument {
                reason: "stale swapchain handle",
            })?;
            let unchanged = record.format == info.format
                && record.extent == info.extent
                && record.usage == info.usage
                && record.present_mode == info.present_mode
                && record.images.len() == info.image_count as usize;
            if unchanged {
                return Ok(());
            }
            log::debug!(
                "Resizing swapchain from {}x{} to {}x{}",
                record.extent.x,
                record.extent.y,
                info.extent.x,
                info.extent.y
            );
            (record.surface, record.swapchain, record.images.clone())
        };

        let new_swapchain = self.create_vk_swapchain(surface, &info, old_swapchain)?;
        let new_images = self.register_swapchain_images(new_swapchain, &info)?;

        for image in old_images {
            let _ = self.images.remove(image);
        }
        self.deferred.push(DeferredRelease::Swapchain(old_swapchain));

        let record = self.swapchains.get_mut(swapchain).expect("swapchain checked above");
        record.swapchain = new_swapchain;
        record.format = info.format;
        record.extent = info.extent;
        record.usage = info.usage;
        record.present_mode = info.present_mode;
        record.images = new_images;
        record.acquire = PendingAcquire::None;
        Ok(())
    }

    fn present(&mut self, swapchain: SwapchainHandle, wait_semaphores: &[SemaphoreHandle]) -> Result<(), RhiError> {
        let mut vk_waits = Vec::with_capacity(wait_semaphores.len());
        for &semaphore in wait_semaphores {
            vk_waits.push(self.vk_semaphore(semaphore)?);
        }

        let queue = self.queue(QueueType::Graphics).vk_queue();
        let loader = self.swapchain_loader.clone();
        let record = self.swapchains.get_mut(swapchain).ok_or(RhiError::InvalidArgument {
            reason: "stale swapchain handle",
        })?;
        record.present(&loader, queue, &vk_waits)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        // Everything below frees driver objects, so the GPU must be done with all of them.
        let _ = unsafe { self.device.device_wait_idle() };

        for item in self.deferred.drain_all() {
            self.destroy_deferred_item(item);
        }

        let device = self.device.clone();
        let swapchain_loader = self.swapchain_loader.clone();
        let surface_loader = self.surface_loader.clone();
        let descriptor_pool = self.descriptor_pool;

        self.swapchains.drain(|record| unsafe {
            device.destroy_semaphore(record.image_available, None);
            swapchain_loader.destroy_swapchain(record.swapchain, None);
            surface_loader.destroy_surface(record.surface, None);
        });
        self.pipelines.drain(|pipeline| unsafe {
            device.destroy_pipeline(pipeline, None);
        });
        self.pipeline_layouts.drain(|record| unsafe {
            device.destroy_pipeline_layout(record.vk_layout, None);
        });
        self.bind_groups.drain(|record| unsafe {
            let _ = device.free_descriptor_sets(descriptor_pool, &[record.vk_set]);
        });
        self.bind_group_layouts.drain(|record| unsafe {
            device.destroy_descriptor_set_layout(record.vk_layout, None);
        });
        self.shader_modules.drain(|module| unsafe {
            device.destroy_shader_module(module, None);
        });
        self.samplers.drain(|sampler| unsafe {
            device.destroy_sampler(sampler, None);
        });
        self.image_views.drain(|view| unsafe {
            device.destroy_image_view(view, None);
        });
        self.images.drain(|record| unsafe {
            if let Some(memory) = record.memory {
                device.destroy_image(record.vk_image, None);
                device.free_memory(memory, None);
            }
            // Swapchain-owned images died with their swapchain above.
        });
        self.buffers.drain(|record| unsafe {
            device.destroy_buffer(record.vk_buffer, None);
            device.free_memory(record.memory, None);
        });
        self.semaphores.drain(|semaphore| unsafe {
            device.destroy_semaphore(semaphore, None);
        });
        self.fences.drain(|fence| unsafe {
            device.destroy_fence(fence, None);
        });
        self.command_lists.drain(|_| {});
        self.command_allocators.drain(|record| unsafe {
            device.destroy_command_pool(record.command_pool, None);
        });

        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_device(None);
        }
    }
}
