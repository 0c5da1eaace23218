#![allow(unsafe_code)]

//! Device memory selection and allocation.
//!
//! Buffers and images each get a dedicated allocation. The resources that come through the
//! RHI are render targets, geometry and staging buffers: few and long-lived, so there is no
//! sub-allocating arena here.

use crate::rhi::vulkan::vulkan_conversions::map_vk_result;
use crate::rhi::RhiError;

use ash::vk;

/// Picks a memory type out of `memory_properties` that satisfies `requirements` and has all
/// of `flags`, preferring an exact flag match.
pub(crate) fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: &vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let candidates = memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .filter(|(index, _)| requirements.memory_type_bits & (1 << index) != 0);

    let mut fallback = None;
    for (index, memory_type) in candidates {
        if memory_type.property_flags == flags {
            return Some(index as u32);
        }
        if fallback.is_none() && memory_type.property_flags.contains(flags) {
            fallback = Some(index as u32);
        }
    }
    fallback
}

/// Allocates and binds memory for `buffer`.
pub(crate) fn allocate_buffer_memory(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    buffer: vk::Buffer,
    host_visible: bool,
) -> Result<vk::DeviceMemory, RhiError> {
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory = allocate(device, memory_properties, &requirements, host_visible)?;
    unsafe { device.bind_buffer_memory(buffer, memory, 0) }.map_err(|result| {
        unsafe { device.free_memory(memory, None) };
        map_vk_result(result)
    })?;
    Ok(memory)
}

/// Allocates and binds memory for `image`.
pub(crate) fn allocate_image_memory(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    image: vk::Image,
    host_visible: bool,
) -> Result<vk::DeviceMemory, RhiError> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory = allocate(device, memory_properties, &requirements, host_visible)?;
    unsafe { device.bind_image_memory(image, memory, 0) }.map_err(|result| {
        unsafe { device.free_memory(memory, None) };
        map_vk_result(result)
    })?;
    Ok(memory)
}

fn allocate(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: &vk::MemoryRequirements,
    host_visible: bool,
) -> Result<vk::DeviceMemory, RhiError> {
    let flags = if host_visible {
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    } else {
        vk::MemoryPropertyFlags::DEVICE_LOCAL
    };

    let memory_type_index =
        find_memory_type(memory_properties, requirements, flags).ok_or(RhiError::Unsupported {
            what: "no memory type satisfies the resource's requirements",
        })?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.allocate_memory(&alloc_info, None) }.map_err(map_vk_result)
}
