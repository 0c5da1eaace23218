//! The Vulkan backend.
//!
//! Realizes the RHI on Vulkan 1.2 with dynamic rendering: no render pass or framebuffer
//! objects, viewport and scissor always dynamic, image layouts owned by the client through
//! explicit transitions. The backend favors explicit, minimal driver interaction - the only
//! caches it keeps are the layout caches the interface itself promises.

mod vulkan_command;
mod vulkan_conversions;
mod vulkan_device;
mod vulkan_graphics_api;
mod vulkan_memory;
mod vulkan_queue;
mod vulkan_shader;
mod vulkan_swapchain;

pub use self::vulkan_device::VulkanDevice;
pub use self::vulkan_graphics_api::VulkanGraphicsApi;
pub use self::vulkan_shader::VulkanShaderCompiler;
