#![allow(unsafe_code)]

//! Command allocation and recorded-stream translation.
//!
//! Command lists are recorded CPU-side; this module is where the stream finally meets the
//! driver. At submit, each list gets a one-time-submit command buffer from its allocator's
//! pool and the stream is replayed into it command by command. Resetting the pool reclaims
//! all of those buffers at once, which is the allocator's whole job.

use crate::rhi::command::{Command, CommandList};
use crate::rhi::handle::CommandListHandle;
use crate::rhi::rhi_enums::{ImageState, ImageUsageFlags, QueueType};
use crate::rhi::rhi_structs::Rect2D;
use crate::rhi::vulkan::vulkan_conversions::*;
use crate::rhi::vulkan::vulkan_device::VulkanDevice;
use crate::rhi::RhiError;

use ash::vk;

/// A command pool plus the lists currently allocated from it.
pub(crate) struct VulkanCommandAllocator {
    pub command_pool: vk::CommandPool,
    pub queue_type: QueueType,
    /// Handles of the live lists; a pool reset removes their records, staling the handles.
    pub lists: Vec<CommandListHandle>,
}

fn to_vk_rect(rect: Rect2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: rect.x, y: rect.y },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}

impl VulkanDevice {
    /// Allocates a command buffer from `command_pool` and replays `list`'s stream into it.
    pub(crate) fn record_into_pool(
        &self,
        command_pool: vk::CommandPool,
        list: &CommandList,
    ) -> Result<vk::CommandBuffer, RhiError> {
        let device = self.ash_device();

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&allocate_info) }
            .map_err(map_vk_result)?
            .remove(0);

        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }.map_err(map_vk_result)?;

        for command in list.commands() {
            self.translate_command(command_buffer, command)?;
        }

        unsafe { device.end_command_buffer(command_buffer) }.map_err(map_vk_result)?;
        Ok(command_buffer)
    }

    fn translate_command(&self, command_buffer: vk::CommandBuffer, command: &Command) -> Result<(), RhiError> {
        let device = self.ash_device();
        match command {
            Command::BeginRendering {
                render_targets,
                render_area,
            } => {
                let mut attachments = Vec::with_capacity(render_targets.len());
                for target in render_targets {
                    attachments.push(
                        vk::RenderingAttachmentInfo::builder()
                            .image_view(self.vk_image_view(target.render_target)?)
                            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                            .load_op(vk::AttachmentLoadOp::CLEAR)
                            .store_op(vk::AttachmentStoreOp::STORE)
                            .clear_value(vk::ClearValue {
                                color: vk::ClearColorValue {
                                    float32: target.clear_color,
                                },
                            })
                            .build(),
                    );
                }

                let rendering_info = vk::RenderingInfo::builder()
                    .render_area(to_vk_rect(*render_area))
                    .layer_count(1)
                    .color_attachments(&attachments);

                unsafe {
                    self.dynamic_rendering_loader()
                        .cmd_begin_rendering(command_buffer, &rendering_info)
                };
            }

            Command::EndRendering => unsafe {
                self.dynamic_rendering_loader().cmd_end_rendering(command_buffer);
            },

            Command::TransitionBarrier { image, after, masks, .. } => {
                let record = self.image_record(*image)?;

                // The target state is only reachable if the image was created for it.
                let required_usage = match after {
                    ImageState::TransferDst => Some(ImageUsageFlags::TRANSFER_DST),
                    ImageState::ShaderResource => Some(ImageUsageFlags::SAMPLED),
                    ImageState::RenderTarget => Some(ImageUsageFlags::COLOR_ATTACHMENT),
                    _ => None,
                };
                if let Some(required) = required_usage {
                    if !record.usage.contains(required) {
                        return Err(RhiError::InvalidArgument {
                            reason: "image usage does not allow the transition's target state",
                        });
                    }
                }

                let (vk_image, format) = (record.vk_image, record.format);

                let barrier = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(to_vk_access_flags(masks.src_access))
                    .dst_access_mask(to_vk_access_flags(masks.dst_access))
                    .old_layout(to_vk_image_layout(masks.old_layout))
                    .new_layout(to_vk_image_layout(masks.new_layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(vk_image)
                    .subresource_range(
                        vk::ImageSubresourceRange::builder()
                            .aspect_mask(format_aspect_mask(format))
                            .base_mip_level(0)
                            .level_count(vk::REMAINING_MIP_LEVELS)
                            .base_array_layer(0)
                            .layer_count(vk::REMAINING_ARRAY_LAYERS)
                            .build(),
                    )
                    .build();

                unsafe {
                    device.cmd_pipeline_barrier(
                        command_buffer,
                        to_vk_pipeline_stages(masks.src_stage),
                        to_vk_pipeline_stages(masks.dst_stage),
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    )
                };
            }

            Command::SetPipeline { pipeline, .. } => unsafe {
                device.cmd_bind_pipeline(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.vk_pipeline(*pipeline)?,
                );
            },

            Command::SetViewports {
                start_viewport,
                viewports,
            } => {
                let vk_viewports: Vec<vk::Viewport> = viewports
                    .iter()
                    .map(|viewport| vk::Viewport {
                        x: viewport.x,
                        y: viewport.y,
                        width: viewport.width,
                        height: viewport.height,
                        min_depth: viewport.min_depth,
                        max_depth: viewport.max_depth,
                    })
                    .collect();
                unsafe { device.cmd_set_viewport(command_buffer, *start_viewport, &vk_viewports) };
            }

            Command::SetScissors { start_scissor, scissors } => {
                let vk_scissors: Vec<vk::Rect2D> = scissors.iter().map(|rect| to_vk_rect(*rect)).collect();
                unsafe { device.cmd_set_scissor(command_buffer, *start_scissor, &vk_scissors) };
            }

            Command::SetVertexBuffers { start_binding, buffers } => {
                let mut vk_buffers = Vec::with_capacity(buffers.len());
                let mut offsets = Vec::with_capacity(buffers.len());
                for view in buffers {
                    vk_buffers.push(self.vk_buffer(view.buffer)?);
                    // The stride in the view is pipeline state here; only the offset binds.
                    offsets.push(view.offset);
                }
                unsafe { device.cmd_bind_vertex_buffers(command_buffer, *start_binding, &vk_buffers, &offsets) };
            }

            Command::SetIndexBuffer { buffer, index_type } => unsafe {
                device.cmd_bind_index_buffer(
                    command_buffer,
                    self.vk_buffer(*buffer)?,
                    0,
                    to_vk_index_type(*index_type),
                );
            },

            Command::SetBindGroup {
                index,
                bind_group,
                pipeline_layout,
            } => unsafe {
                device.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.vk_pipeline_layout(*pipeline_layout)?,
                    *index,
                    &[self.vk_bind_group(*bind_group)?],
                    &[],
                );
            },

            Command::DrawInstanced {
                vertex_count,
                instance_count,
                start_vertex,
                start_instance,
            } => unsafe {
                device.cmd_draw(
                    command_buffer,
                    *vertex_count,
                    *instance_count,
                    *start_vertex,
                    *start_instance,
                );
            },

            Command::DrawIndexedInstanced {
                index_count,
                instance_count,
                first_index,
                first_vertex,
                first_instance,
            } => unsafe {
                device.cmd_draw_indexed(
                    command_buffer,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *first_vertex,
                    *first_instance,
                );
            },

            Command::CopyBuffer {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let src_record = self.buffer_record(*src)?;
                let dst_record = self.buffer_record(*dst)?;
                if src_offset.checked_add(*size).map_or(true, |end| end > src_record.size)
                    || dst_offset.checked_add(*size).map_or(true, |end| end > dst_record.size)
                {
                    return Err(RhiError::InvalidArgument {
                        reason: "buffer copy range exceeds a buffer's size",
                    });
                }

                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *size,
                };
                unsafe {
                    device.cmd_copy_buffer(
                        command_buffer,
                        src_record.vk_buffer,
                        dst_record.vk_buffer,
                        &[region],
                    )
                };
            }

            Command::CopyBufferToImage { src, dst, region } => {
                let record = self.image_record(*dst)?;
                let (vk_image, format) = (record.vk_image, record.format);

                let fits = |offset: i32, extent: u32, limit: u32| {
                    offset >= 0 && (offset as u64) + u64::from(extent) <= u64::from(limit)
                };
                if !fits(region.image_offset[0], region.image_extent[0], record.extent.width)
                    || !fits(region.image_offset[1], region.image_extent[1], record.extent.height)
                    || !fits(region.image_offset[2], region.image_extent[2], record.extent.depth)
                {
                    return Err(RhiError::InvalidArgument {
                        reason: "buffer-to-image copy region exceeds the image extent",
                    });
                }
                let copy = vk::BufferImageCopy {
                    buffer_offset: region.buffer_offset,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: format_aspect_mask(format),
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D {
                        x: region.image_offset[0],
                        y: region.image_offset[1],
                        z: region.image_offset[2],
                    },
                    image_extent: vk::Extent3D {
                        width: region.image_extent[0],
                        height: region.image_extent[1],
                        depth: region.image_extent[2],
                    },
                };
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        command_buffer,
                        self.vk_buffer(*src)?,
                        vk_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy],
                    )
                };
            }

            Command::PushConstants {
                layout,
                stages,
                offset,
                data,
            } => unsafe {
                device.cmd_push_constants(
                    command_buffer,
                    self.vk_pipeline_layout(*layout)?,
                    to_vk_shader_stages(*stages),
                    *offset,
                    data,
                );
            },
        }
        Ok(())
    }
}
