//! CPU-side command recording.
//!
//! A [`CommandList`] is a write-once recorder: commands are validated and appended to a plain
//! vector, and nothing touches the driver until the list is submitted, at which point a backend
//! translates the stream into its native command buffer. Keeping the record on the CPU is what
//! lets the state machine and the transition table be enforced (and tested) without a GPU.

use crate::rhi::handle::{
    BindGroupHandle, BufferHandle, CommandAllocatorHandle, ImageHandle, PipelineHandle, PipelineLayoutHandle,
};
use crate::rhi::rhi_enums::{ImageState, IndexType, RhiError, ShaderStageFlags};
use crate::rhi::rhi_structs::{BufferImageCopy, Rect2D, RenderAttachment, VertexBufferView, Viewport};
use crate::rhi::transition::{transition_masks, TransitionMasks};

/// Where a command list is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// Freshly created, nothing recorded.
    Initial,
    /// Between `begin()` and `end()`; commands may be recorded.
    Recording,
    /// Closed; the list can be submitted.
    Recorded,
}

/// One recorded command. The stream is exactly what the backend will translate, in order.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Command {
    BeginRendering {
        render_targets: Vec<RenderAttachment>,
        render_area: Rect2D,
    },
    EndRendering,
    TransitionBarrier {
        image: ImageHandle,
        before: ImageState,
        after: ImageState,
        masks: TransitionMasks,
    },
    SetPipeline {
        pipeline: PipelineHandle,
        layout: PipelineLayoutHandle,
    },
    SetViewports {
        start_viewport: u32,
        viewports: Vec<Viewport>,
    },
    SetScissors {
        start_scissor: u32,
        scissors: Vec<Rect2D>,
    },
    SetVertexBuffers {
        start_binding: u32,
        buffers: Vec<VertexBufferView>,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        index_type: IndexType,
    },
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
        pipeline_layout: PipelineLayoutHandle,
    },
    DrawInstanced {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        first_vertex: i32,
        first_instance: u32,
    },
    CopyBuffer {
        dst: BufferHandle,
        dst_offset: u64,
        src: BufferHandle,
        src_offset: u64,
        size: u64,
    },
    CopyBufferToImage {
        src: BufferHandle,
        dst: ImageHandle,
        region: BufferImageCopy,
    },
    PushConstants {
        layout: PipelineLayoutHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
}

/// A write-once record of GPU commands bounded by `begin()`/`end()`.
///
/// Recording calls return nothing; the first contract violation is latched instead, every
/// later command is ignored, and the error surfaces at [`end`](CommandList::end) and again if
/// the list is submitted anyway.
#[derive(Debug)]
pub struct CommandList {
    allocator: CommandAllocatorHandle,
    state: CommandListState,
    commands: Vec<Command>,
    in_render_scope: bool,
    latent_error: Option<RhiError>,
}

impl CommandList {
    /// Creates a list in the `Initial` state, tied to the allocator that owns its memory.
    pub(crate) fn new(allocator: CommandAllocatorHandle) -> Self {
        CommandList {
            allocator,
            state: CommandListState::Initial,
            commands: Vec::new(),
            in_render_scope: false,
            latent_error: None,
        }
    }

    /// The allocator this list was created from. Resetting it invalidates the list.
    pub fn allocator(&self) -> CommandAllocatorHandle {
        self.allocator
    }

    /// Where the list is in its lifecycle.
    pub fn state(&self) -> CommandListState {
        self.state
    }

    /// The recorded stream. Meaningful once the list is `Recorded`.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// The first recording violation, if any.
    pub fn latent_error(&self) -> Option<&RhiError> {
        self.latent_error.as_ref()
    }

    /// Opens the list for recording.
    pub fn begin(&mut self) -> Result<(), RhiError> {
        if self.state != CommandListState::Initial {
            return Err(RhiError::InvalidArgument {
                reason: "begin() requires a command list in the Initial state",
            });
        }
        self.state = CommandListState::Recording;
        Ok(())
    }

    /// Closes the list. Surfaces the first latched recording error, if there was one.
    pub fn end(&mut self) -> Result<(), RhiError> {
        if self.state != CommandListState::Recording {
            return Err(RhiError::InvalidArgument {
                reason: "end() requires a command list in the Recording state",
            });
        }
        if self.in_render_scope && self.latent_error.is_none() {
            self.latent_error = Some(RhiError::InvalidArgument {
                reason: "end() inside an open render scope",
            });
        }
        self.state = CommandListState::Recorded;
        match &self.latent_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Opens a render scope targeting `render_targets`, clearing each to its clear color.
    pub fn begin_rendering(&mut self, render_targets: &[RenderAttachment], render_area: Rect2D) {
        if !self.recordable() {
            return;
        }
        if self.in_render_scope {
            self.latch("begin_rendering inside an open render scope");
            return;
        }
        self.in_render_scope = true;
        self.commands.push(Command::BeginRendering {
            render_targets: render_targets.to_vec(),
            render_area,
        });
    }

    /// Closes the current render scope.
    pub fn end_rendering(&mut self) {
        if !self.recordable() {
            return;
        }
        if !self.in_render_scope {
            self.latch("end_rendering without an open render scope");
            return;
        }
        self.in_render_scope = false;
        self.commands.push(Command::EndRendering);
    }

    /// Encodes a pipeline barrier transitioning `image` from `before` to `after`.
    ///
    /// The stage/access/layout masks are derived from the transition table at record time;
    /// a pair outside the table latches `InvalidArgument`.
    pub fn transition_barrier(&mut self, image: ImageHandle, before: ImageState, after: ImageState) {
        if !self.recordable() {
            return;
        }
        match transition_masks(before, after) {
            Ok(masks) => self.commands.push(Command::TransitionBarrier {
                image,
                before,
                after,
                masks,
            }),
            Err(error) => {
                if self.latent_error.is_none() {
                    self.latent_error = Some(error);
                }
            }
        }
    }

    /// Binds `pipeline` for subsequent draws, carrying `layout` for later bind-group binds.
    pub fn set_pipeline(&mut self, pipeline: PipelineHandle, layout: PipelineLayoutHandle) {
        if !self.recordable() {
            return;
        }
        self.commands.push(Command::SetPipeline { pipeline, layout });
    }

    /// Sets dynamic viewports starting at register `start_viewport`.
    pub fn set_viewports(&mut self, start_viewport: u32, viewports: &[Viewport]) {
        if !self.recordable() {
            return;
        }
        self.commands.push(Command::SetViewports {
            start_viewport,
            viewports: viewports.to_vec(),
        });
    }

    /// Sets dynamic scissors starting at register `start_scissor`.
    pub fn set_scissors(&mut self, start_scissor: u32, scissors: &[Rect2D]) {
        if !self.recordable() {
            return;
        }
        self.commands.push(Command::SetScissors {
            start_scissor,
            scissors: scissors.to_vec(),
        });
    }

    /// Binds vertex buffers starting at binding `start_binding`.
    pub fn set_vertex_buffers(&mut self, start_binding: u32, buffers: &[VertexBufferView]) {
        if !self.recordable() {
            return;
        }
        self.commands.push(Command::SetVertexBuffers {
            start_binding,
            buffers: buffers.to_vec(),
        });
    }

    /// Binds the index buffer for indexed draws.
    pub fn set_index_buffer(&mut self, buffer: BufferHandle, index_type: IndexType) {
        if !self.recordable() {
            return;
        }
        self.commands.push(Command::SetIndexBuffer { buffer, index_type });
    }

    /// Binds `bind_group` to set slot `index`.
    pub fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle, pipeline_layout: PipelineLayoutHandle) {
        if !self.recordable() {
            return;
        }
        self.commands.push(Command::SetBindGroup {
            index,
            bind_group,
            pipeline_layout,
        });
    }

    /// Records a non-indexed draw. Only legal inside a render scope.
    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        if !self.recordable() {
            return;
        }
        if !self.in_render_scope {
            self.latch("draw_instanced outside a render scope");
            return;
        }
        self.commands.push(Command::DrawInstanced {
            vertex_count,
            instance_count,
            start_vertex,
            start_instance,
        });
    }

    /// Records an indexed draw. Only legal inside a render scope.
    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        first_vertex: i32,
        first_instance: u32,
    ) {
        if !self.recordable() {
            return;
        }
        if !self.in_render_scope {
            self.latch("draw_indexed_instanced outside a render scope");
            return;
        }
        self.commands.push(Command::DrawIndexedInstanced {
            index_count,
            instance_count,
            first_index,
            first_vertex,
            first_instance,
        });
    }

    /// Copies `size` bytes from `src` at `src_offset` to `dst` at `dst_offset`.
    ///
    /// Only legal outside a render scope.
    pub fn copy_buffer(&mut self, dst: BufferHandle, dst_offset: u64, src: BufferHandle, src_offset: u64, size: u64) {
        if !self.recordable() {
            return;
        }
        if self.in_render_scope {
            self.latch("copy_buffer inside a render scope");
            return;
        }
        self.commands.push(Command::CopyBuffer {
            dst,
            dst_offset,
            src,
            src_offset,
            size,
        });
    }

    /// Copies a buffer region into an image. Only legal outside a render scope.
    pub fn copy_buffer_to_image(&mut self, src: BufferHandle, dst: ImageHandle, region: BufferImageCopy) {
        if !self.recordable() {
            return;
        }
        if self.in_render_scope {
            self.latch("copy_buffer_to_image inside a render scope");
            return;
        }
        self.commands.push(Command::CopyBufferToImage { src, dst, region });
    }

    /// Writes push-constant bytes visible to `stages`. Legal inside or outside a render scope.
    pub fn push_constants(&mut self, layout: PipelineLayoutHandle, stages: ShaderStageFlags, offset: u32, data: &[u8]) {
        if !self.recordable() {
            return;
        }
        self.commands.push(Command::PushConstants {
            layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn recordable(&mut self) -> bool {
        if self.latent_error.is_some() {
            return false;
        }
        if self.state != CommandListState::Recording {
            self.latent_error = Some(RhiError::InvalidArgument {
                reason: "command recorded outside begin()/end()",
            });
            return false;
        }
        true
    }

    fn latch(&mut self, reason: &'static str) {
        if self.latent_error.is_none() {
            self.latent_error = Some(RhiError::InvalidArgument { reason });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::handle::Handle;
    use crate::rhi::rhi_enums::{ImageLayout, PipelineStageFlags, ResourceAccessFlags};

    fn list() -> CommandList {
        CommandList::new(Handle::new(0, 1))
    }

    fn full_rect() -> Rect2D {
        Rect2D {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        }
    }

    #[test]
    fn end_without_begin_is_an_error() {
        let mut cmd = list();
        assert!(cmd.end().is_err());
    }

    #[test]
    fn draw_outside_render_scope_latches() {
        let mut cmd = list();
        cmd.begin().unwrap();
        cmd.draw_instanced(3, 1, 0, 0);
        assert!(cmd.end().is_err());
    }

    #[test]
    fn copy_inside_render_scope_latches() {
        let mut cmd = list();
        cmd.begin().unwrap();
        cmd.begin_rendering(&[], full_rect());
        cmd.copy_buffer(Handle::new(0, 1), 0, Handle::new(1, 1), 0, 64);
        cmd.end_rendering();
        assert!(cmd.end().is_err());
    }

    #[test]
    fn nested_begin_rendering_latches() {
        let mut cmd = list();
        cmd.begin().unwrap();
        cmd.begin_rendering(&[], full_rect());
        cmd.begin_rendering(&[], full_rect());
        assert!(cmd.end().is_err());
    }

    #[test]
    fn unclosed_render_scope_fails_end() {
        let mut cmd = list();
        cmd.begin().unwrap();
        cmd.begin_rendering(&[], full_rect());
        assert!(cmd.end().is_err());
    }

    #[test]
    fn commands_after_a_latched_error_are_dropped() {
        let mut cmd = list();
        cmd.begin().unwrap();
        cmd.draw_instanced(3, 1, 0, 0);
        cmd.set_pipeline(Handle::new(0, 1), Handle::new(0, 1));
        assert!(cmd.end().is_err());
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn triangle_stream_is_recorded_in_order() {
        let view = Handle::new(4, 1);
        let pipeline = Handle::new(0, 1);
        let layout = Handle::new(1, 1);

        let mut cmd = list();
        cmd.begin().unwrap();
        cmd.begin_rendering(
            &[RenderAttachment {
                render_target: view,
                clear_color: [0.0, 0.0, 0.0, 1.0],
            }],
            full_rect(),
        );
        cmd.set_pipeline(pipeline, layout);
        cmd.set_viewports(
            0,
            &[Viewport {
                x: 0.0,
                y: 0.0,
                width: 800.0,
                height: 600.0,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        cmd.set_scissors(0, &[full_rect()]);
        cmd.draw_instanced(3, 1, 0, 0);
        cmd.end_rendering();
        cmd.end().unwrap();

        let commands = cmd.commands();
        assert_eq!(commands.len(), 6);
        assert!(matches!(commands[0], Command::BeginRendering { .. }));
        assert!(matches!(commands[1], Command::SetPipeline { .. }));
        assert!(matches!(commands[2], Command::SetViewports { .. }));
        assert!(matches!(commands[3], Command::SetScissors { .. }));
        assert!(matches!(
            commands[4],
            Command::DrawInstanced {
                vertex_count: 3,
                instance_count: 1,
                start_vertex: 0,
                start_instance: 0,
            }
        ));
        assert!(matches!(commands[5], Command::EndRendering));
    }

    #[test]
    fn upload_transitions_record_exact_masks() {
        let image = Handle::new(2, 1);

        let mut cmd = list();
        cmd.begin().unwrap();
        cmd.transition_barrier(image, ImageState::Unknown, ImageState::TransferDst);
        cmd.transition_barrier(image, ImageState::TransferDst, ImageState::ShaderResource);
        cmd.end().unwrap();

        match &cmd.commands()[0] {
            Command::TransitionBarrier { masks, .. } => {
                assert_eq!(masks.src_access, ResourceAccessFlags::empty());
                assert_eq!(masks.dst_access, ResourceAccessFlags::TRANSFER_WRITE);
                assert_eq!(masks.src_stage, PipelineStageFlags::TOP_OF_PIPE);
                assert_eq!(masks.dst_stage, PipelineStageFlags::TRANSFER);
                assert_eq!(masks.old_layout, ImageLayout::Undefined);
                assert_eq!(masks.new_layout, ImageLayout::TransferDst);
            }
            other => panic!("expected a transition barrier, got {:?}", other),
        }
        match &cmd.commands()[1] {
            Command::TransitionBarrier { masks, .. } => {
                assert_eq!(masks.src_access, ResourceAccessFlags::TRANSFER_WRITE);
                assert_eq!(masks.dst_access, ResourceAccessFlags::SHADER_READ);
                assert_eq!(masks.src_stage, PipelineStageFlags::TRANSFER);
                assert_eq!(masks.dst_stage, PipelineStageFlags::FRAGMENT_SHADER);
                assert_eq!(masks.old_layout, ImageLayout::TransferDst);
                assert_eq!(masks.new_layout, ImageLayout::ShaderReadOnly);
            }
            other => panic!("expected a transition barrier, got {:?}", other),
        }
    }

    #[test]
    fn illegal_transition_latches_invalid_argument() {
        let mut cmd = list();
        cmd.begin().unwrap();
        cmd.transition_barrier(Handle::new(0, 1), ImageState::Present, ImageState::TransferDst);
        let error = cmd.end().unwrap_err();
        assert!(matches!(error, RhiError::InvalidArgument { .. }));
    }
}
