//! The image-state transition table.
//!
//! Clients track image layouts themselves and request transitions between [`ImageState`]s;
//! the recorder derives the driver's stage, access and layout masks from the pair. Only the
//! transitions an engine actually needs are supported - anything off the table is a recording
//! error rather than a guess.

use crate::rhi::rhi_enums::{ImageLayout, ImageState, PipelineStageFlags, ResourceAccessFlags, RhiError};

/// The fully derived barrier for one image-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    /// Accesses that must complete before the barrier.
    pub src_access: ResourceAccessFlags,

    /// Accesses that wait on the barrier.
    pub dst_access: ResourceAccessFlags,

    /// Pipeline stages the barrier waits on.
    pub src_stage: PipelineStageFlags,

    /// Pipeline stages blocked until the barrier completes.
    pub dst_stage: PipelineStageFlags,

    /// Layout the image is in before the barrier.
    pub old_layout: ImageLayout,

    /// Layout the image is in after the barrier.
    pub new_layout: ImageLayout,
}

/// Derives the barrier masks for a `{before, after}` state pair.
///
/// Pairs outside the supported table fail with `InvalidArgument`.
pub fn transition_masks(before: ImageState, after: ImageState) -> Result<TransitionMasks, RhiError> {
    match (before, after) {
        (ImageState::Unknown, ImageState::TransferDst) => Ok(TransitionMasks {
            src_access: ResourceAccessFlags::empty(),
            dst_access: ResourceAccessFlags::TRANSFER_WRITE,
            src_stage: PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: PipelineStageFlags::TRANSFER,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::TransferDst,
        }),

        (ImageState::TransferDst, ImageState::ShaderResource) => Ok(TransitionMasks {
            src_access: ResourceAccessFlags::TRANSFER_WRITE,
            dst_access: ResourceAccessFlags::SHADER_READ,
            src_stage: PipelineStageFlags::TRANSFER,
            dst_stage: PipelineStageFlags::FRAGMENT_SHADER,
            old_layout: ImageLayout::TransferDst,
            new_layout: ImageLayout::ShaderReadOnly,
        }),

        (ImageState::Unknown, ImageState::RenderTarget) => Ok(TransitionMasks {
            src_access: ResourceAccessFlags::empty(),
            dst_access: ResourceAccessFlags::COLOR_ATTACHMENT_WRITE,
            src_stage: PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::ColorAttachment,
        }),

        (ImageState::RenderTarget, ImageState::ShaderResource) => Ok(TransitionMasks {
            src_access: ResourceAccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: ResourceAccessFlags::SHADER_READ,
            src_stage: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: PipelineStageFlags::FRAGMENT_SHADER,
            old_layout: ImageLayout::ColorAttachment,
            new_layout: ImageLayout::ShaderReadOnly,
        }),

        (ImageState::RenderTarget, ImageState::Present) => Ok(TransitionMasks {
            src_access: ResourceAccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: ResourceAccessFlags::empty(),
            src_stage: PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: PipelineStageFlags::BOTTOM_OF_PIPE,
            old_layout: ImageLayout::ColorAttachment,
            new_layout: ImageLayout::PresentSrc,
        }),

        _ => Err(RhiError::InvalidArgument {
            reason: "unsupported image state transition",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_path_masks_are_exact() {
        let first = transition_masks(ImageState::Unknown, ImageState::TransferDst).unwrap();
        assert_eq!(first.src_access, ResourceAccessFlags::empty());
        assert_eq!(first.dst_access, ResourceAccessFlags::TRANSFER_WRITE);
        assert_eq!(first.src_stage, PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(first.dst_stage, PipelineStageFlags::TRANSFER);
        assert_eq!(first.old_layout, ImageLayout::Undefined);
        assert_eq!(first.new_layout, ImageLayout::TransferDst);

        let second = transition_masks(ImageState::TransferDst, ImageState::ShaderResource).unwrap();
        assert_eq!(second.src_access, ResourceAccessFlags::TRANSFER_WRITE);
        assert_eq!(second.dst_access, ResourceAccessFlags::SHADER_READ);
        assert_eq!(second.src_stage, PipelineStageFlags::TRANSFER);
        assert_eq!(second.dst_stage, PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(second.old_layout, ImageLayout::TransferDst);
        assert_eq!(second.new_layout, ImageLayout::ShaderReadOnly);
    }

    #[test]
    fn render_target_masks_are_exact() {
        let open = transition_masks(ImageState::Unknown, ImageState::RenderTarget).unwrap();
        assert_eq!(open.src_access, ResourceAccessFlags::empty());
        assert_eq!(open.dst_access, ResourceAccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(open.src_stage, PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(open.dst_stage, PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(open.old_layout, ImageLayout::Undefined);
        assert_eq!(open.new_layout, ImageLayout::ColorAttachment);

        let sample = transition_masks(ImageState::RenderTarget, ImageState::ShaderResource).unwrap();
        assert_eq!(sample.src_access, ResourceAccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(sample.dst_access, ResourceAccessFlags::SHADER_READ);
        assert_eq!(sample.src_stage, PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(sample.dst_stage, PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(sample.old_layout, ImageLayout::ColorAttachment);
        assert_eq!(sample.new_layout, ImageLayout::ShaderReadOnly);

        let present = transition_masks(ImageState::RenderTarget, ImageState::Present).unwrap();
        assert_eq!(present.src_access, ResourceAccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(present.dst_access, ResourceAccessFlags::empty());
        assert_eq!(present.src_stage, PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(present.dst_stage, PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(present.old_layout, ImageLayout::ColorAttachment);
        assert_eq!(present.new_layout, ImageLayout::PresentSrc);
    }

    #[test]
    fn off_table_pairs_are_rejected() {
        let rejected = [
            (ImageState::Present, ImageState::RenderTarget),
            (ImageState::ShaderResource, ImageState::TransferDst),
            (ImageState::TransferDst, ImageState::Present),
            (ImageState::Unknown, ImageState::Unknown),
            (ImageState::RenderTarget, ImageState::RenderTarget),
            (ImageState::ShaderResource, ImageState::Unknown),
        ];
        for (before, after) in rejected.iter() {
            assert!(
                transition_masks(*before, *after).is_err(),
                "{:?} -> {:?} should be off the table",
                before,
                after
            );
        }
    }
}
