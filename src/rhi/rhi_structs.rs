use super::handle::*;
use super::rhi_enums::*;

use cgmath::Vector2;

/// Describes the driver instance you want to create.
#[derive(Debug, Clone)]
pub struct InstanceCreateInfo {
    /// Name reported to the driver for diagnostics.
    pub application_name: String,

    /// In debug builds, abort the process when a validation message with error severity
    /// arrives. Release builds ignore this.
    pub break_on_error: bool,
}

/// One logical GPU exposed by the driver.
#[derive(Debug, Clone)]
pub struct AdapterDesc {
    /// Index to pass to `create_device`.
    pub index: u32,

    /// Human-readable adapter name.
    pub name: String,

    /// What kind of GPU this is.
    pub kind: AdapterKind,
}

/// Describes a buffer to create.
#[derive(Debug, Clone)]
pub struct BufferCreateInfo {
    /// Size in bytes. Must be non-zero.
    pub size: u64,

    /// Everything the buffer will be used for.
    pub usage: BufferUsageFlags,

    /// Whether the host needs to map this buffer. Host-visible buffers land in mappable
    /// memory; everything else gets device-local memory.
    pub host_visible: bool,
}

/// Describes an image to create.
#[derive(Debug, Clone)]
pub struct ImageCreateInfo {
    /// 1D, 2D or 3D.
    pub image_type: ImageType,

    /// Texel format.
    pub format: Format,

    /// Width in texels. Must be non-zero.
    pub width: u32,

    /// Height in texels. Must be non-zero for 2D and 3D images.
    pub height: u32,

    /// Depth in texels. Must be non-zero for 3D images.
    pub depth: u32,

    /// Mip chain length.
    pub mip_levels: u32,

    /// Array layer count.
    pub array_layers: u32,

    /// MSAA sample count.
    pub sample_count: u32,

    /// Texel memory layout.
    pub tiling: ImageTiling,

    /// Everything the image will be used for.
    pub usage: ImageUsageFlags,

    /// Whether the image's memory must be host-mappable.
    pub host_visible: bool,
}

impl ImageCreateInfo {
    /// A 2D single-mip, single-layer, single-sampled image - the overwhelmingly common case.
    pub fn image_2d(format: Format, width: u32, height: u32, usage: ImageUsageFlags) -> Self {
        ImageCreateInfo {
            image_type: ImageType::Image2D,
            format,
            width,
            height,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            sample_count: 1,
            tiling: ImageTiling::Optimal,
            usage,
            host_visible: false,
        }
    }
}

/// Describes a view onto an existing image.
#[derive(Debug, Clone)]
pub struct ImageViewCreateInfo {
    /// The image being viewed.
    pub image: ImageHandle,

    /// Dimensionality of the view.
    pub view_type: ImageViewType,

    /// Format the view reads the image as.
    pub format: Format,
}

/// Describes a sampler to create.
#[derive(Debug, Clone)]
pub struct SamplerCreateInfo {
    /// Filtering for both minification and magnification.
    pub filter: Filter,

    /// Addressing outside [0, 1] on each axis.
    pub address_mode_u: SamplerAddressMode,
    #[allow(missing_docs)]
    pub address_mode_v: SamplerAddressMode,
    #[allow(missing_docs)]
    pub address_mode_w: SamplerAddressMode,

    /// Bias added to the computed mip level.
    pub mip_lod_bias: f32,

    /// Comparison op for shadow samplers, `None` for plain sampling.
    pub compare_op: Option<CompareOp>,

    /// Minimum mip level the sampler will touch.
    pub min_lod: f32,

    /// Maximum mip level the sampler will touch.
    pub max_lod: f32,
}

/// One binding slot in a bind group layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutBinding {
    /// The binding index shaders refer to.
    pub binding: u32,

    /// What kind of resource the slot takes.
    pub descriptor_type: DescriptorType,

    /// Number of descriptors in the slot (more than 1 means an array).
    pub count: u32,

    /// The shader stages that can see this binding.
    pub stages: ShaderStageFlags,
}

/// Describes a bind group layout: the schema of one resource set.
///
/// Bindings may be listed in any order; the device orders them strictly by their requested
/// binding index. Duplicate indices are an error.
#[derive(Debug, Clone)]
pub struct BindGroupLayoutCreateInfo {
    /// The binding slots of the layout.
    pub bindings: Vec<BindGroupLayoutBinding>,
}

/// A buffer bound into a bind group slot.
#[derive(Debug, Clone)]
pub struct BufferBinding {
    /// The slot to fill.
    pub binding: u32,

    /// The buffer to bind.
    pub buffer: BufferHandle,

    /// `ConstantBuffer` or `StorageBuffer`; must match the layout's declaration.
    pub descriptor_type: DescriptorType,

    /// Byte offset of the bound range.
    pub offset: u64,

    /// Byte size of the bound range.
    pub size: u64,
}

/// An image view bound into a bind group slot.
#[derive(Debug, Clone)]
pub struct ImageViewBinding {
    /// The slot to fill.
    pub binding: u32,

    /// The view to bind.
    pub image_view: ImageViewHandle,
}

/// A sampler bound into a bind group slot.
#[derive(Debug, Clone)]
pub struct SamplerBinding {
    /// The slot to fill.
    pub binding: u32,

    /// The sampler to bind.
    pub sampler: SamplerHandle,
}

/// Describes a bind group: a snapshot of concrete resources matching a layout.
///
/// Slots left unfilled stay unbound; drawing with an unbound slot is the driver's validation
/// problem, not a CPU-side error.
#[derive(Debug, Clone)]
pub struct BindGroupCreateInfo {
    /// The layout this group instantiates.
    pub layout: BindGroupLayoutHandle,

    /// Buffer slots to fill.
    pub buffers: Vec<BufferBinding>,

    /// Image view slots to fill.
    pub views: Vec<ImageViewBinding>,

    /// Sampler slots to fill.
    pub samplers: Vec<SamplerBinding>,
}

/// A single post-creation update to a bind group slot.
#[derive(Debug, Clone)]
pub enum BindGroupWrite {
    /// Replace a buffer slot.
    Buffer(BufferBinding),
    /// Replace an image view slot.
    ImageView(ImageViewBinding),
    /// Replace a sampler slot.
    Sampler(SamplerBinding),
}

/// A push-constant range in a pipeline layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Stages that read the range.
    pub stages: ShaderStageFlags,

    /// Byte offset of the range.
    pub offset: u32,

    /// Byte size of the range.
    pub size: u32,
}

/// Describes a pipeline layout: the ordered set of bind group layouts plus push constants.
#[derive(Debug, Clone)]
pub struct PipelineLayoutCreateInfo {
    /// Bind group layouts, in set-index order.
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,

    /// Push-constant ranges visible to the pipeline.
    pub push_constant_ranges: Vec<PushConstantRange>,
}

/// Describes a shader module: a driver-IR blob.
#[derive(Debug, Clone)]
pub struct ShaderModuleCreateInfo {
    /// The IR bytes. For the vulkan backend this is SPIR-V and must be a non-empty multiple
    /// of four bytes.
    pub code: Vec<u8>,
}

/// One shader stage of a pipeline.
#[derive(Debug, Clone)]
pub struct ShaderStageInfo {
    /// The compiled module.
    pub module: ShaderModuleHandle,

    /// Entry point name inside the module.
    pub entry_point: String,
}

/// One vertex attribute inside a vertex binding.
#[derive(Debug, Clone)]
pub struct VertexAttribute {
    /// Semantic name, carried for tooling and reflection match-up.
    pub name: String,

    /// Attribute format.
    pub format: Format,

    /// Byte offset within the binding. When `None`, attributes pack tightly in declaration
    /// order using the format's byte size.
    pub offset: Option<u32>,
}

/// One vertex buffer binding of a pipeline.
#[derive(Debug, Clone)]
pub struct VertexBinding {
    /// Byte stride between consecutive elements.
    pub stride: u32,

    /// Per-vertex or per-instance stepping.
    pub input_rate: VertexInputRate,

    /// The attributes read out of this binding.
    pub attributes: Vec<VertexAttribute>,
}

/// Fixed-function input assembly state.
#[derive(Debug, Clone)]
pub struct InputAssemblyState {
    /// Primitive topology for all draws with this pipeline.
    pub topology: PrimitiveTopology,
}

/// Fixed-function rasterizer state.
#[derive(Debug, Clone)]
pub struct RasterizerState {
    /// Fill or wireframe.
    pub fill_mode: FillMode,

    /// Face culling.
    pub cull_mode: CullMode,

    /// Winding order that counts as front-facing.
    pub front_face: FrontFace,
}

/// Fixed-function depth/stencil state.
#[derive(Debug, Clone)]
pub struct DepthStencilState {
    /// Enable the depth test.
    pub depth_enable: bool,

    /// Write surviving fragments' depth.
    pub depth_write_enable: bool,

    /// Comparison for the depth test.
    pub compare_op: CompareOp,
}

/// Per-render-target blend state.
#[derive(Debug, Clone)]
pub struct RenderTargetBlend {
    /// Enable blending for this target.
    pub blend_enable: bool,

    /// Source color factor.
    pub src_blend: BlendFactor,

    /// Destination color factor.
    pub dst_blend: BlendFactor,

    /// Color combine op.
    pub blend_op: BlendOp,

    /// Source alpha factor.
    pub src_alpha_blend: BlendFactor,

    /// Destination alpha factor.
    pub dst_alpha_blend: BlendFactor,

    /// Alpha combine op.
    pub alpha_blend_op: BlendOp,

    /// Channels written to the target.
    pub color_write_mask: ColorWriteFlags,
}

impl RenderTargetBlend {
    /// Opaque write of all channels, no blending.
    pub fn disabled() -> Self {
        RenderTargetBlend {
            blend_enable: false,
            src_blend: BlendFactor::One,
            dst_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_alpha_blend: BlendFactor::One,
            dst_alpha_blend: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: ColorWriteFlags::ALL,
        }
    }
}

/// Blend state for every render target plus the blend constants.
#[derive(Debug, Clone)]
pub struct BlendState {
    /// One entry per render target, matching `render_target_formats`.
    pub render_targets: Vec<RenderTargetBlend>,

    /// The four blend constants.
    pub blend_constants: [f32; 4],
}

/// Describes a complete graphics pipeline.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineCreateInfo {
    /// The pipeline layout.
    pub layout: PipelineLayoutHandle,

    /// Vertex stage.
    pub vertex_shader: ShaderStageInfo,

    /// Fragment stage.
    pub fragment_shader: ShaderStageInfo,

    /// Vertex buffer bindings, in binding-index order.
    pub vertex_bindings: Vec<VertexBinding>,

    /// Input assembly.
    pub input_assembly: InputAssemblyState,

    /// Rasterizer state.
    pub rasterizer: RasterizerState,

    /// Depth/stencil state, `None` to disable the depth test entirely.
    pub depth_stencil: Option<DepthStencilState>,

    /// Blend state.
    pub blend: BlendState,

    /// Formats of the color targets this pipeline renders into.
    pub render_target_formats: Vec<Format>,

    /// Format of the depth attachment, if the pipeline uses one.
    pub depth_format: Option<Format>,
}

/// Describes a swapchain to create or resize.
#[derive(Debug, Clone)]
pub struct SwapchainCreateInfo {
    /// Number of images in the ring.
    pub image_count: u32,

    /// Format of the presentable images.
    pub format: Format,

    /// Image extent in pixels; x is width, y is height.
    pub extent: Vector2<u32>,

    /// Usage of the presentable images.
    pub usage: ImageUsageFlags,

    /// Pacing against the display.
    pub present_mode: PresentMode,
}

/// Describes a command allocator to create.
#[derive(Debug, Clone)]
pub struct CommandAllocatorCreateInfo {
    /// The queue family lists from this allocator will be submitted to.
    pub queue_type: QueueType,
}

/// Describes a command list to create.
#[derive(Debug, Clone)]
pub struct CommandListCreateInfo {
    /// The allocator that owns the list's backing memory. Resetting it invalidates the list.
    pub command_allocator: CommandAllocatorHandle,
}

/// Describes a fence to create.
#[derive(Debug, Clone)]
pub struct FenceCreateInfo {
    /// Whether the fence starts life already signaled.
    pub signaled: bool,
}

/// One batch of command lists for a queue.
#[derive(Debug, Clone)]
pub struct SubmitInfo {
    /// The queue to submit to.
    pub queue_type: QueueType,

    /// Recorded lists, executed in order.
    pub command_lists: Vec<CommandListHandle>,
}

/// A viewport rectangle with depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// An integer rectangle, used for scissors and render areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One color attachment of a render scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderAttachment {
    /// View of the image to render into.
    pub render_target: ImageViewHandle,

    /// Color the attachment is cleared to when the scope opens.
    pub clear_color: [f32; 4],
}

/// A vertex buffer binding for `set_vertex_buffers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    /// The buffer to read vertices from.
    pub buffer: BufferHandle,

    /// Byte offset of the first vertex.
    pub offset: u64,

    /// Byte stride between vertices.
    pub stride: u32,
}

/// One buffer-to-image copy region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    /// Byte offset of the texel data in the source buffer.
    pub buffer_offset: u64,

    /// Texel offset in the destination image.
    pub image_offset: [i32; 3],

    /// Texel extent of the region.
    pub image_extent: [u32; 3],
}

/// What to compile, for the shader front-end.
#[derive(Debug, Clone)]
pub struct ShaderCompileInfo {
    /// HLSL source text.
    pub source: String,

    /// Which stage the source targets.
    pub stage: ShaderStage,

    /// The entry point to compile.
    pub entry_point: String,
}

/// One binding recovered by shader reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBindingReflection {
    /// Descriptor set / bind group index.
    pub set: u32,

    /// Binding index inside the set.
    pub binding: u32,

    /// What the shader declared at the slot.
    pub descriptor_type: DescriptorType,

    /// Array size of the declaration.
    pub count: u32,
}
