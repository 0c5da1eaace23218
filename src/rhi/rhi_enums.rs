use bitflags::bitflags;
use failure::Fail;

/// What kind of GPU an adapter is.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum AdapterKind {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

/// The queue families a device exposes.
///
/// Every device has a graphics queue; transfer and compute fall back to the graphics family
/// when the hardware has no dedicated family for them.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// Texel formats understood by the RHI.
///
/// The set is deliberately small: render target and interchange formats the built-in backends
/// actually consume, not a transcription of the driver's full format table.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum Format {
    Unknown,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    R16G16B16A16Float,
    R32Float,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,
    D32Float,
    D24UnormS8Uint,
}

impl Format {
    /// Size of one texel/element in bytes. Used to tightly pack vertex attributes whose
    /// offsets were left unspecified.
    pub fn size_bytes(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::B8G8R8A8Unorm
            | Format::B8G8R8A8Srgb
            | Format::R8G8B8A8Unorm
            | Format::R8G8B8A8Srgb
            | Format::R32Float
            | Format::D32Float
            | Format::D24UnormS8Uint => 4,
            Format::R16G16B16A16Float | Format::R32G32Float => 8,
            Format::R32G32B32Float => 12,
            Format::R32G32B32A32Float => 16,
        }
    }
}

/// Client-tracked image states.
///
/// Transitions between them are encoded explicitly with `CommandList::transition_barrier`; the
/// RHI never infers a layout behind the client's back.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ImageState {
    /// Contents undefined. Every image starts here.
    Unknown,
    /// Written by transfer operations.
    TransferDst,
    /// Sampled from fragment shaders.
    ShaderResource,
    /// Written as a color attachment.
    RenderTarget,
    /// Handed to the presentation engine.
    Present,
}

/// Driver-agnostic image layouts, produced by the transition table.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum ImageLayout {
    Undefined,
    TransferDst,
    ShaderReadOnly,
    ColorAttachment,
    PresentSrc,
}

/// Width of the indices consumed by an indexed draw.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum IndexType {
    U16,
    U32,
}

/// What a bind group binding holds.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DescriptorType {
    /// A uniform/constant buffer.
    ConstantBuffer,
    /// A read-write structured buffer.
    StorageBuffer,
    /// A sampled image view.
    SampledImage,
    /// A standalone sampler.
    Sampler,
}

/// Dimensionality of an image.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum ImageType {
    Image1D,
    Image2D,
    Image3D,
}

/// Dimensionality of an image view.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum ImageViewType {
    View1D,
    View2D,
    View3D,
    ViewCube,
    View1DArray,
    View2DArray,
}

/// How the driver lays image texels out in memory.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ImageTiling {
    /// Driver-chosen, GPU-friendly layout.
    Optimal,
    /// Row-major, host-readable layout.
    Linear,
}

/// Texture filtering for samplers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum Filter {
    Nearest,
    Linear,
}

/// What samplers do with coordinates outside the [0, 1] range.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum SamplerAddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
}

/// Comparison used by depth tests and comparison samplers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Source/destination factors for color blending.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// How blended source and destination terms combine.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Which triangle faces the rasterizer throws away.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Which winding order counts as front-facing.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

/// How the rasterizer fills primitives.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// Primitive assembly for draws.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    TriangleList,
}

/// Whether a vertex binding advances per vertex or per instance.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

/// How presentation paces itself against the display.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PresentMode {
    /// Strict vsync; always available.
    Fifo,
    /// No pacing, may tear.
    Immediate,
    /// Triple-buffered vsync without blocking.
    Mailbox,
}

/// The shader stages the built-in compiler front-end accepts.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

bitflags! {
    /// What a buffer may be used for. Values match the corresponding driver bits.
    pub struct BufferUsageFlags: u32 {
        const TRANSFER_SRC = 0x0000_0001;
        const TRANSFER_DST = 0x0000_0002;
        const UNIFORM = 0x0000_0010;
        const STORAGE = 0x0000_0020;
        const INDEX = 0x0000_0040;
        const VERTEX = 0x0000_0080;
        const INDIRECT = 0x0000_0100;
    }
}

bitflags! {
    /// What an image may be used for. Values match the corresponding driver bits.
    pub struct ImageUsageFlags: u32 {
        const TRANSFER_SRC = 0x0000_0001;
        const TRANSFER_DST = 0x0000_0002;
        const SAMPLED = 0x0000_0004;
        const COLOR_ATTACHMENT = 0x0000_0010;
        const DEPTH_STENCIL_ATTACHMENT = 0x0000_0020;
        const INPUT_ATTACHMENT = 0x0000_0080;
    }
}

bitflags! {
    /// Which shader stages can see a binding or push-constant range.
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 0x0001;
        const FRAGMENT = 0x0010;
        const COMPUTE = 0x0020;
    }
}

bitflags! {
    /// Pipeline stages referenced by barriers. Values match their driver counterparts.
    pub struct PipelineStageFlags: u32 {
        const TOP_OF_PIPE = 0x0000_0001;
        const VERTEX_INPUT = 0x0000_0004;
        const VERTEX_SHADER = 0x0000_0008;
        const FRAGMENT_SHADER = 0x0000_0080;
        const COLOR_ATTACHMENT_OUTPUT = 0x0000_0400;
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const BOTTOM_OF_PIPE = 0x0000_2000;
        const HOST = 0x0000_4000;
        const ALL_COMMANDS = 0x0001_0000;
    }
}

bitflags! {
    /// Memory access kinds referenced by barriers. Values match their driver counterparts.
    pub struct ResourceAccessFlags: u32 {
        const INDEX_READ = 0x0000_0002;
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        const UNIFORM_READ = 0x0000_0008;
        const INPUT_ATTACHMENT_READ = 0x0000_0010;
        const SHADER_READ = 0x0000_0020;
        const SHADER_WRITE = 0x0000_0040;
        const COLOR_ATTACHMENT_READ = 0x0000_0080;
        const COLOR_ATTACHMENT_WRITE = 0x0000_0100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x0000_0200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x0000_0400;
        const TRANSFER_READ = 0x0000_0800;
        const TRANSFER_WRITE = 0x0000_1000;
        const HOST_READ = 0x0000_2000;
        const HOST_WRITE = 0x0000_4000;
        const MEMORY_READ = 0x0000_8000;
        const MEMORY_WRITE = 0x0001_0000;
    }
}

bitflags! {
    /// Which color channels a blend attachment writes.
    pub struct ColorWriteFlags: u32 {
        const RED = 0x1;
        const GREEN = 0x2;
        const BLUE = 0x4;
        const ALPHA = 0x8;
        const ALL = 0xF;
    }
}

/// Everything that can go wrong at the RHI boundary.
///
/// Creation and mutation operations surface these directly. Command recording instead latches
/// the first violation into the list and reports it at `end()` and again at submit.
#[derive(Fail, Debug, Clone, Eq, PartialEq)]
pub enum RhiError {
    /// A descriptor failed a precondition: null required handle, zero extent, duplicate
    /// binding index, illegal transition, stale handle, and friends.
    #[fail(display = "Invalid argument: {}", reason)]
    InvalidArgument {
        /// What exactly was wrong.
        reason: &'static str,
    },

    /// Host or device allocation failed.
    #[fail(display = "There's not enough host or device memory to create the requested object.")]
    OutOfMemory,

    /// The driver reported a lost device on a submission or wait.
    #[fail(display = "The device was lost.")]
    DeviceLost,

    /// The shader front-end rejected the source.
    #[fail(display = "Shader compilation failed:\n{}", log)]
    ShaderCompile {
        /// The compiler's diagnostic log, verbatim.
        log: String,
    },

    /// The driver does not support a requested feature or extension.
    #[fail(display = "Not supported by this driver: {}", what)]
    Unsupported {
        /// The feature that was asked for.
        what: &'static str,
    },

    /// Any other driver status, preserved for diagnosis.
    #[fail(display = "The driver returned error code {}.", code)]
    Driver {
        /// The raw driver result code.
        code: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_sizes_pack_vertex_attributes() {
        assert_eq!(Format::R32G32Float.size_bytes(), 8);
        assert_eq!(Format::R32G32B32Float.size_bytes(), 12);
        assert_eq!(Format::R32G32B32A32Float.size_bytes(), 16);
        assert_eq!(Format::R8G8B8A8Unorm.size_bytes(), 4);
    }
}
