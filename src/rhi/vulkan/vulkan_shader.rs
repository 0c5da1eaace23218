//! The Vulkan backend's shader front-end: HLSL text in, SPIR-V out.

use crate::rhi::{
    DescriptorType, RhiError, ShaderBindingReflection, ShaderCompileInfo, ShaderCompiler, ShaderStage,
};

use spirv_cross::{hlsl, spirv};

/// Compiles HLSL to SPIR-V and reflects the result.
///
/// Compilation goes through shaderc's HLSL front-end; reflection parses the produced SPIR-V
/// back so callers can build pipeline layouts without duplicating what the shader already
/// declares.
pub struct VulkanShaderCompiler {
    compiler: shaderc::Compiler,
}

impl VulkanShaderCompiler {
    /// Creates the compiler. Fails if the shaderc backend can't be initialized.
    pub fn new() -> Result<Self, RhiError> {
        let compiler = shaderc::Compiler::new().ok_or(RhiError::Unsupported {
            what: "shaderc compiler initialization",
        })?;
        Ok(VulkanShaderCompiler { compiler })
    }

    fn shader_kind(stage: ShaderStage) -> shaderc::ShaderKind {
        match stage {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        }
    }

    fn binding_count(ty: &spirv::Type) -> u32 {
        let array = match ty {
            spirv::Type::Struct { array, .. }
            | spirv::Type::Image { array }
            | spirv::Type::SampledImage { array }
            | spirv::Type::Sampler { array } => array,
            _ => return 1,
        };
        array.iter().product::<u32>().max(1)
    }

    fn reflect_resources(
        ast: &spirv::Ast<hlsl::Target>,
        resources: &[spirv::Resource],
        descriptor_type: DescriptorType,
        out: &mut Vec<ShaderBindingReflection>,
    ) -> Result<(), RhiError> {
        for resource in resources {
            let set = ast
                .get_decoration(resource.id, spirv::Decoration::DescriptorSet)
                .map_err(reflection_error)?;
            let binding = ast
                .get_decoration(resource.id, spirv::Decoration::Binding)
                .map_err(reflection_error)?;
            let count = ast
                .get_type(resource.type_id)
                .map(|ty| Self::binding_count(&ty))
                .unwrap_or(1);

            out.push(ShaderBindingReflection {
                set,
                binding,
                descriptor_type,
                count,
            });
        }
        Ok(())
    }
}

impl ShaderCompiler for VulkanShaderCompiler {
    fn compile(&mut self, info: &ShaderCompileInfo) -> Result<Vec<u8>, RhiError> {
        let mut options = shaderc::CompileOptions::new().ok_or(RhiError::OutOfMemory)?;
        options.set_source_language(shaderc::SourceLanguage::HLSL);

        self.compiler
            .compile_into_spirv(
                &info.source,
                Self::shader_kind(info.stage),
                "<embedded>",
                &info.entry_point,
                Some(&options),
            )
            .map(|artifact| artifact.as_binary_u8().to_vec())
            .map_err(|error| RhiError::ShaderCompile {
                log: error.to_string(),
            })
    }

    fn reflect(&self, ir: &[u8]) -> Result<Vec<ShaderBindingReflection>, RhiError> {
        if ir.is_empty() || ir.len() % 4 != 0 {
            return Err(RhiError::InvalidArgument {
                reason: "SPIR-V blob length must be a non-zero multiple of four",
            });
        }

        let words: Vec<u32> = ir
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let module = spirv::Module::from_words(&words);
        let ast = spirv::Ast::<hlsl::Target>::parse(&module).map_err(reflection_error)?;
        let resources = ast.get_shader_resources().map_err(reflection_error)?;

        let mut bindings = Vec::new();
        Self::reflect_resources(&ast, &resources.uniform_buffers, DescriptorType::ConstantBuffer, &mut bindings)?;
        Self::reflect_resources(&ast, &resources.storage_buffers, DescriptorType::StorageBuffer, &mut bindings)?;
        Self::reflect_resources(&ast, &resources.separate_images, DescriptorType::SampledImage, &mut bindings)?;
        Self::reflect_resources(&ast, &resources.separate_samplers, DescriptorType::Sampler, &mut bindings)?;

        bindings.sort_by_key(|binding| (binding.set, binding.binding));
        Ok(bindings)
    }
}

fn reflection_error(_: spirv_cross::ErrorCode) -> RhiError {
    RhiError::InvalidArgument {
        reason: "SPIR-V blob could not be reflected",
    }
}
