// Shader compilation and module creation
//
// GLSL sources are compiled to SPIR-V with shaderc when the pipeline is
// built, so editing a shader only needs a restart.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

use super::VulkanDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn kind(self) -> shaderc::ShaderKind {
        match self {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        }
    }

    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Compile the GLSL file at `path` into SPIR-V words
pub fn compile_file(path: &Path, stage: ShaderStage) -> Result<Vec<u32>> {
    if !path.is_file() {
        anyhow::bail!("{} is not a valid file path", path.display());
    }

    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read shader {}", path.display()))?;

    let compiler = shaderc::Compiler::new().context("Failed to initialise shaderc")?;
    let file_name = path.to_string_lossy();

    let artifact = compiler
        .compile_into_spirv(&source, stage.kind(), &file_name, "main", None)
        .map_err(|e| {
            log::error!("{}", e);
            anyhow::anyhow!("Failed to compile {}", path.display())
        })?;

    if artifact.get_num_warnings() > 0 {
        log::warn!("{}", artifact.get_warning_messages());
    }

    let words = artifact.as_binary().to_vec();
    if words.is_empty() {
        anyhow::bail!("Compiling {} produced no SPIR-V", path.display());
    }

    log::debug!("Compiled {} ({} words)", path.display(), words.len());
    Ok(words)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn shader_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders").join(name)
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = compile_file(Path::new("shaders/does_not_exist.vert"), ShaderStage::Vertex)
            .unwrap_err();
        assert!(err.to_string().contains("is not a valid file path"));
    }

    #[test]
    fn directory_is_rejected() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders");
        assert!(compile_file(&dir, ShaderStage::Fragment).is_err());
    }

    #[test]
    fn bundled_shaders_compile() {
        let vert = compile_file(&shader_path("basic.vert"), ShaderStage::Vertex).unwrap();
        let frag = compile_file(&shader_path("basic.frag"), ShaderStage::Fragment).unwrap();
        assert_eq!(vert[0], SPIRV_MAGIC);
        assert_eq!(frag[0], SPIRV_MAGIC);
    }

    #[test]
    fn wrong_stage_fails_to_compile() {
        // gl_Position is not writable from a fragment shader
        assert!(compile_file(&shader_path("basic.vert"), ShaderStage::Fragment).is_err());
    }
}
