// Shader module loading
//
// Vulkan consumes SPIR-V words. Shaders are compiled by build.rs and loaded
// from disk at startup, so the path can come from config.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;
use crate::frame::GpuDevice;
use crate::lifetime::Teardown;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a SPIR-V blob into aligned words (either endianness).
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V")?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        _ => anyhow::bail!("Not a SPIR-V module (bad magic number)"),
    }
}

/// Read a compiled shader from disk.
pub fn load_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?} (was it compiled?)", path))?;

    parse_spirv(&bytes).with_context(|| format!("Failed to load shader {:?}", path))
}

/// Create a shader module; it stays alive until shutdown.
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    let module = unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")?;
    device.defer(Teardown::ShaderModule(module));

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_valid_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let bytes = words_to_bytes(&[0xdead_beef, 0]);
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn test_rejects_truncated_blob() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0]);
        bytes.pop();
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_spirv("does/not/exist.spv").unwrap_err();
        assert!(format!("{:#}", err).contains("does/not/exist.spv"));
    }
}
