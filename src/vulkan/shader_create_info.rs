use std::{ffi::CStr, fs::File, path::Path, sync::Arc};

use ash::vk;

use super::context::Context;
use crate::error::{Result, VkResultExt};

const SHADER_ENTRY_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// A SPIR-V module loaded from disk, destroyed once the pipelines are created.
pub struct ShaderModule {
    context: Arc<Context>,
    inner: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    pub fn from_file(
        context: Arc<Context>,
        stage: vk::ShaderStageFlags,
        path: &Path,
    ) -> Result<Self> {
        let mut spv_file = File::open(path).map_err(|error| {
            log::error!("Could not open shader {}: {}", path.display(), error);
            error
        })?;
        let shader_code = ash::util::read_spv(&mut spv_file)?;

        let inner = {
            let create_info = vk::ShaderModuleCreateInfo::builder().code(&shader_code);
            unsafe { context.device.create_shader_module(&create_info, None) }
                .vk_context("Could not create shader module")?
        };

        Ok(Self {
            context,
            inner,
            stage,
        })
    }

    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .module(self.inner)
            .name(SHADER_ENTRY_NAME)
            .stage(self.stage)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .destroy_shader_module(self.inner, None);
        }
    }
}
