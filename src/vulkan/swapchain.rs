use std::sync::Arc;

use ash::vk::{self, SwapchainCreateInfoKHR};

use crate::{
    error::{Error, Result, VkResultExt},
    gpu::{AcquireOutcome, PresentOutcome},
    vulkan::context::Context,
};

/// Swapchain images are only ever blitted into, never rendered to directly.
pub struct SwapchainContainer {
    pub loader: ash::extensions::khr::Swapchain,
    pub inner: vk::SwapchainKHR,

    pub images: Vec<vk::Image>,

    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,

    present_mode: vk::PresentModeKHR,

    context: Arc<Context>,
}

impl SwapchainContainer {
    pub fn new(
        context: Arc<Context>,
        window_size: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, context.surface)
        }
        .vk_context("Could not get surface formats from physical device")?;

        let present_modes = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_present_modes(context.physical_device, context.surface)
        }
        .vk_context("Could not get present modes from physical device")?;

        let surface_format = formats
            .into_iter()
            .min_by_key(|fmt| match (fmt.format, fmt.color_space) {
                (vk::Format::B8G8R8A8_SRGB, _) => 1,
                (vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR) => 2,
                (_, _) => 3,
            })
            .ok_or(Error::Vulkan {
                context: "Surface has no formats",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            })?;

        // FIFO is always available.
        let present_mode = present_modes
            .into_iter()
            .find(|&pm| pm == preferred_present_mode)
            .unwrap_or(vk::PresentModeKHR::FIFO);
        if present_mode != preferred_present_mode {
            log::warn!(
                "Present mode {:?} is not supported, falling back to {:?}",
                preferred_present_mode,
                present_mode
            );
        }

        let loader = ash::extensions::khr::Swapchain::new(&context.instance, &context.device);

        let (inner, extent) = create_swapchain(
            &context,
            &loader,
            surface_format,
            present_mode,
            window_size,
            vk::SwapchainKHR::null(),
        )?;

        let images = unsafe { loader.get_swapchain_images(inner) }
            .vk_context("Could not get swapchain images")?;
        log::info!(
            "Created swapchain with {} images of {}x{}",
            images.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            loader,
            inner,
            images,
            surface_format,
            extent,
            present_mode,
            context,
        })
    }

    pub fn recreate(&mut self, window_size: vk::Extent2D) -> Result<()> {
        unsafe { self.context.device.device_wait_idle() }
            .vk_context("Could not wait for device idle")?;

        let (inner, extent) = create_swapchain(
            &self.context,
            &self.loader,
            self.surface_format,
            self.present_mode,
            window_size,
            self.inner,
        )?;

        let images = unsafe { self.loader.get_swapchain_images(inner) }
            .vk_context("Could not get swapchain images")?;

        // The device is idle, nothing uses the old swapchain anymore
        unsafe { self.loader.destroy_swapchain(self.inner, None) };

        self.inner = inner;
        self.extent = extent;
        self.images = images;
        Ok(())
    }

    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.inner, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(result).vk_context("Could not acquire swapchain image"),
        }
    }

    pub fn present(&self, wait_semaphore: vk::Semaphore, image_index: u32) -> Result<PresentOutcome> {
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(std::slice::from_ref(&wait_semaphore))
            .swapchains(std::slice::from_ref(&self.inner))
            .image_indices(std::slice::from_ref(&image_index));

        match unsafe { self.loader.queue_present(self.context.queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(result).vk_context("Could not present swapchain image"),
        }
    }
}

impl Drop for SwapchainContainer {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_swapchain(self.inner, None) };
    }
}

fn create_swapchain(
    context: &Context,
    loader: &ash::extensions::khr::Swapchain,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    window_size: vk::Extent2D,
    old_swapchain: vk::SwapchainKHR,
) -> Result<(vk::SwapchainKHR, vk::Extent2D)> {
    let capabilities = unsafe {
        context
            .surface_loader
            .get_physical_device_surface_capabilities(context.physical_device, context.surface)
    }
    .vk_context("Could not get surface capabilities from physical device")?;

    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_size.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_size.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    };

    let mut num_images = capabilities.min_image_count.max(2);
    if capabilities.max_image_count != 0 {
        num_images = num_images.min(capabilities.max_image_count);
    }

    let create_info = SwapchainCreateInfoKHR::builder()
        .surface(context.surface)
        .min_image_count(num_images)
        .image_color_space(surface_format.color_space)
        .image_format(surface_format.format)
        .image_extent(extent)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .image_array_layers(1)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
        .vk_context("Could not create swapchain")?;
    Ok((swapchain, extent))
}
