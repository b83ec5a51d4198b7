use std::{ffi::CStr, mem::ManuallyDrop, sync::Mutex};

use ash::{
    extensions::khr::{AccelerationStructure, Synchronization2},
    vk::{self, ApplicationInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo},
};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

use crate::error::{Error, Result, VkResultExt};

pub struct Context {
    _entry: ash::Entry,
    pub instance: ash::Instance,

    pub surface_loader: ash::extensions::khr::Surface,
    pub surface: vk::SurfaceKHR,

    pub acceleration_structure: AccelerationStructure,
    pub acceleration_structure_properties: vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
    pub synchronisation2_loader: Synchronization2,

    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,

    pub device: ash::Device,
    pub queue: vk::Queue,

    pub device_memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Dropped before the device is destroyed.
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
}

impl Context {
    pub fn new(window: &Window) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }?;

        let instance = {
            let surface_extension =
                ash_window::enumerate_required_extensions(window.raw_display_handle())
                    .vk_context("Could not enumerate surface extensions")?;

            let app_info = ApplicationInfo::builder().api_version(vk::API_VERSION_1_3);
            let create_info = InstanceCreateInfo::builder()
                .application_info(&app_info)
                .enabled_extension_names(surface_extension);
            unsafe { entry.create_instance(&create_info, None) }
                .vk_context("Could not create instance")?
        };

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .vk_context("Could not create surface")?;
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);

        let (physical_device, queue_family_index) =
            find_physical_device(&instance, &surface, &surface_loader)?;
        check_features(&instance, physical_device)?;

        let device = create_logical_device(&instance, physical_device, queue_family_index)?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let acceleration_structure = AccelerationStructure::new(&instance, &device);
        let acceleration_structure_properties =
            unsafe { AccelerationStructure::get_properties(&instance, physical_device) };
        let synchronisation2_loader = Synchronization2::new(&instance, &device);

        let device_memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .map_err(|error| Error::Allocation {
            label: "allocator".to_string(),
            size: 0,
            reason: error.to_string(),
        })?;

        Ok(Self {
            _entry: entry,
            instance,

            surface,
            surface_loader,

            acceleration_structure,
            acceleration_structure_properties,
            synchronisation2_loader,

            physical_device,
            queue_family_index,

            device,
            queue,

            device_memory_properties,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
        })
    }

    /// Sum of all device-local memory heaps.
    pub fn device_local_memory(&self) -> u64 {
        let properties = &self.device_memory_properties;
        properties.memory_heaps[..properties.memory_heap_count as usize]
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    pub fn allocator(&self) -> std::sync::MutexGuard<'_, Allocator> {
        // A poisoned allocator is still consistent, a panic never happens mid-allocation.
        self.allocator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.allocator) };

        unsafe { self.device.destroy_device(None) };

        unsafe { self.surface_loader.destroy_surface(self.surface, None) };

        unsafe { self.instance.destroy_instance(None) };
    }
}

fn required_device_extensions() -> [&'static CStr; 4] {
    [
        ash::extensions::khr::Swapchain::name(),
        ash::extensions::khr::AccelerationStructure::name(),
        ash::extensions::khr::DeferredHostOperations::name(),
        vk::KhrRayQueryFn::name(),
    ]
}

fn find_physical_device(
    instance: &ash::Instance,
    surface: &vk::SurfaceKHR,
    surface_loader: &ash::extensions::khr::Surface,
) -> Result<(vk::PhysicalDevice, u32)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }
        .vk_context("Could not enumerate physical devices")?;

    let (physical_device, queue_family_index) = physical_devices
        .into_iter()
        .filter(|pd| {
            let Ok(extension_properties) =
                (unsafe { instance.enumerate_device_extension_properties(*pd) })
            else {
                return false;
            };
            let supported: Vec<_> = extension_properties
                .iter()
                .map(|property| unsafe { CStr::from_ptr(property.extension_name.as_ptr()) })
                .collect();

            required_device_extensions()
                .iter()
                .all(|required| supported.contains(required))
        })
        .filter_map(|pd| {
            unsafe { instance.get_physical_device_queue_family_properties(pd) }
                .iter()
                .enumerate()
                .position(|(index, info)| {
                    let supports_graphics = info.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                    let supports_surface = unsafe {
                        surface_loader.get_physical_device_surface_support(
                            pd,
                            index as u32,
                            *surface,
                        )
                    }
                    .unwrap_or(false);

                    supports_graphics && supports_surface
                })
                .map(|i| (pd, i as u32))
        })
        .min_by_key(|(pd, _)| {
            let device_type = unsafe { instance.get_physical_device_properties(*pd) }.device_type;

            match device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                vk::PhysicalDeviceType::CPU => 3,
                vk::PhysicalDeviceType::OTHER => 4,
                _ => 5,
            }
        })
        .ok_or_else(|| {
            Error::NoSuitableDevice(
                "no GPU with ray queries, acceleration structures and presentation".to_string(),
            )
        })?;

    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
    log::info!("Using {:?} ({:?})", name, properties.device_type);

    Ok((physical_device, queue_family_index))
}

fn check_features(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Result<()> {
    let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut acceleration_structure = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut ray_query = vk::PhysicalDeviceRayQueryFeaturesKHR::default();
    let mut features = vk::PhysicalDeviceFeatures2::builder()
        .push_next(&mut vulkan12)
        .push_next(&mut vulkan13)
        .push_next(&mut acceleration_structure)
        .push_next(&mut ray_query);
    unsafe { instance.get_physical_device_features2(physical_device, &mut features) };
    let core = features.features;

    let checks = [
        (vulkan12.buffer_device_address, "bufferDeviceAddress"),
        (vulkan12.descriptor_indexing, "descriptorIndexing"),
        (vulkan13.synchronization2, "synchronization2"),
        (vulkan13.dynamic_rendering, "dynamicRendering"),
        (acceleration_structure.acceleration_structure, "accelerationStructure"),
        (ray_query.ray_query, "rayQuery"),
        (core.multi_draw_indirect, "multiDrawIndirect"),
        (core.draw_indirect_first_instance, "drawIndirectFirstInstance"),
    ];
    for (supported, name) in checks {
        if supported != vk::TRUE {
            log::error!("The selected GPU does not support {}", name);
            return Err(Error::MissingFeature(name));
        }
    }
    Ok(())
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
) -> Result<ash::Device> {
    let device_extensions = required_device_extensions().map(|name| name.as_ptr());

    let queue_priorities = [1.0];
    let queue_create_info = DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities);

    let enabled_features = vk::PhysicalDeviceFeatures {
        multi_draw_indirect: vk::TRUE,
        draw_indirect_first_instance: vk::TRUE,
        ..Default::default()
    };

    let mut physical_device_vulkan12_features = vk::PhysicalDeviceVulkan12Features {
        buffer_device_address: vk::TRUE,
        descriptor_indexing: vk::TRUE,
        ..vk::PhysicalDeviceVulkan12Features::default()
    };

    let mut physical_device_vulkan13_features = vk::PhysicalDeviceVulkan13Features {
        synchronization2: vk::TRUE,
        dynamic_rendering: vk::TRUE,
        ..vk::PhysicalDeviceVulkan13Features::default()
    };

    let mut enabled_acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR {
            acceleration_structure: vk::TRUE,
            ..vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
        };

    let mut enabled_ray_query_features = vk::PhysicalDeviceRayQueryFeaturesKHR {
        ray_query: vk::TRUE,
        ..vk::PhysicalDeviceRayQueryFeaturesKHR::default()
    };

    let create_info = DeviceCreateInfo::builder()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&device_extensions)
        .enabled_features(&enabled_features)
        .push_next(&mut physical_device_vulkan12_features)
        .push_next(&mut physical_device_vulkan13_features)
        .push_next(&mut enabled_acceleration_structure_features)
        .push_next(&mut enabled_ray_query_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }
        .vk_context("Could not create logical device")
}
