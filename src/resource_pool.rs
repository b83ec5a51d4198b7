use ash::vk;

use crate::{
    config::TextureMemoryConfig,
    dirty::{Animated, DirtySet},
    draw_commands::DrawIndexedIndirectCommand,
    error::Result,
    frame::{FrameSlot, FrameSlots},
    gpu::{
        BufferDesc, GpuBuffer, GpuDevice, MappedRegion, MemoryLocation, RawAccelerationStructure,
        RawBuffer,
    },
    scene::{Instance, Material, PointLight, Scene, SpotLight},
    uniforms::FrameUniforms,
};

/// Immutable geometry shared by every frame in flight.
pub struct SceneGeometry<B> {
    pub vertices: B,
    pub indices: B,
    pub tex_coords: B,
    pub meshes: B,
}

/// Everything the CPU writes for one frame. Only touched while the slot's fence is signaled.
pub struct FrameResources<B> {
    pub uniforms: MappedRegion<B, FrameUniforms>,
    pub instances: MappedRegion<B, Instance>,
    pub materials: MappedRegion<B, Material>,
    pub point_lights: MappedRegion<B, PointLight>,
    pub spot_lights: MappedRegion<B, SpotLight>,
    pub indirect_draws: MappedRegion<B, DrawIndexedIndirectCommand>,
    primed: bool,
}

/// Buffer handles a backend needs to build the descriptor set of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBindings {
    pub uniforms: RawBuffer,
    pub instances: RawBuffer,
    pub materials: RawBuffer,
    pub point_lights: RawBuffer,
    pub spot_lights: RawBuffer,
    pub meshes: RawBuffer,
    pub vertices: RawBuffer,
    pub indices: RawBuffer,
    pub tex_coords: RawBuffer,
    pub top_level: RawAccelerationStructure,
}

/// What one [`ResourcePool::update`] copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolUpdate {
    /// The slot was written for the first time, so every record was copied.
    pub full_copy: bool,
    pub instances: usize,
    pub point_lights: usize,
    pub spot_lights: usize,
}

pub struct ResourcePool<B> {
    geometry: SceneGeometry<B>,
    frames: FrameSlots<FrameResources<B>>,
    texture_limits: TextureMemoryConfig,
}

impl<B: GpuBuffer> ResourcePool<B> {
    pub fn new<D>(device: &D, scene: &Scene, texture_limits: TextureMemoryConfig) -> Result<Self>
    where
        D: GpuDevice<Buffer = B>,
    {
        let geometry = upload_geometry(device, scene)?;

        let frames = FrameSlots::try_from_fn(|slot| -> Result<FrameResources<B>> {
            let mut materials = MappedRegion::new(host_buffer::<_, Material>(
                device,
                "materials",
                slot,
                scene.materials.len(),
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )?)?;
            // Materials never change after loading.
            materials.write_slice(0, &scene.materials)?;

            Ok(FrameResources {
                uniforms: MappedRegion::new(host_buffer::<_, FrameUniforms>(
                    device,
                    "uniforms",
                    slot,
                    1,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )?)?,
                instances: MappedRegion::new(host_buffer::<_, Instance>(
                    device,
                    "instances",
                    slot,
                    scene.instances.len(),
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                )?)?,
                materials,
                point_lights: MappedRegion::new(host_buffer::<_, PointLight>(
                    device,
                    "point lights",
                    slot,
                    scene.point_lights.len(),
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                )?)?,
                spot_lights: MappedRegion::new(host_buffer::<_, SpotLight>(
                    device,
                    "spot lights",
                    slot,
                    scene.spot_lights.len(),
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                )?)?,
                indirect_draws: MappedRegion::new(host_buffer::<_, DrawIndexedIndirectCommand>(
                    device,
                    "indirect draws",
                    slot,
                    scene.instances.len(),
                    vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
                )?)?,
                primed: false,
            })
        })?;

        Ok(Self {
            geometry,
            frames,
            texture_limits,
        })
    }

    /// Copies this frame's scene state into the slot's buffers.
    ///
    /// The first update of a slot copies whole arrays, later ones only animated records.
    /// Must only be called while the slot's fence is signaled.
    pub fn update(
        &mut self,
        scene: &Scene,
        slot: FrameSlot,
        uniforms: &FrameUniforms,
    ) -> Result<PoolUpdate> {
        let frame = &mut self.frames[slot];
        let full_copy = !frame.primed;

        frame.uniforms.write(0, uniforms)?;
        let instances = write_dirty(&mut frame.instances, &scene.instances, full_copy)?;
        let point_lights = write_dirty(&mut frame.point_lights, &scene.point_lights, full_copy)?;
        let spot_lights = write_dirty(&mut frame.spot_lights, &scene.spot_lights, full_copy)?;
        frame.primed = true;

        Ok(PoolUpdate {
            full_copy,
            instances,
            point_lights,
            spot_lights,
        })
    }

    pub fn geometry(&self) -> &SceneGeometry<B> {
        &self.geometry
    }

    pub fn frame(&self, slot: FrameSlot) -> &FrameResources<B> {
        &self.frames[slot]
    }

    pub fn indirect_draws_mut(
        &mut self,
        slot: FrameSlot,
    ) -> &mut MappedRegion<B, DrawIndexedIndirectCommand> {
        &mut self.frames[slot].indirect_draws
    }

    /// Limits for whoever streams textures in.
    pub fn texture_limits(&self) -> &TextureMemoryConfig {
        &self.texture_limits
    }

    pub fn frame_bindings(
        &self,
        slot: FrameSlot,
        top_level: RawAccelerationStructure,
    ) -> FrameBindings {
        let frame = &self.frames[slot];
        FrameBindings {
            uniforms: frame.uniforms.buffer().raw(),
            instances: frame.instances.buffer().raw(),
            materials: frame.materials.buffer().raw(),
            point_lights: frame.point_lights.buffer().raw(),
            spot_lights: frame.spot_lights.buffer().raw(),
            meshes: self.geometry.meshes.raw(),
            vertices: self.geometry.vertices.raw(),
            indices: self.geometry.indices.raw(),
            tex_coords: self.geometry.tex_coords.raw(),
            top_level,
        }
    }
}

fn write_dirty<B: GpuBuffer, T: bytemuck::Pod + Animated>(
    region: &mut MappedRegion<B, T>,
    records: &[T],
    full_copy: bool,
) -> Result<usize> {
    let dirty = DirtySet::collect(records, full_copy);
    match &dirty {
        DirtySet::All { .. } => region.write_slice(0, records)?,
        DirtySet::Indices(indices) => {
            for &index in indices {
                region.write(index, &records[index])?;
            }
        }
    }
    Ok(dirty.len())
}

/// Host-mapped buffer owned by `slot`, with room for at least one element.
fn host_buffer<D: GpuDevice, T>(
    device: &D,
    name: &str,
    slot: FrameSlot,
    count: usize,
    usage: vk::BufferUsageFlags,
) -> Result<D::Buffer> {
    let label = format!("{} #{}", name, slot.index());
    let size = (count.max(1) * std::mem::size_of::<T>()) as vk::DeviceSize;
    log::debug!("Allocating '{}' ({} bytes)", label, size);
    device.create_buffer(&BufferDesc {
        label: &label,
        size,
        usage,
        location: MemoryLocation::HostMapped,
        slot: Some(slot),
    })
}

fn upload_geometry<D: GpuDevice>(device: &D, scene: &Scene) -> Result<SceneGeometry<D::Buffer>> {
    let build_input = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
        | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        | vk::BufferUsageFlags::STORAGE_BUFFER;
    let tex_coords: Vec<[f32; 2]> = scene.vertices.iter().map(|vertex| vertex.uv).collect();

    Ok(SceneGeometry {
        vertices: device_local(
            device,
            "vertices",
            bytemuck::cast_slice(&scene.vertices),
            build_input | vk::BufferUsageFlags::VERTEX_BUFFER,
        )?,
        indices: device_local(
            device,
            "indices",
            bytemuck::cast_slice(&scene.indices),
            build_input | vk::BufferUsageFlags::INDEX_BUFFER,
        )?,
        tex_coords: device_local(
            device,
            "texture coordinates",
            bytemuck::cast_slice(&tex_coords),
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?,
        meshes: device_local(
            device,
            "meshes",
            bytemuck::cast_slice(&scene.meshes),
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?,
    })
}

fn device_local<D: GpuDevice>(
    device: &D,
    label: &str,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<D::Buffer> {
    // Empty scenes still need something to bind.
    let size = data.len().max(16) as vk::DeviceSize;
    device.create_buffer_with_data(
        &BufferDesc {
            label,
            size,
            usage,
            location: MemoryLocation::DeviceLocal,
            slot: None,
        },
        data,
    )
}
