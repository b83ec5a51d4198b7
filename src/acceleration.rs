use ash::vk;
use bytemuck::{Pod, Zeroable};
use ultraviolet::Mat4;

use crate::{
    dirty::DirtySet,
    error::{Error, Result},
    frame::{FrameSlot, FrameSlots},
    gpu::{
        AccelerationBuild, AccelerationGeometry, AccelerationLevel, BufferDesc, BuildMode,
        BuildSizes, Command, CommandList, GpuAccelerationStructure, GpuBuffer, GpuDevice,
        MappedRegion, MemoryBarrier, MemoryLocation, RawAccelerationStructure,
    },
    scene::{AlphaMode, Instance, Material, Scene, Vertex},
    utility::aligned_size,
};

/// Ray mask bit for instances that show up in reflections.
pub const REFLECTIVE_MASK: u8 = 0x01;
/// Ray mask bit for instances that block shadow rays.
pub const SHADOW_CASTER_MASK: u8 = 0x02;

/// Same layout as `VkAccelerationStructureInstanceKHR`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TopLevelInstance {
    /// Row-major 3x4 object-to-world matrix.
    pub transform: [f32; 12],
    /// Custom index in the low 24 bits, ray mask in the high 8 bits.
    pub custom_index_and_mask: u32,
    /// Shader binding table offset in the low 24 bits, instance flags in the high 8 bits.
    pub sbt_offset_and_flags: u32,
    /// Device address of the bottom-level structure, 0 for an inactive instance.
    pub acceleration_structure_reference: u64,
}

impl TopLevelInstance {
    pub fn new(custom_index: u32, mask: u8, transform: &Mat4, blas_address: u64) -> Self {
        Self {
            transform: row_major_3x4(transform),
            custom_index_and_mask: (custom_index & 0x00ff_ffff) | ((mask as u32) << 24),
            sbt_offset_and_flags: 0,
            acceleration_structure_reference: blas_address,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0x00ff_ffff
    }

    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }
}

fn row_major_3x4(matrix: &Mat4) -> [f32; 12] {
    let mut rows = [0.0; 12];
    for (column_index, column) in matrix.cols.iter().enumerate() {
        rows[column_index] = column.x;
        rows[4 + column_index] = column.y;
        rows[8 + column_index] = column.z;
    }
    rows
}

/// Missing materials count as reflective shadow casters.
fn ray_mask(instance: &Instance, material: Option<&Material>) -> u8 {
    let mut mask = 0;
    if instance.is_reflective() || material.map_or(true, Material::is_reflective) {
        mask |= REFLECTIVE_MASK;
    }
    if instance.casts_shadows() || material.map_or(true, Material::casts_shadows) {
        mask |= SHADOW_CASTER_MASK;
    }
    mask
}

pub struct BottomLevelStructure<D: GpuDevice> {
    structure: D::AccelerationStructure,
    _buffer: D::Buffer,
    primitive_count: u32,
    opaque: bool,
}

impl<D: GpuDevice> BottomLevelStructure<D> {
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.structure.device_address()
    }

    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }
}

/// One slot's top-level structure together with everything needed to refit it.
pub struct TopLevelStructure<D: GpuDevice> {
    structure: D::AccelerationStructure,
    _buffer: D::Buffer,
    scratch: D::Buffer,
    scratch_address: vk::DeviceAddress,
    instances: MappedRegion<D::Buffer, TopLevelInstance>,
    primitive_count: u32,
    updates: u64,
}

impl<D: GpuDevice> TopLevelStructure<D> {
    pub fn raw(&self) -> RawAccelerationStructure {
        self.structure.raw()
    }

    pub fn instances(&self) -> &MappedRegion<D::Buffer, TopLevelInstance> {
        &self.instances
    }

    pub fn scratch_size(&self) -> vk::DeviceSize {
        self.scratch.size()
    }

    /// Number of recorded refits.
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevelUpdate {
    /// Nothing moved, no GPU work was recorded.
    Skipped,
    Updated { instances: usize },
}

/// Keeps the ray tracing acceleration structures in sync with the scene.
///
/// Bottom-level structures are built once per mesh. Every frame-in-flight slot owns a
/// separate top-level structure, instance buffer and scratch buffer, because the previous
/// frame may still be tracing against its own copy while this one is refitted.
pub struct AccelerationStructureManager<D: GpuDevice> {
    bottom_levels: Vec<BottomLevelStructure<D>>,
    top_levels: FrameSlots<TopLevelStructure<D>>,
    /// Instance records as written by the initial build. Updates only swap the transform.
    templates: Vec<TopLevelInstance>,
}

impl<D: GpuDevice> AccelerationStructureManager<D> {
    pub fn new(
        device: &D,
        scene: &Scene,
        vertex_address: vk::DeviceAddress,
        index_address: vk::DeviceAddress,
    ) -> Result<Self> {
        let bottom_levels =
            Self::build_static_structures(device, scene, vertex_address, index_address)?;
        let templates = instance_records(scene, &bottom_levels);
        let top_levels = Self::build_initial_top_level(device, &templates)?;
        Ok(Self {
            bottom_levels,
            top_levels,
            templates,
        })
    }

    /// Builds one bottom-level structure per mesh, each with a blocking one-shot submission.
    pub fn build_static_structures(
        device: &D,
        scene: &Scene,
        vertex_address: vk::DeviceAddress,
        index_address: vk::DeviceAddress,
    ) -> Result<Vec<BottomLevelStructure<D>>> {
        let index_size = std::mem::size_of::<u32>() as vk::DeviceSize;

        scene
            .meshes
            .iter()
            .enumerate()
            .map(|(mesh_index, mesh)| {
                let label = format!("mesh {} bottom level", mesh_index);
                let opaque = scene
                    .material_of(mesh)
                    .map_or(false, |material| material.alpha_mode() == AlphaMode::Opaque);
                let geometry = AccelerationGeometry::Triangles {
                    vertex_data: vertex_address + mesh.base_vertex as u64 * Vertex::stride(),
                    vertex_stride: Vertex::stride(),
                    max_vertex: mesh.vertex_count.saturating_sub(1),
                    index_data: index_address + mesh.base_index as u64 * index_size,
                    opaque,
                };
                let primitive_count = mesh.triangle_count();

                let sizes = query_sizes(
                    device,
                    &label,
                    AccelerationLevel::Bottom,
                    &geometry,
                    false,
                    primitive_count,
                )?;
                let buffer = structure_buffer(device, &label, sizes.structure_size, None)?;
                let structure = device.create_acceleration_structure(
                    &label,
                    AccelerationLevel::Bottom,
                    &buffer,
                    sizes.structure_size,
                )?;
                let scratch = scratch_buffer(device, &label, sizes.build_scratch_size, None)?;

                let mut commands = CommandList::new();
                commands.push(Command::BuildAccelerationStructure(AccelerationBuild {
                    level: AccelerationLevel::Bottom,
                    mode: BuildMode::Build,
                    allow_update: false,
                    geometry,
                    primitive_count,
                    source: None,
                    destination: structure.raw(),
                    scratch_address: aligned_size(
                        scratch.device_address(),
                        device.scratch_alignment(),
                    ),
                }));
                device.submit_immediate(&commands)?;

                log::info!(
                    "Built {} ({} triangles, {} bytes, opaque: {})",
                    label,
                    primitive_count,
                    sizes.structure_size,
                    opaque
                );
                Ok(BottomLevelStructure {
                    structure,
                    _buffer: buffer,
                    primitive_count,
                    opaque,
                })
            })
            .collect()
    }

    /// Builds every slot's top-level structure from the same instance records, with
    /// updates allowed so later frames can refit instead of rebuilding.
    pub fn build_initial_top_level(
        device: &D,
        records: &[TopLevelInstance],
    ) -> Result<FrameSlots<TopLevelStructure<D>>> {
        let primitive_count = records.len() as u32;

        FrameSlots::try_from_fn(|slot| -> Result<TopLevelStructure<D>> {
            let label = format!("top level #{}", slot.index());

            let instance_buffer = device.create_buffer(&BufferDesc {
                label: &format!("top level instances #{}", slot.index()),
                size: (records.len().max(1) * std::mem::size_of::<TopLevelInstance>())
                    as vk::DeviceSize,
                usage: vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                    | vk::BufferUsageFlags::TRANSFER_DST,
                location: MemoryLocation::HostMapped,
                slot: Some(slot),
            })?;
            let mut instances = MappedRegion::new(instance_buffer)?;
            instances.write_slice(0, records)?;

            let geometry = AccelerationGeometry::Instances {
                data: instances.buffer().device_address(),
            };
            let sizes = query_sizes(
                device,
                &label,
                AccelerationLevel::Top,
                &geometry,
                true,
                primitive_count,
            )?;
            let buffer = structure_buffer(device, &label, sizes.structure_size, Some(slot))?;
            let structure = device.create_acceleration_structure(
                &label,
                AccelerationLevel::Top,
                &buffer,
                sizes.structure_size,
            )?;
            let scratch = scratch_buffer(
                device,
                &label,
                sizes.build_scratch_size.max(sizes.update_scratch_size),
                Some(slot),
            )?;
            let scratch_address =
                aligned_size(scratch.device_address(), device.scratch_alignment());

            let mut commands = CommandList::new();
            commands.push(Command::BuildAccelerationStructure(AccelerationBuild {
                level: AccelerationLevel::Top,
                mode: BuildMode::Build,
                allow_update: true,
                geometry,
                primitive_count,
                source: None,
                destination: structure.raw(),
                scratch_address,
            }));
            device.submit_immediate(&commands)?;

            log::info!(
                "Built {} ({} instances, {} bytes)",
                label,
                primitive_count,
                sizes.structure_size
            );
            Ok(TopLevelStructure {
                structure,
                _buffer: buffer,
                scratch,
                scratch_address,
                instances,
                primitive_count,
                updates: 0,
            })
        })
    }

    /// Writes moved instance transforms into the slot's instance buffer and records an
    /// in-place refit, fenced by barriers, into `commands`.
    ///
    /// Only animated instances are written unless `force_full_refresh` is set. Records
    /// nothing when there is nothing to write. Must run while the slot's fence is
    /// signaled and before anything in the same frame reads the structure.
    pub fn update_top_level(
        &mut self,
        scene: &Scene,
        slot: FrameSlot,
        force_full_refresh: bool,
        commands: &mut CommandList,
    ) -> Result<TopLevelUpdate> {
        let dirty = DirtySet::collect(&scene.instances, force_full_refresh);
        if dirty.is_empty() && !force_full_refresh {
            return Ok(TopLevelUpdate::Skipped);
        }

        let top_level = &mut self.top_levels[slot];
        for index in dirty.iter() {
            let Some(template) = self.templates.get(index) else {
                continue;
            };
            let record = TopLevelInstance {
                transform: row_major_3x4(scene.instances[index].transform()),
                ..*template
            };
            top_level.instances.write(index, &record)?;
        }

        commands.push(Command::Barrier(MemoryBarrier {
            src_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags2::TRANSFER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR
                | vk::AccessFlags2::TRANSFER_WRITE
                | vk::AccessFlags2::SHADER_READ,
            dst_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            dst_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        }));
        commands.push(Command::BuildAccelerationStructure(AccelerationBuild {
            level: AccelerationLevel::Top,
            mode: BuildMode::Update,
            allow_update: true,
            geometry: AccelerationGeometry::Instances {
                data: top_level.instances.buffer().device_address(),
            },
            primitive_count: top_level.primitive_count,
            source: Some(top_level.raw()),
            destination: top_level.raw(),
            scratch_address: top_level.scratch_address,
        }));
        commands.push(Command::Barrier(MemoryBarrier {
            src_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            src_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            dst_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            dst_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags2::SHADER_READ,
        }));
        top_level.updates += 1;

        Ok(TopLevelUpdate::Updated {
            instances: dirty.len(),
        })
    }

    pub fn bottom_levels(&self) -> &[BottomLevelStructure<D>] {
        &self.bottom_levels
    }

    pub fn top_level(&self, slot: FrameSlot) -> &TopLevelStructure<D> {
        &self.top_levels[slot]
    }
}

/// One record per instance, referencing its mesh's bottom-level structure.
fn instance_records<D: GpuDevice>(
    scene: &Scene,
    bottom_levels: &[BottomLevelStructure<D>],
) -> Vec<TopLevelInstance> {
    scene
        .instances
        .iter()
        .enumerate()
        .map(|(index, instance)| {
            let mesh_index = instance.mesh_index();
            let Some(blas) = mesh_index.and_then(|i| bottom_levels.get(i)) else {
                log::warn!("Instance {} has no mesh, it stays inactive", index);
                return TopLevelInstance::new(index as u32, 0, instance.transform(), 0);
            };
            let material = scene
                .mesh_of(instance)
                .and_then(|mesh| scene.material_of(mesh));
            TopLevelInstance::new(
                index as u32,
                ray_mask(instance, material),
                instance.transform(),
                blas.device_address(),
            )
        })
        .collect()
}

fn query_sizes<D: GpuDevice>(
    device: &D,
    label: &str,
    level: AccelerationLevel,
    geometry: &AccelerationGeometry,
    allow_update: bool,
    primitive_count: u32,
) -> Result<BuildSizes> {
    device
        .acceleration_structure_build_sizes(level, geometry, allow_update, primitive_count)
        .map_err(|error| Error::AccelerationStructure {
            label: label.to_string(),
            reason: format!("build size query failed: {}", error),
        })
}

fn structure_buffer<D: GpuDevice>(
    device: &D,
    label: &str,
    size: vk::DeviceSize,
    slot: Option<FrameSlot>,
) -> Result<D::Buffer> {
    device.create_buffer(&BufferDesc {
        label,
        size,
        usage: vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        location: MemoryLocation::DeviceLocal,
        slot,
    })
}

/// Over-allocated so the start address can be rounded up to the scratch alignment.
fn scratch_buffer<D: GpuDevice>(
    device: &D,
    label: &str,
    size: vk::DeviceSize,
    slot: Option<FrameSlot>,
) -> Result<D::Buffer> {
    device.create_buffer(&BufferDesc {
        label: &format!("{} scratch", label),
        size: size + device.scratch_alignment(),
        usage: vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        location: MemoryLocation::DeviceLocal,
        slot,
    })
}

#[cfg(test)]
mod tests {
    use ultraviolet::{Mat4, Vec3};

    use super::*;
    use crate::{
        gpu::mock::MockDevice,
        scene::test_scenes,
    };

    const VERTICES: vk::DeviceAddress = 0x4000_0000;
    const INDICES: vk::DeviceAddress = 0x8000_0000;

    fn manager(device: &MockDevice, scene: &Scene) -> AccelerationStructureManager<MockDevice> {
        AccelerationStructureManager::new(device, scene, VERTICES, INDICES).unwrap()
    }

    #[test]
    fn instance_record_matches_vulkan_layout() {
        assert_eq!(
            std::mem::size_of::<TopLevelInstance>(),
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()
        );
        let record = TopLevelInstance::new(0x12_3456, 0xab, &Mat4::identity(), 7);
        assert_eq!(record.custom_index_and_mask, (0xab << 24) | 0x12_3456);
        assert_eq!(record.custom_index(), 0x12_3456);
        assert_eq!(record.mask(), 0xab);
    }

    #[test]
    fn transforms_are_stored_row_major() {
        let transform = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0))
            * Mat4::from_nonuniform_scale(Vec3::new(4.0, 5.0, 6.0));
        let record = TopLevelInstance::new(0, 0xff, &transform, 0);
        assert_eq!(
            record.transform,
            [4.0, 0.0, 0.0, 1.0, 0.0, 5.0, 0.0, 2.0, 0.0, 0.0, 6.0, 3.0]
        );
    }

    #[test]
    fn ray_masks_combine_instance_and_material_flags() {
        let instance = Instance::new(0, Mat4::identity()).with_casts_shadows(false);
        let mut material = Material::default();
        material.casts_shadows = 0;
        assert_eq!(ray_mask(&instance, Some(&material)), 0);
        assert_eq!(
            ray_mask(&instance.with_reflective(true), Some(&material)),
            REFLECTIVE_MASK
        );
        material.casts_shadows = 1;
        assert_eq!(ray_mask(&instance, Some(&material)), SHADOW_CASTER_MASK);
        assert_eq!(
            ray_mask(&instance, None),
            REFLECTIVE_MASK | SHADOW_CASTER_MASK
        );
    }

    #[test]
    fn one_bottom_level_per_mesh() {
        let device = MockDevice::new();
        let scene = test_scenes::three_cubes();
        let manager = manager(&device, &scene);

        assert_eq!(manager.bottom_levels().len(), scene.meshes.len());
        assert!(manager.bottom_levels()[0].is_opaque());
        assert!(!manager.bottom_levels()[1].is_opaque());
        assert_eq!(manager.bottom_levels()[1].primitive_count(), 12);

        let state = device.state();
        let bottom_builds: Vec<_> = state
            .immediate_submissions
            .iter()
            .flat_map(|list| list.builds().copied().collect::<Vec<_>>())
            .filter(|build| build.level == AccelerationLevel::Bottom)
            .collect();
        assert_eq!(bottom_builds.len(), 2);
        let AccelerationGeometry::Triangles {
            vertex_data,
            index_data,
            max_vertex,
            ..
        } = bottom_builds[1].geometry
        else {
            panic!("bottom level built from instances");
        };
        assert_eq!(vertex_data, VERTICES + 8 * 48);
        assert_eq!(index_data, INDICES + 36 * 4);
        // Highest addressable vertex, not the count.
        assert_eq!(max_vertex, 7);
        assert!(bottom_builds.iter().all(|b| b.mode == BuildMode::Build));
        assert!(bottom_builds.iter().all(|b| b.scratch_address % 128 == 0));
    }

    #[test]
    fn every_slot_gets_an_independent_top_level() {
        let device = MockDevice::new();
        let scene = test_scenes::three_cubes();
        let manager = manager(&device, &scene);

        let first = manager.top_level(FrameSlot::FIRST);
        let second = manager.top_level(FrameSlot::FIRST.next());
        assert_ne!(first.raw(), second.raw());
        assert_ne!(
            first.instances().buffer().device_address(),
            second.instances().buffer().device_address()
        );

        let sizes = device
            .acceleration_structure_build_sizes(
                AccelerationLevel::Top,
                &AccelerationGeometry::Instances { data: 0 },
                true,
                3,
            )
            .unwrap();
        assert!(first.scratch_size() >= sizes.build_scratch_size.max(sizes.update_scratch_size));

        let state = device.state();
        for slot in FrameSlot::all() {
            let labels: Vec<_> = state
                .buffers_for(slot)
                .iter()
                .map(|b| b.label.clone())
                .collect();
            assert_eq!(labels.len(), 3, "{:?}", labels);
        }
        let top_builds: Vec<_> = state
            .immediate_submissions
            .iter()
            .flat_map(|list| list.builds().copied().collect::<Vec<_>>())
            .filter(|build| build.level == AccelerationLevel::Top)
            .collect();
        assert_eq!(top_builds.len(), 2);
        assert!(top_builds.iter().all(|b| b.allow_update && b.primitive_count == 3));
    }

    #[test]
    fn initial_records_reference_their_bottom_levels() {
        let device = MockDevice::new();
        let scene = test_scenes::three_cubes();
        let manager = manager(&device, &scene);
        let instances = manager.top_level(FrameSlot::FIRST).instances();

        for index in 0..3 {
            let record = instances.read(index).unwrap();
            let mesh = scene.instances[index].mesh_index().unwrap();
            assert_eq!(
                record.acceleration_structure_reference,
                manager.bottom_levels()[mesh].device_address()
            );
            assert_eq!(record.custom_index(), index as u32);
            assert_eq!(record.mask(), SHADOW_CASTER_MASK);
        }
    }

    #[test]
    fn static_scenes_record_no_update() {
        let device = MockDevice::new();
        let scene = test_scenes::three_cubes();
        let mut manager = manager(&device, &scene);
        let mut commands = CommandList::new();

        let update = manager
            .update_top_level(&scene, FrameSlot::FIRST, false, &mut commands)
            .unwrap();
        assert_eq!(update, TopLevelUpdate::Skipped);
        assert!(commands.is_empty());
        assert_eq!(manager.top_level(FrameSlot::FIRST).updates(), 0);
    }

    #[test]
    fn forced_refresh_rewrites_every_instance() {
        let device = MockDevice::new();
        let scene = test_scenes::three_cubes();
        let mut manager = manager(&device, &scene);
        let mut commands = CommandList::new();

        let update = manager
            .update_top_level(&scene, FrameSlot::FIRST, true, &mut commands)
            .unwrap();
        assert_eq!(update, TopLevelUpdate::Updated { instances: 3 });
        assert_eq!(commands.len(), 3);
    }

    #[test]
    fn animated_instances_are_refitted_between_barriers() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        scene.instances[2] = scene.instances[2].with_animated(true);
        let mut manager = manager(&device, &scene);
        let slot = FrameSlot::FIRST.next();
        let label = "top level instances #1";
        let writes_before = device.state().mapped_writes(label);

        scene.instances[2].set_transform(Mat4::from_translation(Vec3::new(7.0, 8.0, 9.0)));
        let mut commands = CommandList::new();
        let update = manager
            .update_top_level(&scene, slot, false, &mut commands)
            .unwrap();
        assert_eq!(update, TopLevelUpdate::Updated { instances: 1 });
        assert_eq!(device.state().mapped_writes(label) - writes_before, 1);

        let record = manager.top_level(slot).instances().read(2).unwrap();
        assert_eq!([record.transform[3], record.transform[7], record.transform[11]], [7.0, 8.0, 9.0]);
        assert_eq!(record.mask(), SHADOW_CASTER_MASK);

        let commands: Vec<_> = commands.iter().cloned().collect();
        let Command::Barrier(before) = commands[0] else {
            panic!("expected a barrier ahead of the refit");
        };
        assert_eq!(
            before.dst_stage_mask,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
        );
        assert!(before
            .dst_access_mask
            .contains(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR));
        let Command::BuildAccelerationStructure(build) = commands[1] else {
            panic!("expected the refit between the barriers");
        };
        let top_level = manager.top_level(slot);
        assert_eq!(build.mode, BuildMode::Update);
        assert_eq!(build.source, Some(top_level.raw()));
        assert_eq!(build.destination, top_level.raw());
        assert_eq!(build.primitive_count, 3);
        let Command::Barrier(after) = commands[2] else {
            panic!("expected a barrier after the refit");
        };
        assert_eq!(
            after.src_access_mask,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR
        );
        assert!(after.dst_access_mask.contains(vk::AccessFlags2::SHADER_READ));

        // The other slot keeps its own, untouched copy.
        let other = manager.top_level(FrameSlot::FIRST).instances().read(2).unwrap();
        assert_eq!(other.transform[3], 2.0);
    }

    #[test]
    fn instances_without_a_mesh_are_inactive() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        scene.instances[0].mesh_index = 17;
        let manager = manager(&device, &scene);
        let record = manager.top_level(FrameSlot::FIRST).instances().read(0).unwrap();
        assert_eq!(record.acceleration_structure_reference, 0);
        assert_eq!(record.mask(), 0);
    }

    #[test]
    fn allocation_failures_abort_construction() {
        let device = MockDevice::new();
        device.state().fail_allocation = Some("mesh 1 bottom level".to_string());
        let scene = test_scenes::three_cubes();
        let result = AccelerationStructureManager::new(&device, &scene, VERTICES, INDICES);
        assert!(matches!(result, Err(Error::Allocation { .. })));
    }
}
