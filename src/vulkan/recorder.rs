use ash::vk::{self, Handle};

use super::{acceleration_structure::structure_type, context::Context};
use crate::{
    gpu::{AccelerationBuild, AccelerationGeometry, AccelerationLevel, BuildMode, MemoryBarrier},
    scene::Vertex,
};

pub(super) fn geometry(geometry: &AccelerationGeometry) -> vk::AccelerationStructureGeometryKHR {
    match *geometry {
        AccelerationGeometry::Triangles {
            vertex_data,
            vertex_stride,
            max_vertex,
            index_data,
            opaque,
        } => {
            let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                .vertex_format(Vertex::POSITION_FORMAT)
                .vertex_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: vertex_data,
                })
                .vertex_stride(vertex_stride)
                .max_vertex(max_vertex)
                .index_type(vk::IndexType::UINT32)
                .index_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: index_data,
                })
                .build();

            let flags = if opaque {
                vk::GeometryFlagsKHR::OPAQUE
            } else {
                vk::GeometryFlagsKHR::empty()
            };

            vk::AccelerationStructureGeometryKHR::builder()
                .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                .flags(flags)
                .build()
        }
        AccelerationGeometry::Instances { data } => {
            let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: data,
                })
                .build();

            vk::AccelerationStructureGeometryKHR::builder()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
                .build()
        }
    }
}

pub(super) fn build_flags(allow_update: bool) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut flags = vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    if allow_update {
        flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    flags
}

pub(super) fn build_sizes(
    context: &Context,
    level: AccelerationLevel,
    geometry: &AccelerationGeometry,
    allow_update: bool,
    primitive_count: u32,
) -> vk::AccelerationStructureBuildSizesInfoKHR {
    let geometries = [self::geometry(geometry)];
    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .ty(structure_type(level))
        .flags(build_flags(allow_update))
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(&geometries);

    unsafe {
        context
            .acceleration_structure
            .get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
            )
    }
}

pub(super) fn record_barrier(
    context: &Context,
    command_buffer: vk::CommandBuffer,
    barrier: &MemoryBarrier,
) {
    let memory_barrier = vk::MemoryBarrier2::builder()
        .src_stage_mask(barrier.src_stage_mask)
        .src_access_mask(barrier.src_access_mask)
        .dst_stage_mask(barrier.dst_stage_mask)
        .dst_access_mask(barrier.dst_access_mask)
        .build();
    let dependency_info =
        vk::DependencyInfo::builder().memory_barriers(std::slice::from_ref(&memory_barrier));

    unsafe {
        context
            .synchronisation2_loader
            .cmd_pipeline_barrier2(command_buffer, &dependency_info)
    };
}

pub(super) fn record_build(
    context: &Context,
    command_buffer: vk::CommandBuffer,
    build: &AccelerationBuild,
) {
    let geometries = [geometry(&build.geometry)];
    let mode = match build.mode {
        BuildMode::Build => vk::BuildAccelerationStructureModeKHR::BUILD,
        BuildMode::Update => vk::BuildAccelerationStructureModeKHR::UPDATE,
    };
    let source = build
        .source
        .map(|source| vk::AccelerationStructureKHR::from_raw(source.0))
        .unwrap_or_default();

    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
        .ty(structure_type(build.level))
        .flags(build_flags(build.allow_update))
        .mode(mode)
        .src_acceleration_structure(source)
        .dst_acceleration_structure(vk::AccelerationStructureKHR::from_raw(build.destination.0))
        .geometries(&geometries)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: build.scratch_address,
        })
        .build();

    let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
        .primitive_count(build.primitive_count)
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0)
        .build();

    unsafe {
        context
            .acceleration_structure
            .cmd_build_acceleration_structures(
                command_buffer,
                std::slice::from_ref(&build_info),
                &[std::slice::from_ref(&range)],
            )
    };
}

/// Layout transition of a single-mip, single-layer image.
pub(super) struct ImageTransition {
    pub image: vk::Image,
    pub aspect_mask: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
}

pub(super) fn record_transitions(
    context: &Context,
    command_buffer: vk::CommandBuffer,
    transitions: &[ImageTransition],
) {
    let barriers: Vec<_> = transitions
        .iter()
        .map(|transition| {
            vk::ImageMemoryBarrier2::builder()
                .image(transition.image)
                .old_layout(transition.old_layout)
                .new_layout(transition.new_layout)
                .src_stage_mask(transition.src_stage_mask)
                .src_access_mask(transition.src_access_mask)
                .dst_stage_mask(transition.dst_stage_mask)
                .dst_access_mask(transition.dst_access_mask)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: transition.aspect_mask,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .build()
        })
        .collect();

    let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&barriers);
    unsafe {
        context
            .synchronisation2_loader
            .cmd_pipeline_barrier2(command_buffer, &dependency_info)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_refittable_structures_allow_updates() {
        assert!(build_flags(true).contains(vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE));
        assert_eq!(
            build_flags(false),
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
        );
    }

    #[test]
    fn triangle_geometry_keeps_addresses_and_opacity() {
        let translated = geometry(&AccelerationGeometry::Triangles {
            vertex_data: 0x1000,
            vertex_stride: 48,
            max_vertex: 24,
            index_data: 0x2000,
            opaque: true,
        });
        assert_eq!(translated.geometry_type, vk::GeometryTypeKHR::TRIANGLES);
        assert_eq!(translated.flags, vk::GeometryFlagsKHR::OPAQUE);

        let triangles = unsafe { translated.geometry.triangles };
        assert_eq!(unsafe { triangles.vertex_data.device_address }, 0x1000);
        assert_eq!(unsafe { triangles.index_data.device_address }, 0x2000);
        assert_eq!(triangles.vertex_stride, 48);
        assert_eq!(triangles.max_vertex, 24);
        assert_eq!(triangles.vertex_format, Vertex::POSITION_FORMAT);
        assert_eq!(triangles.index_type, vk::IndexType::UINT32);
    }

    #[test]
    fn instance_geometry_is_a_packed_array() {
        let translated = geometry(&AccelerationGeometry::Instances { data: 0x3000 });
        assert_eq!(translated.geometry_type, vk::GeometryTypeKHR::INSTANCES);

        let instances = unsafe { translated.geometry.instances };
        assert_eq!(instances.array_of_pointers, vk::FALSE);
        assert_eq!(unsafe { instances.data.device_address }, 0x3000);
    }
}
