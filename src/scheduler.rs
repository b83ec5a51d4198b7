use std::time::Duration;

use crate::{
    acceleration::{AccelerationStructureManager, TopLevelUpdate},
    animation::Animator,
    config::{Config, TextureMemoryConfig},
    draw_commands::{DrawCommandGenerator, DrawCounts, DrawIndexedIndirectCommand},
    error::Result,
    frame::{FrameSlot, FrameSlots},
    gpu::{
        AcquireOutcome, Command, CommandList, FenceStatus, FrameQueue, FrameSubmission,
        GpuBuffer, GpuDevice, PipelineKind, PresentOutcome,
    },
    jitter::JitterSequence,
    resource_pool::{PoolUpdate, ResourcePool},
    scene::Scene,
    uniforms::CameraHistory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedFrame {
    pub slot: FrameSlot,
    pub image_index: u32,
    pub draws: DrawCounts,
    pub top_level: TopLevelUpdate,
    pub resources: PoolUpdate,
    /// Suboptimal and out-of-date presents are not errors, the caller recreates the swapchain.
    pub present: PresentOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered(RenderedFrame),
    /// The swapchain was out of date. Nothing was written and the slot did not advance.
    Skipped,
}

/// Drives frames through wait, acquire, update, record, submit and present, with up to
/// [`crate::frame::FRAMES_IN_FLIGHT`] frames on the GPU at once.
pub struct FrameScheduler<D: GpuDevice, Q> {
    queue: Q,
    pool: ResourcePool<D::Buffer>,
    acceleration: AccelerationStructureManager<D>,
    draws: DrawCommandGenerator,
    jitter: JitterSequence,
    camera_history: CameraHistory,
    animator: Option<Box<dyn Animator>>,
    fence_timeout: Duration,
    extent: (u32, u32),
    slot: FrameSlot,
    /// Rotates over the swapchain images, independently of `slot`.
    semaphore_index: usize,
    full_refresh: FrameSlots<bool>,
}

impl<D: GpuDevice, Q: FrameQueue> FrameScheduler<D, Q> {
    /// Uploads the scene, builds all acceleration structures and binds every slot's
    /// resources. Any failure here is fatal for the renderer.
    pub fn new(
        device: &D,
        mut queue: Q,
        scene: &Scene,
        config: &Config,
        texture_limits: TextureMemoryConfig,
        extent: (u32, u32),
    ) -> Result<Self> {
        let pool = ResourcePool::new(device, scene, texture_limits)?;
        let acceleration = AccelerationStructureManager::new(
            device,
            scene,
            pool.geometry().vertices.device_address(),
            pool.geometry().indices.device_address(),
        )?;

        for slot in FrameSlot::all() {
            let bindings = pool.frame_bindings(slot, acceleration.top_level(slot).raw());
            queue.bind_frame_resources(slot, &bindings)?;
        }

        log::info!(
            "Frame scheduler ready: {} instances, {} meshes, {} swapchain images",
            scene.instances.len(),
            scene.meshes.len(),
            queue.image_count()
        );

        Ok(Self {
            queue,
            pool,
            acceleration,
            draws: DrawCommandGenerator::new(config.draw),
            jitter: JitterSequence::new(&config.taa),
            camera_history: CameraHistory::default(),
            animator: None,
            fence_timeout: config.fence_timeout(),
            extent,
            slot: FrameSlot::FIRST,
            semaphore_index: 0,
            full_refresh: FrameSlots::from_fn(|_| false),
        })
    }

    pub fn with_animator(mut self, animator: Box<dyn Animator>) -> Self {
        self.animator = Some(animator);
        self
    }

    /// Makes the next frame of every slot rewrite all top-level instance transforms.
    pub fn request_full_refresh(&mut self) {
        for (_, pending) in self.full_refresh.iter_mut() {
            *pending = true;
        }
    }

    pub fn set_extent(&mut self, extent: (u32, u32)) {
        self.extent = extent;
    }

    /// Renders one frame of `scene` as it looks at `animation_time`.
    pub fn draw_frame(&mut self, scene: &mut Scene, animation_time: f32) -> Result<FrameOutcome> {
        let slot = self.slot;
        self.wait_for_slot(slot)?;

        let image_index = match self.queue.acquire_next_image(self.semaphore_index)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::debug!("Acquired a suboptimal swapchain image");
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::warn!("Swapchain out of date, skipping frame");
                return Ok(FrameOutcome::Skipped);
            }
        };

        let (resources, top_level, draws, mut commands) =
            match self.prepare_frame(scene, slot, animation_time) {
                Ok(prepared) => prepared,
                Err(error) => {
                    // The acquire semaphore is still pending, acquire with the next one.
                    self.advance_semaphore();
                    return Err(error);
                }
            };

        self.queue.reset_fence(slot)?;
        self.record_draws(slot, image_index, draws, &mut commands);

        let submission = FrameSubmission {
            slot,
            semaphore_index: self.semaphore_index,
            image_index,
        };
        self.queue.submit(&submission, &commands)?;
        let present = self.queue.present(&submission)?;
        match present {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => log::warn!("Presented to a suboptimal swapchain"),
            PresentOutcome::OutOfDate => log::warn!("Swapchain out of date while presenting"),
        }

        self.advance_semaphore();
        self.slot = slot.next();

        Ok(FrameOutcome::Rendered(RenderedFrame {
            slot,
            image_index,
            draws,
            top_level,
            resources,
            present,
        }))
    }

    /// CPU side of a frame: animation, buffer writes, the top-level refit and draw generation.
    /// The slot is ours until it is submitted again.
    fn prepare_frame(
        &mut self,
        scene: &mut Scene,
        slot: FrameSlot,
        animation_time: f32,
    ) -> Result<(PoolUpdate, TopLevelUpdate, DrawCounts, CommandList)> {
        if let Some(animator) = &mut self.animator {
            animator.animate(scene, animation_time);
        }
        let jitter = self.jitter.next_offset();
        let uniforms =
            self.camera_history
                .frame_uniforms(scene, animation_time, jitter, self.extent);
        let resources = self.pool.update(scene, slot, &uniforms)?;

        let mut commands = CommandList::new();
        let force_full_refresh = self.full_refresh[slot];
        let top_level =
            self.acceleration
                .update_top_level(scene, slot, force_full_refresh, &mut commands)?;
        self.full_refresh[slot] = false;
        let draws = self
            .draws
            .refresh(scene, slot, self.pool.indirect_draws_mut(slot))?;
        Ok((resources, top_level, draws, commands))
    }

    fn advance_semaphore(&mut self) {
        self.semaphore_index = (self.semaphore_index + 1) % self.queue.image_count().max(1);
    }

    fn wait_for_slot(&mut self, slot: FrameSlot) -> Result<()> {
        while self.queue.wait_for_fence(slot, self.fence_timeout)? == FenceStatus::TimedOut {
            log::trace!("Still waiting for {}", slot);
        }
        Ok(())
    }

    /// Opaque range first, then the transparent range with blending.
    fn record_draws(
        &self,
        slot: FrameSlot,
        image_index: u32,
        draws: DrawCounts,
        commands: &mut CommandList,
    ) {
        let indirect = self.pool.frame(slot).indirect_draws.buffer().raw();
        let geometry = self.pool.geometry();

        commands.push(Command::BeginRendering { slot, image_index });
        commands.push(Command::BindPipeline(PipelineKind::Opaque));
        commands.push(Command::BindSceneResources {
            slot,
            vertices: geometry.vertices.raw(),
            indices: geometry.indices.raw(),
        });
        if draws.opaque > 0 {
            commands.push(Command::DrawIndexedIndirect {
                buffer: indirect,
                offset: 0,
                draw_count: draws.opaque,
                stride: DrawIndexedIndirectCommand::STRIDE,
            });
        }
        if draws.transparent > 0 {
            commands.push(Command::BindPipeline(PipelineKind::Transparent));
            commands.push(Command::DrawIndexedIndirect {
                buffer: indirect,
                offset: draws.transparent_offset(),
                draw_count: draws.transparent,
                stride: DrawIndexedIndirectCommand::STRIDE,
            });
        }
        commands.push(Command::EndRendering { slot });
        commands.push(Command::HandOffToPostProcess { slot, image_index });
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    pub fn resource_pool(&self) -> &ResourcePool<D::Buffer> {
        &self.pool
    }

    pub fn acceleration_structures(&self) -> &AccelerationStructureManager<D> {
        &self.acceleration
    }

    pub fn draw_generator(&self) -> &DrawCommandGenerator {
        &self.draws
    }

    /// The slot the next frame will use.
    pub fn current_slot(&self) -> FrameSlot {
        self.slot
    }
}

#[cfg(test)]
mod tests {
    use ultraviolet::{Mat4, Vec3};

    use super::*;
    use crate::{
        animation::SpinAnimator,
        gpu::mock::{MockDevice, MockQueue, QueueEvent},
        scene::test_scenes,
    };

    fn scheduler(device: &MockDevice, scene: &Scene) -> FrameScheduler<MockDevice, MockQueue> {
        FrameScheduler::new(
            device,
            device.queue(),
            scene,
            &Config::default(),
            TextureMemoryConfig::default(),
            (1280, 720),
        )
        .unwrap()
    }

    fn rendered(outcome: FrameOutcome) -> RenderedFrame {
        match outcome {
            FrameOutcome::Rendered(frame) => frame,
            FrameOutcome::Skipped => panic!("frame was skipped"),
        }
    }

    fn last_frame_commands(device: &MockDevice) -> CommandList {
        device.state().frames.last().unwrap().1.clone()
    }

    #[test]
    fn every_slot_is_bound_at_creation() {
        let device = MockDevice::new();
        let scene = test_scenes::three_cubes();
        let scheduler = scheduler(&device, &scene);

        let state = device.state();
        assert_eq!(
            state.events,
            vec![
                QueueEvent::Bind(FrameSlot::FIRST),
                QueueEvent::Bind(FrameSlot::FIRST.next())
            ]
        );
        let (_, first) = &state.bindings[0];
        let (_, second) = &state.bindings[1];
        assert_ne!(first.top_level, second.top_level);
        assert_eq!(
            first.top_level,
            scheduler
                .acceleration_structures()
                .top_level(FrameSlot::FIRST)
                .raw()
        );
    }

    #[test]
    fn frame_steps_happen_in_order() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        device.state().events.clear();

        scheduler.draw_frame(&mut scene, 0.0).unwrap();

        let submission = FrameSubmission {
            slot: FrameSlot::FIRST,
            semaphore_index: 0,
            image_index: 0,
        };
        assert_eq!(
            device.state().events,
            vec![
                QueueEvent::Wait(FrameSlot::FIRST),
                QueueEvent::Acquire(0),
                QueueEvent::Reset(FrameSlot::FIRST),
                QueueEvent::Submit(submission),
                QueueEvent::Present(submission),
            ]
        );
    }

    #[test]
    fn slots_are_never_written_while_in_flight() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        scene.instances[0] = scene.instances[0].with_animated(true);
        scene.point_lights[0] = scene.point_lights[0].with_animated(true);
        let mut scheduler = scheduler(&device, &scene)
            .with_animator(Box::new(SpinAnimator::new(&scene, 1.0)));

        for frame in 0..8 {
            scheduler.draw_frame(&mut scene, frame as f32 * 0.016).unwrap();
        }

        let state = device.state();
        assert_eq!(state.frames.len(), 8);
        assert!(state.violations.is_empty(), "{:?}", state.violations);
    }

    #[test]
    fn the_mock_catches_writes_into_an_in_flight_slot() {
        let device = MockDevice::new();
        let scene = test_scenes::three_cubes();
        let mut pool = ResourcePool::new(&device, &scene, TextureMemoryConfig::default()).unwrap();
        device.state().fence_signaled[0] = false;

        let uniforms = CameraHistory::default().frame_uniforms(
            &scene,
            0.0,
            ultraviolet::Vec2::zero(),
            (1, 1),
        );
        pool.update(&scene, FrameSlot::FIRST, &uniforms).unwrap();
        assert!(!device.state().violations.is_empty());
    }

    #[test]
    fn slots_and_semaphores_rotate_independently() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);

        for _ in 0..4 {
            scheduler.draw_frame(&mut scene, 0.0).unwrap();
        }

        let submissions: Vec<_> = device
            .state()
            .frames
            .iter()
            .map(|(submission, _)| (submission.slot.index(), submission.semaphore_index))
            .collect();
        assert_eq!(submissions, vec![(0, 0), (1, 1), (0, 2), (1, 0)]);
        assert_eq!(scheduler.current_slot(), FrameSlot::FIRST);
    }

    #[test]
    fn fence_waits_retry_until_signaled() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        device.state().set_timeouts_per_wait(2);
        device.state().events.clear();

        scheduler.draw_frame(&mut scene, 0.0).unwrap();

        let state = device.state();
        let waits = state
            .events
            .iter()
            .filter(|event| matches!(event, QueueEvent::Wait(_)))
            .count();
        assert_eq!(waits, 3);
        assert!(state.violations.is_empty());
    }

    #[test]
    fn out_of_date_acquire_skips_without_side_effects() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        device
            .state()
            .acquire_script
            .push_back(AcquireOutcome::OutOfDate);
        device.state().events.clear();

        let outcome = scheduler.draw_frame(&mut scene, 0.0).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(scheduler.current_slot(), FrameSlot::FIRST);
        {
            let state = device.state();
            assert!(state.frames.is_empty());
            assert!(!state
                .events
                .iter()
                .any(|event| matches!(event, QueueEvent::Reset(_))));
            assert!(state.fence_signaled[0]);
        }
        assert_eq!(
            scheduler
                .resource_pool()
                .frame(FrameSlot::FIRST)
                .uniforms
                .write_count(),
            0
        );

        // The retry reuses the same slot and semaphore.
        let frame = rendered(scheduler.draw_frame(&mut scene, 0.0).unwrap());
        assert_eq!(frame.slot, FrameSlot::FIRST);
        assert_eq!(device.state().frames[0].0.semaphore_index, 0);
    }

    #[test]
    fn bad_presents_are_not_fatal() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        {
            let mut state = device.state();
            state.present_script.push_back(PresentOutcome::Suboptimal);
            state.present_script.push_back(PresentOutcome::OutOfDate);
        }

        let presents: Vec<_> = (0..3)
            .map(|_| rendered(scheduler.draw_frame(&mut scene, 0.0).unwrap()).present)
            .collect();
        assert_eq!(
            presents,
            [
                PresentOutcome::Suboptimal,
                PresentOutcome::OutOfDate,
                PresentOutcome::Presented
            ]
        );
        assert_eq!(device.state().frames.len(), 3);
    }

    #[test]
    fn acceleration_update_is_recorded_before_any_draw() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        scene.instances[1] = scene.instances[1].with_animated(true);
        let mut scheduler = scheduler(&device, &scene)
            .with_animator(Box::new(SpinAnimator::new(&scene, 2.0)));

        let frame = rendered(scheduler.draw_frame(&mut scene, 0.5).unwrap());
        assert_eq!(frame.top_level, TopLevelUpdate::Updated { instances: 1 });

        let commands = last_frame_commands(&device);
        let build = commands
            .position(|c| matches!(c, Command::BuildAccelerationStructure(_)))
            .unwrap();
        let begin = commands
            .position(|c| matches!(c, Command::BeginRendering { .. }))
            .unwrap();
        let first_draw = commands
            .position(|c| matches!(c, Command::DrawIndexedIndirect { .. }))
            .unwrap();
        assert!(build < begin && begin < first_draw);
        assert!(matches!(
            commands.iter().last(),
            Some(Command::HandOffToPostProcess { image_index: 0, .. })
        ));

        // The animator ran before the slot's buffers were filled.
        let written = scheduler
            .resource_pool()
            .frame(FrameSlot::FIRST)
            .instances
            .read(1)
            .unwrap();
        assert_eq!(written, scene.instances[1]);
    }

    #[test]
    fn opaque_and_transparent_ranges_get_their_own_draws() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        scheduler.draw_frame(&mut scene, 0.0).unwrap();

        let indirect = scheduler
            .resource_pool()
            .frame(FrameSlot::FIRST)
            .indirect_draws
            .buffer()
            .raw();
        let commands = last_frame_commands(&device);
        let sequence: Vec<_> = commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    Command::BindPipeline(_) | Command::DrawIndexedIndirect { .. }
                )
            })
            .cloned()
            .collect();
        assert_eq!(
            sequence,
            vec![
                Command::BindPipeline(PipelineKind::Opaque),
                Command::DrawIndexedIndirect {
                    buffer: indirect,
                    offset: 0,
                    draw_count: 2,
                    stride: 20
                },
                Command::BindPipeline(PipelineKind::Transparent),
                Command::DrawIndexedIndirect {
                    buffer: indirect,
                    offset: 40,
                    draw_count: 1,
                    stride: 20
                },
            ]
        );
    }

    #[test]
    fn nothing_visible_records_no_draws() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        scene.camera.position = Vec3::new(0.0, 0.0, -50.0);

        let frame = rendered(scheduler.draw_frame(&mut scene, 0.0).unwrap());
        assert_eq!(frame.draws.total(), 0);
        let commands = last_frame_commands(&device);
        assert!(commands
            .position(|c| matches!(c, Command::DrawIndexedIndirect { .. }))
            .is_none());
        assert!(commands
            .position(|c| matches!(c, Command::EndRendering { .. }))
            .is_some());
    }

    #[test]
    fn full_refresh_reaches_every_slot_once() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);

        let first = rendered(scheduler.draw_frame(&mut scene, 0.0).unwrap());
        assert_eq!(first.top_level, TopLevelUpdate::Skipped);

        scheduler.request_full_refresh();
        let updates: Vec<_> = (0..3)
            .map(|_| rendered(scheduler.draw_frame(&mut scene, 0.0).unwrap()).top_level)
            .collect();
        assert_eq!(
            updates,
            vec![
                TopLevelUpdate::Updated { instances: 3 },
                TopLevelUpdate::Updated { instances: 3 },
                TopLevelUpdate::Skipped,
            ]
        );
    }

    #[test]
    fn static_scene_over_five_frames() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        let indirect_writes = |scheduler: &FrameScheduler<MockDevice, MockQueue>, slot| {
            scheduler
                .resource_pool()
                .frame(slot)
                .indirect_draws
                .write_count()
        };
        let (even, odd) = (FrameSlot::FIRST, FrameSlot::FIRST.next());

        for frame in 1..=5 {
            if frame == 4 {
                scene.camera.position += Vec3::new(0.0, 0.5, 0.0);
            }
            let rendered = rendered(scheduler.draw_frame(&mut scene, 0.0).unwrap());
            assert_eq!(
                rendered.draws,
                DrawCounts {
                    opaque: 2,
                    transparent: 1
                }
            );
            assert_eq!(rendered.top_level, TopLevelUpdate::Skipped);

            let generator = scheduler.draw_generator();
            match frame {
                // Each slot's buffer is filled on its first use.
                1 => {
                    assert_eq!(indirect_writes(&scheduler, even), 3);
                    assert_eq!(indirect_writes(&scheduler, odd), 0);
                }
                2 | 3 => {
                    assert_eq!(indirect_writes(&scheduler, even), 3);
                    assert_eq!(indirect_writes(&scheduler, odd), 3);
                }
                4 => {
                    assert_eq!(generator.rebuilds(odd), 2);
                    assert_eq!(generator.rebuilds(even), 1);
                    assert_eq!(indirect_writes(&scheduler, odd), 6);
                }
                _ => assert_eq!(generator.rebuilds(even), 2),
            }
        }
        assert!(device.state().violations.is_empty());
    }

    #[test]
    fn uniforms_follow_the_camera_history() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);

        scheduler.draw_frame(&mut scene, 1.5).unwrap();
        let first_view = scene.camera.view_matrix();
        scene.camera.position = Vec3::new(1.0, 0.0, 10.0);
        scheduler.draw_frame(&mut scene, 1.6).unwrap();

        let uniforms = scheduler
            .resource_pool()
            .frame(FrameSlot::FIRST.next())
            .uniforms
            .read(0)
            .unwrap();
        assert_eq!(uniforms.previous_view, first_view);
        assert_eq!(uniforms.view, scene.camera.view_matrix());
        assert_eq!(uniforms.time, 1.6);
        assert_eq!(uniforms.screen_size.x, 1280.0);
        assert_ne!(uniforms.projection, scene.camera.projection_matrix());
        assert_eq!(uniforms.previous_projection, scene.camera.projection_matrix());
        assert_ne!(uniforms.view, Mat4::identity());
    }

    #[test]
    fn scene_geometry_is_bound_ahead_of_the_draws() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        scheduler.draw_frame(&mut scene, 0.0).unwrap();

        let geometry = scheduler.resource_pool().geometry();
        let expected = Command::BindSceneResources {
            slot: FrameSlot::FIRST,
            vertices: geometry.vertices.raw(),
            indices: geometry.indices.raw(),
        };
        let commands = last_frame_commands(&device);
        let bind = commands.position(|c| *c == expected).unwrap();
        let first_draw = commands
            .position(|c| matches!(c, Command::DrawIndexedIndirect { .. }))
            .unwrap();
        assert!(bind < first_draw);
    }

    #[test]
    fn failures_after_acquire_move_on_to_the_next_semaphore() {
        let device = MockDevice::new();
        let mut scene = test_scenes::three_cubes();
        let mut scheduler = scheduler(&device, &scene);
        device.state().fail_mapping = Some("uniforms #0".to_string());

        let error = scheduler.draw_frame(&mut scene, 0.0).unwrap_err();
        assert!(matches!(error, crate::error::Error::NotHostVisible { .. }));
        {
            let state = device.state();
            assert!(state.frames.is_empty());
            assert!(!state
                .events
                .iter()
                .any(|event| matches!(event, QueueEvent::Reset(_))));
            assert!(state.fence_signaled[FrameSlot::FIRST.index()]);
        }
        assert_eq!(scheduler.current_slot(), FrameSlot::FIRST);

        {
            let mut state = device.state();
            state.fail_mapping = None;
            state.events.clear();
        }
        let frame = rendered(scheduler.draw_frame(&mut scene, 0.0).unwrap());
        assert_eq!(frame.slot, FrameSlot::FIRST);
        assert!(frame.resources.full_copy);

        let state = device.state();
        assert!(state.events.contains(&QueueEvent::Acquire(1)));
        assert!(!state.events.contains(&QueueEvent::Acquire(0)));
        assert_eq!(state.frames[0].0.semaphore_index, 1);
        assert!(state.violations.is_empty());
    }
}
