//! In-memory backend for tests. Fences are modelled: a slot's fence only signals again
//! when the scheduler waits on it, so a CPU write into a slot that is still in flight shows
//! up as a recorded violation.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};

use ash::vk;

use super::*;
use crate::{
    error::{Error, Result},
    frame::{FrameSlot, FRAMES_IN_FLIGHT},
    resource_pool::FrameBindings,
};

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Bind(FrameSlot),
    Wait(FrameSlot),
    Reset(FrameSlot),
    Acquire(usize),
    Submit(FrameSubmission),
    Present(FrameSubmission),
}

#[derive(Debug, Clone)]
pub struct BufferRecord {
    pub label: String,
    pub slot: Option<FrameSlot>,
    pub location: MemoryLocation,
    pub usage: vk::BufferUsageFlags,
    pub size: vk::DeviceSize,
}

pub struct MockState {
    next_handle: u64,
    next_address: vk::DeviceAddress,
    pub fence_signaled: [bool; FRAMES_IN_FLIGHT],
    pub violations: Vec<String>,
    pub buffers: Vec<BufferRecord>,
    /// Mutable mappings handed out per buffer label.
    pub mapped_writes: HashMap<String, usize>,
    pub immediate_submissions: Vec<CommandList>,
    pub frames: Vec<(FrameSubmission, CommandList)>,
    pub events: Vec<QueueEvent>,
    pub bindings: Vec<(FrameSlot, FrameBindings)>,
    pub acquire_script: VecDeque<AcquireOutcome>,
    pub present_script: VecDeque<PresentOutcome>,
    pub image_count: usize,
    next_image: u32,
    timeouts_per_wait: u32,
    timeouts_left: u32,
    /// Allocations whose label contains this text fail.
    pub fail_allocation: Option<String>,
    /// Buffers whose label contains this text refuse to be mapped.
    pub fail_mapping: Option<String>,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn mapped_writes(&self, label: &str) -> usize {
        self.mapped_writes.get(label).copied().unwrap_or(0)
    }

    pub fn buffers_for(&self, slot: FrameSlot) -> Vec<&BufferRecord> {
        self.buffers.iter().filter(|b| b.slot == Some(slot)).collect()
    }

    /// Every wait returns `TimedOut` this many times before the fence signals.
    pub fn set_timeouts_per_wait(&mut self, timeouts: u32) {
        self.timeouts_per_wait = timeouts;
        self.timeouts_left = timeouts;
    }
}

#[derive(Clone)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                next_handle: 0,
                next_address: 0x1000_0000,
                fence_signaled: [true; FRAMES_IN_FLIGHT],
                violations: Vec::new(),
                buffers: Vec::new(),
                mapped_writes: HashMap::new(),
                immediate_submissions: Vec::new(),
                frames: Vec::new(),
                events: Vec::new(),
                bindings: Vec::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                image_count: 3,
                next_image: 0,
                timeouts_per_wait: 0,
                timeouts_left: 0,
                fail_allocation: None,
                fail_mapping: None,
            })),
        }
    }

    pub fn state(&self) -> std::cell::RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    pub fn queue(&self) -> MockQueue {
        MockQueue {
            state: self.state.clone(),
        }
    }
}

pub struct MockBuffer {
    raw: RawBuffer,
    label: String,
    slot: Option<FrameSlot>,
    location: MemoryLocation,
    address: vk::DeviceAddress,
    data: Vec<u8>,
    state: Rc<RefCell<MockState>>,
}

impl MockBuffer {
    /// Contents regardless of memory location.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl GpuBuffer for MockBuffer {
    fn raw(&self) -> RawBuffer {
        self.raw
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> vk::DeviceSize {
        self.data.len() as vk::DeviceSize
    }

    fn device_address(&self) -> vk::DeviceAddress {
        self.address
    }

    fn mapped_slice(&self) -> Option<&[u8]> {
        (self.location == MemoryLocation::HostMapped).then_some(self.data.as_slice())
    }

    fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        if self.location != MemoryLocation::HostMapped {
            return None;
        }
        let mut state = self.state.borrow_mut();
        if let Some(pattern) = &state.fail_mapping {
            if self.label.contains(pattern.as_str()) {
                return None;
            }
        }
        if let Some(slot) = self.slot {
            if !state.fence_signaled[slot.index()] {
                let violation = format!("'{}' written while {} is in flight", self.label, slot);
                state.violations.push(violation);
            }
        }
        *state.mapped_writes.entry(self.label.clone()).or_default() += 1;
        drop(state);
        Some(&mut self.data)
    }
}

pub struct MockAccelerationStructure {
    raw: RawAccelerationStructure,
    address: vk::DeviceAddress,
}

impl GpuAccelerationStructure for MockAccelerationStructure {
    fn raw(&self) -> RawAccelerationStructure {
        self.raw
    }

    fn device_address(&self) -> vk::DeviceAddress {
        self.address
    }
}

impl GpuDevice for MockDevice {
    type Buffer = MockBuffer;
    type AccelerationStructure = MockAccelerationStructure;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<MockBuffer> {
        let mut state = self.state.borrow_mut();
        if let Some(pattern) = &state.fail_allocation {
            if desc.label.contains(pattern.as_str()) {
                return Err(Error::Allocation {
                    label: desc.label.to_string(),
                    size: desc.size,
                    reason: "mock allocation failure".to_string(),
                });
            }
        }
        state.buffers.push(BufferRecord {
            label: desc.label.to_string(),
            slot: desc.slot,
            location: desc.location,
            usage: desc.usage,
            size: desc.size,
        });
        let address = state.next_address;
        state.next_address += (desc.size + 255) & !255;
        Ok(MockBuffer {
            raw: RawBuffer(state.handle()),
            label: desc.label.to_string(),
            slot: desc.slot,
            location: desc.location,
            address,
            data: vec![0; desc.size as usize],
            state: self.state.clone(),
        })
    }

    fn create_buffer_with_data(&self, desc: &BufferDesc, data: &[u8]) -> Result<MockBuffer> {
        let mut buffer = self.create_buffer(desc)?;
        buffer.data[..data.len()].copy_from_slice(data);
        Ok(buffer)
    }

    fn acceleration_structure_build_sizes(
        &self,
        _level: AccelerationLevel,
        _geometry: &AccelerationGeometry,
        _allow_update: bool,
        primitive_count: u32,
    ) -> Result<BuildSizes> {
        let primitives = primitive_count as vk::DeviceSize;
        Ok(BuildSizes {
            structure_size: 1024 + primitives * 64,
            build_scratch_size: 512 + primitives * 32,
            update_scratch_size: 256 + primitives * 16,
        })
    }

    fn create_acceleration_structure(
        &self,
        _label: &str,
        _level: AccelerationLevel,
        buffer: &MockBuffer,
        size: vk::DeviceSize,
    ) -> Result<MockAccelerationStructure> {
        assert!(size <= buffer.size(), "structure does not fit its buffer");
        Ok(MockAccelerationStructure {
            raw: RawAccelerationStructure(self.state.borrow_mut().handle()),
            address: buffer.device_address(),
        })
    }

    fn scratch_alignment(&self) -> vk::DeviceSize {
        128
    }

    fn submit_immediate(&self, commands: &CommandList) -> Result<()> {
        self.state
            .borrow_mut()
            .immediate_submissions
            .push(commands.clone());
        Ok(())
    }
}

pub struct MockQueue {
    state: Rc<RefCell<MockState>>,
}

impl FrameQueue for MockQueue {
    fn image_count(&self) -> usize {
        self.state.borrow().image_count
    }

    fn bind_frame_resources(&mut self, slot: FrameSlot, bindings: &FrameBindings) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(QueueEvent::Bind(slot));
        state.bindings.push((slot, bindings.clone()));
        Ok(())
    }

    fn wait_for_fence(&mut self, slot: FrameSlot, _timeout: Duration) -> Result<FenceStatus> {
        let mut state = self.state.borrow_mut();
        state.events.push(QueueEvent::Wait(slot));
        if state.timeouts_left > 0 {
            state.timeouts_left -= 1;
            return Ok(FenceStatus::TimedOut);
        }
        // The GPU finishes the slot's previous work.
        state.fence_signaled[slot.index()] = true;
        state.timeouts_left = state.timeouts_per_wait;
        Ok(FenceStatus::Signaled)
    }

    fn reset_fence(&mut self, slot: FrameSlot) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(QueueEvent::Reset(slot));
        state.fence_signaled[slot.index()] = false;
        Ok(())
    }

    fn acquire_next_image(&mut self, semaphore_index: usize) -> Result<AcquireOutcome> {
        let mut state = self.state.borrow_mut();
        state.events.push(QueueEvent::Acquire(semaphore_index));
        if let Some(outcome) = state.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = state.next_image;
        state.next_image = (state.next_image + 1) % state.image_count as u32;
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn submit(&mut self, submission: &FrameSubmission, commands: &CommandList) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fence_signaled[submission.slot.index()] {
            let violation = format!("submitted {} with a signaled fence", submission.slot);
            state.violations.push(violation);
        }
        state.events.push(QueueEvent::Submit(*submission));
        state.frames.push((*submission, commands.clone()));
        Ok(())
    }

    fn present(&mut self, submission: &FrameSubmission) -> Result<PresentOutcome> {
        let mut state = self.state.borrow_mut();
        state.events.push(QueueEvent::Present(*submission));
        Ok(state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }
}
