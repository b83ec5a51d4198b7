use std::ops::{Index, IndexMut};

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// One of the rotating sets of per-frame GPU resources, gated by a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSlot(usize);

impl FrameSlot {
    pub const FIRST: FrameSlot = FrameSlot(0);

    pub fn new(index: usize) -> Option<Self> {
        (index < FRAMES_IN_FLIGHT).then_some(FrameSlot(index))
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn next(self) -> Self {
        FrameSlot((self.0 + 1) % FRAMES_IN_FLIGHT)
    }

    pub fn all() -> impl Iterator<Item = FrameSlot> {
        (0..FRAMES_IN_FLIGHT).map(FrameSlot)
    }
}

impl std::fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame slot {}", self.0)
    }
}

/// Exactly one `T` per frame-in-flight slot.
///
/// Every stateful GPU resource that the CPU writes while earlier frames may still be
/// executing lives in one of these, so two slots can never alias the same object.
#[derive(Debug, Clone)]
pub struct FrameSlots<T>([T; FRAMES_IN_FLIGHT]);

impl<T> FrameSlots<T> {
    pub fn from_fn(mut f: impl FnMut(FrameSlot) -> T) -> Self {
        Self(std::array::from_fn(|index| f(FrameSlot(index))))
    }

    /// Creates the per-slot values in slot order, stopping at the first error.
    pub fn try_from_fn<E>(mut f: impl FnMut(FrameSlot) -> Result<T, E>) -> Result<Self, E> {
        let mut values = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for slot in FrameSlot::all() {
            values.push(f(slot)?);
        }
        match values.try_into() {
            Ok(array) => Ok(Self(array)),
            Err(_) => unreachable!("exactly one value is created per slot"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameSlot, &T)> {
        self.0
            .iter()
            .enumerate()
            .map(|(index, value)| (FrameSlot(index), value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FrameSlot, &mut T)> {
        self.0
            .iter_mut()
            .enumerate()
            .map(|(index, value)| (FrameSlot(index), value))
    }
}

impl<T> Index<FrameSlot> for FrameSlots<T> {
    type Output = T;

    fn index(&self, slot: FrameSlot) -> &T {
        &self.0[slot.0]
    }
}

impl<T> IndexMut<FrameSlot> for FrameSlots<T> {
    fn index_mut(&mut self, slot: FrameSlot) -> &mut T {
        &mut self.0[slot.0]
    }
}
