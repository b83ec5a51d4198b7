use std::marker::PhantomData;

use bytemuck::Pod;

use super::GpuBuffer;
use crate::error::{Error, Result};

/// Typed, bounds-checked view over a persistently mapped buffer.
///
/// Element `i` starts at byte `i * stride`. The stride may exceed `size_of::<T>()` when the
/// consumer expects padded elements.
pub struct MappedRegion<B, T> {
    buffer: B,
    label: String,
    stride: usize,
    len: usize,
    writes: u64,
    _marker: PhantomData<T>,
}

impl<B: GpuBuffer, T: Pod> MappedRegion<B, T> {
    pub fn new(buffer: B) -> Result<Self> {
        Self::with_stride(buffer, std::mem::size_of::<T>())
    }

    pub fn with_stride(buffer: B, stride: usize) -> Result<Self> {
        assert!(
            stride >= std::mem::size_of::<T>() && stride > 0,
            "stride {} cannot hold a {} byte element",
            stride,
            std::mem::size_of::<T>()
        );
        let bytes = buffer
            .mapped_slice()
            .ok_or_else(|| Error::NotHostVisible {
                label: buffer.label().to_string(),
            })?
            .len();
        Ok(Self {
            len: bytes / stride,
            label: buffer.label().to_string(),
            buffer,
            stride,
            writes: 0,
            _marker: PhantomData,
        })
    }

    /// Number of elements that fit into the region.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Elements written since creation.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn write(&mut self, index: usize, value: &T) -> Result<()> {
        self.check_range(index, 1)?;
        let offset = index * self.stride;
        let bytes = self.mapped_mut()?;
        bytes[offset..offset + std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(value));
        self.writes += 1;
        Ok(())
    }

    /// Writes consecutive elements starting at `start`.
    pub fn write_slice(&mut self, start: usize, values: &[T]) -> Result<()> {
        self.check_range(start, values.len())?;
        let stride = self.stride;
        let bytes = self.mapped_mut()?;
        if stride == std::mem::size_of::<T>() {
            let offset = start * stride;
            bytes[offset..offset + values.len() * stride]
                .copy_from_slice(bytemuck::cast_slice(values));
        } else {
            for (i, value) in values.iter().enumerate() {
                let offset = (start + i) * stride;
                bytes[offset..offset + std::mem::size_of::<T>()]
                    .copy_from_slice(bytemuck::bytes_of(value));
            }
        }
        self.writes += values.len() as u64;
        Ok(())
    }

    pub fn read(&self, index: usize) -> Result<T> {
        self.check_range(index, 1)?;
        let bytes = self
            .buffer
            .mapped_slice()
            .ok_or_else(|| Error::NotHostVisible {
                label: self.label.clone(),
            })?;
        let offset = index * self.stride;
        Ok(bytemuck::pod_read_unaligned(
            &bytes[offset..offset + std::mem::size_of::<T>()],
        ))
    }

    fn check_range(&self, start: usize, count: usize) -> Result<()> {
        match start.checked_add(count) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::MappedOutOfBounds {
                label: self.label.clone(),
                index: start + count.saturating_sub(1),
                len: self.len,
            }),
        }
    }

    fn mapped_mut(&mut self) -> Result<&mut [u8]> {
        let label = &self.label;
        self.buffer
            .mapped_slice_mut()
            .ok_or_else(|| Error::NotHostVisible {
                label: label.clone(),
            })
    }
}
