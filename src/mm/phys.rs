//! Physical Memory - Backing Store for Page Frames
//!
//! Owns the bytes of every frame below `memory_end`. Frames are
//! materialised on first write; an untouched frame reads as zeros, so a
//! 16MB machine costs only what has actually been written.
//!
//! Every access is bounds-checked against the frame count. Page-table
//! words are stored little-endian, the way the i386 reads them.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::FatalMemoryError;
use crate::mm::layout::{FrameId, PhysAddr, PAGE_SIZE};

type FrameBytes = [u8; PAGE_SIZE];

/// Simulated physical memory
pub struct PhysMemory {
    frames: Vec<Option<Box<FrameBytes>>>,
}

impl PhysMemory {
    /// Create `frame_count` frames of zeroed memory
    pub fn new(frame_count: usize) -> Self {
        let mut frames = Vec::with_capacity(frame_count);
        frames.resize_with(frame_count, || None);
        Self { frames }
    }

    /// Number of frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn slot(&self, frame: FrameId) -> Result<&Option<Box<FrameBytes>>, FatalMemoryError> {
        self.frames
            .get(frame.0 as usize)
            .ok_or(FatalMemoryError::NonexistentPage(frame))
    }

    fn materialize(&mut self, frame: FrameId) -> Result<&mut FrameBytes, FatalMemoryError> {
        let slot = self
            .frames
            .get_mut(frame.0 as usize)
            .ok_or(FatalMemoryError::NonexistentPage(frame))?;
        Ok(slot.get_or_insert_with(|| Box::new([0; PAGE_SIZE])))
    }

    /// Read one byte
    pub fn read_byte(&self, addr: PhysAddr) -> Result<u8, FatalMemoryError> {
        Ok(self
            .slot(addr.frame())?
            .as_ref()
            .map_or(0, |bytes| bytes[addr.page_offset()]))
    }

    /// Write one byte
    pub fn write_byte(&mut self, addr: PhysAddr, value: u8) -> Result<(), FatalMemoryError> {
        self.materialize(addr.frame())?[addr.page_offset()] = value;
        Ok(())
    }

    /// Read a 32-bit word; `addr` must be 4-byte aligned
    pub fn read_u32(&self, addr: PhysAddr) -> Result<u32, FatalMemoryError> {
        debug_assert_eq!(addr.0 & 3, 0);
        let offset = addr.page_offset();
        Ok(self.slot(addr.frame())?.as_ref().map_or(0, |bytes| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        }))
    }

    /// Write a 32-bit word; `addr` must be 4-byte aligned
    pub fn write_u32(&mut self, addr: PhysAddr, value: u32) -> Result<(), FatalMemoryError> {
        debug_assert_eq!(addr.0 & 3, 0);
        let offset = addr.page_offset();
        let bytes = self.materialize(addr.frame())?;
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Fill a frame with zeros
    pub fn zero_frame(&mut self, frame: FrameId) -> Result<(), FatalMemoryError> {
        let slot = self
            .frames
            .get_mut(frame.0 as usize)
            .ok_or(FatalMemoryError::NonexistentPage(frame))?;
        // Dropping the backing store is the same as zero-filling it.
        *slot = None;
        Ok(())
    }

    /// Copy the full contents of `from` into `to`
    pub fn copy_frame(&mut self, from: FrameId, to: FrameId) -> Result<(), FatalMemoryError> {
        let source = self.slot(from)?.as_deref().copied();
        self.slot(to)?;
        match source {
            Some(bytes) => *self.materialize(to)? = bytes,
            None => self.zero_frame(to)?,
        }
        Ok(())
    }

    /// Snapshot of a frame's contents
    pub fn frame_bytes(&self, frame: FrameId) -> Result<FrameBytes, FatalMemoryError> {
        Ok(self
            .slot(frame)?
            .as_deref()
            .copied()
            .unwrap_or([0; PAGE_SIZE]))
    }

    /// Whether every byte of a frame is zero
    pub fn is_zeroed(&self, frame: FrameId) -> Result<bool, FatalMemoryError> {
        Ok(self
            .slot(frame)?
            .as_ref()
            .map_or(true, |bytes| bytes.iter().all(|&b| b == 0)))
    }
}
