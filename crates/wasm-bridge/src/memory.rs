//! Guest memory access
//!
//! Pointer types and the copy helpers used to move byte buffers between the
//! host and the guest's linear memory.

use wasmtime::{AsContext, AsContextMut, Memory};

use super::types::{BridgeError, BridgeResult};

/// Guest pointer type (32-bit address in WASM linear memory)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestPtr(pub u32);

impl GuestPtr {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<i32> for GuestPtr {
    fn from(addr: i32) -> Self {
        Self(addr as u32)
    }
}

impl From<GuestPtr> for i32 {
    fn from(ptr: GuestPtr) -> Self {
        ptr.0 as i32
    }
}

/// Guest slice (pointer + length)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestSlice {
    pub ptr: GuestPtr,
    pub len: u32,
}

impl GuestSlice {
    pub fn new(ptr: GuestPtr, len: u32) -> Self {
        Self { ptr, len }
    }

    pub fn from_raw(ptr: i32, len: i32) -> Self {
        Self {
            ptr: GuestPtr::from(ptr),
            len: len as u32,
        }
    }

    /// Split a packed `(ptr << 32) | len` return value
    pub fn unpack(packed: i64) -> Self {
        let packed = packed as u64;
        Self {
            ptr: GuestPtr((packed >> 32) as u32),
            len: (packed & 0xFFFF_FFFF) as u32,
        }
    }

    /// Pointer and length as `i32` call arguments
    pub fn to_raw(&self) -> BridgeResult<(i32, i32)> {
        let len = i32::try_from(self.len).map_err(|_| self.out_of_bounds())?;
        Ok((i32::from(self.ptr), len))
    }

    fn out_of_bounds(&self) -> BridgeError {
        BridgeError::MemoryOutOfBounds {
            offset: u64::from(self.ptr.0),
            size: u64::from(self.len),
        }
    }

    fn range(&self, memory_size: usize) -> BridgeResult<std::ops::Range<usize>> {
        let start = self.ptr.as_usize();
        let end = start
            .checked_add(self.len as usize)
            .filter(|end| *end <= memory_size)
            .ok_or_else(|| self.out_of_bounds())?;
        Ok(start..end)
    }
}

/// Host buffer length as a guest `i32` length
pub fn guest_len(len: usize) -> BridgeResult<i32> {
    i32::try_from(len).map_err(|_| BridgeError::MemoryOutOfBounds {
        offset: 0,
        size: len as u64,
    })
}

/// Copy a slice out of guest memory
pub fn read_bytes(
    memory: &Memory,
    store: impl AsContext,
    slice: GuestSlice,
) -> BridgeResult<Vec<u8>> {
    let data = memory.data(&store);
    let range = slice.range(data.len())?;
    Ok(data[range].to_vec())
}

/// Copy bytes into guest memory at `ptr`
pub fn write_bytes(
    memory: &Memory,
    mut store: impl AsContextMut,
    ptr: GuestPtr,
    bytes: &[u8],
) -> BridgeResult<GuestSlice> {
    let slice = GuestSlice::new(ptr, guest_len(bytes.len())?.unsigned_abs());
    let data = memory.data_mut(&mut store);
    let range = slice.range(data.len())?;
    data[range].copy_from_slice(bytes);
    Ok(slice)
}
