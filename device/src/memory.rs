//! Device memory.
//!
//! Each device owns a disjoint 64-bit address range. Allocations are 256-byte
//! aligned, never overlap, and are addressed by their base; any access is bounds
//! checked against the allocation that contains it.

use std::collections::BTreeMap;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::{OutOfMemorySnafu, Result};

pub const ALIGNMENT: u64 = 256;

#[derive(Debug, Default)]
struct State {
    allocations: BTreeMap<u64, Vec<u8>>,
    next: u64,
    used: usize,
}

impl State {
    /// Allocation containing `[address, address + len)`.
    fn locate(&self, address: u64, len: usize) -> std::result::Result<(u64, usize), String> {
        let Some((&base, data)) = self.allocations.range(..=address).next_back() else {
            return Err(format!("address {address:#x} is not mapped"));
        };
        let offset = (address - base) as usize;
        if offset.checked_add(len).is_none_or(|end| end > data.len()) {
            return Err(format!(
                "access of {len} bytes at {address:#x} is outside the {} byte allocation at {base:#x}",
                data.len()
            ));
        }
        Ok((base, offset))
    }
}

/// One pending store produced by a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Write {
    pub address: u64,
    pub bytes: [u8; 8],
    pub len: u8,
}

#[derive(Debug)]
pub struct Memory {
    base: u64,
    capacity: usize,
    state: RwLock<State>,
}

impl Memory {
    pub fn new(base: u64, capacity: usize) -> Self {
        Self { base, capacity, state: RwLock::new(State { next: base, ..State::default() }) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.state.read().used
    }

    /// Whether `address` falls in this device's address range.
    pub fn owns(&self, address: u64) -> bool {
        let state = self.state.read();
        address >= self.base && address < state.next
    }

    /// Allocate `bytes` zeroed bytes and return the device address.
    pub fn allocate(&self, bytes: usize) -> Result<u64> {
        let mut state = self.state.write();
        let available = self.capacity - state.used;
        if bytes > available {
            return OutOfMemorySnafu { requested: bytes, available }.fail();
        }
        let address = state.next;
        state.next += (bytes as u64).next_multiple_of(ALIGNMENT).max(ALIGNMENT);
        state.used += bytes;
        state.allocations.insert(address, vec![0; bytes]);
        Ok(address)
    }

    pub fn free(&self, address: u64) {
        let mut state = self.state.write();
        if let Some(data) = state.allocations.remove(&address) {
            state.used -= data.len();
        }
    }

    pub fn write(&self, address: u64, bytes: &[u8]) -> std::result::Result<(), String> {
        let mut state = self.state.write();
        let (base, offset) = state.locate(address, bytes.len())?;
        if let Some(data) = state.allocations.get_mut(&base) {
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    pub fn read(&self, address: u64, len: usize) -> std::result::Result<Vec<u8>, String> {
        let view = self.view();
        view.load(address, len).map(<[u8]>::to_vec)
    }

    /// Read-only view held while kernels execute.
    pub fn view(&self) -> MemoryView<'_> {
        MemoryView(self.state.read())
    }

    /// Apply kernel stores in order. Every store is checked before any is applied.
    pub fn commit(&self, writes: &[Write]) -> std::result::Result<(), String> {
        let mut state = self.state.write();
        let mut located = Vec::with_capacity(writes.len());
        for write in writes {
            located.push(state.locate(write.address, write.len as usize)?);
        }
        for (write, (base, offset)) in writes.iter().zip(located) {
            if let Some(data) = state.allocations.get_mut(&base) {
                let len = write.len as usize;
                data[offset..offset + len].copy_from_slice(&write.bytes[..len]);
            }
        }
        Ok(())
    }
}

pub struct MemoryView<'a>(RwLockReadGuard<'a, State>);

impl MemoryView<'_> {
    pub fn load(&self, address: u64, len: usize) -> std::result::Result<&[u8], String> {
        let (base, offset) = self.0.locate(address, len)?;
        let data = &self.0.allocations[&base];
        Ok(&data[offset..offset + len])
    }

    /// Check a store target without performing it.
    pub fn check(&self, address: u64, len: usize) -> std::result::Result<(), String> {
        self.0.locate(address, len).map(|_| ())
    }
}
