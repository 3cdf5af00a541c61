//! In-memory address space over a byte buffer.
//!
//! Synthetic images for tests and scratch views over already-read bytes.
//! Sits at the bottom of a stack like the file layer does, but never
//! touches the filesystem.

use std::sync::RwLock;

use crate::{AddressSpace, AsType, MemoryAddress, ReadError, Run};

pub struct BufferAddressSpace {
    data: RwLock<Vec<u8>>,
    base_offset: MemoryAddress,
    writable: bool,
    name: String,
}

impl BufferAddressSpace {
    /// Read-only buffer mapped at `base_offset`.
    #[must_use]
    pub fn with_data(data: Vec<u8>, base_offset: MemoryAddress) -> Self {
        Self {
            data: RwLock::new(data),
            base_offset,
            writable: false,
            name: "Buffer AS".into(),
        }
    }

    /// Same, with `write` enabled.
    #[must_use]
    pub fn writable(data: Vec<u8>, base_offset: MemoryAddress) -> Self {
        Self {
            writable: true,
            ..Self::with_data(data, base_offset)
        }
    }

    fn len(&self) -> u64 {
        self.data.read().expect("buffer lock poisoned").len() as u64
    }
}

impl AddressSpace for BufferAddressSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn astype(&self) -> AsType {
        AsType::Physical
    }

    fn read(&self, addr: MemoryAddress, length: usize) -> Result<Vec<u8>, ReadError> {
        let data = self.data.read().expect("buffer lock poisoned");
        let end = self.base_offset + data.len() as u64;
        if addr < self.base_offset || addr >= end {
            return Err(ReadError::Short {
                addr,
                wanted: length,
                got: Vec::new(),
            });
        }
        let start = (addr - self.base_offset) as usize;
        let avail = data.len() - start;
        if avail < length {
            return Err(ReadError::Short {
                addr,
                wanted: length,
                got: data[start..].to_vec(),
            });
        }
        Ok(data[start..start + length].to_vec())
    }

    fn is_valid(&self, addr: MemoryAddress) -> bool {
        addr >= self.base_offset && addr < self.base_offset + self.len()
    }

    fn runs(&self) -> Vec<Run> {
        vec![Run::new(self.base_offset, self.len())]
    }

    fn write(&self, addr: MemoryAddress, data: &[u8]) -> bool {
        if !self.writable {
            return false;
        }
        let mut buf = self.data.write().expect("buffer lock poisoned");
        if addr < self.base_offset {
            return false;
        }
        let start = (addr - self.base_offset) as usize;
        let end = start + data.len();
        if end > buf.len() {
            return false;
        }
        buf[start..end].copy_from_slice(data);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_inside_and_past_the_buffer() {
        let aspace = BufferAddressSpace::with_data((0u8..16).collect(), 0x100);
        assert_eq!(aspace.read(0x100, 4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(aspace.read(0x10C, 4).unwrap(), vec![12, 13, 14, 15]);

        let err = aspace.read(0x10E, 4).unwrap_err();
        let ReadError::Short { got, wanted, .. } = err;
        assert_eq!(wanted, 4);
        assert_eq!(got, vec![14, 15]);

        assert!(aspace.is_valid(0x100));
        assert!(!aspace.is_valid(0x110));
        assert_eq!(aspace.runs(), vec![Run::new(0x100, 16)]);
    }

    #[test]
    fn write_gated_by_flag() {
        let ro = BufferAddressSpace::with_data(vec![0; 8], 0);
        assert!(!ro.write(0, &[1, 2]));

        let rw = BufferAddressSpace::writable(vec![0; 8], 0);
        assert!(rw.write(2, &[1, 2]));
        assert_eq!(rw.read(0, 8).unwrap(), vec![0, 0, 1, 2, 0, 0, 0, 0]);
        assert!(!rw.write(7, &[1, 2]));
    }
}
