//! Direct file layer.
//!
//! Bottom of every stack over a raw image: `read` seeks and reads, one
//! `(0, len)` run covers availability, and reads past the end come back
//! short for the caller to pad. Seek + read is not atomic at the OS
//! level, so the handle lives behind a mutex shared by every layer
//! stacked above.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use crate::{AddressSpace, AsType, MemoryAddress, ReadError, Run};

pub struct FileAddressSpace {
    handle: Mutex<File>,
    size: u64,
    path: PathBuf,
    name: String,
    writable: bool,
}

impl FileAddressSpace {
    /// Stack rank: the layer of last resort.
    pub const ORDER: u16 = 100;

    /// Open `path` as the bottom layer. `writable` additionally opens
    /// the file for writing and enables [`AddressSpace::write`].
    ///
    /// # Errors
    /// Propagates the underlying open/metadata failure.
    pub fn open(path: &Path, writable: bool) -> std::io::Result<Self> {
        let handle = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)?;
        let size = handle.metadata()?.len();
        debug!("file layer over {} ({size} bytes)", path.display());
        Ok(Self {
            handle: Mutex::new(handle),
            size,
            path: path.to_path_buf(),
            name: path.display().to_string(),
            writable,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }
}

impl AddressSpace for FileAddressSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn astype(&self) -> AsType {
        AsType::Physical
    }

    fn read(&self, addr: MemoryAddress, length: usize) -> Result<Vec<u8>, ReadError> {
        let mut handle = self.handle.lock().expect("file handle lock poisoned");
        let mut buf = vec![0u8; length];
        let got = handle
            .seek(SeekFrom::Start(addr))
            .and_then(|_| {
                let mut filled = 0;
                loop {
                    match handle.read(&mut buf[filled..]) {
                        Ok(0) => break Ok(filled),
                        Ok(n) => filled += n,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(e) => break Err(e),
                    }
                }
            })
            .unwrap_or(0);
        if got == length {
            Ok(buf)
        } else {
            buf.truncate(got);
            Err(ReadError::Short {
                addr,
                wanted: length,
                got: buf,
            })
        }
    }

    fn is_valid(&self, addr: MemoryAddress) -> bool {
        addr < self.size
    }

    fn runs(&self) -> Vec<Run> {
        vec![Run::new(0, self.size)]
    }

    fn write(&self, addr: MemoryAddress, data: &[u8]) -> bool {
        if !self.writable {
            return false;
        }
        let mut handle = self.handle.lock().expect("file handle lock poisoned");
        handle
            .seek(SeekFrom::Start(addr))
            .and_then(|_| handle.write_all(data))
            .is_ok()
    }
}
