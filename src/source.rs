//! Backing memory for a heap.
//!
//! The allocator never talks to the operating system directly. It asks a
//! [`HeapSource`] for more bytes whenever it runs out, the same way a
//! classic allocator calls `sbrk`. Sources only ever grow, and they grow by
//! appending: bytes already handed out keep their offsets forever, which is
//! what lets the rest of the crate address the heap with plain offsets
//! instead of pointers.

use thiserror::Error;

/// The host refused to provide more heap space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("heap source out of memory")]
pub struct OutOfMemory;

/// A growable run of contiguous bytes backing one heap.
///
/// `grow` extends the range while preserving existing contents. There is no
/// shrink: the heap only moves forward, exactly like a program break.
pub trait HeapSource {
    /// Current length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends exactly `additional` zeroed bytes.
    fn grow(&mut self, additional: usize) -> Result<(), OutOfMemory>;

    /// Everything grown so far.
    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];
}

/// [`HeapSource`] backed by a plain `Vec<u8>`.
///
/// The storage may move when the vector reallocates, but that's invisible
/// to the allocator because it only ever holds offsets. The optional limit
/// makes it trivial to test the out of memory paths.
#[derive(Debug, Default)]
pub struct VecSource {
    bytes: Vec<u8>,
    limit: Option<usize>,
}

impl VecSource {
    /// Unbounded source. Grows until the process runs out of memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that refuses to grow past `limit` total bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit: Some(limit),
        }
    }
}

impl HeapSource for VecSource {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn grow(&mut self, additional: usize) -> Result<(), OutOfMemory> {
        let new_len = self.bytes.len().checked_add(additional).ok_or(OutOfMemory)?;
        if self.limit.is_some_and(|limit| new_len > limit) {
            return Err(OutOfMemory);
        }
        self.bytes.resize(new_len, 0);
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(unix)]
pub use self::platform::MmapSource;

#[cfg(unix)]
mod platform {
    use std::ptr::{self, NonNull};
    use std::slice;

    use super::{HeapSource, OutOfMemory};

    /// [`HeapSource`] backed by one anonymous private mapping.
    ///
    /// The whole reservation is mapped read-write up front and the source
    /// hands out a growing prefix of it, so the base address never changes
    /// and `grow` is pure bookkeeping. Growing past the reservation fails
    /// with [`OutOfMemory`]. The mapping is returned to the kernel on drop.
    pub struct MmapSource {
        base: NonNull<u8>,
        reserved: usize,
        len: usize,
    }

    // The mapping is exclusively owned by this struct.
    unsafe impl Send for MmapSource {}

    impl MmapSource {
        /// Reserves `max_size` bytes, or `None` if the mapping cannot be
        /// created.
        pub fn new(max_size: usize) -> Option<Self> {
            // Read-write, private to our process, not mapped to any file.
            // For all the options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            let protection = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            let address =
                unsafe { libc::mmap(ptr::null_mut(), max_size, protection, flags, -1, 0) };

            if address == libc::MAP_FAILED {
                return None;
            }

            Some(Self {
                base: NonNull::new(address.cast())?,
                reserved: max_size,
                len: 0,
            })
        }

        /// Total bytes reserved up front.
        pub fn reserved(&self) -> usize {
            self.reserved
        }
    }

    impl HeapSource for MmapSource {
        fn len(&self) -> usize {
            self.len
        }

        fn grow(&mut self, additional: usize) -> Result<(), OutOfMemory> {
            let new_len = self.len.checked_add(additional).ok_or(OutOfMemory)?;
            if new_len > self.reserved {
                return Err(OutOfMemory);
            }
            // Anonymous mappings are zero filled by the kernel, so the
            // fresh bytes already satisfy the `grow` contract.
            self.len = new_len;
            Ok(())
        }

        fn bytes(&self) -> &[u8] {
            unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
        }

        fn bytes_mut(&mut self) -> &mut [u8] {
            unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
        }
    }

    impl Drop for MmapSource {
        fn drop(&mut self) {
            unsafe {
                if libc::munmap(self.base.as_ptr().cast(), self.reserved) != 0 {
                    // TODO: What should we do here? The region is still
                    // mapped at this point.
                }
            }
        }
    }
}
