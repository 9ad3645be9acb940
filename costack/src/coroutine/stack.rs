//! Coroutine stack allocation.
//!
//! Every coroutine stack is one anonymous mapping laid out as:
//!
//! ```text
//! low                                                            high
//! | guard page | overflow sentinel | usable bytes | underflow sentinel |
//! ```
//!
//! The guard page is mapped `PROT_NONE`, so running off the bottom of the
//! stack faults at the offending write. The two sentinel words are checked
//! at switch points and catch corruption that stays inside the mapping.

use std::io;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

/// Magic value written at both ends of every stack.
pub(crate) const STACK_MAGIC: usize = 0xdead_beef_c0de_5a5a_u64 as usize;

/// Bytes reserved at the top of the mapping: the underflow sentinel plus
/// room to keep the initial frame 16-byte aligned.
const TOP_RESERVE: usize = 2 * mem::size_of::<usize>();

/// Bytes reserved just above the guard page for the overflow sentinel,
/// padded to keep the layout aligned.
const BOTTOM_RESERVE: usize = 2 * mem::size_of::<usize>();

/// Returns the system page size.
pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 { 4096 } else { size as usize }
    })
}

/// A mapped coroutine stack with a guard page and sentinel words.
pub(crate) struct Stack {
    /// Start of the mapping, i.e. the guard page.
    base: NonNull<u8>,

    /// Total mapping length including the guard page.
    len: usize,
}

impl Stack {
    /// Maps a stack providing at least `size` usable bytes.
    ///
    /// The usable size is rounded up to whole pages, so
    /// [`size`](Self::size) may report more than was requested. A size
    /// whose mapping would not fit the address space fails with
    /// [`io::ErrorKind::InvalidInput`].
    pub(crate) fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let len = size
            .checked_add(TOP_RESERVE + BOTTOM_RESERVE)
            .and_then(|usable| usable.checked_next_multiple_of(page))
            .and_then(|usable| usable.checked_add(page))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("stack size {size} overflows the address space"),
                )
            })?;

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK;
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };

        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::mprotect(raw, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(raw, len) };
            return Err(err);
        }

        let stack = Self {
            base: unsafe { NonNull::new_unchecked(raw as *mut u8) },
            len,
        };
        stack.write_guards();

        Ok(stack)
    }

    /// Number of bytes a coroutine may use on this stack.
    pub(crate) fn size(&self) -> usize {
        self.len - page_size() - TOP_RESERVE - BOTTOM_RESERVE
    }

    /// High end of the usable region, where contexts are anchored.
    pub(crate) fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.len - TOP_RESERVE) }
    }

    fn overflow_word(&self) -> *mut usize {
        unsafe { self.base.as_ptr().add(page_size()) as *mut usize }
    }

    fn underflow_word(&self) -> *mut usize {
        unsafe { self.base.as_ptr().add(self.len - mem::size_of::<usize>()) as *mut usize }
    }

    /// Writes the magic value at both stack boundaries.
    pub(crate) fn write_guards(&self) {
        unsafe {
            self.overflow_word().write(STACK_MAGIC);
            self.underflow_word().write(STACK_MAGIC);
        }
    }

    /// Returns the current `(overflow, underflow)` sentinel words.
    pub(crate) fn guards(&self) -> (usize, usize) {
        unsafe { (self.overflow_word().read(), self.underflow_word().read()) }
    }

    /// Returns `true` if both sentinels still hold the magic value.
    pub(crate) fn guards_intact(&self) -> bool {
        self.guards() == (STACK_MAGIC, STACK_MAGIC)
    }

    /// Address range of the usable region, for diagnostics.
    pub(crate) fn bounds(&self) -> (usize, usize) {
        let low = self.overflow_word() as usize;
        let high = self.underflow_word() as usize + mem::size_of::<usize>();
        (low, high)
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut _, self.len);
        }
    }
}
