// glvnd/src/execmem.rs
//
//! Memory for generated entry points.
//!
//! The preferred layout is a single anonymous mapping that is readable, writable and executable.
//! Kernels that enforce W^X refuse that, in which case the same `memfd` is mapped twice: once
//! writable, for patching stubs, and once executable, for running them.

use crate::Error;

use libc::{c_void, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, MAP_SHARED};
use libc::{PROT_EXEC, PROT_READ, PROT_WRITE};
use std::io;
use std::ptr;

pub struct ExecutableMemory {
    writable: *mut u8,
    executable: *mut u8,
    len: usize,
    fd: Option<libc::c_int>,
}

// The mappings are plain memory owned by this object.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl ExecutableMemory {
    /// Maps at least `len` bytes of executable memory.
    pub fn new(len: usize) -> Result<ExecutableMemory, Error> {
        let len = round_to_page_size(len);
        unsafe {
            let address = libc::mmap(ptr::null_mut(),
                                     len,
                                     PROT_READ | PROT_WRITE | PROT_EXEC,
                                     MAP_PRIVATE | MAP_ANONYMOUS,
                                     -1,
                                     0);
            if address != MAP_FAILED {
                return Ok(ExecutableMemory {
                    writable: address as *mut u8,
                    executable: address as *mut u8,
                    len,
                    fd: None,
                });
            }

            debug!("glvnd: writable executable mapping refused ({}), trying a dual mapping",
                   io::Error::last_os_error());
            ExecutableMemory::new_dual_mapped(len)
        }
    }

    #[cfg(linux)]
    unsafe fn new_dual_mapped(len: usize) -> Result<ExecutableMemory, Error> {
        let fd = libc::memfd_create(b"glvnd-entry-points\0".as_ptr() as *const libc::c_char,
                                    libc::MFD_CLOEXEC);
        if fd < 0 {
            return Err(Error::ExecutableMemoryMapFailed(last_errno()));
        }
        if libc::ftruncate(fd, len as libc::off_t) != 0 {
            let errno = last_errno();
            libc::close(fd);
            return Err(Error::ExecutableMemoryMapFailed(errno));
        }

        let writable = libc::mmap(ptr::null_mut(), len, PROT_READ | PROT_WRITE, MAP_SHARED, fd, 0);
        if writable == MAP_FAILED {
            let errno = last_errno();
            libc::close(fd);
            return Err(Error::ExecutableMemoryMapFailed(errno));
        }

        let executable = libc::mmap(ptr::null_mut(), len, PROT_READ | PROT_EXEC, MAP_SHARED, fd, 0);
        if executable == MAP_FAILED {
            let errno = last_errno();
            libc::munmap(writable, len);
            libc::close(fd);
            return Err(Error::ExecutableMemoryProtectFailed(errno));
        }

        Ok(ExecutableMemory {
            writable: writable as *mut u8,
            executable: executable as *mut u8,
            len,
            fd: Some(fd),
        })
    }

    #[cfg(not(linux))]
    unsafe fn new_dual_mapped(_: usize) -> Result<ExecutableMemory, Error> {
        Err(Error::ExecutableMemoryMapFailed(last_errno()))
    }

    /// Where stubs are written.
    #[inline]
    pub fn writable(&self) -> *mut u8 {
        self.writable
    }

    /// Where stubs run from.
    #[inline]
    pub fn executable(&self) -> *const u8 {
        self.executable
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_dual_mapped(&self) -> bool {
        self.writable != self.executable
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.writable as *mut c_void, self.len);
            if self.is_dual_mapped() {
                libc::munmap(self.executable as *mut c_void, self.len);
            }
            if let Some(fd) = self.fd {
                libc::close(fd);
            }
        }
    }
}

fn round_to_page_size(len: usize) -> usize {
    let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    };
    let len = len.max(1);
    (len + page_size - 1) / page_size * page_size
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_to_whole_pages() {
        let memory = ExecutableMemory::new(10).unwrap();
        assert!(memory.len() >= 10);
        assert_eq!(memory.len() % 4096, 0);
    }

    #[test]
    fn test_writes_are_visible_through_executable_view() {
        let memory = ExecutableMemory::new(8192).unwrap();
        unsafe {
            *memory.writable().add(4100) = 0xa5;
            assert_eq!(*memory.executable().add(4100), 0xa5);
        }
    }

    #[cfg(linux)]
    #[test]
    fn test_dual_mapping_shares_pages() {
        let memory = unsafe { ExecutableMemory::new_dual_mapped(4096).unwrap() };
        assert!(memory.is_dual_mapped());
        unsafe {
            *memory.writable().add(17) = 0x3c;
            assert_eq!(*memory.executable().add(17), 0x3c);
        }
    }
}
