//! Raw target-process memory access: self-target via `memcpy`, child-target via `pread`/`pwrite`
//! against `/proc/<pid>/mem` (SPEC_FULL.md §4.4, §6).

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;

use crate::error::{CoreError, CoreResult};
use crate::snapshot::OpenFileDescription;
use crate::util::Address;

/// Readlink-target prefixes skipped during open-file enumeration (SPEC_FULL.md §4.3 step 3, §6):
/// pipes, sockets, and a tool's privatization shared-memory temp files.
const SKIP_PREFIXES: &[&str] = &["pipe:", "socket:", "/dev/shm/ust-shm-tmp-"];

/// Query the host's native page size, the same quantity §6 calls "read from the OS at init".
/// Falls back to [`crate::util::constants::BYTES_IN_PAGE`] if the OS refuses to answer, which in
/// practice only happens on exotic platforms this crate does not otherwise support.
pub fn os_page_size() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret > 0 {
        ret as usize
    } else {
        crate::util::constants::BYTES_IN_PAGE
    }
}

/// A live handle to a target process's memory, either the checker's own (`Self`) or a traced
/// child's (`Child`, via `/proc/<pid>/mem`).
pub enum ProcessMemory {
    SelfProcess,
    Child { pid: i32, mem_file: File },
}

impl ProcessMemory {
    pub fn for_self() -> Self {
        ProcessMemory::SelfProcess
    }

    /// Open `/proc/<pid>/mem` for a traced child. The file is opened read-write so both
    /// `read_bytes` and `write_bytes` can use it.
    pub fn for_child(pid: i32) -> CoreResult<Self> {
        let path = format!("/proc/{pid}/mem");
        let mem_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| CoreError::OsResourceExhausted {
                operation: "open /proc/<pid>/mem",
                source,
            })?;
        Ok(ProcessMemory::Child { pid, mem_file })
    }

    pub fn pid(&self) -> Option<i32> {
        match self {
            ProcessMemory::SelfProcess => None,
            ProcessMemory::Child { pid, .. } => Some(*pid),
        }
    }

    /// Read `buf.len()` bytes from `addr` in the target into `buf`.
    pub fn read_bytes(&self, addr: Address, buf: &mut [u8]) -> CoreResult<()> {
        match self {
            ProcessMemory::SelfProcess => {
                unsafe {
                    std::ptr::copy_nonoverlapping(addr.to_ptr::<u8>(), buf.as_mut_ptr(), buf.len());
                }
                Ok(())
            }
            ProcessMemory::Child { pid, mem_file } => {
                pread_retrying(mem_file, addr, buf).map_err(|source| CoreError::TargetReadFailed {
                    action: "read",
                    addr,
                    len: buf.len(),
                    pid: *pid,
                    source,
                })
            }
        }
    }

    /// Write `buf` to `addr` in the target.
    pub fn write_bytes(&self, addr: Address, buf: &[u8]) -> CoreResult<()> {
        match self {
            ProcessMemory::SelfProcess => {
                unsafe {
                    std::ptr::copy_nonoverlapping(buf.as_ptr(), addr.to_mut_ptr::<u8>(), buf.len());
                }
                Ok(())
            }
            ProcessMemory::Child { pid, mem_file } => {
                pwrite_retrying(mem_file, addr, buf).map_err(|source| CoreError::TargetReadFailed {
                    action: "write",
                    addr,
                    len: buf.len(),
                    pid: *pid,
                    source,
                })
            }
        }
    }
}

/// `pread` at byte-offset = virtual address, retrying `EINTR` and any short read with the
/// remaining tail, per SPEC_FULL.md §6.
fn pread_retrying(file: &File, addr: Address, buf: &mut [u8]) -> io::Result<()> {
    let mut done = 0;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], (addr.as_usize() + done) as u64) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short read from /proc/<pid>/mem",
                ))
            }
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn pwrite_retrying(file: &File, addr: Address, buf: &[u8]) -> io::Result<()> {
    let mut done = 0;
    while done < buf.len() {
        match file.write_at(&buf[done..], (addr.as_usize() + done) as u64) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "short write to /proc/<pid>/mem",
                ))
            }
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Wraps a raw libc call the way `util::os::posix_common::wrap_libc_call` does: returns the call's
/// return value unless it equals `failure_value` (the sentinel the call documents for failure —
/// `-1` for most syscalls, `MAP_FAILED` for `mmap`/`mremap`), in which case it reads `errno`.
pub(crate) fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, failure_value: T) -> io::Result<T> {
    let ret = f();
    if ret == failure_value {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Asserts the given file descriptor refers to an open, readable stream; used when validating
/// `/proc/<pid>/fd` entries during open-file enumeration (SPEC_FULL.md §4.3 step 3).
pub(crate) fn fd_is_valid(file: &File) -> bool {
    file.as_raw_fd() >= 0
}

/// Enumerate `pid`'s open file descriptors for inclusion in a Snapshot (SPEC_FULL.md §4.3 step 3,
/// §6). Skips fds 0-2, anything whose `readlink` target starts with one of [`SKIP_PREFIXES`], and
/// any entry that resolves to the enumeration directory itself.
pub fn enumerate_open_files(pid: i32) -> CoreResult<Vec<OpenFileDescription>> {
    let fd_dir = format!("/proc/{pid}/fd");
    let entries = fs::read_dir(&fd_dir).map_err(|source| CoreError::OsResourceExhausted {
        operation: "read /proc/<pid>/fd",
        source,
    })?;

    let mut open_files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CoreError::OsResourceExhausted {
            operation: "iterate /proc/<pid>/fd",
            source,
        })?;
        let fd: i32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(fd) => fd,
            None => continue,
        };
        if fd <= 2 {
            continue;
        }

        let target = match fs::read_link(entry.path()) {
            Ok(target) => target,
            Err(_) => continue, // fd closed between readdir and readlink
        };
        let target_str = target.to_string_lossy();
        if target_str == fd_dir || SKIP_PREFIXES.iter().any(|p| target_str.starts_with(p)) {
            continue;
        }

        let fdinfo_path = format!("/proc/{pid}/fdinfo/{fd}");
        let fdinfo_file = match File::open(&fdinfo_path) {
            Ok(f) => f,
            Err(_) => continue,
        };
        if !fd_is_valid(&fdinfo_file) {
            continue;
        }
        let fdinfo = fs::read_to_string(&fdinfo_path).unwrap_or_default();
        let mut offset = 0u64;
        let mut flags = 0i32;
        for line in fdinfo.lines() {
            if let Some(v) = line.strip_prefix("pos:\t") {
                offset = v.trim().parse().unwrap_or(0);
            } else if let Some(v) = line.strip_prefix("flags:\t") {
                flags = i32::from_str_radix(v.trim(), 8).unwrap_or(0);
            }
        }

        open_files.push(OpenFileDescription {
            fd,
            path: target_str.into_owned(),
            flags,
            offset,
        });
    }
    Ok(open_files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_roundtrip() {
        let mem = ProcessMemory::for_self();
        let mut x: u64 = 0xDEAD_BEEF_CAFE_F00D;
        let addr = Address::from_ptr(&x as *const u64);
        let mut buf = [0u8; 8];
        mem.read_bytes(addr, &mut buf).unwrap();
        assert_eq!(u64::from_ne_bytes(buf), x);

        let new_value: u64 = 0x1234_5678_9abc_def0;
        mem.write_bytes(addr, &new_value.to_ne_bytes()).unwrap();
        assert_eq!(x, new_value);
        let _ = &mut x; // keep `x` alive (and silence unused-mut lints) across the raw writes above
    }

    #[test]
    fn test_os_page_size_is_reasonable() {
        let size = os_page_size();
        assert!(size >= 4096);
        assert_eq!(size % 4096, 0);
    }
}
