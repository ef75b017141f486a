//! Parses the kernel's per-process memory map and classifies entries into per-ELF-object
//! segments (SPEC_FULL.md §4.6, §6).

use std::collections::HashMap;
use std::fs;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{CoreError, CoreResult};
use crate::object_info::ObjectInformation;
use crate::util::Address;

const MAPS_FILE: &str = "/proc/<pid>/maps";

lazy_static! {
    // <start>-<end> <perms> <offset> <dev_major>:<dev_minor> <inode> <pathname?>
    static ref MAPS_LINE: Regex = Regex::new(concat!(
        r"^(?P<start>[0-9a-f]+)-(?P<end>[0-9a-f]+)\s+",
        r"(?P<perms>[rwxsp-]{4})\s+",
        r"(?P<offset>[0-9a-f]+)\s+",
        r"[0-9a-f]+:[0-9a-f]+\s+",
        r"\d+\s*",
        r"(?P<pathname>.*)$"
    ))
    .unwrap();
}

/// One parsed entry of `/proc/<pid>/maps`.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub start: Address,
    pub end: Address,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub shared: bool,
    pub offset: u64,
    /// Empty for anonymous mappings; a bracketed pseudo-name (`[stack]`, `[vdso]`, ...) for
    /// kernel-provided regions; otherwise the backing file's path.
    pub pathname: String,
}

impl MapEntry {
    fn parse(line: &str) -> CoreResult<Self> {
        let caps = MAPS_LINE
            .captures(line)
            .ok_or_else(|| CoreError::MapFormatError {
                file: MAPS_FILE,
                line: line.to_string(),
            })?;

        let parse_hex = |name: &str| -> CoreResult<usize> {
            usize::from_str_radix(&caps[name], 16).map_err(|_| CoreError::MapFormatError {
                file: MAPS_FILE,
                line: line.to_string(),
            })
        };

        let start = unsafe { Address::from_usize(parse_hex("start")?) };
        let end = unsafe { Address::from_usize(parse_hex("end")?) };
        let perms = &caps["perms"];
        let perms_bytes = perms.as_bytes();
        if perms_bytes.len() != 4 {
            return Err(CoreError::MapFormatError {
                file: MAPS_FILE,
                line: line.to_string(),
            });
        }

        Ok(MapEntry {
            start,
            end,
            readable: perms_bytes[0] == b'r',
            writable: perms_bytes[1] == b'w',
            executable: perms_bytes[2] == b'x',
            shared: perms_bytes[3] == b's',
            offset: u64::from_str_radix(&caps["offset"], 16).map_err(|_| {
                CoreError::MapFormatError {
                    file: MAPS_FILE,
                    line: line.to_string(),
                }
            })?,
            pathname: caps["pathname"].trim().to_string(),
        })
    }
}

/// The full parsed map for one process, plus ELF-object classification.
pub struct MemoryMap {
    pub entries: Vec<MapEntry>,
}

impl MemoryMap {
    /// Read and parse `/proc/<pid>/maps`.
    pub fn read_for_pid(pid: i32) -> CoreResult<Self> {
        let path = format!("/proc/{pid}/maps");
        let contents = fs::read_to_string(&path).map_err(|source| CoreError::OsResourceExhausted {
            operation: "open /proc/<pid>/maps",
            source,
        })?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> CoreResult<Self> {
        let mut entries = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(MapEntry::parse(line)?);
        }
        Ok(MemoryMap { entries })
    }

    /// Classify the entries belonging to one ELF object, identified by the path of its backing
    /// file (or a bracket pseudo-name). `base_address` is the object's lowest mapped address,
    /// used as the DWARF `addr`-opcode bias.
    ///
    /// Multiple read-write, read-only or executable segments for one object are disallowed and
    /// fatal (SPEC_FULL.md §4.6): a second ELF object mapped at a colliding classification would
    /// silently corrupt the descriptor, so this is treated the same as a programming error.
    pub fn classify_object(&self, pathname: &str, executable: bool) -> CoreResult<ObjectInformation> {
        // An anonymous `.bss` mapping has no pathname of its own, so it can't be picked up by a
        // pathname filter; it is recognized instead by address adjacency to the object's rw
        // segment, which the kernel always lists immediately before it.
        let mut matching: Vec<&MapEntry> = Vec::new();
        for entry in &self.entries {
            if entry.pathname == pathname {
                matching.push(entry);
            } else if entry.pathname.is_empty() && entry.writable {
                if let Some(last) = matching.last() {
                    if last.writable && last.end == entry.start {
                        matching.push(entry);
                    }
                }
            }
        }

        let base_address = matching
            .iter()
            .map(|e| e.start)
            .min()
            .unwrap_or(Address::ZERO);

        let mut info = ObjectInformation::empty(base_address, executable);
        let mut seen_exec = false;
        let mut seen_ro = false;

        for entry in &matching {
            if entry.executable && entry.readable {
                if seen_exec {
                    return Err(CoreError::InvariantViolation(format!(
                        "object `{pathname}` has more than one executable segment"
                    )));
                }
                seen_exec = true;
                info.start_exec = entry.start;
                info.end_exec = entry.end;
            } else if entry.writable {
                if info.has_rw_segment() && info.end_rw == entry.start {
                    // anonymous mapping directly following the previous rw segment: .bss
                    info.end_rw = entry.end;
                } else if info.has_rw_segment() {
                    return Err(CoreError::InvariantViolation(format!(
                        "object `{pathname}` has more than one read-write segment"
                    )));
                } else {
                    info.start_rw = entry.start;
                    info.end_rw = entry.end;
                }
            } else if entry.readable {
                if seen_ro {
                    return Err(CoreError::InvariantViolation(format!(
                        "object `{pathname}` has more than one read-only segment"
                    )));
                }
                seen_ro = true;
                info.start_ro = entry.start;
                info.end_ro = entry.end;
            }
        }

        Ok(info)
    }

    /// Group every distinct backing-file pathname to its entries, skipping anonymous mappings
    /// and kernel pseudo-names (`[stack]`, `[vdso]`, `[heap]`, ...).
    pub fn object_pathnames(&self) -> Vec<String> {
        let mut seen = HashMap::new();
        let mut order = Vec::new();
        for entry in &self.entries {
            if entry.pathname.is_empty() || entry.pathname.starts_with('[') {
                continue;
            }
            if seen.insert(entry.pathname.clone(), ()).is_none() {
                order.push(entry.pathname.clone());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_line() {
        let contents = "\
55a1a0000000-55a1a0021000 r-xp 00000000 08:01 1234567 /usr/bin/target
55a1a0221000-55a1a0223000 rw-p 00021000 08:01 1234567 /usr/bin/target
55a1a0223000-55a1a0225000 rw-p 00000000 00:00 0
7f0000000000-7f0000021000 r--p 00000000 08:01 7654321 /usr/lib/libc.so.6
7ffd00000000-7ffd00021000 rw-p 00000000 00:00 0          [stack]
";
        let map = MemoryMap::parse(contents).unwrap();
        assert_eq!(map.entries.len(), 5);
        assert!(map.entries[0].executable);
        assert!(map.entries[1].writable);
        assert_eq!(map.entries[4].pathname, "[stack]");
    }

    #[test]
    fn test_classify_object_bss_extension() {
        let contents = "\
55a1a0000000-55a1a0021000 r-xp 00000000 08:01 1234567 /usr/bin/target
55a1a0221000-55a1a0222000 r--p 00021000 08:01 1234567 /usr/bin/target
55a1a0222000-55a1a0223000 rw-p 00022000 08:01 1234567 /usr/bin/target
55a1a0223000-55a1a0225000 rw-p 00000000 00:00 0
";
        let map = MemoryMap::parse(contents).unwrap();
        let info = map.classify_object("/usr/bin/target", true).unwrap();
        assert_eq!(info.start_rw.as_usize(), 0x55a1a0222000);
        assert_eq!(info.end_rw.as_usize(), 0x55a1a0225000, "anon region should extend end_rw as .bss");
    }

    #[test]
    fn test_rejects_malformed_line() {
        let err = MemoryMap::parse("not a valid maps line\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_duplicate_rw_segment() {
        let contents = "\
55a1a0000000-55a1a0001000 rw-p 00000000 08:01 1 /usr/bin/target
55a1a0002000-55a1a0003000 rw-p 00010000 08:01 1 /usr/bin/target
";
        let map = MemoryMap::parse(contents).unwrap();
        assert!(map.classify_object("/usr/bin/target", true).is_err());
    }
}
