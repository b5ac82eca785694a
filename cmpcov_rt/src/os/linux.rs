//! Executable image lookup through `/proc/self/maps`.

use std::{
    fs::File,
    io::{BufRead, BufReader},
};

use hashbrown::HashMap;
use regex::Regex;

use crate::{die, modules::ModuleInfo};

/// Returns the image containing `address` according to the current process memory map.
///
/// Not being able to open the map listing at all is fatal; a single line that does not parse
/// is merely skipped.
pub(crate) fn image_at(address: usize) -> Option<ModuleInfo> {
    let Ok(mapsfile) = File::open("/proc/self/maps") else {
        die("unable to open /proc/self/maps");
    };
    scan_maps(BufReader::new(mapsfile), address)
}

/// Scans a memory-map listing for the region containing `address`.
///
/// The base recorded for a named module is the start of the *first* region seen for its path,
/// since one file is usually mapped as several consecutive segments, and the size spans from
/// that base to the matching region's end. Segments mapped after the matching one are not
/// covered, so the size can still under-report the full image span. Regions with no backing
/// path get a name synthesized from their start address, so they still resolve.
fn scan_maps<R: BufRead>(reader: R, address: usize) -> Option<ModuleInfo> {
    let re = Regex::new(
        r"^(?P<start>[0-9a-f]+)-(?P<end>[0-9a-f]+) (?P<perm>[-rwxps]{4}) (?P<offset>[0-9a-f]+) [0-9a-f]+:[0-9a-f]+ [0-9]+\s*(?P<path>.*)$",
    )
    .unwrap();

    let mut base_addresses: HashMap<String, usize> = HashMap::new();

    for line in reader.lines() {
        let Ok(line) = line else {
            break;
        };
        let Some(caps) = re.captures(&line) else {
            log::warn!("skipping malformed maps line: {line:?}");
            continue;
        };
        let (Ok(start), Ok(end)) = (
            usize::from_str_radix(&caps["start"], 16),
            usize::from_str_radix(&caps["end"], 16),
        ) else {
            continue;
        };
        let path = caps["path"].trim();

        // Remember where we saw each backing file first, so a match in a later segment can
        // still report the real load base.
        if !path.is_empty() && !base_addresses.contains_key(path) {
            base_addresses.insert(path.to_string(), start);
        }

        if address < start || address >= end {
            continue;
        }

        return Some(if path.is_empty() {
            ModuleInfo {
                base: start,
                size: end - start,
                name: format!("unknown_{start:x}"),
            }
        } else {
            // Span from the first-seen base to this region's end, so the descriptor always
            // contains the address that just matched.
            let base = base_addresses[path];
            ModuleInfo {
                base,
                size: end - base,
                name: basename(path).to_string(),
            }
        });
    }

    None
}

/// The final path component, or the whole string if there is no separator.
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{basename, image_at, scan_maps};
    use crate::modules::{ImageLookup, Modules};

    const MAPS: &str = "\
00400000-00452000 r-xp 00000000 08:02 173521 /usr/bin/dbus-daemon
00651000-00652000 r--p 00051000 08:02 173521 /usr/bin/dbus-daemon
00e03000-00e24000 rw-p 00000000 00:00 0 [heap]
35b1800000-35b1820000 r-xp 00000000 08:02 135522 /usr/lib64/ld-2.15.so
7f3b8c000000-7f3b8c021000 rw-p 00000000 00:00 0
this line does not parse
7fffb2c0d000-7fffb2c2e000 rw-p 00000000 00:00 0 [stack]
";

    fn scan(address: usize) -> Option<super::ModuleInfo> {
        scan_maps(Cursor::new(MAPS), address)
    }

    #[test]
    fn test_named_region() {
        let module = scan(0x400100).unwrap();
        assert_eq!(module.base, 0x400000);
        assert_eq!(module.size, 0x52000);
        assert_eq!(module.name, "dbus-daemon");
    }

    #[test]
    fn test_later_segment_keeps_first_seen_base() {
        // The r--p segment of dbus-daemon matches, but the base is the r-xp segment's start
        // and the size runs from there to the matching segment's end.
        let module = scan(0x651800).unwrap();
        assert_eq!(module.base, 0x400000);
        assert_eq!(module.size, 0x252000);
        assert_eq!(module.name, "dbus-daemon");
        assert!(module.contains(0x651800));
    }

    #[test]
    fn test_later_segment_address_keeps_one_stable_index() {
        struct FixtureImages;

        impl ImageLookup for FixtureImages {
            fn image_at(&mut self, address: usize) -> Option<super::ModuleInfo> {
                scan_maps(Cursor::new(MAPS), address)
            }
        }

        // An address in a later segment must resolve to the same cached entry every time,
        // not append a fresh module per lookup.
        let mut modules = Modules::with_lookup(FixtureImages);
        let first = modules.index_of(0x651800);
        assert!(first.is_some());
        assert_eq!(modules.index_of(0x651800), first);
        assert_eq!(modules.index_of(0x651900), first);
        assert_eq!(modules.count(), 1);
    }

    #[test]
    fn test_anonymous_region_gets_synthesized_name() {
        let module = scan(0x7f3b_8c00_0100).unwrap();
        assert_eq!(module.base, 0x7f3b_8c00_0000);
        assert_eq!(module.size, 0x21000);
        assert_eq!(module.name, "unknown_7f3b8c000000");
    }

    #[test]
    fn test_pseudo_path_is_kept_verbatim() {
        let module = scan(0xe03_500).unwrap();
        assert_eq!(module.name, "[heap]");
        assert_eq!(module.base, 0xe03_000);
    }

    #[test]
    fn test_unmapped_address_and_malformed_lines() {
        // The garbage line is skipped, not treated as an error.
        assert_eq!(scan(0x1000), None);
        assert!(scan(0x35_b181_0000).is_some());
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/lib64/ld-2.15.so"), "ld-2.15.so");
        assert_eq!(basename("no-separator"), "no-separator");
        assert_eq!(basename("[vdso]"), "[vdso]");
    }

    #[test]
    fn test_resolves_own_text_segment() {
        let pc = image_at as usize;
        let module = image_at(pc).unwrap();
        assert!(!module.name.is_empty());
        assert!(module.base <= pc);
    }
}
