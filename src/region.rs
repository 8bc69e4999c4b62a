use std::{collections::HashMap, fs, path::Path};

use crate::{
    consts::Address,
    error::{Error, Result},
    proc::Pid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Anonymous,
    CAlloc,
    CHeap,
    CData,
    CBss,
    CodeApp,
    CodeSystem,
    Stack,
    JavaHeap,
    Other,
    Unknown,
}

impl RegionKind {
    /// Regions excluded from the pointer scan view.
    const fn filterable(self) -> bool {
        matches!(
            self,
            RegionKind::Stack
                | RegionKind::JavaHeap
                | RegionKind::CodeSystem
                | RegionKind::CodeApp
                | RegionKind::Other
        )
    }
}

#[derive(Debug, Clone)]
pub struct Region {
    pub start: Address,
    pub end: Address,
    pub kind: RegionKind,
    pub name: String,
    pub filterable: bool,
    pub read: bool,
}

impl Region {
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// One parsed line of /proc/pid/maps. The pathname may contain spaces and
/// runs to end of line.
struct MapLine<'a> {
    start: Address,
    end: Address,
    perms: &'a str,
    name: &'a str,
}

struct MapIter<'a>(core::str::Lines<'a>);

impl<'a> Iterator for MapIter<'a> {
    type Item = MapLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.0.next()?;
            let Some(parsed) = parse_line(line) else {
                continue;
            };
            return Some(parsed);
        }
    }
}

fn parse_line(line: &str) -> Option<MapLine<'_>> {
    let mut split = line.splitn(6, ' ');
    let mut range = split.next()?.split('-');
    let start = Address::from_str_radix(range.next()?, 16).ok()?;
    let end = Address::from_str_radix(range.next()?, 16).ok()?;
    let perms = split.next()?;
    if perms.len() < 4 {
        return None;
    }
    let _offset = Address::from_str_radix(split.next()?, 16).ok()?;
    let _dev = split.next()?;
    let _inode: u64 = split.next()?.parse().ok()?;
    let name = split.next().map(str::trim_start).unwrap_or_default();
    Some(MapLine { start, end, perms, name })
}

fn classify(name: &str, is_read: bool, is_exec: bool) -> RegionKind {
    if name == "[heap]" {
        RegionKind::CHeap
    } else if name.contains("dalvik") && name.contains("art") {
        RegionKind::JavaHeap
    } else if name.contains("[stack]") || name.contains("[stack:") {
        RegionKind::Stack
    } else if name.contains("[anon:libc_malloc") || name.contains("[anon:scudo:") {
        RegionKind::CAlloc
    } else if name.starts_with("/data/app/") && name.ends_with(".so") && is_exec {
        RegionKind::CodeApp
    } else if name == "[anon:.bss]" {
        RegionKind::CBss
    } else if name.starts_with("/data/app/") && name.ends_with(".so") {
        RegionKind::CData
    } else if name.contains("/system/framework/") {
        RegionKind::CodeSystem
    } else if name.is_empty() && is_read {
        RegionKind::Anonymous
    } else if !name.is_empty() {
        RegionKind::Other
    } else {
        RegionKind::Unknown
    }
}

#[inline]
fn basename(name: &str) -> &str {
    Path::new(name).file_name().and_then(|s| s.to_str()).unwrap_or(name)
}

/// Immutable snapshot of the target's memory mappings, rebuilt wholesale on
/// every bind.
pub struct RegionMap {
    regions: Vec<Region>,
    statics: Vec<Region>,
}

impl RegionMap {
    pub fn load(pid: Pid) -> Result<Self> {
        let contents = fs::read_to_string(format!("/proc/{pid}/maps")).map_err(Error::QueryMaps)?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut regions: Vec<Region> = Vec::new();

        for MapLine { start, end, perms, name } in MapIter(contents.lines()) {
            let read = &perms[0..1] == "r";
            let exec = &perms[2..3] == "x";
            let kind = classify(name, read, exec);

            // Pathnames collapse to their basename plus an occurrence counter.
            let name = if name.starts_with('/') {
                let base = basename(name);
                let count = counts.entry(base.to_string()).or_insert(0);
                let display = format!("{base}[{count}]");
                *count += 1;
                display
            } else {
                name.to_string()
            };

            regions.push(Region {
                start,
                end,
                kind,
                name,
                filterable: kind.filterable(),
                read,
            });
        }

        // The trailing [anon:.bss] of a module inherits its neighbor's name
        // and joins the static set.
        let mut statics = Vec::new();
        for i in 0..regions.len() {
            match regions[i].kind {
                RegionKind::CodeApp | RegionKind::CData => statics.push(regions[i].clone()),
                RegionKind::CBss if i > 0 => {
                    let prev = &regions[i - 1];
                    if !matches!(prev.kind, RegionKind::CodeApp | RegionKind::CData) {
                        continue;
                    }
                    let inherited = prev
                        .name
                        .split('[')
                        .next()
                        .is_some_and(|s| s.ends_with(".so"))
                        .then(|| format!("{}:bss", prev.name));
                    if let Some(name) = inherited {
                        regions[i].name = name;
                    }
                    statics.push(regions[i].clone());
                }
                _ => {}
            }
        }

        Self { regions, statics }
    }

    /// Every readable region the pointer scan will walk.
    pub fn scannable_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions
            .iter()
            .filter(|r| r.read && !r.filterable && r.kind != RegionKind::Unknown)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn static_regions(&self) -> &[Region] {
        &self.statics
    }

    /// Index of the static region containing `addr`, if any.
    pub fn static_containing(&self, addr: Address) -> Option<u32> {
        let idx = self.statics.partition_point(|r| r.start <= addr);
        (idx > 0 && self.statics[idx - 1].contains(addr)).then(|| (idx - 1) as u32)
    }

    pub fn static_region(&self, idx: u32) -> &Region {
        &self.statics[idx as usize]
    }

    pub fn find_region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
const MAPS: &str = "\
5000000000-5000001000 r-xp 00000000 fe:01 101 /data/app/demo/lib/arm64/libgame.so
5000001000-5000002000 rw-p 00001000 fe:01 101 /data/app/demo/lib/arm64/libgame.so
5000002000-5000003000 rw-p 00000000 00:00 0 [anon:.bss]
5100000000-5100002000 rw-p 00000000 00:00 0
5200000000-5200001000 rw-p 00000000 00:00 0 [anon:libc_malloc]
5200001000-5200002000 rw-p 00000000 00:00 0 [anon:scudo:primary]
5300000000-5300001000 rw-p 00000000 00:00 0 [heap]
5400000000-5400001000 rw-p 00000000 00:00 0 [stack]
5500000000-5500001000 rw-p 00000000 00:00 0 [anon:dalvik-/apex/com.android.art/javalib]
5600000000-5600001000 r-xp 00000000 fe:01 77 /system/framework/arm64/boot.oat
5700000000-5700001000 r--p 00000000 fe:01 88 /system/fonts/Roboto.ttf
5800000000-5800001000 ---p 00000000 00:00 0
garbage line
5900000000-5900001000 rw-p 00000000 fe:01 101 /data/app/demo/lib/arm64/libgame.so
";

#[test]
fn test_classify_kinds() {
    let map = RegionMap::parse(MAPS);
    let kinds: Vec<_> = map.regions().iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        [
            RegionKind::CodeApp,
            RegionKind::CData,
            RegionKind::CBss,
            RegionKind::Anonymous,
            RegionKind::CAlloc,
            RegionKind::CAlloc,
            RegionKind::CHeap,
            RegionKind::Stack,
            RegionKind::JavaHeap,
            RegionKind::CodeSystem,
            RegionKind::Other,
            RegionKind::Unknown,
            RegionKind::CData,
        ]
    );
}

#[test]
fn test_display_names() {
    let map = RegionMap::parse(MAPS);
    let names: Vec<_> = map.regions().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names[0], "libgame.so[0]");
    assert_eq!(names[1], "libgame.so[1]");
    assert_eq!(names[2], "libgame.so[1]:bss");
    assert_eq!(names[9], "boot.oat[0]");
    assert_eq!(names[12], "libgame.so[2]");
    assert_eq!(names[3], "");
}

#[test]
fn test_static_set() {
    let map = RegionMap::parse(MAPS);
    let statics: Vec<_> = map.static_regions().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        statics,
        ["libgame.so[0]", "libgame.so[1]", "libgame.so[1]:bss", "libgame.so[2]"]
    );

    assert_eq!(map.static_containing(0x50_0000_1010), Some(1));
    assert_eq!(
        map.static_region(map.static_containing(0x50_0000_2008).unwrap()).name,
        "libgame.so[1]:bss"
    );
    assert_eq!(map.static_containing(0x51_0000_0000), None);
    assert_eq!(map.static_containing(0x50_0000_3000), None);
}

#[test]
fn test_scannable_view() {
    let map = RegionMap::parse(MAPS);
    let scannable: Vec<_> = map.scannable_regions().map(|r| r.kind).collect();
    assert!(!scannable.contains(&RegionKind::Unknown));
    assert!(!scannable.contains(&RegionKind::Stack));
    assert!(!scannable.contains(&RegionKind::JavaHeap));
    assert!(!scannable.contains(&RegionKind::CodeApp));
    assert!(!scannable.contains(&RegionKind::Other));
    assert!(scannable.contains(&RegionKind::Anonymous));
    assert!(scannable.contains(&RegionKind::CAlloc));
    assert!(scannable.contains(&RegionKind::CHeap));
    assert!(scannable.contains(&RegionKind::CData));
    assert!(scannable.contains(&RegionKind::CBss));
}

#[test]
fn test_bss_without_module_neighbor() {
    let map = RegionMap::parse(
        "6000000000-6000001000 rw-p 00000000 00:00 0 \n\
         6000001000-6000002000 rw-p 00000000 00:00 0 [anon:.bss]\n",
    );
    assert!(map.static_regions().is_empty());
    assert_eq!(map.regions()[1].name, "[anon:.bss]");
}

#[test]
fn test_load_self() {
    let map = RegionMap::load(std::process::id() as Pid).unwrap();
    assert!(!map.regions().is_empty());
}
