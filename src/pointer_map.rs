use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::{
    consts::{Address, PAGE_SIZE, POINTER_SIZE, TAGGED, TAG_BITS, TAG_STRIP},
    pool::WorkerPool,
    proc::VirtualMemoryRead,
    region::RegionMap,
};

/// One machine word whose bit pattern plausibly is a user-space address.
/// `module` indexes the region map's static set when the storage location is
/// itself static.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerRecord {
    pub addr: Address,
    pub value: Address,
    pub module: Option<u32>,
}

/// Strip the arm64 top-byte tag, then require the value to sit in the
/// user-space window and be 4-byte aligned.
#[inline]
pub fn plausible(value: Address, (min, max): (Address, Address)) -> Option<Address> {
    let value = if value & TAG_BITS == TAGGED { value & TAG_STRIP } else { value };
    (value >= min && value <= max && value % 4 == 0).then_some(value)
}

/// All plausible pointers of the target process, sorted ascending by value.
/// Built in one pass over the scannable regions; queried only by binary
/// search over `value`.
pub struct PointerMap {
    entries: Vec<PointerRecord>,
}

impl PointerMap {
    pub fn create<P>(
        proc: &Arc<P>,
        regions: &Arc<RegionMap>,
        pool: &WorkerPool,
        bounds: (Address, Address),
    ) -> Self
    where
        P: VirtualMemoryRead + Send + Sync + 'static,
    {
        let out = Arc::new(Mutex::new(Vec::new()));

        for region in regions.scannable_regions() {
            let (start, end) = (region.start, region.end);
            let proc = proc.clone();
            let regions = regions.clone();
            let out = out.clone();
            pool.submit(move || {
                let mut records = scan_region(&*proc, &regions, start, end, bounds);
                out.lock().unwrap().append(&mut records);
            });
        }
        pool.wait();

        let mut entries = match Arc::try_unwrap(out) {
            Ok(mutex) => mutex.into_inner().unwrap(),
            Err(_) => Vec::new(),
        };
        entries.sort_unstable_by_key(|r| r.value);
        info!("indexed {} pointers", entries.len());

        Self { entries }
    }

    pub fn from_entries(mut entries: Vec<PointerRecord>) -> Self {
        entries.sort_unstable_by_key(|r| r.value);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> &[PointerRecord] {
        &self.entries
    }

    /// Every record whose value lies in `[addr - window, addr]`.
    pub fn parents_of(&self, addr: Address, window: Address) -> &[PointerRecord] {
        let min = addr.saturating_sub(window);
        let lo = self.entries.partition_point(|r| r.value < min);
        let hi = self.entries.partition_point(|r| r.value <= addr);
        &self.entries[lo..hi]
    }
}

/// Walk one region in page-sized batches at 8-byte strides. Unreadable pages
/// are skipped, not errors.
fn scan_region<P: VirtualMemoryRead>(
    proc: &P,
    regions: &RegionMap,
    start: Address,
    end: Address,
    bounds: (Address, Address),
) -> Vec<PointerRecord> {
    let mut records = Vec::new();
    let mut buf = [0_u8; PAGE_SIZE];
    let mut skipped = 0_usize;

    let mut addr = start;
    while addr < end {
        let next = (addr / PAGE_SIZE as Address + 1) * PAGE_SIZE as Address;
        let batch = (next.min(end) - addr) as usize;

        if proc.read_exact_at(&mut buf[..batch], addr).is_err() {
            skipped += 1;
            addr += batch as Address;
            continue;
        }

        if batch >= POINTER_SIZE {
            for off in (0..=batch - POINTER_SIZE).step_by(POINTER_SIZE) {
                let word = Address::from_le_bytes(buf[off..off + POINTER_SIZE].try_into().unwrap());
                let Some(value) = plausible(word, bounds) else {
                    continue;
                };
                let storage = addr + off as Address;
                records.push(PointerRecord {
                    addr: storage,
                    value,
                    module: regions.static_containing(storage),
                });
            }
        }
        addr += batch as Address;
    }

    if skipped > 0 {
        warn!("region {start:#x}-{end:#x}: skipped {skipped} unreadable pages");
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consts::{DEFAULT_PTR_MAX, DEFAULT_PTR_MIN},
        proc::testing::SparseMemory,
    };

    const BOUNDS: (Address, Address) = (DEFAULT_PTR_MIN, DEFAULT_PTR_MAX);

    const MAPS: &str = "\
5000000000-5000001000 rw-p 00000000 fe:01 11 /data/app/demo/libgame.so
5100000000-5100001000 rw-p 00000000 00:00 0
";

    fn fixture() -> (Arc<SparseMemory>, Arc<RegionMap>) {
        let mut mem = SparseMemory::new()
            .segment(0x50_0000_0000, PAGE_SIZE)
            .segment(0x51_0000_0000, PAGE_SIZE);
        // static libgame.so[0]+0x10 -> anonymous word -> dangling value
        mem.put_word(0x50_0000_0010, 0x51_0000_0100);
        mem.put_word(0x51_0000_0100, 0x51_0000_0200);
        // tagged value, stripped form in bounds
        mem.put_word(0x51_0000_0108, 0xB400_0051_0000_0300);
        // out of window / misaligned values never indexed
        mem.put_word(0x51_0000_0110, 0x1000);
        mem.put_word(0x51_0000_0118, 0x51_0000_0201);
        (Arc::new(mem), Arc::new(RegionMap::parse(MAPS)))
    }

    #[test]
    fn test_plausible_window_and_alignment() {
        assert_eq!(plausible(0x50_0000_0000, BOUNDS), Some(0x50_0000_0000));
        assert_eq!(plausible(DEFAULT_PTR_MIN, BOUNDS), Some(DEFAULT_PTR_MIN));
        assert_eq!(plausible(DEFAULT_PTR_MIN - 4, BOUNDS), None);
        assert_eq!(plausible(DEFAULT_PTR_MAX + 1, BOUNDS), None);
        assert_eq!(plausible(0x50_0000_0002, BOUNDS), None);
        assert_eq!(plausible(0, BOUNDS), None);
    }

    #[test]
    fn test_plausible_strips_tag() {
        assert_eq!(plausible(0xB400_0050_0000_0000, BOUNDS), Some(0x50_0000_0000));
        // other high-bit patterns stay as-is and fail the window
        assert_eq!(plausible(0xB500_0050_0000_0000, BOUNDS), None);
    }

    #[test]
    fn test_create_index() {
        let (mem, regions) = fixture();
        let pool = WorkerPool::new(2);
        let map = PointerMap::create(&mem, &regions, &pool, BOUNDS);

        let mut records = map.records().to_vec();
        records.sort_unstable_by_key(|r| r.addr);
        assert_eq!(
            records,
            [
                PointerRecord { addr: 0x50_0000_0010, value: 0x51_0000_0100, module: Some(0) },
                PointerRecord { addr: 0x51_0000_0100, value: 0x51_0000_0200, module: None },
                PointerRecord { addr: 0x51_0000_0108, value: 0x51_0000_0300, module: None },
            ]
        );

        // sorted by value, storage aligned, inside a scannable region
        assert!(map.records().windows(2).all(|w| w[0].value <= w[1].value));
        assert!(map.records().iter().all(|r| r.addr % 8 == 0));
    }

    #[test]
    fn test_parents_of_window() {
        let (mem, regions) = fixture();
        let pool = WorkerPool::new(1);
        let map = PointerMap::create(&mem, &regions, &pool, BOUNDS);

        let hits = map.parents_of(0x51_0000_0100, 16);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].addr, 0x50_0000_0010);

        // window is inclusive on both ends
        assert_eq!(map.parents_of(0x51_0000_0110, 16).len(), 1);
        assert_eq!(map.parents_of(0x51_0000_0111, 16).len(), 0);
        assert_eq!(map.parents_of(0x51_0000_00F0, 16).len(), 0);
    }

    #[test]
    fn test_unreadable_region_skipped() {
        let mem = Arc::new(SparseMemory::new().segment(0x51_0000_0000, PAGE_SIZE));
        // the maps advertise a second region the fake cannot serve
        let regions = Arc::new(RegionMap::parse(
            "5100000000-5100001000 rw-p 00000000 00:00 0 \n\
             5200000000-5200001000 rw-p 00000000 00:00 0 \n",
        ));
        let pool = WorkerPool::new(2);
        let map = PointerMap::create(&mem, &regions, &pool, BOUNDS);
        assert!(map.is_empty());
    }
}
