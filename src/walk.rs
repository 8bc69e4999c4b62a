use crate::{
    consts::{Address, POINTER_SIZE},
    error::{Error, Result},
    proc::VirtualMemoryRead,
    region::RegionMap,
};

/// Split a `scan` output line into region display name, static offset and
/// per-hop deltas.
pub fn parse_chain(input: &str) -> Result<(&str, Address, Vec<Address>)> {
    let invalid = || Error::InvalidChain(input.to_string());
    let (name, rest) = input.split_once(":+").ok_or_else(invalid)?;
    let mut parts = rest.split("->");
    let offset = parse_hex(parts.next().ok_or_else(invalid)?).ok_or_else(invalid)?;
    let deltas = parts
        .map(|p| parse_hex(p).ok_or_else(invalid))
        .collect::<Result<Vec<_>>>()?;
    if name.is_empty() || deltas.is_empty() {
        return Err(invalid());
    }
    Ok((name, offset, deltas))
}

#[inline]
fn parse_hex(value: &str) -> Option<Address> {
    Address::from_str_radix(value.strip_prefix("0x").unwrap_or(value), 16).ok()
}

/// Re-resolve an emitted chain against the live process: dereference once
/// per hop, adding each delta; the final delta lands on the target address.
pub fn walk_chain<P: VirtualMemoryRead>(
    proc: &P,
    regions: &RegionMap,
    input: &str,
) -> Result<Address> {
    let (name, offset, deltas) = parse_chain(input)?;
    let region = regions
        .find_region(name)
        .ok_or_else(|| Error::InvalidChain(format!("module not found: {name}")))?;

    let mut addr = region.start + offset;
    println!("{name}+{offset:#x} = {addr:#x}");

    let mut buf = [0; POINTER_SIZE];
    for delta in deltas {
        proc.read_exact_at(&mut buf, addr)?;
        addr = Address::from_le_bytes(buf)
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidChain(format!("overflow at +{delta:#x}")))?;
        println!("-> +{delta:#x} = {addr:#x}");
    }

    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{consts::PAGE_SIZE, proc::testing::SparseMemory};

    #[test]
    fn test_parse_chain() {
        let (name, offset, deltas) = parse_chain("libgame.so[0]:+0x10->0x0->0x8").unwrap();
        assert_eq!(name, "libgame.so[0]");
        assert_eq!(offset, 0x10);
        assert_eq!(deltas, [0, 8]);

        let (name, _, _) = parse_chain("libgame.so[1]:bss:+0x20->0x4").unwrap();
        assert_eq!(name, "libgame.so[1]:bss");

        assert!(parse_chain("libgame.so[0]").is_err());
        assert!(parse_chain("libgame.so[0]:+0x10").is_err());
        assert!(parse_chain(":+0x10->0x0").is_err());
        assert!(parse_chain("libgame.so[0]:+zz->0x0").is_err());
    }

    #[test]
    fn test_walk_chain() {
        let regions = RegionMap::parse(
            "5000000000-5000001000 rw-p 00000000 fe:01 11 /data/app/demo/libgame.so\n",
        );
        let mut mem = SparseMemory::new()
            .segment(0x50_0000_0000, PAGE_SIZE)
            .segment(0x51_0000_0000, PAGE_SIZE);
        mem.put_word(0x50_0000_0010, 0x51_0000_0100);
        mem.put_word(0x51_0000_0100, 0x51_0000_01F8);

        let target =
            walk_chain(&mem, &regions, "libgame.so[0]:+0x10->0x0->0x8").unwrap();
        assert_eq!(target, 0x51_0000_0200);
    }

    #[test]
    fn test_walk_unknown_module() {
        let regions = RegionMap::parse("");
        let mem = SparseMemory::new();
        assert!(matches!(
            walk_chain(&mem, &regions, "libnope.so[0]:+0x0->0x0"),
            Err(Error::InvalidChain(_))
        ));
    }
}
