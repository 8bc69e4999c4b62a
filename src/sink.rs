use std::{
    fmt::Write as _,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use crate::{
    consts::{Address, FLUSH_BATCH},
    pointer_chain::Chain,
    region::RegionMap,
};

/// `<region>:+0x<static offset>` followed by one `->0x<delta>` per hop,
/// anchor first.
pub fn format_chain(regions: &RegionMap, chain: &Chain) -> String {
    let region = regions.static_region(chain.module);
    let mut line = String::with_capacity(0x40);
    let _ = write!(line, "{}:+0x{:x}", region.name, chain.offset);
    for node in &chain.nodes[1..] {
        let _ = write!(line, "->0x{:x}", node.delta);
    }
    line
}

pub trait ChainSink {
    fn accept(&mut self, regions: &RegionMap, chain: Chain) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

/// Serializes chains to an append-only text stream, staging `FLUSH_BATCH`
/// lines per write burst.
pub struct FileSink<W: Write> {
    out: W,
    staged: Vec<String>,
}

impl FileSink<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, target: Address) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::with_capacity(0x100000, file), target)
    }
}

impl<W: Write> FileSink<W> {
    pub fn new(mut out: W, target: Address) -> io::Result<Self> {
        writeln!(out, "# pointer chains to {target:#x}")?;
        Ok(Self { out, staged: Vec::new() })
    }

    fn flush_staged(&mut self) -> io::Result<()> {
        for line in self.staged.drain(..) {
            self.out.write_all(line.as_bytes())?;
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl<W: Write> ChainSink for FileSink<W> {
    fn accept(&mut self, regions: &RegionMap, chain: Chain) -> io::Result<()> {
        self.staged.push(format_chain(regions, &chain));
        if self.staged.len() >= FLUSH_BATCH {
            self.flush_staged()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.flush_staged()?;
        self.out.flush()
    }
}

/// Accumulates owned chains for later inspection.
#[derive(Default)]
pub struct MemorySink {
    chains: Vec<Chain>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn into_chains(self) -> Vec<Chain> {
        self.chains
    }
}

impl ChainSink for MemorySink {
    fn accept(&mut self, _regions: &RegionMap, chain: Chain) -> io::Result<()> {
        self.chains.push(chain);
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}
