use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use log::{info, warn};

use crate::{
    consts::Address,
    error::{Error, Result},
    pointer_map::PointerMap,
    pool::WorkerPool,
    region::RegionMap,
    sink::ChainSink,
};

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Maximum number of hops.
    pub depth: usize,
    /// Maximum offset per hop.
    pub offset: Address,
    /// Maximum emitted chains, 0 for unlimited.
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainNode {
    pub addr: Address,
    pub value: Address,
    /// Offset added to the previous node's value to reach `addr`.
    pub delta: Address,
}

/// An owned, self-contained chain from a static anchor down to the target.
/// The head is `static_region(module) + offset`; the tail node carries the
/// target address and a zero value sentinel.
#[derive(Debug, Clone)]
pub struct Chain {
    pub module: u32,
    pub offset: Address,
    pub nodes: Vec<ChainNode>,
}

/// One hop of the search, alive only for the recursion that owns it. `child`
/// points one level down toward the target, so a finished chain is read off
/// by walking `child` links from the anchor frame.
struct Frame<'a> {
    addr: Address,
    value: Address,
    delta: Address,
    module: Option<u32>,
    child: Option<&'a Frame<'a>>,
}

struct SearchCtx<S> {
    map: Arc<PointerMap>,
    regions: Arc<RegionMap>,
    target: Address,
    depth: usize,
    window: Address,
    limit: usize,
    found: AtomicUsize,
    stop: AtomicBool,
    sink: Mutex<S>,
}

pub struct ChainScanner {
    map: Arc<PointerMap>,
    regions: Arc<RegionMap>,
}

impl ChainScanner {
    pub fn new(map: Arc<PointerMap>, regions: Arc<RegionMap>) -> Self {
        Self { map, regions }
    }

    /// Emit every chain of at most `depth` hops ending at `target`. Returns
    /// the emitted count and hands the sink back.
    pub fn scan<S>(
        &self,
        target: Address,
        options: ScanOptions,
        pool: &WorkerPool,
        sink: S,
    ) -> Result<(usize, S)>
    where
        S: ChainSink + Send + 'static,
    {
        if target == 0 {
            return Err(Error::InvalidTarget(String::from("0")));
        }

        let roots = self.map.parents_of(target, options.offset).to_vec();
        info!("{} level-0 candidates for {target:#x}", roots.len());

        let ctx = Arc::new(SearchCtx {
            map: self.map.clone(),
            regions: self.regions.clone(),
            target,
            depth: options.depth,
            window: options.offset,
            limit: options.limit,
            found: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            sink: Mutex::new(sink),
        });

        for root in roots {
            if ctx.stop.load(Ordering::Relaxed) {
                break;
            }
            let ctx = ctx.clone();
            pool.submit(move || {
                let frame = Frame {
                    addr: root.addr,
                    value: root.value,
                    delta: ctx.target - root.value,
                    module: root.module,
                    child: None,
                };
                walk_up(&ctx, &frame, 1);
            });
        }
        pool.wait();

        let Ok(ctx) = Arc::try_unwrap(ctx) else {
            unreachable!("search tasks drained by pool.wait()");
        };
        let mut sink = ctx.sink.into_inner().unwrap();
        sink.finish()?;

        let found = ctx.found.load(Ordering::Relaxed);
        let emitted = if ctx.limit != 0 { found.min(ctx.limit) } else { found };
        info!("emitted {emitted} chains");
        Ok((emitted, sink))
    }
}

fn walk_up<S: ChainSink>(ctx: &SearchCtx<S>, frame: &Frame<'_>, depth: usize) {
    if ctx.stop.load(Ordering::Relaxed) {
        return;
    }

    // A static anchor closes the chain; never descend past it.
    if let Some(module) = frame.module {
        emit(ctx, frame, module);
        return;
    }

    if depth >= ctx.depth {
        return;
    }

    for parent in ctx.map.parents_of(frame.addr, ctx.window) {
        let next = Frame {
            addr: parent.addr,
            value: parent.value,
            delta: frame.addr - parent.value,
            module: parent.module,
            child: Some(frame),
        };
        walk_up(ctx, &next, depth + 1);
    }
}

fn emit<S: ChainSink>(ctx: &SearchCtx<S>, head: &Frame<'_>, module: u32) {
    if ctx.limit != 0 {
        // reserve a slot before formatting so the cap holds under concurrency
        let n = ctx.found.fetch_add(1, Ordering::Relaxed);
        if n >= ctx.limit {
            return;
        }
        if n + 1 == ctx.limit {
            ctx.stop.store(true, Ordering::Relaxed);
        }
    } else {
        ctx.found.fetch_add(1, Ordering::Relaxed);
    }

    let chain = materialize(ctx, head, module);
    let mut sink = ctx.sink.lock().unwrap();
    if let Err(err) = sink.accept(&ctx.regions, chain) {
        warn!("chain sink write failed: {err}");
    }
}

fn materialize<S>(ctx: &SearchCtx<S>, head: &Frame<'_>, module: u32) -> Chain {
    let offset = head.addr - ctx.regions.static_region(module).start;

    let mut nodes = Vec::with_capacity(ctx.depth + 1);
    nodes.push(ChainNode { addr: head.addr, value: head.value, delta: 0 });

    let mut delta = head.delta;
    let mut cursor = head.child;
    while let Some(frame) = cursor {
        nodes.push(ChainNode { addr: frame.addr, value: frame.value, delta });
        delta = frame.delta;
        cursor = frame.child;
    }
    nodes.push(ChainNode { addr: ctx.target, value: 0, delta });

    Chain { module, offset, nodes }
}
