use std::{process::ExitCode, sync::Arc};

use log::info;
use ptrchain::{
    cmd::{CommandEnum, Commands, ScanCommand, WalkCommand},
    consts::{DEFAULT_PTR_MAX, DEFAULT_PTR_MIN},
    error::Result,
    pointer_chain::{ChainScanner, ScanOptions},
    pointer_map::PointerMap,
    pool::WorkerPool,
    proc::{Pid, Process},
    region::RegionMap,
    sink::FileSink,
    spinner::Spinner,
    walk::walk_chain,
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cmds: Commands = argh::from_env();
    let result = match cmds.nested {
        CommandEnum::Scan(args) => scan(args),
        CommandEnum::Walk(args) => walk(args),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn resolve_pid(process: &str) -> Result<Pid> {
    match process.parse() {
        Ok(pid) => Ok(pid),
        Err(_) => Process::find(process),
    }
}

fn scan(args: ScanCommand) -> Result<bool> {
    let pid = resolve_pid(&args.process)?;
    let proc = Arc::new(Process::attach(pid)?);
    let regions = Arc::new(RegionMap::load(pid)?);
    info!("bound to process {pid}, {} regions", regions.regions().len());

    let pool = WorkerPool::new(args.threads);

    let mut spinner = Spinner::start("indexing pointers...");
    let map = Arc::new(PointerMap::create(
        &proc,
        &regions,
        &pool,
        (DEFAULT_PTR_MIN, DEFAULT_PTR_MAX),
    ));
    spinner.stop(format!("indexed {} pointers.", map.len()));

    let sink = FileSink::create(&args.file, args.address)?;
    let options = ScanOptions { depth: args.depth, offset: args.offset, limit: args.limit };
    let scanner = ChainScanner::new(map, regions);

    let mut spinner = Spinner::start("searching chains...");
    let (found, _) = scanner.scan(args.address, options, &pool, sink)?;
    spinner.stop(format!("{found} chains -> {}", args.file.display()));

    Ok(found > 0)
}

fn walk(args: WalkCommand) -> Result<bool> {
    let pid = resolve_pid(&args.process)?;
    let proc = Process::attach(pid)?;
    let regions = RegionMap::load(pid)?;
    let target = walk_chain(&proc, &regions, &args.chain)?;
    println!("{target:#x}");
    Ok(true)
}
