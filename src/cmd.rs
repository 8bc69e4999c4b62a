use std::path::PathBuf;

use argh::FromArgs;

use crate::consts::Address;

fn parse_hex(value: &str) -> Result<Address, String> {
    Address::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|err| format!("invalid hex address: {err}"))
}

#[derive(FromArgs)]
#[argh(description = "Find pointer chains from static module memory to a target address.")]
pub struct Commands {
    #[argh(subcommand)]
    pub nested: CommandEnum,
}

#[derive(FromArgs)]
#[argh(subcommand)]
pub enum CommandEnum {
    Scan(ScanCommand),
    Walk(WalkCommand),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "scan", description = "Scan a process for pointer chains.")]
pub struct ScanCommand {
    #[argh(option, short = 'p', description = "target process pid or name substring")]
    pub process: String,

    #[argh(option, short = 'a', from_str_fn(parse_hex), description = "target address, hex without 0x")]
    pub address: Address,

    #[argh(option, short = 'd', default = "10", description = "maximum search depth")]
    pub depth: usize,

    #[argh(option, short = 'o', default = "500", description = "maximum offset per hop")]
    pub offset: Address,

    #[argh(option, short = 't', default = "4", description = "worker thread count")]
    pub threads: usize,

    #[argh(option, short = 'l', default = "0", description = "maximum emitted chains, 0 for unlimited")]
    pub limit: usize,

    #[argh(option, short = 'f', default = "PathBuf::from(\"pointer_chains.txt\")", description = "output file")]
    pub file: PathBuf,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "walk", description = "Re-resolve an emitted chain against the live process.")]
pub struct WalkCommand {
    #[argh(option, short = 'p', description = "target process pid or name substring")]
    pub process: String,

    #[argh(option, short = 'c', description = "chain line as produced by scan")]
    pub chain: String,
}
