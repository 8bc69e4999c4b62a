use std::{fmt, io};

#[derive(Debug)]
pub enum Error {
    OpenProcess(io::Error),
    ProcessNotFound(String),
    QueryMaps(io::Error),
    ReadMemory(io::Error),
    InvalidTarget(String),
    InvalidChain(String),
    Io(io::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OpenProcess(err) => write!(f, "open process: {err}"),
            Error::ProcessNotFound(name) => write!(f, "process not found: {name}"),
            Error::QueryMaps(err) => write!(f, "query memory mappings: {err}"),
            Error::ReadMemory(err) => write!(f, "read memory: {err}"),
            Error::InvalidTarget(addr) => write!(f, "invalid target address: {addr}"),
            Error::InvalidChain(chain) => write!(f, "invalid pointer chain: {chain}"),
            Error::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
