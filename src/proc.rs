use std::{
    fs::{self, File},
    io::Read,
    os::unix::fs::FileExt,
    path::Path,
};

use crate::{
    consts::{Address, PAGE_SIZE, POINTER_SIZE},
    error::{Error, Result},
};

pub type Pid = i32;

pub trait VirtualMemoryRead {
    /// Read exactly `buf.len()` bytes at `addr` in the target process.
    /// A short read is a failure; partial data is never exposed.
    fn read_exact_at(&self, buf: &mut [u8], addr: Address) -> Result<()>;
}

pub struct Process {
    pid: Pid,
    mem: File,
    pagemap: Option<File>,
}

impl Process {
    pub fn attach(pid: Pid) -> Result<Self> {
        if !Path::new(&format!("/proc/{pid}")).exists() {
            return Err(Error::ProcessNotFound(pid.to_string()));
        }
        let mem = File::open(format!("/proc/{pid}/mem")).map_err(Error::OpenProcess)?;
        let pagemap = File::open(format!("/proc/{pid}/pagemap")).ok();
        Ok(Self { pid, mem, pagemap })
    }

    /// Resolve an executable basename substring to a pid via /proc/*/cmdline.
    pub fn find(name: &str) -> Result<Pid> {
        for entry in fs::read_dir("/proc").map_err(Error::OpenProcess)? {
            let entry = entry.map_err(Error::OpenProcess)?;
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<Pid>() else {
                continue;
            };
            let Ok(mut file) = File::open(entry.path().join("cmdline")) else {
                continue;
            };
            let mut cmdline = Vec::with_capacity(0x100);
            if file.read_to_end(&mut cmdline).is_err() {
                continue;
            }
            let argv0 = cmdline.split(|&b| b == 0).next().unwrap_or_default();
            let basename = argv0.rsplit(|&b| b == b'/').next().unwrap_or_default();
            if !basename.is_empty() && String::from_utf8_lossy(basename).contains(name) {
                return Ok(pid);
            }
        }
        Err(Error::ProcessNotFound(name.to_string()))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Pagemap bit 63 per Documentation/vm/pagemap.txt. Reports `false` when
    /// the pagemap is unavailable.
    pub fn is_page_present(&self, addr: Address) -> bool {
        let Some(pagemap) = &self.pagemap else {
            return false;
        };
        let mut entry = [0; POINTER_SIZE];
        let offset = addr / PAGE_SIZE as Address * POINTER_SIZE as Address;
        match pagemap.read_exact_at(&mut entry, offset) {
            Ok(_) => u64::from_le_bytes(entry) >> 63 == 1,
            Err(_) => false,
        }
    }

    pub fn is_readable(&self, addr: Address, len: usize) -> bool {
        if len == 0 || !self.is_page_present(addr) {
            return false;
        }
        let last = addr + (len - 1) as Address;
        addr / PAGE_SIZE as Address == last / PAGE_SIZE as Address || self.is_page_present(last)
    }
}

impl VirtualMemoryRead for Process {
    fn read_exact_at(&self, buf: &mut [u8], addr: Address) -> Result<()> {
        let local = libc::iovec { iov_base: buf.as_mut_ptr().cast(), iov_len: buf.len() };
        let remote = libc::iovec { iov_base: addr as *mut libc::c_void, iov_len: buf.len() };
        let read = unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) };
        if read == buf.len() as isize {
            return Ok(());
        }
        self.mem.read_exact_at(buf, addr).map_err(Error::ReadMemory)
    }
}


#[test]
fn test_attach_self_and_read() {
    let this = std::process::id() as Pid;
    let proc = Process::attach(this).unwrap();
    assert_eq!(proc.pid(), this);

    let local: u64 = 0x1122_3344_5566_7788;
    let mut buf = [0; POINTER_SIZE];
    proc.read_exact_at(&mut buf, &local as *const u64 as Address).unwrap();
    assert_eq!(u64::from_le_bytes(buf), local);
}

#[test]
fn test_attach_missing_pid() {
    assert!(matches!(Process::attach(-1), Err(Error::ProcessNotFound(_))));
}
