pub type Address = u64;

pub const PAGE_SIZE: usize = 0x1000;

pub const POINTER_SIZE: usize = core::mem::size_of::<Address>();

// arm64 top-byte tags (0xb4..) carry no address bits.
pub const TAG_BITS: Address = 0xFFFF_0000_0000_0000;
pub const TAGGED: Address = 0xB400_0000_0000_0000;
pub const TAG_STRIP: Address = 0x0000_FFFF_FFFF_FFFF;

/// Default user-space window for plausible pointer values.
pub const DEFAULT_PTR_MIN: Address = 0x45_0000_0000;
pub const DEFAULT_PTR_MAX: Address = 0x7F_FFFF_FFFF;

/// Chains staged in the file sink before a flush.
pub const FLUSH_BATCH: usize = 500;
