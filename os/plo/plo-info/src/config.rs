//! # Loader Configuration

/// Number of memory maps the syspage can describe.
pub const MAX_MAPS: usize = 16;

/// Number of global reservation entries.
pub const MAX_ENTRIES: usize = 32;

/// Number of device aliases that can be registered.
pub const MAX_DEVICES: usize = 8;

/// Number of file aliases (address windows on raw devices).
pub const MAX_FILES: usize = 16;

/// Number of PHFS handles that can be open at the same time.
pub const PHFS_HANDLERS: usize = 4;

/// Number of programs the syspage can describe.
pub const MAX_PROGRAMS: usize = 32;

/// Number of partitions.
pub const MAX_PARTITIONS: usize = 8;

/// Number of scheduler windows.
pub const MAX_SCHED_WINDOWS: usize = 8;

/// Number of instruction or data maps a single program may reference.
pub const MAX_PROG_MAPS: usize = 4;

/// Size of a map (and partition) name field including the terminating NUL.
pub const MAP_NAME_LEN: usize = 8;

/// Size of the per-program command line field including the terminating NUL.
pub const CMDLINE_LEN: usize = 16;

/// Maximum length of a device or file alias.
pub const ALIAS_LEN: usize = 16;

/// Size of the argument string blob.
pub const ARGS_LEN: usize = 256;

/// Alignment applied to a map's top before a new image is placed.
pub const PAGE_SIZE: u64 = 0x1000;

/// Bytes moved per PHFS read while loading images.
pub const LOAD_CHUNK_SIZE: usize = 0x400;

/// Largest phoenixd message payload.
pub const MSG_MAXLEN: usize = 0x400;

/// Largest ELF program or section header table the loader reads.
pub const ELF_TABLE_MAX: usize = 0x4000;

/// Largest section name string table the loader reads.
pub const ELF_STRTAB_MAX: usize = 0x1000;

/// Timeout handed to backends for a single read.
pub const DEFAULT_TIMEOUT_MS: u32 = 500;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(MAX_MAPS <= u8::MAX as usize);
    assert!(MAX_PROG_MAPS <= MAX_MAPS);
    assert!(CMDLINE_LEN > 1 && MAP_NAME_LEN > 1);
    assert!(LOAD_CHUNK_SIZE <= MSG_MAXLEN);
    assert!(MAX_SCHED_WINDOWS <= u8::MAX as usize);
};
