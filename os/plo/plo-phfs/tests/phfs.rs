use plo_info::attributes::MapAttributes;
use plo_memory::PhysicalAddress;
use plo_phfs::phoenixd::{self, FrameDecoder, encode_frame};
use plo_phfs::ram::RamStorage;
use plo_phfs::{Device, DeviceManager, Major, Mapping, Phfs, PhfsError, Protocol, Window};
use std::collections::VecDeque;

const FLASH_BASE: u64 = 0x6000_0000;

fn attrs(s: &str) -> MapAttributes {
    MapAttributes::parse_letters(s).unwrap()
}

fn flash_bytes() -> Vec<u8> {
    (0..0x2000u32).map(|i| (i % 251) as u8).collect()
}

/// A `phoenixd` host answering requests from an in-memory file table.
struct FakeDaemon {
    files: Vec<(String, Vec<u8>)>,
    open: Vec<usize>,
    decoder: FrameDecoder,
    rx: VecDeque<u8>,
    silent: bool,
}

impl FakeDaemon {
    fn new(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(n, d)| ((*n).to_string(), d.to_vec()))
                .collect(),
            open: Vec::new(),
            decoder: FrameDecoder::new(),
            rx: VecDeque::new(),
            silent: false,
        }
    }

    fn answer(&mut self, msg_type: u16, data: &[u8]) -> Vec<u8> {
        let u32_at = |off: usize| u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        match msg_type {
            phoenixd::MSG_OPEN => {
                let name = std::str::from_utf8(&data[4..data.len() - 1]).unwrap();
                match self.files.iter().position(|(n, _)| n == name) {
                    Some(idx) => {
                        self.open.push(idx);
                        ((self.open.len() - 1) as i32).to_le_bytes().to_vec()
                    }
                    None => (-2i32).to_le_bytes().to_vec(),
                }
            }
            phoenixd::MSG_READ => {
                let (fd, pos, len) = (u32_at(0), u32_at(4) as usize, u32_at(8) as usize);
                let file = &self.files[self.open[fd as usize]].1;
                let chunk = &file[pos.min(file.len())..(pos + len).min(file.len())];
                let mut resp = data[..8].to_vec();
                resp.extend_from_slice(&(chunk.len() as i32).to_le_bytes());
                resp.extend_from_slice(chunk);
                resp
            }
            phoenixd::MSG_FSTAT => {
                let fd = u32_at(0);
                let size = self.files[self.open[fd as usize]].1.len() as u32;
                let mut resp = 0i32.to_le_bytes().to_vec();
                resp.extend_from_slice(&size.to_le_bytes());
                resp
            }
            phoenixd::MSG_CLOSE => 0i32.to_le_bytes().to_vec(),
            _ => (-1i32).to_le_bytes().to_vec(),
        }
    }
}

impl Device for FakeDaemon {
    fn init(&mut self, _minor: u32) -> Result<(), PhfsError> {
        Ok(())
    }

    fn done(&mut self, _minor: u32) -> Result<(), PhfsError> {
        Ok(())
    }

    fn read(&mut self, _minor: u32, _offs: u64, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, PhfsError> {
        let n = buf.len().min(self.rx.len());
        for b in &mut buf[..n] {
            *b = self.rx.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, _minor: u32, _offs: u64, buf: &[u8]) -> Result<usize, PhfsError> {
        for &b in buf {
            if let Some(msg) = self.decoder.push(b) {
                if self.silent {
                    continue;
                }
                let resp = self.answer(msg.msg_type, &msg.data);
                self.rx.extend(encode_frame(msg.msg_type, &resp).unwrap());
            }
        }
        Ok(buf.len())
    }

    fn sync(&mut self, _minor: u32) -> Result<(), PhfsError> {
        Ok(())
    }
}

/// A device whose sync always fails.
struct FailingSync;

impl Device for FailingSync {
    fn init(&mut self, _minor: u32) -> Result<(), PhfsError> {
        Ok(())
    }

    fn done(&mut self, _minor: u32) -> Result<(), PhfsError> {
        Ok(())
    }

    fn read(&mut self, _minor: u32, _offs: u64, _buf: &mut [u8], _timeout_ms: u32) -> Result<usize, PhfsError> {
        Ok(0)
    }

    fn write(&mut self, _minor: u32, _offs: u64, buf: &[u8]) -> Result<usize, PhfsError> {
        Ok(buf.len())
    }

    fn sync(&mut self, _minor: u32) -> Result<(), PhfsError> {
        Err(PhfsError::Io)
    }
}

fn phfs() -> Phfs {
    let mut devs = DeviceManager::new();
    devs.register(
        Major::Storage,
        1,
        Box::new(RamStorage::new().with_region(
            PhysicalAddress::new(FLASH_BASE),
            attrs("rx"),
            flash_bytes(),
        )),
    )
    .unwrap();
    devs.register(
        Major::Uart,
        1,
        Box::new(FakeDaemon::new(&[("kernel.elf", &[7u8; 3000]), ("tiny", b"hello")])),
    )
    .unwrap();
    devs.register(Major::Tty, 1, Box::new(FailingSync)).unwrap();
    assert_eq!(devs.init_all(), 3);

    let mut phfs = Phfs::new(devs);
    phfs.reg_dev("flash0", Major::Storage, 0, Protocol::Raw).unwrap();
    phfs.reg_dev("uart", Major::Uart, 0, Protocol::Phoenixd).unwrap();
    phfs.reg_dev("tty", Major::Tty, 0, Protocol::Raw).unwrap();
    phfs
}

#[test]
fn reg_dev_rejects_duplicates_and_unprobed_devices() {
    let mut phfs = phfs();
    assert_eq!(
        phfs.reg_dev("flash0", Major::Storage, 0, Protocol::Raw),
        Err(PhfsError::AliasTaken)
    );
    assert_eq!(
        phfs.reg_dev("flash1", Major::Storage, 1, Protocol::Raw),
        Err(PhfsError::NoDevice {
            major: Major::Storage,
            minor: 1
        })
    );
    assert!(matches!(
        phfs.reg_dev("nand", Major::NandData, 0, Protocol::Raw),
        Err(e) if e.code() == plo_info::errno::ERR_ARG
    ));
}

#[test]
fn reg_dev_fails_when_registry_is_full() {
    let mut phfs = phfs();
    for i in 3..plo_info::config::MAX_DEVICES {
        phfs.reg_dev(&format!("alias{i}"), Major::Storage, 0, Protocol::Raw)
            .unwrap();
    }
    assert_eq!(
        phfs.reg_dev("onemore", Major::Storage, 0, Protocol::Raw),
        Err(PhfsError::RegistryFull)
    );
}

#[test]
fn file_alias_round_trip_and_clamp() {
    let mut phfs = phfs();
    phfs.reg_file("app", 0x100, 0x40).unwrap();
    let expected = flash_bytes();

    let h = phfs.open("flash0", Some("app"), 0).unwrap();
    let mut buf = [0u8; 0x10];
    assert_eq!(phfs.read(&h, 0x8, &mut buf).unwrap(), 0x10);
    assert_eq!(&buf, &expected[0x108..0x118]);

    let mut big = [0u8; 0x100];
    assert_eq!(phfs.read(&h, 0x30, &mut big).unwrap(), 0x10);
    assert_eq!(&big[..0x10], &expected[0x130..0x140]);
    assert_eq!(phfs.read(&h, 0x40, &mut big).unwrap(), 0);
    assert_eq!(phfs.stat(&h), Ok(0x40));
    phfs.close(h).unwrap();
}

#[test]
fn raw_device_passes_offsets_through() {
    let mut phfs = phfs();
    let h = phfs.open("flash0", None, 0).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(phfs.read(&h, 0x1000, &mut buf).unwrap(), 4);
    assert_eq!(&buf, &flash_bytes()[0x1000..0x1004]);
    assert_eq!(phfs.stat(&h), Err(PhfsError::Unsupported));
    phfs.close(h).unwrap();
}

#[test]
fn unknown_alias_and_file_are_errors() {
    let mut phfs = phfs();
    assert_eq!(phfs.open("nope", None, 0), Err(PhfsError::UnknownAlias));
    assert_eq!(phfs.open("flash0", Some("nope"), 0), Err(PhfsError::UnknownFile));
    assert_eq!(phfs.open_count(), 0);
}

#[test]
fn handles_are_exhausted_and_stale_handles_rejected() {
    let mut phfs = phfs();
    let mut open = Vec::new();
    for _ in 0..plo_info::config::PHFS_HANDLERS {
        open.push(phfs.open("flash0", None, 0).unwrap());
    }
    assert_eq!(phfs.open("flash0", None, 0), Err(PhfsError::HandlesExhausted));

    let first = open.remove(0);
    let stale = phfs.open_window("flash0", Window { addr: 0, size: 1 });
    assert_eq!(stale, Err(PhfsError::HandlesExhausted));
    phfs.close(first).unwrap();

    // The freed slot is reused with a new generation.
    let reused = phfs.open("flash0", None, 0).unwrap();
    let mut buf = [0u8; 1];
    assert!(phfs.read(&reused, 0, &mut buf).is_ok());
    for h in open {
        phfs.close(h).unwrap();
    }
    phfs.close(reused).unwrap();
    assert_eq!(phfs.open_count(), 0);
}

#[test]
fn each_open_yields_an_independent_handle() {
    let mut phfs = phfs();
    phfs.reg_file("a", 0, 0x10).unwrap();
    phfs.reg_file("b", 0x10, 0x10).unwrap();
    let a = phfs.open("flash0", Some("a"), 0).unwrap();
    let b = phfs.open("flash0", Some("b"), 0).unwrap();
    assert_ne!(a, b);

    let mut buf = [0u8; 1];
    phfs.read(&b, 0, &mut buf).unwrap();
    assert_eq!(buf[0], 0x10);
    phfs.close(a).unwrap();
    phfs.read(&b, 1, &mut buf).unwrap();
    assert_eq!(buf[0], 0x11);
    phfs.close(b).unwrap();
}

#[test]
fn session_closes_on_drop() {
    let mut phfs = phfs();
    {
        let mut s = phfs.session("flash0", None, 0).unwrap();
        let mut buf = [0u8; 2];
        s.read_exact(0, &mut buf).unwrap();
        assert!(s.is_open());
    }
    assert_eq!(phfs.open_count(), 0);
}

#[test]
fn close_reports_sync_failure_but_releases_handle() {
    let mut phfs = phfs();
    let h = phfs.open("tty", None, 0).unwrap();
    assert_eq!(phfs.close(h), Err(PhfsError::Io));
    assert_eq!(phfs.open_count(), 0);
}

#[test]
fn map_reports_in_place_window() {
    let mut phfs = phfs();
    phfs.reg_file("xip", 0x400, 0x200).unwrap();
    let h = phfs.open("flash0", Some("xip"), 0).unwrap();

    let m = phfs
        .map(&h, 0, 0x200, attrs("rx"), PhysicalAddress::new(FLASH_BASE), 0x2000, attrs("rx"))
        .unwrap();
    assert_eq!(m, Mapping::Mappable(PhysicalAddress::new(FLASH_BASE + 0x400)));

    let m = phfs
        .map(&h, 0, 0x200, attrs("rx"), PhysicalAddress::new(0x8000_0000), 0x1000, attrs("rwx"))
        .unwrap();
    assert_eq!(m, Mapping::NotMappable);

    assert_eq!(
        phfs.map(&h, 0, 0x200, attrs("rw"), PhysicalAddress::new(FLASH_BASE), 0x2000, attrs("rwx")),
        Err(PhfsError::IncompatibleMode)
    );
    phfs.close(h).unwrap();
}

#[test]
fn phoenixd_open_read_stat_close() {
    let mut phfs = phfs();
    let h = phfs.open("uart", Some("kernel.elf"), 0).unwrap();
    assert_eq!(phfs.stat(&h), Ok(3000));

    let mut buf = vec![0u8; 4000];
    assert_eq!(phfs.read(&h, 0, &mut buf).unwrap(), 3000);
    assert!(buf[..3000].iter().all(|&b| b == 7));
    let m = phfs
        .map(&h, 0, 16, attrs("r"), PhysicalAddress::new(0), 0x1000, attrs("r"))
        .unwrap();
    assert_eq!(m, Mapping::NotMappable);
    phfs.close(h).unwrap();
}

#[test]
fn phoenixd_missing_file_is_io_error() {
    let mut phfs = phfs();
    let err = phfs.open("uart", Some("missing"), 0).unwrap_err();
    assert_eq!(err, PhfsError::Io);
    assert_eq!(err.code(), plo_info::errno::ERR_PHFS_IO);
}

#[test]
fn erase_is_clamped_to_file() {
    let mut phfs = phfs();
    phfs.reg_file("cfg", 0x10, 0x8).unwrap();
    let h = phfs.open("flash0", Some("cfg"), 0).unwrap();
    assert_eq!(phfs.erase(&h, 4, 100, 0), Ok(4));
    let mut buf = [0u8; 8];
    phfs.read(&h, 0, &mut buf).unwrap();
    assert_eq!(&buf[4..], &[0xff; 4]);
    assert_ne!(buf[0], 0xff);
    phfs.close(h).unwrap();
}

#[test]
fn show_lists_aliases() {
    let mut phfs = phfs();
    phfs.reg_file("app", 0x100, 0x40).unwrap();
    let mut out = String::new();
    phfs.show_devices(&mut out).unwrap();
    assert!(out.contains("flash0"));
    assert!(out.contains("phoenixd"));
    out.clear();
    phfs.show_files(&mut out).unwrap();
    assert!(out.contains("0x00000100"));
}
