use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use plo::{BootContext, CmdExit, Hal};
use plo_elf::PFlags;
use plo_elf::builder::{ImageBuilder, Seg};
use plo_info::attributes::MapAttributes;
use plo_info::syspage::Region;
use plo_info::syspage::view::SyspageView;
use plo_memory::{PhysicalAddress, PhysicalMemory, WindowMemory};
use plo_phfs::ram::RamStorage;
use plo_phfs::{DeviceManager, Major};
use plo_secure::{HashAlgorithm, ecc_pub_key, ecdsa_sign, hash_digest};
use plo_syspage::Entry;
use std::fmt;

const FLASH: u64 = 0x6000_0000;
const KERNEL_FLASH: u64 = 0x6800_0000;
const DDR: u64 = 0x4000_0000;
const SYSPAGE: u64 = 0x4100_0000;
const ENTRY: u32 = 0x8000_0100;
const SIGNING_KEY: [u8; 32] = [0x11; 32];
const OTHER_KEY: [u8; 32] = [0x22; 32];

const SETUP: &str = "
    # maps first, then devices and files
    map ddr 0x40000000 0x40020000 rwx
    map flash 0x60000000 0x60100000 rx
    phfs flash0 2.0
    phfs kern 2.1
    file psh 0x0 0x1800
    file init 0x2000 0x800
";

fn pa(v: u64) -> PhysicalAddress {
    PhysicalAddress::new(v)
}

struct TestHal {
    console: String,
    memory: WindowMemory,
    footprint: Option<(PhysicalAddress, u64)>,
    launched: Option<(PhysicalAddress, PhysicalAddress)>,
}

impl Hal for TestHal {
    fn console(&mut self) -> &mut dyn fmt::Write {
        &mut self.console
    }

    fn memory(&mut self) -> &mut dyn PhysicalMemory {
        &mut self.memory
    }

    fn loader_footprint(&self) -> Option<(PhysicalAddress, u64)> {
        self.footprint
    }

    fn syspage_address(&self) -> Option<PhysicalAddress> {
        Some(pa(SYSPAGE))
    }

    fn launch(&mut self, entry: PhysicalAddress, syspage: PhysicalAddress) {
        self.launched = Some((entry, syspage));
    }
}

fn flash_bytes() -> Vec<u8> {
    (0..0x4000u32).map(|i| (i * 7 % 251) as u8).collect()
}

fn kernel_text() -> Vec<u8> {
    (0..0x1_0000u32).map(|i| (i % 253) as u8).collect()
}

fn kernel_image(signature: Option<&[u8]>) -> Vec<u8> {
    kernel_image_with(&kernel_text(), signature)
}

fn kernel_image_with(text: &[u8], signature: Option<&[u8]>) -> Vec<u8> {
    let mut builder = ImageBuilder::new(ENTRY)
        .segment(Seg::rx(0x8000_0000, text))
        .segment(Seg::rw(0x8001_0000, &[], 0))
        .bss(0x8001_0000, 0x4000);
    if let Some(sig) = signature {
        builder = builder.section(".signature", sig);
    }
    builder.build()
}

fn kernel_signature() -> Vec<u8> {
    let digest = hash_digest(HashAlgorithm::Sha256, &kernel_text());
    let (r, s) = ecdsa_sign(digest.as_bytes(), &SIGNING_KEY).unwrap();
    [r, s].concat()
}

fn signed_kernel() -> Vec<u8> {
    kernel_image(Some(&kernel_signature()))
}

fn public_key(private: &[u8; 32]) -> String {
    let (qx, qy) = ecc_pub_key(private).unwrap();
    STANDARD.encode([qx, qy].concat())
}

fn b64_digest(data: &[u8]) -> String {
    STANDARD.encode(hash_digest(HashAlgorithm::Sha256, data).as_bytes())
}

fn boot(kernel: Vec<u8>, footprint: Option<(u64, u64)>) -> BootContext<TestHal> {
    let rx = MapAttributes::parse_letters("rx").unwrap();
    let storage = RamStorage::new()
        .with_region(pa(FLASH), rx, flash_bytes())
        .with_region(pa(KERNEL_FLASH), rx, kernel);
    let mut devs = DeviceManager::new();
    devs.register(Major::Storage, storage.minors(), Box::new(storage))
        .unwrap();

    let hal = TestHal {
        console: String::new(),
        memory: WindowMemory::new()
            .with_window(DDR, 0x2_0000)
            .with_window(0x8000_0000, 0x1_4000)
            .with_window(SYSPAGE, 0x2000),
        footprint: footprint.map(|(start, size)| (pa(start), size)),
        launched: None,
    };
    let mut ctx = BootContext::new(hal, devs).unwrap();
    assert_eq!(ctx.run_script(SETUP), CmdExit::Success, "{}", ctx.hal.console);
    ctx
}

#[test]
fn app_is_copied_to_the_instruction_map() {
    let mut ctx = boot(kernel_image(None), None);
    assert_eq!(ctx.execute("app flash0 -x psh;-i ddr"), CmdExit::Success);

    let progs = ctx.syspage.programs();
    assert_eq!(progs.len(), 1);
    assert_eq!((progs[0].start, progs[0].end), (pa(DDR), pa(DDR + 0x1800)));
    assert!(progs[0].flags.exec());
    assert!(!progs[0].flags.no_copy());
    assert_eq!(ctx.hal.memory.bytes(DDR, 0x1800), &flash_bytes()[..0x1800]);
    assert_eq!(ctx.syspage.args(), b"\x01psh;-i ");
    assert_eq!(ctx.phfs.open_count(), 0);
}

#[test]
fn app_uses_the_default_device_and_inline_windows() {
    let mut ctx = boot(kernel_image(None), None);
    assert_eq!(ctx.execute("app psh ddr"), CmdExit::Success);
    assert_eq!(ctx.execute("app flash0 tool(0x3000:0x100) ddr ddr"), CmdExit::Success);

    let progs = ctx.syspage.programs();
    assert!(!progs[0].flags.exec());
    // The second image starts on the next page.
    assert_eq!(progs[1].start, pa(DDR + 0x2000));
    assert_eq!(ctx.hal.memory.bytes(DDR + 0x2000, 0x100), &flash_bytes()[0x3000..0x3100]);
    assert_eq!(ctx.syspage.args(), b"\x01psh tool ");
}

#[test]
fn copy_restarts_behind_a_reservation() {
    let mut ctx = boot(kernel_image(None), Some((DDR + 0x1000, 0x1000)));
    assert_eq!(ctx.execute("app flash0 psh ddr"), CmdExit::Success);

    let prog = &ctx.syspage.programs()[0];
    assert_eq!((prog.start, prog.end), (pa(DDR + 0x2000), pa(DDR + 0x3800)));
    assert_eq!(ctx.hal.memory.bytes(DDR + 0x2000, 0x1800), &flash_bytes()[..0x1800]);
    // The reserved page was never written.
    assert!(ctx.hal.memory.bytes(DDR + 0x1000, 0x1000).iter().all(|&b| b == 0));
}

#[test]
fn no_copy_secure_app_is_verified_in_place() {
    let mut ctx = boot(kernel_image(None), None);
    let digest = b64_digest(&flash_bytes()[0x2000..0x2800]);
    let writes = ctx.hal.memory.write_count();

    let line = format!("app-secure flash0 -xn init;-v flash flash sha256 {digest}");
    assert_eq!(ctx.execute(&line), CmdExit::Success, "{}", ctx.hal.console);

    assert_eq!(ctx.hal.memory.write_count(), writes);
    let prog = &ctx.syspage.programs()[0];
    assert_eq!((prog.start, prog.end), (pa(FLASH + 0x2000), pa(FLASH + 0x2800)));
    assert!(prog.flags.exec());
    assert!(prog.flags.no_copy());
    assert_eq!(ctx.syspage.map_top("ddr"), Ok(pa(DDR)));
}

#[test]
fn rejected_in_place_program_reserves_nothing() {
    let mut ctx = boot(kernel_image(None), None);
    let entries = ctx.syspage.entries().len();
    let argv = "a".repeat(300);
    let digest = b64_digest(&flash_bytes()[..0x1800]);

    for line in [
        format!("app flash0 psh;{argv} flash flash"),
        format!("app-secure flash0 -xn psh;{argv} flash flash sha256 {digest}"),
        format!("blob-secure flash0 psh;{argv} flash sha256 {digest}"),
    ] {
        assert_eq!(ctx.execute(&line), CmdExit::Failure, "{line}");
    }
    assert!(ctx.syspage.programs().is_empty());
    assert_eq!(ctx.syspage.entries().len(), entries);
    assert_eq!(ctx.phfs.open_count(), 0);
}

#[test]
fn secure_app_without_no_copy_is_copied_and_verified() {
    let mut ctx = boot(kernel_image(None), None);
    let digest = b64_digest(&flash_bytes()[0x2000..0x2800]);

    let line = format!("app-secure flash0 -x init ddr ddr sha256 {digest}");
    assert_eq!(ctx.execute(&line), CmdExit::Success, "{}", ctx.hal.console);

    let prog = &ctx.syspage.programs()[0];
    assert_eq!(prog.start, pa(DDR));
    assert!(!prog.flags.no_copy());
    assert_eq!(ctx.hal.memory.bytes(DDR, 0x800), &flash_bytes()[0x2000..0x2800]);
}

#[test]
fn digest_mismatch_registers_nothing() {
    let mut ctx = boot(kernel_image(None), None);
    let mut expected = hash_digest(HashAlgorithm::Sha256, &flash_bytes()[0x2000..0x2800])
        .as_bytes()
        .to_vec();
    expected[31] ^= 0x01;
    let digest = STANDARD.encode(&expected);

    for line in [
        format!("app-secure flash0 -x init ddr ddr sha256 {digest}"),
        format!("app-secure flash0 -xn init flash flash sha256 {digest}"),
        format!("blob-secure flash0 init ddr sha256 {digest}"),
        format!("blob-secure flash0 init flash sha256 {digest}"),
    ] {
        assert_eq!(ctx.execute(&line), CmdExit::Failure, "{line}");
    }
    assert!(ctx.syspage.programs().is_empty());
    assert!(ctx.hal.console.contains("(-22)"));
    assert_eq!(ctx.phfs.open_count(), 0);
}

#[test]
fn secure_arguments_are_checked_before_loading() {
    let mut ctx = boot(kernel_image(None), None);
    let writes = ctx.hal.memory.write_count();
    assert_eq!(ctx.execute("app-secure flash0 init ddr ddr md5 AAAA"), CmdExit::Failure);
    assert_eq!(ctx.execute("blob-secure flash0 init ddr sha256 AAAA"), CmdExit::Failure);
    assert_eq!(ctx.hal.memory.write_count(), writes);
}

#[test]
fn blobs_are_copied_or_verified_in_place() {
    let mut ctx = boot(kernel_image(None), None);
    assert_eq!(ctx.execute("blob flash0 init ddr"), CmdExit::Success);
    let digest = b64_digest(&flash_bytes()[..0x1800]);
    let line = format!("blob-secure flash0 psh flash sha256 {digest}");
    assert_eq!(ctx.execute(&line), CmdExit::Success, "{}", ctx.hal.console);

    let progs = ctx.syspage.programs();
    assert_eq!(progs[0].start, pa(DDR));
    assert!(!progs[0].flags.exec());
    assert_eq!(progs[1].start, pa(FLASH));
    assert!(progs[1].flags.no_copy());
}

#[test]
fn kernel_descriptor_reports_text_and_bss() {
    let mut ctx = boot(kernel_image(None), None);
    ctx.hal.memory.write(pa(0x8000_0000), &[0xa5; 0x1_4000]).unwrap();
    assert_eq!(ctx.execute("kernel kern"), CmdExit::Success, "{}", ctx.hal.console);
    assert!(ctx.kernel_loaded());

    let k = ctx.syspage.kernel();
    assert_eq!(k.text, Region::new(0x8000_0000, 0x1_0000));
    assert_eq!(k.bss, Region::new(0x8001_0000, 0x4000));
    assert_eq!(k.data, Region::new(0, 0));
    assert_eq!(k.entry, pa(u64::from(ENTRY)));

    assert_eq!(ctx.hal.memory.bytes(0x8000_0000, 0x1_0000), kernel_text().as_slice());
    // .bss is left for the kernel to clear.
    assert!(ctx.hal.memory.bytes(0x8001_0000, 0x4000).iter().all(|&b| b == 0xa5));
    assert!(
        ctx.syspage
            .entries()
            .contains(&Entry::new(pa(0x8000_0000), pa(0x8001_0000)))
    );
}

#[test]
fn bytes_past_the_file_size_are_not_touched() {
    let text = kernel_text();
    let rx = PFlags::new().with_read(true).with_execute(true);
    let image = ImageBuilder::new(ENTRY)
        .segment(Seg::new(0x8000_0000, &text[..0x8000], 0x1_0000, rx))
        .build();
    let mut ctx = boot(image, None);
    ctx.hal.memory.write(pa(0x8000_0000), &[0xa5; 0x1_4000]).unwrap();

    assert_eq!(ctx.execute("kernel kern"), CmdExit::Success, "{}", ctx.hal.console);
    assert_eq!(ctx.hal.memory.bytes(0x8000_0000, 0x8000), &text[..0x8000]);
    assert!(ctx.hal.memory.bytes(0x8000_8000, 0xc000).iter().all(|&b| b == 0xa5));
    assert_eq!(ctx.syspage.kernel().text, Region::new(0x8000_0000, 0x1_0000));
    assert!(
        ctx.syspage
            .entries()
            .contains(&Entry::new(pa(0x8000_0000), pa(0x8001_0000)))
    );
}

#[test]
fn signed_kernel_is_accepted() {
    let image = signed_kernel();
    let len = image.len();
    let mut ctx = boot(image, None);
    assert_eq!(ctx.execute(&format!("file kimage 0x0 {len:#x}")), CmdExit::Success);

    let line = format!("kernel-sec kern kimage secp256r1 sha256 {}", public_key(&SIGNING_KEY));
    assert_eq!(ctx.execute(&line), CmdExit::Success, "{}", ctx.hal.console);
    assert!(ctx.kernel_loaded());
    assert_eq!(ctx.syspage.kernel().text, Region::new(0x8000_0000, 0x1_0000));
}

#[test]
fn foreign_key_or_missing_signature_rejects_the_kernel() {
    for (image, key) in [
        (signed_kernel(), public_key(&OTHER_KEY)),
        (kernel_image(None), public_key(&SIGNING_KEY)),
    ] {
        let len = image.len();
        let mut ctx = boot(image, None);
        let entries = ctx.syspage.entries().len();
        assert_eq!(ctx.execute(&format!("file kimage 0x0 {len:#x}")), CmdExit::Success);

        let line = format!("kernel-sec kern kimage secp256r1 sha256 {key}");
        assert_eq!(ctx.execute(&line), CmdExit::Failure);
        assert!(!ctx.kernel_loaded());
        assert_eq!(ctx.syspage.kernel().entry, pa(0));
        assert_eq!(ctx.syspage.entries().len(), entries);
        assert!(ctx.hal.console.contains("(-22)"));
    }
}

#[test]
fn failed_kernel_sec_leaves_nothing_to_launch() {
    let good = signed_kernel();
    let evil = kernel_image_with(&[0xcc; 0x1_0000], Some(&kernel_signature()));
    let (good_len, evil_len) = (good.len(), evil.len());
    let mut storage = good;
    storage.resize(0x2_0000, 0);
    storage.extend_from_slice(&evil);

    let mut ctx = boot(storage, None);
    assert_eq!(ctx.execute(&format!("file good 0x0 {good_len:#x}")), CmdExit::Success);
    assert_eq!(ctx.execute(&format!("file evil 0x20000 {evil_len:#x}")), CmdExit::Success);

    let key = public_key(&SIGNING_KEY);
    let line = format!("kernel-sec kern good secp256r1 sha256 {key}");
    assert_eq!(ctx.execute(&line), CmdExit::Success, "{}", ctx.hal.console);
    assert!(ctx.kernel_loaded());

    let line = format!("kernel-sec kern evil secp256r1 sha256 {key}");
    assert_eq!(ctx.execute(&line), CmdExit::Failure);
    assert!(!ctx.kernel_loaded());
    assert_eq!(ctx.syspage.kernel().entry, pa(0));
    assert_eq!(ctx.syspage.kernel().text, Region::new(0, 0));

    assert_eq!(ctx.execute("go!"), CmdExit::Failure);
    assert!(ctx.hal.launched.is_none());
}

#[test]
fn go_saves_the_syspage_and_launches() {
    let mut ctx = boot(kernel_image(None), None);
    assert_eq!(ctx.execute("go!"), CmdExit::Failure);
    assert!(ctx.hal.launched.is_none());

    assert_eq!(ctx.execute("app flash0 -x psh ddr"), CmdExit::Success);
    assert_eq!(ctx.execute("kernel kern"), CmdExit::Success);
    assert_eq!(ctx.execute("go!"), CmdExit::Success, "{}", ctx.hal.console);
    assert_eq!(ctx.hal.launched, Some((pa(u64::from(ENTRY)), pa(SYSPAGE))));

    let view = SyspageView::parse(ctx.hal.memory.bytes(SYSPAGE, 0x2000)).unwrap();
    assert_eq!(view.kernel().text, Region::new(0x8000_0000, 0x1_0000));
    assert_eq!(view.programs().len(), 1);
    assert_eq!(view.maps().len(), 2);

    // Sealed after hand-off.
    assert_eq!(ctx.execute("map late 0x50000000 0x50001000 rw"), CmdExit::Failure);
}

#[test]
fn script_stops_at_first_failure() {
    let mut ctx = boot(kernel_image(None), None);
    let script = "map a 0x50000000 0x50001000 rw\nbogus\nmap b 0x50001000 0x50002000 rw";
    assert_eq!(ctx.run_script(script), CmdExit::Failure);
    assert!(ctx.syspage.maps().any(|m| m.name() == "a"));
    assert!(!ctx.syspage.maps().any(|m| m.name() == "b"));
    assert!(ctx.hal.console.contains("bogus: Unknown command (-1)"));
}

#[test]
fn map_prefix_names_and_bad_attributes_fail() {
    let mut ctx = boot(kernel_image(None), None);
    assert_eq!(ctx.execute("map ddr2 0x50000000 0x50001000 rw"), CmdExit::Failure);
    assert_eq!(ctx.execute("map sram 0x50000000 0x50001000 rq"), CmdExit::Failure);
    assert_eq!(ctx.execute("map sram 0x40010000 0x40030000 rw"), CmdExit::Failure);
    assert_eq!(ctx.syspage.maps().len(), 2);
}

#[test]
fn partitions_and_scheduler_windows() {
    let mut ctx = boot(kernel_image(None), None);
    assert_eq!(ctx.execute("part dom0 ddr ddr;flash"), CmdExit::Success);
    assert_eq!(ctx.execute("sched 100;50"), CmdExit::Success);
    assert_eq!(ctx.execute("part dom1 nope ddr"), CmdExit::Failure);

    let part = &ctx.syspage.partitions()[0];
    assert_eq!(part.access, vec![0, 1]);
    let windows = ctx.syspage.sched_windows();
    assert_eq!((windows[1].start, windows[1].stop), (100, 150));
}

#[test]
fn listings_and_help() {
    let mut ctx = boot(kernel_image(None), None);
    for line in ["phfs", "map", "syspage", "help"] {
        assert_eq!(ctx.execute(line), CmdExit::Success, "{line}");
    }
    let console = &ctx.hal.console;
    assert!(console.contains("flash0"));
    assert!(console.contains("psh"));
    assert!(console.contains("kernel-sec"));
    assert!(console.contains("syspage at 0x41000000"));
}
