use crate::Error;
use crate::hal::Hal;
use alloc::string::String;
use log::{info, warn};
use plo_info::syspage::Region;
use plo_memory::PhysicalAddress;
use plo_phfs::{DeviceManager, Phfs};
use plo_syspage::Syspage;

/// Everything one boot session owns: the board, the PHFS layer and the
/// syspage being assembled.
///
/// Fields are public so command handlers can borrow them independently
/// (a PHFS session and the syspage are routinely held at the same time).
pub struct BootContext<H> {
    pub hal: H,
    pub phfs: Phfs,
    pub syspage: Syspage,
    /// First registered device alias; `kernel` and `app` fall back to it.
    pub default_device: Option<String>,
    kernel_loaded: bool,
}

impl<H: Hal> BootContext<H> {
    /// Probe `devs`, reserve the loader's own footprint and apply the
    /// board's default syspage address.
    ///
    /// # Errors
    /// Fails if the footprint reservation or the syspage address is
    /// rejected.
    pub fn new(hal: H, mut devs: DeviceManager) -> Result<Self, Error> {
        let up = devs.init_all();
        info!("plo: {up} device instance(s) up");

        let mut syspage = Syspage::new();
        if let Some((start, size)) = hal.loader_footprint() {
            syspage.add_entries(start, size)?;
        }
        if let Some(addr) = hal.syspage_address() {
            syspage.set_address(addr)?;
        }

        Ok(Self {
            hal,
            phfs: Phfs::new(devs),
            syspage,
            default_device: None,
            kernel_loaded: false,
        })
    }

    /// `true` once `kernel` or `kernel-sec` succeeded.
    #[must_use]
    pub const fn kernel_loaded(&self) -> bool {
        self.kernel_loaded
    }

    pub(crate) const fn set_kernel_loaded(&mut self) {
        self.kernel_loaded = true;
    }

    /// Forget the current kernel before its memory is overwritten; a load
    /// that fails afterwards leaves nothing to launch.
    pub(crate) fn forget_kernel(&mut self) {
        if self.kernel_loaded {
            warn!("plo: previous kernel discarded");
        }
        self.kernel_loaded = false;
        self.syspage.set_kernel_text(Region::new(0, 0));
        self.syspage.set_kernel_data(Region::new(0, 0));
        self.syspage.set_kernel_bss(Region::new(0, 0));
        self.syspage.set_kernel_entry(PhysicalAddress::zero());
    }

    pub(crate) fn device(&self) -> Result<String, Error> {
        self.default_device
            .clone()
            .ok_or(Error::BadArgument("device"))
    }

    /// Save the syspage, release the devices and jump to the kernel.
    ///
    /// # Errors
    /// [`Error::NoKernel`] if no kernel was loaded, or a syspage error.
    pub fn launch(&mut self) -> Result<(), Error> {
        if !self.kernel_loaded {
            return Err(Error::NoKernel);
        }
        let syspage = self.syspage.save(self.hal.memory())?;
        if self.phfs.open_count() != 0 {
            warn!("plo: {} PHFS handle(s) still open at launch", self.phfs.open_count());
        }
        self.phfs.devices_mut().done_all();

        let entry = self.syspage.kernel().entry;
        info!("plo: jumping to {entry}, syspage at {syspage}");
        self.hal.launch(entry, syspage);
        Ok(())
    }
}
