//! ConfigFS gadget tree construction and teardown.
//!
//! The gadget is composed declaratively by writing attribute files under
//! `/sys/kernel/config/usb_gadget/<name>/` and symlinking the HID function
//! into the configuration. The resulting tree:
//!
//! ```text
//! g29wheel/
//! ├── idVendor            0x046d
//! ├── idProduct           0xc24f
//! ├── bcdDevice           0x0111
//! ├── bcdUSB              0x0200
//! ├── strings/0x409/{manufacturer,product,serialnumber}
//! ├── functions/hid.usb0/{protocol,subclass,report_length,report_desc}
//! ├── configs/c.1/{MaxPower,strings/0x409/configuration,hid.usb0 -> ../../functions/hid.usb0}
//! └── UDC                 <controller name, empty to detach>
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use hid_g29_protocol::{G29_BCD_DEVICE, G29_PRODUCT_ID, G29_REPORT_DESCRIPTOR, INPUT_REPORT_LEN, LOGITECH_VENDOR_ID};

use crate::error::{GadgetError, Result};

/// Name of the gadget directory under `usb_gadget/`.
pub const GADGET_NAME: &str = "g29wheel";

/// Name of the HID function directory.
pub const HID_FUNCTION: &str = "hid.usb0";

const MANUFACTURER: &str = "Logitech";
const PRODUCT: &str = "G29 Driving Force Racing Wheel";
const SERIAL_NUMBER: &str = "000000000001";
const CONFIG_LABEL: &str = "G29 Configuration";
const MAX_POWER_MA: u32 = 500;

/// Filesystem locations the gadget backend touches.
///
/// Production code uses [`GadgetPaths::system`]; tests substitute a temp
/// directory for every member.
#[derive(Debug, Clone)]
pub struct GadgetPaths {
    /// ConfigFS mount point (normally `/sys/kernel/config`).
    pub configfs_root: PathBuf,
    /// UDC class directory (normally `/sys/class/udc`).
    pub udc_class: PathBuf,
    /// HID gadget character device (normally `/dev/hidg0`).
    pub hidg: PathBuf,
}

impl GadgetPaths {
    /// The conventional kernel locations.
    pub fn system() -> Self {
        Self {
            configfs_root: PathBuf::from("/sys/kernel/config"),
            udc_class: PathBuf::from("/sys/class/udc"),
            hidg: PathBuf::from("/dev/hidg0"),
        }
    }

    /// Gadget directory inside ConfigFS.
    pub fn gadget_dir(&self) -> PathBuf {
        self.configfs_root.join("usb_gadget").join(GADGET_NAME)
    }

    /// The gadget's `UDC` attribute file.
    pub fn udc_attr(&self) -> PathBuf {
        self.gadget_dir().join("UDC")
    }
}

fn write_attr(path: &Path, value: impl AsRef<[u8]>) -> Result<()> {
    let mut payload = value.as_ref().to_vec();
    if payload.last() != Some(&b'\n') {
        payload.push(b'\n');
    }
    fs::write(path, payload).map_err(|e| GadgetError::setup(path.display().to_string(), e))
}

fn make_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| GadgetError::setup(path.display().to_string(), e))
}

/// Best-effort load of the gadget kernel modules.
///
/// `dummy_hcd` only exists on hosts without a real UDC; failure to load it
/// is expected there and not an error.
pub fn ensure_kernel_modules() {
    for module in ["libcomposite", "dummy_hcd"] {
        match Command::new("modprobe").arg(module).output() {
            Ok(out) if out.status.success() => {}
            Ok(out) => debug!(module, status = %out.status, "modprobe did not succeed"),
            Err(e) => debug!(module, error = %e, "modprobe unavailable"),
        }
    }
}

/// Best-effort mount of ConfigFS at the expected path.
pub fn ensure_configfs_mounted(paths: &GadgetPaths) {
    if paths.configfs_root.exists() {
        return;
    }
    if let Err(e) = fs::create_dir_all(&paths.configfs_root) {
        debug!(path = %paths.configfs_root.display(), error = %e, "cannot create ConfigFS mount point");
        return;
    }
    match Command::new("mount")
        .args(["-t", "configfs", "none"])
        .arg(&paths.configfs_root)
        .output()
    {
        Ok(out) if out.status.success() => info!(path = %paths.configfs_root.display(), "mounted ConfigFS"),
        Ok(out) => debug!(status = %out.status, "ConfigFS mount did not succeed"),
        Err(e) => debug!(error = %e, "mount unavailable"),
    }
}

/// Pick the first controller under the UDC class directory.
pub fn detect_first_udc(paths: &GadgetPaths) -> Option<String> {
    let entries = fs::read_dir(&paths.udc_class).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with('.') {
            return Some(name.into_owned());
        }
    }
    None
}

/// Whether an existing gadget directory has the pieces we rely on.
fn tree_is_consistent(gadget: &Path) -> bool {
    gadget.join("functions").join(HID_FUNCTION).exists() && gadget.join("configs/c.1").exists()
}

/// Idempotently build the gadget tree.
///
/// A consistent existing tree is reused; an incomplete one (e.g. left over
/// from a crashed run) is removed and rebuilt. The first available UDC name
/// is returned for later binding.
pub fn create_gadget_tree(paths: &GadgetPaths) -> Result<String> {
    ensure_kernel_modules();
    ensure_configfs_mounted(paths);

    let usb_gadget = paths.configfs_root.join("usb_gadget");
    if !usb_gadget.exists() {
        return Err(GadgetError::NoConfigFs(usb_gadget));
    }
    if !paths.udc_class.exists() {
        return Err(GadgetError::NoUdc(paths.udc_class.clone()));
    }

    let gadget = paths.gadget_dir();
    let mut exists = gadget.exists();
    if exists && !tree_is_consistent(&gadget) {
        info!("existing gadget tree incomplete, rebuilding");
        remove_gadget_tree(paths);
        exists = false;
    }

    if exists {
        info!(gadget = GADGET_NAME, "reusing USB gadget");
    } else {
        build_tree(paths, &gadget)?;
        info!(gadget = GADGET_NAME, "created USB gadget");
    }

    // Prefer a controller the tree is already bound to, otherwise the
    // first one the kernel offers.
    let bound = fs::read_to_string(paths.udc_attr())
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    match bound.or_else(|| detect_first_udc(paths)) {
        Some(udc) => Ok(udc),
        None => Err(GadgetError::NoUdc(paths.udc_class.clone())),
    }
}

fn build_tree(paths: &GadgetPaths, gadget: &Path) -> Result<()> {
    let built: Result<()> = (|| {
        make_dir(gadget)?;
        write_attr(&gadget.join("idVendor"), format!("0x{LOGITECH_VENDOR_ID:04x}"))?;
        write_attr(&gadget.join("idProduct"), format!("0x{G29_PRODUCT_ID:04x}"))?;
        write_attr(&gadget.join("bcdDevice"), format!("0x{G29_BCD_DEVICE:04x}"))?;
        write_attr(&gadget.join("bcdUSB"), "0x0200")?;

        let strings = gadget.join("strings/0x409");
        make_dir(&strings)?;
        write_attr(&strings.join("manufacturer"), MANUFACTURER)?;
        write_attr(&strings.join("product"), PRODUCT)?;
        write_attr(&strings.join("serialnumber"), SERIAL_NUMBER)?;

        let function = gadget.join("functions").join(HID_FUNCTION);
        make_dir(&function)?;
        write_attr(&function.join("protocol"), "1")?;
        write_attr(&function.join("subclass"), "1")?;
        write_attr(&function.join("report_length"), INPUT_REPORT_LEN.to_string())?;
        // The descriptor is binary; no trailing newline.
        fs::write(function.join("report_desc"), G29_REPORT_DESCRIPTOR)
            .map_err(|e| GadgetError::setup("report_desc", e))?;

        let config = gadget.join("configs/c.1");
        let config_strings = config.join("strings/0x409");
        make_dir(&config_strings)?;
        write_attr(&config_strings.join("configuration"), CONFIG_LABEL)?;
        write_attr(&config.join("MaxPower"), MAX_POWER_MA.to_string())?;

        let link = config.join(HID_FUNCTION);
        if !link.exists() {
            std::os::unix::fs::symlink(&function, &link)
                .map_err(|e| GadgetError::setup(link.display().to_string(), e))?;
        }
        Ok(())
    })();

    if built.is_err() {
        remove_gadget_tree(paths);
    }
    built
}

/// Tear the gadget tree down, detaching from the UDC first.
///
/// ConfigFS directories refuse removal while children exist, so the pieces
/// go in strict reverse order of creation. Every step is best-effort: a
/// partially torn down tree is repaired by the next `create_gadget_tree`.
pub fn remove_gadget_tree(paths: &GadgetPaths) {
    let gadget = paths.gadget_dir();
    if !gadget.exists() {
        return;
    }

    if let Err(e) = fs::write(paths.udc_attr(), "\n") {
        debug!(error = %e, "could not clear UDC attribute");
    }

    let steps: [(&str, fn(&Path) -> io::Result<()>); 5] = [
        ("configs/c.1/hid.usb0", |p| fs::remove_file(p)),
        ("configs/c.1/strings/0x409", |p| fs::remove_dir(p)),
        ("configs/c.1", |p| fs::remove_dir(p)),
        ("functions/hid.usb0", |p| fs::remove_dir(p)),
        ("strings/0x409", |p| fs::remove_dir(p)),
    ];
    for (rel, op) in steps {
        let target = gadget.join(rel);
        if target.exists() {
            if let Err(e) = op(&target) {
                warn!(path = %target.display(), error = %e, "gadget teardown step failed");
            }
        }
    }

    // ConfigFS removes the attribute files and default groups together with
    // the gadget directory; a plain filesystem (tests) needs the recursive
    // fallback.
    if fs::remove_dir(&gadget).is_err() {
        if let Err(e) = fs::remove_dir_all(&gadget) {
            warn!(path = %gadget.display(), error = %e, "failed to remove gadget directory");
        }
    }
}
