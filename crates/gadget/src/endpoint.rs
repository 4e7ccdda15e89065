//! The hidg endpoint: lifecycle, readiness polling, and report I/O.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use hid_g29_protocol::INPUT_REPORT_LEN;

use crate::configfs::{self, GadgetPaths};
use crate::error::{GadgetError, Result};

/// Poll slice used while retrying a blocked write.
const WRITE_RETRY_POLL: Duration = Duration::from_millis(5);
/// Sleep between the two retry polls when the endpoint stays busy.
const WRITE_RETRY_SLEEP: Duration = Duration::from_millis(2);

/// Outcome of polling the endpoint for readable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadReadiness {
    /// Data is waiting to be read.
    Readable,
    /// The poll timed out with nothing pending.
    Idle,
    /// The descriptor is missing or reported a fatal condition.
    Gone,
}

/// Owner of the gadget tree and the `/dev/hidg0` endpoint.
///
/// The file handle is opened lazily and guarded by its own mutex; I/O is
/// performed on duplicated handles so a concurrent [`HidGadget::reset_endpoint`]
/// cannot invalidate an in-flight operation. Transient endpoint errors are
/// recovered by closing the handle and reopening it on the next call; the
/// caller decides whether to abandon a frame.
pub struct HidGadget {
    paths: GadgetPaths,
    fd: Mutex<Option<File>>,
    udc_name: Mutex<Option<String>>,
    udc_bound: AtomicBool,
    non_blocking: AtomicBool,
}

impl HidGadget {
    /// Create an unattached gadget backend using the given paths.
    pub fn new(paths: GadgetPaths) -> Self {
        Self {
            paths,
            fd: Mutex::new(None),
            udc_name: Mutex::new(None),
            udc_bound: AtomicBool::new(false),
            non_blocking: AtomicBool::new(true),
        }
    }

    /// Create a backend against the conventional kernel locations.
    pub fn system() -> Self {
        Self::new(GadgetPaths::system())
    }

    /// Build the gadget tree, bind the first UDC, and open the endpoint.
    ///
    /// Partial state is torn down on failure so a later attempt starts
    /// clean.
    pub fn initialize(&self) -> Result<()> {
        info!("initializing USB HID gadget");
        let udc = configfs::create_gadget_tree(&self.paths)?;
        *self.udc_name.lock() = Some(udc);

        if let Err(e) = self.bind_udc() {
            configfs::remove_gadget_tree(&self.paths);
            return Err(e);
        }
        if let Err(e) = self.ensure_open() {
            configfs::remove_gadget_tree(&self.paths);
            return Err(e);
        }
        Ok(())
    }

    /// Unbind, close the endpoint, and remove the gadget tree.
    pub fn shutdown(&self) {
        info!("shutting down HID gadget");
        *self.fd.lock() = None;
        if let Err(e) = self.unbind_udc() {
            debug!(error = %e, "unbind during shutdown failed");
        }
        configfs::remove_gadget_tree(&self.paths);
    }

    /// Whether the endpoint file is currently open.
    pub fn is_ready(&self) -> bool {
        self.fd.lock().is_some()
    }

    /// Whether the gadget is currently attached to its controller.
    pub fn is_udc_bound(&self) -> bool {
        self.udc_bound.load(Ordering::Acquire)
    }

    /// Toggle non-blocking mode, re-applying it to a live descriptor.
    pub fn set_non_blocking(&self, enabled: bool) {
        let previous = self.non_blocking.swap(enabled, Ordering::AcqRel);
        if previous == enabled {
            return;
        }
        let guard = self.fd.lock();
        let Some(file) = guard.as_ref() else {
            return;
        };
        let result = fcntl(file.as_raw_fd(), FcntlArg::F_GETFL).and_then(|bits| {
            let mut flags = OFlag::from_bits_truncate(bits);
            flags.set(OFlag::O_NONBLOCK, enabled);
            fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags))
        });
        if let Err(e) = result {
            error!(error = %e, "failed to update endpoint blocking mode");
        }
    }

    /// Close the endpoint so the next operation reopens it.
    pub fn reset_endpoint(&self) {
        *self.fd.lock() = None;
    }

    /// Attach the gadget to its controller, making it enumerate on the host.
    pub fn bind_udc(&self) -> Result<()> {
        let mut name = self.udc_name.lock();
        if self.udc_bound.load(Ordering::Acquire) {
            return Ok(());
        }
        if name.is_none() {
            *name = configfs::detect_first_udc(&self.paths);
        }
        let Some(udc) = name.clone() else {
            return Err(GadgetError::NoUdc(self.paths.udc_class.clone()));
        };
        std::fs::write(self.paths.udc_attr(), format!("{udc}\n")).map_err(|e| {
            GadgetError::UdcBinding {
                action: "bind",
                udc: udc.clone(),
                source: e,
            }
        })?;
        self.udc_bound.store(true, Ordering::Release);
        info!(udc = %udc, "bound gadget to UDC");
        // The endpoint may take a moment to appear after binding; a failed
        // open here is retried lazily by the next wait or write.
        if let Err(e) = self.ensure_open() {
            debug!(error = %e, "endpoint not yet available after bind");
        }
        Ok(())
    }

    /// Detach the gadget without destroying the tree.
    pub fn unbind_udc(&self) -> Result<()> {
        let name = self.udc_name.lock();
        if !self.udc_bound.load(Ordering::Acquire) {
            return Ok(());
        }
        std::fs::write(self.paths.udc_attr(), "\n").map_err(|e| GadgetError::UdcBinding {
            action: "unbind",
            udc: name.clone().unwrap_or_default(),
            source: e,
        })?;
        self.udc_bound.store(false, Ordering::Release);
        self.reset_endpoint();
        info!("unbound gadget from UDC");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        let mut guard = self.fd.lock();
        if guard.is_some() {
            return Ok(());
        }
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if self.non_blocking.load(Ordering::Acquire) {
            options.custom_flags(libc::O_NONBLOCK);
        }
        match options.open(&self.paths.hidg) {
            Ok(file) => {
                info!(path = %self.paths.hidg.display(), "opened HID endpoint");
                *guard = Some(file);
                Ok(())
            }
            Err(e) => Err(GadgetError::EndpointOpen {
                path: self.paths.hidg.clone(),
                source: e,
            }),
        }
    }

    fn clone_endpoint(&self) -> Option<File> {
        self.fd.lock().as_ref().and_then(|f| f.try_clone().ok())
    }

    /// Poll the endpoint for writability within `timeout`.
    ///
    /// A descriptor reporting `POLLERR`/`POLLHUP`/`POLLNVAL` is closed so
    /// the next call reopens it.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let Some(file) = self.clone_endpoint() else {
                thread::sleep(Duration::from_millis(5));
                continue;
            };

            let remaining = deadline.saturating_duration_since(now);
            let wait_ms = remaining.as_millis().min(u16::MAX as u128) as u16;
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLOUT)];
            match poll(&mut fds, PollTimeout::from(wait_ms)) {
                Ok(n) if n > 0 => {
                    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                    if revents.intersects(PollFlags::POLLOUT | PollFlags::POLLWRNORM) {
                        return true;
                    }
                    if revents
                        .intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL)
                    {
                        self.reset_endpoint();
                        continue;
                    }
                }
                Ok(_) => return false,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    error!(error = %e, "endpoint poll failed");
                    return false;
                }
            }
        }
    }

    /// Write a full input report, retrying through transient backpressure.
    pub fn write_report_blocking(&self, report: &[u8; INPUT_REPORT_LEN]) -> bool {
        self.write_blocking(report)
    }

    /// Write `data` completely, looping over partial writes.
    ///
    /// `EAGAIN` waits for writability with a short poll and one sleep-backed
    /// retry; `EPIPE`/`ENODEV`/`ESHUTDOWN` close the endpoint and report
    /// failure so the caller can re-arm and retry the frame.
    pub fn write_blocking(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }

        let mut total = 0usize;
        while total < data.len() {
            if self.ensure_open().is_err() {
                return false;
            }
            let Some(mut file) = self.clone_endpoint() else {
                continue;
            };

            match file.write(&data[total..]) {
                Ok(0) => {
                    if !self.wait_ready(WRITE_RETRY_POLL) {
                        return false;
                    }
                }
                Ok(n) => total += n,
                Err(e) => match e.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::EAGAIN) => {
                        if !self.wait_ready(WRITE_RETRY_POLL) {
                            thread::sleep(WRITE_RETRY_SLEEP);
                            if !self.wait_ready(WRITE_RETRY_POLL) {
                                return false;
                            }
                        }
                    }
                    Some(libc::EPIPE) | Some(libc::ENODEV) | Some(libc::ESHUTDOWN) => {
                        warn!(errno = e.raw_os_error(), "endpoint gone during write");
                        self.reset_endpoint();
                        return false;
                    }
                    _ => {
                        error!(error = %e, "endpoint write failed");
                        return false;
                    }
                },
            }
        }
        true
    }

    /// Poll the endpoint for readable FFB output data.
    pub fn poll_readable(&self, timeout: Duration) -> ReadReadiness {
        let Some(file) = self.clone_endpoint() else {
            return ReadReadiness::Gone;
        };
        let wait_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(wait_ms)) {
            Ok(0) => ReadReadiness::Idle,
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL)
                {
                    ReadReadiness::Gone
                } else if revents.contains(PollFlags::POLLIN) {
                    ReadReadiness::Readable
                } else {
                    ReadReadiness::Idle
                }
            }
            Err(nix::errno::Errno::EINTR) => ReadReadiness::Idle,
            Err(e) => {
                error!(error = %e, "endpoint read poll failed");
                ReadReadiness::Gone
            }
        }
    }

    /// Drain available bytes without blocking.
    ///
    /// Returns `Ok(0)` at end-of-file; `WouldBlock` means the endpoint is
    /// empty. `EINTR` is retried internally; anything else is fatal for
    /// this descriptor and the caller should reset the endpoint.
    pub fn read_nonblocking(&self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut file) = self.clone_endpoint() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        loop {
            match file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fake_gadget(root: &TempDir) -> HidGadget {
        let base = root.path();
        fs::create_dir_all(base.join("configfs/usb_gadget")).unwrap();
        fs::create_dir_all(base.join("udc")).unwrap();
        fs::write(base.join("udc/dummy_udc.0"), b"").unwrap();
        fs::write(base.join("hidg0"), b"").unwrap();
        HidGadget::new(GadgetPaths {
            configfs_root: base.join("configfs"),
            udc_class: base.join("udc"),
            hidg: base.join("hidg0"),
        })
    }

    #[test]
    fn test_initialize_binds_and_opens() {
        let root = TempDir::new().unwrap();
        let gadget = fake_gadget(&root);

        gadget.initialize().unwrap();
        assert!(gadget.is_udc_bound());
        assert!(gadget.is_ready());

        let udc_attr = fs::read_to_string(gadget.paths.udc_attr()).unwrap();
        assert_eq!(udc_attr, "dummy_udc.0\n");
    }

    #[test]
    fn test_unbind_clears_endpoint() {
        let root = TempDir::new().unwrap();
        let gadget = fake_gadget(&root);
        gadget.initialize().unwrap();

        gadget.unbind_udc().unwrap();
        assert!(!gadget.is_udc_bound());
        assert!(!gadget.is_ready());
        assert_eq!(fs::read_to_string(gadget.paths.udc_attr()).unwrap(), "\n");
    }

    #[test]
    fn test_write_report_writes_all_bytes() {
        let root = TempDir::new().unwrap();
        let gadget = fake_gadget(&root);
        gadget.initialize().unwrap();

        let report = [0xAAu8; INPUT_REPORT_LEN];
        assert!(gadget.write_report_blocking(&report));
        let written = fs::read(root.path().join("hidg0")).unwrap();
        assert_eq!(written, report);
    }

    #[test]
    fn test_wait_ready_on_regular_file() {
        let root = TempDir::new().unwrap();
        let gadget = fake_gadget(&root);
        gadget.initialize().unwrap();
        // Regular files are always writable.
        assert!(gadget.wait_ready(Duration::from_millis(50)));
    }

    #[test]
    fn test_reset_then_write_reopens() {
        let root = TempDir::new().unwrap();
        let gadget = fake_gadget(&root);
        gadget.initialize().unwrap();

        gadget.reset_endpoint();
        assert!(!gadget.is_ready());
        assert!(gadget.write_report_blocking(&[0u8; INPUT_REPORT_LEN]));
        assert!(gadget.is_ready());
    }

    #[test]
    fn test_read_nonblocking_drains_file() {
        let root = TempDir::new().unwrap();
        let gadget = fake_gadget(&root);
        fs::write(root.path().join("hidg0"), [0x11, 0x08, 0xC0, 0x80, 0, 0, 0]).unwrap();
        gadget.initialize().unwrap();

        let mut buf = [0u8; 32];
        let n = gadget.read_nonblocking(&mut buf).unwrap();
        assert_eq!(n, 7);
        assert_eq!(&buf[..7], &[0x11, 0x08, 0xC0, 0x80, 0, 0, 0]);
        // Second read hits end-of-file.
        assert_eq!(gadget.read_nonblocking(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_missing_endpoint_read_is_not_connected() {
        let root = TempDir::new().unwrap();
        let gadget = fake_gadget(&root);
        let mut buf = [0u8; 8];
        let err = gadget.read_nonblocking(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_shutdown_removes_tree() {
        let root = TempDir::new().unwrap();
        let gadget = fake_gadget(&root);
        gadget.initialize().unwrap();
        gadget.shutdown();
        assert!(!gadget.paths.gadget_dir().exists());
        assert!(!gadget.is_ready());
    }
}
