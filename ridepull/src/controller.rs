//! Download orchestration.
//!
//! [`DownloadController`] owns the port list, the selection and the chosen
//! driver, and runs one download session at a time:
//!
//! ```text
//!            rescan()                     start_download()
//!   Idle ───────────> Scanning ──> Idle ─────────────────> Downloading
//!    ^                               │ select (1 port)          │
//!    │                               v                          ├──> Finalizing ──┐
//!    │                             Ready ───────────────────────┤                 │
//!    │                                                          ├──> Canceled ────┤
//!    │                                                          └──> Failed ──────┤
//!    └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transfer runs on the caller's thread. Cancellation is requested
//! through a [`CancelHandle`], usually from another thread, and is observed
//! by the driver at its next progress poll.

use crate::driver::{DeviceDriver, Downloaded, DriverRegistry};
use crate::error::{Error, Result};
use crate::finalize::{self, FinalizeRequest, Overwrite};
use crate::port::{PortEnumerator, PortInfo, PortScan};
use log::{debug, info};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControllerState {
    /// Nothing to do yet (no devices, no selection or no driver).
    #[default]
    Idle,
    /// Enumerating ports.
    Scanning,
    /// Exactly one port and a driver are selected.
    Ready,
    /// A driver is transferring data.
    Downloading,
    /// The download is being moved into place.
    Finalizing,
    /// The session ended because the user canceled it.
    Canceled,
    /// The session ended with a driver or finalize error.
    Failed,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Ready => "ready",
            Self::Downloading => "downloading",
            Self::Finalizing => "finalizing",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a [`Notice`] should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Something the user may need to act on, but nothing failed.
    Warning,
    /// An operation failed.
    Error,
    /// Plain information.
    Info,
}

/// A user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Presentation class.
    pub severity: Severity,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
}

impl Notice {
    fn new(severity: Severity, title: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.to_string(),
            message: message.into(),
        }
    }
}

/// The application embedding the controller.
pub trait Host {
    /// A ride was published under `file_name` in the destination directory.
    fn add_ride(&mut self, file_name: &str);

    /// Ask whether the existing `path` may be overwritten.
    fn confirm_overwrite(&mut self, path: &Path) -> bool;

    /// Show a message.
    fn notify(&mut self, notice: Notice);

    /// Driver status text.
    fn status(&mut self, _text: &str) {}

    /// The controller moved to `state`.
    fn state_changed(&mut self, _state: ControllerState) {}
}

/// What a [`CancelHandle::cancel`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelEffect {
    /// A transfer is running and will stop at its next progress poll.
    Requested,
    /// Nothing is running; the host should simply close.
    Dismissed,
}

#[derive(Debug, Default)]
struct CancelFlags {
    requested: AtomicBool,
    in_progress: AtomicBool,
}

/// Thread-safe handle for canceling the running download.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flags: Arc<CancelFlags>,
}

impl CancelHandle {
    /// Request cancellation of the running transfer, if any.
    ///
    /// Once the driver has returned (while the result is being published)
    /// the request is dismissed.
    pub fn cancel(&self) -> CancelEffect {
        if self.flags.in_progress.load(Ordering::SeqCst) {
            self.flags.requested.store(true, Ordering::SeqCst);
            CancelEffect::Requested
        } else {
            CancelEffect::Dismissed
        }
    }

    /// Whether cancellation was requested for the running transfer.
    pub fn is_requested(&self) -> bool {
        self.flags.requested.load(Ordering::SeqCst)
    }

    /// Whether a transfer is running.
    pub fn is_in_progress(&self) -> bool {
        self.flags.in_progress.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.flags.requested.store(false, Ordering::SeqCst);
        self.flags.in_progress.store(true, Ordering::SeqCst);
    }

    /// The driver returned; later requests have nothing left to stop.
    fn transfer_done(&self) {
        self.flags.in_progress.store(false, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.flags.in_progress.store(false, Ordering::SeqCst);
        self.flags.requested.store(false, Ordering::SeqCst);
    }
}

/// A successfully published ride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Name reported to [`Host::add_ride`].
    pub file_name: String,
    /// Full path of the published file.
    pub path: PathBuf,
}

/// Orchestrates scanning, selection, transfer and publishing.
pub struct DownloadController<'r, E: PortEnumerator> {
    enumerator: E,
    registry: &'r DriverRegistry,
    destination: PathBuf,
    scan: Arc<PortScan>,
    selection: Vec<usize>,
    driver: Option<String>,
    state: ControllerState,
    cancel: CancelHandle,
}

impl<'r, E: PortEnumerator> DownloadController<'r, E> {
    /// Create a controller publishing into `destination`.
    ///
    /// The port list starts empty; call [`rescan`](Self::rescan) to populate
    /// it. The registry's first driver is preselected.
    pub fn new(enumerator: E, registry: &'r DriverRegistry, destination: impl Into<PathBuf>) -> Self {
        Self {
            enumerator,
            registry,
            destination: destination.into(),
            scan: Arc::default(),
            selection: Vec::new(),
            driver: registry.default_name().map(str::to_string),
            state: ControllerState::Idle,
            cancel: CancelHandle::default(),
        }
    }

    /// Enumerate ports again, replacing the list and clearing the selection.
    pub fn rescan(&mut self, host: &mut dyn Host) -> Arc<PortScan> {
        self.transition(host, ControllerState::Scanning);

        let scan = self.enumerator.scan();
        debug!("Scan found {} port(s)", scan.len());
        if let Some(warning) = &scan.warning {
            host.notify(Notice::new(
                Severity::Warning,
                "Error Loading Device Drivers",
                format!("Warning:\n\n{warning}"),
            ));
        }

        self.scan = Arc::new(scan);
        self.selection.clear();
        self.transition(host, ControllerState::Idle);
        Arc::clone(&self.scan)
    }

    /// The most recent scan.
    pub fn ports(&self) -> Arc<PortScan> {
        Arc::clone(&self.scan)
    }

    /// Select ports by index into the current scan.
    ///
    /// Several indices are accepted but only a single selection is ready to
    /// download.
    pub fn select_ports(&mut self, indices: &[usize]) -> Result<()> {
        if let Some(bad) = indices.iter().find(|&&i| i >= self.scan.len()) {
            return Err(Error::InvalidSelection(format!(
                "index {bad} out of range ({} port(s) listed)",
                self.scan.len()
            )));
        }
        let mut selection = indices.to_vec();
        selection.sort_unstable();
        selection.dedup();
        self.selection = selection;
        Ok(())
    }

    /// Select the single port with the given name. Returns its index.
    pub fn select_port_by_name(&mut self, name: &str) -> Result<usize> {
        let idx = self
            .scan
            .position(name)
            .ok_or_else(|| Error::InvalidSelection(format!("{name} is not in the port list")))?;
        self.selection = vec![idx];
        Ok(idx)
    }

    /// Deselect all ports.
    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// The selected port, if exactly one is selected.
    pub fn selected_port(&self) -> Option<&PortInfo> {
        match self.selection.as_slice() {
            [idx] => self.scan.ports.get(*idx),
            _ => None,
        }
    }

    /// Choose the driver by registry name.
    pub fn select_driver(&mut self, name: &str) -> Result<()> {
        let driver = self
            .registry
            .get(name)
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))?;
        self.driver = Some(driver.name().to_string());
        Ok(())
    }

    /// Name of the chosen driver.
    pub fn driver_name(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    /// Directory rides are published into.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Current state.
    pub fn state(&self) -> ControllerState {
        match self.state {
            ControllerState::Idle if self.can_download() => ControllerState::Ready,
            state => state,
        }
    }

    /// Whether [`start_download`](Self::start_download) would be accepted.
    pub fn can_download(&self) -> bool {
        self.not_ready_reason().is_none()
    }

    /// Guidance for the user in the current situation.
    pub fn instructions(&self) -> &'static str {
        if self.scan.is_empty() {
            "No devices found. Make sure the device is plugged into the \
             computer's USB port, then rescan to check again."
        } else if self.selection.len() != 1 {
            "Select the device from which you would like to download a ride."
        } else {
            "Make sure the device is turned on and in its download (host) \
             mode, then start the download."
        }
    }

    /// Handle for canceling the running download from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request cancellation of the running download.
    pub fn cancel(&self) -> CancelEffect {
        self.cancel.cancel()
    }

    /// Run one download session against the selected port.
    ///
    /// Blocks until the driver returns and the result is published or
    /// discarded. The session always ends in `Idle` with the selection
    /// cleared.
    pub fn start_download(&mut self, host: &mut dyn Host) -> Result<Published> {
        if let Some(reason) = self.not_ready_reason() {
            return Err(Error::NotReady(reason.to_string()));
        }
        let (port, driver) = match (self.selected_port(), self.driver.as_deref()) {
            (Some(port), Some(name)) => (
                port.clone(),
                self.registry
                    .get(name)
                    .ok_or_else(|| Error::UnknownDriver(name.to_string()))?,
            ),
            _ => return Err(Error::NotReady("no device selected".into())),
        };

        info!("Downloading from {} using {}", port.name, driver.name());
        self.cancel.begin();
        self.transition(host, ControllerState::Downloading);

        let outcome = self.run_session(host, &port, driver.as_ref());

        self.cancel.finish();
        self.selection.clear();
        self.transition(host, ControllerState::Idle);
        outcome
    }

    fn run_session(
        &mut self,
        host: &mut dyn Host,
        port: &PortInfo,
        driver: &dyn DeviceDriver,
    ) -> Result<Published> {
        let cancel = self.cancel.clone();
        let mut observed = false;

        let result = driver.download(port, &self.destination, &mut |status| {
            host.status(status);
            let keep_going = !cancel.is_requested();
            observed |= !keep_going;
            keep_going
        });
        cancel.transfer_done();

        match result {
            Ok(downloaded) if observed => {
                debug!("Driver finished after cancellation; discarding");
                finalize::discard(&downloaded.temp_path);
                self.canceled(host)
            },
            Ok(downloaded) => self.finalize(host, downloaded),
            Err(e) if observed || cancel.is_requested() || e.is_canceled() => self.canceled(host),
            Err(e) => {
                info!("Download failed: {e}");
                self.transition(host, ControllerState::Failed);
                host.notify(Notice::new(Severity::Error, "Download failed", e.to_string()));
                Err(e)
            },
        }
    }

    fn canceled(&mut self, host: &mut dyn Host) -> Result<Published> {
        info!("Download canceled");
        self.transition(host, ControllerState::Canceled);
        host.notify(Notice::new(
            Severity::Info,
            "Download canceled",
            "Cancel clicked by user.",
        ));
        Err(Error::Canceled)
    }

    fn finalize(&mut self, host: &mut dyn Host, downloaded: Downloaded) -> Result<Published> {
        self.transition(host, ControllerState::Finalizing);

        let Downloaded {
            temp_path,
            file_name,
        } = downloaded;
        let request = FinalizeRequest::new(temp_path, &self.destination, file_name.clone());

        match finalize::publish(request, |path| Overwrite::from(host.confirm_overwrite(path))) {
            Ok(path) => {
                host.add_ride(&file_name);
                host.notify(Notice::new(Severity::Info, "Success", "Download complete."));
                Ok(Published { file_name, path })
            },
            Err(e @ Error::Aborted { .. }) => {
                host.notify(Notice::new(
                    Severity::Info,
                    "Ride Already Downloaded",
                    e.to_string(),
                ));
                Err(e)
            },
            Err(e) => {
                self.transition(host, ControllerState::Failed);
                host.notify(Notice::new(Severity::Error, "Error", e.to_string()));
                Err(e)
            },
        }
    }

    fn not_ready_reason(&self) -> Option<&'static str> {
        if !matches!(self.state, ControllerState::Idle) {
            Some("a download is already in progress")
        } else if self.scan.is_empty() {
            Some("no devices found")
        } else if self.selection.is_empty() {
            Some("no device selected")
        } else if self.selection.len() > 1 {
            Some("select exactly one device")
        } else if self.driver.is_none() {
            Some("no device type selected")
        } else {
            None
        }
    }

    fn transition(&mut self, host: &mut dyn Host, state: ControllerState) {
        self.state = state;
        let visible = self.state();
        debug!("Controller state: {visible}");
        host.state_changed(visible);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{check_progress, keep_temp, temp_file_in};
    use std::cell::Cell;
    use std::fs;
    use std::io::Write;

    /// How a scripted driver behaves.
    #[derive(Clone)]
    enum Script {
        /// Write `contents` under `file_name` after a few progress polls.
        Succeed {
            file_name: &'static str,
            contents: &'static [u8],
        },
        /// Poll forever until told to stop.
        UntilCanceled,
        /// Poll, ignore the answer and succeed anyway.
        IgnoreCancel,
        /// Fail with a driver message.
        Fail(&'static str),
        /// Report cancellation without having been asked.
        SpuriousCancel,
    }

    struct ScriptedDriver {
        name: &'static str,
        script: Script,
    }

    impl DeviceDriver for ScriptedDriver {
        fn name(&self) -> &str {
            self.name
        }

        fn download(
            &self,
            _port: &PortInfo,
            dest_dir: &Path,
            on_progress: &mut dyn FnMut(&str) -> bool,
        ) -> Result<Downloaded> {
            match &self.script {
                Script::Succeed {
                    file_name,
                    contents,
                } => {
                    let mut temp = temp_file_in(dest_dir)?;
                    for block in 1..=3 {
                        check_progress(on_progress, &format!("Reading block {block}"))?;
                    }
                    temp.write_all(contents)?;
                    Ok(Downloaded {
                        temp_path: keep_temp(temp)?,
                        file_name: (*file_name).to_string(),
                    })
                },
                Script::UntilCanceled => {
                    let _temp = temp_file_in(dest_dir)?;
                    for block in 1.. {
                        check_progress(on_progress, &format!("Reading block {block}"))?;
                    }
                    unreachable!()
                },
                Script::IgnoreCancel => {
                    let mut temp = temp_file_in(dest_dir)?;
                    for block in 1..=3 {
                        let _ = on_progress(&format!("Reading block {block}"));
                    }
                    temp.write_all(b"late")?;
                    Ok(Downloaded {
                        temp_path: keep_temp(temp)?,
                        file_name: "late.dat".to_string(),
                    })
                },
                Script::Fail(msg) => {
                    check_progress(on_progress, "Connecting")?;
                    Err(Error::Driver((*msg).to_string()))
                },
                Script::SpuriousCancel => Err(Error::Canceled),
            }
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        rides: Vec<String>,
        notices: Vec<Notice>,
        statuses: Vec<String>,
        states: Vec<ControllerState>,
        asked: Vec<PathBuf>,
        overwrite: bool,
        cancel_at: Option<(&'static str, CancelHandle)>,
        cancel_on_prompt: Option<CancelHandle>,
        prompt_cancels: Vec<CancelEffect>,
    }

    impl Host for RecordingHost {
        fn add_ride(&mut self, file_name: &str) {
            self.rides.push(file_name.to_string());
        }

        fn confirm_overwrite(&mut self, path: &Path) -> bool {
            self.asked.push(path.to_path_buf());
            if let Some(handle) = &self.cancel_on_prompt {
                self.prompt_cancels.push(handle.cancel());
            }
            self.overwrite
        }

        fn notify(&mut self, notice: Notice) {
            self.notices.push(notice);
        }

        fn status(&mut self, text: &str) {
            self.statuses.push(text.to_string());
            if let Some((trigger, handle)) = &self.cancel_at {
                if text == *trigger {
                    assert_eq!(handle.cancel(), CancelEffect::Requested);
                }
            }
        }

        fn state_changed(&mut self, state: ControllerState) {
            self.states.push(state);
        }
    }

    impl RecordingHost {
        fn titles(&self) -> Vec<&str> {
            self.notices
                .iter()
                .map(|n| n.title.as_str())
                .collect()
        }
    }

    fn registry_with(script: Script) -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        registry.register(ScriptedDriver {
            name: "Scripted",
            script,
        });
        registry
    }

    fn one_port() -> PortScan {
        PortScan::new(vec![PortInfo::from_name("/dev/ttyUSB0")])
    }

    fn ride_success() -> Script {
        Script::Succeed {
            file_name: "ride001.dat",
            contents: b"ride data",
        }
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_scenario_a_successful_download() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(ride_success());
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(one_port, &registry, dir.path());

        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();
        assert_eq!(controller.state(), ControllerState::Ready);

        let published = controller.start_download(&mut host).unwrap();

        assert_eq!(published.file_name, "ride001.dat");
        assert_eq!(published.path, dir.path().join("ride001.dat"));
        assert_eq!(fs::read(&published.path).unwrap(), b"ride data");
        assert_eq!(host.rides, vec!["ride001.dat"]);
        assert_eq!(host.titles(), vec!["Success"]);
        assert_eq!(entries(dir.path()), 1);
        assert_eq!(
            host.states,
            vec![
                ControllerState::Scanning,
                ControllerState::Idle,
                ControllerState::Downloading,
                ControllerState::Finalizing,
                ControllerState::Idle,
            ]
        );
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(controller.selected_port().is_none());
        assert_eq!(host.statuses.len(), 3);
    }

    #[test]
    fn test_scenario_b_declined_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("ride001.dat");
        fs::write(&existing, b"first download").unwrap();

        let registry = registry_with(ride_success());
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();

        let err = controller.start_download(&mut host).unwrap_err();

        assert!(matches!(err, Error::Aborted { .. }));
        assert_eq!(host.asked, vec![existing.clone()]);
        assert!(host.rides.is_empty());
        assert_eq!(fs::read(&existing).unwrap(), b"first download");
        assert_eq!(entries(dir.path()), 1);
        assert_eq!(host.notices[0].severity, Severity::Info);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_accepted_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ride001.dat"), b"first download").unwrap();

        let registry = registry_with(ride_success());
        let mut host = RecordingHost {
            overwrite: true,
            ..RecordingHost::default()
        };
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();

        let published = controller.start_download(&mut host).unwrap();
        assert_eq!(fs::read(published.path).unwrap(), b"ride data");
        assert_eq!(host.rides, vec!["ride001.dat"]);
    }

    #[test]
    fn test_publish_failure_keeps_temp_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("ride001.dat");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("inside.dat"), b"x").unwrap();

        let registry = registry_with(ride_success());
        let mut host = RecordingHost {
            overwrite: true,
            ..RecordingHost::default()
        };
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();

        let err = controller.start_download(&mut host).unwrap_err();

        assert!(err.is_finalize_failure(), "{err}");
        assert!(host.rides.is_empty());
        assert_eq!(host.titles(), vec!["Error"]);
        assert_eq!(host.notices[0].severity, Severity::Error);
        assert_eq!(
            host.states[2..],
            [
                ControllerState::Downloading,
                ControllerState::Finalizing,
                ControllerState::Failed,
                ControllerState::Idle,
            ]
        );
        let leftovers: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".part"))
            .collect();
        assert_eq!(leftovers.len(), 1);
        assert!(blocker.join("inside.dat").exists());
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(controller.selected_port().is_none());
    }

    #[test]
    fn test_cancel_while_publishing_is_dismissed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ride001.dat"), b"first download").unwrap();

        let registry = registry_with(ride_success());
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        let mut host = RecordingHost {
            overwrite: true,
            cancel_on_prompt: Some(controller.cancel_handle()),
            ..RecordingHost::default()
        };
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();

        let published = controller.start_download(&mut host).unwrap();

        assert_eq!(host.prompt_cancels, vec![CancelEffect::Dismissed]);
        assert_eq!(fs::read(published.path).unwrap(), b"ride data");
        assert_eq!(host.rides, vec!["ride001.dat"]);
    }

    #[test]
    fn test_scenario_c_cancel_mid_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(Script::UntilCanceled);
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        let mut host = RecordingHost {
            cancel_at: Some(("Reading block 2", controller.cancel_handle())),
            ..RecordingHost::default()
        };
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();

        let err = controller.start_download(&mut host).unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(host.titles(), vec!["Download canceled"]);
        assert_eq!(host.notices[0].message, "Cancel clicked by user.");
        assert!(host.states.contains(&ControllerState::Canceled));
        assert!(!host.states.contains(&ControllerState::Failed));
        assert!(host.rides.is_empty());
        assert_eq!(entries(dir.path()), 0);
        assert!(!controller.cancel_handle().is_requested());
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_scenario_d_no_ports() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(ride_success());
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(PortScan::default, &registry, dir.path());

        controller.rescan(&mut host);
        assert!(!controller.can_download());
        assert!(controller.select_ports(&[0]).is_err());
        assert!(controller.instructions().contains("No devices found"));

        let err = controller.start_download(&mut host).unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
        assert!(!host.states.contains(&ControllerState::Downloading));
        assert!(host.rides.is_empty());
    }

    #[test]
    fn test_success_after_ignored_cancel_is_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(Script::IgnoreCancel);
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        let mut host = RecordingHost {
            cancel_at: Some(("Reading block 1", controller.cancel_handle())),
            ..RecordingHost::default()
        };
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();

        let err = controller.start_download(&mut host).unwrap_err();
        assert!(err.is_canceled());
        assert!(host.rides.is_empty());
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn test_driver_failure_reports_message() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(Script::Fail("device not in host mode"));
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();

        let err = controller.start_download(&mut host).unwrap_err();

        assert!(matches!(err, Error::Driver(_)));
        assert_eq!(host.titles(), vec!["Download failed"]);
        assert_eq!(host.notices[0].severity, Severity::Error);
        assert!(host.notices[0].message.contains("device not in host mode"));
        assert!(host.states.contains(&ControllerState::Failed));
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_driver_reported_cancel_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(Script::SpuriousCancel);
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();

        assert!(controller.start_download(&mut host).unwrap_err().is_canceled());
        assert_eq!(host.titles(), vec!["Download canceled"]);
    }

    #[test]
    fn test_rescan_replaces_list_and_clears_selection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(ride_success());
        let calls = Cell::new(0);
        let enumerator = || {
            calls.set(calls.get() + 1);
            let names: &[&str] = if calls.get() == 1 {
                &["/dev/ttyUSB0", "/dev/ttyUSB1"]
            } else {
                &["/dev/ttyACM0"]
            };
            PortScan::new(names.iter().map(|n| PortInfo::from_name(*n)).collect())
        };
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(enumerator, &registry, dir.path());

        controller.rescan(&mut host);
        controller.select_ports(&[1]).unwrap();
        assert_eq!(controller.selected_port().map(|p| p.name.as_str()), Some("/dev/ttyUSB1"));

        let scan = controller.rescan(&mut host);
        assert_eq!(scan.ports, vec![PortInfo::from_name("/dev/ttyACM0")]);
        assert_eq!(*controller.ports(), *scan);
        assert!(controller.selected_port().is_none());
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_scan_warning_is_a_notice_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(ride_success());
        let enumerator = || one_port().with_warning("driver missing");
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(enumerator, &registry, dir.path());

        let scan = controller.rescan(&mut host);
        assert_eq!(scan.len(), 1);
        assert_eq!(host.notices.len(), 1);
        assert_eq!(host.notices[0].severity, Severity::Warning);
        assert!(host.notices[0].message.contains("driver missing"));
    }

    #[test]
    fn test_multiple_selection_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(ride_success());
        let two = || {
            PortScan::new(vec![
                PortInfo::from_name("/dev/ttyUSB0"),
                PortInfo::from_name("/dev/ttyUSB1"),
            ])
        };
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(two, &registry, dir.path());
        controller.rescan(&mut host);

        assert!(!controller.can_download());
        controller.select_ports(&[0, 1]).unwrap();
        assert!(!controller.can_download());
        assert!(matches!(
            controller.start_download(&mut host),
            Err(Error::NotReady(_))
        ));

        assert_eq!(controller.select_port_by_name("/dev/ttyUSB1").unwrap(), 1);
        assert!(controller.can_download());
        controller.clear_selection();
        assert!(!controller.can_download());
        assert!(matches!(
            controller.select_ports(&[2]),
            Err(Error::InvalidSelection(_))
        ));
    }

    #[test]
    fn test_driver_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_with(ride_success());
        registry.register(ScriptedDriver {
            name: "Other",
            script: Script::Fail("x"),
        });
        let mut controller = DownloadController::new(one_port, &registry, dir.path());

        assert_eq!(controller.driver_name(), Some("Scripted"));
        controller.select_driver("other").unwrap();
        assert_eq!(controller.driver_name(), Some("Other"));
        assert!(matches!(
            controller.select_driver("PowerTap"),
            Err(Error::UnknownDriver(_))
        ));
        assert_eq!(controller.driver_name(), Some("Other"));
    }

    #[test]
    fn test_empty_registry_is_never_ready() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::new();
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        controller.rescan(&mut host);
        controller.select_ports(&[0]).unwrap();
        assert!(!controller.can_download());
    }

    #[test]
    fn test_cancel_without_transfer_is_dismissed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(ride_success());
        let controller = DownloadController::new(one_port, &registry, dir.path());

        assert_eq!(controller.cancel(), CancelEffect::Dismissed);
        assert!(!controller.cancel_handle().is_requested());
        assert!(!controller.cancel_handle().is_in_progress());
    }

    #[test]
    fn test_instructions_follow_selection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(ride_success());
        let mut host = RecordingHost::default();
        let mut controller = DownloadController::new(one_port, &registry, dir.path());
        controller.rescan(&mut host);

        assert!(controller.instructions().starts_with("Select the device"));
        controller.select_ports(&[0]).unwrap();
        assert!(controller.instructions().contains("start the download"));
    }
}
