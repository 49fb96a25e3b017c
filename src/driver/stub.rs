//! In-process stand-in for the driver.
//!
//! Answers every request the bridge sends with a well formed reply and
//! remembers the last pose pushed per tracker. Used by the `debug_driver`
//! binary and by the bridge tests.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::debug;

use super::command::{verify_and_parse, Command};
use super::error::DriverError;
use super::ipc::IpcClient;
use super::version::SemVer;
use crate::geometry::Pose;

#[derive(Debug, Clone)]
pub struct RegisteredTracker {
    pub name: String,
    pub role: String,
    pub last_pose: Option<Pose>,
}

#[derive(Debug, Clone)]
pub struct DebugDriver {
    version: SemVer,
    trackers: Vec<RegisteredTracker>,
    stations: Vec<Option<Pose>>,
    settings: Option<(i32, f64, f64)>,
}

impl DebugDriver {
    pub fn new(version: SemVer) -> Self {
        Self {
            version,
            trackers: Vec::new(),
            stations: Vec::new(),
            settings: None,
        }
    }

    pub fn trackers(&self) -> &[RegisteredTracker] {
        &self.trackers
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn station_pose(&self, id: usize) -> Option<Pose> {
        self.stations.get(id).copied().flatten()
    }

    pub fn settings(&self) -> Option<(i32, f64, f64)> {
        self.settings
    }

    /// Produce the reply for one request. Unknown or unparsable requests
    /// get `invalid`, unknown ids `idinvalid`.
    pub fn handle(&mut self, request: &str) -> String {
        debug!(request, "debug driver request");
        let name = match request.split_whitespace().next() {
            Some(n) => n,
            None => return "invalid".to_string(),
        };
        let result = match name {
            "numtrackers" => Ok(Command::new("numtrackers")
                .arg(self.trackers.len())
                .arg(self.version.to_string())
                .build()),
            "addtracker" => self.add_tracker(request),
            "addstation" => {
                self.stations.push(None);
                Ok("added".to_string())
            }
            "updatepose" => self.update_pose(request),
            "updatestation" => self.update_station(request),
            "gettrackerpose" => self.get_tracker_pose(request),
            "settings" => self.update_settings(request),
            _ => Ok("invalid".to_string()),
        };
        result.unwrap_or_else(|_| "invalid".to_string())
    }

    fn add_tracker(&mut self, request: &str) -> Result<String, DriverError> {
        let mut args = verify_and_parse(request, "addtracker")?;
        let name = args.next_str()?.to_string();
        let role = args.next_str()?.to_string();
        self.trackers.push(RegisteredTracker {
            name,
            role,
            last_pose: None,
        });
        Ok("added".to_string())
    }

    fn update_pose(&mut self, request: &str) -> Result<String, DriverError> {
        let mut args = verify_and_parse(request, "updatepose")?;
        let id: usize = args.next()?;
        let pose = args.next_pose()?;
        let _time_offset: f64 = args.next()?;
        let _smoothing: f64 = args.next()?;
        match self.trackers.get_mut(id) {
            Some(tracker) => {
                tracker.last_pose = Some(pose);
                Ok("updated".to_string())
            }
            None => Ok("idinvalid".to_string()),
        }
    }

    fn update_station(&mut self, request: &str) -> Result<String, DriverError> {
        let mut args = verify_and_parse(request, "updatestation")?;
        let id: usize = args.next()?;
        let pose = args.next_pose()?;
        match self.stations.get_mut(id) {
            Some(station) => {
                *station = Some(pose);
                Ok("updated".to_string())
            }
            None => Ok("idinvalid".to_string()),
        }
    }

    fn get_tracker_pose(&self, request: &str) -> Result<String, DriverError> {
        let mut args = verify_and_parse(request, "gettrackerpose")?;
        let id: usize = args.next()?;
        let _time_offset: f64 = args.next()?;
        let tracker = match self.trackers.get(id) {
            Some(t) => t,
            None => return Ok("idinvalid".to_string()),
        };
        let (pose, status) = match tracker.last_pose {
            Some(p) => (p, 0),
            None => (Pose::identity(), -1),
        };
        Ok(Command::new("trackerpose")
            .arg(id)
            .arg(pose)
            .arg(status)
            .build())
    }

    fn update_settings(&mut self, request: &str) -> Result<String, DriverError> {
        let mut args = verify_and_parse(request, "settings")?;
        let saved: i32 = args.next()?;
        let factor: f64 = args.next()?;
        let additional: f64 = args.next()?;
        self.settings = Some((saved, factor, additional));
        Ok("changed".to_string())
    }
}

impl IpcClient for DebugDriver {
    fn send_recv(&mut self, request: &str) -> std::io::Result<String> {
        Ok(self.handle(request))
    }
}

/// Shared handle, so the driver state can be inspected while a
/// `VrDriver` owns a clone.
#[derive(Debug, Clone)]
pub struct SharedDebugDriver(Arc<Mutex<DebugDriver>>);

impl SharedDebugDriver {
    pub fn new(version: SemVer) -> Self {
        Self(Arc::new(Mutex::new(DebugDriver::new(version))))
    }

    pub fn lock(&self) -> MutexGuard<'_, DebugDriver> {
        self.0.lock()
    }
}

impl IpcClient for SharedDebugDriver {
    fn send_recv(&mut self, request: &str) -> std::io::Result<String> {
        Ok(self.0.lock().handle(request))
    }
}
