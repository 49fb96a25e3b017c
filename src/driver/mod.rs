//! Bridge to the driver process running inside the VR runtime.

pub mod command;
pub mod error;
pub mod ipc;
pub mod stub;
pub mod version;

use tracing::{debug, info};

pub use command::{verify_and_parse, Command};
pub use error::DriverError;
pub use ipc::{connect_default, read_message, IpcClient};
pub use stub::{DebugDriver, SharedDebugDriver};
pub use version::SemVer;

use crate::geometry::Pose;
use crate::tracker::TrackerRole;

/// Driver version this build talks to.
pub const DRIVER_VERSION: SemVer = SemVer::new(0, 6, 0);

/// Name a tracker is registered under.
pub fn tracker_name(index: usize) -> String {
    format!("ApriltagTracker{}", index)
}

/// Driver side smoothing, sent once after registration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverSettings {
    pub saved_frames: i32,
    pub smoothing_factor: f64,
    pub additional_smoothing: f64,
}

pub struct VrDriver {
    client: Box<dyn IpcClient>,
    expected_version: SemVer,
}

impl VrDriver {
    pub fn new(client: Box<dyn IpcClient>, expected_version: SemVer) -> Self {
        Self {
            client,
            expected_version,
        }
    }

    /// Check the driver version, register any trackers the driver does not
    /// know yet, then the camera station and the smoothing settings.
    pub fn connect(
        client: Box<dyn IpcClient>,
        expected_version: SemVer,
        roles: &[TrackerRole],
        settings: &DriverSettings,
    ) -> Result<Self, DriverError> {
        let mut driver = Self::new(client, expected_version);

        let existing = driver.tracker_count()?;
        for (index, role) in roles.iter().enumerate().skip(existing) {
            driver.add_tracker(&tracker_name(index), role.as_driver_str())?;
        }

        let registered = driver.tracker_count()?;
        if registered != roles.len() {
            return Err(DriverError::RegistrationIncomplete {
                expected: roles.len(),
                registered,
            });
        }

        driver.add_station()?;
        driver.set_smoothing(settings)?;
        info!(trackers = registered, "connected to driver");
        Ok(driver)
    }

    fn round_trip(&mut self, request: String) -> Result<String, DriverError> {
        debug!(%request, "driver request");
        let response = self.client.send_recv(&request)?;
        Ok(response)
    }

    /// `numtrackers` -> `numtrackers <count> <version>`
    pub fn tracker_count(&mut self) -> Result<usize, DriverError> {
        let response = self.round_trip(Command::new("numtrackers").build())?;
        let mut args = verify_and_parse(&response, "numtrackers")?;
        let count: i64 = args.next()?;
        let version_str = args.next_str()?;

        if count < 0 {
            return Err(DriverError::InvalidTrackerCount(count));
        }
        let compatible = SemVer::parse(version_str)
            .map(|v| v.compatible(&self.expected_version))
            .unwrap_or(false);
        if !compatible {
            return Err(DriverError::Incompatible {
                found: version_str.to_string(),
                expected: self.expected_version,
            });
        }
        Ok(count as usize)
    }

    /// `addtracker <name> <role>` -> `added`
    pub fn add_tracker(&mut self, name: &str, role: &str) -> Result<(), DriverError> {
        let response = self.round_trip(Command::new("addtracker").arg(name).arg(role).build())?;
        verify_and_parse(&response, "added")?;
        Ok(())
    }

    /// `addstation` -> `added`
    pub fn add_station(&mut self) -> Result<(), DriverError> {
        let response = self.round_trip(Command::new("addstation").build())?;
        verify_and_parse(&response, "added")?;
        Ok(())
    }

    /// `updatepose <id> <pose> <time offset> <smoothing>` -> `updated`
    pub fn update_tracker(
        &mut self,
        id: usize,
        pose: &Pose,
        frame_time: f64,
        smoothing: f64,
    ) -> Result<(), DriverError> {
        let request = Command::new("updatepose")
            .arg(id)
            .arg(*pose)
            .arg(frame_time)
            .arg(smoothing)
            .build();
        let response = self.round_trip(request)?;
        verify_and_parse(&response, "updated")?;
        Ok(())
    }

    /// `updatestation <id> <pose>` -> `updated`
    pub fn update_station(&mut self, id: usize, pose: &Pose) -> Result<(), DriverError> {
        let response = self.round_trip(Command::new("updatestation").arg(id).arg(*pose).build())?;
        verify_and_parse(&response, "updated")?;
        Ok(())
    }

    /// `settings <saved> <factor> <additional>` -> `changed`
    pub fn set_smoothing(&mut self, settings: &DriverSettings) -> Result<(), DriverError> {
        let request = Command::new("settings")
            .arg(settings.saved_frames)
            .arg(settings.smoothing_factor)
            .arg(settings.additional_smoothing)
            .build();
        let response = self.round_trip(request)?;
        verify_and_parse(&response, "changed")?;
        Ok(())
    }

    /// `gettrackerpose <id> <time offset>` -> `trackerpose <id> <pose> <status>`
    ///
    /// `None` when the driver has no valid pose (status != 0).
    pub fn get_tracker(&mut self, id: usize, time_offset: f64) -> Result<Option<Pose>, DriverError> {
        let response = self.round_trip(Command::new("gettrackerpose").arg(id).arg(time_offset).build())?;
        let mut args = verify_and_parse(&response, "trackerpose")?;
        let found: i64 = args.next()?;
        let pose = args.next_pose()?;
        let status: i32 = args.next()?;
        if found != id as i64 {
            return Err(DriverError::UnexpectedTrackerId {
                expected: id,
                found,
            });
        }
        Ok((status == 0).then_some(pose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Replies from a fixed script and records what was sent.
    struct ScriptedClient {
        replies: VecDeque<io::Result<String>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedClient {
        fn new(replies: &[&str]) -> (Self, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let client = Self {
                replies: replies.iter().map(|r| Ok(r.to_string())).collect(),
                sent: sent.clone(),
            };
            (client, sent)
        }
    }

    impl IpcClient for ScriptedClient {
        fn send_recv(&mut self, request: &str) -> io::Result<String> {
            self.sent.lock().unwrap().push(request.to_string());
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")))
        }
    }

    fn settings() -> DriverSettings {
        DriverSettings {
            saved_frames: 120,
            smoothing_factor: 0.5,
            additional_smoothing: 0.0,
        }
    }

    fn scripted(replies: &[&str]) -> (VrDriver, Arc<Mutex<Vec<String>>>) {
        let (client, sent) = ScriptedClient::new(replies);
        (VrDriver::new(Box::new(client), DRIVER_VERSION), sent)
    }

    #[test]
    fn test_tracker_count() {
        let (mut driver, sent) = scripted(&["numtrackers 3 0.6.1"]);
        assert_eq!(driver.tracker_count().unwrap(), 3);
        assert_eq!(sent.lock().unwrap()[0], "numtrackers");
    }

    #[test]
    fn test_tracker_count_prerelease_version() {
        let (mut driver, _) = scripted(&["numtrackers 2 0.6.0-rc1"]);
        assert_eq!(driver.tracker_count().unwrap(), 2);
    }

    #[test]
    fn test_tracker_count_incompatible_version() {
        let (mut driver, _) = scripted(&["numtrackers 0 0.5.0"]);
        match driver.tracker_count() {
            Err(DriverError::Incompatible { found, expected }) => {
                assert_eq!(found, "0.5.0");
                assert_eq!(expected, DRIVER_VERSION);
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_tracker_count_negative() {
        let (mut driver, _) = scripted(&["numtrackers -1 0.6.0"]);
        assert!(matches!(
            driver.tracker_count(),
            Err(DriverError::InvalidTrackerCount(-1))
        ));
    }

    #[test]
    fn test_update_tracker_request() {
        let (mut driver, sent) = scripted(&["updated"]);
        let pose = Pose::from_components([1.0, 2.0, 3.0], 1.0, 0.0, 0.0, 0.0);
        driver.update_tracker(2, &pose, -0.05, 0.5).unwrap();
        assert_eq!(
            sent.lock().unwrap()[0],
            "updatepose 2 1.000000 2.000000 3.000000 1.000000 0.000000 0.000000 0.000000 -0.050000 0.500000"
        );
    }

    #[test]
    fn test_update_tracker_failure_response() {
        let (mut driver, _) = scripted(&["idinvalid"]);
        let err = driver
            .update_tracker(9, &Pose::identity(), 0.0, 0.0)
            .unwrap_err();
        assert!(!err.is_transport());
        assert!(err.to_string().contains("idinvalid"));
    }

    #[test]
    fn test_timeout_is_transport_error() {
        let (mut driver, _) = scripted(&[]);
        let err = driver.add_station().unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_get_tracker_status() {
        let (mut driver, sent) = scripted(&[
            "trackerpose 1 0.1 0.2 0.3 1 0 0 0 0",
            "trackerpose 1 0 0 0 1 0 0 0 -1",
        ]);
        let pose = driver.get_tracker(1, -0.016).unwrap().unwrap();
        assert!((pose.position.z - 0.3).abs() < 1e-9);
        assert!(driver.get_tracker(1, 0.0).unwrap().is_none());
        assert_eq!(sent.lock().unwrap()[0], "gettrackerpose 1 -0.016000");
    }

    #[test]
    fn test_get_tracker_wrong_id() {
        let (mut driver, _) = scripted(&["trackerpose 2 0 0 0 1 0 0 0 0"]);
        assert!(matches!(
            driver.get_tracker(1, 0.0),
            Err(DriverError::UnexpectedTrackerId { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn test_connect_registers_missing_trackers() {
        let roles = [TrackerRole::Waist, TrackerRole::LeftFoot, TrackerRole::RightFoot];
        let (client, sent) = ScriptedClient::new(&[
            "numtrackers 1 0.6.0",
            "added",
            "added",
            "numtrackers 3 0.6.0",
            "added",
            "changed",
        ]);
        VrDriver::connect(Box::new(client), DRIVER_VERSION, &roles, &settings()).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[1], "addtracker ApriltagTracker1 TrackerRole_LeftFoot");
        assert_eq!(sent[2], "addtracker ApriltagTracker2 TrackerRole_RightFoot");
        assert_eq!(sent[4], "addstation");
        assert_eq!(sent[5], "settings 120 0.500000 0.000000");
    }

    #[test]
    fn test_connect_against_debug_driver() {
        let roles = [TrackerRole::Waist, TrackerRole::Disabled];
        let stub = DebugDriver::new(DRIVER_VERSION);
        let mut driver =
            VrDriver::connect(Box::new(stub), DRIVER_VERSION, &roles, &settings()).unwrap();

        assert_eq!(driver.tracker_count().unwrap(), 2);
        assert!(driver.get_tracker(0, 0.0).unwrap().is_none());
        let pose = Pose::from_components([0.0, 1.0, 0.0], 1.0, 0.0, 0.0, 0.0);
        driver.update_tracker(0, &pose, 0.0, 0.5).unwrap();
        let back = driver.get_tracker(0, 0.0).unwrap().unwrap();
        assert!((back.position.y - 1.0).abs() < 1e-9);
        driver.update_station(0, &Pose::identity()).unwrap();
    }

    #[test]
    fn test_connect_registration_incomplete() {
        let roles = [TrackerRole::Waist];
        let (client, _) = ScriptedClient::new(&["numtrackers 0 0.6.0", "added", "numtrackers 0 0.6.0"]);
        match VrDriver::connect(Box::new(client), DRIVER_VERSION, &roles, &settings()) {
            Err(DriverError::RegistrationIncomplete {
                expected,
                registered,
            }) => {
                assert_eq!(expected, 1);
                assert_eq!(registered, 0);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("connect should fail"),
        }
    }
}
