use crate::error::CaptureError;

use super::CaptureBackend;

/// Label fragments that mark an environment-facing camera.
const REAR_LABEL_HINTS: [&str; 3] = ["back", "rear", "environment"];
/// Label fragments that mark a user-facing camera.
const FRONT_LABEL_HINTS: [&str; 3] = ["front", "user", "facetime"];

/// Which way a camera points, when the platform says so.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Facing {
    Front,
    Rear,
    #[default]
    Unknown,
}

impl Facing {
    /// Guess the facing from a human-readable device label.
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if REAR_LABEL_HINTS.iter().any(|hint| lower.contains(hint)) {
            Facing::Rear
        } else if FRONT_LABEL_HINTS.iter().any(|hint| lower.contains(hint)) {
            Facing::Front
        } else {
            Facing::Unknown
        }
    }
}

/// A video input device as seen at enumeration time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub label: String,
    pub facing: Facing,
}

impl Device {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            facing: Facing::from_label(&label),
            label,
        }
    }

    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }

    /// Label for display, falling back to a shortened id for unlabeled devices.
    pub fn display_label(&self) -> String {
        if self.label.trim().is_empty() {
            let short: String = self.id.chars().take(8).collect();
            format!("Camera {}", short)
        } else {
            self.label.clone()
        }
    }

    fn label_prefers_rear(&self) -> bool {
        let lower = self.label.to_lowercase();
        REAR_LABEL_HINTS.iter().any(|hint| lower.contains(hint))
    }
}

/// Lists capture devices through a backend.
pub struct DeviceEnumerator<'a> {
    backend: &'a dyn CaptureBackend,
}

impl<'a> DeviceEnumerator<'a> {
    pub fn new(backend: &'a dyn CaptureBackend) -> Self {
        Self { backend }
    }

    /// Current device list. The result replaces any earlier enumeration.
    pub fn list(&self) -> Result<Vec<Device>, CaptureError> {
        let devices = self.backend.enumerate()?;
        log::debug!(
            "DeviceEnumerator: {} device(s) via {}",
            devices.len(),
            self.backend.name()
        );
        Ok(devices)
    }

    /// Prefer a rear-facing label, then the first device.
    pub fn select_default(devices: &[Device]) -> Option<&Device> {
        devices
            .iter()
            .find(|device| device.label_prefers_rear())
            .or_else(|| devices.first())
    }
}
