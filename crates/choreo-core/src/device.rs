//! Device types describing each physical unit of the rig

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::geometry::{BoundingBox, Point5};
use crate::motion::Pose;

/// Unique identifier for a device, stable for the lifetime of a rig configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a device group
///
/// A device belongs to exactly one group, so a group is identified by its
/// main device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub DeviceId);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

/// Per-device tunables (units, feed rate, ...)
///
/// The core does not interpret these; they are carried through the rig
/// configuration and the move-set document unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSettings(pub Map<String, Value>);

impl DeviceSettings {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A motion-controlled unit of the rig
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Unique device identifier
    pub id: DeviceId,
    /// Human-readable name
    pub name: String,
    /// Group this device belongs to
    pub group: GroupId,
    /// Position the device returns to before the first move
    pub home_position: Point5,
    /// Reachable envelope
    pub range_3d: BoundingBox,
    /// Opaque per-device tunables
    pub settings: DeviceSettings,
}

impl Device {
    /// Create a device that forms its own group
    pub fn new(id: DeviceId, name: impl Into<String>, home_position: Point5) -> Self {
        Self {
            id,
            name: name.into(),
            group: GroupId(id),
            home_position,
            range_3d: BoundingBox::empty(),
            settings: DeviceSettings::default(),
        }
    }

    /// The pose a device starts from before it has moved: home with no actions
    pub fn home_pose(&self) -> Pose {
        Pose::at(self.home_position)
    }

    /// Check whether a position lies inside the reachable envelope
    pub fn can_reach(&self, position: &Point5) -> bool {
        self.range_3d.contains(&position.location())
    }
}

/// A main device and the auxiliary devices moving with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub main_device: DeviceId,
    /// Ordered auxiliary members; never contains `main_device`
    pub aux_devices: Vec<DeviceId>,
}

impl DeviceGroup {
    pub fn new(main_device: DeviceId) -> Self {
        Self {
            main_device,
            aux_devices: Vec::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        GroupId(self.main_device)
    }

    /// Add an auxiliary member, ignoring the main device and duplicates
    pub fn add_aux(&mut self, device: DeviceId) {
        if device != self.main_device && !self.aux_devices.contains(&device) {
            self.aux_devices.push(device);
        }
    }

    /// All members, main device first
    pub fn members(&self) -> impl Iterator<Item = DeviceId> + '_ {
        std::iter::once(self.main_device).chain(self.aux_devices.iter().copied())
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.main_device == device || self.aux_devices.contains(&device)
    }
}
