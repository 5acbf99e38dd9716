//! Rig registry: the single owner of every device and device group
//!
//! Everything else refers to devices and groups through their handles
//! ([`DeviceId`], [`GroupId`]). Rig layouts are loaded from TOML:
//!
//! ```toml
//! [[group]]
//! main_device = 1
//! aux_devices = [2]
//!
//! [[device]]
//! id = 1
//! name = "cam-left"
//! home_position = { x = 0.0, y = 0.0, z = 0.0, p = 0.0, t = 0.0 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::device::{Device, DeviceGroup, DeviceId, DeviceSettings, GroupId};
use crate::geometry::{BoundingBox, Point5};

#[derive(Error, Debug)]
pub enum RigError {
    #[error("Failed to read rig configuration: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse rig configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Device {0} is defined more than once")]
    DuplicateDevice(DeviceId),
    #[error("Group {0} is defined more than once")]
    DuplicateGroup(GroupId),
    #[error("Group {0} does not exist")]
    UnknownGroup(GroupId),
    #[error("Device {device} already belongs to {group}")]
    AlreadyGrouped { device: DeviceId, group: GroupId },
    #[error("Device {device} claims {group} but the group does not list it")]
    NotInGroup { device: DeviceId, group: GroupId },
    #[error("{group} lists device {device} which is not defined")]
    MissingMember { group: GroupId, device: DeviceId },
}

/// Registry of devices and the groups they belong to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rig {
    devices: BTreeMap<DeviceId, Device>,
    groups: BTreeMap<GroupId, DeviceGroup>,
}

impl Rig {
    /// Create an empty rig
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group; its members are added afterwards with [`Rig::add_device`]
    pub fn add_group(&mut self, group: DeviceGroup) -> Result<GroupId, RigError> {
        let id = group.id();
        if self.groups.contains_key(&id) {
            return Err(RigError::DuplicateGroup(id));
        }
        for member in group.members() {
            if let Some(existing) = self.group_containing(member) {
                return Err(RigError::AlreadyGrouped {
                    device: member,
                    group: existing,
                });
            }
        }
        self.groups.insert(id, group);
        Ok(id)
    }

    /// Register a device; its group must already exist and list it
    pub fn add_device(&mut self, device: Device) -> Result<(), RigError> {
        if self.devices.contains_key(&device.id) {
            return Err(RigError::DuplicateDevice(device.id));
        }
        let group = self
            .groups
            .get(&device.group)
            .ok_or(RigError::UnknownGroup(device.group))?;
        if !group.contains(device.id) {
            return Err(RigError::NotInGroup {
                device: device.id,
                group: device.group,
            });
        }
        self.devices.insert(device.id, device);
        Ok(())
    }

    /// Remove a device and drop it from its group
    ///
    /// Removing a group's main device promotes the first auxiliary member;
    /// a group left without members is removed. Move sets referencing the
    /// device are not touched and become invalid.
    pub fn remove_device(&mut self, id: DeviceId) -> Option<Device> {
        let device = self.devices.remove(&id)?;
        let Some(mut group) = self.groups.remove(&device.group) else {
            return Some(device);
        };

        if group.main_device == id {
            if group.aux_devices.is_empty() {
                debug!(device = %id, "Removed last member, dissolving group");
                return Some(device);
            }
            group.main_device = group.aux_devices.remove(0);
            let new_id = group.id();
            for member in group.members() {
                if let Some(d) = self.devices.get_mut(&member) {
                    d.group = new_id;
                }
            }
            debug!(device = %id, group = %new_id, "Promoted auxiliary device to main");
        } else {
            group.aux_devices.retain(|d| *d != id);
        }

        self.groups.insert(group.id(), group);
        Some(device)
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    pub fn group(&self, id: GroupId) -> Option<&DeviceGroup> {
        self.groups.get(&id)
    }

    /// The group a device belongs to
    pub fn group_of(&self, id: DeviceId) -> Option<&DeviceGroup> {
        self.devices.get(&id).and_then(|d| self.groups.get(&d.group))
    }

    /// All devices ordered by id
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// All groups ordered by main device id
    pub fn groups(&self) -> impl Iterator<Item = &DeviceGroup> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Check that every group member is defined and every device sits in a
    /// group that lists it
    pub fn validate(&self) -> Result<(), RigError> {
        for group in self.groups.values() {
            for member in group.members() {
                if !self.devices.contains_key(&member) {
                    return Err(RigError::MissingMember {
                        group: group.id(),
                        device: member,
                    });
                }
            }
        }
        for device in self.devices.values() {
            let group = self
                .groups
                .get(&device.group)
                .ok_or(RigError::UnknownGroup(device.group))?;
            if !group.contains(device.id) {
                return Err(RigError::NotInGroup {
                    device: device.id,
                    group: device.group,
                });
            }
        }
        Ok(())
    }

    fn group_containing(&self, device: DeviceId) -> Option<GroupId> {
        self.groups
            .values()
            .find(|g| g.contains(device))
            .map(DeviceGroup::id)
    }

    /// Load a rig from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, RigError> {
        let config: RigConfig = toml::from_str(content)?;
        config.into_rig()
    }

    /// Load a rig from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, RigError> {
        let content = std::fs::read_to_string(path)?;
        let rig = Self::from_toml(&content)?;
        info!(
            path = %path.display(),
            devices = rig.devices.len(),
            groups = rig.groups.len(),
            "Loaded rig configuration"
        );
        Ok(rig)
    }
}

/// On-disk rig layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigConfig {
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupConfig>,
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub main_device: DeviceId,
    #[serde(default)]
    pub aux_devices: Vec<DeviceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub home_position: Point5,
    /// Omitted envelopes start empty
    #[serde(default)]
    pub range_3d: Option<BoundingBox>,
    #[serde(default)]
    pub settings: DeviceSettings,
}

impl RigConfig {
    /// Build the registry; devices not listed in any group form their own
    pub fn into_rig(self) -> Result<Rig, RigError> {
        let mut rig = Rig::new();

        for g in self.groups {
            let mut group = DeviceGroup::new(g.main_device);
            for aux in g.aux_devices {
                group.add_aux(aux);
            }
            rig.add_group(group)?;
        }

        for d in self.devices {
            let group = match rig.group_containing(d.id) {
                Some(group) => group,
                None => rig.add_group(DeviceGroup::new(d.id))?,
            };
            rig.add_device(Device {
                id: d.id,
                name: d.name,
                group,
                home_position: d.home_position,
                range_3d: d.range_3d.unwrap_or_default(),
                settings: d.settings,
            })?;
        }

        rig.validate()?;
        Ok(rig)
    }
}
