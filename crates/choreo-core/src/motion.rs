//! Choreography model: poses, actions, moves and ordered move sets
//!
//! A choreography is an ordered list of move sets. Each move carries the pose
//! its device starts from and the pose it ends at; the start pose is always
//! the end pose of the same device's most recent earlier move, or the
//! device's home position if it has not moved yet.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{Device, DeviceId};
use crate::geometry::Point5;
use crate::rig::Rig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContinuityError {
    #[error("Move references device {0} which is not in the rig")]
    UnknownDevice(DeviceId),
    #[error("Move set {set_index}: start pose of device {device} does not continue its previous move")]
    Broken { set_index: usize, device: DeviceId },
}

/// Tag identifying an [`Action`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Focus,
    FocusStack,
    NoOp,
    Pause,
    ShutterRelease,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Focus,
        ActionKind::FocusStack,
        ActionKind::NoOp,
        ActionKind::Pause,
        ActionKind::ShutterRelease,
    ];

    /// Document tag of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Focus => "Focus",
            ActionKind::FocusStack => "FocusStack",
            ActionKind::NoOp => "NoOp",
            ActionKind::Pause => "Pause",
            ActionKind::ShutterRelease => "ShutterRelease",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_shutter_count() -> u32 {
    1
}

/// Something a device does once it reaches a pose
///
/// Serialized with the variant name under `type` and the parameters beside it,
/// e.g. `{"type": "FocusStack", "steps": 5, "step_size": 0.2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Focus the camera, at a fixed distance if given, otherwise automatically
    Focus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distance: Option<f64>,
    },
    /// Capture a stack of exposures stepping the focus between them
    FocusStack { steps: u32, step_size: f64 },
    NoOp,
    /// Hold still for a number of seconds
    Pause { seconds: f64 },
    /// Trigger the shutter `count` times
    ShutterRelease {
        #[serde(default = "default_shutter_count")]
        count: u32,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Focus { .. } => ActionKind::Focus,
            Action::FocusStack { .. } => ActionKind::FocusStack,
            Action::NoOp => ActionKind::NoOp,
            Action::Pause { .. } => ActionKind::Pause,
            Action::ShutterRelease { .. } => ActionKind::ShutterRelease,
        }
    }

    /// Name of the first parameter holding NaN or infinity, if any
    pub fn non_finite_field(&self) -> Option<&'static str> {
        match self {
            Action::Focus { distance: Some(d) } if !d.is_finite() => Some("distance"),
            Action::FocusStack { step_size, .. } if !step_size.is_finite() => Some("step_size"),
            Action::Pause { seconds } if !seconds.is_finite() => Some("seconds"),
            _ => None,
        }
    }
}

/// A device's position plus what it does on arrival
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose {
    pub position: Point5,
    pub actions: Vec<Action>,
}

impl Pose {
    /// A pose with no actions
    pub fn at(position: Point5) -> Self {
        Self {
            position,
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// How a device travels between two poses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveType {
    /// Straight line at feed rate
    Linear,
    /// Fastest path, no path guarantee
    Rapid,
    /// Passes through the move's waypoints in order
    Interpolated,
}

impl MoveType {
    pub const ALL: [MoveType; 3] = [MoveType::Linear, MoveType::Rapid, MoveType::Interpolated];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoveType::Linear => "Linear",
            MoveType::Rapid => "Rapid",
            MoveType::Interpolated => "Interpolated",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl std::fmt::Display for MoveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device's transition between two poses
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub device: DeviceId,
    pub move_type: MoveType,
    /// Intermediate path points for interpolated moves
    pub waypoints: Option<Vec<Point5>>,
    pub start_pose: Pose,
    pub end_pose: Pose,
}

impl Move {
    /// Create a move whose start pose is filled in when it joins a choreography
    pub fn new(device: DeviceId, move_type: MoveType, end_pose: Pose) -> Self {
        Self {
            device,
            move_type,
            waypoints: None,
            start_pose: Pose::default(),
            end_pose,
        }
    }

    pub fn with_waypoints(mut self, waypoints: Vec<Point5>) -> Self {
        self.waypoints = Some(waypoints);
        self
    }
}

/// Everything the participating devices do during one synchronized step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveSet {
    pub moves: Vec<Move>,
}

impl MoveSet {
    pub fn new(moves: Vec<Move>) -> Self {
        Self { moves }
    }

    /// The last move of `device` within this set
    pub fn move_for(&self, device: DeviceId) -> Option<&Move> {
        self.moves.iter().rev().find(|m| m.device == device)
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

/// A rig together with the ordered move sets it performs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Choreography {
    pub rig: Rig,
    pub move_sets: Vec<MoveSet>,
}

impl Choreography {
    pub fn new(rig: Rig) -> Self {
        Self {
            rig,
            move_sets: Vec::new(),
        }
    }

    /// End pose of the most recent move of `device` before move set `set_index`
    ///
    /// Scans move sets `set_index - 1` down to `0` and stops at the first set
    /// containing the device.
    pub fn previous_end_pose(&self, set_index: usize, device: DeviceId) -> Option<&Pose> {
        let end = set_index.min(self.move_sets.len());
        self.move_sets[..end]
            .iter()
            .rev()
            .find_map(|set| set.move_for(device))
            .map(|m| &m.end_pose)
    }

    /// The pose a move of `device` in move set `set_index` must start from
    pub fn chained_start_pose(&self, set_index: usize, device: DeviceId) -> Result<Pose, ContinuityError> {
        if let Some(pose) = self.previous_end_pose(set_index, device) {
            return Ok(pose.clone());
        }
        self.rig
            .device(device)
            .map(Device::home_pose)
            .ok_or(ContinuityError::UnknownDevice(device))
    }

    /// Append a move set, filling in each move's start pose
    pub fn push_move_set(&mut self, mut move_set: MoveSet) -> Result<(), ContinuityError> {
        let index = self.move_sets.len();
        for mv in &mut move_set.moves {
            mv.start_pose = self.chained_start_pose(index, mv.device)?;
        }
        self.move_sets.push(move_set);
        Ok(())
    }

    /// Recompute every start pose from the chaining rule
    pub fn rechain(&mut self) -> Result<(), ContinuityError> {
        let mut starts = Vec::with_capacity(self.move_sets.len());
        for (index, set) in self.move_sets.iter().enumerate() {
            let poses = set
                .moves
                .iter()
                .map(|m| self.chained_start_pose(index, m.device))
                .collect::<Result<Vec<_>, _>>()?;
            starts.push(poses);
        }

        for (set, poses) in self.move_sets.iter_mut().zip(starts) {
            for (mv, pose) in set.moves.iter_mut().zip(poses) {
                mv.start_pose = pose;
            }
        }
        Ok(())
    }

    /// Find the first move whose start pose breaks the chaining rule
    pub fn check_continuity(&self) -> Result<(), ContinuityError> {
        for (index, set) in self.move_sets.iter().enumerate() {
            for mv in &set.moves {
                if mv.start_pose != self.chained_start_pose(index, mv.device)? {
                    return Err(ContinuityError::Broken {
                        set_index: index,
                        device: mv.device,
                    });
                }
            }
        }
        Ok(())
    }

    /// Sorted ids of every device referenced by a move
    pub fn devices_in_use(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .move_sets
            .iter()
            .flat_map(|set| set.moves.iter().map(|m| m.device))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
