//! Choreo Core - Rig registry, choreography model, and move-set documents
//!
//! This crate provides the foundational types for the Choreo system:
//! - Geometry primitives (points, bounding boxes)
//! - Device registry with device groups, addressed by integer handles
//! - Choreography model: poses, actions, moves, and ordered move sets
//! - Move-set document codec with deduplicated devices and pose chaining

pub mod codec;
pub mod device;
pub mod geometry;
pub mod motion;
pub mod rig;

pub use codec::{decode, encode, load_project, save_project, CodecError, MoveSetDocument};
pub use device::{Device, DeviceGroup, DeviceId, DeviceSettings, GroupId};
pub use geometry::{BoundingBox, Point3, Point5};
pub use motion::{Action, ActionKind, Choreography, ContinuityError, Move, MoveSet, MoveType, Pose};
pub use rig::{Rig, RigConfig, RigError};
