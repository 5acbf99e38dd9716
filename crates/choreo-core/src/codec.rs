//! Move-set document codec
//!
//! A choreography shares devices and groups between many moves. The document
//! form flattens that sharing into id references and lists every device and
//! group exactly once:
//!
//! ```json
//! {
//!   "devices": [{"id": 1, "name": "cam", "group": 0, "home_position": {...},
//!                "range_3d": {...}, "settings": {...}}],
//!   "device_groups": [{"main_device": 1, "aux_devices": [2]}],
//!   "move_sets": [[{"device": 1, "type": "Linear", "destination": {...}}]]
//! }
//! ```
//!
//! Start poses are not stored; they are rebuilt from the end pose of each
//! device's previous move when the document is decoded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::device::{Device, DeviceGroup, DeviceId, DeviceSettings, GroupId};
use crate::geometry::{BoundingBox, Point5};
use crate::motion::{Action, ActionKind, Choreography, ContinuityError, Move, MoveSet, MoveType, Pose};
use crate::rig::{Rig, RigError};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Cannot encode non-finite number in {field}")]
    NonFinite { field: String },
    #[error("Unknown device id {0}")]
    UnknownDevice(DeviceId),
    #[error("Device group index {0} is out of range")]
    UnknownGroup(usize),
    #[error("Unsupported {kind} type \"{tag}\"")]
    UnsupportedVariant { kind: &'static str, tag: String },
    #[error("Action has no type tag")]
    MissingTag,
    #[error("Invalid rig: {0}")]
    Rig(#[from] RigError),
    #[error("Broken pose chain: {0}")]
    Continuity(#[from] ContinuityError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Serialized form of a choreography
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveSetDocument {
    pub devices: Vec<DeviceRecord>,
    pub device_groups: Vec<GroupRecord>,
    pub move_sets: Vec<Vec<MoveRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    /// Position of the device's group in `device_groups`
    pub group: usize,
    pub home_position: Point5,
    pub range_3d: BoundingBox,
    #[serde(default)]
    pub settings: DeviceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub main_device: DeviceId,
    #[serde(default)]
    pub aux_devices: Vec<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub device: DeviceId,
    #[serde(rename = "type")]
    pub move_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waypoints: Option<Vec<Point5>>,
    pub destination: PoseRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub position: Point5,
    /// Kept as raw JSON so unknown tags can be reported by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Value>>,
}

fn ensure_finite(finite: bool, field: impl FnOnce() -> String) -> Result<(), CodecError> {
    if finite {
        Ok(())
    } else {
        Err(CodecError::NonFinite { field: field() })
    }
}

/// Flatten a choreography into its document form
///
/// Every device referenced by a move is listed once, together with the other
/// members of its group so the document resolves on its own.
pub fn encode(choreo: &Choreography) -> Result<MoveSetDocument, CodecError> {
    let rig = &choreo.rig;

    let moved = choreo.devices_in_use();

    let mut group_order: Vec<GroupId> = Vec::new();
    for id in &moved {
        let device = rig.device(*id).ok_or(CodecError::UnknownDevice(*id))?;
        if !group_order.contains(&device.group) {
            group_order.push(device.group);
        }
    }

    let mut groups = Vec::with_capacity(group_order.len());
    let mut group_index = HashMap::with_capacity(group_order.len());
    let mut listed: Vec<DeviceId> = moved.clone();
    for (index, gid) in group_order.iter().enumerate() {
        let group = rig.group(*gid).ok_or(RigError::UnknownGroup(*gid))?;
        listed.extend(group.members());
        group_index.insert(*gid, index);
        groups.push(GroupRecord {
            main_device: group.main_device,
            aux_devices: group.aux_devices.clone(),
        });
    }
    listed.sort();
    listed.dedup();

    let mut devices = Vec::with_capacity(listed.len());
    for (i, id) in listed.iter().enumerate() {
        let device = rig.device(*id).ok_or(CodecError::UnknownDevice(*id))?;
        ensure_finite(device.home_position.is_finite(), || {
            format!("devices[{i}].home_position")
        })?;
        ensure_finite(device.range_3d.is_finite(), || format!("devices[{i}].range_3d"))?;
        let group = *group_index
            .get(&device.group)
            .ok_or(RigError::UnknownGroup(device.group))?;
        devices.push(DeviceRecord {
            id: device.id,
            name: device.name.clone(),
            group,
            home_position: device.home_position,
            range_3d: device.range_3d,
            settings: device.settings.clone(),
        });
    }

    let mut move_sets = Vec::with_capacity(choreo.move_sets.len());
    for (si, set) in choreo.move_sets.iter().enumerate() {
        let mut records = Vec::with_capacity(set.moves.len());
        for (mi, mv) in set.moves.iter().enumerate() {
            records.push(encode_move(mv, &format!("move_sets[{si}][{mi}]"))?);
        }
        move_sets.push(records);
    }

    debug!(
        devices = devices.len(),
        groups = groups.len(),
        move_sets = move_sets.len(),
        "Encoded choreography"
    );

    Ok(MoveSetDocument {
        devices,
        device_groups: groups,
        move_sets,
    })
}

fn encode_move(mv: &Move, path: &str) -> Result<MoveRecord, CodecError> {
    if let Some(waypoints) = &mv.waypoints {
        for (wi, wp) in waypoints.iter().enumerate() {
            ensure_finite(wp.is_finite(), || format!("{path}.waypoints[{wi}]"))?;
        }
    }

    let pose = &mv.end_pose;
    ensure_finite(pose.position.is_finite(), || {
        format!("{path}.destination.position")
    })?;

    let actions = if pose.actions.is_empty() {
        None
    } else {
        let mut values = Vec::with_capacity(pose.actions.len());
        for (ai, action) in pose.actions.iter().enumerate() {
            if let Some(field) = action.non_finite_field() {
                return Err(CodecError::NonFinite {
                    field: format!("{path}.destination.actions[{ai}].{field}"),
                });
            }
            values.push(serde_json::to_value(action)?);
        }
        Some(values)
    };

    Ok(MoveRecord {
        device: mv.device,
        move_type: mv.move_type.as_str().to_string(),
        waypoints: mv.waypoints.clone(),
        destination: PoseRecord {
            position: pose.position,
            actions,
        },
    })
}

/// Rebuild a choreography, its shared devices and its pose chain from a document
pub fn decode(doc: &MoveSetDocument) -> Result<Choreography, CodecError> {
    let known: HashSet<DeviceId> = doc.devices.iter().map(|d| d.id).collect();

    let mut rig = Rig::new();
    let mut group_ids = Vec::with_capacity(doc.device_groups.len());
    for record in &doc.device_groups {
        let mut group = DeviceGroup::new(record.main_device);
        for aux in &record.aux_devices {
            group.add_aux(*aux);
        }
        if let Some(missing) = group.members().find(|m| !known.contains(m)) {
            return Err(CodecError::UnknownDevice(missing));
        }
        group_ids.push(rig.add_group(group)?);
    }

    for record in &doc.devices {
        let group = *group_ids
            .get(record.group)
            .ok_or(CodecError::UnknownGroup(record.group))?;
        rig.add_device(Device {
            id: record.id,
            name: record.name.clone(),
            group,
            home_position: record.home_position,
            range_3d: record.range_3d,
            settings: record.settings.clone(),
        })?;
    }
    rig.validate()?;

    let mut choreo = Choreography::new(rig);
    for records in &doc.move_sets {
        let mut moves = Vec::with_capacity(records.len());
        for record in records {
            if choreo.rig.device(record.device).is_none() {
                return Err(CodecError::UnknownDevice(record.device));
            }
            moves.push(decode_move(record)?);
        }
        choreo.push_move_set(MoveSet::new(moves))?;
    }

    debug!(
        devices = choreo.rig.len(),
        move_sets = choreo.move_sets.len(),
        "Decoded choreography"
    );

    Ok(choreo)
}

fn decode_move(record: &MoveRecord) -> Result<Move, CodecError> {
    let move_type = MoveType::from_tag(&record.move_type).ok_or_else(|| {
        CodecError::UnsupportedVariant {
            kind: "move",
            tag: record.move_type.clone(),
        }
    })?;

    let actions = record
        .destination
        .actions
        .iter()
        .flatten()
        .map(decode_action)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Move {
        device: record.device,
        move_type,
        waypoints: record.waypoints.clone(),
        start_pose: Pose::default(),
        end_pose: Pose {
            position: record.destination.position,
            actions,
        },
    })
}

fn decode_action(value: &Value) -> Result<Action, CodecError> {
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingTag)?;
    if ActionKind::from_tag(tag).is_none() {
        return Err(CodecError::UnsupportedVariant {
            kind: "action",
            tag: tag.to_string(),
        });
    }
    Ok(serde_json::from_value(value.clone())?)
}

/// Serialize a choreography to compact JSON
pub fn to_json(choreo: &Choreography) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&encode(choreo)?)?)
}

/// Serialize a choreography to indented JSON
pub fn to_json_pretty(choreo: &Choreography) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(&encode(choreo)?)?)
}

/// Parse and decode a move-set document
pub fn from_json(content: &str) -> Result<Choreography, CodecError> {
    let doc: MoveSetDocument = serde_json::from_str(content)?;
    decode(&doc)
}

/// Write a choreography to a project file
///
/// The document is fully encoded before the file is touched, so a failed
/// encode leaves any existing file intact.
pub fn save_project(path: &Path, choreo: &Choreography) -> Result<(), CodecError> {
    let content = to_json_pretty(choreo)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    info!(path = %path.display(), move_sets = choreo.move_sets.len(), "Saved project");
    Ok(())
}

/// Read a choreography from a project file
pub fn load_project(path: &Path) -> Result<Choreography, CodecError> {
    let content = std::fs::read_to_string(path)?;
    let choreo = from_json(&content)?;
    info!(path = %path.display(), move_sets = choreo.move_sets.len(), "Loaded project");
    Ok(choreo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3;
    use serde_json::json;
    use tempfile::TempDir;

    fn p5(x: f64, y: f64, z: f64) -> Point5 {
        Point5::new(x, y, z, 0.0, 0.0)
    }

    fn shared_group_rig() -> Rig {
        let mut rig = Rig::new();
        let mut group = DeviceGroup::new(DeviceId(1));
        group.add_aux(DeviceId(2));
        let gid = rig.add_group(group).unwrap();

        for (id, name) in [(1, "cam-left"), (2, "cam-right")] {
            let mut device = Device::new(DeviceId(id), name, Point5::default());
            device.group = gid;
            device.range_3d = BoundingBox::from_points(&[
                Point3::new(-1.0, -1.0, 0.0),
                Point3::new(1.0, 1.0, 2.0),
            ]);
            device.settings.insert("feed_rate", 1200);
            rig.add_device(device).unwrap();
        }
        rig
    }

    fn sample_choreography() -> Choreography {
        let mut choreo = Choreography::new(shared_group_rig());
        choreo
            .push_move_set(MoveSet::new(vec![
                Move::new(
                    DeviceId(1),
                    MoveType::Linear,
                    Pose::at(p5(0.5, 0.0, 1.0)).with_action(Action::Focus { distance: None }),
                ),
                Move::new(DeviceId(2), MoveType::Rapid, Pose::at(p5(-0.5, 0.0, 1.0))),
            ]))
            .unwrap();
        choreo
            .push_move_set(MoveSet::new(vec![Move::new(
                DeviceId(1),
                MoveType::Interpolated,
                Pose::at(p5(0.5, 0.5, 1.5))
                    .with_action(Action::FocusStack {
                        steps: 4,
                        step_size: 0.25,
                    })
                    .with_action(Action::ShutterRelease { count: 2 }),
            )
            .with_waypoints(vec![p5(0.5, 0.2, 1.2), p5(0.5, 0.4, 1.4)])]))
            .unwrap();
        choreo
            .push_move_set(MoveSet::new(vec![Move::new(
                DeviceId(2),
                MoveType::Linear,
                Pose::at(p5(-0.5, 0.5, 1.0)).with_action(Action::Pause { seconds: 1.5 }),
            )]))
            .unwrap();
        choreo
    }

    #[test]
    fn test_round_trip() {
        let original = sample_choreography();
        let json = to_json(&original).unwrap();
        let decoded = from_json(&json).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.rig.group_of(DeviceId(2)).unwrap().main_device, DeviceId(1));
        // Device 2 skipped move set 1, so its chain reaches back to move set 0
        assert_eq!(decoded.move_sets[2].moves[0].start_pose.position, p5(-0.5, 0.0, 1.0));
    }

    #[test]
    fn test_shared_device_listed_once() {
        let mut choreo = Choreography::new(shared_group_rig());
        for x in [1.0, 2.0, 3.0] {
            choreo
                .push_move_set(MoveSet::new(vec![Move::new(
                    DeviceId(1),
                    MoveType::Linear,
                    Pose::at(p5(x, 0.0, 0.0)),
                )]))
                .unwrap();
        }

        let doc = encode(&choreo).unwrap();
        assert_eq!(doc.devices.iter().filter(|d| d.id == DeviceId(1)).count(), 1);
        assert_eq!(doc.device_groups.len(), 1);
        assert_eq!(doc.device_groups[0].main_device, DeviceId(1));
        assert_eq!(doc.device_groups[0].aux_devices, vec![DeviceId(2)]);
        assert!(doc.devices.iter().all(|d| d.group == 0));
    }

    #[test]
    fn test_pose_chaining_on_decode() {
        let doc = json!({
            "devices": [{
                "id": 5, "name": "cam", "group": 0,
                "home_position": {"x": 0.0, "y": 0.0, "z": 0.0, "p": 0.0, "t": 0.0},
                "range_3d": {"lower": {"x": -2.0, "y": -2.0, "z": -2.0},
                             "upper": {"x": 2.0, "y": 2.0, "z": 2.0}},
                "settings": {}
            }],
            "device_groups": [{"main_device": 5, "aux_devices": []}],
            "move_sets": [
                [{"device": 5, "type": "Linear",
                  "destination": {"position": {"x": 1.0, "y": 0.0, "z": 0.0, "p": 0.0, "t": 0.0}}}],
                [{"device": 5, "type": "Linear",
                  "destination": {"position": {"x": 2.0, "y": 0.0, "z": 0.0, "p": 0.0, "t": 0.0}}}]
            ]
        });

        let choreo = from_json(&doc.to_string()).unwrap();
        assert_eq!(choreo.move_sets[0].moves[0].start_pose.position, Point5::default());
        assert_eq!(choreo.move_sets[1].moves[0].start_pose.position, p5(1.0, 0.0, 0.0));
        assert!(choreo.move_sets[0].moves[0].start_pose.actions.is_empty());
    }

    #[test]
    fn test_absent_keys_are_omitted() {
        let choreo = sample_choreography();
        let value = serde_json::to_value(encode(&choreo).unwrap()).unwrap();

        let plain = &value["move_sets"][0][1];
        assert!(plain.get("waypoints").is_none());
        assert!(plain["destination"].get("actions").is_none());
        assert!(value["move_sets"][0][0].get("start_pose").is_none());

        let interpolated = &value["move_sets"][1][0];
        assert_eq!(interpolated["waypoints"].as_array().unwrap().len(), 2);
        assert_eq!(interpolated["destination"]["actions"][0]["type"], "FocusStack");
        assert_eq!(interpolated["destination"]["actions"][0]["steps"], 4);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut choreo = sample_choreography();
        choreo.move_sets[1].moves[0].end_pose.position.tilt = f64::NAN;

        match encode(&choreo) {
            Err(CodecError::NonFinite { field }) => {
                assert_eq!(field, "move_sets[1][0].destination.position")
            }
            other => panic!("expected NonFinite, got {:?}", other),
        }

        let mut choreo = sample_choreography();
        choreo.move_sets[2].moves[0].end_pose.actions = vec![Action::Pause {
            seconds: f64::INFINITY,
        }];
        assert!(matches!(encode(&choreo), Err(CodecError::NonFinite { .. })));
    }

    #[test]
    fn test_unbounded_range_rejected() {
        let mut choreo = sample_choreography();
        choreo.rig.device_mut(DeviceId(2)).unwrap().range_3d = BoundingBox::empty();
        assert!(matches!(encode(&choreo), Err(CodecError::NonFinite { .. })));
    }

    #[test]
    fn test_unknown_device_in_move() {
        let mut doc = encode(&sample_choreography()).unwrap();
        doc.move_sets[0][0].device = DeviceId(99);
        assert!(matches!(decode(&doc), Err(CodecError::UnknownDevice(DeviceId(99)))));
    }

    #[test]
    fn test_unknown_device_in_group() {
        let mut doc = encode(&sample_choreography()).unwrap();
        doc.device_groups[0].aux_devices.push(DeviceId(77));
        assert!(matches!(decode(&doc), Err(CodecError::UnknownDevice(DeviceId(77)))));
    }

    #[test]
    fn test_unknown_move_type() {
        let mut doc = encode(&sample_choreography()).unwrap();
        doc.move_sets[0][0].move_type = "Teleport".to_string();
        match decode(&doc) {
            Err(CodecError::UnsupportedVariant { kind, tag }) => {
                assert_eq!(kind, "move");
                assert_eq!(tag, "Teleport");
            }
            other => panic!("expected UnsupportedVariant, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_type() {
        let mut doc = encode(&sample_choreography()).unwrap();
        doc.move_sets[0][0].destination.actions = Some(vec![json!({"type": "Zoom", "level": 2})]);
        let err = decode(&doc).unwrap_err();
        assert!(err.to_string().contains("Zoom"));
    }

    #[test]
    fn test_group_index_out_of_range() {
        let mut doc = encode(&sample_choreography()).unwrap();
        doc.devices[1].group = 9;
        assert!(matches!(decode(&doc), Err(CodecError::UnknownGroup(9))));
    }

    #[test]
    fn test_action_without_type() {
        let mut doc = encode(&sample_choreography()).unwrap();
        doc.move_sets[0][0].destination.actions = Some(vec![json!({"distance": 1.5})]);
        assert!(matches!(decode(&doc), Err(CodecError::MissingTag)));
    }

    #[test]
    fn test_empty_actions_list_accepted() {
        let mut doc = encode(&sample_choreography()).unwrap();
        doc.move_sets[0][1].destination.actions = Some(Vec::new());
        let choreo = decode(&doc).unwrap();
        assert!(choreo.move_sets[0].moves[1].end_pose.actions.is_empty());
    }

    #[test]
    fn test_project_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shoots").join("session.json");
        let original = sample_choreography();

        save_project(&path, &original).unwrap();
        let loaded = load_project(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_failed_encode_keeps_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.json");
        save_project(&path, &sample_choreography()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let mut broken = sample_choreography();
        broken.move_sets[0].moves[0].end_pose.position.x = f64::NAN;
        assert!(save_project(&path, &broken).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }
}
