use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

impl LandmarkPoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finger {
    Index,
    Middle,
    Ring,
    Little,
}

impl Finger {
    pub const ALL: [Finger; 4] = [Finger::Index, Finger::Middle, Finger::Ring, Finger::Little];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    Tip,
    Mcp,
    Pip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkId {
    IndexTip,
    IndexMcp,
    IndexPip,
    MiddleTip,
    MiddleMcp,
    MiddlePip,
    RingTip,
    RingMcp,
    RingPip,
    LittleTip,
    LittleMcp,
    LittlePip,
}

impl LandmarkId {
    pub fn of(finger: Finger, joint: Joint) -> Self {
        use Finger::*;
        use Joint::*;
        match (finger, joint) {
            (Index, Tip) => LandmarkId::IndexTip,
            (Index, Mcp) => LandmarkId::IndexMcp,
            (Index, Pip) => LandmarkId::IndexPip,
            (Middle, Tip) => LandmarkId::MiddleTip,
            (Middle, Mcp) => LandmarkId::MiddleMcp,
            (Middle, Pip) => LandmarkId::MiddlePip,
            (Ring, Tip) => LandmarkId::RingTip,
            (Ring, Mcp) => LandmarkId::RingMcp,
            (Ring, Pip) => LandmarkId::RingPip,
            (Little, Tip) => LandmarkId::LittleTip,
            (Little, Mcp) => LandmarkId::LittleMcp,
            (Little, Pip) => LandmarkId::LittlePip,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandPose {
    points: HashMap<LandmarkId, LandmarkPoint>,
}

impl HandPose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: LandmarkId, point: LandmarkPoint) {
        self.points.insert(id, point);
    }

    pub fn remove(&mut self, id: LandmarkId) -> Option<LandmarkPoint> {
        self.points.remove(&id)
    }

    pub fn get(&self, id: LandmarkId) -> Option<&LandmarkPoint> {
        self.points.get(&id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FingerPoints {
    pub tip: LandmarkPoint,
    pub mcp: LandmarkPoint,
    pub pip: LandmarkPoint,
}

#[derive(Debug, Clone, Copy)]
pub struct LandmarkSet {
    fingers: [FingerPoints; 4],
}

impl LandmarkSet {
    /// `None` when any required point is absent or below `min_confidence`.
    pub fn from_pose(pose: &HandPose, min_confidence: f32) -> Option<Self> {
        let usable = |finger: Finger, joint: Joint| {
            pose.get(LandmarkId::of(finger, joint))
                .copied()
                .filter(|p| p.confidence >= min_confidence)
        };
        let finger = |f: Finger| -> Option<FingerPoints> {
            Some(FingerPoints {
                tip: usable(f, Joint::Tip)?,
                mcp: usable(f, Joint::Mcp)?,
                pip: usable(f, Joint::Pip)?,
            })
        };
        let [index, middle, ring, little] = Finger::ALL.map(finger);
        Some(Self {
            fingers: [index?, middle?, ring?, little?],
        })
    }

    pub fn fingers(&self) -> &[FingerPoints; 4] {
        &self.fingers
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A hand whose four fingers all sit at the given tip→MCP and tip→PIP
    /// separations, laid out vertically so the distances are exact offsets.
    pub fn uniform_hand(tip_to_mcp: f32, tip_to_pip: f32) -> HandPose {
        let mut pose = HandPose::new();
        for (i, finger) in Finger::ALL.into_iter().enumerate() {
            let x = 0.2 + 0.15 * i as f32;
            let tip_y = 0.1;
            pose.insert(
                LandmarkId::of(finger, Joint::Tip),
                LandmarkPoint::new(x, tip_y, 0.9),
            );
            pose.insert(
                LandmarkId::of(finger, Joint::Pip),
                LandmarkPoint::new(x, tip_y + tip_to_pip, 0.9),
            );
            pose.insert(
                LandmarkId::of(finger, Joint::Mcp),
                LandmarkPoint::new(x, tip_y + tip_to_mcp, 0.9),
            );
        }
        pose
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::uniform_hand;
    use super::*;

    #[test]
    fn complete_pose_yields_set() {
        let set = LandmarkSet::from_pose(&uniform_hand(0.2, 0.15), 0.3).expect("complete");
        assert_eq!(set.fingers().len(), 4);
    }

    #[test]
    fn missing_little_tip_yields_none() {
        let mut pose = uniform_hand(0.2, 0.15);
        pose.remove(LandmarkId::LittleTip);
        assert!(LandmarkSet::from_pose(&pose, 0.3).is_none());
    }

    #[test]
    fn low_confidence_point_yields_none() {
        let mut pose = uniform_hand(0.2, 0.15);
        pose.insert(LandmarkId::RingPip, LandmarkPoint::new(0.5, 0.5, 0.1));
        assert!(LandmarkSet::from_pose(&pose, 0.3).is_none());
        assert!(LandmarkSet::from_pose(&pose, 0.05).is_some());
    }

    #[test]
    fn pose_reads_snake_case_keys() {
        let pose: HandPose =
            serde_json::from_str(r#"{"index_tip": {"x": 0.1, "y": 0.2}}"#).unwrap();
        let p = pose.get(LandmarkId::IndexTip).unwrap();
        assert_eq!((p.x, p.y, p.confidence), (0.1, 0.2, 1.0));
        assert!(pose.get(LandmarkId::IndexMcp).is_none());
    }
}
