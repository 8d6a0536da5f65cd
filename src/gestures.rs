use crate::config::Thresholds;
use crate::geometry::{distance, mean};
use crate::landmarks::LandmarkSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureLabel {
    Open,
    Closed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureSignal {
    Hand(GestureLabel),
    Neutral,
}

impl GestureSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            GestureSignal::Hand(GestureLabel::Open) => "open",
            GestureSignal::Hand(GestureLabel::Closed) => "closed",
            GestureSignal::Hand(GestureLabel::Unknown) => "unknown",
            GestureSignal::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FingerSpread {
    pub avg_tip_to_mcp: f32,
    pub avg_tip_to_pip: f32,
}

impl FingerSpread {
    pub fn measure(set: &LandmarkSet) -> Self {
        let fingers = set.fingers();
        let tip_to_mcp = fingers.map(|f| distance(&f.tip, &f.mcp));
        let tip_to_pip = fingers.map(|f| distance(&f.tip, &f.pip));
        Self {
            avg_tip_to_mcp: mean(&tip_to_mcp),
            avg_tip_to_pip: mean(&tip_to_pip),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GestureClassifier {
    th: Thresholds,
}

impl GestureClassifier {
    pub fn new(th: Thresholds) -> Self {
        Self { th }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.th
    }

    pub fn classify(&self, set: &LandmarkSet) -> GestureLabel {
        self.decide(FingerSpread::measure(set))
    }

    /// Strict comparisons: a spread exactly on a cut-off is not in that region.
    pub fn decide(&self, spread: FingerSpread) -> GestureLabel {
        let th = &self.th;
        if spread.avg_tip_to_mcp > th.open_tip_to_mcp && spread.avg_tip_to_pip > th.open_tip_to_pip
        {
            GestureLabel::Open
        } else if spread.avg_tip_to_mcp < th.closed_tip_to_mcp
            && spread.avg_tip_to_pip < th.closed_tip_to_pip
        {
            GestureLabel::Closed
        } else {
            GestureLabel::Unknown
        }
    }
}

impl Default for GestureClassifier {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
