//! Training session catalog served over HTTP alongside the relay.
//!
//! Plain immutable records; nothing here touches session membership.

use serde::Serialize;
use std::collections::HashMap;

/// One exercise in a training plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSet {
    pub id: String,
    pub name: String,
    pub repeats: u32,
    pub set_repeats: u32,
    pub intensity: u32,
    /// Seconds per repeat
    pub timer: u32,
    pub image: String,
    /// Set performed between repeats
    pub relax_id: String,
}

impl TrainingSet {
    fn preset(id: &str, name: &str, repeats: u32, intensity: u32, timer: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            repeats,
            set_repeats: 1,
            intensity,
            timer,
            image: String::new(),
            relax_id: "bothHandsDown".to_string(),
        }
    }

    pub fn left_hand_up() -> Self {
        Self::preset("leftHandUp", "Left Hand-up", 2, 1, 5)
    }

    pub fn right_hand_up() -> Self {
        Self::preset("rightHandUp", "Right Hand-up", 2, 0, 3)
    }

    pub fn both_hands_up() -> Self {
        Self::preset("bothHandUp", "Both Hands-up", 1, 2, 3)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingPlan {
    pub name: String,
    pub description: String,
    pub image: String,
    pub session: Vec<TrainingSet>,
    avg_intensity: u32,
}

impl TrainingPlan {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        image: impl Into<String>,
        session: Vec<TrainingSet>,
    ) -> Self {
        let avg_intensity = average_intensity(&session);
        Self {
            name: name.into(),
            description: description.into(),
            image: image.into(),
            session,
            avg_intensity,
        }
    }

    pub fn stub() -> Self {
        Self::new(
            "Stub",
            "A stub session of checking.",
            "",
            vec![
                TrainingSet::left_hand_up(),
                TrainingSet::right_hand_up(),
                TrainingSet::both_hands_up(),
            ],
        )
    }

    #[allow(dead_code)]
    pub fn avg_intensity(&self) -> u32 {
        self.avg_intensity
    }
}

/// Integer mean, rounded down; 0 for an empty plan.
fn average_intensity(sets: &[TrainingSet]) -> u32 {
    if sets.is_empty() {
        return 0;
    }
    let total: u64 = sets.iter().map(|s| u64::from(s.intensity)).sum();
    (total / sets.len() as u64) as u32
}

/// Read-only plan lookup keyed by session id.
#[derive(Debug, Clone)]
pub struct TrainingCatalog {
    default_plan: TrainingPlan,
    plans: HashMap<String, TrainingPlan>,
}

impl Default for TrainingCatalog {
    fn default() -> Self {
        Self::new(TrainingPlan::stub())
    }
}

impl TrainingCatalog {
    pub fn new(default_plan: TrainingPlan) -> Self {
        Self {
            default_plan,
            plans: HashMap::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_plan(mut self, key: impl Into<String>, plan: TrainingPlan) -> Self {
        self.plans.insert(key.into(), plan);
        self
    }

    /// The plan registered under `key`, or the default plan.
    pub fn get(&self, key: &str) -> &TrainingPlan {
        self.plans.get(key).unwrap_or(&self.default_plan)
    }
}
