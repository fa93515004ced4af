//! Workflow variants and their fixed step tables.
use crate::category::CategoryFacts;
use crate::config::EngineConfig;

/// Which of the two workflows an entity runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum Track {
    #[n(0)]
    Approval, // disposal requests
    #[n(1)]
    Signing, // signing events (berita acara)
}

impl Track {
    /// Application code the directory files this track's grants under.
    pub fn application<'a>(&self, config: &'a EngineConfig) -> &'a str {
        match self {
            Track::Approval => &config.approval_application,
            Track::Signing => &config.signing_application,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum WorkflowVariant {
    #[n(1)]
    PrecursorOot,
    #[n(2)]
    Recall,
    #[n(3)]
    Standard,
    #[n(4)]
    RecallPrecursor,
    #[n(5)]
    RecallFoodProduct,
}

impl WorkflowVariant {
    pub const ALL: [WorkflowVariant; 5] = [
        WorkflowVariant::PrecursorOot,
        WorkflowVariant::Recall,
        WorkflowVariant::Standard,
        WorkflowVariant::RecallPrecursor,
        WorkflowVariant::RecallFoodProduct,
    ];

    pub fn id(&self) -> u8 {
        match self {
            WorkflowVariant::PrecursorOot => 1,
            WorkflowVariant::Recall => 2,
            WorkflowVariant::Standard => 3,
            WorkflowVariant::RecallPrecursor => 4,
            WorkflowVariant::RecallFoodProduct => 5,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.id() == id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowVariant::PrecursorOot => "Precursor & OOT",
            WorkflowVariant::Recall => "Recall",
            WorkflowVariant::Standard => "Standard",
            WorkflowVariant::RecallPrecursor => "Recall & Precursor",
            WorkflowVariant::RecallFoodProduct => "Recall (Produk Pangan)",
        }
    }

    /// Variants whose technical review needs two APJ signatures.
    fn has_dual_review(&self) -> bool {
        matches!(self, WorkflowVariant::RecallPrecursor | WorkflowVariant::RecallFoodProduct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowStep {
    pub level: u32,
    pub name: &'static str,
    pub required_actor_count: u32,
}

const fn step(level: u32, name: &'static str, required_actor_count: u32) -> WorkflowStep {
    WorkflowStep {
        level,
        name,
        required_actor_count,
    }
}

const APPROVAL_SINGLE_REVIEW: [WorkflowStep; 4] = [
    step(1, "Manager Approval", 1),
    step(2, "APJ Approval", 1),
    step(3, "Verifikasi Lapangan", 4),
    step(4, "HSE Manager", 1),
];

const APPROVAL_DUAL_REVIEW: [WorkflowStep; 4] = [
    step(1, "Manager Approval", 1),
    step(2, "APJ Approval", 2),
    step(3, "Verifikasi Lapangan", 4),
    step(4, "HSE Manager", 1),
];

const APPROVAL_STANDARD: [WorkflowStep; 3] = [
    step(1, "Manager Approval", 1),
    step(3, "Verifikasi Lapangan", 4),
    step(4, "HSE Manager", 1),
];

const SIGNING_SINGLE_REVIEW: [WorkflowStep; 3] = [
    step(2, "HSE Manager Signature", 1),
    step(3, "APJ Signature", 1),
    step(4, "Head of Plant Signature", 1),
];

const SIGNING_DUAL_REVIEW: [WorkflowStep; 3] = [
    step(2, "HSE Manager Signature", 1),
    step(3, "APJ Signature", 2),
    step(4, "Head of Plant Signature", 1),
];

const SIGNING_STANDARD: [WorkflowStep; 2] = [
    step(2, "HSE Manager Signature", 1),
    step(3, "Department Manager Signature", 1),
];

/// Ordered step table for a track and variant.
pub fn steps(track: Track, variant: WorkflowVariant) -> &'static [WorkflowStep] {
    match (track, variant) {
        (Track::Approval, WorkflowVariant::Standard) => &APPROVAL_STANDARD,
        (Track::Approval, v) if v.has_dual_review() => &APPROVAL_DUAL_REVIEW,
        (Track::Approval, _) => &APPROVAL_SINGLE_REVIEW,
        (Track::Signing, WorkflowVariant::Standard) => &SIGNING_STANDARD,
        (Track::Signing, v) if v.has_dual_review() => &SIGNING_DUAL_REVIEW,
        (Track::Signing, _) => &SIGNING_SINGLE_REVIEW,
    }
}

pub fn step_at(track: Track, variant: WorkflowVariant, level: u32) -> Option<&'static WorkflowStep> {
    steps(track, variant).iter().find(|s| s.level == level)
}

pub fn select_approval_variant(facts: &CategoryFacts) -> WorkflowVariant {
    if facts.is_recall_and_precursor {
        WorkflowVariant::RecallPrecursor
    } else if facts.is_precursor {
        WorkflowVariant::PrecursorOot
    } else if facts.is_recall {
        if facts.is_food_product {
            WorkflowVariant::RecallFoodProduct
        } else {
            WorkflowVariant::Recall
        }
    } else {
        WorkflowVariant::Standard
    }
}

/// Keyed on the aggregated facts of every request linked to an event.
pub fn select_signing_variant(facts: &CategoryFacts) -> WorkflowVariant {
    select_approval_variant(facts)
}
