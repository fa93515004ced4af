//! Required-role resolution.
//!
//! Which roles must act at a step is not a static table: it depends on the
//! track, the level and the category facts of the entity at call time. This
//! module is the single place that answers the question, and authorization,
//! quorum tracking and step listing all go through it.
use std::collections::BTreeSet;
use std::fmt;

use crate::category::CategoryFacts;
use crate::config::EngineConfig;
use crate::variant::{Track, select_approval_variant, select_signing_variant, step_at};

/// Technical reviewer (APJ) roles and the department that staffs each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum ApjRole {
    #[n(0)]
    Pn, // pharmacist, narcotics & precursors
    #[n(1)]
    Qa,
    #[n(2)]
    Hc, // halal committee, food recalls
}

impl ApjRole {
    pub fn code(&self) -> &'static str {
        match self {
            ApjRole::Pn => "PN",
            ApjRole::Qa => "QA",
            ApjRole::Hc => "HC",
        }
    }

    pub fn department(&self) -> &'static str {
        match self {
            ApjRole::Pn => "PN1",
            ApjRole::Qa => "QA",
            ApjRole::Hc => "HC",
        }
    }

    pub fn from_department(department: &str) -> Option<Self> {
        match normalize_department(department).as_str() {
            "PN1" | "PN" => Some(ApjRole::Pn),
            "QA" => Some(ApjRole::Qa),
            "HC" => Some(ApjRole::Hc),
            _ => None,
        }
    }
}

/// The four distinct verifier positions at the field verification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum VerificationRole {
    #[n(1)]
    RequesterPerformer,
    #[n(2)]
    RequesterSupervisor,
    #[n(3)]
    SafetyPerformer,
    #[n(4)]
    SafetySupervisor,
}

impl VerificationRole {
    pub const ALL: [VerificationRole; 4] = [
        VerificationRole::RequesterPerformer,
        VerificationRole::RequesterSupervisor,
        VerificationRole::SafetyPerformer,
        VerificationRole::SafetySupervisor,
    ];

    pub fn id(&self) -> u8 {
        match self {
            VerificationRole::RequesterPerformer => 1,
            VerificationRole::RequesterSupervisor => 2,
            VerificationRole::SafetyPerformer => 3,
            VerificationRole::SafetySupervisor => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.id() == id)
    }

    pub fn is_safety_side(&self) -> bool {
        matches!(self, VerificationRole::SafetyPerformer | VerificationRole::SafetySupervisor)
    }

    pub fn is_supervisor(&self) -> bool {
        matches!(self, VerificationRole::RequesterSupervisor | VerificationRole::SafetySupervisor)
    }

    /// Whether someone from `department` at `job_level` may fill this role.
    /// An unknown job level is not held against the actor.
    pub fn admits(
        &self,
        department: &str,
        job_level: Option<u8>,
        requester_department: &str,
        config: &EngineConfig,
    ) -> bool {
        let department = normalize_department(department);
        let side = if self.is_safety_side() {
            &config.safety_department
        } else {
            requester_department
        };
        if department != normalize_department(side) {
            return false;
        }

        match job_level {
            None => true,
            Some(level) if self.is_supervisor() => config.supervisor_job_levels.contains(&level),
            Some(level) => level == config.performer_job_level,
        }
    }

    /// Every role the actor could fill, in id order.
    pub fn candidates(
        department: &str,
        job_level: Option<u8>,
        requester_department: &str,
        config: &EngineConfig,
    ) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|r| r.admits(department, job_level, requester_department, config))
            .collect()
    }
}

/// The role an action fulfilled. Stored on history records as structured
/// data so quorum evaluation never parses display titles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub enum RoleCode {
    #[n(0)]
    Department(#[n(0)] String),
    #[n(1)]
    Apj(#[n(0)] ApjRole),
    #[n(2)]
    Verification(#[n(0)] VerificationRole),
}

impl RoleCode {
    pub fn department(code: &str) -> Self {
        RoleCode::Department(normalize_department(code))
    }

    /// Department that staffs this role, where one is fixed.
    pub fn staffing_department(&self) -> Option<String> {
        match self {
            RoleCode::Department(d) => Some(d.clone()),
            RoleCode::Apj(r) => Some(r.department().to_string()),
            RoleCode::Verification(_) => None,
        }
    }
}

impl fmt::Display for RoleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleCode::Department(d) => write!(f, "{d}"),
            RoleCode::Apj(r) => write!(f, "APJ {}", r.code()),
            RoleCode::Verification(r) => write!(f, "Verifier {}", r.id()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Manager,
    TechnicalReview,
    FieldVerification,
    HseAcknowledgement,
    FinalSignOff,
    Other,
}

impl StepKind {
    pub fn of(track: Track, level: u32) -> Self {
        match (track, level) {
            (Track::Approval, 1) => StepKind::Manager,
            (Track::Approval, 2) => StepKind::TechnicalReview,
            (Track::Approval, 3) => StepKind::FieldVerification,
            (Track::Approval, 4) => StepKind::FinalSignOff,
            (Track::Signing, 2) => StepKind::HseAcknowledgement,
            (Track::Signing, 3) => StepKind::TechnicalReview,
            (Track::Signing, 4) => StepKind::FinalSignOff,
            _ => StepKind::Other,
        }
    }

    /// Steps completed by several distinct parallel roles.
    pub fn is_multi_role(&self) -> bool {
        matches!(self, StepKind::TechnicalReview | StepKind::FieldVerification)
    }
}

/// Department rule an actor's grant must satisfy at a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartmentGate {
    Exact(String),
    AnyOf(BTreeSet<String>),
    /// Any grant for the level will do.
    Permissive,
}

impl DepartmentGate {
    pub fn admits(&self, department: &str) -> bool {
        let department = normalize_department(department);
        match self {
            DepartmentGate::Exact(d) => *d == department,
            DepartmentGate::AnyOf(set) => set.contains(&department),
            DepartmentGate::Permissive => true,
        }
    }

    pub fn required(&self) -> Vec<String> {
        match self {
            DepartmentGate::Exact(d) => vec![d.clone()],
            DepartmentGate::AnyOf(set) => set.iter().cloned().collect(),
            DepartmentGate::Permissive => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequirement {
    pub track: Track,
    pub level: u32,
    pub kind: StepKind,
    pub roles: BTreeSet<RoleCode>,
    pub needed: usize,
    pub gate: DepartmentGate,
}

impl StepRequirement {
    /// True when role resolution came back empty and any approver with a
    /// grant for the level is accepted.
    pub fn is_permissive(&self) -> bool {
        self.kind == StepKind::TechnicalReview && self.roles.is_empty()
    }
}

pub fn normalize_department(department: &str) -> String {
    department.trim().to_uppercase()
}

/// Approval level 2 only exists for categories that need a technical
/// reviewer. Every other level applies whenever the variant has it.
pub fn is_applicable(track: Track, level: u32, facts: &CategoryFacts) -> bool {
    match (track, level) {
        (Track::Approval, 2) => facts.is_precursor || facts.is_recall || facts.is_recall_and_precursor,
        _ => true,
    }
}

fn apj_roles(facts: &CategoryFacts, additive: bool) -> BTreeSet<RoleCode> {
    let mut roles = BTreeSet::new();
    if facts.is_recall_and_precursor {
        roles.insert(RoleCode::Apj(ApjRole::Pn));
        roles.insert(RoleCode::Apj(ApjRole::Qa));
        if !additive {
            return roles;
        }
    }

    if facts.is_precursor {
        roles.insert(RoleCode::Apj(ApjRole::Pn));
        if !additive {
            return roles;
        }
    }
    if facts.is_recall {
        roles.insert(RoleCode::Apj(ApjRole::Qa));
        if facts.is_food_product {
            roles.insert(RoleCode::Apj(ApjRole::Hc));
        }
    }
    roles
}

pub fn compute_required_roles(
    track: Track,
    level: u32,
    facts: &CategoryFacts,
    requester_department: &str,
    config: &EngineConfig,
) -> StepRequirement {
    let kind = StepKind::of(track, level);
    let single = |department: &str| {
        let code = normalize_department(department);
        (
            BTreeSet::from([RoleCode::Department(code.clone())]),
            DepartmentGate::Exact(code),
        )
    };

    let (roles, gate) = match kind {
        StepKind::Manager => single(requester_department),
        StepKind::HseAcknowledgement => single(&config.signing_hse_department),
        StepKind::FinalSignOff => match track {
            Track::Approval => single(&config.approval_final_department),
            Track::Signing => single(&config.signing_final_department),
        },
        StepKind::TechnicalReview => {
            // Signing aggregates many requests, so its reviewer set is the
            // union of what each category asks for.
            let mut roles = apj_roles(facts, track == Track::Signing);
            if track == Track::Signing && facts.includes_standard {
                roles.insert(RoleCode::department(requester_department));
            }
            let departments: BTreeSet<String> = roles.iter().filter_map(RoleCode::staffing_department).collect();
            let gate = if departments.is_empty() {
                DepartmentGate::Permissive
            } else {
                DepartmentGate::AnyOf(departments)
            };
            (roles, gate)
        }
        StepKind::FieldVerification => (
            VerificationRole::ALL.into_iter().map(RoleCode::Verification).collect(),
            DepartmentGate::AnyOf(BTreeSet::from([
                normalize_department(requester_department),
                normalize_department(&config.safety_department),
            ])),
        ),
        StepKind::Other => (BTreeSet::new(), DepartmentGate::Permissive),
    };

    // The step table's actor count is a floor. Aggregated signing reviews
    // can ask for more roles than the table lists.
    let variant = match track {
        Track::Approval => select_approval_variant(facts),
        Track::Signing => select_signing_variant(facts),
    };
    let floor = step_at(track, variant, level).map_or(1, |step| step.required_actor_count as usize);
    let needed = roles.len().max(floor);
    StepRequirement {
        track,
        level,
        kind,
        roles,
        needed,
        gate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval_l2(name: &str, food: bool) -> BTreeSet<RoleCode> {
        let facts = CategoryFacts::classify(name, food);
        compute_required_roles(Track::Approval, 2, &facts, "PR1", &EngineConfig::default()).roles
    }

    #[test]
    fn recall_and_precursor_needs_pn_and_qa_only() {
        assert_eq!(
            approval_l2("Recall & Prekursor", true),
            BTreeSet::from([RoleCode::Apj(ApjRole::Pn), RoleCode::Apj(ApjRole::Qa)])
        );
    }

    #[test]
    fn food_recall_needs_qa_and_hc() {
        assert_eq!(
            approval_l2("Recall", true),
            BTreeSet::from([RoleCode::Apj(ApjRole::Qa), RoleCode::Apj(ApjRole::Hc)])
        );
        assert_eq!(approval_l2("Recall", false), BTreeSet::from([RoleCode::Apj(ApjRole::Qa)]));
        assert_eq!(approval_l2("Prekursor & OOT", false), BTreeSet::from([RoleCode::Apj(ApjRole::Pn)]));
    }

    #[test]
    fn standard_skips_technical_review() {
        let facts = CategoryFacts::classify("Hormon", false);
        assert!(!is_applicable(Track::Approval, 2, &facts));
        assert!(is_applicable(Track::Approval, 3, &facts));
        assert!(is_applicable(Track::Signing, 3, &facts));

        let req = compute_required_roles(Track::Approval, 2, &facts, "PR1", &EngineConfig::default());
        assert!(req.is_permissive());
        assert_eq!(req.needed, 1);
    }

    #[test]
    fn manager_gate_is_the_requester_department() {
        let req = compute_required_roles(
            Track::Approval,
            1,
            &CategoryFacts::default(),
            " pr1 ",
            &EngineConfig::default(),
        );
        assert_eq!(req.kind, StepKind::Manager);
        assert!(req.gate.admits("PR1"));
        assert!(!req.gate.admits("QA"));
        assert_eq!(req.roles, BTreeSet::from([RoleCode::department("PR1")]));
    }

    #[test]
    fn field_verification_needs_four_roles() {
        let config = EngineConfig::default();
        let req = compute_required_roles(Track::Approval, 3, &CategoryFacts::default(), "PR1", &config);
        assert_eq!(req.needed, 4);
        assert!(req.gate.admits("KL"));
        assert!(req.gate.admits("PR1"));
        assert!(!req.gate.admits("QA"));
    }

    #[test]
    fn signing_review_is_additive() {
        let config = EngineConfig::default();
        let facts = CategoryFacts::aggregate([("Recall", true), ("Prekursor & OOT", false), ("Hormon", false)]);
        let req = compute_required_roles(Track::Signing, 3, &facts, "PR2", &config);

        assert_eq!(
            req.roles,
            BTreeSet::from([
                RoleCode::Apj(ApjRole::Pn),
                RoleCode::Apj(ApjRole::Qa),
                RoleCode::Apj(ApjRole::Hc),
                RoleCode::department("PR2"),
            ])
        );
        assert_eq!(req.needed, 4);
        assert!(req.gate.admits("PN1"));
        assert!(req.gate.admits("PR2"));
    }

    #[test]
    fn needed_never_drops_below_the_step_table() {
        let config = EngineConfig::default();
        for name in ["Recall & Prekursor", "Recall", "Prekursor & OOT", "Hormon"] {
            for food in [false, true] {
                let facts = CategoryFacts::classify(name, food);
                for track in [Track::Approval, Track::Signing] {
                    let variant = select_approval_variant(&facts);
                    for step in crate::variant::steps(track, variant) {
                        let req = compute_required_roles(track, step.level, &facts, "PR1", &config);
                        assert!(req.needed >= step.required_actor_count as usize, "{name} {track:?} {}", step.level);
                    }
                }
            }
        }

        // Precursor plus standard requests: the table says one, the union says two.
        let facts = CategoryFacts::aggregate([("Prekursor & OOT", false), ("Hormon", false)]);
        let req = compute_required_roles(Track::Signing, 3, &facts, "PR1", &config);
        assert_eq!(req.roles, BTreeSet::from([RoleCode::Apj(ApjRole::Pn), RoleCode::department("PR1")]));
        assert_eq!(req.needed, 2);
    }

    #[test]
    fn signing_fixed_departments() {
        let config = EngineConfig::default();
        let facts = CategoryFacts::default();
        assert!(compute_required_roles(Track::Signing, 2, &facts, "PR2", &config).gate.admits("KL"));
        assert!(compute_required_roles(Track::Signing, 4, &facts, "PR2", &config).gate.admits("PL"));
        assert!(!compute_required_roles(Track::Signing, 4, &facts, "PR2", &config).gate.admits("KL"));
    }

    #[test]
    fn verification_roles_respect_side_and_job_level() {
        let config = EngineConfig::default();

        assert!(VerificationRole::SafetyPerformer.admits("KL", Some(7), "PR1", &config));
        assert!(!VerificationRole::SafetyPerformer.admits("KL", Some(5), "PR1", &config));
        assert!(VerificationRole::SafetySupervisor.admits("kl", Some(6), "PR1", &config));
        assert!(!VerificationRole::RequesterPerformer.admits("KL", Some(7), "PR1", &config));
        assert!(VerificationRole::RequesterSupervisor.admits("PR1", None, "PR1", &config));

        assert_eq!(
            VerificationRole::candidates("PR1", Some(7), "PR1", &config),
            vec![VerificationRole::RequesterPerformer]
        );
        assert_eq!(
            VerificationRole::candidates("KL", None, "PR1", &config),
            vec![VerificationRole::SafetyPerformer, VerificationRole::SafetySupervisor]
        );
    }

    #[test]
    fn apj_department_mapping() {
        assert_eq!(ApjRole::from_department("pn1"), Some(ApjRole::Pn));
        assert_eq!(ApjRole::from_department("HC"), Some(ApjRole::Hc));
        assert_eq!(ApjRole::from_department("KL"), None);
        assert_eq!(ApjRole::Pn.department(), "PN1");
    }
}
