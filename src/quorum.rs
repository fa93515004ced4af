//! Quorum tracking for the current step.
//!
//! Multi-role steps are satisfied once every required role holds a positive
//! record in the current round. Each role counts at most once: a second
//! approval for a role that is already covered is reported back as
//! [`MarkerDecision::AlreadyRecorded`] and never written.
use std::collections::BTreeSet;

use crate::authz::{Authorization, AuthorizationSource};
use crate::config::EngineConfig;
use crate::context::WorkflowSubject;
use crate::error::{ValidationError, WorkflowError};
use crate::history::{ActionRecord, Outcome};
use crate::roles::{RoleCode, StepKind, StepRequirement, VerificationRole, is_applicable, normalize_department};
use crate::types::Status;
use crate::variant::steps;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumStatus {
    pub satisfied_roles: BTreeSet<RoleCode>,
    pub missing: BTreeSet<RoleCode>,
    pub approved: usize,
    pub satisfied: bool,
}

pub fn evaluate(requirement: &StepRequirement, records: &[&ActionRecord]) -> QuorumStatus {
    let positive: Vec<&ActionRecord> = records.iter().copied().filter(|r| r.outcome.is_positive()).collect();

    let satisfied_roles: BTreeSet<RoleCode> = positive
        .iter()
        .filter_map(|r| r.role_marker.clone())
        .filter(|m| requirement.roles.contains(m))
        .collect();
    let missing: BTreeSet<RoleCode> = requirement.roles.difference(&satisfied_roles).cloned().collect();
    let approved = positive.len();

    let satisfied = if requirement.kind.is_multi_role() && !requirement.is_permissive() {
        missing.is_empty() && approved >= requirement.needed
    } else {
        approved >= 1
    };

    QuorumStatus {
        satisfied_roles,
        missing,
        approved,
        satisfied,
    }
}

/// True if a positive record for `marker` already exists among `records`.
pub fn is_duplicate(records: &[&ActionRecord], marker: &RoleCode) -> bool {
    records
        .iter()
        .any(|r| r.outcome.is_positive() && r.role_marker.as_ref() == Some(marker))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerDecision {
    /// Record the action under this marker.
    Contribute(Option<RoleCode>),
    /// The role is already covered. Nothing is written.
    AlreadyRecorded(RoleCode),
}

fn first_open(candidates: Vec<RoleCode>, records: &[&ActionRecord]) -> Option<MarkerDecision> {
    let first = candidates.first()?.clone();
    Some(
        candidates
            .into_iter()
            .find(|c| !is_duplicate(records, c))
            .map(|c| MarkerDecision::Contribute(Some(c)))
            .unwrap_or(MarkerDecision::AlreadyRecorded(first)),
    )
}

/// Decides which role a positive action fills at the current step.
///
/// Technical reviewers take the first uncovered role their departments
/// staff. Field verifiers take the role they claim, validated against their
/// department side and job level, or the first uncovered role their profile
/// qualifies for.
pub fn assign_marker(
    requirement: &StepRequirement,
    authorization: &Authorization,
    claimed: Option<VerificationRole>,
    requester_department: &str,
    config: &EngineConfig,
    records: &[&ActionRecord],
) -> Result<MarkerDecision, WorkflowError> {
    let denied = || WorkflowError::AuthorizationDenied {
        level: requirement.level,
        required: requirement.gate.required(),
    };

    match requirement.kind {
        StepKind::Manager | StepKind::HseAcknowledgement | StepKind::FinalSignOff => {
            Ok(MarkerDecision::Contribute(requirement.roles.iter().next().cloned()))
        }
        StepKind::TechnicalReview if requirement.is_permissive() => Ok(MarkerDecision::Contribute(
            authorization.departments.first().map(|d| RoleCode::department(d)),
        )),
        StepKind::TechnicalReview => {
            let departments: BTreeSet<String> =
                authorization.departments.iter().map(|d| normalize_department(d)).collect();
            let candidates: Vec<RoleCode> = requirement
                .roles
                .iter()
                .filter(|role| {
                    role.staffing_department()
                        .is_some_and(|d| departments.contains(&normalize_department(&d)))
                })
                .cloned()
                .collect();
            first_open(candidates, records).ok_or_else(denied)
        }
        StepKind::FieldVerification => {
            let bypass = authorization.source == AuthorizationSource::Bypass;
            let candidates: Vec<VerificationRole> = match claimed {
                Some(role) => {
                    let qualifies = authorization
                        .departments
                        .iter()
                        .any(|d| role.admits(d, authorization.job_level, requester_department, config));
                    if !bypass && !qualifies {
                        return Err(denied());
                    }
                    vec![role]
                }
                None if bypass => return Err(ValidationError::MissingVerificationRole.into()),
                None => {
                    let mut found = BTreeSet::new();
                    for department in &authorization.departments {
                        found.extend(VerificationRole::candidates(
                            department,
                            authorization.job_level,
                            requester_department,
                            config,
                        ));
                    }
                    found.into_iter().collect()
                }
            };
            first_open(candidates.into_iter().map(RoleCode::Verification).collect(), records).ok_or_else(denied)
        }
        StepKind::Other => Ok(MarkerDecision::Contribute(None)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepProgress {
    Done,
    Current,
    Pending,
    Skipped,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepView {
    pub level: u32,
    pub name: &'static str,
    pub progress: StepProgress,
    pub required: BTreeSet<RoleCode>,
    pub satisfied: BTreeSet<RoleCode>,
    pub needed: usize,
}

/// Per-step progress of the current round, for display.
pub fn step_views<S: WorkflowSubject>(subject: &S, config: &EngineConfig) -> Vec<StepView> {
    let state = subject.state();
    let facts = subject.facts();

    steps(S::TRACK, state.variant)
        .iter()
        .map(|step| {
            let requirement = subject.requirement_at(step.level, config);
            let records = subject.records_for(step.level);
            let status = evaluate(&requirement, &records);

            let progress = if !is_applicable(S::TRACK, step.level, &facts) {
                StepProgress::Skipped
            } else if records.iter().any(|r| r.outcome == Outcome::Rejected) {
                StepProgress::Rejected
            } else {
                match (state.status, state.current_level) {
                    (Status::Completed, _) => StepProgress::Done,
                    (Status::InProgress, Some(current)) if step.level < current => StepProgress::Done,
                    (Status::InProgress, Some(current)) if step.level == current => StepProgress::Current,
                    _ if status.satisfied => StepProgress::Done,
                    _ => StepProgress::Pending,
                }
            };

            StepView {
                level: step.level,
                name: step.name,
                progress,
                required: requirement.roles,
                satisfied: status.satisfied_roles,
                needed: requirement.needed,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryFacts;
    use crate::roles::{ApjRole, compute_required_roles};
    use crate::types::{ActingContext, Identity};
    use crate::variant::Track;

    fn record(outcome: Outcome, marker: Option<RoleCode>) -> ActionRecord {
        ActionRecord::new(
            "request_1abc".to_string(),
            1,
            2,
            "APJ Approval",
            outcome,
            ActingContext::new(Identity::new("1001", "Sari")),
        )
        .with_role_marker(marker)
    }

    fn auth(departments: &[&str], job_level: Option<u8>) -> Authorization {
        Authorization {
            departments: departments.iter().map(|d| d.to_string()).collect(),
            job_level,
            source: AuthorizationSource::Directory,
        }
    }

    fn review(name: &str, food: bool) -> StepRequirement {
        compute_required_roles(
            Track::Approval,
            2,
            &CategoryFacts::classify(name, food),
            "PR1",
            &EngineConfig::default(),
        )
    }

    #[test]
    fn partial_review_holds() {
        let req = review("Recall & Prekursor", false);
        let a = record(Outcome::Approved, Some(RoleCode::Apj(ApjRole::Pn)));
        let status = evaluate(&req, &[&a]);

        assert!(!status.satisfied);
        assert_eq!(status.missing, BTreeSet::from([RoleCode::Apj(ApjRole::Qa)]));

        let b = record(Outcome::Approved, Some(RoleCode::Apj(ApjRole::Qa)));
        assert!(evaluate(&req, &[&a, &b]).satisfied);
    }

    #[test]
    fn rejections_do_not_count() {
        let req = review("Recall", false);
        let a = record(Outcome::Rejected, Some(RoleCode::Apj(ApjRole::Qa)));
        assert!(!evaluate(&req, &[&a]).satisfied);
    }

    #[test]
    fn reviewer_takes_first_open_role() {
        let config = EngineConfig::default();
        let req = review("Recall & Prekursor", false);
        let pn = record(Outcome::Approved, Some(RoleCode::Apj(ApjRole::Pn)));

        let decision = assign_marker(&req, &auth(&["PN1", "QA"], None), None, "PR1", &config, &[&pn]).unwrap();
        assert_eq!(decision, MarkerDecision::Contribute(Some(RoleCode::Apj(ApjRole::Qa))));

        let decision = assign_marker(&req, &auth(&["PN1"], None), None, "PR1", &config, &[&pn]).unwrap();
        assert_eq!(decision, MarkerDecision::AlreadyRecorded(RoleCode::Apj(ApjRole::Pn)));

        let err = assign_marker(&req, &auth(&["HC"], None), None, "PR1", &config, &[]).unwrap_err();
        assert!(matches!(err, WorkflowError::AuthorizationDenied { level: 2, .. }));
    }

    #[test]
    fn verifier_claim_is_checked() {
        let config = EngineConfig::default();
        let req = compute_required_roles(Track::Approval, 3, &CategoryFacts::default(), "PR1", &config);

        let ok = assign_marker(
            &req,
            &auth(&["KL"], Some(5)),
            Some(VerificationRole::SafetySupervisor),
            "PR1",
            &config,
            &[],
        )
        .unwrap();
        assert_eq!(
            ok,
            MarkerDecision::Contribute(Some(RoleCode::Verification(VerificationRole::SafetySupervisor)))
        );

        let wrong_level = assign_marker(
            &req,
            &auth(&["KL"], Some(7)),
            Some(VerificationRole::SafetySupervisor),
            "PR1",
            &config,
            &[],
        );
        assert!(matches!(wrong_level, Err(WorkflowError::AuthorizationDenied { .. })));

        let inferred = assign_marker(&req, &auth(&["PR1"], Some(7)), None, "PR1", &config, &[]).unwrap();
        assert_eq!(
            inferred,
            MarkerDecision::Contribute(Some(RoleCode::Verification(VerificationRole::RequesterPerformer)))
        );
    }

    #[test]
    fn bypass_needs_an_explicit_role() {
        let config = EngineConfig::default();
        let req = compute_required_roles(Track::Approval, 3, &CategoryFacts::default(), "PR1", &config);
        let bypass = Authorization {
            departments: vec![],
            job_level: None,
            source: AuthorizationSource::Bypass,
        };

        let err = assign_marker(&req, &bypass, None, "PR1", &config, &[]).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::MissingVerificationRole)
        ));
        assert!(assign_marker(&req, &bypass, Some(VerificationRole::SafetyPerformer), "PR1", &config, &[]).is_ok());
    }
}
