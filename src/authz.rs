//! Authorization of workflow actions against directory grants.
//!
//! Denial is an ordinary outcome reported as
//! [`WorkflowError::AuthorizationDenied`]. When the directory is down the
//! check degrades to the locally stored allowlist for the step.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::directory::{CachedDirectory, Grant};
use crate::error::WorkflowError;
use crate::roles::{DepartmentGate, StepKind, StepRequirement, normalize_department};
use crate::types::Identity;
use crate::variant::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationSource {
    Directory,
    Allowlist,
    /// Directory down, no allowlist, and the step has no department rule.
    OpenFallback,
    Bypass,
}

/// What a successful check established about the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Departments the actor holds a matching grant in.
    pub departments: Vec<String>,
    pub job_level: Option<u8>,
    pub source: AuthorizationSource,
}

/// A locally maintained approver for one (track, level).
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AllowlistEntry {
    #[n(0)]
    pub identity: String,
    #[n(1)]
    pub department: Option<String>,
}

impl AllowlistEntry {
    pub fn new(identity: impl Into<String>, department: Option<&str>) -> Self {
        Self {
            identity: identity.into(),
            department: department.map(normalize_department),
        }
    }
}

/// Level 1 of the signing track is the event creation privilege.
pub const EVENT_CREATION_LEVEL: u32 = 1;

/// Filters `grants` down to those that open `requirement`.
pub fn check_grants(
    grants: &[Grant],
    application: &str,
    requirement: &StepRequirement,
) -> Result<(Vec<String>, Option<u8>), WorkflowError> {
    let admitted: Vec<&Grant> = grants
        .iter()
        .filter(|g| g.application.eq_ignore_ascii_case(application) && g.step == requirement.level)
        .filter(|g| requirement.gate.admits(&g.department))
        .collect();

    if admitted.is_empty() {
        return Err(WorkflowError::AuthorizationDenied {
            level: requirement.level,
            required: requirement.gate.required(),
        });
    }

    let mut departments: Vec<String> = admitted.iter().map(|g| normalize_department(&g.department)).collect();
    departments.sort();
    departments.dedup();
    let job_level = admitted.iter().find_map(|g| g.job_level);

    Ok((departments, job_level))
}

pub struct Authorizer {
    directory: CachedDirectory,
    config: Arc<EngineConfig>,
}

impl Authorizer {
    pub fn new(directory: CachedDirectory, config: Arc<EngineConfig>) -> Self {
        Self { directory, config }
    }

    pub fn directory(&self) -> &CachedDirectory {
        &self.directory
    }

    pub fn authorize_step(
        &self,
        actor: &Identity,
        requirement: &StepRequirement,
        allowlist: &[AllowlistEntry],
        bypass_token: Option<&str>,
    ) -> Result<Authorization, WorkflowError> {
        if requirement.is_permissive() {
            warn!(
                level = requirement.level,
                "no reviewer roles resolved, accepting any approver with a grant for the level"
            );
        }

        let application = requirement.track.application(&self.config);
        let result = match self.directory.grants(&actor.id) {
            Ok(grants) => check_grants(&grants, application, requirement).map(|(departments, job_level)| Authorization {
                departments,
                job_level: job_level.or(actor.job_level),
                source: AuthorizationSource::Directory,
            }),
            Err(err) if err.is_outage() => {
                warn!(actor = %actor.id, error = %err, "directory unavailable, using local allowlist");
                self.from_allowlist(actor, requirement, allowlist)
            }
            Err(_) => Err(WorkflowError::AuthorizationDenied {
                level: requirement.level,
                required: requirement.gate.required(),
            }),
        };

        match result {
            Ok(mut authorization) => {
                if requirement.kind == StepKind::FieldVerification && authorization.job_level.is_none() {
                    authorization.job_level = self.profile_job_level(actor);
                }
                Ok(authorization)
            }
            Err(err @ (WorkflowError::AuthorizationDenied { .. } | WorkflowError::DirectoryUnavailable(_))) => {
                self.bypass(requirement, bypass_token).ok_or(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Event creation needs a signing grant at step 1 in the safety
    /// department. Fails closed when nothing can vouch for the actor.
    pub fn authorize_creation(
        &self,
        actor: &Identity,
        allowlist: &[AllowlistEntry],
    ) -> Result<Authorization, WorkflowError> {
        let safety = normalize_department(&self.config.safety_department);
        let requirement = StepRequirement {
            track: Track::Signing,
            level: EVENT_CREATION_LEVEL,
            kind: StepKind::Other,
            roles: Default::default(),
            needed: 1,
            gate: DepartmentGate::Exact(safety),
        };

        match self.directory.grants(&actor.id) {
            Ok(grants) => {
                let (departments, job_level) =
                    check_grants(&grants, &self.config.signing_application, &requirement)?;
                Ok(Authorization {
                    departments,
                    job_level,
                    source: AuthorizationSource::Directory,
                })
            }
            Err(err) if err.is_outage() => {
                if allowlist.is_empty() {
                    return Err(WorkflowError::DirectoryUnavailable(err.to_string()));
                }
                warn!(actor = %actor.id, error = %err, "directory unavailable, using local allowlist for event creation");
                self.from_allowlist(actor, &requirement, allowlist)
            }
            Err(_) => Err(WorkflowError::AuthorizationDenied {
                level: EVENT_CREATION_LEVEL,
                required: requirement.gate.required(),
            }),
        }
    }

    fn from_allowlist(
        &self,
        actor: &Identity,
        requirement: &StepRequirement,
        allowlist: &[AllowlistEntry],
    ) -> Result<Authorization, WorkflowError> {
        if allowlist.is_empty() {
            return match requirement.gate {
                DepartmentGate::Permissive => Ok(Authorization {
                    departments: actor.department.iter().map(|d| normalize_department(d)).collect(),
                    job_level: actor.job_level,
                    source: AuthorizationSource::OpenFallback,
                }),
                _ => Err(WorkflowError::DirectoryUnavailable(format!(
                    "no local approvers configured for level {}",
                    requirement.level
                ))),
            };
        }

        let denied = || WorkflowError::AuthorizationDenied {
            level: requirement.level,
            required: requirement.gate.required(),
        };

        let entries: Vec<&AllowlistEntry> = allowlist.iter().filter(|e| e.identity == actor.id).collect();
        if entries.is_empty() {
            return Err(denied());
        }

        // An entry only vouches for the departments the step admits.
        let mut departments: Vec<String> = entries
            .iter()
            .filter_map(|e| e.department.clone().or_else(|| actor.department.clone()))
            .map(|d| normalize_department(&d))
            .filter(|d| requirement.gate.admits(d))
            .collect();
        departments.sort();
        departments.dedup();
        if departments.is_empty() && requirement.gate != DepartmentGate::Permissive {
            return Err(denied());
        }

        Ok(Authorization {
            departments,
            job_level: actor.job_level,
            source: AuthorizationSource::Allowlist,
        })
    }

    fn profile_job_level(&self, actor: &Identity) -> Option<u8> {
        match self.directory.profile(&actor.id) {
            Ok(profile) => profile.job_level,
            Err(err) => {
                debug!(actor = %actor.id, error = %err, "job level unknown");
                None
            }
        }
    }

    #[cfg(feature = "test-bypass")]
    fn bypass(&self, requirement: &StepRequirement, token: Option<&str>) -> Option<Authorization> {
        if requirement.kind != StepKind::FieldVerification || !self.config.test_bypass_enabled {
            return None;
        }
        let expected = self.config.test_bypass_token.as_deref()?;
        if token? != expected {
            return None;
        }

        warn!(level = requirement.level, "field verification authorized through the test bypass");
        Some(Authorization {
            departments: Vec::new(),
            job_level: None,
            source: AuthorizationSource::Bypass,
        })
    }

    #[cfg(not(feature = "test-bypass"))]
    fn bypass(&self, _requirement: &StepRequirement, _token: Option<&str>) -> Option<Authorization> {
        None
    }
}
