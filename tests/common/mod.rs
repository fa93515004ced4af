#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use tempfile::{TempDir, tempdir};
use waste_approval::builder::RequestDraft;
use waste_approval::context::RequestContext;
use waste_approval::directory::{DirectoryError, DirectoryGateway, Grant, Profile};
use waste_approval::roles::{ApjRole, RoleCode, VerificationRole};
use waste_approval::types::WasteForm;
use waste_approval::{ActingContext, ActionInput, EngineConfig, Identity, Status, WorkflowService};

pub const APPROVAL: &str = "ePengelolaan_Limbah";
pub const SIGNING: &str = "ePengelolaan_Limbah_Berita_Acara";
pub const REQUESTING_DEPARTMENT: &str = "PR1";

/// In-memory org directory that can be switched off.
#[derive(Default)]
pub struct FakeDirectory {
    grants: RwLock<HashMap<String, Vec<Grant>>>,
    profiles: RwLock<HashMap<String, Profile>>,
    down: AtomicBool,
}

impl FakeDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn grant(&self, identity: &str, application: &str, step: u32, department: &str) {
        self.grant_with_level(identity, application, step, department, None);
    }

    pub fn grant_with_level(
        &self,
        identity: &str,
        application: &str,
        step: u32,
        department: &str,
        job_level: Option<u8>,
    ) {
        self.grants
            .write()
            .unwrap()
            .entry(identity.to_string())
            .or_default()
            .push(Grant {
                application: application.to_string(),
                step,
                department: department.to_string(),
                job_level,
            });
    }

    pub fn profile(&self, identity: &str, department: &str, job_level: Option<u8>) {
        self.profiles.write().unwrap().insert(
            identity.to_string(),
            Profile {
                identity: identity.to_string(),
                display_name: identity.to_string(),
                department: Some(department.to_string()),
                job_level,
                title: None,
            },
        );
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

impl DirectoryGateway for FakeDirectory {
    fn resolve_grants(&self, identity: &str) -> Result<Vec<Grant>, DirectoryError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("connection refused".to_string()));
        }
        Ok(self.grants.read().unwrap().get(identity).cloned().unwrap_or_default())
    }

    fn resolve_profile(&self, identity: &str) -> Result<Profile, DirectoryError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("connection refused".to_string()));
        }
        self.profiles
            .read()
            .unwrap()
            .get(identity)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownIdentity(identity.to_string()))
    }
}

pub fn person(id: &str, department: &str) -> ActingContext {
    ActingContext::new(Identity::new(id, format!("Employee {id}")).with_department(department))
}

/// Everyone needed to take a request and an event all the way through.
pub struct Plant {
    pub requester: ActingContext,
    pub manager: ActingContext,
    pub pn: ActingContext,
    pub qa: ActingContext,
    pub hc: ActingContext,
    pub requester_performer: ActingContext,
    pub requester_supervisor: ActingContext,
    pub safety_performer: ActingContext,
    pub safety_supervisor: ActingContext,
    pub hse_manager: ActingContext,
    pub safety_officer: ActingContext,
    pub head_of_plant: ActingContext,
}

impl Plant {
    pub fn staff(directory: &FakeDirectory) -> Self {
        directory.grant("m1", APPROVAL, 1, REQUESTING_DEPARTMENT);
        directory.grant("m1", SIGNING, 3, REQUESTING_DEPARTMENT);

        for (id, department) in [("pn", "PN1"), ("qa", "QA"), ("hc", "HC")] {
            directory.grant(id, APPROVAL, 2, department);
            directory.grant(id, SIGNING, 3, department);
        }

        directory.grant_with_level("v1", APPROVAL, 3, REQUESTING_DEPARTMENT, Some(7));
        directory.grant_with_level("v2", APPROVAL, 3, REQUESTING_DEPARTMENT, Some(5));
        directory.grant_with_level("v3", APPROVAL, 3, "KL", Some(7));
        directory.grant_with_level("v4", APPROVAL, 3, "KL", Some(6));

        directory.grant("hse", APPROVAL, 4, "KL");
        directory.grant("hse", SIGNING, 2, "KL");
        directory.grant("officer", SIGNING, 1, "KL");
        directory.grant("plant", SIGNING, 4, "PL");

        Self {
            requester: person("r1", REQUESTING_DEPARTMENT),
            manager: person("m1", REQUESTING_DEPARTMENT),
            pn: person("pn", "PN1"),
            qa: person("qa", "QA"),
            hc: person("hc", "HC"),
            requester_performer: person("v1", REQUESTING_DEPARTMENT),
            requester_supervisor: person("v2", REQUESTING_DEPARTMENT),
            safety_performer: person("v3", "KL"),
            safety_supervisor: person("v4", "KL"),
            hse_manager: person("hse", "KL"),
            safety_officer: person("officer", "KL"),
            head_of_plant: person("plant", "PL"),
        }
    }

    pub fn apj(&self, role: ApjRole) -> &ActingContext {
        match role {
            ApjRole::Pn => &self.pn,
            ApjRole::Qa => &self.qa,
            ApjRole::Hc => &self.hc,
        }
    }

    pub fn verifier(&self, role: VerificationRole) -> &ActingContext {
        match role {
            VerificationRole::RequesterPerformer => &self.requester_performer,
            VerificationRole::RequesterSupervisor => &self.requester_supervisor,
            VerificationRole::SafetyPerformer => &self.safety_performer,
            VerificationRole::SafetySupervisor => &self.safety_supervisor,
        }
    }
}

/// Sled uses file-based locking, so each test gets its own database in a
/// temp dir. Keep the returned dir alive for the duration of the test.
pub fn open_service(directory: Arc<FakeDirectory>) -> anyhow::Result<(TempDir, WorkflowService)> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("workflow.db"))?;
    let config = EngineConfig {
        directory_ttl: Duration::ZERO,
        ..EngineConfig::default()
    };
    let service = WorkflowService::new(Arc::new(db), directory, config)?;
    Ok((temp_dir, service))
}

pub fn new_request(
    service: &WorkflowService,
    plant: &Plant,
    category: &str,
    food_product: bool,
) -> anyhow::Result<RequestContext> {
    let draft = RequestDraft::new()
        .set_category(category)
        .set_food_product(food_product)
        .set_waste_form(WasteForm::Solid);
    let ctx = service.create_request(&plant.requester, &draft).context("create request")?;
    let ctx = service
        .submit_request(&ctx.request.id, &plant.requester)
        .context("submit request")?;
    Ok(ctx)
}

/// Walks a request through every remaining step of its workflow.
pub fn complete_request(service: &WorkflowService, plant: &Plant, id: &str) -> anyhow::Result<RequestContext> {
    loop {
        let ctx = service.load_request(id)?;
        let Some(level) = ctx.request.state.current_level else {
            anyhow::ensure!(ctx.request.state.status == Status::Completed, "request stalled");
            return Ok(ctx);
        };

        match level {
            1 => {
                service.approve_request(id, &plant.manager).context("manager approval")?;
            }
            2 | 3 => {
                let steps = service.request_steps(id)?;
                let view = steps
                    .iter()
                    .find(|s| s.level == level)
                    .context("current step missing from listing")?;
                for role in view.required.difference(&view.satisfied) {
                    match role {
                        RoleCode::Apj(apj) => {
                            service.approve_request(id, plant.apj(*apj))?;
                        }
                        RoleCode::Verification(v) => {
                            service.record_request_action(id, plant.verifier(*v), &ActionInput::approve().with_role(*v))?;
                        }
                        RoleCode::Department(_) => anyhow::bail!("unexpected department role at level {level}"),
                    }
                }
            }
            4 => {
                service.approve_request(id, &plant.hse_manager).context("HSE approval")?;
            }
            other => anyhow::bail!("unknown level {other}"),
        }
    }
}
