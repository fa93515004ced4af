//! Service layer API for request approval and event signing
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sled::Tree;
use sled::Transactional;
use tracing::{debug, info};

use crate::advance::{self, Transition};
use crate::authz::{AllowlistEntry, AuthorizationSource, Authorizer, EVENT_CREATION_LEVEL};
use crate::builder::{EventDraft, RequestDraft};
use crate::category::CategoryFacts;
use crate::config::EngineConfig;
use crate::context::{EventContext, RequestContext, WorkflowSubject};
use crate::directory::{CachedDirectory, DirectoryGateway};
use crate::entity::{DisposalRequest, LinkedRequest, SigningEvent, WorkflowState};
use crate::error::{ValidationError, WorkflowError};
use crate::history::{self, ActionRecord, Outcome};
use crate::numbering::next_sequence_number;
use crate::quorum::{self, MarkerDecision, StepView};
use crate::roles::{RoleCode, StepKind, VerificationRole};
use crate::store::{Store, abort, finish, tx_load, tx_save};
use crate::types::{ActingContext, Status, TimeStamp};
use crate::utils;
use crate::variant::{Track, select_approval_variant, select_signing_variant};

/// One approve, sign or reject action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInput {
    pub outcome: Outcome,
    /// Field verification role the actor claims. Inferred when absent.
    pub verification_role: Option<VerificationRole>,
    pub comments: Option<String>,
    pub bypass_token: Option<String>,
}

impl ActionInput {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            verification_role: None,
            comments: None,
            bypass_token: None,
        }
    }
    pub fn approve() -> Self {
        Self::new(Outcome::Approved)
    }
    pub fn sign() -> Self {
        Self::new(Outcome::Signed)
    }
    pub fn reject(reason: &str) -> Self {
        Self::new(Outcome::Rejected).with_comments(reason)
    }
    pub fn with_role(mut self, role: VerificationRole) -> Self {
        self.verification_role = Some(role);
        self
    }
    pub fn with_comments(mut self, comments: &str) -> Self {
        self.comments = Some(comments.to_string());
        self
    }
    pub fn with_bypass_token(mut self, token: &str) -> Self {
        self.bypass_token = Some(token.to_string());
        self
    }
}

/// What an action did to the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Recorded, but the step still waits for `missing`.
    Held { level: u32, missing: BTreeSet<RoleCode> },
    Advanced { from: u32, to: u32 },
    Completed { from: u32 },
    ReturnedToDraft { from: u32 },
    Rejected { from: u32 },
    /// The role was already covered. Nothing was written.
    AlreadyRecorded { level: u32, role: RoleCode },
}

#[derive(Debug, Clone)]
pub struct ActionReceipt<C> {
    pub context: C,
    pub effect: Effect,
    /// Hash of the history record written, if one was.
    pub record_hash: Option<String>,
    /// Request number minted by this action, if one was.
    pub sequence_number: Option<String>,
}

pub struct WorkflowService {
    store: Store,
    authorizer: Authorizer,
    config: Arc<EngineConfig>,
}

impl WorkflowService {
    pub fn new(
        instance: Arc<sled::Db>,
        gateway: Arc<dyn DirectoryGateway>,
        config: EngineConfig,
    ) -> Result<Self, WorkflowError> {
        let config = Arc::new(config);
        let directory = CachedDirectory::new(gateway, &config);
        Ok(Self {
            store: Store::open(instance)?,
            authorizer: Authorizer::new(directory, Arc::clone(&config)),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn directory(&self) -> &CachedDirectory {
        self.authorizer.directory()
    }

    pub fn load_request(&self, id: &str) -> Result<RequestContext, WorkflowError> {
        self.store.load_request(id)
    }

    pub fn load_event(&self, id: &str) -> Result<EventContext, WorkflowError> {
        self.store.load_event(id)
    }

    /// Request a number was issued to.
    pub fn number_owner(&self, number: &str) -> Result<Option<String>, WorkflowError> {
        self.store.number_owner(number)
    }

    /// Replaces the local approvers used when the directory is unreachable.
    pub fn set_allowlist(&self, track: Track, level: u32, entries: &[AllowlistEntry]) -> Result<(), WorkflowError> {
        self.store.set_allowlist(track, level, entries)?;
        info!(?track, level, count = entries.len(), "allowlist replaced");
        Ok(())
    }

    pub fn allowlist(&self, track: Track, level: u32) -> Result<Vec<AllowlistEntry>, WorkflowError> {
        self.store.allowlist(track, level)
    }

    /// Creates a request in Draft.
    pub fn create_request(&self, acting: &ActingContext, draft: &RequestDraft) -> Result<RequestContext, WorkflowError> {
        let fields = draft.validate_and_finalise(acting)?;
        let id = utils::new_uuid_to_bech32("request_").map_err(|e| WorkflowError::Codec(e.to_string()))?;
        let variant = select_approval_variant(&CategoryFacts::classify(&fields.category_name, fields.food_product));

        let context = RequestContext::new(DisposalRequest {
            id,
            requester: acting.effective().clone(),
            created_by: acting.acting_as.as_ref().map(|_| acting.authorizer.clone()),
            department: fields.department,
            category_name: fields.category_name,
            food_product: fields.food_product,
            waste_form: fields.waste_form,
            state: WorkflowState::new(variant),
            sequence_number: None,
            created_at: TimeStamp::new(),
            submitted_at: None,
            event_id: None,
        });
        self.store.insert_request(&context)?;

        info!(request = %context.request.id, variant = variant.name(), "request created");
        Ok(context)
    }

    /// Sends a Draft request into its workflow. Also used to resubmit a
    /// request its manager returned.
    pub fn submit_request(&self, id: &str, acting: &ActingContext) -> Result<RequestContext, WorkflowError> {
        let result = self.store.requests.transaction(|tx| {
            let mut context: RequestContext = tx_load(tx, id, "request")?;

            let request = &context.request;
            let is_delegate = request
                .created_by
                .as_ref()
                .is_some_and(|creator| acting.authorizer.id == creator.id);
            if !acting.involves(&request.requester.id) && !is_delegate {
                return Err(abort(ValidationError::NotRequester(id.to_string()).into()));
            }

            let facts = context.facts();
            advance::submit(&mut context.request.state, Track::Approval, &facts).map_err(abort)?;
            context.request.submitted_at = Some(TimeStamp::new());

            tx_save(tx, id, &context)?;
            Ok(context)
        });

        let context = finish(result)?;
        info!(request = id, round = context.request.state.round, "request submitted");
        Ok(context)
    }

    pub fn record_request_action(
        &self,
        id: &str,
        acting: &ActingContext,
        input: &ActionInput,
    ) -> Result<ActionReceipt<RequestContext>, WorkflowError> {
        self.record_action::<RequestContext>(&self.store.requests, id, acting, input)
    }

    pub fn approve_request(&self, id: &str, acting: &ActingContext) -> Result<ActionReceipt<RequestContext>, WorkflowError> {
        self.record_request_action(id, acting, &ActionInput::approve())
    }

    pub fn reject_request(
        &self,
        id: &str,
        acting: &ActingContext,
        reason: &str,
    ) -> Result<ActionReceipt<RequestContext>, WorkflowError> {
        self.record_request_action(id, acting, &ActionInput::reject(reason))
    }

    /// Creates a signing event over completed requests and starts its
    /// workflow. Either every selected request is linked or none is.
    pub fn create_event(&self, acting: &ActingContext, draft: &EventDraft) -> Result<EventContext, WorkflowError> {
        let fields = draft.validate_and_finalise(self.config.numbering_offset())?;

        let allowlist = self.store.allowlist(Track::Signing, EVENT_CREATION_LEVEL)?;
        self.authorizer.authorize_creation(&acting.authorizer, &allowlist)?;

        let selected = if fields.requests.is_empty() {
            let rejected: BTreeSet<String> = self
                .store
                .events()?
                .into_iter()
                .filter(|c| c.event.state.status == Status::Rejected)
                .map(|c| c.event.id)
                .collect();
            self.store
                .requests()?
                .into_iter()
                .filter(|c| c.request.is_linkable(|event| rejected.contains(event)))
                .map(|c| c.request.id)
                .collect()
        } else {
            fields.requests.clone()
        };
        if selected.is_empty() {
            return Err(ValidationError::NoLinkableRequests.into());
        }

        let id = utils::new_uuid_to_bech32("event_").map_err(|e| WorkflowError::Codec(e.to_string()))?;
        let result = (&self.store.requests, &self.store.events).transaction(|(requests, events)| {
            let mut linked = Vec::with_capacity(selected.len());
            for request_id in &selected {
                let mut request: RequestContext = tx_load(requests, request_id, "request")?;
                let released = match &request.request.event_id {
                    Some(event_id) => {
                        let previous: EventContext = tx_load(events, event_id, "event")?;
                        previous.event.state.status == Status::Rejected
                    }
                    None => false,
                };
                if !request.request.is_linkable(|_| released) {
                    return Err(abort(ValidationError::RequestNotLinkable(request_id.clone()).into()));
                }
                request.request.event_id = Some(id.clone());
                tx_save(requests, request_id, &request)?;
                linked.push(LinkedRequest::from(&request.request));
            }
            let facts = CategoryFacts::aggregate(linked.iter().map(|l| (l.category_name.as_str(), l.food_product)));

            let mut event = SigningEvent {
                id: id.clone(),
                creator: acting.effective().clone(),
                created_by: acting.acting_as.as_ref().map(|_| acting.authorizer.clone()),
                department: fields.department.clone(),
                verification_date: fields.verification_date.format("%Y-%m-%d").to_string(),
                verification_time: TimeStamp::from(fields.verification_time),
                location: fields.location.clone(),
                officers: fields.officers.clone(),
                linked,
                state: WorkflowState::new(select_signing_variant(&facts)),
                created_at: TimeStamp::new(),
            };
            advance::submit(&mut event.state, Track::Signing, &facts).map_err(abort)?;

            let context = EventContext::new(event);
            tx_save(events, &id, &context)?;
            Ok(context)
        });

        let context = finish(result)?;
        info!(
            event = %context.event.id,
            linked = context.event.linked.len(),
            variant = context.event.state.variant.name(),
            "signing event created"
        );
        Ok(context)
    }

    pub fn record_event_action(
        &self,
        id: &str,
        acting: &ActingContext,
        input: &ActionInput,
    ) -> Result<ActionReceipt<EventContext>, WorkflowError> {
        self.record_action::<EventContext>(&self.store.events, id, acting, input)
    }

    pub fn sign_event(&self, id: &str, acting: &ActingContext) -> Result<ActionReceipt<EventContext>, WorkflowError> {
        self.record_event_action(id, acting, &ActionInput::sign())
    }

    pub fn reject_event(
        &self,
        id: &str,
        acting: &ActingContext,
        reason: &str,
    ) -> Result<ActionReceipt<EventContext>, WorkflowError> {
        self.record_event_action(id, acting, &ActionInput::reject(reason))
    }

    pub fn request_steps(&self, id: &str) -> Result<Vec<StepView>, WorkflowError> {
        Ok(quorum::step_views(&self.store.load_request(id)?, &self.config))
    }

    pub fn event_steps(&self, id: &str) -> Result<Vec<StepView>, WorkflowError> {
        Ok(quorum::step_views(&self.store.load_event(id)?, &self.config))
    }

    /// Events still collecting signatures that were created more than the
    /// configured number of days before `now`. Oldest first.
    pub fn pending_signatures(&self, now: DateTime<Utc>) -> Result<Vec<EventContext>, WorkflowError> {
        let cutoff = now - Duration::days(self.config.pending_signature_age_days);
        let mut events: Vec<EventContext> = self
            .store
            .events()?
            .into_iter()
            .filter(|c| c.event.state.status == Status::InProgress)
            .filter(|c| c.event.created_at.to_datetime_utc() < cutoff)
            .collect();
        events.sort_by_key(|c| c.event.created_at.to_datetime_utc());
        Ok(events)
    }

    fn record_action<C>(
        &self,
        tree: &Tree,
        id: &str,
        acting: &ActingContext,
        input: &ActionInput,
    ) -> Result<ActionReceipt<C>, WorkflowError>
    where
        C: WorkflowSubject + minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()>,
    {
        let reason = input.comments.as_deref().map(str::trim).filter(|c| !c.is_empty());
        if input.outcome == Outcome::Rejected && reason.is_none() {
            return Err(ValidationError::MissingReason.into());
        }

        let context: C = match tree.get(id.as_bytes())? {
            Some(bytes) => crate::store::decode(&bytes)?,
            None => {
                return Err(WorkflowError::NotFound {
                    kind: C::KIND,
                    id: id.to_string(),
                });
            }
        };
        let actor = acting.authorizer.id.as_str();
        let state = context.state();
        let (level, round) = match (state.status, state.current_level) {
            (Status::InProgress, Some(level)) => (level, state.round),
            (status, _) => {
                let err = WorkflowError::InvalidTransition {
                    action: "record an action",
                    status,
                };
                if status != Status::Completed {
                    return Err(err);
                }
                return repeat_or(context, actor, input, err);
            }
        };
        let step_name = context.current_step().map(|s| s.name).unwrap_or_default();
        let requirement = context.requirement_at(level, &self.config);

        let allowlist = self.store.allowlist(C::TRACK, level)?;
        let authorization = match self.authorizer.authorize_step(
            &acting.authorizer,
            &requirement,
            &allowlist,
            input.bypass_token.as_deref(),
        ) {
            Ok(authorization) => authorization,
            // The actor's own action may be what moved the step on.
            Err(err @ WorkflowError::AuthorizationDenied { .. }) => {
                return repeat_or(context, actor, input, err);
            }
            Err(err) => return Err(err),
        };
        debug!(entity = id, level, source = ?authorization.source, "authorized");

        // Verifiers sign as themselves, never on someone's behalf.
        let snapshot = if requirement.kind == StepKind::FieldVerification {
            ActingContext::new(acting.authorizer.clone())
        } else {
            acting.clone()
        };
        let offset = self.config.numbering_offset();

        let result = (tree, &self.store.counters, &self.store.numbers).transaction(|(subjects, counters, numbers)| {
            let mut context: C = tx_load(subjects, id, C::KIND)?;
            let state = context.state();
            if state.current_level != Some(level) || state.round != round {
                if state.round == round && input.outcome.is_positive() {
                    if let Some(effect) = repeated_effect(context.history(), round, actor, Some(level)) {
                        return Ok((context, effect, None, None));
                    }
                }
                return Err(abort(WorkflowError::StaleStep {
                    expected: level,
                    actual: state.current_level,
                }));
            }

            let marker = if input.outcome.is_positive() {
                let records = context.records_for(level);
                let decision = quorum::assign_marker(
                    &requirement,
                    &authorization,
                    input.verification_role,
                    context.department(),
                    &self.config,
                    &records,
                )
                .map_err(abort)?;
                match decision {
                    MarkerDecision::AlreadyRecorded(role) => {
                        return Ok((context, Effect::AlreadyRecorded { level, role }, None, None));
                    }
                    MarkerDecision::Contribute(marker) => marker,
                }
            } else {
                None
            };

            let record = ActionRecord::new(id.to_string(), round, level, step_name, input.outcome, snapshot.clone())
                .with_role_marker(marker)
                .with_comments(input.comments.clone())
                .with_bypass(authorization.source == AuthorizationSource::Bypass);
            let (hash, _) = record.build().map_err(abort)?;
            context.insert_record(record);

            let facts = context.facts();
            let mut minted = None;
            let (transition, missing) = match (input.outcome, reason) {
                (Outcome::Rejected, Some(reason)) => (
                    advance::reject(context.state_mut(), C::TRACK, reason).map_err(abort)?,
                    BTreeSet::new(),
                ),
                _ => {
                    let status = quorum::evaluate(&requirement, &context.records_for(level));
                    if status.satisfied && requirement.kind == StepKind::Manager {
                        if let Some(form) = context.pending_number() {
                            let issued_at = Utc::now().with_timezone(&offset);
                            let number = next_sequence_number(counters, numbers, issued_at, form, id)?.to_string();
                            context.assign_number(number.clone());
                            minted = Some(number);
                        }
                    }
                    let transition = advance::on_quorum(context.state_mut(), C::TRACK, &facts, &status).map_err(abort)?;
                    (transition, status.missing)
                }
            };

            tx_save(subjects, id, &context)?;
            Ok((context, effect_of(transition, missing), Some(hash), minted))
        });

        let (context, effect, record_hash, sequence_number) = finish(result)?;
        info!(
            entity = id,
            kind = C::KIND,
            actor = %acting.authorizer.id,
            outcome = ?input.outcome,
            effect = ?effect,
            "action recorded"
        );
        Ok(ActionReceipt {
            context,
            effect,
            record_hash,
            sequence_number,
        })
    }
}

/// Answers a repeated positive action with the approval the actor already
/// holds in the current round, or fails with `err`.
fn repeat_or<C: WorkflowSubject>(
    context: C,
    actor: &str,
    input: &ActionInput,
    err: WorkflowError,
) -> Result<ActionReceipt<C>, WorkflowError> {
    let repeated = input
        .outcome
        .is_positive()
        .then(|| repeated_effect(context.history(), context.state().round, actor, None))
        .flatten();
    match repeated {
        Some(effect) => {
            debug!(actor, effect = ?effect, "repeated action acknowledged");
            Ok(ActionReceipt {
                context,
                effect,
                record_hash: None,
                sequence_number: None,
            })
        }
        None => Err(err),
    }
}

/// The latest approval `actor` holds in `round`, restricted to `level` when
/// given, as an already-recorded effect.
fn repeated_effect(records: &[ActionRecord], round: u32, actor: &str, level: Option<u32>) -> Option<Effect> {
    history::approvals_by(records, round, actor)
        .filter(|r| level.is_none_or(|l| r.level == l))
        .filter_map(|r| r.role_marker.clone().map(|role| Effect::AlreadyRecorded { level: r.level, role }))
        .last()
}

fn effect_of(transition: Transition, missing: BTreeSet<RoleCode>) -> Effect {
    match transition {
        Transition::Held { level } => Effect::Held { level, missing },
        Transition::Advanced { from, to } => Effect::Advanced { from, to },
        Transition::Completed { from } => Effect::Completed { from },
        Transition::ReturnedToDraft { from } => Effect::ReturnedToDraft { from },
        Transition::Rejected { from } => Effect::Rejected { from },
    }
}
