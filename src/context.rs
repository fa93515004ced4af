//! An entity together with its append-only action history. This is the unit
//! that is stored and updated atomically.
use crate::category::CategoryFacts;
use crate::config::EngineConfig;
use crate::entity::{DisposalRequest, SigningEvent, WorkflowState};
use crate::history::{ActionRecord, records_at};
use crate::roles::{StepRequirement, compute_required_roles};
use crate::types::WasteForm;
use crate::variant::{Track, WorkflowStep, step_at};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct RequestContext {
    #[n(0)]
    pub request: DisposalRequest,
    #[n(1)]
    pub history: Vec<ActionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct EventContext {
    #[n(0)]
    pub event: SigningEvent,
    #[n(1)]
    pub history: Vec<ActionRecord>,
}

impl RequestContext {
    pub fn new(request: DisposalRequest) -> Self {
        Self {
            request,
            history: vec![],
        }
    }
}

impl EventContext {
    pub fn new(event: SigningEvent) -> Self {
        Self { event, history: vec![] }
    }
}

/// What the engine needs from anything that runs through a workflow.
pub trait WorkflowSubject {
    const TRACK: Track;
    const KIND: &'static str;

    fn state(&self) -> &WorkflowState;
    fn state_mut(&mut self) -> &mut WorkflowState;
    fn facts(&self) -> CategoryFacts;
    /// Department the manager-type roles are resolved against.
    fn department(&self) -> &str;
    fn history(&self) -> &[ActionRecord];
    fn insert_record(&mut self, record: ActionRecord);

    /// Form code for a request number still to be minted.
    fn pending_number(&self) -> Option<WasteForm> {
        None
    }
    fn assign_number(&mut self, _number: String) {}

    fn current_step(&self) -> Option<&'static WorkflowStep> {
        let state = self.state();
        state
            .current_level
            .and_then(|level| step_at(Self::TRACK, state.variant, level))
    }

    fn requirement_at(&self, level: u32, config: &EngineConfig) -> StepRequirement {
        compute_required_roles(Self::TRACK, level, &self.facts(), self.department(), config)
    }

    /// Records of the current round at `level`.
    fn records_for(&self, level: u32) -> Vec<&ActionRecord> {
        records_at(self.history(), self.state().round, level)
    }
}

impl WorkflowSubject for RequestContext {
    const TRACK: Track = Track::Approval;
    const KIND: &'static str = "request";

    fn state(&self) -> &WorkflowState {
        &self.request.state
    }
    fn state_mut(&mut self) -> &mut WorkflowState {
        &mut self.request.state
    }
    fn facts(&self) -> CategoryFacts {
        self.request.facts()
    }
    fn department(&self) -> &str {
        &self.request.department
    }
    fn history(&self) -> &[ActionRecord] {
        &self.history
    }
    fn insert_record(&mut self, record: ActionRecord) {
        self.history.push(record);
    }
    fn pending_number(&self) -> Option<WasteForm> {
        match self.request.sequence_number {
            Some(_) => None,
            None => Some(self.request.waste_form),
        }
    }
    fn assign_number(&mut self, number: String) {
        self.request.sequence_number = Some(number);
    }
}

impl WorkflowSubject for EventContext {
    const TRACK: Track = Track::Signing;
    const KIND: &'static str = "event";

    fn state(&self) -> &WorkflowState {
        &self.event.state
    }
    fn state_mut(&mut self) -> &mut WorkflowState {
        &mut self.event.state
    }
    fn facts(&self) -> CategoryFacts {
        self.event.facts()
    }
    fn department(&self) -> &str {
        &self.event.department
    }
    fn history(&self) -> &[ActionRecord] {
        &self.history
    }
    fn insert_record(&mut self, record: ActionRecord) {
        self.history.push(record);
    }
}
