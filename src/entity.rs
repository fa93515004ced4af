//! The two entities that move through a workflow.
use chrono::Utc;

use crate::category::CategoryFacts;
use crate::types::{Identity, Status, TimeStamp, WasteForm};
use crate::variant::WorkflowVariant;

/// Position of an entity in its workflow. `current_level` is `None` both
/// before submission and after completion; `status` tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct WorkflowState {
    #[n(0)]
    pub variant: WorkflowVariant,
    #[n(1)]
    pub current_level: Option<u32>,
    #[n(2)]
    pub status: Status,
    #[n(3)]
    pub round: u32,
    #[n(4)]
    pub rejection_reason: Option<String>,
}

impl WorkflowState {
    pub fn new(variant: WorkflowVariant) -> Self {
        Self {
            variant,
            current_level: None,
            status: Status::Draft,
            round: 0,
            rejection_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct DisposalRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub requester: Identity, // the person the request is raised for
    #[n(2)]
    pub created_by: Option<Identity>, // set when a delegate raised it
    #[n(3)]
    pub department: String, // requesting department (bagian)
    #[n(4)]
    pub category_name: String,
    #[n(5)]
    pub food_product: bool,
    #[n(6)]
    pub waste_form: WasteForm,
    #[n(7)]
    pub state: WorkflowState,
    #[n(8)]
    pub sequence_number: Option<String>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub submitted_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub event_id: Option<String>, // signing event this request was bundled into
}

impl DisposalRequest {
    pub fn facts(&self) -> CategoryFacts {
        CategoryFacts::classify(&self.category_name, self.food_product)
    }

    /// Completed and not bundled into a live signing event. `released` is
    /// asked about the event it was last bundled into and says whether that
    /// event was rejected.
    pub fn is_linkable(&self, released: impl FnOnce(&str) -> bool) -> bool {
        self.state.status == Status::Completed && self.event_id.as_deref().is_none_or(released)
    }
}

/// Snapshot of a request taken when it was linked to an event.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct LinkedRequest {
    #[n(0)]
    pub request_id: String,
    #[n(1)]
    pub category_name: String,
    #[n(2)]
    pub food_product: bool,
    #[n(3)]
    pub sequence_number: Option<String>,
}

impl From<&DisposalRequest> for LinkedRequest {
    fn from(request: &DisposalRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            category_name: request.category_name.clone(),
            food_product: request.food_product,
            sequence_number: request.sequence_number.clone(),
        }
    }
}

/// Names of the four field verification officers printed on the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct VerificationOfficers {
    #[n(0)]
    pub requester_performer: Option<String>,
    #[n(1)]
    pub requester_supervisor: Option<String>,
    #[n(2)]
    pub safety_performer: Option<String>,
    #[n(3)]
    pub safety_supervisor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct SigningEvent {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub creator: Identity,
    #[n(2)]
    pub created_by: Option<Identity>,
    #[n(3)]
    pub department: String,
    #[n(4)]
    pub verification_date: String, // YYYY-MM-DD
    #[n(5)]
    pub verification_time: TimeStamp<Utc>,
    #[n(6)]
    pub location: String,
    #[n(7)]
    pub officers: VerificationOfficers,
    #[n(8)]
    pub linked: Vec<LinkedRequest>,
    #[n(9)]
    pub state: WorkflowState,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
}

impl SigningEvent {
    /// Union of the facts of every linked request.
    pub fn facts(&self) -> CategoryFacts {
        CategoryFacts::aggregate(
            self.linked
                .iter()
                .map(|l| (l.category_name.as_str(), l.food_product)),
        )
    }
}
