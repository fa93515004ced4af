//! Action history. One immutable record per recorded action.
use chrono::Utc;

use crate::error::WorkflowError;
use crate::roles::RoleCode;
use crate::types::{ActingContext, TimeStamp};
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Outcome {
    #[n(0)]
    Approved,
    #[n(1)]
    Rejected,
    #[n(2)]
    Signed,
}

impl Outcome {
    /// Approvals and signatures both count toward a step's quorum.
    pub fn is_positive(&self) -> bool {
        matches!(self, Outcome::Approved | Outcome::Signed)
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct ActionRecord {
    #[n(0)]
    pub entity_id: String, // the request or event this record belongs to
    #[n(1)]
    pub round: u32, // submission round, bumped on every resubmission
    #[n(2)]
    pub level: u32,
    #[n(3)]
    pub step_name: String,
    #[n(4)]
    pub outcome: Outcome,
    #[n(5)]
    pub timestamp: TimeStamp<Utc>,
    #[n(6)]
    pub acting: ActingContext, // snapshot as of the action
    #[n(7)]
    pub role_marker: Option<RoleCode>,
    #[n(8)]
    pub comments: Option<String>,
    #[n(9)]
    pub bypass_used: bool,
}

impl ActionRecord {
    pub fn new(
        entity_id: String,
        round: u32,
        level: u32,
        step_name: impl Into<String>,
        outcome: Outcome,
        acting: ActingContext,
    ) -> Self {
        Self {
            entity_id,
            round,
            level,
            step_name: step_name.into(),
            outcome,
            timestamp: TimeStamp::new(),
            acting,
            role_marker: None,
            comments: None,
            bypass_used: false,
        }
    }

    pub fn with_role_marker(mut self, marker: Option<RoleCode>) -> Self {
        self.role_marker = marker;
        self
    }

    pub fn with_comments(mut self, comments: Option<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_bypass(mut self, bypass_used: bool) -> Self {
        self.bypass_used = bypass_used;
        self
    }

    /// CBOR encoding and its sha256 digest.
    pub fn build(&self) -> Result<(String, Vec<u8>), WorkflowError> {
        utils::encode_with_hash(self).map_err(|e| WorkflowError::Codec(e.to_string()))
    }
}

/// Records belonging to one round and level.
pub fn records_at(history: &[ActionRecord], round: u32, level: u32) -> Vec<&ActionRecord> {
    history
        .iter()
        .filter(|r| r.round == round && r.level == level)
        .collect()
}

/// Positive records `actor` holds in `round`, oldest first.
pub fn approvals_by<'a>(history: &'a [ActionRecord], round: u32, actor: &'a str) -> impl Iterator<Item = &'a ActionRecord> {
    history
        .iter()
        .filter(move |r| r.round == round && r.outcome.is_positive() && r.acting.authorizer.id == actor)
}
