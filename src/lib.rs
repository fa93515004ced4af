//! Approval and signing workflows for hazardous waste disposal.
//!
//! A disposal request runs through the approval track (manager, technical
//! review, field verification, HSE sign-off). Completed requests are bundled
//! into a signing event that runs through the signing track. Which steps
//! apply and who must act at each is derived from the waste category.

pub mod advance;
pub mod authz;
pub mod builder;
pub mod category;
pub mod config;
pub mod context;
pub mod directory;
pub mod entity;
pub mod error;
pub mod history;
pub mod numbering;
pub mod quorum;
pub mod roles;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod variant;

pub use category::CategoryFacts;
pub use config::EngineConfig;
pub use error::{ValidationError, WorkflowError};
pub use roles::{RoleCode, compute_required_roles};
pub use service::{ActionInput, ActionReceipt, Effect, WorkflowService};
pub use types::{ActingContext, Identity, Status};
pub use variant::{Track, WorkflowVariant, select_approval_variant, select_signing_variant};
