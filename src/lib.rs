//! Leave request approval workflow.
//!
//! A request is submitted by an employee and then passes through an ordered
//! chain of approver roles (Team Lead, HR, MD by default). The first rejection
//! ends the workflow; approval needs every stage. Records live in sled and every
//! transition is committed with a compare-and-swap on the stored document.

pub mod chain;
pub mod config;
pub mod document;
pub mod error;
pub mod leave;
pub mod notify;
pub mod roles;
pub mod service;
pub mod store;
pub mod utils;

pub use chain::{ApprovalPolicy, ChainConfig, ChainRole, Decision, RejectionDetail, RejectionOrigin};
pub use config::Config;
pub use error::{LeaveError, LeaveResult, TransitionError, ValidationError};
pub use leave::{LeaveDate, LeaveDraft, LeaveRequest, LeaveStatus, LeaveType};
pub use service::{LeaveService, Page};
pub use store::LeaveFilter;
