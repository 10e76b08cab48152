//! Approval chain and the leave state machine
//!
//! A request carries one stage per configured role. Stages resolve strictly in
//! chain order; the first rejection halts the chain and every later stage stays
//! Pending for good. The request is Approved only once every stage is Approved.
use super::error::{LeaveError, TransitionError, ValidationError};
use super::leave::{LeaveRequest, LeaveStatus, TimeStamp};
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChainRole {
    #[n(0)]
    TeamLead,
    #[n(1)]
    Hr,
    #[n(2)]
    Md,
    #[n(3)]
    Custom(#[n(0)] String),
}

/// Ordered list of roles every new request must pass through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    roles: Vec<ChainRole>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ChainStage {
    #[n(0)]
    pub role: ChainRole,
    #[n(1)]
    pub status: StageStatus,
    #[n(2)]
    pub comment: Option<String>,
    #[n(3)]
    pub by: Option<String>, // actor id
    #[n(4)]
    pub acted_at: Option<TimeStamp>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalChain {
    #[n(0)]
    stages: Vec<ChainStage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Outcome of a successful stage action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Advanced { next: ChainRole },
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub require_reject_comment: bool,
    pub allow_self_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionOrigin {
    Stage(ChainRole),
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionDetail {
    pub origin: RejectionOrigin,
    pub reason: Option<String>,
    pub by: Option<String>,
}

impl ChainRole {
    pub fn label(&self) -> &str {
        match self {
            ChainRole::TeamLead => "Team Lead",
            ChainRole::Hr => "HR",
            ChainRole::Md => "MD",
            ChainRole::Custom(name) => name,
        }
    }

    /// Re-reads a `Custom` name so `Custom("HR")` becomes `Hr`.
    pub fn normalized(self) -> Result<Self, ValidationError> {
        match self {
            ChainRole::Custom(name) => name.parse(),
            role => Ok(role),
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ChainRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "" => Err(ValidationError::UnknownRole(s.to_string())),
            "teamlead" | "tl" => Ok(ChainRole::TeamLead),
            "hr" => Ok(ChainRole::Hr),
            "md" => Ok(ChainRole::Md),
            _ => Ok(ChainRole::Custom(name.to_string())),
        }
    }
}

impl ChainConfig {
    /// Rejects empty chains and repeated roles. Custom names that spell a
    /// built-in role collapse into it, and custom labels compare case-blind.
    pub fn new(roles: Vec<ChainRole>) -> Result<Self, ValidationError> {
        if roles.is_empty() {
            return Err(ValidationError::EmptyChain);
        }
        let roles = roles
            .into_iter()
            .map(ChainRole::normalized)
            .collect::<Result<Vec<ChainRole>, _>>()?;
        for (i, role) in roles.iter().enumerate() {
            let label = role.label().to_lowercase();
            if roles[..i]
                .iter()
                .any(|earlier| earlier.label().to_lowercase() == label)
            {
                return Err(ValidationError::DuplicateRole(role.clone()));
            }
        }
        Ok(Self { roles })
    }

    /// Parse a comma separated list such as `TeamLead,HR,MD`.
    pub fn parse(list: &str) -> Result<Self, ValidationError> {
        let roles = list
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.parse::<ChainRole>())
            .collect::<Result<Vec<ChainRole>, _>>()?;
        Self::new(roles)
    }

    pub fn roles(&self) -> &[ChainRole] {
        &self.roles
    }

    pub fn first(&self) -> &ChainRole {
        // non-empty by construction
        &self.roles[0]
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            roles: vec![ChainRole::TeamLead, ChainRole::Hr, ChainRole::Md],
        }
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            require_reject_comment: true,
            allow_self_approval: false,
        }
    }
}

impl ChainStage {
    fn pending(role: ChainRole) -> Self {
        Self {
            role,
            status: StageStatus::Pending,
            comment: None,
            by: None,
            acted_at: None,
        }
    }
}

impl ApprovalChain {
    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            stages: config.roles().iter().cloned().map(ChainStage::pending).collect(),
        }
    }

    pub fn stages(&self) -> &[ChainStage] {
        &self.stages
    }

    pub fn stage(&self, role: &ChainRole) -> Option<&ChainStage> {
        self.stages.iter().find(|stage| &stage.role == role)
    }

    fn position(&self, role: &ChainRole) -> Option<usize> {
        self.stages.iter().position(|stage| &stage.role == role)
    }

    /// Index of the stage allowed to act next. None once the chain halted on a
    /// rejection or every stage is approved.
    fn next_index(&self) -> Option<usize> {
        for (i, stage) in self.stages.iter().enumerate() {
            match stage.status {
                StageStatus::Approved => continue,
                StageStatus::Pending => return Some(i),
                StageStatus::Rejected => return None,
            }
        }
        None
    }

    pub fn next_pending(&self) -> Option<&ChainRole> {
        self.next_index().map(|i| &self.stages[i].role)
    }

    pub fn first_rejected(&self) -> Option<&ChainStage> {
        self.stages
            .iter()
            .find(|stage| stage.status == StageStatus::Rejected)
    }

    pub fn is_fully_approved(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.status == StageStatus::Approved)
    }

    pub fn any_acted(&self) -> bool {
        self.stages
            .iter()
            .any(|stage| stage.status != StageStatus::Pending)
    }
}

impl RejectionDetail {
    /// "Team Lead", "HR", "MD", a custom role name, or "System".
    pub fn role_label(&self) -> &str {
        match &self.origin {
            RejectionOrigin::Stage(role) => role.label(),
            RejectionOrigin::System => "System",
        }
    }
}

impl LeaveRequest {
    /// Apply one approver action in memory. Every check runs before anything
    /// is written, so a failed call leaves the request untouched.
    pub fn act_on_stage(
        &mut self,
        role: &ChainRole,
        decision: Decision,
        comment: Option<&str>,
        actor_id: &str,
        policy: &ApprovalPolicy,
        now: TimeStamp,
    ) -> Result<Transition, LeaveError> {
        self.ensure_pending()?;

        if !policy.allow_self_approval && actor_id == self.employee_id {
            return Err(TransitionError::SelfApproval.into());
        }

        let chain = &self.approval_chain;
        let index = chain
            .position(role)
            .ok_or_else(|| TransitionError::RoleNotInChain(role.clone()))?;
        if chain.stages[index].status != StageStatus::Pending {
            return Err(TransitionError::StageResolved(role.clone()).into());
        }
        match chain.next_index() {
            Some(next) if next == index => {}
            Some(next) => {
                return Err(TransitionError::OutOfTurn {
                    expected: chain.stages[next].role.clone(),
                    got: role.clone(),
                }
                .into());
            }
            None => return Err(TransitionError::StageResolved(role.clone()).into()),
        }

        let comment = comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if decision == Decision::Reject && policy.require_reject_comment && comment.is_none() {
            return Err(ValidationError::MissingRejectComment.into());
        }

        let stage = &mut self.approval_chain.stages[index];
        stage.comment = comment;
        stage.by = Some(actor_id.to_string());
        stage.acted_at = Some(now);
        self.updated_at = now;

        let transition = match decision {
            Decision::Reject => {
                stage.status = StageStatus::Rejected;
                self.status = LeaveStatus::Rejected;
                Transition::Rejected
            }
            Decision::Approve => {
                stage.status = StageStatus::Approved;
                match self.approval_chain.next_pending() {
                    Some(next) => Transition::Advanced { next: next.clone() },
                    None => {
                        self.status = LeaveStatus::Approved;
                        Transition::Approved
                    }
                }
            }
        };

        Ok(transition)
    }

    /// Administrative rejection outside the chain. Stages are left as they are.
    pub fn system_reject(
        &mut self,
        reason: &str,
        actor_id: &str,
        now: TimeStamp,
    ) -> Result<(), LeaveError> {
        self.ensure_pending()?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::EmptyRejectionReason.into());
        }

        self.status = LeaveStatus::Rejected;
        self.rejection_reason = Some(reason.to_string());
        self.system_rejected_by = Some(actor_id.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Where the rejection came from. A rejected chain stage always takes
    /// precedence over a system rejection.
    pub fn rejection_detail(&self) -> Option<RejectionDetail> {
        if self.status != LeaveStatus::Rejected {
            return None;
        }
        let detail = match self.approval_chain.first_rejected() {
            Some(stage) => RejectionDetail {
                origin: RejectionOrigin::Stage(stage.role.clone()),
                reason: stage.comment.clone(),
                by: stage.by.clone(),
            },
            None => RejectionDetail {
                origin: RejectionOrigin::System,
                reason: self.rejection_reason.clone(),
                by: None,
            },
        };
        Some(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leave::{LeaveDate, LeaveDraft, LeaveType};

    fn pending_request() -> LeaveRequest {
        let draft = LeaveDraft::new()
            .set_employee("emp_1")
            .set_leave_type(LeaveType::SickLeave)
            .set_start_date(LeaveDate::from_ymd(2024, 3, 1).unwrap())
            .set_end_date(LeaveDate::from_ymd(2024, 3, 3).unwrap())
            .set_reason("Flu")
            .validate()
            .unwrap();
        LeaveRequest::submit(
            "leave_test".into(),
            draft,
            &ChainConfig::default(),
            None,
            TimeStamp::now(),
        )
    }

    fn statuses(req: &LeaveRequest) -> Vec<StageStatus> {
        req.approval_chain.stages().iter().map(|s| s.status).collect()
    }

    #[test]
    fn submitted_request_has_pending_chain() {
        let req = pending_request();
        assert_eq!(req.status, LeaveStatus::Pending);
        assert_eq!(req.total_days, 3);
        assert_eq!(statuses(&req), vec![StageStatus::Pending; 3]);
        assert_eq!(req.approval_chain.next_pending(), Some(&ChainRole::TeamLead));
    }

    #[test]
    fn approvals_in_order_reach_approved() {
        let mut req = pending_request();
        let policy = ApprovalPolicy::default();

        let t = req
            .act_on_stage(&ChainRole::TeamLead, Decision::Approve, None, "tl_1", &policy, TimeStamp::now())
            .unwrap();
        assert_eq!(t, Transition::Advanced { next: ChainRole::Hr });
        let t = req
            .act_on_stage(&ChainRole::Hr, Decision::Approve, Some("ok"), "hr_1", &policy, TimeStamp::now())
            .unwrap();
        assert_eq!(t, Transition::Advanced { next: ChainRole::Md });
        let t = req
            .act_on_stage(&ChainRole::Md, Decision::Approve, None, "md_1", &policy, TimeStamp::now())
            .unwrap();

        assert_eq!(t, Transition::Approved);
        assert_eq!(req.status, LeaveStatus::Approved);
        assert!(req.approval_chain.is_fully_approved());
        assert_eq!(req.approval_chain.stage(&ChainRole::Hr).unwrap().comment.as_deref(), Some("ok"));
    }

    #[test]
    fn out_of_turn_leaves_state_unchanged() {
        let mut req = pending_request();
        let before = req.clone();

        let err = req
            .act_on_stage(&ChainRole::Hr, Decision::Approve, None, "hr_1", &ApprovalPolicy::default(), TimeStamp::now())
            .unwrap_err();

        assert!(matches!(
            err,
            LeaveError::InvalidTransition(TransitionError::OutOfTurn { .. })
        ));
        assert_eq!(req, before);
    }

    #[test]
    fn reject_halts_chain() {
        let mut req = pending_request();
        let policy = ApprovalPolicy::default();

        req.act_on_stage(
            &ChainRole::TeamLead,
            Decision::Reject,
            Some("Insufficient notice"),
            "tl_1",
            &policy,
            TimeStamp::now(),
        )
        .unwrap();

        assert_eq!(req.status, LeaveStatus::Rejected);
        assert_eq!(
            statuses(&req),
            vec![StageStatus::Rejected, StageStatus::Pending, StageStatus::Pending]
        );
        assert_eq!(req.approval_chain.next_pending(), None);

        let detail = req.rejection_detail().unwrap();
        assert_eq!(detail.role_label(), "Team Lead");
        assert_eq!(detail.reason.as_deref(), Some("Insufficient notice"));
        assert_eq!(detail.by.as_deref(), Some("tl_1"));
    }

    #[test]
    fn reject_without_comment_is_refused_by_default() {
        let mut req = pending_request();
        let err = req
            .act_on_stage(&ChainRole::TeamLead, Decision::Reject, Some("  "), "tl_1", &ApprovalPolicy::default(), TimeStamp::now())
            .unwrap_err();
        assert!(matches!(
            err,
            LeaveError::Validation(ValidationError::MissingRejectComment)
        ));

        let lenient = ApprovalPolicy {
            require_reject_comment: false,
            ..ApprovalPolicy::default()
        };
        req.act_on_stage(&ChainRole::TeamLead, Decision::Reject, None, "tl_1", &lenient, TimeStamp::now())
            .unwrap();
        assert_eq!(req.status, LeaveStatus::Rejected);
    }

    #[test]
    fn employee_cannot_approve_own_leave() {
        let mut req = pending_request();
        let err = req
            .act_on_stage(&ChainRole::TeamLead, Decision::Approve, None, "emp_1", &ApprovalPolicy::default(), TimeStamp::now())
            .unwrap_err();
        assert!(matches!(
            err,
            LeaveError::InvalidTransition(TransitionError::SelfApproval)
        ));
    }

    #[test]
    fn system_rejection_falls_back_when_no_stage_rejected() {
        let mut req = pending_request();
        req.system_reject("Policy blackout period", "admin_1", TimeStamp::now())
            .unwrap();

        assert_eq!(statuses(&req), vec![StageStatus::Pending; 3]);
        let detail = req.rejection_detail().unwrap();
        assert_eq!(detail.origin, RejectionOrigin::System);
        assert_eq!(detail.role_label(), "System");
        assert_eq!(detail.reason.as_deref(), Some("Policy blackout period"));
        assert_eq!(detail.by, None);
        assert_eq!(req.system_rejected_by.as_deref(), Some("admin_1"));
    }

    #[test]
    fn terminal_requests_refuse_everything() {
        let mut req = pending_request();
        req.system_reject("Duplicate", "admin_1", TimeStamp::now()).unwrap();
        let before = req.clone();

        let err = req
            .act_on_stage(&ChainRole::TeamLead, Decision::Approve, None, "tl_1", &ApprovalPolicy::default(), TimeStamp::now())
            .unwrap_err();
        assert!(matches!(err, LeaveError::AlreadyTerminal { .. }));
        let err = req.system_reject("Again", "admin_1", TimeStamp::now()).unwrap_err();
        assert!(matches!(err, LeaveError::AlreadyTerminal { .. }));
        assert_eq!(req, before);
    }

    #[test]
    fn chain_config_rejects_empty_and_duplicates() {
        assert_eq!(ChainConfig::new(vec![]), Err(ValidationError::EmptyChain));
        assert_eq!(
            ChainConfig::parse("TeamLead, HR, hr"),
            Err(ValidationError::DuplicateRole(ChainRole::Hr))
        );
        let config = ChainConfig::parse("Team Lead,HR,Finance").unwrap();
        assert_eq!(
            config.roles(),
            &[
                ChainRole::TeamLead,
                ChainRole::Hr,
                ChainRole::Custom("Finance".into())
            ]
        );
    }

    #[test]
    fn chain_config_normalizes_custom_names() {
        assert_eq!(
            ChainConfig::new(vec![ChainRole::Hr, ChainRole::Custom("HR".into())]),
            Err(ValidationError::DuplicateRole(ChainRole::Hr))
        );
        assert_eq!(
            ChainConfig::new(vec![
                ChainRole::Custom("Finance".into()),
                ChainRole::Custom("finance".into())
            ]),
            Err(ValidationError::DuplicateRole(ChainRole::Custom("finance".into())))
        );
        assert!(matches!(
            ChainConfig::new(vec![ChainRole::Custom("  ".into())]),
            Err(ValidationError::UnknownRole(_))
        ));

        let config = ChainConfig::new(vec![
            ChainRole::Custom("team lead".into()),
            ChainRole::Custom(" Finance ".into()),
            ChainRole::Md,
        ])
        .unwrap();
        assert_eq!(
            config.roles(),
            &[
                ChainRole::TeamLead,
                ChainRole::Custom("Finance".into()),
                ChainRole::Md
            ]
        );
    }

    #[test]
    fn approval_chain_encoding() {
        let req = pending_request();

        let encoding = minicbor::to_vec(&req.approval_chain).unwrap();
        let decode: ApprovalChain = minicbor::decode(&encoding).unwrap();

        assert_eq!(req.approval_chain, decode);
    }
}
