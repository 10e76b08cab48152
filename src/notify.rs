//! Notification hooks fired after a state change has been committed
use super::chain::{ChainRole, Transition};
use super::leave::LeaveRequest;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyTarget {
    Employee(String),
    RoleGroup(ChainRole),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveEvent {
    Submitted,
    StageApproved,
    Approved,
    Rejected,
    SystemRejected,
}

/// Delivery is up to the host (chat, email, push). Errors are reported back
/// but never undo the transition that triggered them.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        target: NotifyTarget,
        event: LeaveEvent,
        payload: &LeaveRequest,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _: NotifyTarget, _: LeaveEvent, _: &LeaveRequest) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes every notification as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        target: NotifyTarget,
        event: LeaveEvent,
        payload: &LeaveRequest,
    ) -> anyhow::Result<()> {
        tracing::info!(
            leave_id = %payload.id,
            employee_id = %payload.employee_id,
            notify_target = %target,
            ?event,
            status = %payload.status,
            "leave notification"
        );
        Ok(())
    }
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyTarget::Employee(id) => write!(f, "employee:{}", id),
            NotifyTarget::RoleGroup(role) => write!(f, "role:{}", role),
        }
    }
}

/// Who hears about a freshly submitted request.
pub fn submission_targets(request: &LeaveRequest) -> Vec<(NotifyTarget, LeaveEvent)> {
    request
        .approval_chain
        .next_pending()
        .map(|role| vec![(NotifyTarget::RoleGroup(role.clone()), LeaveEvent::Submitted)])
        .unwrap_or_default()
}

/// Who hears about a committed stage action.
pub fn transition_targets(
    request: &LeaveRequest,
    transition: &Transition,
) -> Vec<(NotifyTarget, LeaveEvent)> {
    let employee = NotifyTarget::Employee(request.employee_id.clone());
    match transition {
        Transition::Advanced { next } => vec![
            (employee, LeaveEvent::StageApproved),
            (NotifyTarget::RoleGroup(next.clone()), LeaveEvent::StageApproved),
        ],
        Transition::Approved => vec![(employee, LeaveEvent::Approved)],
        Transition::Rejected => vec![(employee, LeaveEvent::Rejected)],
    }
}

/// Best effort fan-out. Failures are logged and otherwise ignored.
pub fn dispatch(
    notifier: &dyn Notifier,
    request: &LeaveRequest,
    targets: Vec<(NotifyTarget, LeaveEvent)>,
) {
    for (target, event) in targets {
        if let Err(e) = notifier.notify(target.clone(), event, request) {
            tracing::warn!(
                error = %e,
                leave_id = %request.id,
                notify_target = %target,
                ?event,
                "Failed to dispatch leave notification"
            );
        }
    }
}
