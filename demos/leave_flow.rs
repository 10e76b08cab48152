//! Walks one leave request through the default Team Lead -> HR -> MD chain and
//! a second one through a Team Lead rejection.
//!
//! `cargo run --example leave_flow`
use anyhow::Context;
use leave_approval::{
    ChainRole, Config, Decision, LeaveDate, LeaveDraft, LeaveFilter, LeaveService, LeaveType, Page,
    notify::LogNotifier, roles::StaticRoleResolver,
};
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_level(true)
        .init();

    let temp_dir = tempfile::tempdir()?;
    let mut config = Config::from_env().context("loading LEAVE_* configuration")?;
    config.db_path = temp_dir.path().join("leave_flow.db");

    let roles = StaticRoleResolver::new()
        .grant("lead_tom", ChainRole::TeamLead)
        .grant("hr_ana", ChainRole::Hr)
        .grant("md_lee", ChainRole::Md);
    let service = LeaveService::open(&config, Arc::new(roles), Arc::new(LogNotifier))?;
    info!(?service, "Leave service ready");

    let start = LeaveDate::from_ymd(2024, 3, 1).context("start date")?;
    let end = LeaveDate::from_ymd(2024, 3, 3).context("end date")?;
    let draft = LeaveDraft::new()
        .set_employee("emp_1")
        .set_leave_type(LeaveType::SickLeave)
        .set_start_date(start)
        .set_end_date(end)
        .set_reason("Flu");

    let approved = service.submit_leave(draft.clone(), None)?;
    for (role, actor) in [
        (ChainRole::TeamLead, "lead_tom"),
        (ChainRole::Hr, "hr_ana"),
        (ChainRole::Md, "md_lee"),
    ] {
        if let Err(e) = service.act_on_stage(&approved.id, &role, Decision::Approve, None, actor) {
            info!(error = %e, "{}", e.user_message());
        }
    }

    let rejected = service.submit_leave(draft, None)?;
    service.act_on_stage(
        &rejected.id,
        &ChainRole::TeamLead,
        Decision::Reject,
        Some("Insufficient notice"),
        "lead_tom",
    )?;
    if let Some(detail) = service.rejection_detail(&rejected.id)? {
        info!(
            role = detail.role_label(),
            reason = detail.reason.as_deref().unwrap_or("-"),
            "Rejection detail"
        );
    }

    let page = service.list_leaves(&LeaveFilter::for_employee("emp_1"), Page::default())?;
    for request in &page.data {
        info!(
            leave_id = %request.id,
            status = %request.status,
            total_days = request.total_days,
            "Listed leave"
        );
    }
    let summary = service.summarize(&LeaveFilter::for_employee("emp_1"))?;
    info!(?summary, "Summary for emp_1");

    service.flush()?;
    Ok(())
}
