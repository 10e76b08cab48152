//! Service layer API for leave workflow operations
use super::chain::{ApprovalPolicy, ChainConfig, ChainRole, Decision, RejectionDetail};
use super::config::{Config, MAX_PAGE_SIZE};
use super::document::{DocumentStore, DocumentUpload, StoredDocument};
use super::error::{LeaveResult, TransitionError, codec};
use super::leave::{DocumentRef, LeaveDraft, LeaveRequest, LeaveStatus, TimeStamp};
use super::notify::{self, LeaveEvent, Notifier, NotifyTarget};
use super::roles::RoleResolver;
use super::store::{LeaveFilter, LeaveStore};
use super::utils;
use std::sync::Arc;
use tracing::{debug, info};

// one retry after a lost compare-and-swap, then the conflict is surfaced
const MAX_ATTEMPTS: usize = 2;

pub struct LeaveService {
    instance: Arc<sled::Db>,
    store: LeaveStore,
    documents: DocumentStore,
    chain: ChainConfig,
    policy: ApprovalPolicy,
    default_page_size: u32,
    roles: Arc<dyn RoleResolver>,
    notifier: Arc<dyn Notifier>,
}

/// 1-based page request. `per_page` falls back to the configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeavePage {
    pub data: Vec<LeaveRequest>,
    pub page: u32,
    pub per_page: u32,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaveSummary {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub approved_days: u64,
}

impl Page {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }
}

impl LeaveSummary {
    pub fn from_requests<'a>(requests: impl IntoIterator<Item = &'a LeaveRequest>) -> Self {
        requests
            .into_iter()
            .fold(Self::default(), |mut summary, request| {
                match request.status {
                    LeaveStatus::Pending => summary.pending += 1,
                    LeaveStatus::Approved => {
                        summary.approved += 1;
                        summary.approved_days += u64::from(request.total_days);
                    }
                    LeaveStatus::Rejected => summary.rejected += 1,
                }
                summary
            })
    }

    pub fn total(&self) -> usize {
        self.pending + self.approved + self.rejected
    }
}

impl LeaveService {
    pub fn new(
        instance: Arc<sled::Db>,
        config: &Config,
        roles: Arc<dyn RoleResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> LeaveResult<Self> {
        Ok(Self {
            store: LeaveStore::open(&instance)?,
            documents: DocumentStore::open(&instance)?,
            instance,
            chain: config.chain.clone(),
            policy: config.policy,
            default_page_size: config.default_page_size,
            roles,
            notifier,
        })
    }

    /// Open the database named in the config and build a service over it.
    pub fn open(
        config: &Config,
        roles: Arc<dyn RoleResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> LeaveResult<Self> {
        let db = sled::open(&config.db_path)?;
        Self::new(Arc::new(db), config, roles, notifier)
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    /// Read, change in memory, then compare-and-swap. A lost race re-runs the
    /// whole cycle once against fresh state.
    fn mutate<T, F>(&self, id: &str, apply: F) -> LeaveResult<(LeaveRequest, T)>
    where
        F: Fn(&mut LeaveRequest) -> LeaveResult<T>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let snapshot = self.store.load(id)?;
            let mut updated = snapshot.request.clone();
            let outcome = apply(&mut updated)?;

            match self.store.commit(&snapshot, &mut updated) {
                Ok(()) => return Ok((updated, outcome)),
                Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                    debug!(leave_id = id, attempt, "Lost compare-and-swap, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit a new leave request. The optional document is written in the same
    /// transaction as the request, so a refused insert stores nothing.
    pub fn submit_leave(
        &self,
        draft: LeaveDraft,
        document: Option<DocumentUpload>,
    ) -> LeaveResult<LeaveRequest> {
        let draft = draft.validate()?;

        let document = document.map(DocumentUpload::prepare).transpose()?;
        let id = utils::new_leave_id().map_err(codec)?;

        let request = LeaveRequest::submit(
            id,
            draft,
            &self.chain,
            document.as_ref().map(|doc| doc.reference.clone()),
            TimeStamp::now(),
        );
        self.store.insert(&request, document.as_ref())?;

        info!(
            leave_id = %request.id,
            employee_id = %request.employee_id,
            leave_type = %request.leave_type,
            total_days = request.total_days,
            "Leave request submitted"
        );
        notify::dispatch(
            self.notifier.as_ref(),
            &request,
            notify::submission_targets(&request),
        );

        Ok(request)
    }

    /// Employee correction of dates, type or reason before anyone has acted.
    pub fn amend_leave(
        &self,
        id: &str,
        employee_id: &str,
        draft: LeaveDraft,
    ) -> LeaveResult<LeaveRequest> {
        let draft = draft.validate()?;
        let (request, ()) = self.mutate(id, |request| {
            request.amend(employee_id, draft.clone(), TimeStamp::now())
        })?;

        info!(leave_id = id, total_days = request.total_days, "Leave request amended");
        Ok(request)
    }

    /// Record one approver's decision on the stage for `role`.
    pub fn act_on_stage(
        &self,
        id: &str,
        role: &ChainRole,
        decision: Decision,
        comment: Option<&str>,
        actor_id: &str,
    ) -> LeaveResult<LeaveRequest> {
        let (request, transition) = self.mutate(id, |request| {
            request.ensure_pending()?;
            if !self.roles.holds(actor_id, role) {
                return Err(TransitionError::RoleNotHeld {
                    actor: actor_id.to_string(),
                    role: role.clone(),
                }
                .into());
            }
            request.act_on_stage(role, decision, comment, actor_id, &self.policy, TimeStamp::now())
        })?;

        info!(
            leave_id = id,
            %role,
            ?decision,
            actor_id,
            status = %request.status,
            "Leave stage decided"
        );
        notify::dispatch(
            self.notifier.as_ref(),
            &request,
            notify::transition_targets(&request, &transition),
        );

        Ok(request)
    }

    /// Administrative rejection outside the approval chain.
    pub fn system_reject(&self, id: &str, reason: &str, actor_id: &str) -> LeaveResult<LeaveRequest> {
        let (request, ()) =
            self.mutate(id, |request| request.system_reject(reason, actor_id, TimeStamp::now()))?;

        info!(leave_id = id, actor_id, "Leave request rejected by system");
        notify::dispatch(
            self.notifier.as_ref(),
            &request,
            vec![(
                NotifyTarget::Employee(request.employee_id.clone()),
                LeaveEvent::SystemRejected,
            )],
        );

        Ok(request)
    }

    pub fn get_leave(&self, id: &str) -> LeaveResult<LeaveRequest> {
        self.store.get(id)
    }

    pub fn rejection_detail(&self, id: &str) -> LeaveResult<Option<RejectionDetail>> {
        Ok(self.store.get(id)?.rejection_detail())
    }

    /// Filtered listing, newest first, one page at a time.
    pub fn list_leaves(&self, filter: &LeaveFilter, page: Page) -> LeaveResult<LeavePage> {
        let per_page = page
            .per_page
            .unwrap_or(self.default_page_size)
            .clamp(1, MAX_PAGE_SIZE);
        let page = page.page.unwrap_or(1).max(1);
        let offset = (page as usize - 1) * per_page as usize;

        let (data, total) = self.store.page(filter, offset, per_page as usize)?;

        Ok(LeavePage {
            data,
            page,
            per_page,
            total,
        })
    }

    /// Pending requests waiting on `role` to act next.
    pub fn pending_for_role(&self, role: &ChainRole) -> LeaveResult<Vec<LeaveRequest>> {
        let pending = self
            .store
            .scan(&LeaveFilter::default().with_status(LeaveStatus::Pending))?;
        Ok(pending
            .into_iter()
            .filter(|request| request.approval_chain.next_pending() == Some(role))
            .collect())
    }

    pub fn summarize(&self, filter: &LeaveFilter) -> LeaveResult<LeaveSummary> {
        let requests = self.store.scan(filter)?;
        Ok(LeaveSummary::from_requests(&requests))
    }

    pub fn load_document(&self, doc: &DocumentRef) -> LeaveResult<StoredDocument> {
        self.documents.load_document(doc)
    }

    /// Administrative removal. Not part of the normal lifecycle. The proof
    /// document goes too once no other request references it.
    pub fn purge_leave(&self, id: &str) -> LeaveResult<LeaveRequest> {
        let (request, document_removed) = self.store.purge(id)?;
        info!(
            leave_id = id,
            status = %request.status,
            document_removed,
            "Leave request purged"
        );
        Ok(request)
    }

    pub fn flush(&self) -> LeaveResult<usize> {
        Ok(self.instance.flush()?)
    }
}

impl std::fmt::Debug for LeaveService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaveService")
            .field("chain", &self.chain)
            .field("policy", &self.policy)
            .field("leaves", &self.store.len())
            .finish_non_exhaustive()
    }
}
