//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of every storage port and of the job queue. It
//! keeps the same transactional guarantees as the Postgres adapter by doing each
//! multi-step operation under one lock. Used by the test suites and for local
//! runs without a database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mindhit_core::ai::{AiConfig, AiConfigInput, AiLog, NewAiLog};
use mindhit_core::domain::{
    event_types, CommitOutcome, EventStats, Highlight, MindmapGraph, MindmapStatus, NewHighlight,
    NewRawEvent, NewTokenUsage, NewUrl, PageVisit, PageVisitWithUrl, RawEvent, RecordStatus,
    Session, SessionDetails, SessionStatus, TokenUsage, Url,
};
use mindhit_core::jobs::{EnqueueOutcome, Job, JobState, NewJob, LEASE_GRACE_SECS};
use mindhit_core::mindmap::MindmapData;
use mindhit_core::ports::{
    AiRepository, AuthRepository, EventRepository, JobQueue, MindmapRepository, PortError,
    PortResult, SessionRepository, UrlRepository, UsageRepository,
};
use mindhit_core::usage::{ActiveSubscription, BillingAccount};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

//=========================================================================================
// State
//=========================================================================================

#[derive(Debug, Clone)]
struct UserRow {
    status: RecordStatus,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredJob {
    job: Job,
    lease_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserRow>,
    auth_tokens: HashMap<String, (Uuid, DateTime<Utc>)>,
    subscriptions: HashMap<Uuid, ActiveSubscription>,
    sessions: HashMap<Uuid, Session>,
    raw_events: Vec<RawEvent>,
    page_visits: Vec<PageVisit>,
    highlights: Vec<Highlight>,
    urls: HashMap<Uuid, Url>,
    url_by_hash: HashMap<String, Uuid>,
    mindmaps: HashMap<Uuid, MindmapGraph>,
    ai_configs: BTreeMap<String, AiConfig>,
    ai_logs: Vec<AiLog>,
    token_usage: Vec<TokenUsage>,
    jobs: Vec<StoredJob>,
    failing: HashSet<&'static str>,
}

impl Inner {
    fn check(&self, op: &'static str) -> PortResult<()> {
        if self.failing.contains(op) {
            Err(PortError::Unexpected(format!("injected failure in {}", op)))
        } else {
            Ok(())
        }
    }

    fn live_session(&self, session_id: Uuid) -> Option<&Session> {
        self.sessions.get(&session_id).filter(|s| {
            s.record_status == RecordStatus::Active
                && self
                    .users
                    .get(&s.user_id)
                    .map_or(false, |u| u.status == RecordStatus::Active)
        })
    }

    fn set_status(&mut self, session_id: Uuid, to: SessionStatus, now: DateTime<Utc>) -> Option<Session> {
        let session = self.sessions.get_mut(&session_id)?;
        session.session_status = to;
        session.ended_at = if to.is_ended() {
            Some(session.ended_at.unwrap_or(now))
        } else {
            None
        };
        session.updated_at = now;
        Some(session.clone())
    }

    fn insert_job(&mut self, job: NewJob) -> EnqueueOutcome {
        if let Some(key) = &job.unique_key {
            let live = self.jobs.iter().any(|j| {
                j.job.unique_key.as_ref() == Some(key)
                    && matches!(j.job.state, JobState::Pending | JobState::Active)
            });
            if live {
                return EnqueueOutcome::Duplicate;
            }
        }
        let id = Uuid::new_v4();
        self.jobs.push(StoredJob {
            job: Job {
                id,
                type_tag: job.type_tag,
                payload: job.payload,
                queue: job.queue,
                state: JobState::Pending,
                max_retry: job.max_retry,
                retried: 0,
                timeout_secs: job.timeout_secs,
                process_at: job.process_at,
                last_error: None,
                unique_key: job.unique_key,
                created_at: Utc::now(),
            },
            lease_until: None,
        });
        EnqueueOutcome::Enqueued(id)
    }

    fn job_mut(&mut self, job_id: Uuid) -> PortResult<&mut StoredJob> {
        self.jobs
            .iter_mut()
            .find(|j| j.job.id == job_id)
            .ok_or_else(|| PortError::NotFound(format!("job {}", job_id)))
    }

    fn upsert_mindmap(&mut self, session_id: Uuid, status: MindmapStatus, now: DateTime<Utc>) -> &mut MindmapGraph {
        let graph = self.mindmaps.entry(session_id).or_insert_with(|| MindmapGraph {
            id: Uuid::new_v4(),
            session_id,
            status,
            error_message: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            layout: None,
            generated_at: now,
            version: 0,
            created_at: now,
            updated_at: now,
        });
        graph.status = status;
        graph.updated_at = now;
        if status != MindmapStatus::Completed {
            graph.nodes.clear();
            graph.edges.clear();
            graph.layout = None;
        }
        graph
    }

    fn insert_usage(&mut self, usage: NewTokenUsage) -> TokenUsage {
        let row = TokenUsage {
            id: Uuid::new_v4(),
            user_id: usage.user_id,
            session_id: usage.session_id,
            operation: usage.operation,
            tokens_used: usage.tokens_used,
            ai_model: usage.ai_model,
            period_start: usage.period_start,
            created_at: Utc::now(),
        };
        self.token_usage.push(row.clone());
        row
    }
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    //=====================================================================================
    // Seeding and inspection helpers
    //=====================================================================================

    pub fn seed_user(&self) -> Uuid {
        self.seed_user_at(Utc::now())
    }

    pub fn seed_user_at(&self, created_at: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().users.insert(
            id,
            UserRow {
                status: RecordStatus::Active,
                created_at,
            },
        );
        id
    }

    pub fn deactivate_user(&self, user_id: Uuid) {
        if let Some(user) = self.inner.lock().users.get_mut(&user_id) {
            user.status = RecordStatus::Inactive;
        }
    }

    /// Issues an access token valid for `ttl`.
    pub fn issue_token(&self, user_id: Uuid, ttl: Duration) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.inner
            .lock()
            .auth_tokens
            .insert(token.clone(), (user_id, Utc::now() + ttl));
        token
    }

    pub fn set_subscription(&self, user_id: Uuid, subscription: ActiveSubscription) {
        self.inner.lock().subscriptions.insert(user_id, subscription);
    }

    /// Backdates a session's `updated_at`, as if it had been idle.
    pub fn set_session_updated_at(&self, session_id: Uuid, at: DateTime<Utc>) {
        if let Some(session) = self.inner.lock().sessions.get_mut(&session_id) {
            session.updated_at = at;
        }
    }

    /// Raw session row, including soft-deleted ones.
    pub fn session_row(&self, session_id: Uuid) -> Option<Session> {
        self.inner.lock().sessions.get(&session_id).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.inner.lock().jobs.iter().map(|j| j.job.clone()).collect()
    }

    pub fn jobs_of_type(&self, type_tag: &str) -> Vec<Job> {
        self.jobs().into_iter().filter(|j| j.type_tag == type_tag).collect()
    }

    pub fn page_visits(&self, session_id: Uuid) -> Vec<PageVisit> {
        self.inner
            .lock()
            .page_visits
            .iter()
            .filter(|v| v.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn highlights(&self, session_id: Uuid) -> Vec<Highlight> {
        self.inner
            .lock()
            .highlights
            .iter()
            .filter(|h| h.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn raw_events(&self, session_id: Uuid) -> Vec<RawEvent> {
        self.inner
            .lock()
            .raw_events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.inner.lock().urls.values().cloned().collect()
    }

    pub fn ai_logs(&self) -> Vec<AiLog> {
        self.inner.lock().ai_logs.clone()
    }

    pub fn token_usage(&self) -> Vec<TokenUsage> {
        self.inner.lock().token_usage.clone()
    }

    /// Makes every later call of `op` fail with `PortError::Unexpected`.
    pub fn fail_operation(&self, op: &'static str) {
        self.inner.lock().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failing.clear();
    }
}

//=========================================================================================
// Storage Ports
//=========================================================================================

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create_session(&self, user_id: Uuid) -> PortResult<Session> {
        let mut inner = self.inner.lock();
        inner.check("create_session")?;
        if !inner.users.contains_key(&user_id) {
            return Err(PortError::NotFound(format!("user {}", user_id)));
        }
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            title: None,
            description: None,
            session_status: SessionStatus::Recording,
            started_at: now,
            ended_at: None,
            record_status: RecordStatus::Active,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, session_id: Uuid) -> PortResult<Option<Session>> {
        let inner = self.inner.lock();
        inner.check("find_session")?;
        Ok(inner.live_session(session_id).cloned())
    }

    async fn list_sessions_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> PortResult<Vec<Session>> {
        let inner = self.inner.lock();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.record_status == RecordStatus::Active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(sessions
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_session_metadata(
        &self,
        session_id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
    ) -> PortResult<Session> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .filter(|s| s.record_status == RecordStatus::Active)
            .ok_or_else(|| PortError::NotFound(format!("session {}", session_id)))?;
        if let Some(title) = title {
            session.title = Some(title.to_string());
        }
        if let Some(description) = description {
            session.description = Some(description.to_string());
        }
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn transition_session(
        &self,
        session_id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
        outbox: Option<NewJob>,
    ) -> PortResult<Option<Session>> {
        let mut inner = self.inner.lock();
        inner.check("transition_session")?;
        let eligible = inner
            .sessions
            .get(&session_id)
            .map_or(false, |s| s.record_status == RecordStatus::Active && from.contains(&s.session_status));
        if !eligible {
            return Ok(None);
        }
        let updated = inner.set_status(session_id, to, Utc::now());
        if let Some(job) = outbox {
            inner.insert_job(job);
        }
        Ok(updated)
    }

    async fn soft_delete_session(&self, session_id: Uuid) -> PortResult<bool> {
        let mut inner = self.inner.lock();
        inner.check("soft_delete_session")?;
        match inner.sessions.get_mut(&session_id) {
            Some(s) if s.record_status == RecordStatus::Active => {
                let now = Utc::now();
                s.record_status = RecordStatus::Inactive;
                s.deleted_at = Some(now);
                s.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn load_session_details(&self, session_id: Uuid) -> PortResult<Option<SessionDetails>> {
        let inner = self.inner.lock();
        inner.check("load_session_details")?;
        let Some(session) = inner.live_session(session_id).cloned() else {
            return Ok(None);
        };
        let mut page_visits: Vec<PageVisitWithUrl> = inner
            .page_visits
            .iter()
            .filter(|v| v.session_id == session_id)
            .filter_map(|v| {
                inner.urls.get(&v.url_id).map(|u| PageVisitWithUrl {
                    visit: v.clone(),
                    url: u.clone(),
                })
            })
            .collect();
        page_visits.sort_by_key(|p| p.visit.entered_at);
        let highlights = inner
            .highlights
            .iter()
            .filter(|h| h.session_id == session_id)
            .cloned()
            .collect();
        Ok(Some(SessionDetails {
            session,
            page_visits,
            highlights,
            mindmap: inner.mindmaps.get(&session_id).cloned(),
        }))
    }

    async fn fail_stale_sessions(&self, updated_before: DateTime<Utc>) -> PortResult<u64> {
        let mut inner = self.inner.lock();
        inner.check("fail_stale_sessions")?;
        let stale: Vec<Uuid> = inner
            .sessions
            .values()
            .filter(|s| {
                s.record_status == RecordStatus::Active
                    && matches!(s.session_status, SessionStatus::Recording | SessionStatus::Paused)
                    && s.updated_at < updated_before
            })
            .map(|s| s.id)
            .collect();
        let now = Utc::now();
        for id in &stale {
            inner.set_status(*id, SessionStatus::Failed, now);
        }
        Ok(stale.len() as u64)
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn insert_raw_event(&self, event: NewRawEvent) -> PortResult<RawEvent> {
        let mut inner = self.inner.lock();
        inner.check("insert_raw_event")?;
        let now = Utc::now();
        let row = RawEvent {
            id: Uuid::new_v4(),
            session_id: event.session_id,
            event_type: event.event_type,
            timestamp: event.timestamp,
            payload: event.payload,
            processed: false,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.raw_events.push(row.clone());
        Ok(row)
    }

    async fn mark_raw_event_processed(&self, event_id: Uuid) -> PortResult<()> {
        let mut inner = self.inner.lock();
        if let Some(e) = inner.raw_events.iter_mut().find(|e| e.id == event_id) {
            let now = Utc::now();
            e.processed = true;
            e.processed_at = Some(now);
            e.updated_at = now;
        }
        Ok(())
    }

    async fn insert_page_visit(
        &self,
        session_id: Uuid,
        url_id: Uuid,
        entered_at: DateTime<Utc>,
    ) -> PortResult<PageVisit> {
        let mut inner = self.inner.lock();
        inner.check("insert_page_visit")?;
        if !inner.urls.contains_key(&url_id) {
            return Err(PortError::NotFound(format!("url {}", url_id)));
        }
        let now = Utc::now();
        let visit = PageVisit {
            id: Uuid::new_v4(),
            session_id,
            url_id,
            entered_at,
            left_at: None,
            duration_ms: None,
            max_scroll_depth: 0.0,
            created_at: now,
            updated_at: now,
        };
        inner.page_visits.push(visit.clone());
        Ok(visit)
    }

    async fn insert_highlight(&self, highlight: NewHighlight) -> PortResult<Highlight> {
        let mut inner = self.inner.lock();
        inner.check("insert_highlight")?;
        let now = Utc::now();
        let row = Highlight {
            id: Uuid::new_v4(),
            session_id: highlight.session_id,
            page_visit_id: highlight.page_visit_id,
            text: highlight.text,
            selector: highlight.selector,
            color: highlight.color,
            note: None,
            created_at: now,
            updated_at: now,
        };
        inner.highlights.push(row.clone());
        Ok(row)
    }

    async fn list_raw_events(
        &self,
        session_id: Uuid,
        event_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> PortResult<(Vec<RawEvent>, i64)> {
        let inner = self.inner.lock();
        let mut events: Vec<RawEvent> = inner
            .raw_events
            .iter()
            .filter(|e| e.session_id == session_id)
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.created_at.cmp(&a.created_at)));
        let total = events.len() as i64;
        let page = events
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn event_stats(&self, session_id: Uuid) -> PortResult<EventStats> {
        let inner = self.inner.lock();
        let mut stats = EventStats::default();
        for e in inner.raw_events.iter().filter(|e| e.session_id == session_id) {
            stats.total_events += 1;
            match e.event_type.as_str() {
                event_types::PAGE_VISIT => stats.page_visits += 1,
                event_types::HIGHLIGHT => stats.highlights += 1,
                _ => {}
            }
        }
        stats.unique_urls = inner
            .page_visits
            .iter()
            .filter(|v| v.session_id == session_id)
            .map(|v| v.url_id)
            .collect::<HashSet<_>>()
            .len() as i64;
        Ok(stats)
    }
}

#[async_trait]
impl UrlRepository for MemoryStore {
    async fn find_url(&self, url_id: Uuid) -> PortResult<Option<Url>> {
        let inner = self.inner.lock();
        inner.check("find_url")?;
        Ok(inner.urls.get(&url_id).cloned())
    }

    async fn find_url_by_hash(&self, url_hash: &str) -> PortResult<Option<Url>> {
        let inner = self.inner.lock();
        inner.check("find_url_by_hash")?;
        Ok(inner
            .url_by_hash
            .get(url_hash)
            .and_then(|id| inner.urls.get(id))
            .cloned())
    }

    async fn insert_url_if_absent(&self, url: NewUrl) -> PortResult<(Url, bool)> {
        let mut inner = self.inner.lock();
        inner.check("insert_url_if_absent")?;
        if let Some(existing) = inner.url_by_hash.get(&url.url_hash).and_then(|id| inner.urls.get(id)) {
            return Ok((existing.clone(), false));
        }
        let now = Utc::now();
        let row = Url {
            id: Uuid::new_v4(),
            url: url.url,
            url_hash: url.url_hash,
            title: url.title,
            content: url.content,
            summary: None,
            keywords: Vec::new(),
            crawled_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.url_by_hash.insert(row.url_hash.clone(), row.id);
        inner.urls.insert(row.id, row.clone());
        Ok((row, true))
    }

    async fn fill_url_content(&self, url_id: Uuid, content: &str) -> PortResult<Url> {
        let mut inner = self.inner.lock();
        inner.check("fill_url_content")?;
        let url = inner
            .urls
            .get_mut(&url_id)
            .ok_or_else(|| PortError::NotFound(format!("url {}", url_id)))?;
        if !url.has_content() {
            url.content = Some(content.to_string());
            url.updated_at = Utc::now();
        }
        Ok(url.clone())
    }

    async fn update_url_summary(
        &self,
        url_id: Uuid,
        summary: &str,
        keywords: &[String],
    ) -> PortResult<Url> {
        let mut inner = self.inner.lock();
        inner.check("update_url_summary")?;
        let url = inner
            .urls
            .get_mut(&url_id)
            .ok_or_else(|| PortError::NotFound(format!("url {}", url_id)))?;
        let now = Utc::now();
        url.summary = Some(summary.to_string());
        url.keywords = keywords.to_vec();
        url.crawled_at = Some(now);
        url.updated_at = now;
        Ok(url.clone())
    }

    async fn list_urls_without_summary(&self, limit: i64) -> PortResult<Vec<Url>> {
        let inner = self.inner.lock();
        let mut urls: Vec<Url> = inner
            .urls
            .values()
            .filter(|u| u.summary.as_deref().map_or(true, str::is_empty) && u.has_content())
            .cloned()
            .collect();
        urls.sort_by_key(|u| u.created_at);
        urls.truncate(limit.max(0) as usize);
        Ok(urls)
    }
}

#[async_trait]
impl MindmapRepository for MemoryStore {
    async fn find_mindmap(&self, session_id: Uuid) -> PortResult<Option<MindmapGraph>> {
        let inner = self.inner.lock();
        inner.check("find_mindmap")?;
        Ok(inner.mindmaps.get(&session_id).cloned())
    }

    async fn ensure_mindmap(&self, session_id: Uuid) -> PortResult<MindmapGraph> {
        let mut inner = self.inner.lock();
        inner.check("ensure_mindmap")?;
        if let Some(existing) = inner.mindmaps.get(&session_id) {
            return Ok(existing.clone());
        }
        Ok(inner.upsert_mindmap(session_id, MindmapStatus::Pending, Utc::now()).clone())
    }

    async fn mark_mindmap_running(&self, session_id: Uuid) -> PortResult<()> {
        let mut inner = self.inner.lock();
        inner.check("mark_mindmap_running")?;
        let graph = inner.upsert_mindmap(session_id, MindmapStatus::Running, Utc::now());
        graph.error_message = None;
        Ok(())
    }

    async fn begin_regeneration(
        &self,
        session_id: Uuid,
        outbox: NewJob,
    ) -> PortResult<Option<(Session, MindmapGraph)>> {
        let mut inner = self.inner.lock();
        inner.check("begin_regeneration")?;
        let eligible = inner.sessions.get(&session_id).map_or(false, |s| {
            s.record_status == RecordStatus::Active && s.session_status.is_terminal()
        });
        if !eligible {
            return Ok(None);
        }
        let now = Utc::now();
        let Some(session) = inner.set_status(session_id, SessionStatus::Processing, now) else {
            return Ok(None);
        };
        let graph = inner.upsert_mindmap(session_id, MindmapStatus::Pending, now);
        graph.error_message = None;
        let graph = graph.clone();
        inner.insert_job(outbox);
        Ok(Some((session, graph)))
    }

    async fn commit_mindmap(
        &self,
        session_id: Uuid,
        data: &MindmapData,
        usage: Option<NewTokenUsage>,
    ) -> PortResult<CommitOutcome> {
        let mut inner = self.inner.lock();
        inner.check("commit_mindmap")?;
        let processing = inner.sessions.get(&session_id).map_or(false, |s| {
            s.record_status == RecordStatus::Active && s.session_status == SessionStatus::Processing
        });
        if !processing {
            return Ok(CommitOutcome::SessionNotProcessing);
        }
        if let Some(usage) = usage {
            inner.insert_usage(usage);
        }
        let now = Utc::now();
        let graph = inner.upsert_mindmap(session_id, MindmapStatus::Completed, now);
        graph.version += 1;
        graph.error_message = None;
        graph.nodes = data.nodes.clone();
        graph.edges = data.edges.clone();
        graph.layout = Some(data.layout.clone());
        graph.generated_at = now;
        let graph = graph.clone();
        inner.set_status(session_id, SessionStatus::Completed, now);
        Ok(CommitOutcome::Committed(graph))
    }

    async fn fail_mindmap(&self, session_id: Uuid, error: &str) -> PortResult<bool> {
        let mut inner = self.inner.lock();
        inner.check("fail_mindmap")?;
        let processing = inner.sessions.get(&session_id).map_or(false, |s| {
            s.record_status == RecordStatus::Active && s.session_status == SessionStatus::Processing
        });
        if !processing {
            return Ok(false);
        }
        let now = Utc::now();
        inner.set_status(session_id, SessionStatus::Failed, now);
        let graph = inner.upsert_mindmap(session_id, MindmapStatus::Failed, now);
        graph.error_message = Some(error.to_string());
        Ok(true)
    }
}

#[async_trait]
impl AiRepository for MemoryStore {
    async fn find_enabled_ai_config(&self, task_type: &str) -> PortResult<Option<AiConfig>> {
        let inner = self.inner.lock();
        inner.check("find_enabled_ai_config")?;
        Ok(inner.ai_configs.get(task_type).filter(|c| c.enabled).cloned())
    }

    async fn list_ai_configs(&self) -> PortResult<Vec<AiConfig>> {
        Ok(self.inner.lock().ai_configs.values().cloned().collect())
    }

    async fn upsert_ai_config(&self, input: AiConfigInput) -> PortResult<AiConfig> {
        let mut inner = self.inner.lock();
        inner.check("upsert_ai_config")?;
        let now = Utc::now();
        let (id, created_at) = inner
            .ai_configs
            .get(&input.task_type)
            .map_or((Uuid::new_v4(), now), |c| (c.id, c.created_at));
        let config = AiConfig {
            id,
            task_type: input.task_type.clone(),
            provider: input.provider,
            model: input.model,
            fallback_providers: input.fallback_providers,
            temperature: input.temperature,
            max_tokens: input.max_tokens,
            thinking_budget: input.thinking_budget,
            json_mode: input.json_mode,
            enabled: input.enabled,
            updated_by: input.updated_by,
            created_at,
            updated_at: now,
        };
        inner.ai_configs.insert(input.task_type, config.clone());
        Ok(config)
    }

    async fn delete_ai_config(&self, task_type: &str) -> PortResult<bool> {
        Ok(self.inner.lock().ai_configs.remove(task_type).is_some())
    }

    async fn insert_ai_log(&self, log: NewAiLog) -> PortResult<AiLog> {
        let mut inner = self.inner.lock();
        inner.check("insert_ai_log")?;
        let row = AiLog {
            id: Uuid::new_v4(),
            entry: log,
            created_at: Utc::now(),
        };
        inner.ai_logs.push(row.clone());
        Ok(row)
    }

    async fn list_ai_logs_for_session(&self, session_id: Uuid) -> PortResult<Vec<AiLog>> {
        Ok(self
            .inner
            .lock()
            .ai_logs
            .iter()
            .filter(|l| l.entry.session_id == Some(session_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UsageRepository for MemoryStore {
    async fn billing_account(&self, user_id: Uuid) -> PortResult<Option<BillingAccount>> {
        let inner = self.inner.lock();
        inner.check("billing_account")?;
        Ok(inner
            .users
            .get(&user_id)
            .filter(|u| u.status == RecordStatus::Active)
            .map(|u| BillingAccount {
                signup_at: u.created_at,
                subscription: inner.subscriptions.get(&user_id).copied(),
            }))
    }

    async fn insert_token_usage(&self, usage: NewTokenUsage) -> PortResult<TokenUsage> {
        let mut inner = self.inner.lock();
        inner.check("insert_token_usage")?;
        Ok(inner.insert_usage(usage))
    }

    async fn sum_tokens_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<i64> {
        let inner = self.inner.lock();
        inner.check("sum_tokens_since")?;
        Ok(inner
            .token_usage
            .iter()
            .filter(|u| u.user_id == user_id && u.created_at >= since)
            .map(|u| u.tokens_used)
            .sum())
    }
}

#[async_trait]
impl AuthRepository for MemoryStore {
    async fn validate_auth_session(&self, token: &str) -> PortResult<Uuid> {
        let inner = self.inner.lock();
        let (user_id, expires_at) = inner.auth_tokens.get(token).ok_or(PortError::Unauthorized)?;
        let active = inner
            .users
            .get(user_id)
            .map_or(false, |u| u.status == RecordStatus::Active);
        if *expires_at <= Utc::now() || !active {
            return Err(PortError::Unauthorized);
        }
        Ok(*user_id)
    }
}

//=========================================================================================
// Job Queue Port
//=========================================================================================

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(&self, job: NewJob) -> PortResult<EnqueueOutcome> {
        let mut inner = self.inner.lock();
        inner.check("enqueue")?;
        Ok(inner.insert_job(job))
    }

    async fn dequeue(&self, queue: &str) -> PortResult<Option<Job>> {
        let mut inner = self.inner.lock();
        inner.check("dequeue")?;
        let now = Utc::now();
        let next = inner
            .jobs
            .iter_mut()
            .filter(|j| j.job.queue == queue && j.job.state == JobState::Pending && j.job.process_at <= now)
            .min_by_key(|j| (j.job.process_at, j.job.created_at));
        Ok(next.map(|stored| {
            stored.job.state = JobState::Active;
            stored.lease_until =
                Some(now + Duration::seconds(stored.job.timeout_secs + LEASE_GRACE_SECS));
            stored.job.clone()
        }))
    }

    async fn complete_job(&self, job_id: Uuid) -> PortResult<()> {
        let mut inner = self.inner.lock();
        let stored = inner.job_mut(job_id)?;
        stored.job.state = JobState::Completed;
        stored.lease_until = None;
        Ok(())
    }

    async fn retry_job(&self, job_id: Uuid, run_at: DateTime<Utc>, error: &str) -> PortResult<()> {
        let mut inner = self.inner.lock();
        let stored = inner.job_mut(job_id)?;
        stored.job.state = JobState::Pending;
        stored.job.retried += 1;
        stored.job.process_at = run_at;
        stored.job.last_error = Some(error.to_string());
        stored.lease_until = None;
        Ok(())
    }

    async fn bury_job(&self, job_id: Uuid, error: &str) -> PortResult<()> {
        let mut inner = self.inner.lock();
        let stored = inner.job_mut(job_id)?;
        stored.job.state = JobState::Dead;
        stored.job.last_error = Some(error.to_string());
        stored.lease_until = None;
        Ok(())
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let mut inner = self.inner.lock();
        let mut count = 0;
        for stored in inner.jobs.iter_mut() {
            if stored.job.state == JobState::Active && stored.lease_until.map_or(false, |l| l < now) {
                stored.job.state = JobState::Pending;
                stored.job.retried += 1;
                stored.job.last_error = Some("lease expired".to_string());
                stored.lease_until = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn dead_jobs(&self, limit: i64) -> PortResult<Vec<Job>> {
        Ok(self
            .inner
            .lock()
            .jobs
            .iter()
            .filter(|j| j.job.state == JobState::Dead)
            .take(limit.max(0) as usize)
            .map(|j| j.job.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindhit_core::jobs::TYPE_URL_TAG_EXTRACTION;

    #[tokio::test]
    async fn transition_is_conditional() {
        let store = MemoryStore::new();
        let user = store.seed_user();
        let session = store.create_session(user).await.unwrap();

        let paused = store
            .transition_session(session.id, &[SessionStatus::Recording], SessionStatus::Paused, None)
            .await
            .unwrap();
        assert_eq!(paused.unwrap().session_status, SessionStatus::Paused);

        let again = store
            .transition_session(session.id, &[SessionStatus::Recording], SessionStatus::Paused, None)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn unique_key_dedupes_live_jobs_only() {
        let store = MemoryStore::new();
        let url_id = Uuid::new_v4();
        let first = store.enqueue(NewJob::tag_extraction(url_id).unwrap()).await.unwrap();
        assert!(matches!(first, EnqueueOutcome::Enqueued(_)));
        let second = store.enqueue(NewJob::tag_extraction(url_id).unwrap()).await.unwrap();
        assert_eq!(second, EnqueueOutcome::Duplicate);

        let job = store.dequeue("low").await.unwrap().unwrap();
        assert_eq!(job.type_tag, TYPE_URL_TAG_EXTRACTION);
        store.complete_job(job.id).await.unwrap();
        let third = store.enqueue(NewJob::tag_extraction(url_id).unwrap()).await.unwrap();
        assert!(matches!(third, EnqueueOutcome::Enqueued(_)));
    }

    #[tokio::test]
    async fn expired_leases_return_to_pending() {
        let store = MemoryStore::new();
        store.enqueue(NewJob::tag_extraction(Uuid::new_v4()).unwrap()).await.unwrap();
        let job = store.dequeue("low").await.unwrap().unwrap();
        assert!(store.dequeue("low").await.unwrap().is_none());

        let later = Utc::now() + Duration::seconds(job.timeout_secs + LEASE_GRACE_SECS + 1);
        assert_eq!(store.requeue_expired(later).await.unwrap(), 1);
        let again = store.dequeue("low").await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.retried, 1);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_unexpected() {
        let store = MemoryStore::new();
        store.fail_operation("insert_raw_event");
        let err = store
            .insert_raw_event(NewRawEvent {
                session_id: Uuid::new_v4(),
                event_type: "x".into(),
                timestamp: Utc::now(),
                payload: "{}".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Unexpected(_)));
    }
}
