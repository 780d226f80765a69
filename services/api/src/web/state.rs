//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use mindhit_core::ports::{DatabaseService, JobQueue};
use std::sync::Arc;

use crate::service::{EventService, MindmapService, SessionService, UrlRegistry};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub sessions: SessionService,
    pub events: EventService,
    pub mindmaps: MindmapService,
}

impl AppState {
    pub fn new(db: Arc<dyn DatabaseService>, queue: Arc<dyn JobQueue>) -> Self {
        let sessions = SessionService::new(db.clone());
        let events = EventService::new(
            db.clone(),
            queue,
            sessions.clone(),
            UrlRegistry::new(db.clone()),
        );
        let mindmaps = MindmapService::new(db.clone(), sessions.clone());
        Self {
            db,
            sessions,
            events,
            mindmaps,
        }
    }
}
