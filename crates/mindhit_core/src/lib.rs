pub mod ai;
pub mod domain;
pub mod jobs;
pub mod lifecycle;
pub mod mindmap;
pub mod ports;
pub mod url_norm;
pub mod usage;

pub use domain::{
    BatchEvent, EventStats, Highlight, MindmapGraph, MindmapStatus, PageVisit, RawEvent,
    RecordStatus, Session, SessionDetails, SessionStatus, Url,
};
pub use lifecycle::{SessionAction, InvalidTransition};
pub use ports::{
    AiProvider, AiRepository, AuthRepository, DatabaseService, EventRepository, JobQueue,
    MindmapRepository, PortError, PortResult, SessionRepository, UrlRepository, UsageRepository,
};
