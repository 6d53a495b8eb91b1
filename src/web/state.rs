use crate::agent::Pipeline;
use crate::web::session::SessionStore;
use chrono_tz::Tz;
use std::sync::Arc;

/// Shared application state for the web server
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub sessions: SessionStore,
    pub timezone: Tz,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, timezone: Tz) -> Self {
        Self {
            pipeline,
            sessions: SessionStore::default(),
            timezone,
            startup_time: chrono::Utc::now(),
        }
    }
}
