use crate::db::Store;
use crate::dispatch::CycleRunner;
use crate::schedule::NotifScheduler;
use std::sync::Arc;

/// State shared by the HTTP handlers.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub runner: Arc<CycleRunner>,
    pub scheduler: Arc<NotifScheduler>,
}
