use std::sync::Arc;

use parley_db::Database;
use parley_gateway::Relay;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub relay: Relay,
}

impl AppStateInner {
    /// The relay records transcripts into the same database the admin routes read.
    pub fn new(db: Arc<Database>) -> AppState {
        let relay = Relay::new(db.clone());
        Arc::new(Self { db, relay })
    }
}
