pub mod error;
pub mod interactions;
pub mod likes;
pub mod middleware;
pub mod reactions;

use std::sync::Arc;

use kindred_db::Database;
use kindred_gateway::Hub;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub hub: Hub,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, jwt_secret: impl Into<String>) -> Self {
        let hub = Hub::new(db.clone());
        Self {
            db,
            hub,
            jwt_secret: jwt_secret.into(),
        }
    }
}
