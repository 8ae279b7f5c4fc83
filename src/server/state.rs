use std::sync::Arc;

use crate::core_types::ServerId;
use crate::rpc::RpcHandler;

/// Node state shared by all request handlers
#[derive(Clone)]
pub struct AppState {
    pub server_id: ServerId,
    /// "coordinator" or "participant"
    pub role: &'static str,
    /// Coordinator or participant dispatch
    pub handler: Arc<dyn RpcHandler>,
}

impl AppState {
    pub fn new(server_id: impl Into<ServerId>, role: &'static str, handler: Arc<dyn RpcHandler>) -> Self {
        Self {
            server_id: server_id.into(),
            role,
            handler,
        }
    }
}
