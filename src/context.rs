use serde::{Deserialize, Serialize};

/// The authenticated caller, as vouched for by the session layer in front of this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: i64,
    pub email: String,
    pub name: String,
}

/// Request-scoped context passed explicitly into every settlement operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user: UserIdentity,
    /// Correlates logs and published events with the originating HTTP request.
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(user: UserIdentity) -> Self {
        Self {
            user,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn user_id(&self) -> i64 {
        self.user.id
    }
}
