//! Socket-first reads with a REST fallback.
//!
//! The caller gets the same envelope whichever transport answered; only a
//! REST failure is surfaced.

use fva_shared::{Action, ApiEnvelope, ApiError, RouteNode, UserInfo, PATH_USER_INFO, PATH_USER_ROUTES};
use serde::de::DeserializeOwned;

use crate::api_client::ApiClient;
use crate::ws::ConnectionManager;

pub struct FallbackAdapter<'a> {
    connection: &'a ConnectionManager,
    api: ApiClient,
}

impl<'a> FallbackAdapter<'a> {
    pub fn new(connection: &'a ConnectionManager, api: ApiClient) -> Self {
        Self { connection, api }
    }

    pub async fn get_user_info(&self) -> Result<ApiEnvelope<UserInfo>, ApiError> {
        self.fetch(Action::GetUserInfo, PATH_USER_INFO).await
    }

    pub async fn get_user_routes(&self) -> Result<ApiEnvelope<Vec<RouteNode>>, ApiError> {
        self.fetch(Action::GetUserRoutes, PATH_USER_ROUTES).await
    }

    /// One socket attempt when connected, then REST. Never a second socket
    /// attempt.
    async fn fetch<T: DeserializeOwned>(
        &self,
        action: Action,
        path: &str,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        if self.connection.is_connected() {
            match self.via_socket(action).await {
                Ok(data) => return Ok(ApiEnvelope::ok(data)),
                Err(e) => {
                    crate::log_warn!("{} over websocket failed, falling back to HTTP: {}", action, e);
                }
            }
        }
        self.api.get(path).await
    }

    async fn via_socket<T: DeserializeOwned>(&self, action: Action) -> Result<T, ApiError> {
        let data = self.connection.call_action(action).await?;
        Ok(serde_json::from_value(data)?)
    }
}
