//! User authentication and token issuing

use deploy_api::{ServiceTokenRequest, TokenResponse};
use tracing::{info, warn};

use crate::authn::tokens::Principal;
use crate::domain::model::User;
use crate::errors::AppError;
use crate::services::Orchestrator;

impl Orchestrator {
    /// Check a username and password.
    ///
    /// Unknown users and wrong passwords fail the same way.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AppError> {
        let mut uow = self.store.begin().await;
        let user = uow.users().get(username);
        uow.rollback();

        let user = match user {
            Ok(user) => user,
            Err(AppError::NotFound(_)) => {
                warn!("Login attempt for unknown user {}", username);
                return Err(AppError::AuthFailure);
            }
            Err(e) => return Err(e),
        };

        if !self.hasher.verify(password, &user.password) {
            warn!("Wrong password for user {}", username);
            return Err(AppError::AuthFailure);
        }
        Ok(user)
    }

    /// Authenticate and hand out a user token
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, AppError> {
        let user = self.authenticate(username, password).await?;
        let token = self.tokens.issue_default(Principal::user(&user.name))?;
        info!("User {} logged in", user.name);
        Ok(TokenResponse::bearer(token))
    }

    pub async fn create_user(&self, name: &str, password: &str) -> Result<User, AppError> {
        if name.trim().is_empty() || password.is_empty() {
            return Err(AppError::Conflict(
                "username and password must not be empty".to_string(),
            ));
        }

        let mut uow = self.store.begin().await;
        let user = uow
            .users()
            .add(User::new(name.trim(), self.hasher.hash(password)?))?;
        self.bus.commit(uow).await?;
        info!("Created user {}", user.name);
        Ok(user)
    }

    /// Issue a service token on behalf of a logged in user.
    ///
    /// The token records the user and the requested origin, which end up on
    /// every deployment started with it.
    pub async fn issue_service_token(
        &self,
        user_token: &str,
        request: ServiceTokenRequest,
    ) -> Result<TokenResponse, AppError> {
        let user = self.tokens.resolve_user(user_token, &self.store).await?;

        let mut uow = self.store.begin().await;
        let service = uow.services().get_by_name(&request.service);
        uow.rollback();
        let service = service?;

        let token = self.tokens.issue_default(Principal::Service {
            service: service.name.clone(),
            origin: request.origin,
            user: Some(user.name.clone()),
        })?;
        info!("Issued service token for {} to {}", service.name, user.name);
        Ok(TokenResponse::bearer(token))
    }
}
