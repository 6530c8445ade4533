//! Resolve tokens to the entities they identify

use tracing::debug;

use crate::authn::tokens::{Principal, TokenKind, TokenService};
use crate::domain::model::{Deployment, Service, User};
use crate::errors::AppError;
use crate::storage::uow::Store;

/// A service resolved from a service token, with the labels the token carries
#[derive(Debug, Clone)]
pub struct ServicePrincipal {
    pub service: Service,
    pub origin: Option<String>,
    pub user: Option<String>,
}

fn not_found(kind: TokenKind, err: AppError) -> AppError {
    match err {
        AppError::NotFound(_) => AppError::PrincipalNotFound(kind.to_string()),
        other => other,
    }
}

impl TokenService {
    /// Resolve a user token to the user it names.
    ///
    /// Like the other `resolve_*` methods this opens its own short-lived unit
    /// of work, so it must not be called while the caller holds one.
    pub async fn resolve_user(&self, token: &str, store: &Store) -> Result<User, AppError> {
        let claims = self.resolve(token, TokenKind::User)?;
        let Principal::User { user } = claims.principal else {
            return Err(AppError::InvalidToken("malformed user claims".to_string()));
        };

        let mut uow = store.begin().await;
        let found = uow.users().get(&user).map_err(|e| not_found(TokenKind::User, e));
        uow.rollback();
        debug!("Resolved user token for {}", user);
        found
    }

    pub async fn resolve_service(
        &self,
        token: &str,
        store: &Store,
    ) -> Result<ServicePrincipal, AppError> {
        let claims = self.resolve(token, TokenKind::Service)?;
        let Principal::Service { service, origin, user } = claims.principal else {
            return Err(AppError::InvalidToken("malformed service claims".to_string()));
        };

        let mut uow = store.begin().await;
        let found = uow
            .services()
            .get_by_name(&service)
            .map_err(|e| not_found(TokenKind::Service, e));
        uow.rollback();
        Ok(ServicePrincipal {
            service: found?,
            origin,
            user,
        })
    }

    pub async fn resolve_deployment(
        &self,
        token: &str,
        store: &Store,
    ) -> Result<Deployment, AppError> {
        let claims = self.resolve(token, TokenKind::Deployment)?;
        let Principal::Deployment { deployment } = claims.principal else {
            return Err(AppError::InvalidToken("malformed deployment claims".to_string()));
        };

        let mut uow = store.begin().await;
        let found = uow
            .deployments()
            .get(deployment)
            .map_err(|e| not_found(TokenKind::Deployment, e));
        uow.rollback();
        found
    }
}
