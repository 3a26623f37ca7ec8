//! Guarded resource lookups.
//!
//! `GET /api/patients/{id}`, `/api/appointments/{id}` and `/api/billing/{id}`
//! run the full read check for their resource type and answer with the
//! record's owning identifiers. Record contents live elsewhere.

use std::marker::PhantomData;

use axum::{
    Json,
    extract::{FromRef, FromRequestParts, State},
    http::request::Parts,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AuthError;
use crate::middleware::{AuthContext, AuthState, FlexibleAuth, OwnedResource, ResourceSpec};
use crate::ownership::{OwnershipGuard, ResourceOwner, ResourceType};

/// Read access to one resource instance: a read capability for the type
/// (`read:<type>` or its `read:own_*` variant), then ownership.
///
/// # Errors
///
/// Authentication errors, `PERMISSION_DENIED`, then the errors of
/// [`OwnedResource`].
pub struct ReadResource<R: ResourceSpec> {
    pub auth: AuthContext,
    pub resource_id: String,
    _spec: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for ReadResource<R>
where
    S: Send + Sync,
    AuthState: FromRef<S>,
    OwnershipGuard: FromRef<S>,
    R: ResourceSpec,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let FlexibleAuth(auth) = FlexibleAuth::from_request_parts(parts, state).await?;
        let resource_type = R::RESOURCE;
        if !auth.has_permission(resource_type.read_permission())
            && !auth.has_permission(resource_type.own_read_permission())
        {
            return Err(AuthError::permission_denied(resource_type.read_permission()));
        }

        let owned = OwnedResource::<R>::from_request_parts(parts, state).await?;
        Ok(Self {
            auth: owned.auth,
            resource_id: owned.resource_id,
            _spec: PhantomData,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAccessResponse {
    pub success: bool,
    pub resource_type: ResourceType,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<ResourceOwner>,
}

/// `GET /api/{patients,appointments,billing}/{id}`
pub async fn resource_handler<R: ResourceSpec>(
    State(guard): State<OwnershipGuard>,
    read: ReadResource<R>,
) -> Result<Json<ResourceAccessResponse>, AuthError> {
    let owner = match Uuid::parse_str(&read.resource_id) {
        Ok(id) => guard.owner_of(R::RESOURCE, id).await?,
        Err(_) => None,
    };
    tracing::debug!(
        identity_id = %read.auth.identity_id,
        resource_type = %R::RESOURCE,
        resource_id = %read.resource_id,
        "Resource access granted"
    );
    Ok(Json(ResourceAccessResponse {
        success: true,
        resource_type: R::RESOURCE,
        resource_id: read.resource_id,
        owner,
    }))
}
