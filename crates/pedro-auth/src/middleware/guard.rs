//! Authorization guard extractors.
//!
//! Each guard authenticates with [`FlexibleAuth`] first, so it can be used
//! on its own in a handler signature. Requirements are expressed as marker
//! types, keeping the check visible at the route:
//!
//! ```ignore
//! use pedro_auth::middleware::{AppointmentResource, OwnedResource, RequirePermission};
//! use pedro_auth::permission_spec;
//!
//! permission_spec!(ReadAppointments, "read:appointments");
//!
//! async fn get_appointment(
//!     _: RequirePermission<ReadAppointments>,
//!     owned: OwnedResource<AppointmentResource>,
//! ) { /* ... */ }
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use axum::extract::{FromRef, FromRequestParts, Path};
use axum::http::request::Parts;

use crate::audit::AuditScope;
use crate::error::AuthError;
use crate::ownership::{OwnershipGuard, ResourceType, resource_id_from_params};
use crate::role::Role;

use super::auth::{AuthState, FlexibleAuth};
use super::context::AuthContext;

/// Names one capability string a route requires.
pub trait PermissionSpec: Send + Sync + 'static {
    const PERMISSION: &'static str;
}

/// Names the roles a route admits.
pub trait RoleSpec: Send + Sync + 'static {
    const ROLES: &'static [Role];
}

/// Names the resource type an ownership-guarded route acts on.
pub trait ResourceSpec: Send + Sync + 'static {
    const RESOURCE: ResourceType;
}

/// Declares a zero-sized [`PermissionSpec`] marker.
#[macro_export]
macro_rules! permission_spec {
    ($name:ident, $permission:literal) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl $crate::middleware::PermissionSpec for $name {
            const PERMISSION: &'static str = $permission;
        }
    };
}

/// Declares a zero-sized [`RoleSpec`] marker.
#[macro_export]
macro_rules! role_spec {
    ($name:ident, [$($role:ident),+ $(,)?]) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl $crate::middleware::RoleSpec for $name {
            const ROLES: &'static [$crate::Role] = &[$($crate::Role::$role),+];
        }
    };
}

/// Administrators only.
#[derive(Debug, Clone, Copy)]
pub struct Administrators;

impl RoleSpec for Administrators {
    const ROLES: &'static [Role] = &Role::ADMINISTRATORS;
}

#[derive(Debug, Clone, Copy)]
pub struct PatientResource;

impl ResourceSpec for PatientResource {
    const RESOURCE: ResourceType = ResourceType::Patient;
}

#[derive(Debug, Clone, Copy)]
pub struct AppointmentResource;

impl ResourceSpec for AppointmentResource {
    const RESOURCE: ResourceType = ResourceType::Appointment;
}

#[derive(Debug, Clone, Copy)]
pub struct BillingResource;

impl ResourceSpec for BillingResource {
    const RESOURCE: ResourceType = ResourceType::Billing;
}

// =============================================================================
// Permission Guard
// =============================================================================

/// Passes when the principal's permission set grants `P::PERMISSION`.
///
/// # Errors
///
/// Authentication errors, then `PERMISSION_DENIED`.
pub struct RequirePermission<P: PermissionSpec> {
    pub auth: AuthContext,
    _spec: PhantomData<P>,
}

impl<S, P> FromRequestParts<S> for RequirePermission<P>
where
    S: Send + Sync,
    AuthState: FromRef<S>,
    P: PermissionSpec,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let FlexibleAuth(auth) = FlexibleAuth::from_request_parts(parts, state).await?;
        auth.require_permission(P::PERMISSION)?;
        Ok(Self {
            auth,
            _spec: PhantomData,
        })
    }
}

// =============================================================================
// Role Guard
// =============================================================================

/// Passes when the principal's role is one of `R::ROLES`.
///
/// # Errors
///
/// Authentication errors, then `INSUFFICIENT_PERMISSIONS`.
pub struct RequireRole<R: RoleSpec> {
    pub auth: AuthContext,
    _spec: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for RequireRole<R>
where
    S: Send + Sync,
    AuthState: FromRef<S>,
    R: RoleSpec,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let FlexibleAuth(auth) = FlexibleAuth::from_request_parts(parts, state).await?;
        auth.require_role(R::ROLES)?;
        Ok(Self {
            auth,
            _spec: PhantomData,
        })
    }
}

// =============================================================================
// Ownership Guard
// =============================================================================

/// Passes when the principal may act on the resource instance named by the
/// route's `id` (or `<type>Id`) parameter.
///
/// # Errors
///
/// Authentication errors, `RESOURCE_ID_MISSING`, `RESOURCE_ACCESS_DENIED`,
/// or a storage error when the ownership lookup fails.
pub struct OwnedResource<R: ResourceSpec> {
    pub auth: AuthContext,
    pub resource_id: String,
    _spec: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for OwnedResource<R>
where
    S: Send + Sync,
    AuthState: FromRef<S>,
    OwnershipGuard: FromRef<S>,
    R: ResourceSpec,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // 1. Authenticate
        let FlexibleAuth(auth) = FlexibleAuth::from_request_parts(parts, state).await?;

        // 2. Resolve the resource id from the route
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthError::resource_id_missing(R::RESOURCE.as_str()))?;
        let resource_id = resource_id_from_params(&params, R::RESOURCE)?.to_string();

        if let Some(scope) = parts.extensions.get::<AuditScope>() {
            scope.set_resource(R::RESOURCE.as_str(), resource_id.clone());
        }

        // 3. Check ownership
        let guard = OwnershipGuard::from_ref(state);
        guard.authorize(&auth, R::RESOURCE, &resource_id).await?;

        Ok(Self {
            auth,
            resource_id,
            _spec: PhantomData,
        })
    }
}
