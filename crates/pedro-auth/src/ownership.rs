//! Resource ownership guard.
//!
//! Decides whether an authenticated principal may act on one specific
//! patient, appointment or billing record. Administrators always pass.
//! Patients may reach their own patient record and the appointments and
//! billing records that name them. Clinicians and staff may reach records of
//! their own clinic. Everything else, including a record that does not
//! exist, is denied with `RESOURCE_ACCESS_DENIED`.
//!
//! Each [`ResourceType`] carries its own rule; adding a resource type adds a
//! variant and its rule without touching the others.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::middleware::AuthContext;
use crate::role::Role;
use crate::storage::ResourceOwnerStorage;

/// Guarded resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Patient,
    Appointment,
    Billing,
}

/// How a patient principal is matched against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientRule {
    /// The resource id is the patient's own identity id.
    SelfRecord,
    /// The resource's owning `patient_id` must equal the patient's id.
    OwnedRecord,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [Self::Patient, Self::Appointment, Self::Billing];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Appointment => "appointment",
            Self::Billing => "billing",
        }
    }

    /// Backing table in the credential store.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Patient => "patients",
            Self::Appointment => "appointments",
            Self::Billing => "billing_records",
        }
    }

    /// Alternative route parameter carrying the id (`patientId`, ...).
    #[must_use]
    pub fn id_param(self) -> String {
        format!("{}Id", self.as_str())
    }

    #[must_use]
    pub fn patient_rule(self) -> PatientRule {
        match self {
            Self::Patient => PatientRule::SelfRecord,
            Self::Appointment | Self::Billing => PatientRule::OwnedRecord,
        }
    }

    /// Capability needed to read this resource type as a non-patient.
    #[must_use]
    pub fn read_permission(self) -> &'static str {
        match self {
            Self::Patient => "read:patients",
            Self::Appointment => "read:appointments",
            Self::Billing => "read:billing",
        }
    }

    /// Capability needed to read one's own record of this type as a patient.
    #[must_use]
    pub fn own_read_permission(self) -> &'static str {
        match self {
            Self::Patient => "read:own_data",
            Self::Appointment => "read:own_appointments",
            Self::Billing => "read:own_billing",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AuthError::invalid_request(format!("unknown resource type: {s}")))
    }
}

/// Owning identifiers of a guarded record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOwner {
    pub patient_id: Option<Uuid>,
    pub clinic_id: Option<Uuid>,
}

/// Picks the resource id out of route parameters: `id`, then `<type>Id`.
///
/// # Errors
///
/// Returns `RESOURCE_ID_MISSING` if neither parameter is present.
pub fn resource_id_from_params<'a>(
    params: &'a HashMap<String, String>,
    resource_type: ResourceType,
) -> AuthResult<&'a str> {
    params
        .get("id")
        .or_else(|| params.get(&resource_type.id_param()))
        .map(String::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AuthError::resource_id_missing(resource_type.as_str()))
}

/// Checks per-instance access for non-administrative principals.
#[derive(Clone)]
pub struct OwnershipGuard {
    owners: Arc<dyn ResourceOwnerStorage>,
    timeout: Duration,
}

impl OwnershipGuard {
    #[must_use]
    pub fn new(owners: Arc<dyn ResourceOwnerStorage>, timeout: Duration) -> Self {
        Self { owners, timeout }
    }

    /// Allows or denies `ctx` acting on `resource_type` instance `resource_id`.
    ///
    /// # Errors
    ///
    /// - `RESOURCE_ID_MISSING` if `resource_id` is empty
    /// - `RESOURCE_ACCESS_DENIED` if the principal does not own the record,
    ///   or the record does not exist
    /// - `Storage` if the ownership lookup fails or times out
    pub async fn authorize(
        &self,
        ctx: &AuthContext,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> AuthResult<()> {
        if ctx.role.is_administrator() {
            return Ok(());
        }

        if resource_id.is_empty() {
            return Err(AuthError::resource_id_missing(resource_type.as_str()));
        }

        let allowed = match Uuid::parse_str(resource_id) {
            Ok(id) => self.is_owner(ctx, resource_type, id).await?,
            // Not an id any record could have.
            Err(_) => false,
        };

        if allowed {
            Ok(())
        } else {
            tracing::debug!(
                identity_id = %ctx.identity_id,
                role = %ctx.role,
                resource_type = %resource_type,
                resource_id = %resource_id,
                "Resource access denied"
            );
            Err(AuthError::resource_access_denied(resource_type.as_str()))
        }
    }

    async fn is_owner(
        &self,
        ctx: &AuthContext,
        resource_type: ResourceType,
        id: Uuid,
    ) -> AuthResult<bool> {
        match ctx.role {
            Role::Patient => match resource_type.patient_rule() {
                PatientRule::SelfRecord => Ok(ctx.identity_id == id),
                PatientRule::OwnedRecord => Ok(self
                    .owner_of(resource_type, id)
                    .await?
                    .and_then(|owner| owner.patient_id)
                    == Some(ctx.identity_id)),
            },
            role if role.is_clinic_scoped() => {
                let Some(clinic_id) = ctx.clinic_id else {
                    return Ok(false);
                };
                Ok(self
                    .owner_of(resource_type, id)
                    .await?
                    .and_then(|owner| owner.clinic_id)
                    == Some(clinic_id))
            }
            _ => Ok(false),
        }
    }

    /// Owning identifiers of `resource_type` instance `id`, if it exists.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the lookup fails or times out.
    pub async fn owner_of(
        &self,
        resource_type: ResourceType,
        id: Uuid,
    ) -> AuthResult<Option<ResourceOwner>> {
        match tokio::time::timeout(self.timeout, self.owners.find_owner(resource_type, id)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    resource_type = %resource_type,
                    resource_id = %id,
                    "Ownership lookup timed out"
                );
                Err(AuthError::storage("ownership lookup timed out"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::Identity;

    struct Fixture {
        store: Arc<MemoryStore>,
        guard: OwnershipGuard,
        clinic_a: Uuid,
        clinic_b: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let guard = OwnershipGuard::new(store.clone(), Duration::from_secs(1));
        Fixture {
            store,
            guard,
            clinic_a: Uuid::new_v4(),
            clinic_b: Uuid::new_v4(),
        }
    }

    fn ctx(identity: &Identity) -> AuthContext {
        AuthContext::from_identity(identity)
    }

    #[tokio::test]
    async fn test_patient_may_access_own_record() {
        let f = fixture();
        let patient = Identity::new("p@example.com", Role::Patient);
        f.guard
            .authorize(&ctx(&patient), ResourceType::Patient, &patient.id.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_patient_denied_other_patient() {
        let f = fixture();
        let patient = Identity::new("p@example.com", Role::Patient);
        let err = f
            .guard
            .authorize(&ctx(&patient), ResourceType::Patient, &Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RESOURCE_ACCESS_DENIED");
    }

    #[tokio::test]
    async fn test_doctor_denied_patient_in_other_clinic() {
        let f = fixture();
        let patient_id = Uuid::new_v4();
        f.store.insert_owner(
            ResourceType::Patient,
            patient_id,
            ResourceOwner {
                patient_id: Some(patient_id),
                clinic_id: Some(f.clinic_b),
            },
        );
        let doctor = Identity::new("d@example.com", Role::Doctor).with_clinic(f.clinic_a);

        let err = f
            .guard
            .authorize(&ctx(&doctor), ResourceType::Patient, &patient_id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResourceAccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_doctor_allowed_patient_in_same_clinic() {
        let f = fixture();
        let patient_id = Uuid::new_v4();
        f.store.insert_owner(
            ResourceType::Patient,
            patient_id,
            ResourceOwner {
                patient_id: Some(patient_id),
                clinic_id: Some(f.clinic_a),
            },
        );
        let doctor = Identity::new("d@example.com", Role::Doctor).with_clinic(f.clinic_a);
        f.guard
            .authorize(&ctx(&doctor), ResourceType::Patient, &patient_id.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_super_admin_allowed_any_id() {
        let f = fixture();
        let admin = Identity::new("root@example.com", Role::SuperAdmin);
        for resource_type in ResourceType::ALL {
            f.guard
                .authorize(&ctx(&admin), resource_type, &Uuid::new_v4().to_string())
                .await
                .unwrap();
        }
        // Administrators pass before any id inspection.
        f.guard
            .authorize(&ctx(&admin), ResourceType::Billing, "not-a-uuid")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_patient_appointment_ownership() {
        let f = fixture();
        let patient = Identity::new("p@example.com", Role::Patient);
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();
        f.store.insert_owner(
            ResourceType::Appointment,
            own,
            ResourceOwner {
                patient_id: Some(patient.id),
                clinic_id: Some(f.clinic_a),
            },
        );
        f.store.insert_owner(
            ResourceType::Appointment,
            other,
            ResourceOwner {
                patient_id: Some(Uuid::new_v4()),
                clinic_id: Some(f.clinic_a),
            },
        );

        f.guard
            .authorize(&ctx(&patient), ResourceType::Appointment, &own.to_string())
            .await
            .unwrap();
        let err = f
            .guard
            .authorize(&ctx(&patient), ResourceType::Appointment, &other.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RESOURCE_ACCESS_DENIED");
    }

    #[tokio::test]
    async fn test_missing_record_is_denied_not_error() {
        let f = fixture();
        let staff = Identity::new("s@example.com", Role::Staff).with_clinic(f.clinic_a);
        let err = f
            .guard
            .authorize(&ctx(&staff), ResourceType::Billing, &Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RESOURCE_ACCESS_DENIED");
    }

    #[tokio::test]
    async fn test_staff_without_clinic_is_denied() {
        let f = fixture();
        let id = Uuid::new_v4();
        f.store.insert_owner(
            ResourceType::Billing,
            id,
            ResourceOwner {
                patient_id: None,
                clinic_id: None,
            },
        );
        let staff = Identity::new("s@example.com", Role::Staff);
        assert!(
            f.guard
                .authorize(&ctx(&staff), ResourceType::Billing, &id.to_string())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_empty_id_is_missing() {
        let f = fixture();
        let staff = Identity::new("s@example.com", Role::Staff).with_clinic(f.clinic_a);
        let err = f
            .guard
            .authorize(&ctx(&staff), ResourceType::Patient, "")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RESOURCE_ID_MISSING");
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let f = fixture();
        f.store.fail_ownership_lookups(true);
        let staff = Identity::new("s@example.com", Role::Staff).with_clinic(f.clinic_a);
        let err = f
            .guard
            .authorize(&ctx(&staff), ResourceType::Patient, &Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert!(err.is_server_error());
    }

    #[test]
    fn test_resource_id_from_params() {
        let mut params = HashMap::new();
        assert_eq!(
            resource_id_from_params(&params, ResourceType::Appointment)
                .unwrap_err()
                .code(),
            "RESOURCE_ID_MISSING"
        );

        params.insert("appointmentId".to_string(), "abc".to_string());
        assert_eq!(
            resource_id_from_params(&params, ResourceType::Appointment).unwrap(),
            "abc"
        );

        params.insert("id".to_string(), "xyz".to_string());
        assert_eq!(
            resource_id_from_params(&params, ResourceType::Appointment).unwrap(),
            "xyz"
        );
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("billing".parse::<ResourceType>().unwrap(), ResourceType::Billing);
        assert!("invoice".parse::<ResourceType>().is_err());
    }
}
