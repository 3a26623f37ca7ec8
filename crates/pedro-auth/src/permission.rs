//! Permission resolution.
//!
//! Permissions are `action:resource` capability strings, or the universal
//! wildcard `*`. A grant list may contain `action:*` (any resource for that
//! action) and `*:resource` (any action on that resource). Matching is plain
//! string comparison; there is no hierarchy beyond these two wildcard
//! positions.

use crate::role::Role;

/// Universal grant.
pub const WILDCARD: &str = "*";

const SUPER_ADMIN: &[&str] = &[WILDCARD];

const ADMIN: &[&str] = &[
    "read:*",
    "write:*",
    "delete:appointments",
    "delete:patients",
    "manage:staff",
    "manage:settings",
    "view:analytics",
    "manage:billing",
];

const DOCTOR: &[&str] = &[
    "read:patients",
    "write:patients",
    "read:appointments",
    "write:appointments",
    "read:medical_records",
    "write:medical_records",
    "manage:voice_calls",
    "view:analytics",
];

const STAFF: &[&str] = &[
    "read:patients",
    "write:patients",
    "read:appointments",
    "write:appointments",
    "manage:sms",
    "manage:voice_calls",
    "read:billing",
];

const PATIENT: &[&str] = &[
    "read:own_data",
    "write:own_data",
    "read:own_appointments",
    "write:own_appointments",
    "read:own_billing",
];

const API_CLIENT: &[&str] = &["read:public_data", "webhook:receive"];

/// Static permission list for a role.
#[must_use]
pub fn role_permissions(role: Role) -> &'static [&'static str] {
    match role {
        Role::SuperAdmin => SUPER_ADMIN,
        Role::Admin => ADMIN,
        Role::Doctor => DOCTOR,
        Role::Staff => STAFF,
        Role::Patient => PATIENT,
        Role::ApiClient => API_CLIENT,
    }
}

/// Owned copy of a role's permission list, for embedding in tokens and
/// request contexts.
#[must_use]
pub fn default_permissions(role: Role) -> Vec<String> {
    role_permissions(role)
        .iter()
        .map(|p| (*p).to_string())
        .collect()
}

/// Returns `true` if `role` is granted `required`.
#[must_use]
pub fn has_permission(role: Role, required: &str) -> bool {
    permissions_allow(role_permissions(role), required)
}

/// Decides whether a grant list allows `required`.
///
/// Checked in order: `*`, exact match, `action:*`, `*:resource`. A
/// `required` string without a `:` can only match `*` or exactly.
#[must_use]
pub fn permissions_allow<S: AsRef<str>>(granted: &[S], required: &str) -> bool {
    let contains = |needle: &str| granted.iter().any(|p| p.as_ref() == needle);

    if contains(WILDCARD) {
        return true;
    }

    if contains(required) {
        return true;
    }

    let Some((action, resource)) = required.split_once(':') else {
        return false;
    };

    contains(&format!("{action}:*")) || contains(&format!("*:{resource}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[&str] = &[
        "read:patients",
        "write:patients",
        "delete:patients",
        "read:appointments",
        "write:appointments",
        "delete:appointments",
        "read:medical_records",
        "write:medical_records",
        "read:billing",
        "manage:billing",
        "manage:staff",
        "manage:settings",
        "manage:sms",
        "manage:voice_calls",
        "view:analytics",
        "read:own_data",
        "write:own_data",
        "read:own_appointments",
        "write:own_appointments",
        "read:own_billing",
        "read:public_data",
        "webhook:receive",
        "delete:staff",
    ];

    /// Expected outcome per role, one row per `SAMPLE` entry.
    fn expected(role: Role, permission: &str) -> bool {
        match role {
            Role::SuperAdmin => true,
            Role::Admin => {
                permission.starts_with("read:")
                    || permission.starts_with("write:")
                    || ADMIN.contains(&permission)
            }
            Role::Doctor => DOCTOR.contains(&permission),
            Role::Staff => STAFF.contains(&permission),
            Role::Patient => PATIENT.contains(&permission),
            Role::ApiClient => API_CLIENT.contains(&permission),
        }
    }

    #[test]
    fn test_full_role_permission_matrix() {
        for role in Role::ALL {
            for permission in SAMPLE {
                assert_eq!(
                    has_permission(role, permission),
                    expected(role, permission),
                    "role={role} permission={permission}"
                );
            }
        }
    }

    #[test]
    fn test_matrix_is_deterministic() {
        for role in Role::ALL {
            for permission in SAMPLE {
                assert_eq!(
                    has_permission(role, permission),
                    has_permission(role, permission)
                );
            }
        }
    }

    #[test]
    fn test_universal_wildcard_allows_anything() {
        assert!(has_permission(Role::SuperAdmin, "launch:rockets"));
        assert!(has_permission(Role::SuperAdmin, "no-colon"));
    }

    #[test]
    fn test_action_wildcard() {
        assert!(has_permission(Role::Admin, "read:medical_records"));
        assert!(has_permission(Role::Admin, "write:anything"));
        assert!(!has_permission(Role::Admin, "delete:medical_records"));
    }

    #[test]
    fn test_resource_wildcard() {
        let granted = ["*:billing"];
        assert!(permissions_allow(&granted, "read:billing"));
        assert!(permissions_allow(&granted, "delete:billing"));
        assert!(!permissions_allow(&granted, "read:patients"));
    }

    #[test]
    fn test_exact_match_only_for_clinicians() {
        assert!(has_permission(Role::Doctor, "read:medical_records"));
        assert!(!has_permission(Role::Staff, "read:medical_records"));
        assert!(has_permission(Role::Staff, "read:billing"));
        assert!(!has_permission(Role::Doctor, "read:billing"));
    }

    #[test]
    fn test_patient_cannot_read_all_patients() {
        assert!(!has_permission(Role::Patient, "read:patients"));
        assert!(has_permission(Role::Patient, "read:own_appointments"));
    }

    #[test]
    fn test_required_without_colon() {
        assert!(!has_permission(Role::Admin, "read"));
        assert!(permissions_allow(&["webhook"], "webhook"));
    }

    #[test]
    fn test_wildcards_are_not_patterns() {
        // "read:*" must not be matched by a partial prefix.
        assert!(!permissions_allow(&["read:pat*"], "read:patients"));
        assert!(!permissions_allow(&["rea:*"], "read:patients"));
    }

    #[test]
    fn test_explicit_list_overrides_role() {
        let custom = vec!["read:patients".to_string()];
        assert!(permissions_allow(&custom, "read:patients"));
        assert!(!permissions_allow(&custom, "read:public_data"));
    }

    #[test]
    fn test_empty_grant_list_denies() {
        let empty: [&str; 0] = [];
        assert!(!permissions_allow(&empty, "read:public_data"));
    }

    #[test]
    fn test_default_permissions_matches_table() {
        assert_eq!(default_permissions(Role::ApiClient), vec![
            "read:public_data".to_string(),
            "webhook:receive".to_string()
        ]);
        assert_eq!(default_permissions(Role::SuperAdmin), vec!["*".to_string()]);
    }
}
