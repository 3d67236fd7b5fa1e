//! Mapping from SuccessFactors `User` entities to directory profiles.
//!
//! OData v2 wraps single entities as `{"d": {...}}` and query results as
//! `{"d": {"results": [...]}}`. Fields the tenant leaves blank arrive as empty
//! strings or `null`; both count as missing.

use serde_json::Value;

use cabflow_core::directory::DirectoryError;
use cabflow_core::domain::employee::{ApproverContact, EmployeeId, EmployeeProfile};

/// Returns `Ok(None)` for an empty result set.
pub fn extract_profile(payload: &Value) -> Result<Option<EmployeeProfile>, DirectoryError> {
    let Some(user) = unwrap_entity(payload) else {
        return Ok(None);
    };

    let employee_id = text(user, "userId")
        .ok_or_else(|| DirectoryError::Decode("user entity has no userId".to_string()))?;
    let display_name = person_name(user).ok_or_else(|| {
        DirectoryError::Decode(format!("user `{employee_id}` has no display name"))
    })?;
    let email = text(user, "email")
        .ok_or_else(|| DirectoryError::Decode(format!("user `{employee_id}` has no email")))?;

    Ok(Some(EmployeeProfile {
        employee_id: EmployeeId(employee_id),
        display_name,
        email,
        phone: phone(user),
        department: text(user, "department").unwrap_or_default(),
        location: text(user, "location").unwrap_or_default(),
        manager: user.get("manager").and_then(extract_manager),
    }))
}

fn unwrap_entity(payload: &Value) -> Option<&Value> {
    let body = payload.get("d").unwrap_or(payload);
    match body.get("results") {
        Some(Value::Array(results)) => results.first(),
        Some(_) => None,
        None if body.is_object() => Some(body),
        None => None,
    }
}

/// A manager that was not expanded comes back as `{"__deferred": {...}}`.
fn extract_manager(value: &Value) -> Option<ApproverContact> {
    if value.get("__deferred").is_some() {
        return None;
    }
    let manager = unwrap_entity(value)?;
    Some(ApproverContact {
        employee_id: EmployeeId(text(manager, "userId")?),
        name: person_name(manager)?,
        email: text(manager, "email")?,
        phone: phone(manager),
    })
}

fn person_name(entity: &Value) -> Option<String> {
    if let Some(name) = text(entity, "displayName") {
        return Some(name);
    }
    let joined = [text(entity, "firstName"), text(entity, "lastName")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn phone(entity: &Value) -> Option<String> {
    text(entity, "cellPhone").or_else(|| text(entity, "businessPhone"))
}

fn text(entity: &Value, field: &str) -> Option<String> {
    entity
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::extract_profile;
    use cabflow_core::directory::DirectoryError;

    #[test]
    fn single_entity_with_expanded_manager() {
        let payload = json!({
            "d": {
                "userId": "E1001",
                "displayName": "Asha Rao",
                "email": "asha.rao@example.com",
                "cellPhone": "",
                "businessPhone": "+91 98123 45678",
                "department": "Finance",
                "location": "Mumbai",
                "manager": {
                    "userId": "E2001",
                    "firstName": "Ravi",
                    "lastName": "Kumar",
                    "email": "ravi.kumar@example.com",
                    "cellPhone": "9833334444"
                }
            }
        });

        let profile = extract_profile(&payload).expect("decode").expect("profile");
        assert_eq!(profile.employee_id.0, "E1001");
        assert_eq!(profile.phone.as_deref(), Some("+91 98123 45678"));
        assert_eq!(profile.department, "Finance");
        let manager = profile.manager.expect("manager");
        assert_eq!(manager.name, "Ravi Kumar");
        assert_eq!(manager.phone.as_deref(), Some("9833334444"));
    }

    #[test]
    fn results_wrapper_and_deferred_manager() {
        let payload = json!({
            "d": {
                "results": [{
                    "userId": "E1002",
                    "firstName": "Meera",
                    "lastName": null,
                    "email": "meera@example.com",
                    "department": "Sales",
                    "manager": {
                        "__deferred": {
                            "uri": "https://sf.example.com/odata/v2/User('E1002')/manager"
                        }
                    }
                }]
            }
        });

        let profile = extract_profile(&payload).expect("decode").expect("profile");
        assert_eq!(profile.display_name, "Meera");
        assert_eq!(profile.location, "");
        assert!(profile.manager.is_none());
    }

    #[test]
    fn empty_results_is_a_miss() {
        let payload = json!({ "d": { "results": [] } });
        assert_eq!(extract_profile(&payload), Ok(None));
    }

    #[test]
    fn missing_email_is_a_decode_error() {
        let payload = json!({ "d": { "userId": "E9", "displayName": "No Mail", "email": " " } });
        assert!(matches!(extract_profile(&payload), Err(DirectoryError::Decode(_))));
    }
}
