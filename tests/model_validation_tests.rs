use serde_json::json;
use shareline::{
    AppError,
    models::{
        CreateItemRequest, ItemStatus, RegisterUserRequest, RequestStatus, Role,
        UpdateItemRequest,
    },
};

fn registration(email: &str, name: &str, password: &str) -> RegisterUserRequest {
    RegisterUserRequest {
        email: email.to_string(),
        name: name.to_string(),
        password: password.to_string(),
        role: Role::Donor,
    }
}

// --- Status Machines ---

#[test]
fn test_item_status_transitions() {
    assert!(ItemStatus::Available.can_transition_to(ItemStatus::Reserved));
    assert!(ItemStatus::Reserved.can_transition_to(ItemStatus::Given));

    assert!(!ItemStatus::Available.can_transition_to(ItemStatus::Given));
    assert!(!ItemStatus::Reserved.can_transition_to(ItemStatus::Available));
    assert!(!ItemStatus::Given.can_transition_to(ItemStatus::Available));
    assert!(!ItemStatus::Given.can_transition_to(ItemStatus::Reserved));
}

#[test]
fn test_request_status_transitions() {
    assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Approved));
    assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Declined));
    assert!(!RequestStatus::Pending.can_transition_to(RequestStatus::Pending));

    for terminal in [RequestStatus::Approved, RequestStatus::Declined] {
        assert!(terminal.is_terminal());
        for next in [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Declined,
        ] {
            assert!(!terminal.can_transition_to(next));
        }
    }
}

#[test]
fn test_defaults() {
    assert_eq!(ItemStatus::default(), ItemStatus::Available);
    assert_eq!(RequestStatus::default(), RequestStatus::Pending);
}

// --- Wire Format ---

#[test]
fn test_enums_serialize_snake_case() {
    assert_eq!(json!(Role::AffectedStudent), json!("affected_student"));
    assert_eq!(json!(ItemStatus::Reserved), json!("reserved"));
    assert_eq!(json!(RequestStatus::Declined), json!("declined"));

    let role: Role = serde_json::from_value(json!("donor")).unwrap();
    assert_eq!(role, Role::Donor);
    assert!(serde_json::from_value::<Role>(json!("Donor")).is_err());
}

#[test]
fn test_update_item_request_absent_fields() {
    let req: UpdateItemRequest = serde_json::from_value(json!({ "status": "given" })).unwrap();
    assert_eq!(req.status, Some(ItemStatus::Given));
    assert!(!req.has_field_changes());

    let req: UpdateItemRequest = serde_json::from_value(json!({ "name": "Desk" })).unwrap();
    assert!(req.has_field_changes());
    assert!(req.status.is_none());
}

// --- Validation ---

#[test]
fn test_registration_validation() {
    assert!(registration("a@example.com", "Ann", "longenough").validate().is_ok());

    for (email, name, password) in [
        ("no-at-sign.com", "Ann", "longenough"),
        ("a@localhost", "Ann", "longenough"),
        ("@example.com", "Ann", "longenough"),
        ("a @example.com", "Ann", "longenough"),
        ("a@b@example.com", "Ann", "longenough"),
        ("a@example.com", "   ", "longenough"),
        ("a@example.com", "Ann", "short"),
    ] {
        let result = registration(email, name, password).validate();
        assert!(
            matches!(result, Err(AppError::Validation(_))),
            "expected rejection for {email:?} / {name:?} / {password:?}"
        );
    }
}

#[test]
fn test_item_description_required() {
    let blank = CreateItemRequest {
        description: " ".to_string(),
        ..Default::default()
    };
    assert!(matches!(blank.validate(), Err(AppError::Validation(_))));

    let blank_update = UpdateItemRequest {
        description: Some(String::new()),
        ..Default::default()
    };
    assert!(blank_update.validate().is_err());
    assert!(UpdateItemRequest::default().validate().is_ok());
}
