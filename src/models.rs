use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

/// Minimum accepted password length at registration.
pub const MIN_PASSWORD_LENGTH: usize = 8;

// --- Closed Enumerations (Mapped to TEXT columns) ---

/// Role
///
/// The RBAC field of a user. Fixed at registration and never changed afterwards.
/// Stored as snake_case text (`donor`, `affected_student`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[ts(export)]
pub enum Role {
    Donor,
    AffectedStudent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::AffectedStudent => "affected_student",
        }
    }
}

/// ItemStatus
///
/// Availability of an item. Moves forward only: `available -> reserved -> given`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[ts(export)]
pub enum ItemStatus {
    #[default]
    Available,
    Reserved,
    Given,
}

impl ItemStatus {
    /// Returns true when `next` is the direct successor of `self`.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Available, ItemStatus::Reserved) | (ItemStatus::Reserved, ItemStatus::Given)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Available => "available",
            ItemStatus::Reserved => "reserved",
            ItemStatus::Given => "given",
        }
    }
}

/// RequestStatus
///
/// Lifecycle of a request: `pending` is the only non-terminal state and may
/// move to exactly one of `approved` or `declined`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[ts(export)]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Declined,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Returns true when `next` is the direct successor of `self`.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Approved)
                | (RequestStatus::Pending, RequestStatus::Declined)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Declined => "declined",
        }
    }
}

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// Canonical identity record from the `users` table. Carries the password hash,
/// so it never leaves the server; responses use `UserProfile`.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Item
///
/// A donatable good listed by a donor (`items` table).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Item {
    pub id: Uuid,
    // FK to users.id; always a donor.
    pub donor_id: Uuid,
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: String,
    pub location: Option<String>,
    pub status: ItemStatus,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// DonationRequest
///
/// An affected student's claim against a specific item (`requests` table).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct DonationRequest {
    pub id: Uuid,
    // FK to users.id; always an affected student.
    pub requester_id: Uuid,
    pub item_id: Uuid,
    pub status: RequestStatus,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// --- Request Payloads (Input Schemas) ---

/// RegisterUserRequest
///
/// Input payload for the public registration endpoint (POST /register).
/// The password is hashed before storage and never logged.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
}

impl RegisterUserRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_email(&self.email)?;
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("name must not be empty".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        Ok(())
    }
}

/// LoginRequest
///
/// Input payload for POST /login.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// CreateItemRequest
///
/// Input payload for listing a new item (POST /items). The owning donor is
/// always the authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateItemRequest {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl CreateItemRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.description.trim().is_empty() {
            return Err(AppError::Validation(
                "description must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// UpdateItemRequest
///
/// Partial update payload for PATCH /items/{id}. Only provided fields change.
/// `status` may only be used to mark a reserved item as `given`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateItemRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

impl UpdateItemRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(description) = &self.description {
            if description.trim().is_empty() {
                return Err(AppError::Validation(
                    "description must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn has_field_changes(&self) -> bool {
        self.description.is_some()
            || self.name.is_some()
            || self.category.is_some()
            || self.location.is_some()
    }
}

/// CreateDonationRequest
///
/// Input payload for POST /requests. The requester is the authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateDonationRequest {
    pub item_id: Uuid,
}

/// UpdateRequestStatus
///
/// Input payload for PATCH /requests/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRequestStatus {
    pub status: RequestStatus,
}

/// --- Output Schemas ---

/// UserProfile
///
/// Public view of a user (GET /me, GET /users/{id}).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// AuthResponse
///
/// Returned by POST /register and POST /login. The token goes into the
/// `Authorization: Bearer` header of subsequent calls.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthResponse {
    pub token: String,
    pub token_type: String,
    /// Token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserProfile,
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation("invalid email address".to_string()))
    }
}

/// --- Query Filters ---

/// ItemFilter
///
/// Accepted query parameters for GET /items. Every field narrows the result;
/// an empty filter lists all items in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::IntoParams)]
pub struct ItemFilter {
    /// Only items in this availability state.
    pub status: Option<ItemStatus>,
    pub category: Option<String>,
    pub location: Option<String>,
    /// Only items listed by this donor.
    pub donor_id: Option<Uuid>,
}

/// RequestQuery
///
/// Accepted query parameters for GET /requests. The caller's scope (own
/// requests or requests on own items) is always applied on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::IntoParams)]
pub struct RequestQuery {
    pub item_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
}

/// RequestFilter
///
/// Repository-level request filter, combining the caller's scope with a `RequestQuery`.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub requester_id: Option<Uuid>,
    pub donor_id: Option<Uuid>,
    pub item_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
}
