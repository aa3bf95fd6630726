use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::AppError,
    models::{RequestStatus, Role},
};

/// Action
///
/// Every guarded operation, carrying the ownership facts the decision needs.
/// The policy never touches storage; handlers load the facts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateItem,
    /// Update, mark given or delete an item.
    ModifyItem { owner_id: Uuid },
    CreateRequest,
    /// Approve or decline a request.
    DecideRequest { item_owner_id: Uuid },
    ViewRequest { requester_id: Uuid, item_owner_id: Uuid },
    WithdrawRequest {
        requester_id: Uuid,
        item_owner_id: Uuid,
        status: RequestStatus,
    },
}

/// authorize
///
/// Pure role and ownership check. Returns `AppError::Forbidden` with a
/// human-readable reason on denial.
pub fn authorize(action: Action, actor: &AuthUser) -> Result<(), AppError> {
    match action {
        Action::CreateItem => match actor.role {
            Role::Donor => Ok(()),
            Role::AffectedStudent => Err(forbidden("only donors can list items")),
        },
        Action::ModifyItem { owner_id } => match actor.role {
            Role::Donor if actor.id == owner_id => Ok(()),
            Role::Donor => Err(forbidden("you can only manage items you donated")),
            Role::AffectedStudent => Err(forbidden("only donors can manage items")),
        },
        Action::CreateRequest => match actor.role {
            Role::AffectedStudent => Ok(()),
            Role::Donor => Err(forbidden("only affected students can request items")),
        },
        Action::DecideRequest { item_owner_id } => match actor.role {
            Role::Donor if actor.id == item_owner_id => Ok(()),
            Role::Donor => Err(forbidden(
                "you can only manage requests for your own items",
            )),
            Role::AffectedStudent => Err(forbidden("only donors can update requests")),
        },
        Action::ViewRequest {
            requester_id,
            item_owner_id,
        } => {
            if actor.id == requester_id || actor.id == item_owner_id {
                Ok(())
            } else {
                Err(forbidden("you can only view your own requests"))
            }
        }
        Action::WithdrawRequest {
            requester_id,
            item_owner_id,
            status,
        } => match actor.role {
            Role::AffectedStudent if actor.id == requester_id => match status {
                RequestStatus::Pending => Ok(()),
                RequestStatus::Approved | RequestStatus::Declined => {
                    Err(forbidden("only pending requests can be withdrawn"))
                }
            },
            Role::AffectedStudent => Err(forbidden("you can only delete your own requests")),
            Role::Donor if actor.id == item_owner_id => match status {
                RequestStatus::Pending | RequestStatus::Declined => Ok(()),
                RequestStatus::Approved => Err(forbidden("approved requests cannot be deleted")),
            },
            Role::Donor => Err(forbidden(
                "donors can only delete requests for their items",
            )),
        },
    }
}

fn forbidden(reason: &str) -> AppError {
    AppError::Forbidden(reason.to_string())
}
