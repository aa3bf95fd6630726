use crate::{
    AppState,
    auth::{self, AuthUser},
    error::{AppError, ErrorBody},
    models::{
        AuthResponse, CreateDonationRequest, CreateItemRequest, DonationRequest, Item, ItemFilter,
        ItemStatus, LoginRequest, RegisterUserRequest, RequestFilter, RequestQuery, Role,
        UpdateItemRequest, UpdateRequestStatus, User, UserProfile,
    },
    policy::{Action, authorize},
    repository::{NewUser, RepositoryError, RepositoryState},
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use uuid::Uuid;

// --- Helpers ---

/// Loads an item or fails with NotFound.
async fn load_item(repo: &RepositoryState, id: Uuid) -> Result<Item, AppError> {
    repo.get_item(id)
        .await?
        .ok_or_else(|| AppError::NotFound("item not found".to_string()))
}

/// Loads a request together with the item it targets. The item is needed for
/// every ownership decision on the request.
async fn load_request_with_item(
    repo: &RepositoryState,
    id: Uuid,
) -> Result<(DonationRequest, Item), AppError> {
    let request = repo
        .get_request(id)
        .await?
        .ok_or_else(|| AppError::NotFound("request not found".to_string()))?;

    let item = repo.get_item(request.item_id).await?.ok_or_else(|| {
        AppError::Internal(format!("request {} references a missing item", request.id))
    })?;

    Ok((request, item))
}

fn auth_response(state: &AppState, user: User) -> Result<AuthResponse, AppError> {
    let token = auth::issue_token(&state.config, &user)?;
    Ok(AuthResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.token_ttl_secs,
        user: UserProfile::from(user),
    })
}

// --- Account Handlers ---

/// register_user
///
/// [Public Route] Creates an account with a hashed password and returns a bearer token.
/// The role chosen here is permanent.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "Registered", body = AuthResponse),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 422, description = "Invalid input", body = ErrorBody)
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let Json(payload) = payload?;
    payload.validate()?;

    // Emails are matched case-insensitively everywhere.
    let email = payload.email.trim().to_lowercase();
    if state.repo.get_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("email already registered".to_string()));
    }

    let new_user = NewUser {
        email,
        name: payload.name.trim().to_string(),
        password_hash: auth::hash_password(&payload.password)?,
        role: payload.role,
    };

    let user = match state.repo.create_user(new_user).await {
        Ok(user) => user,
        // Lost a race against a concurrent registration for the same email.
        Err(RepositoryError::UniqueViolation) => {
            return Err(AppError::Conflict("email already registered".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "user registered");
    Ok((StatusCode::CREATED, Json(auth_response(&state, user)?)))
}

/// login
///
/// [Public Route] Exchanges email and password for a bearer token.
/// Unknown email and wrong password produce the same error.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    let email = payload.email.trim().to_lowercase();

    // Unknown email and bad password collapse into one error.
    let user = state
        .repo
        .get_user_by_email(&email)
        .await?
        .filter(|user| auth::verify_password(&payload.password, &user.password_hash))
        .ok_or_else(|| AppError::Unauthorized("invalid email or password".to_string()))?;

    Ok(Json(auth_response(&state, user)?))
}

/// get_me
///
/// [Authenticated Route] Profile of the caller.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    )
)]
pub async fn get_me(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, AppError> {
    let user = state
        .repo
        .get_user(auth_user.id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("user no longer exists".to_string()))?;
    Ok(Json(UserProfile::from(user)))
}

/// get_user_profile
///
/// [Public Route] Public profile of any user, e.g. the donor behind an item.
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Found", body = UserProfile),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_user_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserProfile>, AppError> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    Ok(Json(UserProfile::from(user)))
}

// --- Item Handlers ---

/// list_items
///
/// [Public Route] Lists items in insertion order, optionally filtered by status,
/// category, location or donor.
#[utoipa::path(
    get,
    path = "/items",
    params(ItemFilter),
    responses((status = 200, description = "List filtered items", body = [Item]))
)]
pub async fn list_items(
    State(state): State<AppState>,
    filter: Result<Query<ItemFilter>, QueryRejection>,
) -> Result<Json<Vec<Item>>, AppError> {
    let Query(filter) = filter?;
    Ok(Json(state.repo.list_items(&filter).await?))
}

/// get_item
///
/// [Public Route] A single item by ID.
#[utoipa::path(
    get,
    path = "/items/{id}",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Found", body = Item),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Item>, AppError> {
    Ok(Json(load_item(&state.repo, id).await?))
}

/// create_item
///
/// [Authenticated Route, donors] Lists a new item owned by the caller.
#[utoipa::path(
    post,
    path = "/items",
    request_body = CreateItemRequest,
    responses(
        (status = 201, description = "Created", body = Item),
        (status = 403, description = "Not a donor", body = ErrorBody),
        (status = 422, description = "Invalid input", body = ErrorBody)
    )
)]
pub async fn create_item(
    auth_user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<CreateItemRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Item>), AppError> {
    // 1. Role check needs no lookup, so it runs before parsing the body.
    authorize(Action::CreateItem, &auth_user)?;

    // 2. Payload
    let Json(payload) = payload?;
    payload.validate()?;

    // 3. Persist; new items always start available.
    let item = state.repo.create_item(auth_user.id, payload).await?;
    tracing::info!(item_id = %item.id, donor_id = %auth_user.id, "item listed");
    Ok((StatusCode::CREATED, Json(item)))
}

/// update_item
///
/// [Authenticated Route, owning donor] Edits descriptive fields and/or marks a
/// reserved item as `given`. No other status change is accepted here.
#[utoipa::path(
    patch,
    path = "/items/{id}",
    params(("id" = Uuid, Path, description = "Item ID")),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Updated", body = Item),
        (status = 403, description = "Not Owner", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 409, description = "Invalid status change", body = ErrorBody)
    )
)]
pub async fn update_item(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateItemRequest>, JsonRejection>,
) -> Result<Json<Item>, AppError> {
    let item = load_item(&state.repo, id).await?;
    authorize(
        Action::ModifyItem {
            owner_id: item.donor_id,
        },
        &auth_user,
    )?;
    let Json(payload) = payload?;
    payload.validate()?;

    let mut current = item;

    if let Some(next) = payload.status {
        // Reservation only happens through request approval.
        if next != ItemStatus::Given || !current.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "item cannot move from {} to {}",
                current.status.as_str(),
                next.as_str()
            )));
        }
        current = state
            .repo
            .set_item_status(id, current.status, next)
            .await?
            .ok_or_else(|| AppError::Conflict("item status changed concurrently".to_string()))?;
    }

    // Descriptive fields go in a separate statement; status is already settled.
    if payload.has_field_changes() {
        current = state
            .repo
            .update_item(id, &payload)
            .await?
            .ok_or_else(|| AppError::NotFound("item not found".to_string()))?;
    }

    Ok(Json(current))
}

/// delete_item
///
/// [Authenticated Route, owning donor] Removes an available item with no
/// pending requests. Its settled requests go with it.
#[utoipa::path(
    delete,
    path = "/items/{id}",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not Owner", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 409, description = "Item reserved or has pending requests", body = ErrorBody)
    )
)]
pub async fn delete_item(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let item = load_item(&state.repo, id).await?;
    authorize(
        Action::ModifyItem {
            owner_id: item.donor_id,
        },
        &auth_user,
    )?;

    // Cheap pre-checks for a precise message. The repository re-checks both
    // conditions atomically.
    if item.status != ItemStatus::Available {
        return Err(AppError::Conflict(format!(
            "cannot delete an item that is {}",
            item.status.as_str()
        )));
    }
    if state.repo.count_pending_requests(id).await? > 0 {
        return Err(AppError::Conflict(
            "cannot delete item with pending requests".to_string(),
        ));
    }

    if state.repo.delete_item(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Conflict(
            "item changed while deleting; retry".to_string(),
        ))
    }
}

// --- Request Handlers ---

/// create_request
///
/// [Authenticated Route, affected students] Requests an available item.
#[utoipa::path(
    post,
    path = "/requests",
    request_body = CreateDonationRequest,
    responses(
        (status = 201, description = "Created", body = DonationRequest),
        (status = 403, description = "Not an affected student", body = ErrorBody),
        (status = 404, description = "Item not found", body = ErrorBody),
        (status = 409, description = "Item not available or already requested", body = ErrorBody)
    )
)]
pub async fn create_request(
    auth_user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<CreateDonationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DonationRequest>), AppError> {
    authorize(Action::CreateRequest, &auth_user)?;
    let Json(payload) = payload?;

    // 1. Item must exist and be available.
    let item = load_item(&state.repo, payload.item_id).await?;
    if item.status != ItemStatus::Available {
        return Err(AppError::Conflict(format!(
            "item is {}, not available",
            item.status.as_str()
        )));
    }
    // 2. One pending request per student and item.
    if state
        .repo
        .has_pending_request(auth_user.id, item.id)
        .await?
    {
        return Err(AppError::Conflict(
            "you already have a pending request for this item".to_string(),
        ));
    }

    // 3. Guarded insert. None means the item was reserved in the meantime.
    let request = state
        .repo
        .create_request(auth_user.id, item.id)
        .await?
        .ok_or_else(|| AppError::Conflict("item is no longer available".to_string()))?;

    tracing::info!(request_id = %request.id, item_id = %item.id, "request created");
    Ok((StatusCode::CREATED, Json(request)))
}

/// list_requests
///
/// [Authenticated Route] Affected students see their own requests; donors see
/// requests on their items.
#[utoipa::path(
    get,
    path = "/requests",
    params(RequestQuery),
    responses((status = 200, description = "My requests", body = [DonationRequest]))
)]
pub async fn list_requests(
    auth_user: AuthUser,
    State(state): State<AppState>,
    query: Result<Query<RequestQuery>, QueryRejection>,
) -> Result<Json<Vec<DonationRequest>>, AppError> {
    let Query(query) = query?;

    let mut filter = RequestFilter {
        item_id: query.item_id,
        status: query.status,
        ..RequestFilter::default()
    };
    // Scope is derived from the caller, never from the query string.
    match auth_user.role {
        Role::AffectedStudent => filter.requester_id = Some(auth_user.id),
        Role::Donor => filter.donor_id = Some(auth_user.id),
    }

    Ok(Json(state.repo.list_requests(&filter).await?))
}

/// get_request
///
/// [Authenticated Route] A single request, visible to its requester and to the item's donor.
#[utoipa::path(
    get,
    path = "/requests/{id}",
    params(("id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Found", body = DonationRequest),
        (status = 403, description = "Not a party to the request", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_request(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DonationRequest>, AppError> {
    let (request, item) = load_request_with_item(&state.repo, id).await?;
    authorize(
        Action::ViewRequest {
            requester_id: request.requester_id,
            item_owner_id: item.donor_id,
        },
        &auth_user,
    )?;
    Ok(Json(request))
}

/// update_request_status
///
/// [Authenticated Route, owning donor] Approves or declines a pending request.
///
/// Approval reserves the item and declines every other pending request for it.
/// Of two concurrent decisions on one request exactly one commits; the other
/// gets 409.
#[utoipa::path(
    patch,
    path = "/requests/{id}",
    params(("id" = Uuid, Path, description = "Request ID")),
    request_body = UpdateRequestStatus,
    responses(
        (status = 200, description = "Updated", body = DonationRequest),
        (status = 403, description = "Not the item's donor", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 409, description = "Invalid transition or concurrent update", body = ErrorBody)
    )
)]
pub async fn update_request_status(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateRequestStatus>, JsonRejection>,
) -> Result<Json<DonationRequest>, AppError> {
    let (request, item) = load_request_with_item(&state.repo, id).await?;
    authorize(
        Action::DecideRequest {
            item_owner_id: item.donor_id,
        },
        &auth_user,
    )?;
    let Json(payload) = payload?;

    // Decided requests are final.
    if request.status.is_terminal() {
        return Err(AppError::InvalidTransition(format!(
            "request is already {}",
            request.status.as_str()
        )));
    }
    // Only approved or declined are valid targets from pending.
    if !request.status.can_transition_to(payload.status) {
        return Err(AppError::InvalidTransition(format!(
            "request cannot move from {} to {}",
            request.status.as_str(),
            payload.status.as_str()
        )));
    }

    // Guarded by `status = 'pending'`; None means another decision committed first.
    let updated = state
        .repo
        .decide_request(id, payload.status)
        .await?
        .ok_or_else(|| {
            tracing::warn!(request_id = %id, "lost race on request decision");
            AppError::Conflict("request was updated concurrently".to_string())
        })?;

    Ok(Json(updated))
}

/// delete_request
///
/// [Authenticated Route] The requester may withdraw a pending request; the
/// item's donor may remove pending or declined ones. Approved requests stay.
#[utoipa::path(
    delete,
    path = "/requests/{id}",
    params(("id" = Uuid, Path, description = "Request ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not allowed", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody),
        (status = 409, description = "Request changed concurrently", body = ErrorBody)
    )
)]
pub async fn delete_request(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let (request, item) = load_request_with_item(&state.repo, id).await?;
    authorize(
        Action::WithdrawRequest {
            requester_id: request.requester_id,
            item_owner_id: item.donor_id,
            status: request.status,
        },
        &auth_user,
    )?;

    // Delete only if the status is still the one the policy approved.
    if state.repo.delete_request(id, request.status).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Conflict(
            "request was updated concurrently".to_string(),
        ))
    }
}
