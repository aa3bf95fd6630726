use serde_json::{Value, json};
use shareline::{
    AppConfig, AppState, create_router,
    models::{AuthResponse, DonationRequest, Item, ItemStatus, RequestStatus, Role},
    repository::{RepositoryState, SqliteRepository},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

#[derive(Debug)]
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

async fn spawn_app() -> TestApp {
    let repo = SqliteRepository::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    let repo = Arc::new(repo) as RepositoryState;
    let config = AppConfig::default();

    let state = AppState { repo, config };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    async fn register(&self, email: &str, role: Role) -> AuthResponse {
        let response = self
            .client
            .post(self.url("/register"))
            .json(&json!({
                "email": email,
                "name": "Test User",
                "password": "correct-horse",
                "role": role,
            }))
            .send()
            .await
            .expect("register request failed");
        assert_eq!(response.status(), 201, "registration of {email} failed");
        response.json().await.unwrap()
    }

    async fn create_item(&self, token: &str, description: &str) -> Item {
        let response = self
            .client
            .post(self.url("/items"))
            .bearer_auth(token)
            .json(&json!({ "description": description, "category": "books" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    async fn create_request(&self, token: &str, item_id: Uuid) -> reqwest::Response {
        self.client
            .post(self.url("/requests"))
            .bearer_auth(token)
            .json(&json!({ "item_id": item_id }))
            .send()
            .await
            .unwrap()
    }

    async fn patch_request(
        &self,
        token: &str,
        request_id: Uuid,
        status: &str,
    ) -> reqwest::Response {
        self.client
            .patch(self.url(&format!("/requests/{request_id}")))
            .bearer_auth(token)
            .json(&json!({ "status": status }))
            .send()
            .await
            .unwrap()
    }

    async fn get_item(&self, item_id: Uuid) -> Item {
        self.client
            .get(self.url(&format!("/items/{item_id}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

async fn error_kind(response: reqwest::Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = spawn_app().await;
    let registered = app.register("donor@example.com", Role::Donor).await;
    assert_eq!(registered.token_type, "Bearer");
    assert_eq!(registered.user.role, Role::Donor);

    // Duplicate email
    let dup = app
        .client
        .post(app.url("/register"))
        .json(&json!({
            "email": "DONOR@example.com", "name": "Again", "password": "another-pass", "role": "donor"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status(), 409);

    // Wrong password
    let bad = app
        .client
        .post(app.url("/login"))
        .json(&json!({ "email": "donor@example.com", "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 401);

    let login = app
        .client
        .post(app.url("/login"))
        .json(&json!({ "email": "donor@example.com", "password": "correct-horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), 200);
    let login: AuthResponse = login.json().await.unwrap();

    let me: Value = app
        .client
        .get(app.url("/me"))
        .bearer_auth(&login.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["id"], json!(registered.user.id));
    assert_eq!(me["role"], "donor");
    assert!(me.get("password_hash").is_none());
}

#[tokio::test]
async fn test_invalid_registration_is_rejected() {
    let app = spawn_app().await;
    let response = app
        .client
        .post(app.url("/register"))
        .json(&json!({ "email": "not-an-email", "name": "X", "password": "long-enough", "role": "donor" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
    assert_eq!(error_kind(response).await, "validation_error");

    let response = app
        .client
        .post(app.url("/register"))
        .json(&json!({ "email": "a@b.com", "name": "X", "password": "long-enough", "role": "admin" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/items"))
        .json(&json!({ "description": "Winter coat" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(error_kind(response).await, "unauthorized");

    let response = app
        .client
        .get(app.url("/requests"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_full_donation_workflow() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;

    // Donor lists an item
    let item = app.create_item(&donor.token, "Calculus textbook").await;
    assert_eq!(item.status, ItemStatus::Available);
    assert_eq!(item.donor_id, donor.user.id);

    // Student requests it
    let response = app.create_request(&student.token, item.id).await;
    assert_eq!(response.status(), 201);
    let request: DonationRequest = response.json().await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.requester_id, student.user.id);

    // Donor sees it in their scoped list
    let listed: Vec<DonationRequest> = app
        .client
        .get(app.url("/requests"))
        .bearer_auth(&donor.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, request.id);

    // Donor approves; the item becomes reserved
    let response = app.patch_request(&donor.token, request.id, "approved").await;
    assert_eq!(response.status(), 200);
    let approved: DonationRequest = response.json().await.unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(app.get_item(item.id).await.status, ItemStatus::Reserved);

    // Donor hands it over
    let response = app
        .client
        .patch(app.url(&format!("/items/{}", item.id)))
        .bearer_auth(&donor.token)
        .json(&json!({ "status": "given" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let given: Item = response.json().await.unwrap();
    assert_eq!(given.status, ItemStatus::Given);
}

#[tokio::test]
async fn test_role_restrictions() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;

    // Students cannot list items
    let response = app
        .client
        .post(app.url("/items"))
        .bearer_auth(&student.token)
        .json(&json!({ "description": "Desk lamp" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(error_kind(response).await, "forbidden");

    // Donors cannot request items
    let item = app.create_item(&donor.token, "Desk lamp").await;
    let response = app.create_request(&donor.token, item.id).await;
    assert_eq!(response.status(), 403);

    // Students cannot decide requests
    let response = app.create_request(&student.token, item.id).await;
    let request: DonationRequest = response.json().await.unwrap();
    let response = app
        .patch_request(&student.token, request.id, "approved")
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_non_owner_donor_is_forbidden() {
    let app = spawn_app().await;
    let owner = app.register("owner@example.com", Role::Donor).await;
    let other = app.register("other@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;

    let item = app.create_item(&owner.token, "Backpack").await;
    let request: DonationRequest = app
        .create_request(&student.token, item.id)
        .await
        .json()
        .await
        .unwrap();

    let response = app.patch_request(&other.token, request.id, "approved").await;
    assert_eq!(response.status(), 403);

    let response = app
        .client
        .patch(app.url(&format!("/items/{}", item.id)))
        .bearer_auth(&other.token)
        .json(&json!({ "description": "Stolen listing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Unchanged
    assert_eq!(app.get_item(item.id).await.description, "Backpack");
}

#[tokio::test]
async fn test_request_for_unavailable_or_missing_item() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let first = app.register("first@example.com", Role::AffectedStudent).await;
    let second = app.register("second@example.com", Role::AffectedStudent).await;

    let response = app.create_request(&first.token, Uuid::new_v4()).await;
    assert_eq!(response.status(), 404);

    let item = app.create_item(&donor.token, "Bicycle").await;
    let request: DonationRequest = app
        .create_request(&first.token, item.id)
        .await
        .json()
        .await
        .unwrap();

    // Duplicate pending request from the same student
    let response = app.create_request(&first.token, item.id).await;
    assert_eq!(response.status(), 409);
    assert_eq!(error_kind(response).await, "conflict");

    let response = app.patch_request(&donor.token, request.id, "approved").await;
    assert_eq!(response.status(), 200);

    let response = app.create_request(&second.token, item.id).await;
    assert_eq!(response.status(), 409);
    assert_eq!(error_kind(response).await, "conflict");
}

#[tokio::test]
async fn test_approval_declines_competing_requests() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let first = app.register("first@example.com", Role::AffectedStudent).await;
    let second = app.register("second@example.com", Role::AffectedStudent).await;

    let item = app.create_item(&donor.token, "Laptop charger").await;
    let winner: DonationRequest = app
        .create_request(&first.token, item.id)
        .await
        .json()
        .await
        .unwrap();
    let loser: DonationRequest = app
        .create_request(&second.token, item.id)
        .await
        .json()
        .await
        .unwrap();

    let response = app.patch_request(&donor.token, winner.id, "approved").await;
    assert_eq!(response.status(), 200);

    let response = app
        .client
        .get(app.url(&format!("/requests/{}", loser.id)))
        .bearer_auth(&second.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let loser: DonationRequest = response.json().await.unwrap();
    assert_eq!(loser.status, RequestStatus::Declined);
}

#[tokio::test]
async fn test_terminal_requests_cannot_change() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;

    let item = app.create_item(&donor.token, "Rain jacket").await;
    let request: DonationRequest = app
        .create_request(&student.token, item.id)
        .await
        .json()
        .await
        .unwrap();

    let response = app.patch_request(&donor.token, request.id, "declined").await;
    assert_eq!(response.status(), 200);

    let response = app.patch_request(&donor.token, request.id, "approved").await;
    assert_eq!(response.status(), 409);
    assert_eq!(error_kind(response).await, "invalid_transition");

    // Pending is never a valid target
    let fresh = app.register("fresh@example.com", Role::AffectedStudent).await;
    let pending: DonationRequest = app
        .create_request(&fresh.token, item.id)
        .await
        .json()
        .await
        .unwrap();
    let response = app.patch_request(&donor.token, pending.id, "pending").await;
    assert_eq!(response.status(), 409);
    assert_eq!(error_kind(response).await, "invalid_transition");

    // Available items cannot be marked given
    let response = app
        .client
        .patch(app.url(&format!("/items/{}", item.id)))
        .bearer_auth(&donor.token)
        .json(&json!({ "status": "given" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    assert_eq!(error_kind(response).await, "invalid_transition");
}

#[tokio::test]
async fn test_concurrent_decisions_have_one_winner() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;

    let item = app.create_item(&donor.token, "Guitar").await;
    let request: DonationRequest = app
        .create_request(&student.token, item.id)
        .await
        .json()
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        app.patch_request(&donor.token, request.id, "approved"),
        app.patch_request(&donor.token, request.id, "declined"),
    );

    let mut statuses = vec![a.status().as_u16(), b.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 409]);

    let item = app.get_item(item.id).await;
    let final_request: DonationRequest = app
        .client
        .get(app.url(&format!("/requests/{}", request.id)))
        .bearer_auth(&donor.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    match final_request.status {
        RequestStatus::Approved => assert_eq!(item.status, ItemStatus::Reserved),
        RequestStatus::Declined => assert_eq!(item.status, ItemStatus::Available),
        RequestStatus::Pending => panic!("request should have been decided"),
    }
}

#[tokio::test]
async fn test_available_listing_round_trip() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;

    let first = app.create_item(&donor.token, "Mattress").await;
    let second = app.create_item(&donor.token, "Blanket").await;

    let available: Vec<Item> = app
        .client
        .get(app.url("/items/?status=available"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<Uuid> = available.iter().map(|item| item.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    let request: DonationRequest = app
        .create_request(&student.token, first.id)
        .await
        .json()
        .await
        .unwrap();
    app.patch_request(&donor.token, request.id, "approved").await;

    let available: Vec<Item> = app
        .client
        .get(app.url("/items?status=available"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, second.id);

    let response = app
        .client
        .get(app.url("/items?status=lost"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn test_request_visibility_is_scoped() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;
    let outsider = app.register("outsider@example.com", Role::AffectedStudent).await;

    let item = app.create_item(&donor.token, "Kettle").await;
    let request: DonationRequest = app
        .create_request(&student.token, item.id)
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .client
        .get(app.url(&format!("/requests/{}", request.id)))
        .bearer_auth(&outsider.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let mine: Vec<DonationRequest> = app
        .client
        .get(app.url("/requests/"))
        .bearer_auth(&outsider.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(mine.is_empty());
}

#[tokio::test]
async fn test_withdraw_and_delete() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;

    let item = app.create_item(&donor.token, "Printer").await;
    let request: DonationRequest = app
        .create_request(&student.token, item.id)
        .await
        .json()
        .await
        .unwrap();

    // Pending request blocks deletion
    let response = app
        .client
        .delete(app.url(&format!("/items/{}", item.id)))
        .bearer_auth(&donor.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Student withdraws
    let response = app
        .client
        .delete(app.url(&format!("/requests/{}", request.id)))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = app
        .client
        .delete(app.url(&format!("/items/{}", item.id)))
        .bearer_auth(&donor.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = app
        .client
        .get(app.url(&format!("/items/{}", item.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(error_kind(response).await, "not_found");
}

#[tokio::test]
async fn test_reserved_item_cannot_be_deleted() {
    let app = spawn_app().await;
    let donor = app.register("donor@example.com", Role::Donor).await;
    let student = app.register("student@example.com", Role::AffectedStudent).await;

    let item = app.create_item(&donor.token, "Sofa").await;
    let request: DonationRequest = app
        .create_request(&student.token, item.id)
        .await
        .json()
        .await
        .unwrap();
    app.patch_request(&donor.token, request.id, "approved").await;

    let response = app
        .client
        .delete(app.url(&format!("/items/{}", item.id)))
        .bearer_auth(&donor.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Approved requests cannot be withdrawn either
    let response = app
        .client
        .delete(app.url(&format!("/requests/{}", request.id)))
        .bearer_auth(&student.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}
