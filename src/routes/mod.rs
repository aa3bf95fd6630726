/// Router Module Index
///
/// Routes are split by access level so authentication is applied once, as a
/// layer over the whole authenticated module. Role and ownership checks happen
/// inside the handlers through the authorization policy.

/// Routes reachable without a token: health, registration, login and read-only
/// item browsing.
pub mod public;

/// Routes behind the `AuthUser` extractor middleware.
pub mod authenticated;
