/// Router Module Index
///
/// Routes are split by access level. Protection is applied to a whole module with a
/// router layer, so a new endpoint cannot be exposed by forgetting a check.

/// Routes open to anonymous visitors: reading, registration and login.
/// Handlers that show unpublished content decide per request via `Option<AuthUser>`.
pub mod public;

/// Routes behind the session layer. Anonymous requests are redirected to the
/// login view with `next` set to the requested path.
pub mod authenticated;
