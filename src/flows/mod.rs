//! The authentication orchestrator.
//!
//! Five public operations (signup, login, refresh, logout, and reset
//! in [`crate::reset`]) plus the request gate. Each flow is generic
//! over the store traits it needs and composes the hasher, lockout
//! machine, token issuer, session manager, revocation registry, and
//! rate limiter in a fixed order.

mod gate;
mod login;
mod logout;
mod refresh;
mod retry;
mod signup;
mod types;

pub use gate::{extract_bearer, Principal, RequestGate};
pub use login::{LoginFlow, LoginRequest};
pub use logout::LogoutFlow;
pub use refresh::RefreshFlow;
pub use signup::{SignupFlow, SignupRequest};
pub use types::AuthSuccess;

pub(crate) use retry::retry_read;
