//! Shared response types for the auth flows.

use crate::token::TokenPair;
use serde::Serialize;

/// Successful authentication: minimal identity plus a token pair.
///
/// The transport layer decides how these travel (JSON body, cookies);
/// this is the semantic contract only.
#[derive(Clone, Debug, Serialize)]
pub struct AuthSuccess {
    pub user_id: String,
    pub email: String,
    /// The session lineage the refresh token is bound to.
    pub session_id: String,
    /// Whether the access token carries a completed MFA check.
    pub mfa_verified: bool,
    pub tokens: TokenPair,
}
