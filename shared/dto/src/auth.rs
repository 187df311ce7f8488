use serde::{Deserialize, Serialize};

/// Operator-portal session claims, kept from the teacher's `AuthClaims`
/// shape (subject + issued/expiry) and generalized from a tenant user id to
/// a provider-scoped operator session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorClaims {
    pub sub: String,
    pub provider_id: String,
    pub exp: usize,
    pub iat: usize,
}
