//! `guardrail-auth`: identity boundary for the data-access layer.
//!
//! This crate is intentionally decoupled from HTTP and storage. It validates
//! already-decoded token claims and turns valid ones into an
//! [`IdentityProvider`](guardrail_core::IdentityProvider).

pub mod claims;
pub mod identity;
pub mod principal;

pub use claims::{IdentityClaims, TokenExpectations, TokenValidationError, is_token_valid, validate_claims};
pub use identity::ClaimsIdentity;
pub use principal::PrincipalId;
