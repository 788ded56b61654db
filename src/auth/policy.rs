//! Authorization decisions for mutating operations.
//!
//! Every check works on the caller's already-loaded account row and performs
//! no I/O. A denial is reported as [`AuthError::Forbidden`], which callers keep
//! distinct from `NotFound` and `Unauthenticated`.

use crate::auth::{AuthError, AuthResult};
use crate::models::Account;

/// Self-or-admin access to an account.
pub fn can_access_account(caller: &Account, target_id: i32) -> bool {
    caller.id == target_id || caller.is_admin
}

/// Only administrators flip the verified-author flag.
pub fn can_change_verification_flag(caller: &Account) -> bool {
    caller.is_admin
}

/// Ownership-or-admin access to a resource owned by `resource_owner_id`.
pub fn can_mutate_owned(caller: &Account, resource_owner_id: i32) -> bool {
    caller.id == resource_owner_id || caller.is_admin
}

pub fn ensure(allowed: bool) -> AuthResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
