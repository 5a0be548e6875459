// forge-ctl-core/src/core/principal.rs
// ============================================================================
// Module: Principal
// Description: The authenticated caller, passed explicitly into every
//              engine call instead of carried on ambient request scope.
// Purpose: Make tenant/authorization checks a parameter, not a side channel.
// Dependencies: crate::core::identifiers
// ============================================================================

//! ## Overview
//! The source system derives the tenant/user from a bearer token in
//! per-request middleware and attaches it to the request object. Here the
//! authenticated principal is resolved once at the HTTP boundary and passed
//! as an explicit first parameter into every engine method, so engine code
//! never reaches for ambient scope.

use crate::core::identifiers::TenantId;
use crate::core::identifiers::UserId;

/// The authenticated caller of an engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Tenant the caller belongs to.
    pub tenant_id: TenantId,
    /// The caller's user identifier.
    pub user_id: UserId,
    /// Platform operators may act across tenants and bypass the ownership
    /// checks otherwise enforced per-tenant.
    pub is_operator: bool,
}

impl Principal {
    /// Builds a principal for an ordinary tenant user.
    #[must_use]
    pub fn tenant_user(tenant_id: impl Into<TenantId>, user_id: impl Into<UserId>) -> Self {
        Self { tenant_id: tenant_id.into(), user_id: user_id.into(), is_operator: false }
    }

    /// Builds a principal for a platform operator.
    #[must_use]
    pub fn operator(tenant_id: impl Into<TenantId>, user_id: impl Into<UserId>) -> Self {
        Self { tenant_id: tenant_id.into(), user_id: user_id.into(), is_operator: true }
    }

    /// Returns true when this principal may access a resource owned by
    /// `owner_tenant`: same tenant, or an operator.
    #[must_use]
    pub fn may_access_tenant(&self, owner_tenant: &TenantId) -> bool {
        self.is_operator || &self.tenant_id == owner_tenant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_tenant_access_denied_for_non_operator() {
        let principal = Principal::tenant_user("t1", "u1");
        assert!(principal.may_access_tenant(&TenantId::new("t1")));
        assert!(!principal.may_access_tenant(&TenantId::new("t2")));
    }

    #[test]
    fn operator_bypasses_tenant_check() {
        let principal = Principal::operator("t1", "u1");
        assert!(principal.may_access_tenant(&TenantId::new("t2")));
    }
}
