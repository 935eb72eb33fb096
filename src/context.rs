// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::sync::Arc;

use crate::acl::{AccessControl, AllowAll, Permission, Principal, ResourceKind};

pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Everything an operation needs to know about the request it serves.
#[derive(Clone)]
pub struct Context {
    pub principal: Principal,
    pub access: Arc<dyn AccessControl>,
    pub ids: Arc<dyn IdGenerator>,
}

impl Context {
    pub fn new(
        principal: Principal,
        access: Arc<dyn AccessControl>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            principal,
            access,
            ids,
        }
    }

    /// Context of internal maintenance tasks, acting without restrictions.
    pub fn system() -> Self {
        Self::new(
            Principal::new(""),
            Arc::new(AllowAll),
            Arc::new(UuidGenerator),
        )
    }

    pub fn may(&self, kind: ResourceKind, id: &str, permission: Permission) -> bool {
        let allowed = self.access.may(&self.principal, kind, id, permission);
        if !allowed {
            tracing::debug!(
                principal = %self.principal.uuid,
                command = %permission.command(kind),
                id,
                "permission denied"
            );
        }
        allowed
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}
