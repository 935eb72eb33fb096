// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use thiserror::Error;

use crate::acl::ResourceKind;

/// Failure of an entity operation.
///
/// Each variant has a distinct [`code`](EntityError::code) so that the protocol layer can map it
/// to a specific response.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: String },
    #[error("permission denied for {kind} {id}")]
    PermissionDenied { kind: ResourceKind, id: String },
    #[error("{kind} {id} does not belong to scanner {scanner}")]
    Mismatch {
        kind: ResourceKind,
        id: String,
        scanner: String,
    },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("internal error: {0}")]
    Internal(#[from] sqlx::Error),
}

impl EntityError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn permission_denied(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::PermissionDenied {
            kind,
            id: id.into(),
        }
    }

    pub fn mismatch(kind: ResourceKind, id: impl Into<String>, scanner: impl Into<String>) -> Self {
        Self::Mismatch {
            kind,
            id: id.into(),
            scanner: scanner.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            EntityError::NotFound { .. } => 1,
            EntityError::Mismatch { .. } => 2,
            EntityError::Missing(_) => 3,
            EntityError::PermissionDenied { .. } => 99,
            EntityError::Internal(_) => -1,
        }
    }
}

pub type EntityResult<T> = Result<T, EntityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            EntityError::not_found(ResourceKind::Agent, "a"),
            EntityError::mismatch(ResourceKind::Agent, "a", "s"),
            EntityError::Missing("name"),
            EntityError::permission_denied(ResourceKind::Scanner, "s"),
            EntityError::Internal(sqlx::Error::RowNotFound),
        ];
        let mut codes = errors.iter().map(EntityError::code).collect::<Vec<_>>();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn messages_name_the_resource() {
        assert_eq!(
            EntityError::mismatch(ResourceKind::Agent, "a1", "s1").to_string(),
            "agent a1 does not belong to scanner s1"
        );
    }
}
