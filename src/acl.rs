// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Permission checks.
//!
//! The access control engine itself lives outside of this crate. Operations only ask whether a
//! principal may perform a command on a resource through [`AccessControl`].

use std::fmt;

/// Kinds of resources handled by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Agent,
    AgentGroup,
    Scanner,
}

impl ResourceKind {
    fn singular(&self) -> &'static str {
        match self {
            ResourceKind::Agent => "agent",
            ResourceKind::AgentGroup => "agent_group",
            ResourceKind::Scanner => "scanner",
        }
    }

    fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Agent => "agents",
            ResourceKind::AgentGroup => "agent_groups",
            ResourceKind::Scanner => "scanners",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.singular().replace('_', " "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Get,
    Create,
    Modify,
    Delete,
    Restore,
}

impl Permission {
    /// Name of the protocol command guarded by this permission, e.g. `modify_agent_group`.
    pub fn command(&self, kind: ResourceKind) -> String {
        match self {
            Permission::Get => format!("get_{}", kind.plural()),
            Permission::Create => format!("create_{}", kind.singular()),
            Permission::Modify => format!("modify_{}", kind.singular()),
            Permission::Delete => format!("delete_{}", kind.singular()),
            Permission::Restore => "restore".to_owned(),
        }
    }
}

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub uuid: String,
}

impl Principal {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }
}

pub trait AccessControl: Send + Sync {
    /// Returns true when `principal` may perform `permission` on the resource.
    ///
    /// `id` is empty for commands that are not bound to an existing resource, like creation.
    fn may(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        id: &str,
        permission: Permission,
    ) -> bool;
}

/// Grants everything, used by internal maintenance like the agent updater.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn may(&self, _: &Principal, _: ResourceKind, _: &str, _: Permission) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names() {
        assert_eq!(
            Permission::Get.command(ResourceKind::Scanner),
            "get_scanners"
        );
        assert_eq!(
            Permission::Modify.command(ResourceKind::AgentGroup),
            "modify_agent_group"
        );
        assert_eq!(
            Permission::Delete.command(ResourceKind::Agent),
            "delete_agent"
        );
        assert_eq!(ResourceKind::AgentGroup.to_string(), "agent group");
    }
}
