//! Role sets and the role-class tags used in workload names

use std::fmt;

use crate::crd::NodeRole;

const CLIENT: u8 = 0b001;
const DATA: u8 = 0b010;
const MASTER: u8 = 0b100;

/// A non-empty subset of {Client, Data, Master}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoleSet(u8);

impl RoleSet {
    /// Build a role set, returning `None` when `roles` is empty.
    /// Duplicate entries collapse.
    pub fn from_roles(roles: &[NodeRole]) -> Option<Self> {
        let bits = roles.iter().fold(0u8, |acc, role| acc | bit(*role));
        (bits != 0).then_some(Self(bits))
    }

    /// Parse the comma-separated form written to workload annotations
    pub fn parse(value: &str) -> Option<Self> {
        let mut roles = Vec::new();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let role = match part {
                "client" => NodeRole::Client,
                "data" => NodeRole::Data,
                "master" => NodeRole::Master,
                _ => return None,
            };
            roles.push(role);
        }
        Self::from_roles(&roles)
    }

    pub fn contains(&self, role: NodeRole) -> bool {
        self.0 & bit(role) != 0
    }

    pub fn is_master(&self) -> bool {
        self.contains(NodeRole::Master)
    }

    pub fn is_data(&self) -> bool {
        self.contains(NodeRole::Data)
    }

    pub fn is_client(&self) -> bool {
        self.contains(NodeRole::Client)
    }

    /// Roles in canonical order (client, data, master)
    pub fn roles(&self) -> Vec<NodeRole> {
        [NodeRole::Client, NodeRole::Data, NodeRole::Master]
            .into_iter()
            .filter(|r| self.contains(*r))
            .collect()
    }

    /// Short tag identifying the role combination, e.g. `cdm` or `d`
    pub fn class_tag(&self) -> &'static str {
        match self.0 {
            0b111 => "cdm",
            0b011 => "cd",
            0b101 => "cm",
            0b110 => "dm",
            0b001 => "c",
            0b010 => "d",
            _ => "m",
        }
    }

    /// Comma-separated annotation value
    pub fn annotation(&self) -> String {
        self.roles()
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_tag())
    }
}

fn bit(role: NodeRole) -> u8 {
    match role {
        NodeRole::Client => CLIENT,
        NodeRole::Data => DATA,
        NodeRole::Master => MASTER,
    }
}
