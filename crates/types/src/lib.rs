use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("need at least 2 parties, got {0}")]
    TooFewParties(usize),

    #[error("party index {index} out of range for {count} parties")]
    IndexOutOfRange { index: u32, count: usize },

    #[error("party index {0} listed more than once")]
    DuplicateIndex(u32),

    #[error("party name at index {0} is empty")]
    EmptyName(usize),

    #[error("duplicate party name: {0}")]
    DuplicateName(String),

    #[error("party {0} has an empty address")]
    EmptyAddress(u32),

    #[error("self role {role} out of range for {count} parties")]
    SelfOutOfRange { role: RoleId, count: usize },
}

/// Position of a party inside one job's cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoleId(pub u32);

impl RoleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RoleId {
    fn from(id: u32) -> Self {
        RoleId(id)
    }
}

/// The two seats of a two-party protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    P1,
    P2,
}

impl Role {
    pub fn role_id(self) -> RoleId {
        match self {
            Role::P1 => RoleId(0),
            Role::P2 => RoleId(1),
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::P1 => Role::P2,
            Role::P2 => Role::P1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::P1 => write!(f, "P1"),
            Role::P2 => write!(f, "P2"),
        }
    }
}

impl TryFrom<RoleId> for Role {
    type Error = TopologyError;

    fn try_from(id: RoleId) -> Result<Self, Self::Error> {
        match id.0 {
            0 => Ok(Role::P1),
            1 => Ok(Role::P2),
            _ => Err(TopologyError::SelfOutOfRange { role: id, count: 2 }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartyEntry {
    pub role: RoleId,
    pub name: String,
    pub address: String,
}

impl PartyEntry {
    pub fn new(role: impl Into<RoleId>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Static cluster layout shared by every party before connecting.
///
/// Entries are stored in role order, so `parties()[i].role == RoleId(i)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<PartyEntry>", into = "Vec<PartyEntry>")]
pub struct ClusterTopology {
    parties: Vec<PartyEntry>,
}

impl TryFrom<Vec<PartyEntry>> for ClusterTopology {
    type Error = TopologyError;

    fn try_from(parties: Vec<PartyEntry>) -> Result<Self, Self::Error> {
        ClusterTopology::new(parties)
    }
}

impl From<ClusterTopology> for Vec<PartyEntry> {
    fn from(topology: ClusterTopology) -> Self {
        topology.parties
    }
}

impl ClusterTopology {
    pub fn new(mut parties: Vec<PartyEntry>) -> Result<Self, TopologyError> {
        let count = parties.len();
        if count < 2 {
            return Err(TopologyError::TooFewParties(count));
        }

        let mut seen = HashSet::new();
        for entry in &parties {
            if entry.role.index() >= count {
                return Err(TopologyError::IndexOutOfRange {
                    index: entry.role.0,
                    count,
                });
            }
            if !seen.insert(entry.role) {
                return Err(TopologyError::DuplicateIndex(entry.role.0));
            }
            if entry.address.is_empty() {
                return Err(TopologyError::EmptyAddress(entry.role.0));
            }
        }

        parties.sort_by_key(|entry| entry.role);
        let names: Vec<&str> = parties.iter().map(|entry| entry.name.as_str()).collect();
        validate_party_names(&names)?;

        Ok(Self { parties })
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn parties(&self) -> &[PartyEntry] {
        &self.parties
    }

    pub fn entry(&self, role: RoleId) -> Option<&PartyEntry> {
        self.parties.get(role.index())
    }

    pub fn names(&self) -> Vec<String> {
        self.parties.iter().map(|entry| entry.name.clone()).collect()
    }

    pub fn contains(&self, role: RoleId) -> bool {
        role.index() < self.parties.len()
    }

    pub fn validate_self(&self, role: RoleId) -> Result<(), TopologyError> {
        if self.contains(role) {
            Ok(())
        } else {
            Err(TopologyError::SelfOutOfRange {
                role,
                count: self.parties.len(),
            })
        }
    }

    /// Every role except `self_role`, in ascending order.
    pub fn peers_of(&self, self_role: RoleId) -> impl Iterator<Item = &PartyEntry> {
        self.parties.iter().filter(move |entry| entry.role != self_role)
    }
}

/// Party names must be non-empty and pairwise distinct.
pub fn validate_party_names<S: AsRef<str>>(names: &[S]) -> Result<(), TopologyError> {
    let mut seen = HashSet::new();
    for (index, name) in names.iter().enumerate() {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(TopologyError::EmptyName(index));
        }
        if !seen.insert(name) {
            return Err(TopologyError::DuplicateName(name.to_string()));
        }
    }
    Ok(())
}
