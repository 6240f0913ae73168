use serde::{Deserialize, Serialize};

use crate::{KernelError, Visibility};

/// One actor, or collection of actors, that a policy can grant an interaction to.
///
/// Ordinals are stored in the database. Add new entries at the bottom and never
/// reorder existing ones, or stored policies change meaning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEntry {
    /// Every possible actor.
    Public,
    /// Actors in the owner's followers collection.
    Followers,
    /// Actors in the owner's following collection.
    Following,
    /// Reserved, currently unused.
    Mutuals,
    /// Actors mentioned or tagged in the item.
    Mentioned,
    /// The item owner.
    #[serde(rename = "self")]
    SelfActor,
}

impl PolicyEntry {
    pub const ALL: [Self; 6] = [
        Self::Public,
        Self::Followers,
        Self::Following,
        Self::Mutuals,
        Self::Mentioned,
        Self::SelfActor,
    ];

    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Followers => 1,
            Self::Following => 2,
            Self::Mutuals => 3,
            Self::Mentioned => 4,
            Self::SelfActor => 5,
        }
    }

    #[must_use]
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Public),
            1 => Some(Self::Followers),
            2 => Some(Self::Following),
            3 => Some(Self::Mutuals),
            4 => Some(Self::Mentioned),
            5 => Some(Self::SelfActor),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Followers => "followers",
            Self::Following => "following",
            Self::Mutuals => "mutuals",
            Self::Mentioned => "mentioned",
            Self::SelfActor => "self",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "followers" => Some(Self::Followers),
            "following" => Some(Self::Following),
            "mutuals" => Some(Self::Mutuals),
            "mentioned" => Some(Self::Mentioned),
            "self" => Some(Self::SelfActor),
            _ => None,
        }
    }

    /// Whether this entry could sensibly appear in a policy for an item with the
    /// given visibility.
    ///
    /// Guidance only. A remote server may set a policy like "anyone can reply" on a
    /// direct message; visibility filtering still stops local users who cannot see
    /// the item from interacting with it.
    #[must_use]
    pub fn feasible_for_visibility(self, visibility: Visibility) -> bool {
        match self {
            Self::SelfActor | Self::Mentioned => true,
            Self::Followers | Self::Following => matches!(
                visibility,
                Visibility::FollowersOnly | Visibility::Public | Visibility::Unlocked
            ),
            Self::Public => matches!(visibility, Visibility::Unlocked | Visibility::Public),
            Self::Mutuals => true,
        }
    }
}

pub type PolicyEntries = Vec<PolicyEntry>;

/// Outcome of checking one actor and interaction against a policy.
///
/// Produced by the policy evaluator, which lives outside this crate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolicyResult {
    No,
    WithApproval,
    Yes,
}

impl PolicyResult {
    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            Self::No => 0,
            Self::WithApproval => 1,
            Self::Yes => 2,
        }
    }

    #[must_use]
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::No),
            1 => Some(Self::WithApproval),
            2 => Some(Self::Yes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    Like,
    Reply,
    Announce,
}

impl Interaction {
    pub const ALL: [Self; 3] = [Self::Like, Self::Reply, Self::Announce];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Reply => "reply",
            Self::Announce => "announce",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PolicyConditions {
    /// Permitted without approval.
    pub yes: PolicyEntries,
    /// Permitted only once the owner approves.
    pub with_approval: PolicyEntries,
}

impl PolicyConditions {
    fn auto_approved(yes: &[PolicyEntry]) -> Self {
        Self { yes: yes.to_vec(), with_approval: Vec::new() }
    }

    fn validate(&self, interaction: Interaction) -> Result<(), KernelError> {
        for (name, entries) in [("yes", &self.yes), ("with_approval", &self.with_approval)] {
            for (index, entry) in entries.iter().enumerate() {
                if entries[..index].contains(entry) {
                    return Err(KernelError::Validation(format!(
                        "{} appears more than once in {}.{name}",
                        entry.as_str(),
                        interaction.as_str()
                    )));
                }
            }
        }

        if let Some(entry) = self.yes.iter().find(|&entry| self.with_approval.contains(entry)) {
            return Err(KernelError::Validation(format!(
                "{} appears in both yes and with_approval for {}",
                entry.as_str(),
                interaction.as_str()
            )));
        }

        Ok(())
    }
}

/// Which interactions are accepted for a status, and under what conditions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InteractionPolicy {
    pub can_like: PolicyConditions,
    pub can_reply: PolicyConditions,
    pub can_announce: PolicyConditions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfeasibleEntry {
    pub interaction: Interaction,
    pub entry: PolicyEntry,
}

impl InteractionPolicy {
    #[must_use]
    pub fn conditions(&self, interaction: Interaction) -> &PolicyConditions {
        match interaction {
            Interaction::Like => &self.can_like,
            Interaction::Reply => &self.can_reply,
            Interaction::Announce => &self.can_announce,
        }
    }

    /// Check that no entry is listed twice within one list, and that `yes` and
    /// `with_approval` are disjoint for every interaction.
    ///
    /// # Errors
    /// Returns `KernelError::Validation` naming the first offending entry.
    pub fn validate(&self) -> Result<(), KernelError> {
        for interaction in Interaction::ALL {
            self.conditions(interaction).validate(interaction)?;
        }
        Ok(())
    }

    /// Entries that are not feasible for `visibility`. Advisory; nothing is rejected.
    #[must_use]
    pub fn infeasible_entries(&self, visibility: Visibility) -> Vec<InfeasibleEntry> {
        let mut infeasible = Vec::new();
        for interaction in Interaction::ALL {
            let conditions = self.conditions(interaction);
            for entry in conditions.yes.iter().chain(&conditions.with_approval) {
                if !entry.feasible_for_visibility(visibility) {
                    infeasible.push(InfeasibleEntry { interaction, entry: *entry });
                }
            }
        }
        infeasible
    }
}

/// Default interaction policy for a status with the given visibility.
#[must_use]
pub fn default_interaction_policy_for(visibility: Visibility) -> InteractionPolicy {
    match visibility {
        Visibility::Public => default_interaction_policy_public(),
        Visibility::Unlocked => default_interaction_policy_unlocked(),
        Visibility::FollowersOnly | Visibility::MutualsOnly => {
            default_interaction_policy_followers_only()
        }
        Visibility::Direct => default_interaction_policy_direct(),
    }
}

/// Anyone can like, reply and announce.
#[must_use]
pub fn default_interaction_policy_public() -> InteractionPolicy {
    InteractionPolicy {
        can_like: PolicyConditions::auto_approved(&[PolicyEntry::Public]),
        can_reply: PolicyConditions::auto_approved(&[PolicyEntry::Public]),
        can_announce: PolicyConditions::auto_approved(&[PolicyEntry::Public]),
    }
}

/// Same as public, for now.
#[must_use]
pub fn default_interaction_policy_unlocked() -> InteractionPolicy {
    default_interaction_policy_public()
}

/// Followers, mentioned and self can like and reply; only self can announce.
#[must_use]
pub fn default_interaction_policy_followers_only() -> InteractionPolicy {
    let audience = [PolicyEntry::Followers, PolicyEntry::Mentioned, PolicyEntry::SelfActor];
    InteractionPolicy {
        can_like: PolicyConditions::auto_approved(&audience),
        can_reply: PolicyConditions::auto_approved(&audience),
        can_announce: PolicyConditions::auto_approved(&[PolicyEntry::SelfActor]),
    }
}

/// Mentioned and self can like and reply; nobody can announce.
#[must_use]
pub fn default_interaction_policy_direct() -> InteractionPolicy {
    let audience = [PolicyEntry::Mentioned, PolicyEntry::SelfActor];
    InteractionPolicy {
        can_like: PolicyConditions::auto_approved(&audience),
        can_reply: PolicyConditions::auto_approved(&audience),
        can_announce: PolicyConditions::default(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryFeasibility {
    pub entry: PolicyEntry,
    pub feasible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyReport {
    pub visibility: Visibility,
    pub policy: InteractionPolicy,
    pub feasibility: Vec<EntryFeasibility>,
}

/// Default policy for `visibility` together with the feasibility of every entry.
#[must_use]
pub fn policy_report(visibility: Visibility) -> PolicyReport {
    PolicyReport {
        visibility,
        policy: default_interaction_policy_for(visibility),
        feasibility: PolicyEntry::ALL
            .iter()
            .map(|entry| EntryFeasibility {
                entry: *entry,
                feasible: entry.feasible_for_visibility(visibility),
            })
            .collect(),
    }
}
