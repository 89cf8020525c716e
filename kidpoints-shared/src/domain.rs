use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A stored or transmitted tag that does not name any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Declares a closed enum whose lowercase string form is shared by the
/// database columns and the JSON API.
macro_rules! tagged_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $kind:literal {
            $($variant:ident => $tag:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($name::$variant),)+
                    other => Err(UnknownVariant::new($kind, other)),
                }
            }
        }
    };
}

tagged_enum! {
    /// Lifecycle of one task assignment. `Approved` and `Rejected` are terminal.
    TaskStatus as "task status" {
        Assigned => "assigned",
        Submitted => "submitted",
        Approved => "approved",
        Rejected => "rejected",
    }
}

tagged_enum! {
    /// Lifecycle of one reward claim. `Approved` and `Rejected` are terminal.
    ClaimStatus as "claim status" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

tagged_enum! {
    TransactionType as "transaction type" {
        TaskCompletion => "task_completion",
        RewardRedemption => "reward_redemption",
        ManualAdjustment => "manual_adjustment",
    }
}

tagged_enum! {
    InvitationStatus as "invitation status" {
        Active => "active",
        Used => "used",
        Expired => "expired",
    }
}

tagged_enum! {
    /// A parent's verdict on a submitted task or a pending claim.
    Decision as "decision" {
        Approved => "approved",
        Rejected => "rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_serde_names() {
        let json = serde_json::to_string(&TransactionType::RewardRedemption).unwrap();
        assert_eq!(json, "\"reward_redemption\"");
        assert_eq!(
            "task_completion".parse::<TransactionType>().unwrap(),
            TransactionType::TaskCompletion
        );
    }

    #[test]
    fn unknown_tag_is_reported_with_its_kind() {
        let err = "archived".parse::<ClaimStatus>().unwrap_err();
        assert_eq!(err.kind, "claim status");
        assert_eq!(err.value, "archived");
    }
}
