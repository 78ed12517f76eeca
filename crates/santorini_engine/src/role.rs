//! Logical roles and their mapping onto engine player indices.

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};

use crate::board::Player;

/// Logical participant of a match.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    /// The user who created the match.
    Creator,
    /// The user (or automated opponent) who joined it.
    Opponent,
}

impl Role {
    /// The other role.
    pub fn other(self) -> Self {
        match self {
            Self::Creator => Self::Opponent,
            Self::Opponent => Self::Creator,
        }
    }
}

/// Role that owns `player`, given which role owns engine player 0.
pub fn role_for_player(player_zero_role: Role, player: Player) -> Role {
    match player {
        Player::Zero => player_zero_role,
        Player::One => player_zero_role.other(),
    }
}

/// Engine player owned by `role`, given which role owns engine player 0.
pub fn player_for_role(player_zero_role: Role, role: Role) -> Player {
    if role == player_zero_role {
        Player::Zero
    } else {
        Player::One
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_mapping_is_inverse() {
        for zero in Role::iter() {
            for role in Role::iter() {
                let player = player_for_role(zero, role);
                assert_eq!(role_for_player(zero, player), role);
            }
        }
    }

    #[test]
    fn test_opponent_first_configuration() {
        assert_eq!(role_for_player(Role::Opponent, Player::Zero), Role::Opponent);
        assert_eq!(player_for_role(Role::Opponent, Role::Creator), Player::One);
    }

    #[test]
    fn test_role_parses_from_wire_name() {
        assert_eq!(Role::from_str("opponent").expect("parse"), Role::Opponent);
        assert_eq!(Role::Creator.to_string(), "creator");
    }
}
