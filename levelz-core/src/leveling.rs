//! Leveling and role rewards.
//!
//! [`award`] applies an amount to a cached record and reports what changed:
//! the level before and after and, on a level-up, the alert to post and the
//! role changes to apply. Nothing here touches the chat platform; the
//! integration layer executes the returned plan.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RewardConfig;
use crate::curve::{effective_modifier, level_of};
use crate::types::{ChannelId, GuildId, GuildLevelConfig, PlayerRecord, RoleId, UserId};

/// Which message family a level-up alert uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertTemplate {
    /// Plain "you reached level N".
    Generic,
    /// The new level also unlocked a role.
    RoleReward {
        /// Role mapped to exactly the new level.
        role_id: RoleId,
    },
}

/// A level-up announcement to post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpAlert {
    /// Guild the player leveled in.
    pub guild_id: GuildId,
    /// Who leveled up.
    pub user_id: UserId,
    /// The level reached.
    pub level: u64,
    /// Configured level-up channel; `None` means the message's channel.
    pub channel_id: Option<ChannelId>,
    /// Message family.
    pub template: AlertTemplate,
}

/// Role changes implied by a level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePlan {
    /// Roles to grant, ascending by level.
    pub grant: Vec<RoleId>,
    /// Roles to revoke (hierarchy mode only).
    pub revoke: Vec<RoleId>,
    /// The single role kept in hierarchy mode.
    pub retained: Option<RoleId>,
}

impl RolePlan {
    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }
}

/// What one award did to a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelOutcome {
    /// Level before the award.
    pub level_before: u64,
    /// Level after the award.
    pub level_after: u64,
    /// Whether the level increased.
    pub leveled_up: bool,
    /// Set only on a level-up.
    pub new_level: Option<u64>,
    /// Alert to post, when alerts are enabled and the player leveled up.
    pub alert: Option<LevelUpAlert>,
    /// Role changes; empty unless the player leveled up.
    pub roles: RolePlan,
    /// Stored experience after the award.
    pub total_experience: i64,
}

/// Apply `amount` to `record` and work out the consequences.
///
/// A missing config levels with the default modifier and produces no alert
/// and no roles.
pub fn award(config: Option<&GuildLevelConfig>, record: &mut PlayerRecord, amount: i64) -> LevelOutcome {
    let modifier = effective_modifier(config);
    let level_before = level_of(record.experience, modifier);
    record.add_experience(amount);
    let level_after = level_of(record.experience, modifier);
    let leveled_up = level_after > level_before;

    let mut outcome = LevelOutcome {
        level_before,
        level_after,
        leveled_up,
        new_level: None,
        alert: None,
        roles: RolePlan::default(),
        total_experience: record.experience,
    };
    if !leveled_up {
        return outcome;
    }
    outcome.new_level = Some(level_after);

    let Some(config) = config else {
        return outcome;
    };

    if config.level_alerts_enabled {
        let template = config
            .level_roles
            .get(&level_after)
            .map_or(AlertTemplate::Generic, |&role_id| AlertTemplate::RoleReward { role_id });
        outcome.alert = Some(LevelUpAlert {
            guild_id: record.guild_id,
            user_id: record.user_id,
            level: level_after,
            channel_id: config.level_up_channel_id,
            template,
        });
    }

    outcome.roles = plan_roles(
        &config.level_roles,
        level_after,
        config.level_hierarchy_enabled,
    );
    outcome
}

/// Roles earned at `new_level`.
///
/// Every role mapped to a level at or below `new_level` is granted once. With
/// `hierarchy`, only the highest of those is retained and every other role
/// at or below `new_level` is revoked; the caller skips roles the member
/// does not hold.
#[must_use]
pub fn plan_roles(level_roles: &BTreeMap<u64, RoleId>, new_level: u64, hierarchy: bool) -> RolePlan {
    let mut grant: Vec<RoleId> = Vec::new();
    for (_, &role) in level_roles.range(..=new_level) {
        if !grant.contains(&role) {
            grant.push(role);
        }
    }

    if !hierarchy {
        return RolePlan {
            grant,
            revoke: Vec::new(),
            retained: None,
        };
    }

    let Some((_, &retained)) = level_roles.range(..=new_level).next_back() else {
        return RolePlan::default();
    };
    // A role mapped to several levels is kept if any of them is the highest.
    let revoke = grant.iter().copied().filter(|&r| r != retained).collect();
    RolePlan {
        grant,
        revoke,
        retained: Some(retained),
    }
}

/// Draw a message reward from the configured inclusive range.
pub fn random_award_amount<R: Rng + ?Sized>(rng: &mut R, rewards: &RewardConfig) -> i64 {
    let (low, high) = if rewards.min_amount <= rewards.max_amount {
        (rewards.min_amount, rewards.max_amount)
    } else {
        (rewards.max_amount, rewards.min_amount)
    };
    rng.gen_range(low..=high)
}
