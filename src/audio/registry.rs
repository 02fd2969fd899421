use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;

use super::player::Player;
use crate::node::Node;

/// Sessions by guild. At most one player per guild.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: DashMap<GuildId, Arc<Player>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing session for `guild_id`, or stores the one built
    /// by `create`. The boolean is `true` when a new session was stored.
    pub fn get_or_insert_with(&self, guild_id: GuildId, create: impl FnOnce() -> Arc<Player>) -> (Arc<Player>, bool) {
        let mut created = false;
        let player = self
            .players
            .entry(guild_id)
            .or_insert_with(|| {
                created = true;
                create()
            })
            .clone();
        (player, created)
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Drops `player` only if it is still the registered session for its
    /// guild.
    pub fn remove(&self, player: &Player) -> bool {
        self.players
            .remove_if(&player.guild_id(), |_, registered| std::ptr::eq(registered.as_ref(), player))
            .is_some()
    }

    pub fn bound_to(&self, node: &Arc<Node>) -> Vec<Arc<Player>> {
        self.players
            .iter()
            .filter(|entry| entry.value().is_bound_to(node))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
