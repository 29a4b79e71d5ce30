//! Reaction aggregation: a pure projection from a message's raw reaction
//! set to the per-emoji rollups presentation renders. Never cached — the
//! canonical reaction set is the only source of truth.

use uuid::Uuid;

use banter_types::emoji::ReactionEmoji;
use banter_types::models::FullReaction;
use banter_types::view::{ReactionAggregate, Reactor};

/// Group `reactions` by emoji, in the fixed picker order, skipping emojis
/// nobody used. `reacted_by_me` is true iff `current_user` appears in that
/// emoji's group.
pub fn aggregate(reactions: &[FullReaction], current_user: Uuid) -> Vec<ReactionAggregate> {
    ReactionEmoji::ALL
        .into_iter()
        .filter_map(|emoji| {
            let group: Vec<&FullReaction> = reactions
                .iter()
                .filter(|r| r.reaction.emoji == emoji)
                .collect();
            if group.is_empty() {
                return None;
            }
            Some(ReactionAggregate {
                emoji,
                count: group.len(),
                reactors: group
                    .iter()
                    .map(|r| Reactor {
                        user_id: r.reaction.user_id,
                        username: r.username.clone(),
                    })
                    .collect(),
                reacted_by_me: group.iter().any(|r| r.reaction.user_id == current_user),
            })
        })
        .collect()
}
