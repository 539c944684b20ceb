//! Display names seen on the front-end.
//!
//! The game plugin passes the player's current name along with purchase
//! requests. The latest one wins; grants for players never seen fall back
//! to the UUID.

use dashmap::DashMap;

use tanglecart::transaction::{PlayerDirectory, PlayerId};

/// Longest name the game accepts.
const MAX_NAME_LEN: usize = 16;

#[derive(Debug, Default)]
pub struct NameCache {
    names: DashMap<PlayerId, String>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name` for `player`. Returns `false` and keeps the previous
    /// name if `name` is not a valid player name.
    pub fn remember(&self, player: PlayerId, name: &str) -> bool {
        if !is_valid_name(name) {
            tracing::debug!(player = %player, "ignoring malformed player name");
            return false;
        }
        self.names.insert(player, name.to_string());
        true
    }
}

impl PlayerDirectory for NameCache {
    fn display_name(&self, player: &PlayerId) -> Option<String> {
        self.names.get(player).map(|name| name.clone())
    }
}

/// Names are 1-16 characters of `[A-Za-z0-9_]`. Anything else could smuggle
/// extra arguments into a console command.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
