//! Per-player request cooldown.
//!
//! A player who passes the check is blocked for the configured window; a
//! blocked player is told how long is left and the window is not extended.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use tanglecart::transaction::PlayerId;

/// Tracks when each player may issue the next command.
#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    ready_at: DashMap<PlayerId, Instant>,
}

impl Cooldown {
    /// Creates a cooldown of `window`. A zero window disables it.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            ready_at: DashMap::new(),
        }
    }

    /// Admits `player` and starts a new window, or returns the time left
    /// in the current one.
    pub fn check(&self, player: PlayerId) -> Result<(), Duration> {
        if self.window.is_zero() {
            return Ok(());
        }

        let now = Instant::now();
        let mut entry = self.ready_at.entry(player).or_insert(now);
        if *entry > now {
            return Err(*entry - now);
        }
        *entry = now + self.window;
        Ok(())
    }

    /// Drops entries whose window has passed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.ready_at.retain(|_, ready_at| *ready_at > now);
    }

    pub fn len(&self) -> usize {
        self.ready_at.len()
    }
}

/// Whole seconds left, rounded up so "0s remaining" is never shown.
pub fn remaining_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn player() -> PlayerId {
        PlayerId(Uuid::new_v4())
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_inside_window_is_refused() {
        let cooldown = Cooldown::new(Duration::from_secs(30));
        let p = player();

        assert!(cooldown.check(p).is_ok());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cooldown.check(p), Err(Duration::from_secs(20)));

        // Refusals do not extend the window.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(cooldown.check(p).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn players_are_independent() {
        let cooldown = Cooldown::new(Duration::from_secs(30));
        let (a, b) = (player(), player());
        assert!(cooldown.check(a).is_ok());
        assert!(cooldown.check(b).is_ok());
        assert!(cooldown.check(a).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_disables() {
        let cooldown = Cooldown::new(Duration::ZERO);
        let p = player();
        for _ in 0..5 {
            assert!(cooldown.check(p).is_ok());
        }
        assert_eq!(cooldown.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_entries() {
        let cooldown = Cooldown::new(Duration::from_secs(5));
        cooldown.check(player()).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cooldown.check(player()).unwrap();
        assert_eq!(cooldown.len(), 2);

        tokio::time::advance(Duration::from_secs(4)).await;
        cooldown.purge_expired();
        assert_eq!(cooldown.len(), 1);
    }

    #[test]
    fn remaining_rounds_up() {
        assert_eq!(remaining_secs(Duration::from_millis(19_001)), 20);
        assert_eq!(remaining_secs(Duration::from_secs(20)), 20);
        assert_eq!(remaining_secs(Duration::from_millis(1)), 1);
    }
}
