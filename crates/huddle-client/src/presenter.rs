//! Presenter inference from received video envelopes.
//!
//! A peer whose latest envelope was a screen capture is presenting. With
//! several such peers the one heard from most recently wins. When nobody's
//! latest kind is screen there is no presenter and the view is a grid.

use std::collections::HashMap;

use huddle_shared::MediaKind;

#[derive(Debug, Default)]
pub struct PresenterTracker {
    /// Per peer: last kind seen and the sequence number of that envelope.
    last_kind: HashMap<String, (MediaKind, u64)>,
    seq: u64,
    current: Option<String>,
}

impl PresenterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presenter(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Record one envelope. Returns the new presenter if it changed.
    pub fn observe(&mut self, sender: &str, kind: MediaKind) -> Option<Option<String>> {
        self.seq += 1;
        self.last_kind.insert(sender.to_string(), (kind, self.seq));

        if kind.is_screen() {
            return self.set(Some(sender.to_string()));
        }
        if self.current.as_deref() == Some(sender) {
            let next = self.latest_screen();
            return self.set(next);
        }
        None
    }

    /// Drop peers that are no longer in the session.
    pub fn retain_peers(&mut self, live: &[String]) -> Option<Option<String>> {
        self.last_kind.retain(|peer, _| live.contains(peer));
        let still_here = self
            .current
            .as_ref()
            .map_or(true, |p| self.last_kind.contains_key(p));
        if still_here {
            return None;
        }
        let next = self.latest_screen();
        self.set(next)
    }

    fn latest_screen(&self) -> Option<String> {
        self.last_kind
            .iter()
            .filter(|(_, (kind, _))| kind.is_screen())
            .max_by_key(|(_, (_, seq))| *seq)
            .map(|(peer, _)| peer.clone())
    }

    fn set(&mut self, next: Option<String>) -> Option<Option<String>> {
        if next == self.current {
            return None;
        }
        self.current = next.clone();
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MediaKind::{Screen, Webcam};

    #[test]
    fn test_presenter_follows_latest_kind() {
        let mut tracker = PresenterTracker::new();
        let mut flagged = Vec::new();
        for kind in [Webcam, Webcam, Screen, Screen, Webcam] {
            tracker.observe("p", kind);
            flagged.push(tracker.presenter() == Some("p"));
        }
        assert_eq!(flagged, vec![false, false, true, true, false]);
    }

    #[test]
    fn test_changes_reported_once() {
        let mut tracker = PresenterTracker::new();
        assert_eq!(tracker.observe("p", Webcam), None);
        assert_eq!(tracker.observe("p", Screen), Some(Some("p".into())));
        assert_eq!(tracker.observe("p", Screen), None);
        assert_eq!(tracker.observe("p", MediaKind::None), Some(None));
    }

    #[test]
    fn test_most_recent_screen_wins_and_falls_back() {
        let mut tracker = PresenterTracker::new();
        tracker.observe("a", Screen);
        tracker.observe("b", Screen);
        assert_eq!(tracker.presenter(), Some("b"));

        // Both are sharing; whoever was heard last presents.
        tracker.observe("a", Screen);
        assert_eq!(tracker.presenter(), Some("a"));

        tracker.observe("a", Webcam);
        assert_eq!(tracker.presenter(), Some("b"));

        tracker.observe("b", Webcam);
        assert_eq!(tracker.presenter(), None);
    }

    #[test]
    fn test_departed_presenter_is_forgotten() {
        let mut tracker = PresenterTracker::new();
        tracker.observe("a", Screen);
        tracker.observe("b", Webcam);

        assert_eq!(tracker.retain_peers(&["b".to_string()]), Some(None));
        assert_eq!(tracker.presenter(), None);
        assert_eq!(tracker.retain_peers(&["b".to_string()]), None);
    }
}
