//! Decides what happens when the node reports a track end: repeat, advance,
//! autoplay, or queue end.

use tracing::{debug, warn};

use crate::{
    autoplay,
    events::{StateChange, TrackChangeKind},
    model::{Track, TrackEndFrame, TrackEndReason},
    player::Player,
};

/// Top-level branch of the track-end decision tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackEndDecision {
    /// Failure reasons skip every repeat rule and advance directly.
    AdvancePastFailure,
    /// The node replaced the track; history is recorded but nothing advances.
    Replaced,
    /// Rotate under track repeat.
    RepeatTrack,
    /// Rotate under queue repeat.
    RepeatQueue,
    /// Plain advance onto the next upcoming track.
    Advance,
    /// Nothing left to play.
    QueueEnd,
}

/// Evaluates the decision tree top-down. Pure, so the ordering rules are
/// testable without a node.
pub(crate) fn decide(
    reason: TrackEndReason,
    had_track: bool,
    track_repeat: bool,
    queue_repeat: bool,
    upcoming: usize,
) -> TrackEndDecision {
    match reason {
        TrackEndReason::LoadFailed | TrackEndReason::Cleanup => TrackEndDecision::AdvancePastFailure,
        TrackEndReason::Replaced => TrackEndDecision::Replaced,
        _ => {
            if had_track && track_repeat {
                TrackEndDecision::RepeatTrack
            } else if had_track && queue_repeat {
                TrackEndDecision::RepeatQueue
            } else if upcoming > 0 {
                TrackEndDecision::Advance
            } else {
                TrackEndDecision::QueueEnd
            }
        }
    }
}

async fn emit_track_end(player: &Player, track: Track, reason: TrackEndReason) {
    if let Some(manager) = player.manager() {
        manager.handler().track_end(player.clone(), track, reason).await;
    }
}

async fn play_next_if_configured(player: &Player) {
    let play_next = player
        .manager()
        .map(|m| m.play_next_on_end())
        .unwrap_or(false);

    if play_next {
        if let Err(e) = player.play().await {
            warn!("advancing guild {} failed: {}", player.guild_id(), e);
        }
    }
}

/// Applies the decision tree to a `TrackEndEvent` from the node.
pub(crate) async fn handle_track_end(player: &Player, frame: TrackEndFrame) {
    let queue = player.queue();
    let old = player.snapshot().await;
    let ended = queue.current().await;
    let skip_history = player.take_previous_skip();

    let decision = decide(
        frame.reason,
        ended.is_some(),
        player.track_repeat(),
        player.queue_repeat(),
        queue.size().await,
    );
    debug!(
        "track end for guild {}: reason {:?} -> {:?}",
        player.guild_id(),
        frame.reason,
        decision
    );

    match decision {
        TrackEndDecision::AdvancePastFailure => {
            if let Some(ended) = &ended {
                if !skip_history {
                    queue.add_previous(ended.clone()).await;
                }
            }

            let next = queue.dequeue().await;
            queue.set_current(next.clone()).await;

            match next {
                None => queue_end(player, ended).await,
                Some(_) => {
                    if let Some(ended) = ended {
                        emit_track_end(player, ended, frame.reason).await;
                    }
                    player
                        .emit_state(old, StateChange::TrackChange(TrackChangeKind::End))
                        .await;
                    play_next_if_configured(player).await;
                }
            }
        }
        TrackEndDecision::Replaced => {
            if let Some(ended) = ended {
                if !skip_history {
                    queue.add_previous(ended.clone()).await;
                }
                emit_track_end(player, ended, frame.reason).await;
                player
                    .emit_state(old, StateChange::TrackChange(TrackChangeKind::End))
                    .await;
            }
        }
        TrackEndDecision::RepeatTrack | TrackEndDecision::RepeatQueue => {
            let Some(ended) = ended else {
                // decide() only picks the repeat branches with a current track
                return;
            };

            match decision {
                TrackEndDecision::RepeatTrack => queue.enqueue_front(ended.clone()).await,
                _ => {
                    if let Err(e) = queue.add(vec![ended.clone()], None).await {
                        warn!("re-queueing for guild {} failed: {}", player.guild_id(), e);
                    }
                }
            }

            if !skip_history {
                queue.add_previous(ended.clone()).await;
            }
            let next = queue.dequeue().await;
            queue.set_current(next.clone()).await;

            emit_track_end(player, ended, frame.reason).await;
            player
                .emit_state(old, StateChange::TrackChange(TrackChangeKind::End))
                .await;

            if frame.reason == TrackEndReason::Stopped && next.is_none() {
                queue_end(player, None).await;
            } else {
                play_next_if_configured(player).await;
            }
        }
        TrackEndDecision::Advance => {
            let Some(ended) = ended else {
                return;
            };

            if !skip_history {
                queue.add_previous(ended.clone()).await;
            }
            let next = queue.dequeue().await;
            queue.set_current(next).await;

            emit_track_end(player, ended, frame.reason).await;
            player
                .emit_state(old, StateChange::TrackChange(TrackChangeKind::End))
                .await;
            play_next_if_configured(player).await;
        }
        TrackEndDecision::QueueEnd => queue_end(player, ended).await,
    }
}

/// The queue ran dry: park the player, or let autoplay find a continuation.
pub(crate) async fn queue_end(player: &Player, ended: Option<Track>) {
    let queue = player.queue();

    if let Some(ended) = &ended {
        queue.add_previous(ended.clone()).await;
    }
    queue.set_current(None).await;

    if !player.is_autoplay() {
        player.set_playing(false);
        if let Some(manager) = player.manager() {
            manager.handler().queue_end(player.clone(), ended).await;
        }
        return;
    }

    let seed = match &ended {
        Some(track) => Some(track.clone()),
        None => queue.previous().await.into_iter().next(),
    };
    let Some(seed) = seed else {
        player.set_playing(false);
        if let Some(manager) = player.manager() {
            manager.handler().queue_end(player.clone(), ended).await;
        }
        return;
    };

    for attempt in 1..=player.autoplay_tries() {
        match autoplay::find_recommendation(player, &seed).await {
            Some(track) => {
                debug!(
                    "autoplay found '{}' for guild {} on attempt {}",
                    track.title,
                    player.guild_id(),
                    attempt
                );

                if let Err(e) = player.queue_autoplay_add(track).await {
                    warn!("autoplay enqueue failed: {}", e);
                    continue;
                }
                if let Err(e) = player.play().await {
                    warn!("autoplay playback failed: {}", e);
                    continue;
                }

                let old = player.snapshot().await;
                player
                    .emit_state(old, StateChange::TrackChange(TrackChangeKind::AutoPlay))
                    .await;
                return;
            }
            None => debug!(
                "autoplay attempt {}/{} found nothing for guild {}",
                attempt,
                player.autoplay_tries(),
                player.guild_id()
            ),
        }
    }

    player.set_playing(false);
    if let Some(manager) = player.manager() {
        manager.handler().queue_end(player.clone(), ended).await;
    }
}

#[cfg(test)]
mod tests {
    use super::TrackEndDecision::*;
    use super::*;

    #[test]
    fn failure_reasons_bypass_every_repeat_rule() {
        assert_eq!(
            decide(TrackEndReason::LoadFailed, true, true, false, 5),
            AdvancePastFailure
        );
        assert_eq!(
            decide(TrackEndReason::Cleanup, true, false, true, 0),
            AdvancePastFailure
        );
    }

    #[test]
    fn replaced_never_advances() {
        assert_eq!(
            decide(TrackEndReason::Replaced, true, true, false, 5),
            Replaced
        );
        assert_eq!(
            decide(TrackEndReason::Replaced, false, false, false, 0),
            Replaced
        );
    }

    #[test]
    fn repeat_rules_only_apply_when_a_track_existed() {
        assert_eq!(
            decide(TrackEndReason::Finished, true, true, false, 0),
            RepeatTrack
        );
        assert_eq!(
            decide(TrackEndReason::Finished, true, false, true, 0),
            RepeatQueue
        );
        // no current track: fall through to plain advance / queue end
        assert_eq!(decide(TrackEndReason::Finished, false, true, false, 2), Advance);
        assert_eq!(decide(TrackEndReason::Finished, false, false, true, 0), QueueEnd);
    }

    #[test]
    fn stopped_still_rotates_under_track_repeat() {
        // regression: the rotation happens first, the stopped/no-next check
        // only fires after it
        assert_eq!(
            decide(TrackEndReason::Stopped, true, true, false, 0),
            RepeatTrack
        );
        assert_eq!(
            decide(TrackEndReason::Stopped, true, false, true, 3),
            RepeatQueue
        );
    }

    #[test]
    fn plain_advance_and_exhaustion() {
        assert_eq!(decide(TrackEndReason::Finished, true, false, false, 1), Advance);
        assert_eq!(decide(TrackEndReason::Finished, true, false, false, 0), QueueEnd);
        assert_eq!(decide(TrackEndReason::Stopped, true, false, false, 0), QueueEnd);
    }
}
