//! Zustandsautomat einer Peer Connection
//!
//! Idle → OfferReceived → AnswerSent → Connected → Closed.
//! Failed und Closed sind aus jedem nicht-terminalen Zustand erreichbar.

use super::SignalingError;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Peer Connection angelegt, noch kein Offer
    Idle,
    /// Remote Description wird gesetzt
    OfferReceived,
    /// Answer an den Client geschickt, ICE läuft
    AnswerSent,
    /// Medien fließen
    Connected,
    /// Regulär beendet
    Closed,
    /// Verhandlung oder Verbindung fehlgeschlagen
    Failed,
}

impl PeerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Failed)
    }

    pub fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Idle, OfferReceived)
                | (OfferReceived, AnswerSent)
                | (AnswerSent, Connected)
                | (_, Closed)
                | (_, Failed)
        )
    }

    /// Abbildung der WebRTC-Verbindungszustände; `None` = kein Wechsel
    pub fn from_connection_state(state: RTCPeerConnectionState) -> Option<PeerState> {
        match state {
            RTCPeerConnectionState::Connected => Some(PeerState::Connected),
            RTCPeerConnectionState::Closed => Some(PeerState::Closed),
            // Ein abgerissener Peer muss neu verhandeln
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                Some(PeerState::Failed)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PeerState::Idle => "idle",
            PeerState::OfferReceived => "offer-received",
            PeerState::AnswerSent => "answer-sent",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
            PeerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Führt einen geprüften Zustandswechsel aus und gibt den alten Zustand zurück
pub fn transition(current: &mut PeerState, next: PeerState) -> Result<PeerState, SignalingError> {
    if !current.can_transition_to(next) {
        return Err(SignalingError::InvalidTransition {
            from: *current,
            to: next,
        });
    }
    let previous = *current;
    *current = next;
    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use PeerState::*;

    #[test]
    fn happy_path_is_allowed() {
        let mut state = Idle;
        for next in [OfferReceived, AnswerSent, Connected, Closed] {
            transition(&mut state, next).unwrap();
        }
        assert_eq!(state, Closed);
    }

    #[test]
    fn failed_is_reachable_from_every_live_state() {
        for from in [Idle, OfferReceived, AnswerSent, Connected] {
            assert!(from.can_transition_to(Failed), "{} -> failed", from);
        }
    }

    #[test]
    fn terminal_states_stay_terminal() {
        for from in [Closed, Failed] {
            for to in [Idle, OfferReceived, AnswerSent, Connected, Closed, Failed] {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn steps_cannot_be_skipped() {
        let mut state = Idle;
        let err = transition(&mut state, Connected).unwrap_err();
        assert!(matches!(
            err,
            SignalingError::InvalidTransition {
                from: Idle,
                to: Connected
            }
        ));
        assert_eq!(state, Idle);
        assert!(!AnswerSent.can_transition_to(OfferReceived));
    }

    #[test]
    fn connection_states_map_to_peer_states() {
        assert_eq!(
            PeerState::from_connection_state(RTCPeerConnectionState::Connected),
            Some(Connected)
        );
        assert_eq!(
            PeerState::from_connection_state(RTCPeerConnectionState::Disconnected),
            Some(Failed)
        );
        assert_eq!(
            PeerState::from_connection_state(RTCPeerConnectionState::Connecting),
            None
        );
    }
}
