use ktr_llm::StreamId;

use super::message::ChatId;

/// Routing key for one send: the session being written and the stream feeding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SendTarget {
    pub chat_id: ChatId,
    pub stream_id: StreamId,
}

impl SendTarget {
    pub fn new(chat_id: ChatId, stream_id: StreamId) -> Self {
        Self { chat_id, stream_id }
    }
}

/// Lifecycle of the current send operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SendPhase {
    #[default]
    Idle,
    /// Turn appended, provider stream not yet open.
    Sending(SendTarget),
    Streaming(SendTarget),
    Succeeded(SendTarget),
    Failed {
        target: SendTarget,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTransition {
    Submit(SendTarget),
    StreamOpened(SendTarget),
    Complete(SendTarget),
    Fail { target: SendTarget, message: String },
}

/// Rejection reason for illegal send transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTransitionRejection {
    AlreadyInFlight {
        active: SendTarget,
        attempted: SendTarget,
    },
    NoActiveSend,
    NotOpened(SendTarget),
    TargetMismatch {
        active: SendTarget,
        attempted: SendTarget,
    },
}

pub type SendTransitionResult = Result<SendPhase, SendTransitionRejection>;

impl SendPhase {
    /// True while a send holds the loading flag.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Sending(_) | Self::Streaming(_))
    }

    pub fn active_target(&self) -> Option<&SendTarget> {
        match self {
            Self::Sending(target) | Self::Streaming(target) => Some(target),
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } => None,
        }
    }

    /// Returns true when a stream event belongs to the open stream.
    pub fn accepts_stream_event(&self, stream_id: StreamId) -> bool {
        matches!(self, Self::Streaming(active) if active.stream_id == stream_id)
    }

    /// Applies one transition deterministically.
    ///
    /// A new submit is legal from any settled phase. `Fail` is accepted before the stream
    /// opens, `Complete` only once it is streaming; both must name the active target.
    pub fn apply(&self, transition: SendTransition) -> SendTransitionResult {
        match transition {
            SendTransition::Submit(target) => self.apply_submit(target),
            SendTransition::StreamOpened(target) => self.apply_opened(target),
            SendTransition::Complete(target) => self.apply_complete(target),
            SendTransition::Fail { target, message } => self.apply_fail(target, message),
        }
    }

    fn apply_submit(&self, target: SendTarget) -> SendTransitionResult {
        match self {
            Self::Sending(active) | Self::Streaming(active) => {
                Err(SendTransitionRejection::AlreadyInFlight {
                    active: active.clone(),
                    attempted: target,
                })
            }
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } => Ok(Self::Sending(target)),
        }
    }

    fn apply_opened(&self, target: SendTarget) -> SendTransitionResult {
        match self {
            Self::Sending(active) if *active == target => Ok(Self::Streaming(target)),
            Self::Sending(active) | Self::Streaming(active) => {
                Err(SendTransitionRejection::TargetMismatch {
                    active: active.clone(),
                    attempted: target,
                })
            }
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } => {
                Err(SendTransitionRejection::NoActiveSend)
            }
        }
    }

    fn apply_complete(&self, target: SendTarget) -> SendTransitionResult {
        match self {
            Self::Streaming(active) if *active == target => Ok(Self::Succeeded(target)),
            Self::Sending(active) if *active == target => {
                Err(SendTransitionRejection::NotOpened(target))
            }
            Self::Sending(active) | Self::Streaming(active) => {
                Err(SendTransitionRejection::TargetMismatch {
                    active: active.clone(),
                    attempted: target,
                })
            }
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } => {
                Err(SendTransitionRejection::NoActiveSend)
            }
        }
    }

    fn apply_fail(&self, target: SendTarget, message: String) -> SendTransitionResult {
        match self {
            Self::Sending(active) | Self::Streaming(active) if *active == target => {
                Ok(Self::Failed { target, message })
            }
            Self::Sending(active) | Self::Streaming(active) => {
                Err(SendTransitionRejection::TargetMismatch {
                    active: active.clone(),
                    attempted: target,
                })
            }
            Self::Idle | Self::Succeeded(_) | Self::Failed { .. } => {
                Err(SendTransitionRejection::NoActiveSend)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(stream: u64) -> SendTarget {
        SendTarget::new(ChatId::from_millis(1), StreamId::new(stream))
    }

    #[test]
    fn happy_path_walks_every_phase() {
        let phase = SendPhase::Idle
            .apply(SendTransition::Submit(target(1)))
            .unwrap();
        assert!(phase.is_loading());
        assert!(!phase.accepts_stream_event(StreamId::new(1)));

        let phase = phase.apply(SendTransition::StreamOpened(target(1))).unwrap();
        assert!(phase.accepts_stream_event(StreamId::new(1)));
        assert!(!phase.accepts_stream_event(StreamId::new(2)));

        let phase = phase.apply(SendTransition::Complete(target(1))).unwrap();
        assert_eq!(phase, SendPhase::Succeeded(target(1)));
        assert!(!phase.is_loading());
    }

    #[test]
    fn second_submit_while_loading_is_rejected() {
        let phase = SendPhase::Streaming(target(1));
        assert_eq!(
            phase.apply(SendTransition::Submit(target(2))),
            Err(SendTransitionRejection::AlreadyInFlight {
                active: target(1),
                attempted: target(2),
            })
        );

        let settled = SendPhase::Failed {
            target: target(1),
            message: "x".into(),
        };
        assert_eq!(
            settled.apply(SendTransition::Submit(target(2))),
            Ok(SendPhase::Sending(target(2)))
        );
    }

    #[test]
    fn terminal_events_for_stale_streams_are_rejected() {
        let phase = SendPhase::Streaming(target(2));
        assert_eq!(
            phase.apply(SendTransition::Complete(target(1))),
            Err(SendTransitionRejection::TargetMismatch {
                active: target(2),
                attempted: target(1),
            })
        );
        assert_eq!(
            SendPhase::Idle.apply(SendTransition::Fail {
                target: target(1),
                message: "late".into(),
            }),
            Err(SendTransitionRejection::NoActiveSend)
        );
    }

    #[test]
    fn open_failure_settles_from_sending() {
        let phase = SendPhase::Sending(target(4));
        assert_eq!(
            phase.apply(SendTransition::Complete(target(4))),
            Err(SendTransitionRejection::NotOpened(target(4)))
        );
        assert!(matches!(
            phase.apply(SendTransition::Fail {
                target: target(4),
                message: "refused".into(),
            }),
            Ok(SendPhase::Failed { .. })
        ));
    }
}
