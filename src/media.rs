//! Media session boundary.
//!
//! The engine never touches codecs or ICE itself; a call owns an opaque
//! peer object behind [`MediaSession`] that can produce and accept SDP
//! descriptions and toggle stream state. The orchestrator uses a
//! [`MediaSessionFactory`] so handles can be recreated across reconnects
//! without changing a call's identity.

use crate::wire::StreamTarget;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// How a remote description should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media negotiation failed: {0}")]
    Negotiation(String),
    #[error("media session is closed")]
    Closed,
}

#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn create_offer(&self) -> Result<String, MediaError>;

    async fn create_answer(&self) -> Result<String, MediaError>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), MediaError>;

    /// Resolves once candidate gathering has finished and the local
    /// description is complete.
    async fn wait_for_ice_gathering_complete(&self) -> Result<(), MediaError>;

    async fn set_media_stream_state(
        &self,
        target: StreamTarget,
        kind: MediaKind,
        enabled: bool,
    ) -> Result<(), MediaError>;

    async fn local_description(&self) -> Option<String>;

    async fn remote_description(&self) -> Option<String>;

    async fn close(&self);
}

#[async_trait]
pub trait MediaSessionFactory: Send + Sync {
    async fn create_session(&self) -> Result<Arc<dyn MediaSession>, MediaError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub struct MockMediaSession {
        pub local: Mutex<Option<String>>,
        pub remote: Mutex<Option<(SdpKind, String)>>,
        pub streams: Mutex<HashMap<(StreamTarget, MediaKind), bool>>,
        pub closed: AtomicBool,
        pub fail_answer: AtomicBool,
    }

    impl MockMediaSession {
        pub fn remote_sdp(&self) -> Option<String> {
            self.remote.lock().unwrap().as_ref().map(|(_, s)| s.clone())
        }

        pub fn remote_kind(&self) -> Option<SdpKind> {
            self.remote.lock().unwrap().as_ref().map(|(k, _)| *k)
        }

        pub fn stream_state(&self, target: StreamTarget, kind: MediaKind) -> Option<bool> {
            self.streams.lock().unwrap().get(&(target, kind)).copied()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaSession for MockMediaSession {
        async fn create_offer(&self) -> Result<String, MediaError> {
            let sdp = "v=0 mock-offer".to_string();
            *self.local.lock().unwrap() = Some(sdp.clone());
            Ok(sdp)
        }

        async fn create_answer(&self) -> Result<String, MediaError> {
            if self.fail_answer.load(Ordering::SeqCst) {
                return Err(MediaError::Negotiation("scripted failure".into()));
            }
            let sdp = "v=0 mock-answer".to_string();
            *self.local.lock().unwrap() = Some(sdp.clone());
            Ok(sdp)
        }

        async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), MediaError> {
            *self.remote.lock().unwrap() = Some((kind, sdp.to_string()));
            Ok(())
        }

        async fn wait_for_ice_gathering_complete(&self) -> Result<(), MediaError> {
            Ok(())
        }

        async fn set_media_stream_state(
            &self,
            target: StreamTarget,
            kind: MediaKind,
            enabled: bool,
        ) -> Result<(), MediaError> {
            self.streams.lock().unwrap().insert((target, kind), enabled);
            Ok(())
        }

        async fn local_description(&self) -> Option<String> {
            self.local.lock().unwrap().clone()
        }

        async fn remote_description(&self) -> Option<String> {
            self.remote_sdp()
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Factory that keeps every session it created for inspection.
    #[derive(Default)]
    pub struct MockMediaFactory {
        pub created: Mutex<Vec<Arc<MockMediaSession>>>,
        pub fail_next: AtomicBool,
    }

    impl MockMediaFactory {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn latest(&self) -> Arc<MockMediaSession> {
            self.created
                .lock()
                .unwrap()
                .last()
                .expect("no media session created yet")
                .clone()
        }

        pub fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MediaSessionFactory for MockMediaFactory {
        async fn create_session(&self) -> Result<Arc<dyn MediaSession>, MediaError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(MediaError::Negotiation("factory failure".into()));
            }
            let session = Arc::new(MockMediaSession::default());
            self.created.lock().unwrap().push(session.clone());
            Ok(session)
        }
    }
}
