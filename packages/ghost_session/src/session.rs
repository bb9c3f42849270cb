use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use crate::editor::BufferHandle;

/// Registry key: the URI of the bound buffer.
pub type SessionId = String;

/// Close signal for one duplex channel.
///
/// Whoever notices termination first calls [`close`](Self::close); the
/// transport tasks and the engine wait on [`closed`](Self::closed). Closing is
/// idempotent. A handle made from a child token also closes when its parent
/// (the listener that accepted it) shuts down.
#[derive(Clone, Debug, Default)]
pub struct ChannelHandle {
    token: CancellationToken,
}

impl ChannelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Returns true only for the call that actually closed the channel.
    pub fn close(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// One bridged field: the buffer it is bound to, the channel it talks over,
/// and whether the engine is currently writing to the buffer itself.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    buffer: BufferHandle,
    channel: ChannelHandle,
    echo_suppressed: Arc<AtomicBool>,
}

impl Session {
    pub fn new(buffer: BufferHandle, channel: ChannelHandle) -> Self {
        Self {
            id: buffer.uri().to_string(),
            buffer,
            channel,
            echo_suppressed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn buffer(&self) -> &BufferHandle {
        &self.buffer
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn is_echo_suppressed(&self) -> bool {
        self.echo_suppressed.load(Ordering::Acquire)
    }

    /// Flag shared with the editor callbacks of this session.
    pub(crate) fn echo_flag(&self) -> Arc<AtomicBool> {
        self.echo_suppressed.clone()
    }

    /// Suppress echo until the guard drops, on every exit path.
    pub(crate) fn suppress_echo(&self) -> EchoGuard {
        self.echo_suppressed.store(true, Ordering::Release);
        EchoGuard {
            flag: self.echo_suppressed.clone(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("channel_closed", &self.channel.is_closed())
            .field("echo_suppressed", &self.is_echo_suppressed())
            .finish()
    }
}

pub(crate) struct EchoGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_idempotent() {
        let channel = ChannelHandle::new();
        assert!(!channel.is_closed());
        assert!(channel.close());
        assert!(!channel.close());
        assert!(channel.is_closed());
    }

    #[test]
    fn parent_shutdown_closes_children() {
        let parent = CancellationToken::new();
        let channel = ChannelHandle::from_token(parent.child_token());
        parent.cancel();
        assert!(channel.is_closed());
        assert!(!channel.close());
    }

    #[test]
    fn echo_guard_resets_on_drop() {
        let session = Session::new(BufferHandle::new("untitled:a.txt"), ChannelHandle::new());
        assert_eq!(session.id(), "untitled:a.txt");
        {
            let _guard = session.suppress_echo();
            assert!(session.is_echo_suppressed());
        }
        assert!(!session.is_echo_suppressed());
    }

    #[test]
    fn echo_guard_resets_on_early_return() {
        fn failing(session: &Session) -> Result<(), ()> {
            let _guard = session.suppress_echo();
            Err(())
        }
        let session = Session::new(BufferHandle::new("untitled:b.txt"), ChannelHandle::new());
        assert!(failing(&session).is_err());
        assert!(!session.is_echo_suppressed());
    }
}
