/// Failures reported by an editor surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditorError {
    /// The buffer was closed (or never existed) when the operation ran
    #[error("buffer is closed: {0}")]
    BufferClosed(String),

    /// The editor refused to open a new buffer
    #[error("editor refused to create buffer: {0}")]
    CreateRefused(String),

    #[error("editor error: {0}")]
    Other(String),
}

/// Errors that end a single session. None of them affect other sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to create buffer: {0}")]
    BufferCreation(#[source] EditorError),

    #[error(transparent)]
    Editor(#[from] EditorError),
}

impl SessionError {
    /// Losing the buffer mid-session is a normal way for a session to end.
    pub fn is_buffer_loss(&self) -> bool {
        matches!(self, Self::Editor(EditorError::BufferClosed(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_loss_is_distinguished() {
        let err = SessionError::from(EditorError::BufferClosed("untitled:a.txt".into()));
        assert!(err.is_buffer_loss());

        let err = SessionError::BufferCreation(EditorError::BufferClosed("x".into()));
        assert!(!err.is_buffer_loss());

        let err = SessionError::Editor(EditorError::Other("boom".into()));
        assert!(!err.is_buffer_loss());
    }

    #[test]
    fn malformed_wraps_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SessionError::from(json_err);
        assert!(err.to_string().starts_with("malformed message"));
    }
}
