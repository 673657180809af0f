use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// User-facing message published after a mutation settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    /// Name of the mutation that produced the notice.
    pub mutation: &'static str,
    pub message: String,
    pub at: OffsetDateTime,
}

impl Notice {
    pub fn success(mutation: &'static str, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, mutation, message)
    }

    pub fn error(mutation: &'static str, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, mutation, message)
    }

    fn new(level: NoticeLevel, mutation: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            mutation,
            message: message.into(),
            at: OffsetDateTime::now_utc(),
        }
    }
}
