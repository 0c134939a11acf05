//! Commands accepted over the client message channel.

/// A recognized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Activate a waiting worker immediately.
    SkipWaiting,
    /// Fetch every manifest resource that is not cached yet.
    DownloadOffline,
}

impl Command {
    /// Parse message data. Anything unrecognized yields `None`.
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "skipWaiting" => Some(Self::SkipWaiting),
            "downloadOffline" => Some(Self::DownloadOffline),
            _ => None,
        }
    }

    /// Wire form of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipWaiting => "skipWaiting",
            Self::DownloadOffline => "downloadOffline",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
