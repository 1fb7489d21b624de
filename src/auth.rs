//! Websocket auth tokens for the private level3 channel.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::market_data::error::{FeedError, FeedResult};

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `Ok(None)` subscribes without a token.
    async fn token(&self) -> FeedResult<Option<String>>;
}

/// A token known up front (config file or environment).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> FeedResult<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Runs an external program and takes its trimmed stdout as the token.
#[derive(Debug, Clone)]
pub struct CommandToken {
    argv: Vec<String>,
}

impl CommandToken {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl TokenProvider for CommandToken {
    async fn token(&self) -> FeedResult<Option<String>> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| FeedError::Token("empty token command".into()))?;
        debug!(program = %program, "Fetching websocket token");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| FeedError::Token(format!("{program}: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FeedError::Token(format!("{program} exited with {}: {}", output.status, stderr.trim())));
        }

        let token = String::from_utf8(output.stdout)
            .map_err(|e| FeedError::Token(e.to_string()))?
            .trim()
            .to_string();
        if token.is_empty() {
            return Err(FeedError::Token(format!("{program} printed no token")));
        }
        info!("Fetched websocket token");
        Ok(Some(token))
    }
}

/// A configured `token` wins; otherwise `token_command` if set; otherwise none.
pub fn provider_from(feed: &FeedConfig) -> Box<dyn TokenProvider> {
    match (&feed.token, &feed.token_command) {
        (Some(token), _) => Box::new(StaticToken(Some(token.clone()))),
        (None, Some(argv)) => Box::new(CommandToken::new(argv.clone())),
        (None, None) => Box::new(StaticToken(None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_command_token_trims_output() {
        let provider = CommandToken::new(argv(&["echo", "abc123"]));
        assert_eq!(provider.token().await.unwrap(), Some("abc123".to_string()));
    }

    #[tokio::test]
    async fn test_command_token_failures() {
        let empty = CommandToken::new(Vec::new());
        assert!(matches!(empty.token().await, Err(FeedError::Token(_))));

        let failing = CommandToken::new(argv(&["false"]));
        assert!(matches!(failing.token().await, Err(FeedError::Token(_))));

        let missing = CommandToken::new(argv(&["definitely-not-a-real-binary-lobfeed"]));
        assert!(matches!(missing.token().await, Err(FeedError::Token(_))));
    }

    #[tokio::test]
    async fn test_provider_precedence() {
        let mut feed = FeedConfig {
            token: Some("fixed".into()),
            token_command: Some(argv(&["echo", "other"])),
            ..FeedConfig::default()
        };
        assert_eq!(provider_from(&feed).token().await.unwrap(), Some("fixed".into()));

        feed.token = None;
        assert_eq!(provider_from(&feed).token().await.unwrap(), Some("other".into()));

        feed.token_command = None;
        assert_eq!(provider_from(&feed).token().await.unwrap(), None);
    }
}
