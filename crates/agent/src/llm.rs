use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Text-in, text-out language model collaborator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Runs one completion under `timeout`; an expired call is an error like any other.
pub async fn complete_within(
    client: &dyn LlmClient,
    prompt: &str,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, client.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("llm completion timed out after {}ms", timeout.as_millis())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::{complete_within, LlmClient};

    struct Sleepy;

    #[async_trait]
    impl LlmClient for Sleepy {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn slow_completion_becomes_an_error() {
        let error = complete_within(&Sleepy, "hello", Duration::from_millis(20))
            .await
            .expect_err("completion should time out");
        assert!(error.to_string().contains("timed out"));
    }
}
