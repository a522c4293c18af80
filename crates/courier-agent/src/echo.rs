//! Echo provider — repeats the user's text back.
//!
//! Used by tests and as the fallback when no API key is configured, so the
//! message plumbing can be exercised without network access.

use async_trait::async_trait;

use courier_sessions::TranscriptEntry;

use crate::provider::{GenerateReply, ProviderError, ProviderReply};

pub struct EchoProvider;

#[async_trait]
impl GenerateReply for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate_reply(
        &self,
        _system: &str,
        _transcript: &[TranscriptEntry],
        user: &str,
    ) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply::text_only(user))
    }
}
