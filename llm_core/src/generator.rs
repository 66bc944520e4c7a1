use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::budget::GenerationBudget;
use crate::chat::ChatMessage;
use crate::error::GenerationError;

/// Incremental text fragments, in generation order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start generating a reply to `messages`. Connection failures are
    /// reported here; failures mid-reply surface as stream items.
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        budget: &GenerationBudget,
    ) -> Result<TextStream, GenerationError>;
}
