//! Text side of the voice pipeline: streaming generation, conversation
//! sessions, query budgets and web-search enrichment.

pub mod budget;
pub mod chat;
pub mod error;
pub mod generator;
pub mod openai;
pub mod prompt;
pub mod search;
pub mod session;

pub use budget::{BudgetConfig, GenerationBudget, QueryComplexity};
pub use chat::{ChatMessage, Role};
pub use error::{GenerationError, SearchError, SessionError};
pub use generator::{TextGenerator, TextStream};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use search::{needs_web_search, PerplexityClient, PerplexityConfig, SearchResult, WebSearch};
pub use session::{GenerationSession, SessionHandle, SessionRegistry};
