//! simq-client: client-side orchestration of multimedia similarity queries
//!
//! Issues staged similarity, More-Like-This, lookup and SOM requests, merges the
//! streamed result fragments into per-session score containers, fuses similarity
//! observations into scores, and publishes ranked views.

pub mod fusion;
pub mod history;
pub mod query;
pub mod results;
pub mod scores;

pub use fusion::{FusionFunction, ScoreFunction};
pub use history::{History, HistoryEntry, InMemoryHistory};
pub use query::{MessageChannel, QueryService, RetrieverState, SomParameters};
pub use results::{ResultsContainer, ResultsSnapshot, UpdateOutcome, ViewReceivers};
