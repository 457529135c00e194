//! Advisory decision engine
//!
//! Gates calls to the advisory endpoint, renders the request, fails over
//! across credentials, parses the response, falls back to local rules, caches
//! the result and resolves per-pair decisions.

pub mod cache;
pub mod client;
pub mod credentials;
pub mod engine;
pub mod fallback;
pub mod hooks;
pub mod parser;
pub mod prompt;
pub mod rate_gate;
pub mod resolver;

pub use cache::{CacheRecord, CacheState, FallbackReason, RecommendationCache};
pub use client::{request_with_failover, AdvisoryTransport, OpenRouterClient, RawResult};
pub use credentials::{Credential, CredentialPool};
pub use engine::DecisionEngine;
pub use fallback::{FallbackSynthesizer, FallbackThresholds};
pub use parser::{parse, ParseFailure, ParsedAdvice};
pub use prompt::{AssetData, PromptAssembler, PromptStyle};
pub use rate_gate::RateGate;
pub use resolver::{resolve, ResolverPolicy};
