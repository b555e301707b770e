//! stubforge: a programmable HTTP stub/mock server.
//!
//! Tests register mappings (request matcher tree → response template), the
//! server answers live traffic with the best-scoring mapping, and an
//! in-memory journal records every exchange for later assertions.

// ===== Core engine =====
pub mod engine;
pub mod mapping;
pub mod matching;
pub mod message;
pub mod scenario;

// ===== Runtime surfaces =====
pub mod admin;
pub mod journal;
pub mod server;
pub mod settings;

pub use mapping::{
    Mapping, MappingBuilder, MappingStore, ProxySpec, RequestPatternBuilder, ResponseCallback,
    ResponseSpec, ResponseTemplate, ResponseTemplateBuilder,
};
pub use matching::{MatchTree, RequestMatch, RequestMatcher};
pub use message::{Fault, RequestMessage, ResponseMessage};
pub use scenario::ScenarioEngine;
pub use server::{StubServer, ServerError};
pub use settings::{ServerContext, ServerSettings};
