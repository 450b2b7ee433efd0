//! # Olive Chat
//!
//! A chat assistant backend that talks to a hosted model whose response
//! conventions are not known in advance, and grounds its prompts in
//! locally stored documents and live web answers.
//!
//! ## Architecture
//!
//! ```text
//!  prompt ──▶ Retriever ──▶ compose_system ──▶ Negotiator ──▶ Typewriter ──▶ ChatView
//!             (store +                          (probe, race,      (slice       (terminal,
//!              live lookup)                      fallback)          reveal)      SSE, memory)
//!                                                                      │
//!                                                         Store::save_chat (background)
//! ```
//!
//! The pure pieces (tokenizer, scorer, chunk normalizer, data model) live
//! in the `olive-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Documents and chat history |
//! | [`live`] | DuckDuckGo live lookup |
//! | [`retrieve`] | Context retrieval service |
//! | [`provider`] | Chat provider abstraction (OpenAI, Ollama) |
//! | [`view`] | Display targets |
//! | [`typewriter`] | Incremental reveal |
//! | [`negotiate`] | Response-protocol negotiation |
//! | [`prompt`] | System instruction composition |
//! | [`chat`] | Chat turns and sessions |
//! | [`server`] | HTTP API |

pub mod chat;
pub mod config;
pub mod db;
pub mod live;
pub mod migrate;
pub mod negotiate;
pub mod prompt;
pub mod provider;
pub mod retrieve;
pub mod server;
pub mod store;
pub mod typewriter;
pub mod view;
