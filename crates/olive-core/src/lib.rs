//! # Olive Core
//!
//! Runtime-free logic shared by the Olive Chat service and its CLI: data
//! models, the term tokenizer, term-overlap retrieval scoring with the
//! live-lookup policy, and normalization of provider stream chunks.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem code. Everything
//! here is a pure function over its inputs.

pub mod chunk;
pub mod models;
pub mod retrieval;
pub mod tokenize;
