//! # Legal RAG
//!
//! Citation-backed question answering and document drafting over a corpus of
//! ingested legal documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Loader       │──▶│ Chunk+Embed  │──▶│ Vector index │
//! │ file/dir/zip │   │ per page     │   │ + documents  │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!        ┌─────────────┐   ┌───────────┐       │
//! query ▶│ Classifier  │──▶│ Retriever │◀──────┘
//!        └──────┬──────┘   └─────┬─────┘
//!               ▼                ▼
//!        ┌──────────────────────────────┐
//!        │ Assistant / Drafter          │──▶ answer + citations
//!        └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lexrag init                            # create database
//! lexrag ingest ./contracts archive.zip  # load, chunk, embed, index
//! lexrag ask "What is the penalty for late delivery?"
//! lexrag draft "Pre-trial claim for late delivery"
//! lexrag serve                           # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed failures |
//! | [`models`] | Core data types |
//! | [`extract`] | Per-format page extraction |
//! | [`loader`] | Files, directories and ZIP archives |
//! | [`chunk`] | Page-bounded chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Generation provider abstraction |
//! | [`retry`] | Backoff for provider calls |
//! | [`store`] | Vector index and document repository |
//! | [`ingest`] | Ingestion pipeline |
//! | [`classify`] | Intent classification |
//! | [`retrieval`] | Retrieval and relevance filter |
//! | [`prompts`] | Instruction templates |
//! | [`answer`] | Context assembly and grounded answers |
//! | [`draft`] | Document drafting |
//! | [`lookup`] | Source lookup |
//! | [`app`] | Backend wiring |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod app;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod db;
pub mod draft;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
mod http;
pub mod ingest;
pub mod loader;
pub mod lookup;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod retrieval;
pub mod retry;
pub mod server;
pub mod store;
