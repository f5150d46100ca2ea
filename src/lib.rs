//! # KB Ingest
//!
//! Tenant-scoped knowledge-base ingestion for retrieval-augmented chat.
//!
//! One document's text is hashed, split into overlapping character windows,
//! embedded chunk by chunk, and persisted to SQLite in a single transaction.
//! Embedding is best effort: when the provider is down or vector storage is
//! unavailable, chunks are still stored with a NULL vector.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────────────────┐
//! │ CLI / HTTP  │──▶│     Ingestor     │──▶│        SQLite         │
//! │ (kb, axum)  │   │ hash+chunk+embed │   │ documents/chunks/emb. │
//! └─────────────┘   └────────┬─────────┘   └───────────────────────┘
//!                            │
//!                            ▼
//!                   ┌──────────────────┐
//!                   │ Embedding API    │
//!                   │ (OpenAI/Ollama)  │
//!                   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb init                                   # create database
//! kb ingest handbook.txt --tenant acme      # ingest a file
//! kb diag --tenant acme                     # row counts
//! kb serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Request, summary, and chunk types |
//! | [`hash`] | Content hashing and derived document ids |
//! | [`chunk`] | Overlapping character-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Document, chunk, and embedding tables |
//! | [`ingest`] | Ingestion orchestration |
//! | [`diag`] | Counts and embedding probe |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod diag;
pub mod embedding;
pub mod hash;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod server;
pub mod store;
