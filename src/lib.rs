//! # Contract Advisor
//!
//! Backend for a conversational contract advisor. Users upload legal
//! documents (DOCX, PDF, TXT); the advisor extracts their text, keeps it in
//! the conversation, indexes it in a per-user vector collection, analyzes it
//! for risks, and chats with the user until it can recommend a contract.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ extract ──▶ chunk ──▶ store (per-user SQLite vectors)
//!               │                      │
//!               ▼                      ▼
//!           session registry     context (Memory | Rag)
//!               │                      │
//!               └──────▶ chat turn ◀───┘ ──▶ llm ──▶ readiness ──▶ recommend
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`advisor`] | Façade: upload, chat, retrieval toggle, recommendation, clear |
//! | [`analysis`] | Capability-based document analysis |
//! | [`chunk`] | Fixed-size overlapping chunker |
//! | [`config`] | TOML configuration parsing |
//! | [`context`] | Memory/Rag context selection |
//! | [`contract`] | Contract drafting |
//! | [`db`] | SQLite connection and per-user paths |
//! | [`embedding`] | Embedding backends and vector helpers |
//! | [`error`] | Error type and result envelope |
//! | [`extract`] | Text extraction from DOCX, PDF, TXT |
//! | [`ledger`] | Uploaded file hash ledger |
//! | [`llm`] | Chat-completion backends |
//! | [`migrate`] | Schema for vector records |
//! | [`models`] | Core data types |
//! | [`session`] | Conversation state and the session store |
//! | [`store`] | Vector indexes and the store manager |
//! | [`tokens`] | `cl100k_base` token budgeting |

pub mod advisor;
pub mod analysis;
pub mod chunk;
pub mod config;
pub mod context;
pub mod contract;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod session;
pub mod store;
pub mod tokens;

pub use advisor::Advisor;
pub use error::{AdvisorError, Envelope, Result};
