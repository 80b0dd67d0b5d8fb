//! # mandiao
//!
//! A local retrieval-augmented assistant.
//!
//! mandiao brings a local model runtime from "absent" to "serving the
//! required models", ingests documents into a content-addressed vector
//! store, and answers questions by streaming the runtime's completion of a
//! prompt augmented with the nearest stored chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Bootstrap   │──▶│   Runtime    │◀──│  Generate  │
//! │ install/pull │   │ serve/pull   │   │  (stream)  │
//! └──────────────┘   └──────┬───────┘   └─────▲──────┘
//!                           │ /api/embed      │ prompt
//! ┌──────────────┐   ┌──────▼───────┐   ┌─────┴──────┐
//! │   Ingest     │──▶│ Vector store │──▶│  Retrieve  │
//! │ load+chunk   │   │   (SQLite)   │   │  + prompt  │
//! └──────────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mandiao init                  # write config, create database
//! mandiao setup                 # install runtime, pull models
//! mandiao ingest ./papers       # index PDFs / text files
//! mandiao ask "what does chapter 2 conclude?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`registry`] | Required model list |
//! | [`progress`] | Setup progress cell and reporters |
//! | [`install`] | Runtime installation strategies |
//! | [`runtime`] | Runtime probes, `serve`, `pull` |
//! | [`bootstrap`] | Bootstrap state machine |
//! | [`db`] | Database connection |
//! | [`store`] | Vector store |
//! | [`loader`] | Document loading |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedder capability and backends |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Retrieval and prompt building |
//! | [`generate`] | Streaming completion proxy |
//! | [`assistant`] | Facade used by the CLI |

pub mod assistant;
pub mod bootstrap;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod ingest;
pub mod install;
pub mod loader;
pub mod models;
pub mod progress;
pub mod registry;
pub mod retrieve;
pub mod runtime;
pub mod store;
