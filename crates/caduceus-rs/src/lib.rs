//! # Caduceus event pipeline
//!
//! Core library of the Caduceus healthcare interoperability platform: an
//! event-driven pipeline that consumes CloudEvents from an AMQP broker,
//! routes them through declarative rules, transforms them into downstream
//! formats (custom JSON, HL7 v2, FHIR R4), and fans them out to multiple
//! client endpoints with retries and per-client circuit breaking.
//!
//! ## Pipeline topology
//!
//! ```text
//! ┌────────────┐   ┌───────────────────────────────────┐   ┌─────────────┐
//! │ Producers  │──▶│         Caduceus Interop          │──▶│ Downstream  │
//! │ (health,   │   │                                   │   │ Clients     │
//! │  orders)   │   │  ┌────────────────────────────┐   │   │ (FHIR, HL7, │
//! └────────────┘   │  │ Connection Manager         │   │   │  custom)    │
//!    AMQP          │  ├────────────────────────────┤   │   └─────────────┘
//!                  │  │ Event Consumer (dedup)     │   │
//!                  │  ├────────────────────────────┤   │
//!                  │  │ Route Match Engine         │   │
//!                  │  ├────────────────────────────┤   │
//!                  │  │ Transformation Engine      │   │
//!                  │  ├────────────────────────────┤   │
//!                  │  │ Fan-Out + Circuit Breakers │   │
//!                  │  └────────────────────────────┘   │
//!                  └───────────────────────────────────┘
//! ```
//!
//! ## Core guarantees
//!
//! - **At-least-once with deduplication**: every broker message is acked
//!   exactly once by its consumer; duplicates within the deduplication
//!   window are acknowledged without re-invoking the handler.
//! - **Bounded reconnection**: a single connection attempt in flight at any
//!   moment, exponential backoff with jitter, and a terminal `ERROR` state
//!   after the attempt budget is spent.
//! - **Priority routing**: stable priority-descending selection over
//!   wildcard source/type patterns plus optional content predicates.
//! - **Deterministic transformation**: declarative field mappings with
//!   defaults, required-field checks, and a named transform registry;
//!   optional JSON Schema validation of the output.
//! - **Failure isolation**: per-client circuit breakers and parallel
//!   fan-out where one client's failure never affects its peers.
//!
//! ## Module Organization
//!
//! - **[`config`]** - Configuration loading: env settings, routing YAML,
//!   clients JSON, transformation rules, hot reload
//! - **[`models`]** - Data models, domain types, and validation logic
//! - **[`services`]** - Business logic: connection, consumer, router,
//!   transformer, fan-out, bridge
//! - **[`routes`]** - HTTP health and stats endpoints
//! - **[`logs`]** - Logging configuration
//! - **[`utils`]** - Wildcard patterns, JSON path access, URL sanitizing
//!
//! ## Environment Variables
//!
//! - `CADUCEUS_BROKER_URL`: AMQP connection URL
//! - `CADUCEUS_ROUTING_CONFIG`: routing YAML path (default `./config/routing.yaml`)
//! - `CADUCEUS_CLIENTS_CONFIG`: clients JSON path (default `./config/clients.json`)
//! - `CADUCEUS_RULES_DIR`: transformation rules directory (default `./config/rules`)
//! - `CADUCEUS_HOST` / `CADUCEUS_PORT`: HTTP bind address (default `0.0.0.0:7400`)
//! - `NO_COLOR`: disable colored log output

pub mod config;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
