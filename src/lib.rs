//! # roamload - staged loading of roaming usage exports
//!
//! Reads a directory of semicolon-separated UTF-16 usage exports, maps each
//! onto one canonical 20-column record, bulk-loads it into a per-direction
//! staging table and, once every file is in, promotes the staged rows into the
//! fact table in one transaction.
//!
//! ```text
//! source ─> normalize ─> sanitize ─> audit ─> schema::reorder_to_canonical
//!        ─> loader::bulk_load (staging) ─> ... every file ... ─> promotion
//! ```
//!
//! ## Modules
//!
//! - [`source`]: decoding and parsing one export as text
//! - [`normalize`]: source layout detection and the canonical column names
//! - [`sanitize`]: numeric, text and date passes
//! - [`audit`]: provenance columns and the batch identifier
//! - [`schema`]: the canonical record and its DDL
//! - [`staging`]: identifier validation and staging table provisioning
//! - [`loader`]: batched, multi-session bulk load with rejected-row capture
//! - [`promotion`]: the staging to fact table move
//! - [`orchestrator`]: the per-run file loop
//! - [`warehouse`]: the database seam and its PostgreSQL backend
//! - [`config`], [`error`], [`logging`]: run settings, error taxonomy, run log
//!
//! ## Example
//!
//! ```no_run
//! use roamload::config::LoaderConfig;
//! use roamload::orchestrator::Loader;
//! use roamload::warehouse::PostgresWarehouse;
//!
//! # async fn example() -> roamload::error::Result<()> {
//! let config = LoaderConfig::from_env()?;
//! let warehouse = PostgresWarehouse::connect(&config).await?;
//! let loader = Loader::new(&config, &warehouse, chrono::Local::now().naive_local())?;
//! let summary = loader.run("exports".as_ref()).await;
//! assert_eq!(summary.exit_code(), 0);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, rust_2018_idioms)]

pub mod audit;
pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod normalize;
pub mod orchestrator;
pub mod promotion;
pub mod sanitize;
pub mod schema;
pub mod source;
pub mod staging;
pub mod warehouse;
