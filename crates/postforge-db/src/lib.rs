//! Postforge-DB: Database schema, migrations, and query operations
//!
//! This crate provides database functionality for postforge using SQLite
//! with rusqlite and r2d2 connection pooling. It is the single owner of all
//! status transitions: stage bodies never mutate records directly, they
//! return outcomes which the orchestration layer persists through these
//! queries.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//! - `maintenance` - Backup and compaction
//!
//! # Example
//!
//! ```no_run
//! use postforge_db::pool::{init_pool, get_conn};
//! use postforge_db::queries::items;
//!
//! let pool = init_pool("/var/lib/postforge/postforge.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let outcome = items::register(&conn, "inbox/report.html", Some("deadbeef")).unwrap();
//! println!("registered: {:?}", outcome);
//! ```

pub mod maintenance;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
