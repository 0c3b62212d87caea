//! Migration service: runs Java repository migrations as background jobs.
//!
//! ## Overview
//!
//! A client submits a start request naming a repository, a source and
//! target Java version and a list of conversions. The registry validates it
//! into an immutable plan, queues a job and returns its snapshot at once.
//! Jobs run in creation order, a bounded number at a time, each in its own
//! scratch workspace that is removed whatever the outcome.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, graceful shutdown)     │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ JobRegistry::create() / get() / ...    │
//!                       │         v                                        │
//!                       │  registry.rs  (DashMap table, FIFO dispatcher)   │
//!                       │         │                                        │
//!                       │         │ JobRunner::run()                       │
//!                       │         v                                        │
//!                       │  machine.rs   (stages, retries, timeouts)        │
//!                       │         │                                        │
//!                       │         │ Fetcher / Analyzer / Transformer / ... │
//!                       │         v                                        │
//!                       │  adapters/    (git, rule scanner, build tools)   │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module         | Responsibility                                         |
//! |----------------|--------------------------------------------------------|
//! | `models`       | Shared types: `JobStatus`, `JobSnapshot`, `Issue`      |
//! | `request`      | Start request and its validation into `MigrationPlan`  |
//! | `catalog`      | Supported Java versions and conversion types           |
//! | `job`          | `JobHandle`: per-job state behind its own lock         |
//! | `progress`     | Monotonic progress and the ordered job log             |
//! | `ledger`       | Issues and dependency changes found by a job           |
//! | `workspace`    | Per-job scratch directories and startup sweep          |
//! | `capabilities` | Stage traits and their outcome types                   |
//! | `artifacts`    | Report, load-test plan and archive generation          |
//! | `events`       | `JobEvent` broadcast streamed on `/ws`                 |
//! | `preview`      | Dry-run analysis and previews in throwaway checkouts   |
//! | `diff`         | Unified line diffs for previews                        |
//!
//! ## Job Lifecycle
//!
//! 1. `POST /api/migration/start` → `JobRegistry::create()` → `pending`
//! 2. The dispatcher takes the oldest queued job once a slot is free and
//!    hands it to a `JobRunner`, which allocates the workspace.
//! 3. `cloning` → `analyzing` → `migrating` → `testing` → `reporting`, each
//!    stage recording its results into the job before the next begins.
//! 4. `completed` once artifacts exist; `failed` with a message and the log
//!    tail on any job-level error; `cancelled` when a client asks.
//! 5. The workspace is destroyed and the optional notification is sent.

pub mod adapters;
pub mod api;
pub mod artifacts;
pub mod capabilities;
pub mod catalog;
pub mod diff;
pub mod events;
pub mod job;
pub mod ledger;
pub mod machine;
pub mod models;
pub mod preview;
pub mod progress;
pub mod registry;
pub mod request;
pub mod server;
pub mod workspace;
pub mod ws;
