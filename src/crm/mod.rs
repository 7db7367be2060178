//! CRM back-end: contacts, companies, a deal pipeline, activities and notes.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    ├─ auth.rs  (bearer tokens, CurrentUser)      │
//! └──────────┘ WebSocket│    ├─ api.rs   (route handlers, AppState)        │
//!                       │    └─ ws.rs    (WsMessage, per-user fan-out)     │
//!                       │         │                                        │
//!                       │         │ validation.rs  (form → *Input)         │
//!                       │         v                                        │
//!                       │  db.rs  (CrmDb, DbHandle, SQLite)                │
//!                       └──────────────────────────────────────────────────┘
//!
//! ┌──────────────┐  pick_up / hover / drop   ┌──────────────────────────┐
//! │ dealdesk     │ ────────────────────────> │ board.rs (BoardState,    │
//! │ board move   │                           │  DragCoordinator,        │
//! └──────────────┘                           │  commit_move)            │
//!                                            └────────────┬─────────────┘
//!                                                         │ StageStore
//!                                            ┌────────────v─────────────┐
//!                                            │ store.rs (LocalStore,    │
//!                                            │  RemoteStore)            │
//!                                            └──────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module   | Responsibility                                            |
//! |----------|-----------------------------------------------------------|
//! | `models` | Rows, enums, write payloads and API view types            |
//! | `format` | Currency, date, phone and initials for terminal output    |
//!
//! ## Typical Flow (drag a deal to another stage)
//!
//! 1. `BoardState::pick_up` starts a drag; `hover` resolves the target to a
//!    stage; `drop` yields a `Reassignment`.
//! 2. `commit_move` rewrites the deal's stage locally and records
//!    `MoveState::Pending` with the previous stage.
//! 3. `StageStore::persist_stage` is called once. For `RemoteStore` this is
//!    `PATCH /api/deals/{id}/stage`, which broadcasts `DealMoved`.
//! 4. Success keeps the local change and refetches the board. Failure
//!    restores the previous stage and returns `MoveOutcome::RolledBack`.

pub mod api;
pub mod auth;
pub mod board;
pub mod db;
pub mod format;
pub mod models;
pub mod server;
pub mod store;
pub mod validation;
pub mod ws;
