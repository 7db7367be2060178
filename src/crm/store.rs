//! Where the pipeline board loads from and persists stage moves to.
//!
//! `LocalStore` talks to the database directly (CLI against a local file).
//! `RemoteStore` talks to a running `dealdesk serve` over HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::db::DbHandle;
use super::models::{BoardView, Deal};

/// Persistence seam for the board. Test double: `FakeStore` in `board` tests.
#[async_trait]
pub trait StageStore: Send + Sync {
    /// Current stages and deals, grouped into columns.
    async fn fetch_board(&self) -> Result<BoardView>;

    /// Persist a deal's new stage and bump its `updated_at`.
    async fn persist_stage(&self, deal_id: i64, stage_id: i64) -> Result<Deal>;
}

pub struct LocalStore {
    db: DbHandle,
    user_id: i64,
}

impl LocalStore {
    pub fn new(db: DbHandle, user_id: i64) -> Self {
        Self { db, user_id }
    }
}

#[async_trait]
impl StageStore for LocalStore {
    async fn fetch_board(&self) -> Result<BoardView> {
        let user_id = self.user_id;
        self.db.call(move |db| db.get_board(user_id)).await
    }

    async fn persist_stage(&self, deal_id: i64, stage_id: i64) -> Result<Deal> {
        let user_id = self.user_id;
        self.db
            .call(move |db| db.set_deal_stage(user_id, deal_id, stage_id))
            .await
    }
}

/// Upper bound on a whole request, connect through body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl RemoteStore {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        Self::with_timeout(base_url, token, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Turn a non-2xx response into an error carrying the server's message.
    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = match resp.json::<ApiErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        anyhow::bail!("{what} failed ({status}): {message}")
    }
}

#[async_trait]
impl StageStore for RemoteStore {
    async fn fetch_board(&self) -> Result<BoardView> {
        let resp = self
            .client
            .get(format!("{}/api/deals/board", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Failed to reach dealdesk server")?;
        Self::check(resp, "Fetching board")
            .await?
            .json::<BoardView>()
            .await
            .context("Failed to parse board response")
    }

    async fn persist_stage(&self, deal_id: i64, stage_id: i64) -> Result<Deal> {
        let resp = self
            .client
            .patch(format!("{}/api/deals/{}/stage", self.base_url, deal_id))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "stage_id": stage_id }))
            .send()
            .await
            .context("Failed to reach dealdesk server")?;
        Self::check(resp, "Moving deal")
            .await?
            .json::<Deal>()
            .await
            .context("Failed to parse deal response")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crm::api::AppState;
    use crate::crm::auth::issue_token;
    use crate::crm::board::{BoardState, MoveOutcome, Reassignment, commit_move};
    use crate::crm::db::CrmDb;
    use crate::crm::models::DealInput;
    use crate::crm::server::build_router;

    struct Served {
        base_url: String,
        token: String,
        db: DbHandle,
        user_id: i64,
        deal_id: i64,
    }

    /// A real API server on an ephemeral port, seeded with one deal in Lead.
    async fn serve() -> Result<Served> {
        let db = CrmDb::new_in_memory()?;
        let user = db.create_profile("Remote", "remote@example.com")?;
        let token = issue_token(&db, user.id, "test")?;
        let deal = db.create_deal(
            user.id,
            &DealInput {
                title: "Remote deal".into(),
                ..Default::default()
            },
        )?;
        let handle = DbHandle::new(db);
        let state = Arc::new(AppState::new(handle.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, build_router(state)).await;
        });

        Ok(Served {
            base_url: format!("http://{addr}"),
            token,
            db: handle,
            user_id: user.id,
            deal_id: deal.id,
        })
    }

    fn stage_id(board: &BoardState, name: &str) -> i64 {
        board
            .stages()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id)
            .unwrap_or_else(|| panic!("no stage named {name}"))
    }

    #[tokio::test]
    async fn local_store_persists_through_db() -> Result<()> {
        let db = CrmDb::new_in_memory()?;
        let user = db.create_profile("Local", "local@example.com")?;
        let deal = db.create_deal(
            user.id,
            &DealInput {
                title: "Local deal".into(),
                ..Default::default()
            },
        )?;
        let handle = DbHandle::new(db);
        let store = LocalStore::new(handle, user.id);

        let board = store.fetch_board().await?;
        let target = board.columns[2].stage.id;
        let moved = store.persist_stage(deal.id, target).await?;
        assert_eq!(moved.stage_id, target);

        let board = store.fetch_board().await?;
        assert_eq!(board.columns[2].deals.len(), 1);
        assert!(board.columns[0].deals.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn local_store_rejects_unknown_stage() -> Result<()> {
        let db = CrmDb::new_in_memory()?;
        let user = db.create_profile("Local", "local@example.com")?;
        let deal = db.create_deal(
            user.id,
            &DealInput {
                title: "Local deal".into(),
                ..Default::default()
            },
        )?;
        let store = LocalStore::new(DbHandle::new(db), user.id);
        assert!(store.persist_stage(deal.id, 9999).await.is_err());
        Ok(())
    }

    #[test]
    fn remote_store_trims_trailing_slash() -> Result<()> {
        let store = RemoteStore::new("http://127.0.0.1:3141/", "tok")?;
        assert_eq!(store.base_url, "http://127.0.0.1:3141");
        Ok(())
    }

    #[tokio::test]
    async fn remote_move_commits_on_the_server() -> Result<()> {
        let served = serve().await?;
        let store = RemoteStore::new(&served.base_url, &served.token)?;
        let mut board = BoardState::new(store.fetch_board().await?);
        let lead = stage_id(&board, "Lead");
        let proposal = stage_id(&board, "Proposal");
        assert_eq!(board.stage_of(served.deal_id), Some(lead));

        let r = Reassignment {
            deal_id: served.deal_id,
            stage_id: proposal,
        };
        let outcome = commit_move(&mut board, &store, r).await?;

        assert!(matches!(
            outcome,
            MoveOutcome::Committed { deal_id, stage_id } if deal_id == served.deal_id && stage_id == proposal
        ));
        assert_eq!(board.stage_of(served.deal_id), Some(proposal));

        let (user_id, deal_id) = (served.user_id, served.deal_id);
        let stored = served.db.call(move |db| db.get_deal(user_id, deal_id)).await?;
        assert_eq!(stored.stage_id, proposal);
        Ok(())
    }

    #[tokio::test]
    async fn remote_move_to_deleted_stage_rolls_back() -> Result<()> {
        let served = serve().await?;
        let store = RemoteStore::new(&served.base_url, &served.token)?;
        let mut board = BoardState::new(store.fetch_board().await?);
        let lead = stage_id(&board, "Lead");
        let negotiation = stage_id(&board, "Negotiation");

        // Gone on the server, still a column in the stale board.
        let user_id = served.user_id;
        served
            .db
            .call(move |db| db.delete_stage(user_id, negotiation))
            .await?;

        let r = Reassignment {
            deal_id: served.deal_id,
            stage_id: negotiation,
        };
        match commit_move(&mut board, &store, r).await? {
            MoveOutcome::RolledBack {
                deal_id,
                restored_stage_id,
                error,
            } => {
                assert_eq!(deal_id, served.deal_id);
                assert_eq!(restored_stage_id, lead);
                let message = error.to_string();
                assert!(message.contains("404"), "got: {message}");
                assert!(message.contains("not found"), "got: {message}");
            }
            other => panic!("Expected RolledBack, got {other:?}"),
        }
        assert_eq!(board.stage_of(served.deal_id), Some(lead));

        let deal_id = served.deal_id;
        let stored = served.db.call(move |db| db.get_deal(user_id, deal_id)).await?;
        assert_eq!(stored.stage_id, lead);
        Ok(())
    }

    #[tokio::test]
    async fn remote_store_gives_up_on_a_silent_server() -> Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        // Accept connections and never answer.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let store = RemoteStore::with_timeout(
            &format!("http://{addr}"),
            "tok",
            Duration::from_millis(200),
        )?;
        let started = std::time::Instant::now();
        let err = store.fetch_board().await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(format!("{err:#}").contains("Failed to reach dealdesk server"));
        Ok(())
    }
}
