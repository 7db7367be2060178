//! Pipeline board: grouped view, drag tracking and optimistic stage moves.
//!
//! A move is applied to the local board before it is persisted. Each deal
//! carries its own [`MoveState`]; a failed persist restores the deal's
//! previous stage and touches nothing else.
//!
//! ```text
//! Idle ──pick_up──▶ Dragging ──hover──▶ Hovering ──drop──▶ Reassignment
//!   ▲                  │                   │
//!   └──────cancel──────┴───────cancel──────┘
//! ```

use std::collections::HashMap;

use tracing::{debug, warn};

use super::models::{BoardView, DealStage, DealWithRelations};
use super::store::StageStore;
use crate::errors::{CrmError, Entity};

/// What the pointer is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Stage(i64),
    /// Another card; resolves to that card's stage.
    Deal(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        deal_id: i64,
    },
    Hovering {
        deal_id: i64,
        over: DropTarget,
        stage_id: i64,
    },
}

/// A proposed stage change produced by a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassignment {
    pub deal_id: i64,
    pub stage_id: i64,
}

/// Tracks the card being dragged and the stage it would land in.
#[derive(Debug, Default)]
pub struct DragCoordinator {
    state: DragState,
}

impl DragCoordinator {
    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != DragState::Idle
    }

    pub fn active_deal(&self) -> Option<i64> {
        match self.state {
            DragState::Idle => None,
            DragState::Dragging { deal_id } | DragState::Hovering { deal_id, .. } => Some(deal_id),
        }
    }

    pub fn pick_up(&mut self, deal_id: i64) {
        self.state = DragState::Dragging { deal_id };
    }

    /// `stage_id` is the stage `over` resolves to, or `None` when it is not
    /// a valid target.
    pub fn hover(&mut self, over: DropTarget, stage_id: Option<i64>) {
        let Some(deal_id) = self.active_deal() else {
            return;
        };
        self.state = match stage_id {
            Some(stage_id) => DragState::Hovering {
                deal_id,
                over,
                stage_id,
            },
            None => DragState::Dragging { deal_id },
        };
    }

    /// End the drag. Only a drop while hovering a target proposes a move.
    pub fn drop(&mut self) -> Option<Reassignment> {
        match std::mem::take(&mut self.state) {
            DragState::Hovering {
                deal_id, stage_id, ..
            } => Some(Reassignment { deal_id, stage_id }),
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.state = DragState::Idle;
    }
}

/// Lifecycle of the most recent move of one deal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MoveState {
    #[default]
    Idle,
    /// Applied locally, awaiting persistence. Holds the stage to restore.
    Pending(i64),
    Committed,
    RolledBack,
}

/// A move applied locally and not yet settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMove {
    pub deal_id: i64,
    pub from: i64,
    pub to: i64,
}

#[derive(Debug)]
pub enum MoveOutcome {
    /// Dropped onto the stage the deal is already in.
    Unchanged,
    Committed {
        deal_id: i64,
        stage_id: i64,
    },
    RolledBack {
        deal_id: i64,
        restored_stage_id: i64,
        error: anyhow::Error,
    },
}

/// One board column.
#[derive(Debug)]
pub struct Column<'a> {
    pub stage: &'a DealStage,
    pub deals: Vec<&'a DealWithRelations>,
    pub total_value: f64,
}

/// Local copy of the board, authoritative while moves are in flight.
#[derive(Debug, Default)]
pub struct BoardState {
    stages: Vec<DealStage>,
    deals: Vec<DealWithRelations>,
    moves: HashMap<i64, MoveState>,
    drag: DragCoordinator,
    deferred: Option<BoardView>,
}

impl BoardState {
    pub fn new(view: BoardView) -> Self {
        let mut board = Self::default();
        board.replace(view);
        board
    }

    fn replace(&mut self, view: BoardView) {
        let mut stages = Vec::with_capacity(view.columns.len());
        let mut deals = Vec::new();
        for column in view.columns {
            stages.push(column.stage);
            deals.extend(column.deals);
        }
        stages.sort_by_key(|s| (s.position, s.id));
        self.stages = stages;
        self.deals = deals;
    }

    pub fn stages(&self) -> &[DealStage] {
        &self.stages
    }

    pub fn deals(&self) -> &[DealWithRelations] {
        &self.deals
    }

    pub fn stage(&self, id: i64) -> Option<&DealStage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn deal(&self, id: i64) -> Option<&DealWithRelations> {
        self.deals.iter().find(|d| d.deal.id == id)
    }

    pub fn stage_of(&self, deal_id: i64) -> Option<i64> {
        self.deal(deal_id).map(|d| d.deal.stage_id)
    }

    /// Deals grouped by stage, columns in position order.
    pub fn columns(&self) -> Vec<Column<'_>> {
        self.stages
            .iter()
            .map(|stage| {
                let deals: Vec<&DealWithRelations> = self
                    .deals
                    .iter()
                    .filter(|d| d.deal.stage_id == stage.id)
                    .collect();
                let total_value = deals.iter().filter_map(|d| d.deal.value).sum();
                Column {
                    stage,
                    deals,
                    total_value,
                }
            })
            .collect()
    }

    pub fn move_state(&self, deal_id: i64) -> MoveState {
        self.moves.get(&deal_id).copied().unwrap_or_default()
    }

    pub fn pending_moves(&self) -> usize {
        self.moves
            .values()
            .filter(|m| matches!(m, MoveState::Pending(_)))
            .count()
    }

    pub fn drag_state(&self) -> DragState {
        self.drag.state()
    }

    // ── Drag ──────────────────────────────────────────────────────────

    pub fn pick_up(&mut self, deal_id: i64) -> Result<(), CrmError> {
        if self.deal(deal_id).is_none() {
            return Err(CrmError::not_found(Entity::Deal, deal_id));
        }
        self.drag.pick_up(deal_id);
        Ok(())
    }

    pub fn hover(&mut self, over: DropTarget) {
        let stage_id = match over {
            DropTarget::Stage(id) => self.stage(id).map(|s| s.id),
            DropTarget::Deal(id) => self.stage_of(id),
        };
        self.drag.hover(over, stage_id);
    }

    /// Finish the drag and apply any refresh that arrived during it.
    pub fn drop(&mut self) -> Option<Reassignment> {
        let reassignment = self.drag.drop();
        self.apply_deferred();
        reassignment
    }

    pub fn cancel_drag(&mut self) {
        self.drag.cancel();
        self.apply_deferred();
    }

    // ── Refresh ───────────────────────────────────────────────────────

    /// Replace the board with a fresh snapshot. Held back while a drag is
    /// in progress; deals with a pending move keep their local stage.
    /// Returns whether the snapshot was applied now.
    pub fn refresh(&mut self, view: BoardView) -> bool {
        if self.drag.is_active() {
            debug!("board refresh deferred until drag ends");
            self.deferred = Some(view);
            return false;
        }

        let optimistic: HashMap<i64, i64> = self
            .moves
            .iter()
            .filter(|(_, m)| matches!(m, MoveState::Pending(_)))
            .filter_map(|(id, _)| self.stage_of(*id).map(|stage| (*id, stage)))
            .collect();

        self.replace(view);
        for (deal_id, stage_id) in optimistic {
            self.set_stage(deal_id, stage_id);
        }
        true
    }

    fn apply_deferred(&mut self) {
        if let Some(view) = self.deferred.take() {
            self.refresh(view);
        }
    }

    fn set_stage(&mut self, deal_id: i64, stage_id: i64) {
        let stage = self.stage(stage_id).cloned();
        if let Some(card) = self.deals.iter_mut().find(|d| d.deal.id == deal_id) {
            card.deal.stage_id = stage_id;
            if let Some(stage) = stage {
                card.stage = stage;
            }
        }
    }

    // ── Moves ─────────────────────────────────────────────────────────

    /// Apply a reassignment locally. `Ok(None)` when the deal is already in
    /// the target stage.
    pub fn begin_move(&mut self, r: Reassignment) -> Result<Option<PendingMove>, CrmError> {
        let from = self
            .stage_of(r.deal_id)
            .ok_or(CrmError::not_found(Entity::Deal, r.deal_id))?;
        if self.stage(r.stage_id).is_none() {
            return Err(CrmError::not_found(Entity::Stage, r.stage_id));
        }
        if from == r.stage_id {
            return Ok(None);
        }
        if let MoveState::Pending(_) = self.move_state(r.deal_id) {
            return Err(CrmError::MoveInFlight { deal_id: r.deal_id });
        }

        self.moves.insert(r.deal_id, MoveState::Pending(from));
        self.set_stage(r.deal_id, r.stage_id);
        Ok(Some(PendingMove {
            deal_id: r.deal_id,
            from,
            to: r.stage_id,
        }))
    }

    /// Keep or revert a pending move once its persistence result is known.
    pub fn settle(&mut self, pending: PendingMove, persisted: bool) -> MoveState {
        let state = if persisted {
            MoveState::Committed
        } else {
            self.set_stage(pending.deal_id, pending.from);
            MoveState::RolledBack
        };
        self.moves.insert(pending.deal_id, state);
        state
    }
}

/// Apply `r` optimistically, persist it once, then keep it or roll it back.
/// A successful move is followed by a refetch of the board.
pub async fn commit_move<S>(
    board: &mut BoardState,
    store: &S,
    r: Reassignment,
) -> Result<MoveOutcome, CrmError>
where
    S: StageStore + ?Sized,
{
    let Some(pending) = board.begin_move(r)? else {
        debug!(deal_id = r.deal_id, "drop onto current stage, nothing to do");
        return Ok(MoveOutcome::Unchanged);
    };

    match store.persist_stage(pending.deal_id, pending.to).await {
        Ok(_) => {
            board.settle(pending, true);
            debug!(
                deal_id = pending.deal_id,
                from = pending.from,
                to = pending.to,
                "stage move committed"
            );
            revalidate(board, store).await;
            Ok(MoveOutcome::Committed {
                deal_id: pending.deal_id,
                stage_id: pending.to,
            })
        }
        Err(error) => {
            board.settle(pending, false);
            warn!(
                deal_id = pending.deal_id,
                restored_stage_id = pending.from,
                error = %error,
                "stage move failed, rolled back"
            );
            Ok(MoveOutcome::RolledBack {
                deal_id: pending.deal_id,
                restored_stage_id: pending.from,
                error,
            })
        }
    }
}

/// Refetch the board. A failed refetch leaves the local copy as it is.
pub async fn revalidate<S>(board: &mut BoardState, store: &S)
where
    S: StageStore + ?Sized,
{
    match store.fetch_board().await {
        Ok(view) => {
            board.refresh(view);
        }
        Err(e) => warn!(error = %e, "board refetch failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::models::{Deal, StageColumnView, StageRole};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const LEAD: i64 = 10;
    const PROPOSAL: i64 = 20;
    const WON: i64 = 30;

    fn stage(id: i64, name: &str, position: i32, role: StageRole) -> DealStage {
        DealStage {
            id,
            user_id: 1,
            name: name.into(),
            color: role.accent().into(),
            position,
            role,
            is_won: role == StageRole::Won,
            is_lost: role == StageRole::Lost,
            created_at: "2025-01-01 00:00:00".into(),
        }
    }

    fn stages() -> Vec<DealStage> {
        vec![
            stage(LEAD, "Lead", 0, StageRole::Lead),
            stage(PROPOSAL, "Proposal", 1, StageRole::Proposal),
            stage(WON, "Won", 2, StageRole::Won),
        ]
    }

    fn card(id: i64, stage_id: i64, value: f64) -> DealWithRelations {
        let stage = stages()
            .into_iter()
            .find(|s| s.id == stage_id)
            .expect("known stage");
        DealWithRelations {
            deal: Deal {
                id,
                user_id: 1,
                title: format!("Deal {id}"),
                value: Some(value),
                stage_id,
                contact_id: None,
                company_id: None,
                probability: None,
                expected_close_date: None,
                closed_at: None,
                close_reason: None,
                description: None,
                created_at: "2025-01-01 00:00:00".into(),
                updated_at: "2025-01-01 00:00:00".into(),
            },
            stage,
            contact: None,
            company: None,
        }
    }

    fn view(deals: &[DealWithRelations]) -> BoardView {
        BoardView {
            columns: stages()
                .into_iter()
                .map(|s| {
                    let in_stage: Vec<DealWithRelations> = deals
                        .iter()
                        .filter(|d| d.deal.stage_id == s.id)
                        .cloned()
                        .collect();
                    StageColumnView {
                        accent: s.role.accent().into(),
                        total_value: in_stage.iter().filter_map(|d| d.deal.value).sum(),
                        stage: s,
                        deals: in_stage,
                    }
                })
                .collect(),
        }
    }

    /// In-memory store that can be told to fail persistence.
    struct FakeStore {
        deals: Mutex<Vec<DealWithRelations>>,
        fail: AtomicBool,
        persist_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl FakeStore {
        fn new(deals: Vec<DealWithRelations>) -> Self {
            Self {
                deals: Mutex::new(deals),
                fail: AtomicBool::new(false),
                persist_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
            }
        }

        fn failing(deals: Vec<DealWithRelations>) -> Self {
            let store = Self::new(deals);
            store.fail.store(true, Ordering::SeqCst);
            store
        }

        fn persists(&self) -> usize {
            self.persist_calls.load(Ordering::SeqCst)
        }

        fn fetches(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StageStore for FakeStore {
        async fn fetch_board(&self) -> Result<BoardView> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(view(&self.deals.lock().unwrap()))
        }

        async fn persist_stage(&self, deal_id: i64, stage_id: i64) -> Result<Deal> {
            self.persist_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("network unreachable");
            }
            let mut deals = self.deals.lock().unwrap();
            let card = deals
                .iter_mut()
                .find(|d| d.deal.id == deal_id)
                .ok_or_else(|| anyhow::anyhow!("no deal {deal_id}"))?;
            card.deal.stage_id = stage_id;
            Ok(card.deal.clone())
        }
    }

    fn ids_in(board: &BoardState, stage_id: i64) -> Vec<i64> {
        board
            .columns()
            .into_iter()
            .find(|c| c.stage.id == stage_id)
            .map(|c| c.deals.iter().map(|d| d.deal.id).collect())
            .unwrap_or_default()
    }

    fn drag_to(board: &mut BoardState, deal_id: i64, over: DropTarget) -> Option<Reassignment> {
        board.pick_up(deal_id).unwrap();
        board.hover(over);
        board.drop()
    }

    #[test]
    fn columns_follow_stage_position() {
        let mut shuffled = view(&[card(1, LEAD, 100.0), card(2, PROPOSAL, 250.0)]);
        shuffled.columns.reverse();
        let board = BoardState::new(shuffled);
        let names: Vec<&str> = board.columns().iter().map(|c| c.stage.name.as_str()).collect();
        assert_eq!(names, vec!["Lead", "Proposal", "Won"]);
        assert_eq!(board.columns()[1].total_value, 250.0);
    }

    #[tokio::test]
    async fn drop_on_column_moves_deal() {
        let deals = vec![card(1, LEAD, 500.0)];
        let store = FakeStore::new(deals.clone());
        let mut board = BoardState::new(view(&deals));

        let r = drag_to(&mut board, 1, DropTarget::Stage(PROPOSAL)).unwrap();
        assert_eq!(
            r,
            Reassignment {
                deal_id: 1,
                stage_id: PROPOSAL
            }
        );
        let outcome = commit_move(&mut board, &store, r).await.unwrap();

        assert!(matches!(
            outcome,
            MoveOutcome::Committed {
                deal_id: 1,
                stage_id: PROPOSAL
            }
        ));
        assert_eq!(board.stage_of(1), Some(PROPOSAL));
        assert!(!ids_in(&board, LEAD).contains(&1));
        assert_eq!(ids_in(&board, PROPOSAL), vec![1]);
        assert_eq!(board.deal(1).unwrap().stage.name, "Proposal");
        assert_eq!(board.move_state(1), MoveState::Committed);
        assert_eq!(store.persists(), 1);
        assert_eq!(store.fetches(), 1, "success revalidates");
    }

    #[tokio::test]
    async fn drop_on_current_stage_is_a_no_op() {
        let deals = vec![card(1, LEAD, 500.0)];
        let store = FakeStore::new(deals.clone());
        let mut board = BoardState::new(view(&deals));

        let r = drag_to(&mut board, 1, DropTarget::Stage(LEAD)).unwrap();
        let outcome = commit_move(&mut board, &store, r).await.unwrap();

        assert!(matches!(outcome, MoveOutcome::Unchanged));
        assert_eq!(board.stage_of(1), Some(LEAD));
        assert_eq!(board.move_state(1), MoveState::Idle);
        assert_eq!(store.persists(), 0);
        assert_eq!(store.fetches(), 0);
    }

    #[tokio::test]
    async fn failed_persist_restores_only_the_moved_deal() {
        let deals = vec![card(1, PROPOSAL, 500.0), card(2, LEAD, 80.0)];
        let store = FakeStore::failing(deals.clone());
        let mut board = BoardState::new(view(&deals));

        let r = drag_to(&mut board, 1, DropTarget::Stage(WON)).unwrap();
        let outcome = commit_move(&mut board, &store, r).await.unwrap();

        match outcome {
            MoveOutcome::RolledBack {
                deal_id,
                restored_stage_id,
                error,
            } => {
                assert_eq!(deal_id, 1);
                assert_eq!(restored_stage_id, PROPOSAL);
                assert!(error.to_string().contains("network"));
            }
            other => panic!("Expected RolledBack, got {other:?}"),
        }
        assert_eq!(board.stage_of(1), Some(PROPOSAL));
        assert_eq!(board.deal(1).unwrap().stage.id, PROPOSAL);
        assert_eq!(board.stage_of(2), Some(LEAD));
        assert_eq!(ids_in(&board, WON), Vec::<i64>::new());
        assert_eq!(board.move_state(1), MoveState::RolledBack);
        assert_eq!(store.persists(), 1, "exactly one attempt, no retry");
        assert_eq!(store.fetches(), 0);
    }

    #[test]
    fn optimistic_move_is_visible_before_settling() {
        let deals = vec![card(1, LEAD, 500.0)];
        let mut board = BoardState::new(view(&deals));

        let pending = board
            .begin_move(Reassignment {
                deal_id: 1,
                stage_id: PROPOSAL,
            })
            .unwrap()
            .unwrap();
        assert_eq!(board.move_state(1), MoveState::Pending(LEAD));
        assert_eq!(board.stage_of(1), Some(PROPOSAL));
        assert_eq!(board.pending_moves(), 1);

        assert_eq!(board.settle(pending, true), MoveState::Committed);
        assert_eq!(board.pending_moves(), 0);
        assert_eq!(board.stage_of(1), Some(PROPOSAL));
    }

    #[test]
    fn hovering_a_card_targets_its_stage() {
        let deals = vec![card(1, LEAD, 1.0), card(2, PROPOSAL, 1.0)];
        let mut board = BoardState::new(view(&deals));

        board.pick_up(1).unwrap();
        assert_eq!(board.drag_state(), DragState::Dragging { deal_id: 1 });
        board.hover(DropTarget::Deal(2));
        assert_eq!(
            board.drag_state(),
            DragState::Hovering {
                deal_id: 1,
                over: DropTarget::Deal(2),
                stage_id: PROPOSAL
            }
        );
        assert_eq!(
            board.drop(),
            Some(Reassignment {
                deal_id: 1,
                stage_id: PROPOSAL
            })
        );
        assert_eq!(board.drag_state(), DragState::Idle);
    }

    #[test]
    fn hovering_nothing_valid_drops_nowhere() {
        let deals = vec![card(1, LEAD, 1.0)];
        let mut board = BoardState::new(view(&deals));

        board.pick_up(1).unwrap();
        board.hover(DropTarget::Stage(PROPOSAL));
        board.hover(DropTarget::Stage(999));
        assert_eq!(board.drag_state(), DragState::Dragging { deal_id: 1 });
        assert_eq!(board.drop(), None);
        assert_eq!(board.stage_of(1), Some(LEAD));
    }

    #[test]
    fn cancel_leaves_board_untouched() {
        let deals = vec![card(1, LEAD, 1.0)];
        let mut board = BoardState::new(view(&deals));

        board.pick_up(1).unwrap();
        board.hover(DropTarget::Stage(WON));
        board.cancel_drag();
        assert_eq!(board.drag_state(), DragState::Idle);
        assert_eq!(board.stage_of(1), Some(LEAD));
        assert_eq!(board.move_state(1), MoveState::Idle);
    }

    #[test]
    fn hover_without_pick_up_is_ignored() {
        let mut board = BoardState::new(view(&[card(1, LEAD, 1.0)]));
        board.hover(DropTarget::Stage(PROPOSAL));
        assert_eq!(board.drag_state(), DragState::Idle);
        assert_eq!(board.drop(), None);
    }

    #[test]
    fn pick_up_unknown_deal_fails() {
        let mut board = BoardState::new(view(&[]));
        assert!(matches!(
            board.pick_up(7),
            Err(CrmError::NotFound {
                entity: Entity::Deal,
                id: 7
            })
        ));
    }

    #[test]
    fn refresh_is_held_back_during_drag() {
        let deals = vec![card(1, LEAD, 1.0)];
        let mut board = BoardState::new(view(&deals));

        board.pick_up(1).unwrap();
        let elsewhere = view(&[card(1, WON, 1.0), card(2, LEAD, 1.0)]);
        assert!(!board.refresh(elsewhere));
        assert_eq!(board.stage_of(1), Some(LEAD));
        assert!(board.deal(2).is_none());

        board.cancel_drag();
        assert_eq!(board.stage_of(1), Some(WON));
        assert!(board.deal(2).is_some());
    }

    #[test]
    fn refresh_keeps_pending_stage() {
        let deals = vec![card(1, LEAD, 1.0), card(2, LEAD, 1.0)];
        let mut board = BoardState::new(view(&deals));

        board
            .begin_move(Reassignment {
                deal_id: 1,
                stage_id: PROPOSAL,
            })
            .unwrap();
        // The server has not seen the move yet.
        let stale = view(&[card(1, LEAD, 1.0), card(2, WON, 1.0)]);
        assert!(board.refresh(stale));

        assert_eq!(board.stage_of(1), Some(PROPOSAL));
        assert_eq!(board.stage_of(2), Some(WON));
    }

    #[test]
    fn overlapping_moves_of_different_deals_settle_independently() {
        let deals = vec![card(1, LEAD, 1.0), card(2, LEAD, 1.0)];
        let mut board = BoardState::new(view(&deals));

        let first = board
            .begin_move(Reassignment {
                deal_id: 1,
                stage_id: PROPOSAL,
            })
            .unwrap()
            .unwrap();
        let second = board
            .begin_move(Reassignment {
                deal_id: 2,
                stage_id: WON,
            })
            .unwrap()
            .unwrap();
        assert_eq!(board.pending_moves(), 2);

        // Settle out of order: the second succeeds, the first fails.
        board.settle(second, true);
        board.settle(first, false);

        assert_eq!(board.stage_of(1), Some(LEAD));
        assert_eq!(board.stage_of(2), Some(WON));
        assert_eq!(board.move_state(1), MoveState::RolledBack);
        assert_eq!(board.move_state(2), MoveState::Committed);
    }

    #[test]
    fn second_move_of_pending_deal_is_rejected() {
        let deals = vec![card(1, LEAD, 1.0)];
        let mut board = BoardState::new(view(&deals));

        board
            .begin_move(Reassignment {
                deal_id: 1,
                stage_id: PROPOSAL,
            })
            .unwrap();
        let err = board
            .begin_move(Reassignment {
                deal_id: 1,
                stage_id: WON,
            })
            .unwrap_err();
        assert!(matches!(err, CrmError::MoveInFlight { deal_id: 1 }));
        assert_eq!(board.stage_of(1), Some(PROPOSAL));
    }

    #[test]
    fn move_to_unknown_stage_fails_without_mutation() {
        let deals = vec![card(1, LEAD, 1.0)];
        let mut board = BoardState::new(view(&deals));

        let err = board
            .begin_move(Reassignment {
                deal_id: 1,
                stage_id: 404,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CrmError::NotFound {
                entity: Entity::Stage,
                ..
            }
        ));
        assert_eq!(board.stage_of(1), Some(LEAD));
        assert_eq!(board.move_state(1), MoveState::Idle);
    }

    #[tokio::test]
    async fn deal_can_move_again_after_settling() {
        let deals = vec![card(1, LEAD, 1.0)];
        let store = FakeStore::new(deals.clone());
        let mut board = BoardState::new(view(&deals));

        for target in [PROPOSAL, WON] {
            let r = Reassignment {
                deal_id: 1,
                stage_id: target,
            };
            let outcome = commit_move(&mut board, &store, r).await.unwrap();
            assert!(matches!(outcome, MoveOutcome::Committed { .. }));
        }
        assert_eq!(board.stage_of(1), Some(WON));
        assert_eq!(store.persists(), 2);
    }
}
