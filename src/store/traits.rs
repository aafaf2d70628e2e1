//! Unified `Store` trait — single async interface for all persistence.
//!
//! Every mutating operation is atomic with respect to the dense-ordering
//! and uniqueness invariants: multi-statement mutations either fully commit
//! or fully roll back. Mutations return explicit row counts or generated
//! ids instead of leaving them in an ambient side channel.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::model::{
    ConfigUpdate, InsertedStep, MoveDirection, NewStep, ServerConfig, Step, StepContent, StepId,
    Tour, TourEvent, TourId, TourRef, UserProgress,
};
use crate::tour::status::ExitReason;

/// Backend-agnostic persistence trait covering configs, tours, steps,
/// progress, and analytics.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Server config ───────────────────────────────────────────────

    /// Idempotent create-if-absent. Returns whether a row was newly created.
    async fn ensure_config(&self, guild_id: &str) -> Result<bool, DatabaseError>;

    /// Fetch a guild's config row.
    async fn get_config(&self, guild_id: &str) -> Result<Option<ServerConfig>, DatabaseError>;

    /// Apply a set of typed config updates. An empty set is a no-op
    /// returning 0; returns the number of rows changed otherwise.
    async fn update_config(
        &self,
        guild_id: &str,
        updates: &[ConfigUpdate],
    ) -> Result<u64, DatabaseError>;

    // ── Tours ───────────────────────────────────────────────────────

    /// Create a tour with no steps. Returns the generated id.
    async fn add_tour(
        &self,
        guild_id: &str,
        name: &str,
        description: Option<&str>,
        completion_role_id: Option<&str>,
    ) -> Result<TourId, DatabaseError>;

    /// Create a tour together with its steps in one transaction.
    /// Steps are numbered 0..N−1 in the order given.
    async fn add_tour_with_steps(
        &self,
        guild_id: &str,
        name: &str,
        steps: &[NewStep],
        completion_role_id: Option<&str>,
    ) -> Result<TourId, DatabaseError>;

    /// All tours for a guild, oldest first.
    async fn list_tours(&self, guild_id: &str) -> Result<Vec<Tour>, DatabaseError>;

    /// Fetch a tour by id.
    async fn get_tour(&self, tour_id: TourId) -> Result<Option<Tour>, DatabaseError>;

    /// Resolve a tagged tour reference (by id, or case-insensitive exact
    /// name) within a guild. Returns at most one tour.
    async fn find_tour(
        &self,
        guild_id: &str,
        tour_ref: &TourRef,
    ) -> Result<Option<Tour>, DatabaseError>;

    /// Set or clear the completion role. Returns rows changed.
    async fn set_completion_role(
        &self,
        tour_id: TourId,
        role_id: Option<&str>,
    ) -> Result<u64, DatabaseError>;

    /// Atomically delete a tour with its analytics, progress, and step
    /// rows. Returns the count of tour rows deleted (0 or 1).
    async fn delete_tour_cascade(&self, tour_id: TourId) -> Result<u64, DatabaseError>;

    // ── Steps ───────────────────────────────────────────────────────

    /// All steps of a tour ordered by step_number ascending.
    async fn list_steps(&self, tour_id: TourId) -> Result<Vec<Step>, DatabaseError>;

    /// Fetch a step by id.
    async fn get_step(&self, step_id: StepId) -> Result<Option<Step>, DatabaseError>;

    /// Highest step_number in the tour, or None for an empty tour.
    async fn max_step_number(&self, tour_id: TourId) -> Result<Option<i64>, DatabaseError>;

    /// Insert a step. `position = None` (or past the end) appends;
    /// otherwise inserts at that position, shifting later steps up by one
    /// within the same transaction.
    async fn insert_step(
        &self,
        tour_id: TourId,
        position: Option<i64>,
        title: Option<&str>,
        content: &StepContent,
    ) -> Result<InsertedStep, DatabaseError>;

    /// Update a step's title and content in place. Returns rows changed
    /// (0 signals not-found).
    async fn edit_step(
        &self,
        step_id: StepId,
        title: Option<&str>,
        content: &StepContent,
    ) -> Result<u64, DatabaseError>;

    /// Delete a step and resequence the remaining steps of its tour to
    /// 0..N−1, atomically. Absent ids return 0 with no side effects.
    async fn delete_step_and_renumber(&self, step_id: StepId) -> Result<u64, DatabaseError>;

    /// Swap a step with its adjacent neighbor. Boundary moves (first step
    /// up, last step down) are zero-effect no-ops.
    async fn move_step(
        &self,
        step_id: StepId,
        direction: MoveDirection,
    ) -> Result<u64, DatabaseError>;

    // ── User progress ───────────────────────────────────────────────

    /// Newest `in_progress` row for a user in a guild, across all tours.
    /// Terminal rows never mask an active traversal started earlier.
    async fn get_active_progress(
        &self,
        user_id: &str,
        guild_id: &str,
    ) -> Result<Option<UserProgress>, DatabaseError>;

    /// Progress row for a specific (user, guild, tour) triple.
    async fn get_progress_for_tour(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
    ) -> Result<Option<UserProgress>, DatabaseError>;

    /// Upsert progress to `in_progress` at the given step. Preserves the
    /// original start time across restarts and clears any completion time.
    async fn start_or_restart_tour(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
        step_id: StepId,
    ) -> Result<(), DatabaseError>;

    /// Move the current step pointer; forces status `in_progress`.
    async fn advance_progress(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
        step_id: StepId,
    ) -> Result<u64, DatabaseError>;

    /// Transition `in_progress` → `completed`, stamping the completion
    /// time. A no-op (0 rows) unless currently in progress, which guards
    /// against double-completion side effects.
    async fn complete_progress(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
    ) -> Result<u64, DatabaseError>;

    /// Transition `in_progress` → the given terminal reason status.
    async fn end_progress(
        &self,
        user_id: &str,
        guild_id: &str,
        tour_id: TourId,
        reason: &ExitReason,
    ) -> Result<u64, DatabaseError>;

    // ── Analytics ───────────────────────────────────────────────────

    /// Append an analytics event. Write-only from the core's perspective.
    async fn log_event(&self, event: &TourEvent) -> Result<(), DatabaseError>;
}
