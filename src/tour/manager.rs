//! Tour orchestration — starting tours, navigation, completion, and the
//! admin operations that shape tour content.
//!
//! All chat traffic goes through the `ChatPlatform` trait and all
//! persistence through the `Store` trait, so every flow here is testable
//! against in-memory doubles.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::error::TourError;
use crate::platform::{ChatPlatform, RoleInfo};
use crate::resolver;
use crate::store::Store;
use crate::store::model::{
    ConfigUpdate, EventType, InsertedStep, MoveDirection, NewStep, ServerConfig, Step, StepContent,
    StepId, Tour, TourEvent, TourId, TourRef,
};
use crate::tour::status::{ExitReason, NavAction, TourStatus};
use crate::tour::view::{self, StepMessage};

/// How the first step reached the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    DirectMessage,
    /// DM delivery failed; the step went to this guild channel instead.
    ChannelFallback(String),
}

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { tour_id: TourId, delivery: Delivery },
    /// The user already has an in-progress tour in this guild.
    AlreadyInProgress { tour_name: String },
    /// The selected tour has no steps; nothing was started.
    NoSteps { tour_id: TourId },
    /// Role-targeted start: the user already holds the role.
    AlreadyHasRole,
    /// Role-targeted start: no tour grants the requested role.
    NoTourForRole,
}

/// What happened to the completion role during the completion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOutcome {
    Granted { role_name: String },
    AlreadyHeld { role_name: String },
    NotConfigured,
    RoleMissing,
    MemberUnavailable,
    GrantFailed { reason: String },
}

/// Everything that happened while finishing a tour. Each stage is
/// best-effort and reported rather than aborting the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub tour_id: TourId,
    pub role: RoleOutcome,
    pub announced: bool,
}

/// Result of a navigation action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    /// Moved to another step; the rendered message was delivered.
    Moved { step_index: usize, total: usize },
    /// Back pressed on the first step; nothing changed.
    AtBeginning,
    /// Next pressed on the last step; the tour is complete.
    Completed(CompletionReport),
    /// The completion transition had already happened (double click or
    /// concurrent request). No side effects were repeated.
    AlreadyCompleted,
    /// End pressed; the tour was exited.
    Ended,
    /// No in-progress session matches this tour for the user.
    NotOnTour,
    /// The tour lost all its steps mid-traversal; session terminated.
    EndedNoSteps,
    /// The recorded current step vanished mid-traversal; session terminated.
    EndedStepNotFound,
}

/// Default tour content created for guilds with no tours at all.
/// Placeholders are substituted against the guild config at render time.
fn default_tour_steps() -> Vec<NewStep> {
    let steps = [
        ("Welcome!", "This is the first stop of our basic tour!"),
        (
            "Server Rules",
            "Please review our rules in the <#rules_channel_id> channel. Click the link to go directly!",
        ),
        (
            "Announcements",
            "Stay updated! Visit our announcements in the <#announcements_channel_id> channel. Click the link to view the latest updates.",
        ),
        (
            "Guides",
            "Find helpful guides and resources here: <#guides_channel_id>. Click the link to explore!",
        ),
        ("Tour End", "You've completed the tour!"),
    ];
    steps
        .into_iter()
        .map(|(title, description)| NewStep {
            title: Some(title.to_string()),
            content: StepContent::new(title, description),
        })
        .collect()
}

/// Orchestrates tours for one bot instance across guilds.
pub struct TourManager {
    store: Arc<dyn Store>,
    platform: Arc<dyn ChatPlatform>,
    /// Role granted when a user exits a tour early, if configured.
    exit_role_name: Option<String>,
    default_tour_name: String,
    /// Channel name used for public completion/exit announcements.
    announce_channel_name: String,
}

impl TourManager {
    pub fn new(
        store: Arc<dyn Store>,
        platform: Arc<dyn ChatPlatform>,
        exit_role_name: Option<String>,
        default_tour_name: impl Into<String>,
        announce_channel_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            platform,
            exit_role_name,
            default_tour_name: default_tour_name.into(),
            announce_channel_name: announce_channel_name.into(),
        }
    }

    // ── Starting tours ──────────────────────────────────────────────

    /// Start the guild's default tour for a member, typically on join.
    ///
    /// Picks the configured default tour, else the oldest tour, else
    /// bootstraps a starter tour and marks it as the default.
    pub async fn start_for_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<StartOutcome, TourError> {
        let config = resolver::resolve_config(&self.store, &self.platform, guild_id).await?;

        if let Some(existing) = self.store.get_active_progress(user_id, guild_id).await? {
            let tour_name = match self.store.get_tour(existing.tour_id).await? {
                Some(tour) => tour.name,
                None => "another tour".to_string(),
            };
            return Ok(StartOutcome::AlreadyInProgress { tour_name });
        }

        let tour_id = match config.default_tour_id {
            Some(id) if self.store.get_tour(id).await?.is_some() => id,
            _ => self.pick_or_bootstrap_tour(guild_id).await?,
        };

        self.begin_tour(guild_id, user_id, tour_id, &config).await
    }

    /// Start whichever tour grants the given role (self-service onboarding
    /// toward a role).
    pub async fn start_for_role(
        &self,
        guild_id: &str,
        user_id: &str,
        desired_role_id: &str,
    ) -> Result<StartOutcome, TourError> {
        if let Some(member) = self.platform.fetch_member(guild_id, user_id).await? {
            if member.role_ids.iter().any(|r| r == desired_role_id) {
                return Ok(StartOutcome::AlreadyHasRole);
            }
        }

        let tours = self.store.list_tours(guild_id).await?;
        let Some(target) = tours
            .into_iter()
            .find(|t| t.completion_role_id.as_deref() == Some(desired_role_id))
        else {
            return Ok(StartOutcome::NoTourForRole);
        };

        if let Some(existing) = self.store.get_active_progress(user_id, guild_id).await? {
            let tour_name = match self.store.get_tour(existing.tour_id).await? {
                Some(tour) => tour.name,
                None => "another tour".to_string(),
            };
            return Ok(StartOutcome::AlreadyInProgress { tour_name });
        }

        let config = resolver::resolve_config(&self.store, &self.platform, guild_id).await?;
        self.begin_tour(guild_id, user_id, target.tour_id, &config)
            .await
    }

    async fn pick_or_bootstrap_tour(&self, guild_id: &str) -> Result<TourId, TourError> {
        let tours = self.store.list_tours(guild_id).await?;
        if let Some(first) = tours.first() {
            return Ok(first.tour_id);
        }

        let steps = default_tour_steps();
        let tour_id = self
            .store
            .add_tour_with_steps(guild_id, &self.default_tour_name, &steps, None)
            .await?;
        self.store
            .update_config(guild_id, &[ConfigUpdate::DefaultTour(Some(tour_id))])
            .await?;
        info!(guild_id, tour_id, "Bootstrapped default tour");
        Ok(tour_id)
    }

    async fn begin_tour(
        &self,
        guild_id: &str,
        user_id: &str,
        tour_id: TourId,
        config: &ServerConfig,
    ) -> Result<StartOutcome, TourError> {
        let steps = self.store.list_steps(tour_id).await?;
        let Some(first) = steps.first() else {
            warn!(guild_id, tour_id, "Tour has no steps; not starting");
            return Ok(StartOutcome::NoSteps { tour_id });
        };

        self.store
            .start_or_restart_tour(user_id, guild_id, tour_id, first.step_id)
            .await?;

        let message = self.render(first, 0, steps.len(), user_id, config);
        let delivery = self
            .deliver_step(guild_id, user_id, tour_id, &message, config)
            .await?;

        self.store
            .log_event(
                &TourEvent::new(guild_id, tour_id, EventType::TourStarted)
                    .for_user(user_id)
                    .at_step(first.step_id),
            )
            .await?;

        info!(guild_id, user_id, tour_id, "Tour started");
        Ok(StartOutcome::Started { tour_id, delivery })
    }

    fn render(
        &self,
        step: &Step,
        index: usize,
        total: usize,
        user_id: &str,
        config: &ServerConfig,
    ) -> StepMessage {
        let mut message = view::render_step(step, index, total, user_id);
        message.description = resolver::substitute_placeholders(&message.description, config);
        message
    }

    /// Send a step to the user's DMs, falling back to the guild's welcome
    /// channel when DMs are closed.
    async fn deliver_step(
        &self,
        guild_id: &str,
        user_id: &str,
        tour_id: TourId,
        message: &StepMessage,
        config: &ServerConfig,
    ) -> Result<Delivery, TourError> {
        match self.platform.send_step_dm(user_id, message).await {
            Ok(()) => Ok(Delivery::DirectMessage),
            Err(dm_error) => {
                warn!(guild_id, user_id, %dm_error, "DM delivery failed");
                let Some(channel_id) = config.welcome_channel_id.as_deref() else {
                    return Err(dm_error.into());
                };
                let text = format!(
                    "<@{user_id}> {} — {} ({})",
                    message.title, message.description, message.footer
                );
                self.platform.send_channel_message(channel_id, &text).await?;
                self.store
                    .log_event(
                        &TourEvent::new(guild_id, tour_id, EventType::DeliveryFallback)
                            .for_user(user_id)
                            .with_metadata(json!({ "channel_id": channel_id })),
                    )
                    .await?;
                Ok(Delivery::ChannelFallback(channel_id.to_string()))
            }
        }
    }

    // ── Navigation ──────────────────────────────────────────────────

    /// Handle a navigation control press for a specific tour.
    ///
    /// The guild is derived from the tour itself, so controls keep working
    /// in DMs where no guild context exists.
    pub async fn handle_nav(
        &self,
        user_id: &str,
        tour_id: TourId,
        action: NavAction,
    ) -> Result<NavOutcome, TourError> {
        let tour = self
            .store
            .get_tour(tour_id)
            .await?
            .ok_or(TourError::TourNotFound(format!("tour {tour_id}")))?;
        let guild_id = tour.guild_id.clone();

        let Some(progress) = self
            .store
            .get_progress_for_tour(user_id, &guild_id, tour_id)
            .await?
        else {
            return Ok(NavOutcome::NotOnTour);
        };
        if progress.status != TourStatus::InProgress {
            return Ok(NavOutcome::NotOnTour);
        }

        let config = resolver::resolve_config(&self.store, &self.platform, &guild_id).await?;

        // The step list is recomputed live: admins may have edited the tour
        // since the last message went out.
        let steps = self.store.list_steps(tour_id).await?;
        if steps.is_empty() {
            self.store
                .end_progress(user_id, &guild_id, tour_id, &ExitReason::NoSteps)
                .await?;
            self.store
                .log_event(
                    &TourEvent::new(&guild_id, tour_id, EventType::ErrorNoSteps).for_user(user_id),
                )
                .await?;
            return Ok(NavOutcome::EndedNoSteps);
        }

        let current_index = progress
            .current_step_id
            .and_then(|id| steps.iter().position(|s| s.step_id == id));
        let Some(current_index) = current_index else {
            self.store
                .end_progress(user_id, &guild_id, tour_id, &ExitReason::StepNotFound)
                .await?;
            self.store
                .log_event(
                    &TourEvent::new(&guild_id, tour_id, EventType::ErrorStepNotFound)
                        .for_user(user_id),
                )
                .await?;
            return Ok(NavOutcome::EndedStepNotFound);
        };

        match action {
            NavAction::Next if current_index + 1 < steps.len() => {
                self.move_to(user_id, &guild_id, &tour, &steps, current_index + 1, &config)
                    .await
            }
            NavAction::Next => self.complete(user_id, &tour, &steps, current_index).await,
            NavAction::Back if current_index > 0 => {
                self.move_to(user_id, &guild_id, &tour, &steps, current_index - 1, &config)
                    .await
            }
            NavAction::Back => Ok(NavOutcome::AtBeginning),
            NavAction::End => {
                self.exit(user_id, &guild_id, &tour, progress.current_step_id)
                    .await
            }
        }
    }

    async fn move_to(
        &self,
        user_id: &str,
        guild_id: &str,
        tour: &Tour,
        steps: &[Step],
        index: usize,
        config: &ServerConfig,
    ) -> Result<NavOutcome, TourError> {
        let step = &steps[index];
        self.store
            .advance_progress(user_id, guild_id, tour.tour_id, step.step_id)
            .await?;

        let message = self.render(step, index, steps.len(), user_id, config);
        self.deliver_step(guild_id, user_id, tour.tour_id, &message, config)
            .await?;

        self.store
            .log_event(
                &TourEvent::new(guild_id, tour.tour_id, EventType::StepViewed)
                    .for_user(user_id)
                    .at_step(step.step_id),
            )
            .await?;

        Ok(NavOutcome::Moved {
            step_index: index,
            total: steps.len(),
        })
    }

    // ── Completion ──────────────────────────────────────────────────

    async fn complete(
        &self,
        user_id: &str,
        tour: &Tour,
        steps: &[Step],
        final_index: usize,
    ) -> Result<NavOutcome, TourError> {
        let guild_id = tour.guild_id.as_str();

        // The status transition is the gate: it only fires from
        // in_progress, so role grants and announcements can never run
        // twice for one traversal.
        let transitioned = self
            .store
            .complete_progress(user_id, guild_id, tour.tour_id)
            .await?;
        if transitioned == 0 {
            return Ok(NavOutcome::AlreadyCompleted);
        }

        self.store
            .log_event(
                &TourEvent::new(guild_id, tour.tour_id, EventType::TourCompleted)
                    .for_user(user_id)
                    .at_step(steps[final_index].step_id),
            )
            .await?;

        let role = self.grant_completion_role(user_id, tour).await?;
        let announced = self.announce(guild_id, user_id, "has completed the server tour!").await;

        let guild_name = self
            .platform
            .guild_name(guild_id)
            .await
            .unwrap_or_else(|_| "the server".to_string());
        let notice = view::completion_notice(&tour.name, &guild_name);
        if let Err(e) = self.platform.send_notice_dm(user_id, &notice).await {
            warn!(user_id, %e, "Could not deliver completion notice");
        }

        info!(guild_id, user_id, tour_id = tour.tour_id, "Tour completed");
        Ok(NavOutcome::Completed(CompletionReport {
            tour_id: tour.tour_id,
            role,
            announced,
        }))
    }

    /// Best-effort completion role grant. Every leg of the decision tree
    /// is recorded in analytics; failures never abort completion.
    async fn grant_completion_role(
        &self,
        user_id: &str,
        tour: &Tour,
    ) -> Result<RoleOutcome, TourError> {
        let guild_id = tour.guild_id.as_str();
        let log = |event_type, metadata: Option<serde_json::Value>| {
            let mut event =
                TourEvent::new(guild_id, tour.tour_id, event_type).for_user(user_id);
            if let Some(m) = metadata {
                event = event.with_metadata(m);
            }
            event
        };

        let Some(role_id) = tour.completion_role_id.as_deref() else {
            self.store
                .log_event(&log(EventType::RoleNotConfigured, None))
                .await?;
            return Ok(RoleOutcome::NotConfigured);
        };

        let member = match self.platform.fetch_member(guild_id, user_id).await {
            Ok(Some(member)) => member,
            Ok(None) | Err(_) => {
                self.store
                    .log_event(&log(
                        EventType::MemberUnavailable,
                        Some(json!({ "role_id": role_id })),
                    ))
                    .await?;
                return Ok(RoleOutcome::MemberUnavailable);
            }
        };

        let role = match self.platform.fetch_role(guild_id, role_id).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                warn!(guild_id, role_id, "Configured completion role not found");
                self.store
                    .log_event(&log(
                        EventType::RoleNotFound,
                        Some(json!({ "role_id": role_id })),
                    ))
                    .await?;
                return Ok(RoleOutcome::RoleMissing);
            }
            Err(e) => {
                self.store
                    .log_event(&log(
                        EventType::RoleAssignFailed,
                        Some(json!({ "role_id": role_id, "error": e.to_string() })),
                    ))
                    .await?;
                return Ok(RoleOutcome::GrantFailed {
                    reason: e.to_string(),
                });
            }
        };

        if member.role_ids.iter().any(|r| r == &role.id) {
            self.store
                .log_event(&log(
                    EventType::RoleAlreadyHeld,
                    Some(json!({ "role_id": role.id, "role_name": role.name })),
                ))
                .await?;
            return Ok(RoleOutcome::AlreadyHeld {
                role_name: role.name,
            });
        }

        match self.platform.grant_role(guild_id, user_id, &role.id).await {
            Ok(()) => {
                self.store
                    .log_event(&log(
                        EventType::RoleAssigned,
                        Some(json!({ "role_id": role.id, "role_name": role.name })),
                    ))
                    .await?;
                Ok(RoleOutcome::Granted {
                    role_name: role.name,
                })
            }
            Err(e) => {
                warn!(guild_id, user_id, role_id = %role.id, %e, "Role grant failed");
                self.store
                    .log_event(&log(
                        EventType::RoleAssignFailed,
                        Some(json!({ "role_id": role.id, "error": e.to_string() })),
                    ))
                    .await?;
                Ok(RoleOutcome::GrantFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Post a public announcement to the announce channel, found by name.
    /// Returns whether anything was sent.
    async fn announce(&self, guild_id: &str, user_id: &str, text: &str) -> bool {
        let channels = match self.platform.guild_channels(guild_id).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(guild_id, %e, "Could not list channels for announcement");
                return false;
            }
        };
        let Some(channel) = channels
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&self.announce_channel_name))
        else {
            return false;
        };
        let message = format!("<@{user_id}> {text}");
        match self
            .platform
            .send_channel_message(&channel.id, &message)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(guild_id, channel_id = %channel.id, %e, "Announcement failed");
                false
            }
        }
    }

    // ── Exit ────────────────────────────────────────────────────────

    async fn exit(
        &self,
        user_id: &str,
        guild_id: &str,
        tour: &Tour,
        current_step_id: Option<StepId>,
    ) -> Result<NavOutcome, TourError> {
        let transitioned = self
            .store
            .end_progress(user_id, guild_id, tour.tour_id, &ExitReason::UserExited)
            .await?;
        if transitioned == 0 {
            return Ok(NavOutcome::NotOnTour);
        }

        let mut event =
            TourEvent::new(guild_id, tour.tour_id, EventType::TourExited).for_user(user_id);
        if let Some(step_id) = current_step_id {
            event = event.at_step(step_id);
        }
        self.store.log_event(&event).await?;

        if let Some(role_name) = self.exit_role_name.as_deref() {
            self.grant_exit_role(guild_id, user_id, role_name).await;
        }

        self.announce(guild_id, user_id, "has ended the server tour.").await;

        let guild_name = self
            .platform
            .guild_name(guild_id)
            .await
            .unwrap_or_else(|_| "the server".to_string());
        if let Err(e) = self
            .platform
            .send_notice_dm(user_id, &view::exit_notice(&guild_name))
            .await
        {
            warn!(user_id, %e, "Could not deliver exit notice");
        }

        info!(guild_id, user_id, tour_id = tour.tour_id, "Tour exited");
        Ok(NavOutcome::Ended)
    }

    /// Best-effort grant of the configured exit role, looked up by name.
    async fn grant_exit_role(&self, guild_id: &str, user_id: &str, role_name: &str) {
        let role: Option<RoleInfo> = match self
            .platform
            .find_role_by_name(guild_id, role_name)
            .await
        {
            Ok(role) => role,
            Err(e) => {
                warn!(guild_id, role_name, %e, "Exit role lookup failed");
                return;
            }
        };
        let Some(role) = role else {
            warn!(guild_id, role_name, "Exit role not found in guild");
            return;
        };

        let already_held = match self.platform.fetch_member(guild_id, user_id).await {
            Ok(Some(member)) => member.role_ids.iter().any(|r| r == &role.id),
            _ => false,
        };
        if already_held {
            return;
        }

        if let Err(e) = self.platform.grant_role(guild_id, user_id, &role.id).await {
            warn!(guild_id, user_id, role_id = %role.id, %e, "Exit role grant failed");
        }
    }

    // ── Admin operations ────────────────────────────────────────────

    pub async fn create_tour(
        &self,
        guild_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<TourId, TourError> {
        if name.trim().is_empty() {
            return Err(TourError::InvalidInput("tour name cannot be empty".into()));
        }
        Ok(self
            .store
            .add_tour(guild_id, name.trim(), description, None)
            .await?)
    }

    pub async fn delete_tour(
        &self,
        guild_id: &str,
        tour_ref: &TourRef,
    ) -> Result<Tour, TourError> {
        let tour = self.require_tour(guild_id, tour_ref).await?;
        self.store.delete_tour_cascade(tour.tour_id).await?;

        // A deleted default tour must not linger in the config.
        if let Some(config) = self.store.get_config(guild_id).await? {
            if config.default_tour_id == Some(tour.tour_id) {
                self.store
                    .update_config(guild_id, &[ConfigUpdate::DefaultTour(None)])
                    .await?;
            }
        }
        Ok(tour)
    }

    pub async fn list_tours(&self, guild_id: &str) -> Result<Vec<Tour>, TourError> {
        Ok(self.store.list_tours(guild_id).await?)
    }

    pub async fn set_default_tour(
        &self,
        guild_id: &str,
        tour_ref: &TourRef,
    ) -> Result<Tour, TourError> {
        let tour = self.require_tour(guild_id, tour_ref).await?;
        self.store.ensure_config(guild_id).await?;
        self.store
            .update_config(guild_id, &[ConfigUpdate::DefaultTour(Some(tour.tour_id))])
            .await?;
        Ok(tour)
    }

    pub async fn set_completion_role(
        &self,
        guild_id: &str,
        tour_ref: &TourRef,
        role_id: Option<&str>,
    ) -> Result<Tour, TourError> {
        let tour = self.require_tour(guild_id, tour_ref).await?;
        self.store
            .set_completion_role(tour.tour_id, role_id)
            .await?;
        Ok(tour)
    }

    pub async fn add_step(
        &self,
        guild_id: &str,
        tour_ref: &TourRef,
        position: Option<i64>,
        title: Option<&str>,
        description: &str,
    ) -> Result<InsertedStep, TourError> {
        if description.trim().is_empty() {
            return Err(TourError::InvalidInput(
                "step description cannot be empty".into(),
            ));
        }
        let tour = self.require_tour(guild_id, tour_ref).await?;
        let content = StepContent {
            title: title.map(str::to_string),
            description: description.trim().to_string(),
        };
        Ok(self
            .store
            .insert_step(tour.tour_id, position, title, &content)
            .await?)
    }

    pub async fn edit_step(
        &self,
        step_id: StepId,
        title: Option<&str>,
        description: &str,
    ) -> Result<(), TourError> {
        if description.trim().is_empty() {
            return Err(TourError::InvalidInput(
                "step description cannot be empty".into(),
            ));
        }
        let content = StepContent {
            title: title.map(str::to_string),
            description: description.trim().to_string(),
        };
        let changed = self.store.edit_step(step_id, title, &content).await?;
        if changed == 0 {
            return Err(TourError::StepNotFound(step_id));
        }
        Ok(())
    }

    pub async fn remove_step(&self, step_id: StepId) -> Result<(), TourError> {
        let deleted = self.store.delete_step_and_renumber(step_id).await?;
        if deleted == 0 {
            return Err(TourError::StepNotFound(step_id));
        }
        Ok(())
    }

    /// Move a step one position. Returns false for a boundary no-op.
    pub async fn move_step(
        &self,
        step_id: StepId,
        direction: MoveDirection,
    ) -> Result<bool, TourError> {
        if self.store.get_step(step_id).await?.is_none() {
            return Err(TourError::StepNotFound(step_id));
        }
        let changed = self.store.move_step(step_id, direction).await?;
        Ok(changed > 0)
    }

    pub async fn list_steps(
        &self,
        guild_id: &str,
        tour_ref: &TourRef,
    ) -> Result<Vec<Step>, TourError> {
        let tour = self.require_tour(guild_id, tour_ref).await?;
        Ok(self.store.list_steps(tour.tour_id).await?)
    }

    async fn require_tour(&self, guild_id: &str, tour_ref: &TourRef) -> Result<Tour, TourError> {
        self.store
            .find_tour(guild_id, tour_ref)
            .await?
            .ok_or_else(|| {
                TourError::TourNotFound(match tour_ref {
                    TourRef::ById(id) => format!("tour {id}"),
                    TourRef::ByName(name) => format!("tour \"{name}\""),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::MockPlatform;
    use crate::store::LibSqlStore;

    async fn manager_with(platform: MockPlatform) -> (TourManager, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(LibSqlStore::open_memory().await.unwrap());
        let manager = TourManager::new(
            Arc::clone(&store),
            Arc::new(platform),
            Some("member".to_string()),
            "Default Server Tour",
            "general",
        );
        (manager, store)
    }

    fn platform_for(user: &str) -> MockPlatform {
        MockPlatform::with_channels(&[("1", "general"), ("2", "rules")]).add_member(user, &[])
    }

    #[tokio::test]
    async fn join_bootstraps_default_tour() {
        let (manager, store) = manager_with(platform_for("u1")).await;

        let outcome = manager.start_for_member("g1", "u1").await.unwrap();
        let StartOutcome::Started { tour_id, delivery } = outcome else {
            panic!("expected start, got {outcome:?}");
        };
        assert_eq!(delivery, Delivery::DirectMessage);

        // Bootstrap created a 5-step tour and made it the default
        let steps = store.list_steps(tour_id).await.unwrap();
        assert_eq!(steps.len(), 5);
        let config = store.get_config("g1").await.unwrap().unwrap();
        assert_eq!(config.default_tour_id, Some(tour_id));

        let progress = store
            .get_progress_for_tour("u1", "g1", tour_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.status, TourStatus::InProgress);
        assert_eq!(progress.current_step_id, Some(steps[0].step_id));
    }

    #[tokio::test]
    async fn second_start_while_in_progress_is_rejected() {
        let (manager, _) = manager_with(platform_for("u1")).await;

        manager.start_for_member("g1", "u1").await.unwrap();
        let outcome = manager.start_for_member("g1", "u1").await.unwrap();
        assert!(matches!(outcome, StartOutcome::AlreadyInProgress { .. }));
    }

    #[tokio::test]
    async fn empty_tour_reports_no_steps() {
        let (manager, store) = manager_with(platform_for("u1")).await;

        let tour_id = store.add_tour("g1", "Empty", None, None).await.unwrap();
        store.ensure_config("g1").await.unwrap();
        store
            .update_config("g1", &[ConfigUpdate::DefaultTour(Some(tour_id))])
            .await
            .unwrap();

        let outcome = manager.start_for_member("g1", "u1").await.unwrap();
        assert_eq!(outcome, StartOutcome::NoSteps { tour_id });
        assert!(
            store
                .get_progress_for_tour("u1", "g1", tour_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn dm_failure_falls_back_to_welcome_channel() {
        let platform = platform_for("u1").block_dms("u1");
        let (manager, store) = manager_with(platform).await;

        store.ensure_config("g1").await.unwrap();
        store
            .update_config("g1", &[ConfigUpdate::WelcomeChannel(Some("1".into()))])
            .await
            .unwrap();

        let outcome = manager.start_for_member("g1", "u1").await.unwrap();
        assert!(matches!(
            outcome,
            StartOutcome::Started {
                delivery: Delivery::ChannelFallback(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn dm_failure_without_fallback_channel_is_an_error() {
        let platform = platform_for("u1").block_dms("u1");
        let (manager, _) = manager_with(platform).await;

        let result = manager.start_for_member("g1", "u1").await;
        assert!(matches!(result, Err(TourError::Platform(_))));
    }

    #[tokio::test]
    async fn navigation_walks_forward_and_back() {
        let (manager, store) = manager_with(platform_for("u1")).await;

        let StartOutcome::Started { tour_id, .. } =
            manager.start_for_member("g1", "u1").await.unwrap()
        else {
            panic!("start failed");
        };

        let outcome = manager
            .handle_nav("u1", tour_id, NavAction::Next)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            NavOutcome::Moved {
                step_index: 1,
                total: 5
            }
        );

        let outcome = manager
            .handle_nav("u1", tour_id, NavAction::Back)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            NavOutcome::Moved {
                step_index: 0,
                total: 5
            }
        );

        // Back at the first step is a no-op
        let outcome = manager
            .handle_nav("u1", tour_id, NavAction::Back)
            .await
            .unwrap();
        assert_eq!(outcome, NavOutcome::AtBeginning);

        let steps = store.list_steps(tour_id).await.unwrap();
        let progress = store
            .get_progress_for_tour("u1", "g1", tour_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.current_step_id, Some(steps[0].step_id));
    }

    #[tokio::test]
    async fn next_on_last_step_completes_and_grants_role() {
        let platform = platform_for("u1").add_role("r1", "Tour Graduate");
        let (manager, store) = manager_with(platform).await;

        let steps = vec![
            NewStep {
                title: Some("One".into()),
                content: StepContent::new("One", "first"),
            },
            NewStep {
                title: Some("Two".into()),
                content: StepContent::new("Two", "second"),
            },
        ];
        let tour_id = store
            .add_tour_with_steps("g1", "Short", &steps, Some("r1"))
            .await
            .unwrap();
        store.ensure_config("g1").await.unwrap();
        store
            .update_config("g1", &[ConfigUpdate::DefaultTour(Some(tour_id))])
            .await
            .unwrap();

        manager.start_for_member("g1", "u1").await.unwrap();
        manager
            .handle_nav("u1", tour_id, NavAction::Next)
            .await
            .unwrap();
        let outcome = manager
            .handle_nav("u1", tour_id, NavAction::Next)
            .await
            .unwrap();

        let NavOutcome::Completed(report) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(
            report.role,
            RoleOutcome::Granted {
                role_name: "Tour Graduate".into()
            }
        );
        assert!(report.announced);

        let progress = store
            .get_progress_for_tour("u1", "g1", tour_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.status, TourStatus::Completed);
    }

    #[tokio::test]
    async fn double_completion_has_no_repeat_side_effects() {
        let platform = platform_for("u1").add_role("r1", "Tour Graduate");
        let (manager, store) = manager_with(platform).await;

        let steps = vec![NewStep {
            title: Some("Only".into()),
            content: StepContent::new("Only", "single step"),
        }];
        let tour_id = store
            .add_tour_with_steps("g1", "Tiny", &steps, Some("r1"))
            .await
            .unwrap();
        store.ensure_config("g1").await.unwrap();
        store
            .update_config("g1", &[ConfigUpdate::DefaultTour(Some(tour_id))])
            .await
            .unwrap();

        manager.start_for_member("g1", "u1").await.unwrap();
        let first = manager
            .handle_nav("u1", tour_id, NavAction::Next)
            .await
            .unwrap();
        assert!(matches!(first, NavOutcome::Completed(_)));

        let second = manager
            .handle_nav("u1", tour_id, NavAction::Next)
            .await
            .unwrap();
        assert_eq!(second, NavOutcome::NotOnTour);
    }

    #[tokio::test]
    async fn role_missing_is_reported_not_fatal() {
        // Tour configured with a role id the guild no longer has
        let (manager, store) = manager_with(platform_for("u1")).await;

        let steps = vec![NewStep {
            title: None,
            content: StepContent::new("x", "y"),
        }];
        let tour_id = store
            .add_tour_with_steps("g1", "T", &steps, Some("ghost-role"))
            .await
            .unwrap();
        store.ensure_config("g1").await.unwrap();
        store
            .update_config("g1", &[ConfigUpdate::DefaultTour(Some(tour_id))])
            .await
            .unwrap();

        manager.start_for_member("g1", "u1").await.unwrap();
        let outcome = manager
            .handle_nav("u1", tour_id, NavAction::Next)
            .await
            .unwrap();

        let NavOutcome::Completed(report) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(report.role, RoleOutcome::RoleMissing);
    }

    #[tokio::test]
    async fn end_exits_and_grants_exit_role() {
        let platform = platform_for("u1").add_role("m1", "member");
        let (manager, store) = manager_with(platform).await;

        let StartOutcome::Started { tour_id, .. } =
            manager.start_for_member("g1", "u1").await.unwrap()
        else {
            panic!("start failed");
        };

        let outcome = manager
            .handle_nav("u1", tour_id, NavAction::End)
            .await
            .unwrap();
        assert_eq!(outcome, NavOutcome::Ended);

        let progress = store
            .get_progress_for_tour("u1", "g1", tour_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.status, TourStatus::Exited(ExitReason::UserExited));
    }

    #[tokio::test]
    async fn steps_deleted_mid_tour_terminates_session() {
        let (manager, store) = manager_with(platform_for("u1")).await;

        let StartOutcome::Started { tour_id, .. } =
            manager.start_for_member("g1", "u1").await.unwrap()
        else {
            panic!("start failed");
        };

        for step in store.list_steps(tour_id).await.unwrap() {
            store.delete_step_and_renumber(step.step_id).await.unwrap();
        }

        let outcome = manager
            .handle_nav("u1", tour_id, NavAction::Next)
            .await
            .unwrap();
        assert_eq!(outcome, NavOutcome::EndedNoSteps);

        let progress = store
            .get_progress_for_tour("u1", "g1", tour_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.status, TourStatus::Exited(ExitReason::NoSteps));
    }

    #[tokio::test]
    async fn current_step_deleted_mid_tour_terminates_session() {
        let (manager, store) = manager_with(platform_for("u1")).await;

        let StartOutcome::Started { tour_id, .. } =
            manager.start_for_member("g1", "u1").await.unwrap()
        else {
            panic!("start failed");
        };

        // Delete only the step the user is standing on
        let progress = store
            .get_progress_for_tour("u1", "g1", tour_id)
            .await
            .unwrap()
            .unwrap();
        store
            .delete_step_and_renumber(progress.current_step_id.unwrap())
            .await
            .unwrap();

        let outcome = manager
            .handle_nav("u1", tour_id, NavAction::Next)
            .await
            .unwrap();
        assert_eq!(outcome, NavOutcome::EndedStepNotFound);
    }

    #[tokio::test]
    async fn start_for_role_finds_granting_tour() {
        let platform = platform_for("u1").add_role("vip", "VIP");
        let (manager, store) = manager_with(platform).await;

        let steps = vec![NewStep {
            title: None,
            content: StepContent::new("a", "b"),
        }];
        store
            .add_tour_with_steps("g1", "Other", &steps, None)
            .await
            .unwrap();
        let vip_tour = store
            .add_tour_with_steps("g1", "VIP Track", &steps, Some("vip"))
            .await
            .unwrap();

        let outcome = manager.start_for_role("g1", "u1", "vip").await.unwrap();
        assert!(matches!(
            outcome,
            StartOutcome::Started { tour_id, .. } if tour_id == vip_tour
        ));
    }

    #[tokio::test]
    async fn start_for_role_rejects_holders_and_unknown_roles() {
        let platform = MockPlatform::with_channels(&[("1", "general")])
            .add_member("u1", &["vip"])
            .add_role("vip", "VIP");
        let (manager, _) = manager_with(platform).await;

        let outcome = manager.start_for_role("g1", "u1", "vip").await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyHasRole);

        let outcome = manager
            .start_for_role("g1", "u1", "nonexistent")
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::NoTourForRole);
    }

    #[tokio::test]
    async fn deleting_default_tour_clears_config() {
        let (manager, store) = manager_with(platform_for("u1")).await;

        let tour_id = manager.create_tour("g1", "Main", None).await.unwrap();
        manager
            .set_default_tour("g1", &TourRef::ById(tour_id))
            .await
            .unwrap();

        manager
            .delete_tour("g1", &TourRef::ById(tour_id))
            .await
            .unwrap();
        let config = store.get_config("g1").await.unwrap().unwrap();
        assert_eq!(config.default_tour_id, None);
    }

    #[tokio::test]
    async fn admin_step_operations_surface_not_found() {
        let (manager, _) = manager_with(platform_for("u1")).await;

        assert!(matches!(
            manager.edit_step(404, None, "text").await,
            Err(TourError::StepNotFound(404))
        ));
        assert!(matches!(
            manager.remove_step(404).await,
            Err(TourError::StepNotFound(404))
        ));
        assert!(matches!(
            manager.move_step(404, MoveDirection::Up).await,
            Err(TourError::StepNotFound(404))
        ));
        assert!(matches!(
            manager.delete_tour("g1", &TourRef::ByName("nope".into())).await,
            Err(TourError::TourNotFound(_))
        ));
    }

    #[tokio::test]
    async fn stale_terminal_row_does_not_unblock_second_start() {
        let (manager, store) = manager_with(platform_for("u1")).await;

        let steps = vec![NewStep {
            title: None,
            content: StepContent::new("a", "b"),
        }];
        let walking = store
            .add_tour_with_steps("g1", "Walking Tour", &steps, None)
            .await
            .unwrap();
        let history = store
            .add_tour_with_steps("g1", "History Tour", &steps, None)
            .await
            .unwrap();
        let walk_steps = store.list_steps(walking).await.unwrap();
        let hist_steps = store.list_steps(history).await.unwrap();

        store
            .start_or_restart_tour("u1", "g1", walking, walk_steps[0].step_id)
            .await
            .unwrap();
        store
            .start_or_restart_tour("u1", "g1", history, hist_steps[0].step_id)
            .await
            .unwrap();
        store.complete_progress("u1", "g1", history).await.unwrap();

        // The newest progress row is terminal, but the older walking-tour
        // row is still in progress; a fresh start must be rejected.
        let outcome = manager.start_for_member("g1", "u1").await.unwrap();
        assert_eq!(
            outcome,
            StartOutcome::AlreadyInProgress {
                tour_name: "Walking Tour".into()
            }
        );
    }

    #[tokio::test]
    async fn edit_step_rejects_blank_description() {
        let (manager, store) = manager_with(platform_for("u1")).await;

        let tour_id = store.add_tour("g1", "T", None, None).await.unwrap();
        let inserted = store
            .insert_step(
                tour_id,
                None,
                Some("Keep"),
                &StepContent::new("Keep", "original text"),
            )
            .await
            .unwrap();

        assert!(matches!(
            manager.edit_step(inserted.step_id, None, "   ").await,
            Err(TourError::InvalidInput(_))
        ));

        // Nothing was written
        let step = store.get_step(inserted.step_id).await.unwrap().unwrap();
        assert_eq!(step.content.description, "original text");
    }

    #[tokio::test]
    async fn create_tour_rejects_blank_names() {
        let (manager, _) = manager_with(platform_for("u1")).await;
        assert!(matches!(
            manager.create_tour("g1", "   ", None).await,
            Err(TourError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn placeholders_resolved_in_delivered_steps() {
        let platform = platform_for("u1");
        let (manager, store) = manager_with(platform).await;

        // "rules" channel exists with id 2; resolver should wire it up and
        // the bootstrap tour's rules step should mention it.
        manager.start_for_member("g1", "u1").await.unwrap();
        let config = store.get_config("g1").await.unwrap().unwrap();
        assert_eq!(config.rules_channel_id.as_deref(), Some("2"));
    }
}
