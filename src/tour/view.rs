//! Rendering of tour steps into platform-neutral messages.
//!
//! The platform adapters turn a `StepMessage` into whatever the chat
//! service wants (embeds, buttons); this module only decides what the
//! message says and which controls are live.

use crate::store::model::{Step, TourId};

/// A rendered tour step ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMessage {
    pub tour_id: TourId,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub channel_to_showcase: Option<String>,
    /// "Step X of N" line shown under the content.
    pub footer: String,
    /// Back is disabled on the first step.
    pub back_enabled: bool,
    /// "Next" mid-tour, "Finish" on the last step.
    pub next_label: &'static str,
}

/// A plain notice with no navigation controls (completion, exit,
/// welcome-channel announcements).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
}

/// Render the step at `index` out of `total` for delivery to `user_id`.
///
/// Callers have already substituted channel placeholders in the
/// description; this function is purely presentational.
pub fn render_step(step: &Step, index: usize, total: usize, user_id: &str) -> StepMessage {
    let title = step
        .title
        .clone()
        .or_else(|| step.content.title.clone())
        .unwrap_or_else(|| format!("Step {}", index + 1));

    StepMessage {
        tour_id: step.tour_id,
        user_id: user_id.to_string(),
        title,
        description: step.content.description.clone(),
        image_url: step.image_url.clone(),
        video_url: step.video_url.clone(),
        channel_to_showcase: step.channel_to_showcase.clone(),
        footer: format!("Step {} of {}", index + 1, total),
        back_enabled: index > 0,
        next_label: if index + 1 == total { "Finish" } else { "Next" },
    }
}

/// Completion notice sent after the final step.
pub fn completion_notice(tour_name: &str, guild_name: &str) -> Notice {
    Notice {
        title: "Tour complete! 🎉".to_string(),
        body: format!(
            "You've finished the **{tour_name}** tour of {guild_name}. \
             Enjoy the server!"
        ),
    }
}

/// Notice sent when the user ends the tour early.
pub fn exit_notice(guild_name: &str) -> Notice {
    Notice {
        title: "Tour ended".to_string(),
        body: format!(
            "No problem! You can explore {guild_name} at your own pace. \
             Ask a moderator if you'd like to restart the tour later."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::StepContent;

    fn step(number: i64, title: Option<&str>) -> Step {
        Step {
            step_id: number + 100,
            tour_id: 1,
            step_number: number,
            title: title.map(str::to_string),
            content: StepContent {
                title: None,
                description: format!("Body {number}"),
            },
            image_url: None,
            video_url: None,
            channel_to_showcase: None,
            required_role_id: None,
        }
    }

    #[test]
    fn first_step_disables_back() {
        let msg = render_step(&step(0, Some("Welcome")), 0, 3, "u1");
        assert!(!msg.back_enabled);
        assert_eq!(msg.next_label, "Next");
        assert_eq!(msg.footer, "Step 1 of 3");
    }

    #[test]
    fn middle_step_enables_both() {
        let msg = render_step(&step(1, Some("Rules")), 1, 3, "u1");
        assert!(msg.back_enabled);
        assert_eq!(msg.next_label, "Next");
        assert_eq!(msg.footer, "Step 2 of 3");
    }

    #[test]
    fn last_step_shows_finish() {
        let msg = render_step(&step(2, Some("Done")), 2, 3, "u1");
        assert!(msg.back_enabled);
        assert_eq!(msg.next_label, "Finish");
        assert_eq!(msg.footer, "Step 3 of 3");
    }

    #[test]
    fn single_step_tour_is_first_and_last() {
        let msg = render_step(&step(0, None), 0, 1, "u1");
        assert!(!msg.back_enabled);
        assert_eq!(msg.next_label, "Finish");
    }

    #[test]
    fn title_falls_back_to_content_then_position() {
        let mut s = step(0, None);
        s.content.title = Some("From Content".into());
        assert_eq!(render_step(&s, 0, 2, "u1").title, "From Content");

        s.content.title = None;
        assert_eq!(render_step(&s, 0, 2, "u1").title, "Step 1");
    }
}
