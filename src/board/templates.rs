//! Built-in retrospective templates seeded into every database.

use super::models::TemplateColumn;

pub struct TemplateSeed {
    pub id: &'static str,
    pub title: &'static str,
    pub description: Option<&'static str>,
    pub cover_url: Option<&'static str>,
    pub background_color: Option<&'static str>,
    pub columns: Vec<TemplateColumn>,
}

fn column(id: &str, name: &str, description: &str) -> TemplateColumn {
    TemplateColumn {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        image_url: format!("/template-columns/{}.png", id),
    }
}

pub fn builtin_templates() -> Vec<TemplateSeed> {
    vec![
        TemplateSeed {
            id: "start-stop-continue",
            title: "Start, Stop, Continue",
            description: Some("Decide what the team should begin, drop, and keep doing."),
            cover_url: Some("/template-covers/start-stop-continue.png"),
            background_color: Some("#eef6ff"),
            columns: vec![
                column("start", "Start", "What should we begin doing?"),
                column("stop", "Stop", "What is holding us back?"),
                column("continue", "Continue", "What is working well?"),
            ],
        },
        TemplateSeed {
            id: "mad-sad-glad",
            title: "Mad, Sad, Glad",
            description: Some("Surface how the sprint felt."),
            cover_url: Some("/template-covers/mad-sad-glad.png"),
            background_color: Some("#fff6e5"),
            columns: vec![
                column("mad", "Mad", "What frustrated you?"),
                column("sad", "Sad", "What disappointed you?"),
                column("glad", "Glad", "What made you happy?"),
            ],
        },
        TemplateSeed {
            id: "went-well-to-improve",
            title: "Went Well, To Improve, Action Items",
            description: Some("The classic three-column retrospective."),
            cover_url: Some("/template-covers/went-well-to-improve.png"),
            background_color: None,
            columns: vec![
                column("went-well", "What went well", "Wins worth repeating"),
                column("to-improve", "What didn't", "Things that slowed us down"),
                column("action-items", "Action items", "Concrete next steps"),
            ],
        },
        TemplateSeed {
            id: "four-ls",
            title: "4Ls",
            description: Some("Liked, Learned, Lacked, Longed for."),
            cover_url: Some("/template-covers/four-ls.png"),
            background_color: Some("#f3f0ff"),
            columns: vec![
                column("liked", "Liked", "What did you enjoy?"),
                column("learned", "Learned", "What did you learn?"),
                column("lacked", "Lacked", "What was missing?"),
                column("longed-for", "Longed for", "What do you wish you had?"),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_template_ids_are_unique() {
        let templates = builtin_templates();
        let ids: HashSet<_> = templates.iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), templates.len());
    }

    #[test]
    fn test_column_ids_unique_within_template() {
        for template in builtin_templates() {
            let ids: HashSet<_> = template.columns.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids.len(), template.columns.len(), "{}", template.id);
        }
    }
}
