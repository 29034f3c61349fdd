//! Tutor instructions and practice themes

use std::fmt::Write as _;

use crate::protocol::SEGMENT_DELIMITER;
use crate::{Error, Result};

/// A practice theme and the scenarios it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    /// Name the user picks the theme by
    pub name: &'static str,
    /// Situations the tutor role-plays within the theme
    pub scenarios: &'static [&'static str],
}

/// Themes the tutor offers
pub const THEMES: &[Theme] = &[
    Theme {
        name: "business",
        scenarios: &["job interview", "business meeting", "presentation", "networking"],
    },
    Theme {
        name: "travel",
        scenarios: &["airport", "hotel", "restaurant", "sightseeing"],
    },
    Theme {
        name: "daily life",
        scenarios: &["shopping", "weather", "hobbies", "family"],
    },
    Theme {
        name: "social",
        scenarios: &["meeting friends", "party", "social media", "dating"],
    },
];

/// Look up a theme by name, ignoring case and surrounding whitespace
#[must_use]
pub fn find_theme(name: &str) -> Option<&'static Theme> {
    let name = name.trim();
    THEMES.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

fn theme_names() -> String {
    THEMES.iter().map(|t| t.name).collect::<Vec<_>>().join(", ")
}

/// Build the instructional prompt sent as the first user turn
///
/// With a theme the tutor starts on it straight away; without one it asks
/// the learner to pick.
///
/// # Errors
///
/// Returns [`Error::Config`] if `theme` names no known theme
pub fn tutor_prompt(theme: Option<&str>) -> Result<String> {
    let theme = theme
        .map(|name| {
            find_theme(name).ok_or_else(|| {
                Error::Config(format!(
                    "unknown theme {name:?} (choose from: {})",
                    theme_names()
                ))
            })
        })
        .transpose()?;

    let mut prompt = String::from(
        "You are a professional spoken-English coach for a Chinese-speaking learner.\n\
         Reply in both languages: English first, then a line containing only ",
    );
    let _ = writeln!(prompt, "{SEGMENT_DELIMITER}, then the same content in Chinese.");
    prompt.push_str(
        "\nYour responsibilities:\n\
         1. Correct the learner's grammar and pronunciation\n\
         2. Give a pronunciation score from 0 to 100 with detailed feedback\n\
         3. Follow the learner's control phrases:\n\
         \x20  - \"Can I have a break\" pauses the lesson\n\
         \x20  - \"OK let's continue\" resumes it\n\
         4. Offer practice sentences for the chosen theme and scenario\n\n\
         After each sentence the learner says:\n\
         1. Repeat what you understood them to say\n\
         2. Score the pronunciation\n\
         3. Explain any pronunciation or grammar problems\n\
         4. Suggest how to improve\n\
         5. Give the next practice sentence for a related scenario\n\n",
    );

    match theme {
        Some(theme) => {
            let _ = writeln!(
                prompt,
                "Practice the \"{}\" theme. Scenarios: {}.",
                theme.name,
                theme.scenarios.join(", ")
            );
        }
        None => {
            let _ = writeln!(
                prompt,
                "Start by asking, in English, which theme they want to practice ({}).",
                theme_names()
            );
        }
    }

    let _ = write!(
        prompt,
        "\nAlways use this layout:\n[English]\n{SEGMENT_DELIMITER}\n[Chinese]\n\n\
         If you understand, reply with OK in both languages."
    );
    Ok(prompt)
}
