//! Rich presence payload sent with `SET_ACTIVITY`.

use serde::{Deserialize, Serialize};

use super::game::DetectedGame;

/// Generic "playing" line shown next to the game.
pub const PLAYING_TEXT: &str = "Playing on Steam Deck";
pub const SMALL_IMAGE_URL: &str = "https://steamcdn-a.akamaihd.net/steamcommunity/public/images/avatars/8d/8dd66ce1b9590825cebdce861c372cc3f5187f2e_full.jpg";
pub const SMALL_IMAGE_TEXT: &str = "Steam Deck";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub timestamps: ActivityTimestamps,
    pub assets: ActivityAssets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTimestamps {
    /// Unix seconds
    pub start: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityAssets {
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
    pub small_text: String,
}

impl Activity {
    /// Presence for `game`.
    ///
    /// A registered app id already shows the game name as its title, so the
    /// name only goes into the large image caption. Otherwise the name is the
    /// `details` line and the generic text moves to `state`.
    pub fn for_game(game: &DetectedGame, started_at: i64, registered: bool) -> Self {
        let (details, state) = if registered {
            (PLAYING_TEXT.to_string(), None)
        } else {
            (game.display_name.clone(), Some(PLAYING_TEXT.to_string()))
        };

        Self {
            details,
            state,
            timestamps: ActivityTimestamps { start: started_at },
            assets: ActivityAssets {
                large_image: game.image_url.clone(),
                large_text: game.display_name.clone(),
                small_image: SMALL_IMAGE_URL.to_string(),
                small_text: SMALL_IMAGE_TEXT.to_string(),
            },
        }
    }
}
