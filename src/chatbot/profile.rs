//! Personal-mode profiles and per-user model resolution.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::Deserialize;

use crate::chatbot::prompt::{personal_system_prompt, STANDARD_SYSTEM_PROMPT};

/// Static per-user configuration. A user with a profile is in personal mode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModeProfile {
    /// Display name for greetings and log lines.
    #[serde(default)]
    pub name: Option<String>,
    /// Persona block interpolated into the personal prompt.
    #[serde(default)]
    pub context: String,
    /// Model pinned for this user; wins over any `/model` selection.
    #[serde(default)]
    pub model: Option<String>,
}

/// Resolves mode, model and system prompt for a user.
pub struct ModeSelector {
    profiles: HashMap<i64, ModeProfile>,
    default_model: String,
    /// Ad-hoc selections made with `/model`.
    selections: Mutex<HashMap<i64, String>>,
}

impl ModeSelector {
    pub fn new(profiles: HashMap<i64, ModeProfile>, default_model: impl Into<String>) -> Self {
        Self {
            profiles,
            default_model: default_model.into(),
            selections: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_personal_mode(&self, user_id: i64) -> bool {
        self.profiles.contains_key(&user_id)
    }

    pub fn display_name(&self, user_id: i64) -> Option<&str> {
        self.profiles.get(&user_id).and_then(|p| p.name.as_deref())
    }

    /// Persona block for personal-mode users, empty otherwise.
    pub fn get_user_context(&self, user_id: i64) -> String {
        self.profiles
            .get(&user_id)
            .map(|p| p.context.clone())
            .unwrap_or_default()
    }

    pub fn pinned_model(&self, user_id: i64) -> Option<&str> {
        self.profiles.get(&user_id).and_then(|p| p.model.as_deref())
    }

    pub fn selected_model(&self, user_id: i64) -> Option<String> {
        let selections = self.selections.lock().unwrap_or_else(PoisonError::into_inner);
        selections.get(&user_id).cloned()
    }

    /// Pinned model, then `/model` selection, then the global default.
    pub fn resolve_model(&self, user_id: i64) -> String {
        if let Some(pinned) = self.pinned_model(user_id) {
            return pinned.to_string();
        }
        self.selected_model(user_id)
            .unwrap_or_else(|| self.default_model.clone())
    }

    pub fn resolve_system_prompt(&self, user_id: i64) -> String {
        if self.is_personal_mode(user_id) {
            personal_system_prompt(&self.get_user_context(user_id))
        } else {
            STANDARD_SYSTEM_PROMPT.to_string()
        }
    }

    /// Record a `/model` selection. Callers are responsible for clearing the
    /// user's history and test session alongside.
    pub fn select_model(&self, user_id: i64, model: impl Into<String>) {
        let mut selections = self.selections.lock().unwrap_or_else(PoisonError::into_inner);
        selections.insert(user_id, model.into());
    }
}
