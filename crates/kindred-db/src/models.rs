//! Database row types, one per table this crate reads back.
//! Distinct from kindred-types wire models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub gender: Option<String>,
    pub media_urls: Vec<String>,
    pub audio_prompt_question: Option<String>,
    pub audio_prompt_answer: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<String>,
}

impl UserRow {
    pub fn has_audio_prompt(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.audio_prompt_question) && set(&self.audio_prompt_answer)
    }
}

/// Profile data written by the profile service; used here to seed users.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: i64,
    pub name: String,
    pub gender: Option<String>,
    pub media_urls: Vec<String>,
    pub audio_prompt_question: Option<String>,
    pub audio_prompt_answer: Option<String>,
}
