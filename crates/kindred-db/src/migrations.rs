use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                      INTEGER PRIMARY KEY,
            name                    TEXT NOT NULL,
            gender                  TEXT,
            media_urls              TEXT NOT NULL DEFAULT '[]',
            audio_prompt_question   TEXT,
            audio_prompt_answer     TEXT,
            is_online               INTEGER NOT NULL DEFAULT 0,
            last_seen               TEXT,
            created_at              TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_prompts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            category    TEXT NOT NULL,
            question    TEXT NOT NULL,
            answer      TEXT NOT NULL,
            UNIQUE(user_id, category, question)
        );

        CREATE TABLE IF NOT EXISTS likes (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            liker_user_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            liked_user_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content_type        TEXT NOT NULL,
            content_identifier  TEXT NOT NULL,
            interaction_type    TEXT NOT NULL DEFAULT 'standard',
            comment             TEXT,
            created_at          TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(liker_user_id, liked_user_id, content_type, content_identifier)
        );

        CREATE INDEX IF NOT EXISTS idx_likes_liked
            ON likes(liked_user_id, liker_user_id);

        CREATE INDEX IF NOT EXISTS idx_likes_window
            ON likes(liker_user_id, interaction_type, created_at);

        CREATE TABLE IF NOT EXISTS dislikes (
            disliker_user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            disliked_user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at          TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (disliker_user_id, disliked_user_id)
        );

        CREATE TABLE IF NOT EXISTS user_consumables (
            user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            consumable_type TEXT NOT NULL,
            quantity        INTEGER NOT NULL DEFAULT 0 CHECK (quantity >= 0),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, consumable_type)
        );

        CREATE TABLE IF NOT EXISTS user_subscriptions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            feature_type    TEXT NOT NULL,
            expires_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_subscriptions_user
            ON user_subscriptions(user_id, feature_type, expires_at);

        CREATE TABLE IF NOT EXISTS chat_messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id           INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            recipient_id        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            message_text        TEXT,
            media_url           TEXT,
            media_type          TEXT,
            reply_to_message_id INTEGER REFERENCES chat_messages(id) ON DELETE SET NULL,
            sent_at             TEXT NOT NULL DEFAULT (datetime('now')),
            is_read             INTEGER NOT NULL DEFAULT 0,
            CHECK ((message_text IS NULL) <> (media_url IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_chat_pair
            ON chat_messages(sender_id, recipient_id, sent_at);

        CREATE TABLE IF NOT EXISTS message_reactions (
            message_id  INTEGER NOT NULL REFERENCES chat_messages(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
