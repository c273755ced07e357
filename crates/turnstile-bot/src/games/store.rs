use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;
use turnstile_core::{now_millis, SessionId};
use turnstile_store::StoreError;

/// Create the `games` table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS games (
            chat_id    TEXT    NOT NULL,
            bot        TEXT    NOT NULL,
            state      TEXT    NOT NULL,   -- JSON, shape owned by the bot
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (chat_id, bot)
        ) STRICT;",
    )?;
    Ok(())
}

/// One running game per (chat, bot), persisted as JSON.
///
/// Every call happens under the chat's session lock, so there is no
/// read-modify-write race between consumers.
pub struct GameStore {
    conn: Mutex<Connection>,
    bot: &'static str,
}

impl GameStore {
    pub fn new(conn: Connection, bot: &'static str) -> Result<Self, StoreError> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            bot,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// The running game, if any. An unreadable row is discarded.
    pub fn load<S: DeserializeOwned>(&self, chat: &SessionId) -> Result<Option<S>, StoreError> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT state FROM games WHERE chat_id = ?1 AND bot = ?2",
                params![chat.as_str(), self.bot],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(chat = %chat, bot = self.bot, error = %e, "discarding unreadable game state");
                conn.execute(
                    "DELETE FROM games WHERE chat_id = ?1 AND bot = ?2",
                    params![chat.as_str(), self.bot],
                )?;
                Ok(None)
            }
        }
    }

    pub fn save<S: Serialize>(&self, chat: &SessionId, state: &S) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        self.conn()?.execute(
            "INSERT INTO games (chat_id, bot, state, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (chat_id, bot) DO UPDATE SET state = excluded.state,
                                                      updated_at = excluded.updated_at",
            params![chat.as_str(), self.bot, json, now_millis()],
        )?;
        Ok(())
    }

    /// Returns true if a game was removed.
    pub fn delete(&self, chat: &SessionId) -> Result<bool, StoreError> {
        let n = self.conn()?.execute(
            "DELETE FROM games WHERE chat_id = ?1 AND bot = ?2",
            params![chat.as_str(), self.bot],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    fn store(bot: &'static str) -> GameStore {
        GameStore::new(Connection::open_in_memory().unwrap(), bot).unwrap()
    }

    #[test]
    fn save_load_delete() {
        let games = store("guess");
        let chat = SessionId::from("room");
        assert_eq!(games.load::<Counter>(&chat).unwrap(), None);

        games.save(&chat, &Counter { n: 1 }).unwrap();
        games.save(&chat, &Counter { n: 2 }).unwrap();
        assert_eq!(games.load::<Counter>(&chat).unwrap(), Some(Counter { n: 2 }));

        assert!(games.delete(&chat).unwrap());
        assert!(!games.delete(&chat).unwrap());
    }

    #[test]
    fn unreadable_state_is_dropped() {
        let games = store("guess");
        let chat = SessionId::from("room");
        games.save(&chat, &"not a counter").unwrap();
        assert_eq!(games.load::<Counter>(&chat).unwrap(), None);
        assert!(!games.delete(&chat).unwrap());
    }
}
