//! Chat games served through the queue processor.
//!
//! Each game implements [`Game`]; [`GameExecutor`] wraps it with the commands
//! every bot shares (`/help`, `/queue`, `/reset`, `/start`, `/giveup`) and
//! persists the game state between turns.

pub mod deduce;
pub mod guess;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use turnstile_core::{config::Locale, PendingMessage, SessionId};
use turnstile_dispatch::{CommandExecutor, DomainError, ExecError};
use turnstile_store::PendingQueueStore;
use uuid::Uuid;

use self::store::GameStore;

/// A chat command, parsed from message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Help,
    Queue,
    Reset,
    Start,
    GiveUp,
    /// Anything else is a move in the running game.
    Play(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(content: &'a str) -> Self {
        let trimmed = content.trim();
        // `/start@SomeBot` is how group chats address a specific bot.
        let word = trimmed.split_whitespace().next().unwrap_or_default();
        let word = word.split('@').next().unwrap_or_default();
        match word.to_ascii_lowercase().as_str() {
            "/help" => Command::Help,
            "/queue" => Command::Queue,
            "/reset" => Command::Reset,
            "/start" => Command::Start,
            "/giveup" => Command::GiveUp,
            _ => Command::Play(trimmed),
        }
    }

    /// Read-only commands answer immediately, even while a turn runs.
    pub fn requires_serialization(&self) -> bool {
        !matches!(self, Command::Help | Command::Queue)
    }
}

/// Result of one move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    Continue(String),
    /// The game is over; its state is removed.
    Won(String),
}

pub trait Game: Send + Sync + 'static {
    /// Key under which this game's state is stored.
    const NAME: &'static str;

    type State: Serialize + DeserializeOwned + Send;

    /// A fresh game. `seed` is uniformly random.
    fn new_state(seed: u128) -> Self::State;

    fn intro(locale: Locale) -> String;

    fn rules(locale: Locale) -> String;

    /// Apply `input` by `player`. Invalid input is an expected domain error
    /// and leaves the state untouched.
    fn play(
        state: &mut Self::State,
        player: &str,
        input: &str,
        locale: Locale,
    ) -> Result<Turn, DomainError>;

    /// Text revealing the answer when the players give up.
    fn reveal(state: &Self::State, locale: Locale) -> String;
}

/// Fresh randomness for a new game.
pub fn random_seed() -> u128 {
    Uuid::new_v4().as_u128()
}

pub struct GameExecutor<G: Game> {
    games: GameStore,
    queue: Arc<dyn PendingQueueStore>,
    locale: Locale,
    _game: std::marker::PhantomData<fn() -> G>,
}

impl<G: Game> GameExecutor<G> {
    pub fn new(games: GameStore, queue: Arc<dyn PendingQueueStore>, locale: Locale) -> Self {
        Self {
            games,
            queue,
            locale,
            _game: std::marker::PhantomData,
        }
    }

    async fn queue_listing(&self, session: &SessionId) -> Result<String, ExecError> {
        let details = self.queue.queue_details(session).await?;
        Ok(match (self.locale, details.is_empty()) {
            (Locale::En, true) => "Nobody is waiting.".to_string(),
            (Locale::En, false) => format!("Waiting ({}):\n{details}", details.len()),
            (Locale::Ko, true) => "대기 중인 사람이 없습니다.".to_string(),
            (Locale::Ko, false) => format!("대기 중 ({}명):\n{details}", details.len()),
        })
    }

    fn no_game(&self) -> DomainError {
        let message = match self.locale {
            Locale::En => "No game is running. Send /start to begin.",
            Locale::Ko => "진행 중인 게임이 없습니다. /start 로 시작하세요.",
        };
        DomainError::expected("no_game", message)
    }
}

#[async_trait]
impl<G: Game> CommandExecutor for GameExecutor<G> {
    fn requires_serialization(&self, content: &str) -> bool {
        Command::parse(content).requires_serialization()
    }

    async fn execute(
        &self,
        session: &SessionId,
        msg: &PendingMessage,
    ) -> Result<Option<String>, ExecError> {
        let reply = match Command::parse(&msg.content) {
            Command::Help => G::rules(self.locale),
            Command::Queue => self.queue_listing(session).await?,
            Command::Reset => {
                let dropped = self.queue.clear(session).await?;
                self.games.delete(session)?;
                match self.locale {
                    Locale::En => format!("Game reset. {dropped} waiting message(s) dropped."),
                    Locale::Ko => format!("게임을 초기화했습니다. 대기 메시지 {dropped}개를 삭제했습니다."),
                }
            }
            Command::Start => {
                self.games.save(session, &G::new_state(random_seed()))?;
                G::intro(self.locale)
            }
            Command::GiveUp => {
                let state: G::State = self.games.load(session)?.ok_or_else(|| self.no_game())?;
                self.games.delete(session)?;
                G::reveal(&state, self.locale)
            }
            Command::Play(input) => {
                let mut state: G::State =
                    self.games.load(session)?.ok_or_else(|| self.no_game())?;
                match G::play(&mut state, msg.display_name(), input, self.locale)? {
                    Turn::Continue(text) => {
                        self.games.save(session, &state)?;
                        text
                    }
                    Turn::Won(text) => {
                        self.games.delete(session)?;
                        text
                    }
                }
            }
        };
        Ok(Some(reply))
    }
}
