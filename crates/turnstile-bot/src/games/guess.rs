//! Number guessing: find a number between 1 and 100.

use serde::{Deserialize, Serialize};
use turnstile_core::config::Locale;
use turnstile_dispatch::DomainError;

use super::{Game, Turn};

pub const MIN: u32 = 1;
pub const MAX: u32 = 100;

pub struct GuessGame;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessState {
    pub secret: u32,
    pub attempts: u32,
}

impl Game for GuessGame {
    const NAME: &'static str = "guess";

    type State = GuessState;

    fn new_state(seed: u128) -> GuessState {
        GuessState {
            secret: MIN + (seed % u128::from(MAX - MIN + 1)) as u32,
            attempts: 0,
        }
    }

    fn intro(locale: Locale) -> String {
        match locale {
            Locale::En => format!("I picked a number between {MIN} and {MAX}. Take a guess!"),
            Locale::Ko => format!("{MIN}부터 {MAX} 사이의 숫자를 골랐습니다. 맞혀 보세요!"),
        }
    }

    fn rules(locale: Locale) -> String {
        match locale {
            Locale::En => format!(
                "Number guessing\n\
                 /start - new game\n\
                 <number> - guess a number from {MIN} to {MAX}\n\
                 /giveup - reveal the answer\n\
                 /queue - who is waiting\n\
                 /reset - clear the game and the queue"
            ),
            Locale::Ko => format!(
                "숫자 맞히기\n\
                 /start - 새 게임\n\
                 <숫자> - {MIN}부터 {MAX} 사이의 숫자 추측\n\
                 /giveup - 정답 공개\n\
                 /queue - 대기 중인 사람\n\
                 /reset - 게임과 대기열 초기화"
            ),
        }
    }

    fn play(
        state: &mut GuessState,
        player: &str,
        input: &str,
        locale: Locale,
    ) -> Result<Turn, DomainError> {
        let guess = parse_guess(input, locale)?;
        state.attempts += 1;

        let turn = match (guess.cmp(&state.secret), locale) {
            (std::cmp::Ordering::Less, Locale::En) => {
                Turn::Continue(format!("{player}: higher than {guess}."))
            }
            (std::cmp::Ordering::Less, Locale::Ko) => {
                Turn::Continue(format!("{player}: {guess}보다 큽니다."))
            }
            (std::cmp::Ordering::Greater, Locale::En) => {
                Turn::Continue(format!("{player}: lower than {guess}."))
            }
            (std::cmp::Ordering::Greater, Locale::Ko) => {
                Turn::Continue(format!("{player}: {guess}보다 작습니다."))
            }
            (std::cmp::Ordering::Equal, Locale::En) => Turn::Won(format!(
                "{player} got it! The number was {guess} ({} guesses).",
                state.attempts
            )),
            (std::cmp::Ordering::Equal, Locale::Ko) => Turn::Won(format!(
                "{player}님 정답! 숫자는 {guess}였습니다 ({}번 만에).",
                state.attempts
            )),
        };
        Ok(turn)
    }

    fn reveal(state: &GuessState, locale: Locale) -> String {
        match locale {
            Locale::En => format!("The number was {}.", state.secret),
            Locale::Ko => format!("정답은 {}였습니다.", state.secret),
        }
    }
}

fn parse_guess(input: &str, locale: Locale) -> Result<u32, DomainError> {
    let Ok(n) = input.trim().parse::<u32>() else {
        let message = match locale {
            Locale::En => "Send a number, or /help for commands.",
            Locale::Ko => "숫자를 보내 주세요. 명령어는 /help 를 참고하세요.",
        };
        return Err(DomainError::expected("not_a_number", message));
    };
    if !(MIN..=MAX).contains(&n) {
        let message = match locale {
            Locale::En => format!("Guess a number from {MIN} to {MAX}."),
            Locale::Ko => format!("{MIN}부터 {MAX} 사이의 숫자를 보내 주세요."),
        };
        return Err(DomainError::expected("out_of_range", message));
    }
    Ok(n)
}
