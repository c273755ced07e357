//! Bulls and cows: deduce a four-digit code with distinct digits.
//!
//! A bull is a right digit in the right place; a cow is a right digit in the
//! wrong place.

use serde::{Deserialize, Serialize};
use turnstile_core::config::Locale;
use turnstile_dispatch::DomainError;

use super::{Game, Turn};

pub const CODE_LEN: usize = 4;

pub struct DeduceGame;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduceState {
    pub secret: [u8; CODE_LEN],
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub bulls: usize,
    pub cows: usize,
}

pub fn score(secret: &[u8; CODE_LEN], guess: &[u8; CODE_LEN]) -> Score {
    let bulls = secret.iter().zip(guess).filter(|(s, g)| s == g).count();
    let common = guess.iter().filter(|g| secret.contains(g)).count();
    Score {
        bulls,
        cows: common - bulls,
    }
}

impl Game for DeduceGame {
    const NAME: &'static str = "deduce";

    type State = DeduceState;

    fn new_state(mut seed: u128) -> DeduceState {
        let mut digits: Vec<u8> = (0..=9).collect();
        let mut secret = [0u8; CODE_LEN];
        for slot in secret.iter_mut() {
            let remaining = digits.len() as u128;
            *slot = digits.remove((seed % remaining) as usize);
            seed /= remaining;
        }
        DeduceState {
            secret,
            attempts: 0,
        }
    }

    fn intro(locale: Locale) -> String {
        match locale {
            Locale::En => format!(
                "I picked a {CODE_LEN}-digit code with no repeated digits. Send your guess!"
            ),
            Locale::Ko => format!("서로 다른 숫자 {CODE_LEN}자리 암호를 정했습니다. 추측해 보세요!"),
        }
    }

    fn rules(locale: Locale) -> String {
        match locale {
            Locale::En => format!(
                "Bulls and cows\n\
                 /start - new game\n\
                 <{CODE_LEN} digits> - guess the code (digits must differ)\n\
                 A bull is a right digit in the right place, a cow a right digit elsewhere.\n\
                 /giveup - reveal the code\n\
                 /queue - who is waiting\n\
                 /reset - clear the game and the queue"
            ),
            Locale::Ko => format!(
                "숫자 야구\n\
                 /start - 새 게임\n\
                 <숫자 {CODE_LEN}자리> - 암호 추측 (숫자 중복 불가)\n\
                 자리와 숫자가 모두 맞으면 스트라이크, 숫자만 맞으면 볼입니다.\n\
                 /giveup - 정답 공개\n\
                 /queue - 대기 중인 사람\n\
                 /reset - 게임과 대기열 초기화"
            ),
        }
    }

    fn play(
        state: &mut DeduceState,
        player: &str,
        input: &str,
        locale: Locale,
    ) -> Result<Turn, DomainError> {
        let guess = parse_code(input, locale)?;
        state.attempts += 1;
        let shown = render(&guess);
        let Score { bulls, cows } = score(&state.secret, &guess);

        if bulls == CODE_LEN {
            return Ok(Turn::Won(match locale {
                Locale::En => format!(
                    "{player} cracked it! The code was {shown} ({} guesses).",
                    state.attempts
                ),
                Locale::Ko => format!(
                    "{player}님 정답! 암호는 {shown}였습니다 ({}번 만에).",
                    state.attempts
                ),
            }));
        }

        Ok(Turn::Continue(match locale {
            Locale::En => format!(
                "{player}: {shown} - {bulls} bull{}, {cows} cow{}",
                plural(bulls),
                plural(cows)
            ),
            Locale::Ko => format!("{player}: {shown} - {bulls}스트라이크 {cows}볼"),
        }))
    }

    fn reveal(state: &DeduceState, locale: Locale) -> String {
        let shown = render(&state.secret);
        match locale {
            Locale::En => format!("The code was {shown}."),
            Locale::Ko => format!("암호는 {shown}였습니다."),
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn render(code: &[u8; CODE_LEN]) -> String {
    code.iter().map(|d| char::from(b'0' + d)).collect()
}

fn parse_code(input: &str, locale: Locale) -> Result<[u8; CODE_LEN], DomainError> {
    let invalid = || {
        let message = match locale {
            Locale::En => format!("Send {CODE_LEN} different digits, like 0123."),
            Locale::Ko => format!("서로 다른 숫자 {CODE_LEN}개를 보내 주세요. 예: 0123"),
        };
        DomainError::expected("invalid_code", message)
    };

    let input = input.trim();
    if input.len() != CODE_LEN || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let mut code = [0u8; CODE_LEN];
    for (slot, b) in code.iter_mut().zip(input.bytes()) {
        *slot = b - b'0';
    }
    let distinct = code
        .iter()
        .enumerate()
        .all(|(i, d)| !code[..i].contains(d));
    if !distinct {
        return Err(invalid());
    }
    Ok(code)
}
