//! Turn ownership under the different handicap regimes.
//!
//! The server numbers moves from 1 in `move` events (the number equals
//! the length of the move list once the move is appended). Whether a
//! given move number belongs to the opponent depends on who placed the
//! handicap stones, which is folded into a single parity bit computed
//! from each full snapshot:
//!
//! - free placement, handicap > 1: black places every handicap stone
//!   in a row before alternation starts, so parity shifts by
//!   `handicap - 1`;
//! - fixed placement, handicap > 1: the stones are set up by
//!   convention and white makes the first recorded move;
//! - otherwise (no handicap, or a forked game with reversed order):
//!   derive parity from who the clock says is to move right now.

use crate::color::Color;
use crate::error::CoreError;
use crate::moves::Move;
use crate::snapshot::{MatchSnapshot, Phase, PlayerId};

/// Compute the opponent-parity bit for a fresh snapshot.
///
/// A move event with `move_number % 2 == parity` was played by the
/// opponent.
pub fn opponent_parity(snapshot: &MatchSnapshot, our_color: Color, bot_id: PlayerId) -> u8 {
    let handicap = snapshot.handicap;

    if snapshot.free_handicap_placement && handicap > 1 {
        ((u32::from(our_color.bit()) + handicap - 1) % 2) as u8
    } else if handicap > 1 {
        1 - our_color.bit()
    } else {
        let played = snapshot.move_count();
        if snapshot.clock.current_player == Some(bot_id) {
            (played % 2) as u8
        } else {
            ((played + 1) % 2) as u8
        }
    }
}

/// Classify a move event.
///
/// While white waits for free handicap stones every incoming move is
/// the opponent's regardless of parity. `moves_played` is the length of
/// the move list after the event was appended.
pub fn is_opponent_move(
    our_color: Color,
    handicap: u32,
    moves_played: usize,
    move_number: u64,
    parity: u8,
) -> bool {
    (our_color == Color::White && handicap as usize >= moves_played)
        || move_number % 2 == u64::from(parity)
}

/// True while the server still expects free handicap stones, as seen
/// from a move event.
pub fn owes_free_handicap(snapshot: &MatchSnapshot) -> bool {
    snapshot.free_handicap_placement && snapshot.handicap as usize > snapshot.move_count()
}

/// True while the bot, as black, still has to produce handicap stones
/// instead of a regular move.
pub fn is_placing_free_handicap(snapshot: &MatchSnapshot) -> bool {
    snapshot.free_handicap_placement
        && snapshot.handicap > 1
        && snapshot.move_count() < snapshot.handicap as usize
}

/// True if the server says the bot is to move in an active game.
pub fn is_bot_to_move(snapshot: &MatchSnapshot, bot_id: PlayerId) -> bool {
    snapshot.phase == Phase::Play && snapshot.clock.current_player == Some(bot_id)
}

/// Color that played the move at 0-based `index` of the move list.
///
/// Used to replay the recorded moves into a freshly started engine.
pub fn mover_color(snapshot: &MatchSnapshot, index: usize) -> Color {
    let handicap = snapshot.handicap as usize;

    if snapshot.free_handicap_placement && handicap > 1 {
        if index < handicap {
            Color::Black
        } else if (index - handicap) % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    } else {
        let first = if handicap > 1 {
            Color::White
        } else {
            snapshot.initial_player.unwrap_or(Color::Black)
        };
        if index % 2 == 0 {
            first
        } else {
            first.opponent()
        }
    }
}

/// Sanity-check an engine's `place_free_handicap` answer.
///
/// The engine must return exactly `handicap` stones, all of them on the
/// board; a pass or resign anywhere in the batch is rejected.
pub fn validate_handicap_stones(
    stones: &[Move],
    handicap: u32,
    width: u32,
    height: u32,
) -> Result<(), CoreError> {
    if stones.len() != handicap as usize {
        return Err(CoreError::WrongStoneCount {
            expected: handicap as usize,
            got: stones.len(),
        });
    }

    for stone in stones {
        match stone {
            Move::Stone(p) if p.is_on_board(width, height) => {}
            Move::Stone(p) => return Err(CoreError::OffBoard(*p)),
            other => return Err(CoreError::NotAStone(*other)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::Point;
    use crate::snapshot::{Clock, Player, Players, TimeControl, WireMove};

    const BOT: PlayerId = 100;
    const HUMAN: PlayerId = 200;

    fn snapshot(bot_color: Color, handicap: u32, free: bool, moves: usize) -> MatchSnapshot {
        let (black, white) = match bot_color {
            Color::Black => (BOT, HUMAN),
            Color::White => (HUMAN, BOT),
        };
        MatchSnapshot {
            game_id: 1,
            phase: Phase::Play,
            players: Players {
                black: Player { id: black, username: "b".into() },
                white: Player { id: white, username: "w".into() },
            },
            moves: vec![WireMove::Encoded("aa".into()); moves],
            width: 19,
            height: None,
            handicap,
            free_handicap_placement: free,
            ranked: false,
            komi: None,
            initial_player: None,
            clock: Clock::default(),
            time_control: TimeControl::default(),
            outcome: None,
            winner: None,
        }
    }

    #[test]
    fn free_placement_parity_shifts_by_handicap() {
        for handicap in 2..=9u32 {
            for color in [Color::Black, Color::White] {
                let s = snapshot(color, handicap, true, 0);
                let expected = ((u32::from(color.bit()) + handicap - 1) % 2) as u8;
                assert_eq!(opponent_parity(&s, color, BOT), expected);
            }
        }
    }

    #[test]
    fn fixed_handicap_parity_is_inverse_color_bit() {
        for color in [Color::Black, Color::White] {
            let s = snapshot(color, 4, false, 0);
            assert_eq!(opponent_parity(&s, color, BOT), 1 - color.bit());
        }
    }

    #[test]
    fn even_game_parity_follows_current_mover() {
        let mut s = snapshot(Color::White, 0, false, 3);

        s.clock.current_player = Some(BOT);
        assert_eq!(opponent_parity(&s, Color::White, BOT), 1);

        s.clock.current_player = Some(HUMAN);
        assert_eq!(opponent_parity(&s, Color::White, BOT), 0);
    }

    #[test]
    fn single_handicap_stone_is_an_even_game() {
        let mut s = snapshot(Color::Black, 1, true, 0);
        s.clock.current_player = Some(BOT);
        assert_eq!(opponent_parity(&s, Color::Black, BOT), 0);
    }

    #[test]
    fn black_with_three_free_stones_has_parity_zero() {
        let s = snapshot(Color::Black, 3, true, 0);
        assert_eq!(opponent_parity(&s, Color::Black, BOT), 0);
        assert!(is_placing_free_handicap(&s));
    }

    #[test]
    fn white_to_move_first_has_parity_zero() {
        let mut s = snapshot(Color::White, 0, false, 0);
        s.clock.current_player = Some(BOT);
        assert_eq!(opponent_parity(&s, Color::White, BOT), 0);
        assert!(is_bot_to_move(&s, BOT));
    }

    #[test]
    fn white_treats_handicap_stones_as_opponent_moves() {
        // Parity would call move 1 ours; the handicap range overrides it.
        assert!(is_opponent_move(Color::White, 3, 1, 1, 0));
        assert!(!is_opponent_move(Color::Black, 3, 1, 1, 0));
        assert!(is_opponent_move(Color::Black, 0, 4, 4, 0));
    }

    #[test]
    fn mover_colors_for_each_regime() {
        let free = snapshot(Color::Black, 3, true, 0);
        let seq: Vec<Color> = (0..5).map(|i| mover_color(&free, i)).collect();
        assert_eq!(
            seq,
            vec![Color::Black, Color::Black, Color::Black, Color::White, Color::Black]
        );

        let fixed = snapshot(Color::Black, 3, false, 0);
        assert_eq!(mover_color(&fixed, 0), Color::White);

        let mut fork = snapshot(Color::Black, 0, false, 0);
        fork.initial_player = Some(Color::White);
        assert_eq!(mover_color(&fork, 0), Color::White);
        assert_eq!(mover_color(&fork, 1), Color::Black);
    }

    #[test]
    fn handicap_validation() {
        let stones = [Move::stone(3, 3), Move::stone(15, 15)];
        assert!(validate_handicap_stones(&stones, 2, 19, 19).is_ok());

        assert!(matches!(
            validate_handicap_stones(&stones, 3, 19, 19),
            Err(CoreError::WrongStoneCount { expected: 3, got: 2 })
        ));

        let with_pass = [Move::stone(3, 3), Move::Pass];
        assert!(matches!(
            validate_handicap_stones(&with_pass, 2, 19, 19),
            Err(CoreError::NotAStone(Move::Pass))
        ));

        let off_board = [Move::stone(3, 3), Move::stone(9, 2)];
        assert!(matches!(
            validate_handicap_stones(&off_board, 2, 9, 9),
            Err(CoreError::OffBoard(Point { x: 9, y: 2 }))
        ));
    }
}
