// crates/bridge-core/tests/parity_scenarios.rs
use bridge_core::turn::{
    is_bot_to_move, is_opponent_move, is_placing_free_handicap, opponent_parity, owes_free_handicap,
};
use bridge_core::{Color, MatchSnapshot, WireMove};
use bridge_protocol::{decode_inbound_line, GameEvent, InboundEvent};

const BOT: u64 = 100;

fn gamedata(line: &str) -> MatchSnapshot {
    match decode_inbound_line(line).expect("valid frame") {
        InboundEvent::Game { event: GameEvent::Gamedata(snapshot), .. } => *snapshot,
        other => panic!("expected gamedata, got {:?}", other),
    }
}

#[test]
fn black_free_handicap_three_stones() {
    let mut s = gamedata(
        r#"{"event":"game/1/gamedata","data":{
            "game_id":1,"phase":"play",
            "players":{"black":{"id":100,"username":"bot"},"white":{"id":200,"username":"human"}},
            "moves":[],"width":19,"handicap":3,"free_handicap_placement":true,
            "clock":{"current_player":100}}}"#,
    );

    let color = s.color_of(BOT).expect("bot is seated");
    assert_eq!(color, Color::Black);
    let parity = opponent_parity(&s, color, BOT);
    assert_eq!(parity, 0);
    assert!(is_bot_to_move(&s, BOT));

    // Our three stones echo back as moves 1..=3; none is the opponent's.
    for number in 1..=3u64 {
        s.moves.push(WireMove::Encoded("dd".to_string()));
        let opponent = is_opponent_move(color, s.handicap, s.move_count(), number, parity);
        if number < 3 {
            assert!(owes_free_handicap(&s));
            assert!(is_placing_free_handicap(&s));
        } else {
            assert!(!owes_free_handicap(&s));
            assert!(!opponent, "last handicap stone is our echo");
        }
    }

    // White's first reply is move 4.
    s.moves.push(WireMove::Encoded("pp".to_string()));
    assert!(is_opponent_move(color, s.handicap, s.move_count(), 4, parity));
}

#[test]
fn white_waits_for_free_handicap_then_replies() {
    let mut s = gamedata(
        r#"{"event":"game/2/gamedata","data":{
            "game_id":2,"phase":"play",
            "players":{"black":{"id":200,"username":"human"},"white":{"id":100,"username":"bot"}},
            "moves":[],"width":19,"handicap":2,"free_handicap_placement":true,
            "clock":{"current_player":200}}}"#,
    );

    let color = s.color_of(BOT).expect("bot is seated");
    let parity = opponent_parity(&s, color, BOT);
    assert_eq!(parity, 0);

    s.moves.push(WireMove::Encoded("dd".to_string()));
    assert!(owes_free_handicap(&s));
    assert!(is_opponent_move(color, s.handicap, 1, 1, parity));

    s.moves.push(WireMove::Encoded("pp".to_string()));
    assert!(!owes_free_handicap(&s));
    assert!(is_opponent_move(color, s.handicap, 2, 2, parity));

    // Our own reply, move 3, is an echo.
    s.moves.push(WireMove::Encoded("dp".to_string()));
    assert!(!is_opponent_move(color, s.handicap, 3, 3, parity));
}

#[test]
fn white_even_game_bot_to_move_first() {
    let s = gamedata(
        r#"{"event":"game/3/gamedata","data":{
            "game_id":3,"phase":"play",
            "players":{"black":{"id":200,"username":"human"},"white":{"id":100,"username":"bot"}},
            "moves":[],"width":9,"handicap":0,
            "clock":{"current_player":100}}}"#,
    );

    let color = s.color_of(BOT).expect("bot is seated");
    assert_eq!(color, Color::White);
    assert_eq!(opponent_parity(&s, color, BOT), 0);
    assert!(is_bot_to_move(&s, BOT));
}

#[test]
fn finished_game_is_never_bot_to_move() {
    let s = gamedata(
        r#"{"event":"game/4/gamedata","data":{
            "game_id":4,"phase":"finished",
            "players":{"black":{"id":100},"white":{"id":200}},
            "width":19,"clock":{"current_player":100},
            "outcome":"resignation","winner":200}}"#,
    );

    assert!(s.is_finished());
    assert!(!is_bot_to_move(&s, BOT));
}
