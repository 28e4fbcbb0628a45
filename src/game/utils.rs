use chess::{Piece, Square};
use std::str::FromStr;

use crate::models::{Side, Winner};

/// Convert a side to a string
pub fn side_to_string(side: Side) -> String {
    match side {
        Side::White => "white".to_string(),
        Side::Black => "black".to_string(),
    }
}

/// Human readable winner of a finished game
pub fn winner_to_string(winner: Winner) -> String {
    match winner {
        Winner::Humanity => "Humanity".to_string(),
        Winner::Ai => "AI".to_string(),
    }
}

/// Parse a square name such as `e4`, ignoring case
pub fn parse_square(name: &str) -> Option<Square> {
    Square::from_str(&name.trim().to_lowercase()).ok()
}

/// Map a promotion suffix (`q`, `r`, `b`, `n`, or a board-UI piece code such as `wQ`) to a piece
pub fn promotion_from_str(piece: &str) -> Option<Piece> {
    let piece = piece.trim();
    // board widgets report promotions as colour + piece, e.g. "wQ"
    let code = match piece.len() {
        1 => piece.chars().next(),
        2 if piece.starts_with(['w', 'b']) => piece.chars().nth(1),
        _ => None,
    }?;

    match code.to_ascii_lowercase() {
        'q' => Some(Piece::Queen),
        'r' => Some(Piece::Rook),
        'b' => Some(Piece::Bishop),
        'n' => Some(Piece::Knight),
        _ => None,
    }
}

pub fn promotion_to_char(piece: Piece) -> Option<char> {
    match piece {
        Piece::Queen => Some('q'),
        Piece::Rook => Some('r'),
        Piece::Bishop => Some('b'),
        Piece::Knight => Some('n'),
        _ => None,
    }
}

/// Render a duration in milliseconds as `HH:MM:SS`; anything not positive is `00:00:00`
pub fn format_countdown(remaining_ms: i64) -> String {
    let remaining_ms = remaining_ms.max(0);
    let hours = remaining_ms / (60 * 60 * 1000);
    let minutes = (remaining_ms % (60 * 60 * 1000)) / (60 * 1000);
    let seconds = (remaining_ms % (60 * 1000)) / 1000;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// The placement and side-to-move fields of a FEN, which identify a position regardless of
/// how the move counters were kept
pub fn position_core(fen: &str) -> String {
    fen.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}
