use chess::{Board, ChessMove, Color, MoveGen, Piece};
use std::str::FromStr;
use thiserror::Error as ThisError;

use crate::models::{PendingVote, Side};

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum IllegalMove {
    #[error("Invalid position: {0}")]
    InvalidPosition(String),
    #[error("Invalid move token: {0}")]
    InvalidToken(String),
    #[error("Move {token} is not legal in {position}")]
    NotLegal { position: String, token: String },
}

/// The chess rules capability the client sequences moves with.
///
/// Positions are full FEN strings, move tokens are `<from><to>[promotion]`.
pub trait RulesEngine {
    fn initial_position(&self) -> String;

    /// Play `token` on `position` and return the resulting position
    fn apply(&self, position: &str, token: &str) -> Result<String, IllegalMove>;

    fn side_to_move(&self, position: &str) -> Result<Side, IllegalMove>;
}

/// Rules engine backed by the `chess` crate.
///
/// The crate has no notion of move counters, so they are carried through the FEN by hand,
/// and the en-passant field is only written when the capture is really available. This is
/// how the backend renders its positions, and tallies are looked up by exact FEN.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChessRules;

struct ParsedPosition {
    board: Board,
    halfmove_clock: u32,
    fullmove_number: u32,
}

fn parse_position(position: &str) -> Result<ParsedPosition, IllegalMove> {
    let fields: Vec<&str> = position.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(IllegalMove::InvalidPosition(position.to_string()));
    }

    let board = Board::from_str(&format!("{} {} {} {} 0 1", fields[0], fields[1], fields[2], fields[3]))
        .map_err(|_| IllegalMove::InvalidPosition(position.to_string()))?;
    let halfmove_clock = fields.get(4).and_then(|f| f.parse().ok()).unwrap_or(0);
    let fullmove_number = fields.get(5).and_then(|f| f.parse().ok()).unwrap_or(1);

    Ok(ParsedPosition {
        board,
        halfmove_clock,
        fullmove_number,
    })
}

fn parse_token(token: &str) -> Result<ChessMove, IllegalMove> {
    let vote = PendingVote::from_str(token).map_err(|_| IllegalMove::InvalidToken(token.to_string()))?;
    Ok(ChessMove::new(vote.from, vote.to, vote.promotion))
}

fn castling_field(board: &Board) -> String {
    let white = board.castle_rights(Color::White);
    let black = board.castle_rights(Color::Black);

    let mut field = String::new();
    if white.has_kingside() {
        field.push('K');
    }
    if white.has_queenside() {
        field.push('Q');
    }
    if black.has_kingside() {
        field.push('k');
    }
    if black.has_queenside() {
        field.push('q');
    }
    if field.is_empty() {
        field.push('-');
    }
    field
}

fn en_passant_field(board: &Board) -> String {
    MoveGen::new_legal(board)
        .find(|m| {
            board.piece_on(m.get_source()) == Some(Piece::Pawn)
                && m.get_source().get_file() != m.get_dest().get_file()
                && board.piece_on(m.get_dest()).is_none()
        })
        .map(|m| m.get_dest().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_position(board: &Board, halfmove_clock: u32, fullmove_number: u32) -> String {
    let rendered = board.to_string();
    let placement = rendered.split_whitespace().next().unwrap_or_default();
    let side = match board.side_to_move() {
        Color::White => "w",
        Color::Black => "b",
    };

    format!(
        "{} {} {} {} {} {}",
        placement,
        side,
        castling_field(board),
        en_passant_field(board),
        halfmove_clock,
        fullmove_number
    )
}

impl RulesEngine for ChessRules {
    fn initial_position(&self) -> String {
        format_position(&Board::default(), 0, 1)
    }

    fn apply(&self, position: &str, token: &str) -> Result<String, IllegalMove> {
        let parsed = parse_position(position)?;
        let chess_move = parse_token(token)?;
        let board = parsed.board;

        if !board.legal(chess_move) {
            return Err(IllegalMove::NotLegal {
                position: position.to_string(),
                token: token.to_string(),
            });
        }

        let resets_clock = board.piece_on(chess_move.get_source()) == Some(Piece::Pawn)
            || board.piece_on(chess_move.get_dest()).is_some();
        let halfmove_clock = if resets_clock { 0 } else { parsed.halfmove_clock + 1 };
        let fullmove_number = match board.side_to_move() {
            Color::Black => parsed.fullmove_number + 1,
            Color::White => parsed.fullmove_number,
        };

        let next = board.make_move_new(chess_move);
        Ok(format_position(&next, halfmove_clock, fullmove_number))
    }

    fn side_to_move(&self, position: &str) -> Result<Side, IllegalMove> {
        Ok(parse_position(position)?.board.side_to_move().into())
    }
}
