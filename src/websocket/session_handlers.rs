use actix::prelude::*;
use actix_web_actors::ws;
use log::{info, warn};

use crate::models::{ClientMessage, ServerMessage};
use crate::sync::{ListMatches, ListSessions, LoadSession, ProposeMove, SelectPosition, SendVote, ViewMatch};
use crate::websocket::handler::BridgeSocket;

impl BridgeSocket {
    pub fn handle_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg.message_type.as_str() {
            "list_games" => self.session.do_send(ListSessions),
            "load_game" => self.handle_load_game(msg, ctx),
            "list_matches" => self.session.do_send(ListMatches),
            "view_match" => self.handle_view_match(msg, ctx),
            "select_position" => self.handle_select_position(msg, ctx),
            "propose_move" => self.handle_propose_move(msg, ctx),
            "send_vote" => self.session.do_send(SendVote {
                recaptcha_token: msg.recaptcha_token,
            }),
            _ => {
                warn!("Unknown message type: {}", msg.message_type);
                self.reply(&ServerMessage::error("Unknown message type"), ctx);
            }
        }
    }

    pub fn handle_load_game(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(name) = msg.game.filter(|name| !name.is_empty()) else {
            self.reply(&ServerMessage::error("Game name is required"), ctx);
            return;
        };
        info!("Connection {} opens game {}", self.id, name);
        self.session.do_send(LoadSession { name });
    }

    pub fn handle_view_match(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(index) = msg.index else {
            self.reply(&ServerMessage::error("Match index is required"), ctx);
            return;
        };
        self.session.do_send(ViewMatch { index });
    }

    pub fn handle_select_position(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(position) = msg.position else {
            self.reply(&ServerMessage::error("Position is required"), ctx);
            return;
        };

        let request = SelectPosition {
            move_token: msg.move_token.unwrap_or_default(),
            position,
        };
        self.session
            .send(request)
            .into_actor(self)
            .map(|result, act, ctx| match result {
                Ok(true) => {}
                Ok(false) => act.reply(&ServerMessage::error("Position is not part of this game"), ctx),
                Err(e) => warn!("Session actor unavailable: {}", e),
            })
            .spawn(ctx);
    }

    pub fn handle_propose_move(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let (Some(from), Some(to)) = (msg.move_from, msg.move_to) else {
            self.reply(&ServerMessage::error("Both move_from and move_to are required"), ctx);
            return;
        };

        let request = ProposeMove {
            from,
            to,
            promotion: msg.promote_to,
        };
        self.session
            .send(request)
            .into_actor(self)
            .map(|result, act, ctx| match result {
                Ok(accepted) => act.reply(&ServerMessage::move_result(accepted), ctx),
                Err(e) => warn!("Session actor unavailable: {}", e),
            })
            .spawn(ctx);
    }
}
