use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{validate_jwt, AuthUser};
use crate::error::ApiError;
use crate::microclimate::{live_snapshot, load_microclimate};
use crate::microclimate_hub::{LiveUpdate, MicroclimateHub, Subscribe, Unsubscribe};
use crate::models::user::Role;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// One browser watching a microclimate's live results.
pub struct LiveResultsSession {
    pub microclimate_id: String,
    pub user_id: String,
    pub hb: Instant,
    pub hub: Addr<MicroclimateHub>,
    /// Snapshot sent as soon as the socket opens.
    pub initial: Option<String>,
}

impl Actor for LiveResultsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        self.hub.do_send(Subscribe {
            microclimate_id: self.microclimate_id.clone(),
            addr: ctx.address().recipient(),
        });
        if let Some(snapshot) = self.initial.take() {
            ctx.text(snapshot);
        }
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.hub.do_send(Unsubscribe {
            microclimate_id: self.microclimate_id.clone(),
            addr: ctx.address().recipient(),
        });
    }
}

impl LiveResultsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                info!(
                    "Live session of {} on {} timed out",
                    act.user_id, act.microclimate_id
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveResultsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            // Read-only channel.
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                debug!("Ignoring client text on live session: {}", text);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error on {}: {}", self.microclimate_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<LiveUpdate> for LiveResultsSession {
    type Result = ();

    fn handle(&mut self, msg: LiveUpdate, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(msg.0);
    }
}

/// GET /ws/microclimates/{id}?token=<jwt>
///
/// Browsers cannot set headers on websocket upgrades, so the token travels in the query.
pub async fn ws_microclimate(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<WsQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let token = query
        .token
        .as_deref()
        .ok_or_else(|| ApiError::Unauthorized("Missing token".to_string()))?;
    let claims = validate_jwt(token, &data.config.jwt_secret)
        .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;
    let auth = AuthUser::from(claims);

    let microclimate = load_microclimate(&data, &auth, &path).await?;
    if !microclimate.settings.show_live_results && !auth.role.at_least(Role::Supervisor) {
        return Err(ApiError::forbidden("Live results are hidden for this microclimate").into());
    }
    let snapshot = live_snapshot(&data, &microclimate).await?;

    let session = LiveResultsSession {
        microclimate_id: microclimate.id,
        user_id: auth.user_id,
        hb: Instant::now(),
        hub: data.hub.clone(),
        initial: serde_json::to_string(&snapshot).ok(),
    };
    ws::start(session, &req, stream)
}
