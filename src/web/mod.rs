mod routes;
mod ws;

pub use routes::create_router;
pub use ws::{extract_token, ws_handler, WsQuery, TOKEN_COOKIE};
