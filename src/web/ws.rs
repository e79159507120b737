//! Signaling socket endpoint at `/api/ws`
//!
//! The upgrade itself is never refused: authentication happens inside the
//! socket so a rejected viewer still receives a disconnect message carrying
//! the reason.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{header, HeaderMap},
    response::Response,
};
use axum_extra::extract::CookieJar;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::session::AuthRequest;
use crate::state::AppState;

/// Cookie a browser client may carry its member token in
pub const TOKEN_COOKIE: &str = "deskcast_token";

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Find the member token: query string, then cookie, then Bearer header
pub fn extract_token(query: &WsQuery, cookies: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.token.as_ref().filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }

    if let Some(cookie) = cookies.get(TOKEN_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

/// Client address, preferring the first hop of `X-Forwarded-For`
fn client_address(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    cookies: CookieJar,
    headers: HeaderMap,
) -> Response {
    let request = AuthRequest {
        token: extract_token(&query, &cookies, &headers),
        address: client_address(&headers, peer),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    };
    debug!(address = %request.address, "Signaling socket upgrade");

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        state.websocket.connect(sink, stream, request).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum_extra::extract::cookie::Cookie;

    #[test]
    fn test_token_sources_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        let cookies = CookieJar::new().add(Cookie::new(TOKEN_COOKIE, "from-cookie"));
        let query = WsQuery {
            token: Some("from-query".to_string()),
        };

        assert_eq!(
            extract_token(&query, &cookies, &headers).as_deref(),
            Some("from-query")
        );
        assert_eq!(
            extract_token(&WsQuery::default(), &cookies, &headers).as_deref(),
            Some("from-cookie")
        );
        assert_eq!(
            extract_token(&WsQuery::default(), &CookieJar::new(), &headers).as_deref(),
            Some("from-header")
        );
        assert!(extract_token(&WsQuery::default(), &CookieJar::new(), &HeaderMap::new()).is_none());
    }

    #[test]
    fn test_forwarded_address() {
        let peer: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_address(&headers, peer), "10.0.0.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_address(&headers, peer), "203.0.113.9");
    }
}
