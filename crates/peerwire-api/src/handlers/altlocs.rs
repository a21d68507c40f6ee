//! /altlocs/{hash}, /proxies/{addr} and /push/{addr} handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::Json;
use serde::Serialize;

use peerwire_core::{ContentHash, ErrorKind, PeerAddress};
use peerwire_services::{
    AlternateLocation, AlternateLocationCollector, HttpHeaderValue, PushError,
};

use super::ApiState;

/// Header carrying alternate locations on HTTP responses.
pub const ALT_LOC_HEADER: HeaderName = HeaderName::from_static("x-alt");

#[derive(Serialize)]
pub struct AltLocsResponse {
    pub hash: ContentHash,
    pub count: usize,
    pub locations: Vec<AlternateLocation>,
}

pub async fn handle_altlocs(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<(HeaderMap, Json<AltLocsResponse>), (StatusCode, String)> {
    let hash: ContentHash = hash
        .parse()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid hash: {e}")))?;
    let set = state
        .altlocs
        .get(&hash)
        .ok_or((StatusCode::NOT_FOUND, "no sources known".to_string()))?;

    let mut headers = HeaderMap::new();
    if set.has_alternate_locations() {
        match HeaderValue::from_str(&set.http_string_value()) {
            Ok(value) => {
                headers.insert(ALT_LOC_HEADER, value);
            }
            Err(e) => tracing::warn!(hash = %hash.short(), error = %e, "altloc header not representable"),
        }
    }

    Ok((
        headers,
        Json(AltLocsResponse {
            hash,
            count: set.number_of_alternate_locations(),
            locations: set.locations(),
        }),
    ))
}

#[derive(Serialize)]
pub struct ProxiesResponse {
    pub peer: PeerAddress,
    pub proxies: Vec<PeerAddress>,
}

pub async fn handle_proxies(
    State(state): State<ApiState>,
    Path(addr): Path<String>,
) -> Result<Json<ProxiesResponse>, (StatusCode, String)> {
    let peer: PeerAddress = addr
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "expected host:port".to_string()))?;
    Ok(Json(ProxiesResponse {
        peer,
        proxies: state.proxies.proxies(&peer),
    }))
}

#[derive(Serialize)]
pub struct PushResponse {
    pub peer: PeerAddress,
    pub proxy: Option<PeerAddress>,
}

/// Open a connection to the peer through one of its push proxies. The
/// socket is closed again; the response only says which proxy answered.
pub async fn handle_push(
    State(state): State<ApiState>,
    Path(addr): Path<String>,
) -> Result<Json<PushResponse>, (StatusCode, String)> {
    let peer: PeerAddress = addr
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "expected host:port".to_string()))?;
    let mut connection = state.pusher.push(peer).await.map_err(|e| {
        let status = match (&e, e.kind()) {
            (PushError::NoProxies(_), _) => StatusCode::NOT_FOUND,
            (_, ErrorKind::RetryExhausted) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, e.to_string())
    })?;
    let proxy = connection.peer_address();
    connection.close();
    Ok(Json(PushResponse { peer, proxy }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    fn hash() -> ContentHash {
        ContentHash::of(b"served file")
    }

    #[tokio::test]
    async fn altlocs_set_header_when_known() {
        let state = test_support::state();
        let addr: PeerAddress = "1.2.3.4:6346".parse().unwrap();
        state
            .altlocs
            .add(AlternateLocation::new(hash(), addr, 1).with_tls(true))
            .unwrap();

        let (headers, Json(body)) = handle_altlocs(State(state), Path(hash().to_string()))
            .await
            .unwrap();
        assert_eq!(headers.get("x-alt").unwrap(), "1.2.3.4:6346;tls");
        assert_eq!(body.count, 1);
    }

    #[tokio::test]
    async fn empty_set_omits_header() {
        let state = test_support::state();
        state.altlocs.collection(hash());
        let (headers, Json(body)) = handle_altlocs(State(state), Path(hash().to_string()))
            .await
            .unwrap();
        assert!(headers.get("x-alt").is_none());
        assert_eq!(body.count, 0);
    }

    #[tokio::test]
    async fn unknown_and_bad_hashes() {
        let state = test_support::state();
        let err = handle_altlocs(State(state.clone()), Path(hash().to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        let err = handle_altlocs(State(state), Path("zz".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn proxies_listed_for_peer() {
        let state = test_support::state();
        let peer: PeerAddress = "10.0.0.1:6346".parse().unwrap();
        let proxy: PeerAddress = "20.0.0.1:7000".parse().unwrap();
        state.proxies.register_all(peer, [proxy]);

        let Json(body) = handle_proxies(State(state), Path(peer.to_string()))
            .await
            .unwrap();
        assert_eq!(body.proxies, vec![proxy]);
    }

    #[tokio::test]
    async fn push_status_codes() {
        let state = test_support::state();
        let peer: PeerAddress = "10.0.0.1:6346".parse().unwrap();

        let err = handle_push(State(state.clone()), Path(peer.to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        let dead = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            PeerAddress::from(listener.local_addr().unwrap())
        };
        state.proxies.register_all(peer, [dead]);
        let err = handle_push(State(state.clone()), Path(peer.to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::BAD_GATEWAY);

        state.proxies.register_all(peer, [dead]);
        let err = handle_push(State(state), Path(peer.to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn push_reports_answering_proxy() {
        let state = test_support::state();
        let peer: PeerAddress = "10.0.0.2:6346".parse().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = PeerAddress::from(listener.local_addr().unwrap());
        state.proxies.register_all(peer, [proxy]);

        let (pushed, accepted) = tokio::join!(
            handle_push(State(state), Path(peer.to_string())),
            listener.accept()
        );
        accepted.unwrap();
        let Json(body) = pushed.unwrap();
        assert_eq!(body.peer, peer);
        assert_eq!(body.proxy, Some(proxy));
    }
}
