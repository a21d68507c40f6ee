//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use peerwire_services::router::RouterStatsSnapshot;
use peerwire_services::uploads::UploadStats;

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub reply_handlers: usize,
    pub altloc_hashes: usize,
    pub push_proxy_peers: usize,
    pub known_hosts: usize,
    pub uploads: UploadStats,
    pub router: RouterStatsSnapshot,
    pub filter: FilterInfo,
}

#[derive(Serialize)]
pub struct FilterInfo {
    pub deny_ranges: usize,
    pub allow_ranges: usize,
    pub personal_deny_ranges: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let filters = state.reply_cache.filters();
    Json(StatusResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        reply_handlers: state.reply_cache.len(),
        altloc_hashes: state.altlocs.len(),
        push_proxy_peers: state.proxies.len(),
        known_hosts: state.hosts.len(),
        uploads: state.uploads.stats(),
        router: state.router.stats(),
        filter: FilterInfo {
            deny_ranges: filters.global.deny_len(),
            allow_ranges: filters.global.allow_len(),
            personal_deny_ranges: filters.personal.deny_len(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;
    use peerwire_core::PeerAddress;

    #[tokio::test]
    async fn status_reports_counts() {
        let state = test_support::state();
        state.reply_cache.get_udp_reply_handler(PeerAddress::v4(1, 2, 3, 4, 6346));
        state.hosts.add_host(PeerAddress::v4(5, 6, 7, 8, 6346));

        let Json(status) = handle_status(State(state)).await;
        assert_eq!(status.reply_handlers, 1);
        assert_eq!(status.known_hosts, 1);
        assert_eq!(status.altloc_hashes, 0);
        assert_eq!(status.uploads.total_limit, 8);
    }

    #[tokio::test]
    async fn status_json_shape() {
        let state = test_support::state();
        let Json(status) = handle_status(State(state)).await;
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["router"]["received"], 0);
        assert_eq!(json["filter"]["deny_ranges"], 0);
        assert!(json["uptime_secs"].is_u64());
    }
}
