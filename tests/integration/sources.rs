use crate::*;

use peerwire_core::{ContentHash, RawAddress, SourceRecord};
use peerwire_services::{AlternateLocationCollector, HttpHeaderValue};

fn raw(a: u8, b: u8, port: u16) -> RawAddress {
    RawAddress {
        addr: [30, 0, a, b],
        port,
    }
}

fn source(address: RawAddress, firewalled: bool, tls: bool) -> SourceRecord {
    SourceRecord {
        address,
        firewalled,
        tls,
    }
}

#[tokio::test]
async fn test_announced_sources_rendered_with_proxies() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;
    let hash = ContentHash::of(b"shared file");
    // The firewalled peer announces its own proxies, so it shares the
    // client's host.
    let hidden = RawAddress {
        addr: [127, 0, 0, 1],
        port: 6346,
    };

    client
        .send(
            &node,
            &Message::PushProxies {
                target: hidden,
                proxies: vec![raw(1, 1, 7000)],
            },
        )
        .await?;
    assert!(eventually(|| node.proxies.has_proxies(&hidden.to_peer())).await);

    client
        .send(
            &node,
            &Message::AltLocs {
                hash,
                sources: vec![source(raw(0, 1, 6346), false, true), source(hidden, true, false)],
            },
        )
        .await?;
    assert!(eventually(|| node
        .altlocs
        .get(&hash)
        .is_some_and(|set| set.number_of_alternate_locations() == 2))
    .await);

    let set = node.altlocs.get(&hash).context("sources for hash")?;
    assert_eq!(
        set.http_string_value(),
        "30.0.0.1:6346;tls,127.0.0.1:6346;fw;30.0.1.1:7000"
    );

    // The peer becomes reachable: its proxies go, the source stays.
    client
        .send(
            &node,
            &Message::PushProxies {
                target: hidden,
                proxies: vec![],
            },
        )
        .await?;
    assert!(eventually(|| !node.proxies.has_proxies(&hidden.to_peer())).await);
    assert_eq!(
        set.http_string_value(),
        "30.0.0.1:6346;tls,127.0.0.1:6346;fw"
    );

    node.stop().await
}

#[tokio::test]
async fn test_invalid_sources_skipped_and_repeats_not_duplicated() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;
    let hash = ContentHash::of(b"another file");

    let announce = Message::AltLocs {
        hash,
        sources: vec![
            source(raw(0, 1, 6346), false, false),
            source(raw(0, 2, 0), false, false),
        ],
    };
    client.send(&node, &announce).await?;
    client.send(&node, &announce).await?;

    assert!(eventually(|| node.router.stats().handled == 2).await);
    let set = node.altlocs.get(&hash).context("sources for hash")?;
    assert_eq!(set.number_of_alternate_locations(), 1);
    assert_eq!(set.http_string_value(), "30.0.0.1:6346");

    node.stop().await
}

#[tokio::test]
async fn test_sources_capped_per_hash() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;
    let hash = ContentHash::of(b"popular file");

    for i in 1..=12u8 {
        client
            .send(
                &node,
                &Message::AltLocs {
                    hash,
                    sources: vec![source(raw(1, i, 6346), false, false)],
                },
            )
            .await?;
        assert!(eventually(|| node.router.stats().handled == u64::from(i)).await);
        // Distinct last-seen stamps keep eviction order deterministic.
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let set = node.altlocs.get(&hash).context("sources for hash")?;
    assert_eq!(set.number_of_alternate_locations(), 10);
    let rendered = set.http_string_value();
    assert!(!rendered.contains("30.0.1.1:"), "oldest kept: {rendered}");
    assert!(rendered.ends_with("30.0.1.12:6346"), "newest missing: {rendered}");

    node.stop().await
}

#[tokio::test]
async fn test_proxies_only_changed_by_their_owner() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;
    let other = raw(0, 9, 6346);
    node.proxies
        .register_all(other.to_peer(), [raw(1, 1, 7000).to_peer()]);

    client
        .send(
            &node,
            &Message::PushProxies {
                target: other,
                proxies: vec![],
            },
        )
        .await?;
    assert!(eventually(|| node.router.stats().handled == 1).await);
    assert!(node.proxies.has_proxies(&other.to_peer()));

    node.stop().await
}

#[tokio::test]
async fn test_older_report_does_not_flip_source() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;
    let hash = ContentHash::of(b"stable file");
    let set = node.altlocs.collection(hash);
    set.add_alternate_location(peerwire_services::AlternateLocation::new(
        hash,
        raw(0, 1, 6346).to_peer(),
        u64::MAX,
    ))?;

    client
        .send(
            &node,
            &Message::AltLocs {
                hash,
                sources: vec![source(raw(0, 1, 6346), true, false)],
            },
        )
        .await?;
    assert!(eventually(|| node.router.stats().handled == 1).await);
    assert_eq!(set.http_string_value(), "30.0.0.1:6346");

    node.stop().await
}
