use crate::*;

use peerwire_core::RawAddress;

#[tokio::test]
async fn test_ping_answered_with_advertised_pong() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;

    client.send(&node, &Message::Ping).await?;
    let reply = client.recv(&node).await?;
    assert_eq!(
        reply,
        Message::Pong {
            host: RawAddress {
                addr: [10, 1, 2, 3],
                port: 6346
            }
        }
    );

    // One handler per remote address, reused across datagrams.
    client.send(&node, &Message::Ping).await?;
    client.recv(&node).await?;
    assert_eq!(node.reply_cache.len(), 1);

    node.stop().await
}

#[tokio::test]
async fn test_malformed_datagram_dropped_and_node_keeps_serving() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;

    client.send_raw(&node, &[0xff, 0x00, 0x01]).await?;
    assert!(client.hears_nothing().await);

    client.send(&node, &Message::Ping).await?;
    assert!(matches!(client.recv(&node).await?, Message::Pong { .. }));

    let stats = node.router.stats();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.handled, 1);
    // Malformed input never reaches the reply cache.
    assert_eq!(node.reply_cache.len(), 1);

    node.stop().await
}

#[tokio::test]
async fn test_query_key_bound_to_requesting_address() -> Result<()> {
    let node = TestNode::start().await?;
    let a = Client::new().await?;
    let b = Client::new().await?;

    a.send(&node, &Message::QueryKeyRequest).await?;
    let Message::QueryKeyReply { key } = a.recv(&node).await? else {
        bail!("expected a query key reply");
    };

    assert!(node.keys.read().verify(&a.address()?, &key));
    // Same host, other port: the key does not transfer.
    assert!(!node.keys.read().verify(&b.address()?, &key));
    assert!(!node
        .keys
        .read()
        .verify(&PeerAddress::v4(192, 0, 2, 1, 6346), &key));

    node.stop().await
}

#[tokio::test]
async fn test_pong_adds_host_without_reply() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;

    let pong = Message::Pong {
        host: RawAddress {
            addr: [20, 0, 0, 1],
            port: 6346,
        },
    };
    client.send(&node, &pong).await?;

    assert!(eventually(|| node.hosts.len() == 1).await);
    assert!(client.hears_nothing().await);

    node.stop().await
}

#[tokio::test]
async fn test_unbound_kind_is_counted_not_answered() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;

    client
        .send(&node, &Message::QueryKeyReply { key: [7; 16] })
        .await?;
    assert!(client.hears_nothing().await);
    assert_eq!(node.router.stats().unhandled, 1);

    node.stop().await
}
