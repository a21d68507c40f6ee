use crate::*;

use peerwire_services::{FilterError, SpamFilter};

#[tokio::test]
async fn test_personal_filter_drops_loopback_peer() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;

    client.send(&node, &Message::Ping).await?;
    client.recv(&node).await?;

    node.reply_cache
        .set_personal_filter(Arc::new(SpamFilter::deny_rules(["127.0.0.0/8"])));

    client.send(&node, &Message::Ping).await?;
    assert!(client.hears_nothing().await);

    let handler = node.reply_cache.get_udp_reply_handler(client.address()?);
    assert!(handler.is_spam());
    assert_eq!(handler.dropped_messages(), 1);
    assert_eq!(node.router.stats().spam, 1);

    node.stop().await
}

#[tokio::test]
async fn test_settings_deny_applied_on_adjust() -> Result<()> {
    let node = TestNode::start().await?;
    let client = Client::new().await?;

    let mut settings = node.spam.settings();
    settings.deny = vec!["127.0.0.1".into()];
    node.spam.update_settings(settings.clone());

    // Settings alone change nothing until the filters are rebuilt.
    client.send(&node, &Message::Ping).await?;
    client.recv(&node).await?;

    assert_eq!(node.spam.adjust_spam_filters(), 1);
    client.send(&node, &Message::Ping).await?;
    assert!(client.hears_nothing().await);

    // An allow rule overrides the deny.
    settings.allow = vec!["127.0.0.1/32".into()];
    node.spam.update_settings(settings);
    node.spam.adjust_spam_filters();
    client.send(&node, &Message::Ping).await?;
    client.recv(&node).await?;

    node.stop().await
}

#[tokio::test]
async fn test_ip_filter_file_reload_blocks_listed_range() -> Result<()> {
    let file = TempFile::with_contents(
        "ranges.txt",
        "# loopback\n127.0.0.0/8\nnot-an-address\n",
    )?;
    let node = TestNode::start_with(FilterConfig {
        ip_filter_path: file.path.clone(),
        reload_timeout_secs: 5,
        ..FilterConfig::default()
    })
    .await?;
    let client = Client::new().await?;

    let report = node.spam.reload_ip_filter().await??;
    assert_eq!(report.ranges, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.caches, 1);

    client.send(&node, &Message::Ping).await?;
    assert!(client.hears_nothing().await);

    node.stop().await
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_filter() -> Result<()> {
    let node = TestNode::start().await?;
    node.reply_cache
        .set_global_filter(Arc::new(SpamFilter::deny_rules(["192.0.2.0/24"])));
    let before = node.reply_cache.global_filter();

    let err = node.spam.reload_ip_filter().await?.unwrap_err();
    assert!(matches!(err, FilterError::NoSource));
    assert!(Arc::ptr_eq(&before, &node.reply_cache.global_filter()));

    node.stop().await
}
