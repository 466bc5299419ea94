//! A panicking engine call becomes an ErrorResponse and the connection
//! carries on.


use pretty_assertions::assert_eq;
use wire_test_support::{TestServer, tags};

#[tokio::test(flavor = "multi_thread")]
async fn test_panic_reported_and_batch_discarded() {
    let server = TestServer::start_panicking().await;
    let mut client = server.client().await;

    client.parse("", "SELECT 1", &[]).await;
    client.bind("", "", &[], &[], &[]).await;
    client.execute("", 0).await;
    // Everything up to Sync is skipped once the Execute failed.
    client.describe(b'P', "").await;
    client.execute("", 0).await;
    client.parse("other", "SELECT 2", &[]).await;
    client.sync().await;

    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "12EZ");
    assert_eq!(messages[2].severity(), "ERROR");
    assert_eq!(messages[2].error_code(), "XX000");
    assert_eq!(
        messages[2].error_message(),
        "panic while handling message: engine blew up"
    );
    assert_eq!(messages[3].status(), b'I');

    // The discarded Parse never ran.
    client.describe(b'S', "other").await;
    client.sync().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "26000");

    let messages = client.simple_query("SELECT 1").await;
    assert_eq!(tags(&messages), "TDCZ");
}
