//! Integration tests that drive the server over raw protocol frames.


use std::io::Write as _;

use masque::config::ServerConfig;
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;
use wire_test_support::{TestServer, tags};

const INT4: u32 = 23;
const TEXT: u32 = 25;
const INTERVAL: u32 = 1186;

#[tokio::test(flavor = "multi_thread")]
async fn test_startup_sequence() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client
        .startup(&[("user", "postgres"), ("database", "postgres")])
        .await;

    let messages = client.recv_until_ready().await;
    let tags = tags(&messages);
    assert!(tags.starts_with('R'), "got {tags}");
    assert!(tags.ends_with("KZ"), "got {tags}");
    assert!(tags.contains('S'));
    assert_eq!(messages[0].body, 0i32.to_be_bytes());
    assert_eq!(messages.last().unwrap().status(), b'I');
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ssl_request_declined_without_tls() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.ssl_request().await, b'N');

    client.startup(&[("user", "postgres")]).await;
    let messages = client.recv_until_ready().await;
    assert_eq!(messages.last().unwrap().tag, b'Z');
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_database_is_fatal() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    client
        .startup(&[("user", "postgres"), ("database", "nope")])
        .await;

    let mut message = client.recv().await;
    while message.tag != b'E' {
        message = client.recv().await;
    }
    assert_eq!(message.severity(), "FATAL");
    assert_eq!(message.error_code(), "3D000");
    assert_eq!(message.error_message(), "database \"nope\" does not exist");
    assert!(client.is_closed().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_configured_database_accepted() {
    let config = ServerConfig {
        databases: vec!["analytics".to_string()],
        ..ServerConfig::default()
    };
    let server = TestServer::start_with(config).await;
    let mut client = server.connect().await;
    client
        .startup(&[("user", "postgres"), ("database", "analytics")])
        .await;

    let messages = client.recv_until_ready().await;
    assert!(messages.iter().all(|m| m.tag != b'E'));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_simple_select() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let messages = client.simple_query("SELECT 1, 'two' AS label").await;
    assert_eq!(tags(&messages), "TDCZ");
    assert_eq!(
        messages[0].row_description(),
        vec![
            ("?column?".to_string(), INT4, 0),
            ("label".to_string(), TEXT, 0)
        ]
    );
    assert_eq!(
        messages[1].text_row(),
        vec![Some("1".to_string()), Some("two".to_string())]
    );
    assert_eq!(messages[2].command_tag(), "SELECT 1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_query() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let messages = client.simple_query("  ;").await;
    assert_eq!(tags(&messages), "IZ");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_syntax_error_keeps_connection() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let messages = client.simple_query("SELEC 1").await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "42601");
    assert_eq!(messages[0].severity(), "ERROR");

    let messages = client.simple_query("SELECT 1").await;
    assert_eq!(tags(&messages), "TDCZ");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_insert_select() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let messages = client
        .simple_query("CREATE TABLE items (id integer, name text)")
        .await;
    assert_eq!(tags(&messages), "CZ");
    assert_eq!(messages[0].command_tag(), "CREATE TABLE");

    let messages = client
        .simple_query("INSERT INTO items VALUES (1, 'apple'), (2, NULL)")
        .await;
    assert_eq!(messages[0].command_tag(), "INSERT 0 2");

    let messages = client.simple_query("SELECT * FROM items").await;
    assert_eq!(tags(&messages), "TDDCZ");
    assert_eq!(
        messages[0].row_description(),
        vec![("id".to_string(), INT4, 0), ("name".to_string(), TEXT, 0)]
    );
    assert_eq!(
        messages[1].text_row(),
        vec![Some("1".to_string()), Some("apple".to_string())]
    );
    assert_eq!(messages[2].text_row(), vec![Some("2".to_string()), None]);
    assert_eq!(messages[3].command_tag(), "SELECT 2");

    let messages = client.simple_query("SELECT * FROM missing").await;
    assert_eq!(messages[0].error_code(), "42P01");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_extended_query_binary_round_trip() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("", "SELECT $1::int4 AS n", &[0]).await;
    client.describe(b'S', "").await;
    client
        .bind("", "", &[1], &[Some(&42i32.to_be_bytes()[..])], &[1])
        .await;
    client.describe(b'P', "").await;
    client.execute("", 0).await;
    client.sync().await;

    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "1tT2TDCZ");
    assert_eq!(messages[1].parameter_types(), vec![INT4]);
    assert_eq!(messages[2].row_description(), vec![("n".to_string(), INT4, 0)]);
    assert_eq!(messages[4].row_description(), vec![("n".to_string(), INT4, 1)]);
    assert_eq!(
        messages[5].data_row(),
        vec![Some(42i32.to_be_bytes().to_vec())]
    );
    assert_eq!(messages[6].command_tag(), "SELECT 1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_untyped_parameter_defaults_to_text() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("", "SELECT $1", &[]).await;
    client.describe(b'S', "").await;
    client.bind("", "", &[], &[Some(&b"hello"[..])], &[]).await;
    client.execute("", 0).await;
    client.sync().await;

    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "1tT2DCZ");
    assert_eq!(messages[1].parameter_types(), vec![TEXT]);
    assert_eq!(messages[4].text_row(), vec![Some("hello".to_string())]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_discards_until_sync() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("", "SELECT $1::int4", &[]).await;
    client.bind("", "", &[], &[], &[]).await;
    client.execute("", 0).await;
    client.sync().await;

    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "1EZ");
    assert_eq!(messages[1].error_code(), "08P01");
    assert_eq!(
        messages[1].error_message(),
        "bind message supplies 0 parameters, but prepared statement \"\" requires 1"
    );

    // The connection is back in step.
    let messages = client.simple_query("SELECT 1").await;
    assert_eq!(tags(&messages), "TDCZ");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_simple_query_destroys_unnamed_statement() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("", "SELECT 1", &[]).await;
    client.parse("keep", "SELECT 2", &[]).await;
    client.sync().await;
    assert_eq!(tags(&client.recv_until_ready().await), "11Z");

    assert_eq!(tags(&client.simple_query("SELECT 3").await), "TDCZ");

    client.bind("", "", &[], &[], &[]).await;
    client.sync().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "26000");

    client.bind("", "keep", &[], &[], &[]).await;
    client.execute("", 0).await;
    client.sync().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "2DCZ");
    assert_eq!(messages[1].text_row(), vec![Some("2".to_string())]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_closed_statement_keeps_portal() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("s", "SELECT 7", &[]).await;
    client.bind("p", "s", &[], &[], &[]).await;
    client.close(b'S', "s").await;
    client.execute("p", 0).await;
    client.sync().await;

    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "123DCZ");
    assert_eq!(messages[3].text_row(), vec![Some("7".to_string())]);

    // Closing something that does not exist is not an error.
    client.close(b'P', "nothing").await;
    client.sync().await;
    assert_eq!(tags(&client.recv_until_ready().await), "3Z");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_closed_statement_cannot_be_used() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("s", "SELECT 7", &[]).await;
    client.close(b'S', "s").await;
    client.sync().await;
    assert_eq!(tags(&client.recv_until_ready().await), "13Z");

    client.describe(b'S', "s").await;
    client.sync().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "26000");
    assert_eq!(
        messages[0].error_message(),
        "prepared statement \"s\" does not exist"
    );

    client.bind("", "s", &[], &[], &[]).await;
    client.sync().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "26000");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_bind_drops_unnamed_portal() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("", "SELECT 1", &[]).await;
    client.bind("", "", &[], &[], &[]).await;
    client.sync().await;
    assert_eq!(tags(&client.recv_until_ready().await), "12Z");

    client.bind("", "missing", &[], &[], &[]).await;
    client.sync().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "26000");

    client.execute("", 0).await;
    client.sync().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "34000");
    assert_eq!(messages[0].error_message(), "portal \"\" does not exist");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interval_parameter_out_of_range() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("", "SELECT $1", &[INTERVAL]).await;
    client
        .bind("", "", &[], &[Some(&b"2147483647 days 1 day"[..])], &[])
        .await;
    client.execute("", 0).await;
    client.sync().await;

    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "1EZ");
    assert_eq!(messages[1].error_code(), "22008");
    assert_eq!(
        messages[1].error_message(),
        "interval field value out of range: \"2147483647 days 1 day\""
    );

    let messages = client.simple_query("SELECT 1").await;
    assert_eq!(tags(&messages), "TDCZ");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deallocate_and_discard_all() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.parse("a", "SELECT 1", &[]).await;
    client.parse("b", "SELECT 2", &[]).await;
    client.sync().await;
    client.recv_until_ready().await;

    let messages = client.simple_query("DEALLOCATE a").await;
    assert_eq!(messages[0].command_tag(), "DEALLOCATE");

    let messages = client.simple_query("DEALLOCATE a").await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "26000");

    let messages = client.simple_query("DISCARD ALL").await;
    assert_eq!(messages[0].command_tag(), "DISCARD ALL");

    client.describe(b'S', "b").await;
    client.sync().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "26000");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_copy_from_stdin() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    client
        .simple_query("CREATE TABLE t (id integer, name text)")
        .await;

    client.query("COPY t FROM STDIN").await;
    let response = client.recv().await;
    assert_eq!(response.tag, b'G');
    assert_eq!(response.body, vec![0, 0, 0]);

    client.copy_data(b"1\tone\n2\t").await;
    client.copy_data(b"\\N\n").await;
    client.copy_done().await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "CZ");
    assert_eq!(messages[0].command_tag(), "COPY 2");

    let messages = client.simple_query("SELECT * FROM t").await;
    assert_eq!(
        messages[1].text_row(),
        vec![Some("1".to_string()), Some("one".to_string())]
    );
    assert_eq!(messages[2].text_row(), vec![Some("2".to_string()), None]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_copy_fail() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    client.simple_query("CREATE TABLE t (id integer)").await;

    client.query("COPY t FROM STDIN").await;
    assert_eq!(client.recv().await.tag, b'G');
    client.copy_data(b"1\n").await;
    client.copy_fail("client gave up").await;

    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "57014");
    assert_eq!(
        messages[0].error_message(),
        "COPY from stdin failed: client gave up"
    );

    let messages = client.simple_query("SELECT * FROM t").await;
    assert_eq!(tags(&messages), "TCZ");
    assert_eq!(messages[1].command_tag(), "SELECT 0");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_copy_bad_data_drops_remaining_input() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    client.simple_query("CREATE TABLE t (id integer)").await;

    client.query("COPY t FROM STDIN").await;
    assert_eq!(client.recv().await.tag, b'G');
    client.copy_data(b"1\nnot a number\n").await;

    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "22P02");

    // The rest of the stream is swallowed without another reply.
    client.copy_data(b"3\n").await;
    client.copy_done().await;

    let messages = client.simple_query("SELECT * FROM t").await;
    assert_eq!(tags(&messages), "TCZ");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_copy_from_file() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    client
        .simple_query("CREATE TABLE t (id integer, name text)")
        .await;

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "id,name").unwrap();
    writeln!(file, "1,\"a, b\"").unwrap();
    writeln!(file, "2,").unwrap();
    file.flush().unwrap();

    let sql = format!(
        "COPY t FROM '{}' WITH (FORMAT csv, HEADER)",
        file.path().display()
    );
    let messages = client.simple_query(&sql).await;
    assert_eq!(tags(&messages), "CZ");
    assert_eq!(messages[0].command_tag(), "COPY 2");

    let messages = client.simple_query("SELECT * FROM t").await;
    assert_eq!(
        messages[1].text_row(),
        vec![Some("1".to_string()), Some("a, b".to_string())]
    );
    assert_eq!(messages[2].text_row(), vec![Some("2".to_string()), None]);

    let messages = client
        .simple_query("COPY t FROM '/nonexistent/masque.csv'")
        .await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "58P01");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_copy_data_without_copy_is_rejected() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.copy_data(b"1\n").await;
    let messages = client.recv_until_ready().await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages[0].error_code(), "08P01");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transaction_status() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let messages = client.simple_query("BEGIN").await;
    assert_eq!(messages.last().unwrap().status(), b'T');

    let messages = client.simple_query("SELECT * FROM missing").await;
    assert_eq!(tags(&messages), "EZ");
    assert_eq!(messages.last().unwrap().status(), b'E');

    let messages = client.simple_query("SELECT 1").await;
    assert_eq!(messages[0].error_code(), "25P02");
    assert_eq!(messages.last().unwrap().status(), b'E');

    let messages = client.simple_query("ROLLBACK").await;
    assert_eq!(messages.last().unwrap().status(), b'I');
}

#[tokio::test(flavor = "multi_thread")]
async fn test_terminate_closes_connection() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.terminate().await;
    assert!(client.is_closed().await);
}
