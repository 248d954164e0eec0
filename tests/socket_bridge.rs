//! Integration tests for the raw socket bridge.
//!
//! Each test binds the bridge on a random port, connects a plain TCP
//! client and exchanges newline-delimited JSON frames.

mod common;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use chatsift::channels::SocketBridge;
use common::{Harness, TEST_TIMEOUT, harness};

async fn start_bridge(h: &Harness) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let bridge = SocketBridge::bind("127.0.0.1:0", Arc::clone(&h.ctx), "\n")
        .await
        .unwrap();
    let addr = bridge.local_addr().unwrap();
    tokio::spawn(async move {
        bridge.serve().await.unwrap();
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, writer) = stream.into_split();
    (BufReader::new(reader), writer)
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Value {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.unwrap();
    assert!(n > 0, "bridge closed the connection");
    serde_json::from_str(line.trim_end()).expect("invalid JSON from bridge")
}

/// Read frames until one of type `wanted` shows up.
async fn read_until(reader: &mut BufReader<OwnedReadHalf>, wanted: &str) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = read_frame(reader).await;
        let done = frame["type"] == wanted;
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

async fn send_frame(writer: &mut OwnedWriteHalf, value: Value) {
    let mut text = value.to_string();
    text.push('\n');
    writer.write_all(text.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn connect_then_ping() {
    timeout(TEST_TIMEOUT, async {
        let h = harness();
        let (mut reader, mut writer) = start_bridge(&h).await;

        let connected = read_frame(&mut reader).await;
        assert_eq!(connected["type"], "connected");
        assert!(connected["client_id"].as_str().is_some());

        send_frame(&mut writer, json!({ "type": "ping" })).await;
        assert_eq!(read_frame(&mut reader).await["type"], "pong");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn frames_split_across_writes_are_reassembled() {
    timeout(TEST_TIMEOUT, async {
        let h = harness();
        let (mut reader, mut writer) = start_bridge(&h).await;
        read_frame(&mut reader).await;

        let frame = json!({ "type": "conversation_cut", "rbi_name": "demo", "bubble_id": "b1" })
            .to_string();
        let (head, tail) = frame.split_at(frame.len() / 2);
        writer.write_all(head.as_bytes()).await.unwrap();
        writer.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        writer.write_all(format!("{tail}\n").as_bytes()).await.unwrap();

        let result = read_frame(&mut reader).await;
        assert_eq!(result["type"], "conversation_cut_results");
        assert_eq!(result["conversations"][0][0], "m1");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    timeout(TEST_TIMEOUT, async {
        let h = harness();
        let (mut reader, mut writer) = start_bridge(&h).await;
        read_frame(&mut reader).await;

        writer.write_all(b"this is not json\n\n").await.unwrap();
        send_frame(&mut writer, json!({ "type": "teleport" })).await;
        send_frame(&mut writer, json!({ "type": "ping" })).await;
        assert_eq!(read_frame(&mut reader).await["type"], "pong");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn search_command_runs_a_search_without_bots() {
    timeout(TEST_TIMEOUT, async {
        let h = harness();
        let (mut reader, mut writer) = start_bridge(&h).await;
        read_frame(&mut reader).await;

        send_frame(
            &mut writer,
            json!({
                "type": "new_message",
                "rbi_name": "demo",
                "bubble_id": "b1",
                "message": {
                    "id": "m10",
                    "content": "/search release date",
                    "author_id": "alice",
                    "date": "2024-02-01T12:00:00Z"
                }
            }),
        )
        .await;

        let frames = read_until(&mut reader, "prepare_search_results").await;
        assert_eq!(frames[0]["type"], "search_will_be_done");
        let prepare = frames.last().unwrap();
        assert_eq!(prepare["search_msg_id"], "m10");
        assert_eq!(prepare["search_msg_bubble_id"], "b1");

        let nb_results = prepare["nb_results"].as_u64().unwrap();
        assert!(nb_results > 0);
        for _ in 0..nb_results {
            let result = read_frame(&mut reader).await;
            assert_eq!(result["type"], "search_result");
            assert_ne!(result["author_id"], "bot");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn plain_message_is_stored() {
    timeout(TEST_TIMEOUT, async {
        let h = harness();
        let (mut reader, mut writer) = start_bridge(&h).await;
        read_frame(&mut reader).await;

        send_frame(
            &mut writer,
            json!({
                "type": "new_message",
                "rbi_name": "demo",
                "bubble_id": "b1",
                "message": {
                    "id": "m11",
                    "content": "See you friday",
                    "author_id": "carol",
                    "author_name": "Carol",
                    "date": "2024-02-01T12:05:00Z"
                }
            }),
        )
        .await;

        let added = read_until(&mut reader, "messages_added").await;
        assert_eq!(added.last().unwrap()["nb_added"], 1);
        let dataset = h.resources.dataset("demo").unwrap();
        assert!(dataset.message("m11").is_some());
        assert!(dataset.user("carol").is_some());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn endless_frame_disconnects_the_client() {
    timeout(TEST_TIMEOUT, async {
        let h = harness();
        let (mut reader, mut writer) = start_bridge(&h).await;
        read_frame(&mut reader).await;

        let junk = vec![b'x'; chatsift::channels::socket::MAX_FRAME_BYTES + 4096];
        // The bridge may hang up before the whole write lands.
        let _ = writer.write_all(&junk).await;

        let mut line = String::new();
        let closed = match reader.read_line(&mut line).await {
            Ok(n) => n == 0,
            Err(_) => true,
        };
        assert!(closed, "bridge kept a client sending an unbounded frame");
    })
    .await
    .expect("test timed out");
}
