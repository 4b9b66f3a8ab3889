//! End-to-end poll cycles against HTTP doubles of both external APIs:
//! warm start, forwarding with dedup, edit-in-place, delete tombstones,
//! sticker sends and the media-to-link fallback.

use std::sync::Arc;
use wabridge::bridge::{Bridge, BridgeState};
use wabridge::channels::{GreenApiClient, TelegramChannel};
use wabridge::config::BridgeConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const SOURCE_CHAT: &str = "1203@g.us";
const TG_CHAT: &str = "555";

fn text_record(id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "idMessage": id,
        "type": "incoming",
        "timestamp": 1_706_522_263_u64,
        "chatId": SOURCE_CHAT,
        "senderId": "79120000000@c.us",
        "senderName": "Ira",
        "typeMessage": "textMessage",
        "textMessage": text,
    })
}

async fn mount_history_once(server: &MockServer, records: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/waInstanceinst1/getChatHistory/tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

async fn mount_history(server: &MockServer, records: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/waInstanceinst1/getChatHistory/tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records))
        .mount(server)
        .await;
}

async fn mount_telegram_send(server: &MockServer, message_id: i64) {
    Mock::given(method("POST"))
        .and(path("/bottok-tg/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": {"message_id": message_id}
        })))
        .mount(server)
        .await;
}

fn bridge_for(green: &MockServer, tg: &MockServer) -> (Bridge, Arc<BridgeState>) {
    let cfg = BridgeConfig::default();
    let state = Arc::new(BridgeState::new(&cfg));
    let green_client = Arc::new(GreenApiClient::new(
        green.uri(),
        "inst1".to_string(),
        "tok1".to_string(),
    ));
    let telegram = Arc::new(
        TelegramChannel::new("tok-tg".to_string(), TG_CHAT.to_string())
            .with_api_base(tg.uri()),
    );
    let bridge = Bridge::new(green_client, telegram, Arc::clone(&state), cfg, SOURCE_CHAT.to_string());
    (bridge, state)
}

async fn requests_to(server: &MockServer, suffix: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .collect()
}

#[tokio::test]
async fn warm_start_then_forwards_only_new_messages() {
    let green = MockServer::start().await;
    let tg = MockServer::start().await;

    // First poll sees A; later polls see B on top (wire order newest-first).
    mount_history_once(&green, serde_json::json!([text_record("A", "old news")])).await;
    mount_history(
        &green,
        serde_json::json!([text_record("B", "hello <world>"), text_record("A", "old news")]),
    )
    .await;
    mount_telegram_send(&tg, 77).await;

    let (bridge, state) = bridge_for(&green, &tg);

    bridge.poll_once().await.expect("warm start poll");
    assert!(
        requests_to(&tg, "/sendMessage").await.is_empty(),
        "warm start must not forward history"
    );

    bridge.poll_once().await.expect("second poll");
    bridge.poll_once().await.expect("third poll");

    let sends = requests_to(&tg, "/sendMessage").await;
    assert_eq!(sends.len(), 1, "B forwarded exactly once across re-polls");

    let body: serde_json::Value = serde_json::from_slice(&sends[0].body).unwrap();
    assert_eq!(body["chat_id"], TG_CHAT);
    let text = body["text"].as_str().unwrap();
    assert!(text.starts_with("<b>Ira:</b>"), "sender line first: {text}");
    assert!(text.contains("hello &lt;world&gt;"), "HTML-escaped body: {text}");

    let counters = state.counters.snapshot_json();
    assert_eq!(counters["forwarded"], 1);
    assert_eq!(counters["polls"], 0, "poll counter is owned by run(), not poll_once");
}

#[tokio::test]
async fn edit_record_rewrites_forwarded_message_in_place() {
    let green = MockServer::start().await;
    let tg = MockServer::start().await;

    mount_history_once(&green, serde_json::json!([])).await;
    mount_history_once(&green, serde_json::json!([text_record("B", "typo'd")])).await;
    mount_history(
        &green,
        serde_json::json!([
            {
                "idMessage": "E1",
                "type": "incoming",
                "typeMessage": "editedMessage",
                "senderName": "Ira",
                "editedMessageId": "B",
                "textMessage": "fixed text",
            },
            text_record("B", "typo'd"),
        ]),
    )
    .await;
    mount_telegram_send(&tg, 77).await;
    Mock::given(method("POST"))
        .and(path("/bottok-tg/editMessageText"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": true
        })))
        .mount(&tg)
        .await;

    let (bridge, state) = bridge_for(&green, &tg);
    bridge.poll_once().await.expect("warm start");
    bridge.poll_once().await.expect("forward B");
    bridge.poll_once().await.expect("apply edit");

    let edits = requests_to(&tg, "/editMessageText").await;
    assert_eq!(edits.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&edits[0].body).unwrap();
    assert_eq!(body["message_id"], 77, "edit targets the forwarded message");
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("edited"));
    assert!(text.contains("fixed text"));

    assert_eq!(state.counters.snapshot_json()["edited"], 1);
}

#[tokio::test]
async fn delete_record_leaves_tombstone() {
    let green = MockServer::start().await;
    let tg = MockServer::start().await;

    mount_history_once(&green, serde_json::json!([])).await;
    mount_history_once(&green, serde_json::json!([text_record("B", "soon gone")])).await;
    mount_history(
        &green,
        serde_json::json!([
            {
                "idMessage": "D1",
                "type": "incoming",
                "typeMessage": "deletedMessage",
                "senderName": "Ira",
                "deletedMessageId": "B",
            },
            text_record("B", "soon gone"),
        ]),
    )
    .await;
    mount_telegram_send(&tg, 77).await;
    Mock::given(method("POST"))
        .and(path("/bottok-tg/editMessageText"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": true
        })))
        .mount(&tg)
        .await;

    let (bridge, state) = bridge_for(&green, &tg);
    bridge.poll_once().await.expect("warm start");
    bridge.poll_once().await.expect("forward B");
    bridge.poll_once().await.expect("apply delete");

    let edits = requests_to(&tg, "/editMessageText").await;
    assert_eq!(edits.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&edits[0].body).unwrap();
    assert_eq!(body["message_id"], 77);
    assert!(body["text"].as_str().unwrap().contains("message deleted"));

    assert_eq!(state.counters.snapshot_json()["deleted"], 1);
}

#[tokio::test]
async fn unfetchable_media_degrades_to_text_link() {
    let green = MockServer::start().await;
    let tg = MockServer::start().await;

    let media_url = format!("{}/media/pic.jpg", green.uri());
    mount_history_once(&green, serde_json::json!([])).await;
    mount_history(
        &green,
        serde_json::json!([{
            "idMessage": "M1",
            "type": "incoming",
            "typeMessage": "imageMessage",
            "senderName": "Ira",
            "downloadUrl": media_url,
            "caption": "sunset",
        }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/media/pic.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&green)
        .await;
    mount_telegram_send(&tg, 78).await;

    let (bridge, state) = bridge_for(&green, &tg);
    bridge.poll_once().await.expect("warm start");
    bridge.poll_once().await.expect("forward media");

    let sends = requests_to(&tg, "/sendMessage").await;
    assert_eq!(sends.len(), 1, "fallback text message sent");
    let body: serde_json::Value = serde_json::from_slice(&sends[0].body).unwrap();
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("[photo]"));
    assert!(text.contains("/media/pic.jpg"));

    assert_eq!(state.counters.snapshot_json()["forwarded"], 1);
}

#[tokio::test]
async fn sticker_is_sent_by_url() {
    let green = MockServer::start().await;
    let tg = MockServer::start().await;

    mount_history_once(&green, serde_json::json!([])).await;
    mount_history(
        &green,
        serde_json::json!([{
            "idMessage": "S1",
            "type": "incoming",
            "typeMessage": "stickerMessage",
            "senderName": "Ira",
            "downloadUrl": "https://media.example/sticker.webp",
        }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/bottok-tg/sendSticker"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ok": true,
            "result": {"message_id": 79}
        })))
        .mount(&tg)
        .await;

    let (bridge, state) = bridge_for(&green, &tg);
    bridge.poll_once().await.expect("warm start");
    bridge.poll_once().await.expect("forward sticker");

    let stickers = requests_to(&tg, "/sendSticker").await;
    assert_eq!(stickers.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&stickers[0].body).unwrap();
    assert_eq!(body["sticker"], "https://media.example/sticker.webp");

    assert_eq!(state.counters.snapshot_json()["forwarded"], 1);
}

#[tokio::test]
async fn outgoing_messages_are_skipped_by_default() {
    let green = MockServer::start().await;
    let tg = MockServer::start().await;

    mount_history_once(&green, serde_json::json!([])).await;
    mount_history(
        &green,
        serde_json::json!([{
            "idMessage": "O1",
            "type": "outgoing",
            "typeMessage": "textMessage",
            "textMessage": "from the bridged account itself",
        }]),
    )
    .await;
    mount_telegram_send(&tg, 80).await;

    let (bridge, state) = bridge_for(&green, &tg);
    bridge.poll_once().await.expect("warm start");
    bridge.poll_once().await.expect("poll with outgoing record");

    assert!(requests_to(&tg, "/sendMessage").await.is_empty());
    assert_eq!(state.counters.snapshot_json()["skipped"], 1);
    assert_eq!(state.counters.snapshot_json()["forwarded"], 0);
}
