//! Inbound requests from the remote server
//!
//! Run with: cargo test -p qzig-tests --test control_test

use std::sync::Arc;

use pretty_assertions::assert_eq;
use qzig_core::radio::mock::{MockRadio, RadioCall};
use qzig_core::ClusterCommand;
use qzig_tests::{on_off_switch, snapshot_device, state_id, TestBridge, NETWORK_ID};
use serde_json::{json, Value as JsonValue};

const SWITCH: &str = "00:0d:6f:00:0a:90:69:e7";

async fn started_switch() -> (TestBridge, JsonValue) {
    let radio = MockRadio::new();
    radio.add_device(Arc::new(on_off_switch(SWITCH)));
    let mut test = TestBridge::new(radio);
    let snapshot = test.start(json!([])).await.remove(0);
    (test, snapshot)
}

// =============================================================================
// PUT
// =============================================================================

#[tokio::test]
async fn test_put_on_off_switches_on_and_reports() {
    let (mut test, snapshot) = started_switch().await;
    let switch = snapshot_device(&snapshot, "Switch");
    let control = state_id(switch, "On/Off", "Control");
    let report = state_id(switch, "On/Off", "Report");

    let id = test
        .server
        .request(
            "PUT",
            &format!("/state/{}", control),
            Some(json!({"data": "1"})),
        )
        .await;
    let (reply, pushed) = test.server.reply_to(id).await;
    assert_eq!(reply["result"], true);

    let cluster = test.radio.device(SWITCH).unwrap().cluster(1, 0x0006).unwrap();
    assert_eq!(cluster.commands(), vec![ClusterCommand::On]);

    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["method"], "PUT");
    assert!(pushed[0]["params"]["url"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/state/{}", report)));
    assert_eq!(pushed[0]["params"]["data"]["data"], "1");
    assert_eq!(pushed[0]["params"]["data"]["type"], "Report");
}

#[tokio::test]
async fn test_put_on_report_state_is_refused() {
    let (mut test, snapshot) = started_switch().await;
    let report = state_id(snapshot_device(&snapshot, "Switch"), "On/Off", "Report");

    let id = test
        .server
        .request(
            "PUT",
            &format!("/state/{}", report),
            Some(json!({"data": "1"})),
        )
        .await;
    let (reply, pushed) = test.server.reply_to(id).await;
    assert!(pushed.is_empty());
    assert_eq!(reply["error"]["code"], -32050);
    assert_eq!(reply["error"]["message"], "Report state can't be changed");

    let cluster = test.radio.device(SWITCH).unwrap().cluster(1, 0x0006).unwrap();
    assert!(cluster.commands().is_empty());
}

#[tokio::test]
async fn test_put_with_invalid_number_is_refused() {
    let (mut test, snapshot) = started_switch().await;
    let control = state_id(snapshot_device(&snapshot, "Switch"), "On Time", "Control");

    let id = test
        .server
        .request(
            "PUT",
            &format!("/state/{}", control),
            Some(json!({"data": "soon"})),
        )
        .await;
    let (reply, _) = test.server.reply_to(id).await;
    assert_eq!(reply["error"]["message"], "Invalid number: soon");
}

#[tokio::test]
async fn test_put_on_device_url_is_invalid() {
    let (mut test, snapshot) = started_switch().await;
    let device_id = snapshot_device(&snapshot, "Switch")[":id"]
        .as_str()
        .unwrap()
        .to_string();

    let id = test
        .server
        .request(
            "PUT",
            &format!("/network/{}/device/{}", NETWORK_ID, device_id),
            Some(json!({"name": "Kitchen"})),
        )
        .await;
    let (reply, _) = test.server.reply_to(id).await;
    assert_eq!(reply["error"]["message"], "Invalid service (device) in url");
}

#[tokio::test]
async fn test_permit_join_reports_open_then_closed() {
    let (mut test, snapshot) = started_switch().await;
    let gateway = snapshot_device(&snapshot, "Gateway");
    let control = state_id(gateway, "Permit Join", "Control");
    let report = state_id(gateway, "Permit Join", "Report");

    let id = test
        .server
        .request(
            "PUT",
            &format!("/state/{}", control),
            Some(json!({"data": "1"})),
        )
        .await;
    let (reply, pushed) = test.server.reply_to(id).await;
    assert_eq!(reply["result"], true);
    assert!(test.radio.calls().contains(&RadioCall::Permit(1)));
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["params"]["data"]["data"], "1");

    // the join window closes after one second
    let closed = test.server.expect("PUT").await;
    assert!(closed["params"]["url"].as_str().unwrap().ends_with(&report));
    assert_eq!(closed["params"]["data"]["data"], "0");
}

// =============================================================================
// GET
// =============================================================================

#[tokio::test]
async fn test_get_unknown_state_fails() {
    let (mut test, _) = started_switch().await;

    let id = test.server.request("GET", "/state/no-such-state", None).await;
    let (reply, _) = test.server.reply_to(id).await;
    assert_eq!(
        reply,
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32050, "message": "Failed to find id no-such-state" }
        })
    );
}

#[tokio::test]
async fn test_get_report_state_reads_radio() {
    let (mut test, snapshot) = started_switch().await;
    let report = state_id(snapshot_device(&snapshot, "Switch"), "On/Off", "Report");
    let cluster = test.radio.device(SWITCH).unwrap().cluster(1, 0x0006).unwrap();
    cluster.set_attribute(0, qzig_core::AttrValue::Int(1));
    let reads = cluster.read_count();

    let id = test
        .server
        .request("GET", &format!("/state/{}", report), None)
        .await;
    let (reply, pushed) = test.server.reply_to(id).await;
    assert_eq!(reply["result"], true);
    assert_eq!(cluster.read_count(), reads + 1);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["params"]["data"]["data"], "1");
}

#[tokio::test]
async fn test_get_device_pushes_it() {
    let (mut test, snapshot) = started_switch().await;
    let switch = snapshot_device(&snapshot, "Switch");
    let url = format!("/network/{}/device/{}", NETWORK_ID, switch[":id"].as_str().unwrap());

    let id = test.server.request("GET", &url, None).await;
    let (reply, pushed) = test.server.reply_to(id).await;
    assert_eq!(reply["result"], true);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["method"], "PUT");
    assert_eq!(pushed[0]["params"]["url"], url);
    assert_eq!(pushed[0]["params"]["data"][":id"], switch[":id"]);
}

// =============================================================================
// DELETE and POST
// =============================================================================

#[tokio::test]
async fn test_delete_device_removes_it() {
    let (mut test, snapshot) = started_switch().await;
    let device_id = snapshot_device(&snapshot, "Switch")[":id"]
        .as_str()
        .unwrap()
        .to_string();

    let id = test
        .server
        .request("DELETE", &format!("/device/{}", device_id), None)
        .await;
    let (reply, pushed) = test.server.reply_to(id).await;
    assert_eq!(reply["result"], true);
    assert!(test.radio.device(SWITCH).unwrap().has_left());
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["method"], "DELETE");
    assert!(!test.store_dir().join("device").join(&device_id).exists());

    let id = test
        .server
        .request("GET", &format!("/device/{}", device_id), None)
        .await;
    let (reply, _) = test.server.reply_to(id).await;
    assert_eq!(
        reply["error"]["message"],
        format!("Failed to find id {}", device_id)
    );
}

#[tokio::test]
async fn test_post_is_refused() {
    let (mut test, _) = started_switch().await;

    let id = test
        .server
        .request("POST", "/network/x/device", Some(json!({})))
        .await;
    let (reply, _) = test.server.reply_to(id).await;
    assert_eq!(reply["error"]["message"], "POST is not supported");
}
