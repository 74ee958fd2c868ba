mod common;

use adu_agent::commands::{CommandError, Flow};
use adu_agent::engine::agent::{ADU_RECEIVED_MESSAGE, CONNECTED_MESSAGE};
use adu_agent::engine::properties::{PropertiesKind, PropertiesResponse};
use adu_agent::engine::transport::QoS;
use adu_agent::engine::updater::state::AgentState;
use adu_agent::engine::updater::verify::AuthError;
use common::{agent, json, manifest, sign_manifest, twin, TEST_ROOT_ID};

#[tokio::test(start_paused = true)]
async fn test_echo_command_round_trip() {
    let (mut agent, hub) = agent();
    hub.push_command("echo", serde_json::json!("hello"));

    assert_eq!(agent.step().await.unwrap(), Flow::Continue);

    let sent = hub.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload, br#""hello""#);
    assert_eq!(sent[0].qos, QoS::AtLeastOnce);
    assert_eq!(agent.session().acks().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_command_has_no_side_effects() {
    let (mut agent, hub) = agent();
    let err = agent.dispatch("Echo", b"\"x\"".to_vec()).await.unwrap_err();

    assert!(matches!(err, CommandError::NotFound(name) if name == "Echo"));
    assert!(hub.sent().is_empty());
    assert_eq!(hub.property_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_key_is_rejected() {
    let (mut agent, hub) = agent();
    let offered = manifest("1.1");
    let signature = sign_manifest(&offered, "ADU.999999.R");
    hub.set_twin(Some(twin(21, "wf-unknown", &offered, &signature)));

    let err = agent.dispatch("apply_update", Vec::new()).await.unwrap_err();
    assert!(matches!(
        err,
        CommandError::Auth(AuthError::UnknownKey { ref key_id }) if key_id == "ADU.999999.R"
    ));

    // Only a rejection naming the evaluated version went out
    let reported: Vec<_> = hub.reported().iter().map(|r| json(r)).collect();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0]["deviceUpdate"]["service"]["ac"], 406);
    assert_eq!(reported[0]["deviceUpdate"]["service"]["av"], 21);
    assert!(reported.iter().all(|r| r["deviceUpdate"]["service"]["ac"] != 200));

    assert_eq!(agent.updates().state(), AgentState::Idle);
    assert!(hub.telemetry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_tampered_manifest_is_rejected() {
    let (mut agent, hub) = agent();
    let signed = manifest("1.1");
    let signature = sign_manifest(&signed, TEST_ROOT_ID);
    let tampered = signed.replace("2048", "4096");
    hub.set_twin(Some(twin(5, "wf-tampered", &tampered, &signature)));

    let err = agent.dispatch("apply_update", Vec::new()).await.unwrap_err();
    assert!(matches!(err, CommandError::Auth(AuthError::DigestMismatch { .. })));
    assert_eq!(agent.updates().state(), AgentState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_accept_deploy_and_confirm() {
    let (mut agent, hub) = agent();
    let offered = manifest("1.1");
    let signature = sign_manifest(&offered, TEST_ROOT_ID);
    hub.set_twin(Some(twin(11, "wf-accept", &offered, &signature)));

    assert_eq!(
        agent.dispatch("apply_update", Vec::new()).await.unwrap(),
        Flow::Continue
    );

    let reported = hub.reported();
    assert_eq!(reported.len(), 2);
    let response = json(&reported[0]);
    assert_eq!(response["deviceUpdate"]["service"]["ac"], 200);
    assert_eq!(response["deviceUpdate"]["service"]["av"], 11);
    assert_eq!(response["deviceUpdate"]["service"]["ad"], "accepted");

    let in_progress = json(&reported[1]);
    let state = &in_progress["deviceUpdate"]["agent"];
    assert_eq!(state["state"], 6);
    assert_eq!(state["workflow"]["id"], "wf-accept");
    assert_eq!(agent.updates().installing().unwrap().version, "1.1");

    // Completion telemetry echoes the command
    assert_eq!(
        json(hub.telemetry().last().unwrap()),
        serde_json::json!({ "method": "apply_update" })
    );

    agent.dispatch("verify_final_state", Vec::new()).await.unwrap();
    assert_eq!(agent.updates().state(), AgentState::Idle);
    assert_eq!(agent.updates().current_update().version, "1.1");

    let final_state = json(hub.reported().last().unwrap());
    let state = &final_state["deviceUpdate"]["agent"];
    assert_eq!(state["state"], 0);
    assert_eq!(state["lastInstallResult"]["resultCode"], 700);
    assert!(state["installedUpdateId"].as_str().unwrap().contains("\"version\":\"1.1\""));
}

#[tokio::test(start_paused = true)]
async fn test_second_offer_while_deploying_is_refused() {
    let (mut agent, hub) = agent();
    let offered = manifest("1.1");
    let signature = sign_manifest(&offered, TEST_ROOT_ID);
    hub.set_twin(Some(twin(11, "wf-1", &offered, &signature)));
    agent.dispatch("apply_update", Vec::new()).await.unwrap();

    let next = manifest("1.2");
    let next_signature = sign_manifest(&next, TEST_ROOT_ID);
    hub.set_twin(Some(twin(12, "wf-2", &next, &next_signature)));
    let err = agent.dispatch("apply_update", Vec::new()).await.unwrap_err();
    assert!(matches!(err, CommandError::State(_)));
    assert_eq!(agent.updates().state(), AgentState::DeploymentInProgress);
    assert_eq!(agent.updates().installing().unwrap().version, "1.1");

    // The busy agent still answers the new offer with its version
    let response = json(hub.reported().last().unwrap());
    assert_eq!(response["deviceUpdate"]["service"]["ac"], 406);
    assert_eq!(response["deviceUpdate"]["service"]["av"], 12);
    assert_eq!(response["deviceUpdate"]["service"]["value"]["workflow"]["id"], "wf-2");
}

#[tokio::test(start_paused = true)]
async fn test_rejected_offer_does_not_stop_run() {
    let (mut agent, hub) = agent();
    let offered = manifest("1.1");
    let signature = sign_manifest(&offered, "ADU.999999.R");
    hub.set_twin(Some(twin(9, "wf-bad", &offered, &signature)));
    hub.push_command("apply_update", serde_json::Value::Null);
    hub.push_command("echo", serde_json::json!("after"));
    hub.push_command("exit", serde_json::Value::Null);

    agent.run().await.unwrap();

    assert!(hub.telemetry().contains(&br#""after""#.to_vec()));
    assert_eq!(agent.updates().state(), AgentState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_get_twin_requires_a_document() {
    let (mut agent, hub) = agent();
    let err = agent.dispatch("get_adu_twin", Vec::new()).await.unwrap_err();
    assert!(matches!(err, CommandError::NoProperties));
    assert!(hub.telemetry().is_empty());

    hub.set_twin(Some(br#"{"desired":{"$version":2},"reported":{}}"#.to_vec()));
    agent.dispatch("get_adu_twin", Vec::new()).await.unwrap();
    assert_eq!(hub.telemetry().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_init_state_reports_idle() {
    let (mut agent, hub) = agent();
    agent.dispatch("send_init_adu_state", Vec::new()).await.unwrap();

    let report = json(&hub.reported()[0]);
    let state = &report["deviceUpdate"]["agent"];
    assert_eq!(state["state"], 0);
    assert_eq!(state["deviceProperties"]["manufacturer"], "PC");
    assert!(state["installedUpdateId"].as_str().unwrap().contains("\"version\":\"1.0\""));
}

#[tokio::test(start_paused = true)]
async fn test_run_session() {
    let (mut agent, hub) = agent();
    let offered = manifest("1.1");
    let signature = sign_manifest(&offered, TEST_ROOT_ID);
    hub.push_properties(PropertiesResponse::new(
        PropertiesKind::WritablePatch,
        None,
        serde_json::json!({
            "deviceUpdate": { "__t": "c", "service": { "workflow": { "action": 3, "id": "wf-run" } } },
            "$version": 3
        })
        .to_string()
        .into_bytes(),
    ));
    hub.set_twin(Some(twin(3, "wf-run", &offered, &signature)));

    let driver = hub.clone();
    let script = async move {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        driver.push_command("echo", serde_json::json!({ "n": 1 }));
        driver.push_command("apply_update", serde_json::Value::Null);
        driver.push_command("exit", serde_json::Value::Null);
    };

    let (result, ()) = tokio::join!(agent.run(), script);
    result.unwrap();

    let telemetry = hub.telemetry();
    assert_eq!(telemetry[0], CONNECTED_MESSAGE);
    assert_eq!(telemetry[1], ADU_RECEIVED_MESSAGE);
    assert!(telemetry.contains(&br#"{"n":1}"#.to_vec()));
    assert_eq!(agent.updates().state(), AgentState::DeploymentInProgress);
    assert!(!agent.is_running());
}
