// End-to-end exercises over a simulated two-controller fleet.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;

use fieldgate_core::{
    AllowedScope, ControllerEndpoint, CoreError, Gateway, GatewayConfig, GatewayOptions,
    LinkState, StaticAccess, TelemetryMessage, TelemetrySnapshot, WriteRequest,
};
use fieldgate_proto::{NodeValue, SimController, SimFleet};

fn url_a() -> Url {
    "opc.tcp://10.0.40.11:4840/".parse().expect("static url")
}

fn url_b() -> Url {
    "opc.tcp://10.0.40.12:4840/".parse().expect("static url")
}

fn fast_options() -> GatewayOptions {
    GatewayOptions {
        poll_interval: Duration::from_millis(10),
        reconnect_delay: Duration::from_millis(100),
        broadcast_interval: Duration::from_millis(20),
        write_timeout: Duration::from_secs(1),
        disconnect_timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_secs(2),
        ..GatewayOptions::default()
    }
}

fn two_park_config() -> GatewayConfig {
    GatewayConfig {
        controllers: vec![
            ControllerEndpoint {
                id: "eco-solar".into(),
                name: "Eco Solar".into(),
                address: url_a(),
            },
            ControllerEndpoint {
                id: "north-ridge".into(),
                name: "North Ridge".into(),
                address: url_b(),
            },
        ],
        options: fast_options(),
    }
}

struct Harness {
    gateway: Gateway,
    sim_a: SimController,
    sim_b: SimController,
}

fn harness(access: StaticAccess) -> Harness {
    let sim_a = SimController::demo(url_a(), "Eco Solar Park");
    let sim_b = SimController::demo(url_b(), "North Ridge Park");
    let fleet = SimFleet::new([sim_a.clone(), sim_b.clone()]);

    let gateway = Gateway::new(two_park_config(), Arc::new(fleet), Arc::new(access));
    gateway.start();
    Harness {
        gateway,
        sim_a,
        sim_b,
    }
}

async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let give_up = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < give_up {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

async fn wait_connected(h: &Harness) {
    assert!(
        wait_until(Duration::from_secs(3), || {
            h.gateway
                .registry()
                .iter()
                .all(|c| c.state() == LinkState::Connected && c.cache().is_some())
        })
        .await,
        "both controllers should connect and complete a read"
    );
}

fn snapshot_of(message: TelemetryMessage) -> TelemetrySnapshot {
    let TelemetryMessage::TelemetryUpdate { data } = message;
    data
}

#[tokio::test]
async fn broadcasts_are_filtered_per_viewer_scope() {
    let access = StaticAccess::deny_by_default()
        .with_viewer("admin".into(), AllowedScope::All)
        .with_viewer("operator-a".into(), AllowedScope::only([url_a()]));
    let h = harness(access);
    wait_connected(&h).await;

    let (_admin_id, mut admin_rx) = h.gateway.subscribe(&"admin".into()).await.expect("subscribe");
    let (_op_id, mut op_rx) = h
        .gateway
        .subscribe(&"operator-a".into())
        .await
        .expect("subscribe");

    let admin_view = snapshot_of(admin_rx.recv().await.expect("admin update"));
    assert_eq!(admin_view.controllers.len(), 2);

    let operator_view = snapshot_of(op_rx.recv().await.expect("operator update"));
    assert_eq!(operator_view.controllers.len(), 1);
    assert_eq!(operator_view.controllers[0].address, url_a());
    assert_eq!(operator_view.controllers[0].server_name, "Eco Solar Park");
    assert_eq!(operator_view.controllers[0].status, LinkState::Connected);
    assert!(
        operator_view.controllers[0]
            .nodes
            .iter()
            .any(|n| n.name == "Grid_Online" && n.value == "true")
    );

    h.gateway.shutdown().await;
}

#[tokio::test]
async fn snapshot_for_never_connected_controller_has_empty_nodes() {
    let access = StaticAccess::allow_all();
    let sim_a = SimController::demo(url_a(), "Eco Solar Park");
    let sim_b = SimController::demo(url_b(), "North Ridge Park");
    sim_b.fail_next_connects(u32::MAX);
    let fleet = SimFleet::new([sim_a, sim_b]);

    let gateway = Gateway::new(two_park_config(), Arc::new(fleet), Arc::new(access));
    gateway.start();

    assert!(
        wait_until(Duration::from_secs(3), || {
            gateway
                .registry()
                .by_address(&url_a())
                .is_ok_and(|c| c.cache().is_some())
        })
        .await
    );

    let snapshot = gateway
        .current_snapshot(&"admin".into())
        .await
        .expect("snapshot");
    assert_eq!(snapshot.controllers.len(), 2);

    let down = snapshot
        .controllers
        .iter()
        .find(|c| c.address == url_b())
        .expect("b present");
    assert!(down.nodes.is_empty());
    assert!(down.last_read_at.is_none());
    assert_ne!(down.status, LinkState::Connected);

    gateway.shutdown().await;
}

#[tokio::test]
async fn write_is_rejected_by_scope_before_anything_else() {
    let access = StaticAccess::deny_by_default()
        .with_viewer("operator-a".into(), AllowedScope::only([url_a()]));
    let h = harness(access);
    wait_connected(&h).await;

    let err = h
        .gateway
        .submit_write(
            &"operator-a".into(),
            WriteRequest {
                controller: url_b(),
                node_name: "Setpoint_Power_kW".into(),
                value: json!(100),
            },
        )
        .await
        .expect_err("out-of-scope controller");

    assert!(matches!(err, CoreError::PermissionDenied { .. }));
    assert_eq!(h.sim_b.write_count(), 0);

    h.gateway.shutdown().await;
}

#[tokio::test]
async fn invalid_value_never_reaches_the_device() {
    let h = harness(StaticAccess::allow_all());
    wait_connected(&h).await;

    let err = h
        .gateway
        .submit_write(
            &"admin".into(),
            WriteRequest {
                controller: url_a(),
                node_name: "Setpoint_Power_kW".into(),
                value: json!("abc"),
            },
        )
        .await
        .expect_err("text into a double node");

    assert!(matches!(err, CoreError::Validation { .. }));
    assert_eq!(h.sim_a.write_count(), 0);

    h.gateway.shutdown().await;
}

#[tokio::test]
async fn cutoff_command_fans_out_over_the_indexed_family() {
    let h = harness(StaticAccess::allow_all());
    wait_connected(&h).await;

    let outcomes = h
        .gateway
        .submit_write(
            &"admin".into(),
            WriteRequest {
                controller: url_a(),
                node_name: "CMD_Instant_Cutoff".into(),
                value: json!([true, true]),
            },
        )
        .await
        .expect("cutoff");

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.ok));
    assert_eq!(
        h.sim_a.value_of("CMD_Instant_Cutoff[0]"),
        Some(NodeValue::Boolean(true))
    );
    assert_eq!(
        h.sim_a.value_of("CMD_Instant_Cutoff[1]"),
        Some(NodeValue::Boolean(true))
    );

    h.gateway.shutdown().await;
}

#[tokio::test]
async fn cutoff_reports_per_node_outcomes_when_one_write_fails() {
    let h = harness(StaticAccess::allow_all());
    wait_connected(&h).await;

    // Retype one family element on the device after discovery; the
    // write to it is rejected while its sibling still succeeds.
    h.sim_a.add_node(
        "CMD_Instant_Cutoff[1]",
        fieldgate_proto::NodeType::Text,
        NodeValue::Text("armed".into()),
    );

    let outcomes = h
        .gateway
        .submit_write(
            &"admin".into(),
            WriteRequest {
                controller: url_a(),
                node_name: "CMD_Instant_Cutoff".into(),
                value: json!([true, true]),
            },
        )
        .await
        .expect("batch runs to completion");

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].ok);
    assert!(!outcomes[1].ok, "retyped element must fail");
    assert!(
        outcomes[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("type mismatch")),
        "unexpected error: {:?}",
        outcomes[1].error
    );

    // The sibling write landed despite the failure.
    assert_eq!(
        h.sim_a.value_of("CMD_Instant_Cutoff[0]"),
        Some(NodeValue::Boolean(true))
    );
    assert_eq!(h.sim_a.write_count(), 1);

    h.gateway.shutdown().await;
}

#[tokio::test]
async fn cutoff_length_mismatch_writes_nothing() {
    let h = harness(StaticAccess::allow_all());
    wait_connected(&h).await;

    let err = h
        .gateway
        .submit_write(
            &"admin".into(),
            WriteRequest {
                controller: url_a(),
                node_name: "CMD_Instant_Cutoff".into(),
                value: json!([true, true, true]),
            },
        )
        .await
        .expect_err("3 values against a family of 2");

    assert!(matches!(err, CoreError::Validation { .. }));
    assert_eq!(h.sim_a.write_count(), 0);

    h.gateway.shutdown().await;
}

#[tokio::test]
async fn writes_to_a_disconnected_controller_are_unavailable() {
    let access = StaticAccess::allow_all();
    let sim_a = SimController::demo(url_a(), "Eco Solar Park");
    let sim_b = SimController::demo(url_b(), "North Ridge Park");
    sim_b.fail_next_connects(u32::MAX);
    let fleet = SimFleet::new([sim_a, sim_b.clone()]);

    let gateway = Gateway::new(two_park_config(), Arc::new(fleet), Arc::new(access));
    gateway.start();
    assert!(
        wait_until(Duration::from_secs(3), || sim_b.connect_count() >= 1).await
    );

    let err = gateway
        .submit_write(
            &"admin".into(),
            WriteRequest {
                controller: url_b(),
                node_name: "Setpoint_Power_kW".into(),
                value: json!(100),
            },
        )
        .await
        .expect_err("controller is down");

    assert!(matches!(err, CoreError::ControllerUnavailable { .. }));
    assert_eq!(sim_b.write_count(), 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_every_loop() {
    let h = harness(StaticAccess::allow_all());
    wait_connected(&h).await;

    let began = tokio::time::Instant::now();
    h.gateway.shutdown().await;
    assert!(began.elapsed() < Duration::from_secs(2));

    for conn in h.gateway.registry().iter() {
        assert_eq!(conn.state(), LinkState::Stopped);
    }
}
