use std::time::Duration;

use serde_json::{json, Value};
use softplc_core::{logic, monitor, SystemSector, LOGIC_LIBRARY};
use softplc_runtime::{Host, MessageCode, MonitoringPayload, RuntimeConfig, RuntimeError};
use tokio::time::timeout;

async fn host_with_controller() -> (Host, tokio::sync::mpsc::Receiver<softplc_runtime::Response>) {
    let (host, events) = Host::spawn(RuntimeConfig::default());
    let sector: SystemSector = host
        .call(
            MessageCode::CreateController,
            json!({"memSize": 16384, "datablockTableLength": 64, "taskListLength": 8}),
        )
        .await
        .unwrap();
    assert_eq!(sector.total_mem_size, 16384);
    (host, events)
}

/// A monitored NOT gate driven by a 10 ms task. Returns the gate's ID.
async fn monitored_not(host: &Host) -> u32 {
    let not: u32 = host
        .call(
            MessageCode::CreateFunctionBlock,
            json!({"library": LOGIC_LIBRARY, "opcode": logic::NOT}),
        )
        .await
        .unwrap();
    let _: Value = host
        .call(MessageCode::SetMonitoring, json!({"id": not, "enabled": true}))
        .await
        .unwrap();
    let _: u32 = host
        .call(
            MessageCode::CreateTask,
            json!({"callTargetID": not, "interval": 10.0}),
        )
        .await
        .unwrap();
    not
}

#[tokio::test]
async fn responses_are_correlated() {
    let (host, _events) = host_with_controller().await;

    let first = host.request(MessageCode::GetFreeMemory, Value::Null).await.unwrap();
    let second = host.request(MessageCode::GetTaskList, Value::Null).await.unwrap();
    assert!(first.success && second.success);
    assert_ne!(first.id, second.id);
    assert_eq!(first.code, MessageCode::GetFreeMemory.code());
    assert_eq!(second.data, Some(json!([])));

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_requests_surface_as_errors() {
    let (host, _events) = Host::spawn(RuntimeConfig::default());
    let result: Result<Value, _> = host.call(MessageCode::GetSystemSector, Value::Null).await;
    match result {
        Err(RuntimeError::Rejected { code, message }) => {
            assert_eq!(code, MessageCode::GetSystemSector);
            assert_eq!(message, "no controller");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn step_emits_monitoring_event() {
    let (host, mut events) = host_with_controller().await;
    let not = monitored_not(&host).await;

    let step: Value = host
        .call(MessageCode::StepController, json!({"interval": 10.0}))
        .await
        .unwrap();
    assert_eq!(step["fired"], 1);

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(event.is_event());
    let payload: MonitoringPayload = serde_json::from_value(event.data.unwrap()).unwrap();
    let changes = monitor::decode(&payload.packed);
    assert_eq!(changes.len(), 1);
    assert_eq!((changes[0].id, changes[0].io_num, changes[0].value), (not, 1, 1.0));
}

#[tokio::test]
async fn started_controller_ticks_until_stopped() {
    let (host, mut events) = host_with_controller().await;
    let not = monitored_not(&host).await;

    let started: Value = host
        .call(MessageCode::StartController, json!({"interval": 5}))
        .await
        .unwrap();
    assert_eq!(started["interval"], 5);

    // The first fired tick flips the output and reports it.
    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.code, MessageCode::MonitoringValues.code());

    let _: Value = host
        .call(MessageCode::StopController, Value::Null)
        .await
        .unwrap();
    let _: Value = host
        .call(MessageCode::StopController, Value::Null)
        .await
        .unwrap();

    let task_list: Vec<u32> = host.call(MessageCode::GetTaskList, Value::Null).await.unwrap();
    let task: Value = host
        .call(MessageCode::GetTaskData, json!(task_list[0]))
        .await
        .unwrap();
    let runs = task["runCount"].as_u64().unwrap();
    assert!(runs >= 1);
    assert_eq!(task["targetId"], not);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let again: Value = host
        .call(MessageCode::GetTaskData, json!(task_list[0]))
        .await
        .unwrap();
    assert_eq!(again["runCount"].as_u64().unwrap(), runs);
}

#[tokio::test]
async fn image_round_trip_through_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plc.img");
    let path = path.to_str().unwrap();

    let (host, _events) = host_with_controller().await;
    let not = monitored_not(&host).await;
    let _: Value = host
        .call(MessageCode::SetIoValue, json!({"id": not, "ioNum": 0, "value": 1.0}))
        .await
        .unwrap();
    let _: Value = host
        .call(MessageCode::SaveImage, json!({"path": path}))
        .await
        .unwrap();

    let _: Value = host
        .call(MessageCode::DeleteBlock, json!(not))
        .await
        .unwrap();
    let _: SystemSector = host
        .call(MessageCode::LoadImage, json!({"path": path}))
        .await
        .unwrap();

    let values: Vec<f32> = host
        .call(MessageCode::GetIoValues, json!(not))
        .await
        .unwrap();
    assert_eq!(values, vec![1.0, 0.0]);
}
