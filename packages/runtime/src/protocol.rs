//! Wire types exchanged between a host and the runtime.
//!
//! Requests and responses are JSON objects. Message codes are numeric on
//! the wire; [`MessageCode`] is the closed set the runtime understands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request ID carried by unsolicited events.
pub const EVENT_ID: u64 = 0;

/// Every message the runtime understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum MessageCode {
    CreateController,
    StartController,
    StopController,
    StepController,
    CreateTask,
    CreateCircuit,
    CreateFunctionBlock,
    DeleteBlock,
    SetIoValue,
    SetIoFlag,
    ConnectFunctionInput,
    ConnectCircuitOutput,
    SetMonitoring,
    SetFunctionCallIndex,
    GetSystemSector,
    GetTaskList,
    GetTaskData,
    GetDatablockHeader,
    GetFunctionData,
    GetCircuitData,
    GetIoValues,
    GetDatablockTable,
    GetFreeMemory,
    SaveImage,
    LoadImage,
    MonitoringValues,
}

impl MessageCode {
    pub const fn code(self) -> u16 {
        match self {
            MessageCode::CreateController => 1,
            MessageCode::StartController => 2,
            MessageCode::StopController => 3,
            MessageCode::StepController => 4,
            MessageCode::CreateTask => 10,
            MessageCode::CreateCircuit => 11,
            MessageCode::CreateFunctionBlock => 12,
            MessageCode::DeleteBlock => 13,
            MessageCode::SetIoValue => 14,
            MessageCode::SetIoFlag => 15,
            MessageCode::ConnectFunctionInput => 16,
            MessageCode::ConnectCircuitOutput => 17,
            MessageCode::SetMonitoring => 18,
            MessageCode::SetFunctionCallIndex => 19,
            MessageCode::GetSystemSector => 20,
            MessageCode::GetTaskList => 21,
            MessageCode::GetTaskData => 22,
            MessageCode::GetDatablockHeader => 23,
            MessageCode::GetFunctionData => 24,
            MessageCode::GetCircuitData => 25,
            MessageCode::GetIoValues => 26,
            MessageCode::GetDatablockTable => 27,
            MessageCode::GetFreeMemory => 28,
            MessageCode::SaveImage => 29,
            MessageCode::LoadImage => 30,
            MessageCode::MonitoringValues => 100,
        }
    }
}

impl TryFrom<u16> for MessageCode {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        let message = match code {
            1 => MessageCode::CreateController,
            2 => MessageCode::StartController,
            3 => MessageCode::StopController,
            4 => MessageCode::StepController,
            10 => MessageCode::CreateTask,
            11 => MessageCode::CreateCircuit,
            12 => MessageCode::CreateFunctionBlock,
            13 => MessageCode::DeleteBlock,
            14 => MessageCode::SetIoValue,
            15 => MessageCode::SetIoFlag,
            16 => MessageCode::ConnectFunctionInput,
            17 => MessageCode::ConnectCircuitOutput,
            18 => MessageCode::SetMonitoring,
            19 => MessageCode::SetFunctionCallIndex,
            20 => MessageCode::GetSystemSector,
            21 => MessageCode::GetTaskList,
            22 => MessageCode::GetTaskData,
            23 => MessageCode::GetDatablockHeader,
            24 => MessageCode::GetFunctionData,
            25 => MessageCode::GetCircuitData,
            26 => MessageCode::GetIoValues,
            27 => MessageCode::GetDatablockTable,
            28 => MessageCode::GetFreeMemory,
            29 => MessageCode::SaveImage,
            30 => MessageCode::LoadImage,
            100 => MessageCode::MonitoringValues,
            other => return Err(format!("unknown message code {}", other)),
        };
        Ok(message)
    }
}

impl From<MessageCode> for u16 {
    fn from(code: MessageCode) -> u16 {
        code.code()
    }
}

/// A host request. The code stays raw so unknown codes can be answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub code: u16,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, code: MessageCode, params: Value) -> Self {
        Self {
            id,
            code: code.into(),
            params,
        }
    }
}

/// A response to a request, or an event when `id` is [`EVENT_ID`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub code: u16,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, code: u16, data: Value) -> Self {
        Self {
            id,
            code,
            success: true,
            data: (!data.is_null()).then_some(data),
            error: None,
        }
    }

    pub fn error(id: u64, code: u16, error: impl Into<String>) -> Self {
        Self {
            id,
            code,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn event(code: MessageCode, data: Value) -> Self {
        Self::ok(EVENT_ID, code.into(), data)
    }

    pub fn is_event(&self) -> bool {
        self.id == EVENT_ID
    }
}

// ----------------------------------------------------------------------
// Parameter records
// ----------------------------------------------------------------------

/// A block ID, given either bare or as `{"id": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockRef {
    Bare(u32),
    Object { id: u32 },
}

impl BlockRef {
    pub fn id(self) -> u32 {
        match self {
            BlockRef::Bare(id) | BlockRef::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    /// Tick period in milliseconds.
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepParams {
    pub interval: f32,
    pub num_steps: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskParams {
    #[serde(rename = "callTargetID")]
    pub call_target_id: u32,
    pub interval: f32,
    #[serde(default)]
    pub offset: f32,
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCircuitParams {
    pub input_count: u8,
    pub output_count: u8,
    /// Call list capacity.
    pub static_count: u16,
    #[serde(rename = "parentID")]
    pub parent_id: Option<u32>,
    pub call_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFunctionBlockParams {
    pub library: u8,
    pub opcode: u8,
    #[serde(rename = "parentID")]
    pub parent_id: Option<u32>,
    pub call_index: Option<usize>,
    pub input_count: Option<u8>,
    pub output_count: Option<u8>,
    pub static_count: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetIoValueParams {
    pub id: u32,
    pub io_num: u32,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetIoFlagParams {
    pub id: u32,
    pub io_num: u32,
    pub flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectFunctionInputParams {
    #[serde(rename = "targetID")]
    pub target_id: u32,
    pub target_input_num: u32,
    /// 0 disconnects the input.
    #[serde(rename = "sourceID")]
    pub source_id: u32,
    #[serde(rename = "sourceIONum", default)]
    pub source_io_num: u32,
    pub inverted: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectCircuitOutputParams {
    #[serde(rename = "targetID")]
    pub target_id: u32,
    pub output_num: u32,
    /// 0 disconnects the output.
    #[serde(rename = "sourceID")]
    pub source_id: u32,
    #[serde(rename = "sourceIONum", default)]
    pub source_io_num: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetMonitoringParams {
    pub id: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCallIndexParams {
    #[serde(rename = "parentID")]
    pub parent_id: u32,
    #[serde(rename = "childID")]
    pub child_id: u32,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub path: String,
}

/// Payload of a `MonitoringValues` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringPayload {
    /// Number of 12-byte records in `packed`.
    pub count: usize,
    /// Changes dropped on overflow since the controller was created.
    pub dropped: u64,
    /// `{u32 id, u32 ioNum, f32 value}` little-endian records.
    pub packed: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_round_trip() {
        for code in (0u16..=120).filter_map(|c| MessageCode::try_from(c).ok()) {
            assert_eq!(MessageCode::try_from(code.code()), Ok(code));
        }
        assert_eq!(MessageCode::GetFreeMemory.code(), 28);
        assert!(MessageCode::try_from(5).is_err());
    }

    #[test]
    fn request_wire_format() {
        let request: Request =
            serde_json::from_value(json!({"id": 3, "code": 13, "params": 7})).unwrap();
        assert_eq!(request.code, MessageCode::DeleteBlock.code());
        let target: BlockRef = serde_json::from_value(request.params).unwrap();
        assert_eq!(target.id(), 7);

        let object: BlockRef = serde_json::from_value(json!({"id": 9})).unwrap();
        assert_eq!(object.id(), 9);

        let bare: Request = serde_json::from_value(json!({"id": 1, "code": 3})).unwrap();
        assert!(bare.params.is_null());
    }

    #[test]
    fn response_omits_empty_fields() {
        let ok = serde_json::to_value(Response::ok(4, 20, Value::Null)).unwrap();
        assert_eq!(ok, json!({"id": 4, "code": 20, "success": true}));

        let failed = serde_json::to_value(Response::error(5, 99, "unknown message code 99")).unwrap();
        assert_eq!(failed["error"], "unknown message code 99");
        assert!(Response::event(MessageCode::MonitoringValues, json!({})).is_event());
    }

    #[test]
    fn params_use_host_field_names() {
        let params: ConnectFunctionInputParams = serde_json::from_value(json!({
            "targetID": 3,
            "targetInputNum": 1,
            "sourceID": 2,
            "sourceIONum": 0,
            "inverted": true
        }))
        .unwrap();
        assert_eq!(params.target_id, 3);
        assert_eq!(params.inverted, Some(true));

        let task: CreateTaskParams =
            serde_json::from_value(json!({"callTargetID": 4, "interval": 20.0})).unwrap();
        assert_eq!(task.offset, 0.0);
        assert_eq!(task.index, None);
    }

    #[test]
    fn message_code_serializes_as_number() {
        assert_eq!(
            serde_json::to_value(MessageCode::MonitoringValues).unwrap(),
            json!(100)
        );
        let code: MessageCode = serde_json::from_value(json!(12)).unwrap();
        assert_eq!(code, MessageCode::CreateFunctionBlock);
    }
}
