//! Request dispatch over an optional controller.
//!
//! The facade is synchronous and owns no channels. The actor in
//! [`crate::runtime`] feeds it requests and asks it for ticks and events.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use softplc_core::{monitor, Controller, ControllerConfig, IoAddress, IoFlags};
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};
use crate::protocol::{
    BlockRef, ConnectCircuitOutputParams, ConnectFunctionInputParams, CreateCircuitParams,
    CreateFunctionBlockParams, CreateTaskParams, ImageParams, MessageCode, MonitoringPayload,
    Request, Response, SetCallIndexParams, SetIoFlagParams, SetIoValueParams,
    SetMonitoringParams, StartParams, StepParams,
};
use crate::runtime::RuntimeConfig;

fn params<T: DeserializeOwned>(code: MessageCode, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| RuntimeError::Protocol(format!("invalid params for {:?}: {}", code, e)))
}

fn data<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn source(id: u32, io_num: u32) -> Option<IoAddress> {
    (id != 0).then_some(IoAddress { id, io_num })
}

/// Protocol front end of one controller.
pub struct Facade {
    config: RuntimeConfig,
    controller: Option<Controller>,
    /// Tick period in milliseconds while started.
    running: Option<u64>,
}

impl Facade {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            controller: None,
            running: None,
        }
    }

    pub fn controller(&self) -> Option<&Controller> {
        self.controller.as_ref()
    }

    /// Tick period while started, `None` while stopped.
    pub fn running(&self) -> Option<u64> {
        self.running
    }

    fn controller_mut(&mut self) -> Result<&mut Controller> {
        self.controller.as_mut().ok_or(RuntimeError::NoController)
    }

    fn controller_ref(&self) -> Result<&Controller> {
        self.controller.as_ref().ok_or(RuntimeError::NoController)
    }

    /// Handle one request. Failures become rejected responses.
    pub fn handle(&mut self, request: Request) -> Response {
        debug!(id = request.id, code = request.code, "dispatching request");
        let result = MessageCode::try_from(request.code)
            .map_err(RuntimeError::Protocol)
            .and_then(|code| self.dispatch(code, request.params));
        match result {
            Ok(data) => Response::ok(request.id, request.code, data),
            Err(e) => {
                debug!(id = request.id, code = request.code, error = %e, "request rejected");
                Response::error(request.id, request.code, e.to_string())
            }
        }
    }

    /// Advance the started controller by one period.
    pub fn tick(&mut self) -> usize {
        match (self.running, self.controller.as_mut()) {
            (Some(period), Some(controller)) => controller.tick(period as f32),
            _ => 0,
        }
    }

    /// Drain monitored changes into a `MonitoringValues` event.
    pub fn take_event(&mut self) -> Option<Response> {
        let controller = self.controller.as_mut()?;
        let changes = controller.take_changes();
        if changes.is_empty() {
            return None;
        }
        let payload = MonitoringPayload {
            count: changes.len(),
            dropped: controller.monitor().dropped(),
            packed: monitor::encode(&changes).to_vec(),
        };
        let data = serde_json::to_value(payload).ok()?;
        Some(Response::event(MessageCode::MonitoringValues, data))
    }

    fn dispatch(&mut self, code: MessageCode, raw: Value) -> Result<Value> {
        use MessageCode::*;

        match code {
            CreateController => {
                let config: ControllerConfig = params(code, raw)?;
                let controller =
                    Controller::with_monitor_capacity(&config, self.config.monitor_capacity)?;
                let sector = controller.system_sector();
                self.controller = Some(controller);
                self.running = None;
                data(sector)
            }
            StartController => {
                let start: StartParams = if raw.is_null() {
                    StartParams::default()
                } else {
                    params(code, raw)?
                };
                self.controller_ref()?;
                let period = start.interval.unwrap_or(self.config.tick_interval_ms);
                if period == 0 {
                    return Err(RuntimeError::Protocol("interval must be positive".into()));
                }
                self.running = Some(period);
                info!(interval_ms = period, "controller started");
                Ok(json!({ "interval": period }))
            }
            StopController => {
                if self.running.take().is_some() {
                    info!("controller stopped");
                }
                Ok(Value::Null)
            }
            StepController => {
                let step: StepParams = params(code, raw)?;
                if !(step.interval > 0.0 && step.interval.is_finite()) {
                    return Err(RuntimeError::Protocol(format!(
                        "interval must be positive, got {}",
                        step.interval
                    )));
                }
                let controller = self.controller_mut()?;
                let fired: usize = (0..step.num_steps.unwrap_or(1))
                    .map(|_| controller.tick(step.interval))
                    .sum();
                Ok(json!({ "fired": fired }))
            }
            CreateTask => {
                let p: CreateTaskParams = params(code, raw)?;
                let id = self
                    .controller_mut()?
                    .create_task(p.call_target_id, p.interval, p.offset, p.index)?;
                data(id)
            }
            CreateCircuit => {
                let p: CreateCircuitParams = params(code, raw)?;
                let id = self.controller_mut()?.create_circuit(
                    p.input_count,
                    p.output_count,
                    p.static_count,
                    p.parent_id.filter(|&id| id != 0),
                    p.call_index,
                )?;
                data(id)
            }
            CreateFunctionBlock => {
                let p: CreateFunctionBlockParams = params(code, raw)?;
                let id = self.controller_mut()?.create_function_block(
                    p.library,
                    p.opcode,
                    p.parent_id.filter(|&id| id != 0),
                    p.call_index,
                    p.input_count,
                    p.output_count,
                    p.static_count,
                )?;
                data(id)
            }
            DeleteBlock => {
                let target: BlockRef = params(code, raw)?;
                self.controller_mut()?.delete_block(target.id())?;
                Ok(Value::Null)
            }
            SetIoValue => {
                let p: SetIoValueParams = params(code, raw)?;
                self.controller_mut()?.set_io_value(p.id, p.io_num, p.value)?;
                Ok(Value::Null)
            }
            SetIoFlag => {
                let p: SetIoFlagParams = params(code, raw)?;
                self.controller_mut()?.set_io_flags(
                    p.id,
                    p.io_num,
                    IoFlags::from_bits_truncate(p.flags),
                )?;
                Ok(Value::Null)
            }
            ConnectFunctionInput => {
                let p: ConnectFunctionInputParams = params(code, raw)?;
                self.controller_mut()?.connect_function_input(
                    p.target_id,
                    p.target_input_num,
                    source(p.source_id, p.source_io_num),
                    p.inverted,
                )?;
                Ok(Value::Null)
            }
            ConnectCircuitOutput => {
                let p: ConnectCircuitOutputParams = params(code, raw)?;
                self.controller_mut()?.connect_circuit_output(
                    p.target_id,
                    p.output_num,
                    source(p.source_id, p.source_io_num),
                )?;
                Ok(Value::Null)
            }
            SetMonitoring => {
                let p: SetMonitoringParams = params(code, raw)?;
                self.controller_mut()?.set_monitoring(p.id, p.enabled)?;
                Ok(Value::Null)
            }
            SetFunctionCallIndex => {
                let p: SetCallIndexParams = params(code, raw)?;
                self.controller_mut()?
                    .set_call_index(p.parent_id, p.child_id, p.index)?;
                Ok(Value::Null)
            }
            GetSystemSector => data(self.controller_ref()?.system_sector()),
            GetTaskList => data(self.controller_ref()?.task_list()),
            GetTaskData => {
                let target: BlockRef = params(code, raw)?;
                data(self.controller_ref()?.task_data(target.id())?)
            }
            GetDatablockHeader => {
                let target: BlockRef = params(code, raw)?;
                data(self.controller_ref()?.datablock_header(target.id())?)
            }
            GetFunctionData => {
                let target: BlockRef = params(code, raw)?;
                data(self.controller_ref()?.function_data(target.id())?)
            }
            GetCircuitData => {
                let target: BlockRef = params(code, raw)?;
                data(self.controller_ref()?.circuit_data(target.id())?)
            }
            GetIoValues => {
                let target: BlockRef = params(code, raw)?;
                data(self.controller_ref()?.io_values(target.id())?)
            }
            GetDatablockTable => data(self.controller_ref()?.datablock_table()),
            GetFreeMemory => data(self.controller_ref()?.free_memory()),
            SaveImage => {
                let p: ImageParams = params(code, raw)?;
                self.controller_ref()?.save_image(&p.path)?;
                Ok(Value::Null)
            }
            LoadImage => {
                let p: ImageParams = params(code, raw)?;
                let controller = Controller::load_image(&p.path, self.config.monitor_capacity)?;
                let sector = controller.system_sector();
                self.controller = Some(controller);
                self.running = None;
                data(sector)
            }
            MonitoringValues => Err(RuntimeError::Protocol(
                "MonitoringValues is an event, not a request".into(),
            )),
        }
    }
}
