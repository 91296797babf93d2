use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use softplc_core::{logic, monitor, IoFlags, LOGIC_LIBRARY};
use softplc_runtime::{
    Host, MessageCode, MonitoringPayload, Request, Response, Runtime, RuntimeConfig,
    RuntimeError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// SoftPLC - virtual logic controller host
#[derive(Parser, Debug)]
#[command(name = "softplc")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tick period in milliseconds when StartController gives none
    #[arg(long, default_value_t = 20)]
    tick_ms: u64,

    /// Monitored changes buffered between events
    #[arg(long, default_value_t = 100)]
    monitor_capacity: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read JSON requests from stdin, write responses and events to stdout
    Serve,

    /// Build a chain of mixed logic blocks, step it and print monitored changes
    Demo {
        /// Memory region size in bytes
        #[arg(long, default_value_t = 65536)]
        mem_size: u32,

        /// Number of 20 ms steps to run
        #[arg(long, default_value_t = 3)]
        steps: u32,
    },
}

/// Opcodes of the demo chain, in call order.
const CHAIN: [u8; 10] = [
    logic::AND,
    logic::OR,
    logic::XOR,
    logic::NOT,
    logic::RISING,
    logic::FALLING,
    logic::RS,
    logic::AND,
    logic::OR,
    logic::XOR,
];

fn print_line(response: &Response) {
    match serde_json::to_string(response) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("Error: cannot encode response: {}", e),
    }
}

/// Answer a line that is not a request, echoing its ID when there is one.
fn reject_line(line: &str, error: serde_json::Error) -> Response {
    let raw: Value = serde_json::from_str(line).unwrap_or(Value::Null);
    let id = raw.get("id").and_then(Value::as_u64).unwrap_or(0);
    let code = raw
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(0);
    Response::error(id, code, format!("invalid request: {}", error))
}

async fn serve(config: RuntimeConfig) -> Result<(), RuntimeError> {
    let channels = Runtime::spawn(config);
    let mut responses = channels.responses;
    let writer = tokio::spawn(async move {
        while let Some(response) = responses.recv().await {
            print_line(&response);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| RuntimeError::Protocol(format!("stdin: {}", e)))?
    {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Request>(&line) {
            Ok(request) => channels
                .requests
                .send(request)
                .await
                .map_err(|_| RuntimeError::ChannelClosed)?,
            Err(e) => {
                debug!(error = %e, "unparseable request line");
                print_line(&reject_line(&line, e));
            }
        }
    }

    drop(channels.requests);
    channels
        .task
        .await
        .map_err(|_| RuntimeError::ChannelClosed)??;
    writer.await.map_err(|_| RuntimeError::ChannelClosed)?;
    Ok(())
}

async fn demo(config: RuntimeConfig, mem_size: u32, steps: u32) -> Result<(), RuntimeError> {
    let (host, mut events) = Host::spawn(config);
    let _: Value = host
        .call(
            MessageCode::CreateController,
            json!({"memSize": mem_size, "datablockTableLength": 256, "taskListLength": 16}),
        )
        .await?;

    let circuit: u32 = host
        .call(
            MessageCode::CreateCircuit,
            json!({"inputCount": 4, "outputCount": 2, "staticCount": 10}),
        )
        .await?;

    let mut gates: Vec<(u32, u32)> = Vec::new();
    for (i, &opcode) in CHAIN.iter().enumerate() {
        let id: u32 = host
            .call(
                MessageCode::CreateFunctionBlock,
                json!({"library": LOGIC_LIBRARY, "opcode": opcode, "parentID": circuit}),
            )
            .await?;
        if let Some(&(previous, previous_out)) = gates.last() {
            let _: Value = host
                .call(
                    MessageCode::ConnectFunctionInput,
                    json!({
                        "targetID": id,
                        "targetInputNum": 0,
                        "sourceID": previous,
                        "sourceIONum": previous_out,
                        "inverted": i % 2 == 1,
                    }),
                )
                .await?;
        }
        let _: Value = host
            .call(MessageCode::SetMonitoring, json!({"id": id, "enabled": true}))
            .await?;
        let data: Value = host.call(MessageCode::GetFunctionData, json!(id)).await?;
        let inputs = data["inputCount"].as_u64().unwrap_or(0) as u32;
        gates.push((id, inputs));
    }

    for (output, (source, source_io)) in [(0, gates[9]), (1, gates[4])] {
        let _: Value = host
            .call(
                MessageCode::ConnectCircuitOutput,
                json!({"targetID": circuit, "outputNum": output, "sourceID": source, "sourceIONum": source_io}),
            )
            .await?;
        let _: Value = host
            .call(
                MessageCode::SetIoFlag,
                json!({"id": circuit, "ioNum": 4 + output, "flags": IoFlags::BOOLEAN.bits()}),
            )
            .await?;
    }
    let _: Value = host
        .call(MessageCode::SetMonitoring, json!({"id": circuit, "enabled": true}))
        .await?;
    let _: u32 = host
        .call(
            MessageCode::CreateTask,
            json!({"callTargetID": circuit, "interval": 20.0}),
        )
        .await?;
    let _: Value = host
        .call(
            MessageCode::SetIoValue,
            json!({"id": gates[0].0, "ioNum": 0, "value": 1.0}),
        )
        .await?;
    info!(circuit, gates = gates.len(), "demo circuit built");

    for step in 1..=steps {
        let _: Value = host
            .call(MessageCode::StepController, json!({"interval": 20.0}))
            .await?;
        // Events are emitted right after the step response.
        let _: Value = host.call(MessageCode::GetSystemSector, Value::Null).await?;
        println!("step {}", step);
        while let Ok(event) = events.try_recv() {
            let Some(data) = event.data else {
                continue;
            };
            let payload: MonitoringPayload = serde_json::from_value(data)?;
            for change in monitor::decode(&payload.packed) {
                println!(
                    "  block {:>3} io {:>2} = {}",
                    change.id, change.io_num, change.value
                );
            }
        }
    }

    let outputs: Vec<f32> = host.call(MessageCode::GetIoValues, json!(circuit)).await?;
    println!("circuit outputs: {:?}", &outputs[4..]);
    host.shutdown().await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SOFTPLC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("softplc=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = RuntimeConfig {
        tick_interval_ms: args.tick_ms,
        monitor_capacity: args.monitor_capacity,
        ..RuntimeConfig::default()
    };

    let result = match args.command {
        Command::Serve => serve(config).await,
        Command::Demo { mem_size, steps } => demo(config, mem_size, steps).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
