//! # Example: Controller and two agents
//!
//! Wires a controller to two agents over in-memory channels and shows:
//! - a web session observing fleet membership (replay + every change)
//! - a status request answered through the agent's reply port
//! - a jump-ahead `Stop` overtaking queued log lines on a busy agent
//! - supervisor shutdown draining pumps, mailboxes and expiry sweeps
//!
//! Run with: `cargo run --example fleet`
//! (`RUST_LOG=debug` shows runtime events rendered by `LogWriter`)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fleetvisor::{
    Config, Connection, Frame, Handler, Inbound, LogWriter, ObservableState, Prioritized, Priority,
    TaskError, TaskSupervisor,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
enum Command {
    Stop,
    Status,
    AppendLog(String),
}

impl Prioritized for Command {
    fn priority(&self) -> Priority {
        match self {
            Command::Stop => Priority::JumpAhead,
            Command::Status | Command::AppendLog(_) => Priority::Normal,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
enum Report {
    Online,
}

impl Prioritized for Report {}

struct Agent {
    name: String,
}

#[async_trait]
impl Handler<Inbound<Command>> for Agent {
    async fn handle(&self, inbound: Inbound<Command>, _ctx: &CancellationToken) -> Result<(), TaskError> {
        match (&inbound.msg, inbound.reply) {
            (Command::Status, Some(port)) => {
                println!("[{}] status requested (seq {})", self.name, port.seq());
                port.reply(&format!("{} running", self.name))
                    .await
                    .map_err(|e| TaskError::fail(e.to_string()))?;
            }
            (Command::AppendLog(line), _) => {
                // slow disk
                tokio::time::sleep(Duration::from_millis(50)).await;
                println!("[{}] log: {line}", self.name);
            }
            (Command::Stop, _) => println!("[{}] STOP received", self.name),
            (Command::Status, None) => {}
        }
        Ok(())
    }
}

struct ControllerSide {
    agent: String,
    fleet: Arc<ObservableState<Vec<String>>>,
}

#[async_trait]
impl Handler<Inbound<Report>> for ControllerSide {
    async fn handle(&self, inbound: Inbound<Report>, _ctx: &CancellationToken) -> Result<(), TaskError> {
        match inbound.msg {
            Report::Online => {
                let agent = self.agent.clone();
                self.fleet.update(|agents| {
                    let mut next = agents.clone();
                    next.push(agent);
                    next
                });
            }
        }
        Ok(())
    }
}

/// Feeds frames from a channel into a connection, as a tracked task.
fn pump<M>(sup: &TaskSupervisor, name: &str, mut rx: mpsc::UnboundedReceiver<Frame>, conn: Arc<Connection<M>>) -> anyhow::Result<()>
where
    M: serde::de::DeserializeOwned + Prioritized + Send + 'static,
{
    sup.spawn(format!("pump:{name}"), move |ctx| async move {
        loop {
            tokio::select! {
                () = ctx.cancelled() => return Ok(()),
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = conn.on_frame(frame) {
                            return Err(TaskError::fail(e.to_string()));
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    })?;
    Ok(())
}

/// Controller-side connection to the named agent.
fn connect(
    sup: &Arc<TaskSupervisor>,
    fleet: &Arc<ObservableState<Vec<String>>>,
    agent: &str,
) -> anyhow::Result<(Arc<Connection<Report>>, Arc<Connection<Command>>)> {
    let (to_agent_tx, to_agent_rx) = mpsc::unbounded_channel();
    let (to_ctrl_tx, to_ctrl_rx) = mpsc::unbounded_channel();

    let controller = Arc::new(Connection::new(
        agent,
        Arc::new(to_agent_tx),
        ControllerSide {
            agent: agent.to_string(),
            fleet: Arc::clone(fleet),
        },
        sup,
    )?);
    let agent_side = Arc::new(Connection::new(
        format!("{agent}->controller"),
        Arc::new(to_ctrl_tx),
        Agent {
            name: agent.to_string(),
        },
        sup,
    )?);

    pump(sup, agent, to_agent_rx, Arc::clone(&agent_side))?;
    pump(sup, &format!("{agent}->controller"), to_ctrl_rx, Arc::clone(&controller))?;
    Ok((controller, agent_side))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config {
        grace: Duration::from_secs(5),
        reply_timeout: Duration::from_secs(2),
        ..Config::default()
    };
    let sup = TaskSupervisor::new(cfg);
    LogWriter::new().attach(sup.events());

    let fleet = Arc::new(ObservableState::named("fleet.agents", Vec::<String>::new()));
    fleet.subscribe("web-session-1", |agents: &Vec<String>| {
        println!("[web] fleet now: {agents:?}");
    });

    let (alpha, alpha_agent) = connect(&sup, &fleet, "agent-alpha")?;
    let (beta, beta_agent) = connect(&sup, &fleet, "agent-beta")?;
    alpha_agent.notify(&Report::Online).await?;
    beta_agent.notify(&Report::Online).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancel = CancellationToken::new();
    let status: String = alpha.request(&Command::Status, &cancel).await?;
    println!("[controller] alpha says: {status}");

    for i in 1..=3 {
        beta.notify(&Command::AppendLog(format!("line {i}"))).await?;
    }
    beta.notify(&Command::Stop).await?;
    println!("[controller] Stop sent after 3 log lines");
    tokio::time::sleep(Duration::from_millis(300)).await;

    alpha.close("demo finished");
    beta.close("demo finished");
    sup.shutdown().await?;
    println!("[controller] drained, tracked = {}", sup.tracked());
    Ok(())
}
