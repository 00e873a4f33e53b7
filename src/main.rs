//! Demo binary for `amqp_bridge`.
//!
//! Runs one scripted session against the in-memory broker: a sending link
//! publishes messages to a queue, a receiving link consumes them back as
//! transfers, and a disposition settles them. Every frame the bridge emits is
//! printed.

mod cli;

use std::{error::Error, sync::Arc, time::Duration};

use amqp_bridge::{
    Connection,
    ConnectionOutput,
    OutboundFrame,
    SessionConfig,
    backend::memory::MemoryBroker,
    frame::{
        Attach,
        Begin,
        Disposition,
        End,
        Extent,
        FlowState,
        Frame,
        Handle,
        Linkage,
        Role,
        Source,
        Target,
        Transfer,
        TransferId,
    },
    message::Message,
    settlement::Outcome,
};
use bytes::Bytes;
use clap::Parser;
use log::info;
use tokio::time::timeout;

const CHANNEL: u16 = 0;
const SENDER: Handle = Handle::new(0);
const RECEIVER: Handle = Handle::new(1);
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    #[cfg(feature = "metrics")]
    let exporter = if cli.print_metrics {
        Some(metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let config = SessionConfig::builder()
        .default_session_credit(cli.session_credit)
        .incoming_link_credit(cli.incoming_link_credit)
        .max_fragment_size(cli.max_fragment_size)
        .max_message_size(cli.max_message_size)
        .build()?;
    let broker = MemoryBroker::new();
    broker.declare_queue(&cli.queue);
    let (connection, mut output) = Connection::new(Arc::new(broker.clone()), config);

    let address = format!("/queue/{}", cli.queue);
    let script: Vec<Frame> = vec![
        Begin::default().into(),
        sender_attach(&address).into(),
        receiver_attach(&address, cli.session_credit).into(),
    ];
    for frame in script {
        connection.route(CHANNEL, frame).await?;
    }
    for n in 0..cli.messages {
        let message = Message::with_body(format!("message {n}"));
        let transfer = Transfer {
            handle: SENDER,
            transfer_id: TransferId::new(u64::from(n)),
            delivery_tag: Bytes::from(n.to_be_bytes().to_vec()),
            settled: false,
            flow_state: None,
            fragments: message.to_fragments(config.max_fragment_size())?,
        };
        connection.route(CHANNEL, transfer.into()).await?;
    }

    let mut received = 0;
    while received < cli.messages {
        if let Frame::Transfer(transfer) = next_frame(&mut output).await?.frame
            && transfer.handle == RECEIVER
        {
            received += 1;
        }
    }
    if received > 0 {
        let settle = Disposition {
            role: Role::Receiver,
            extents: vec![Extent {
                first: TransferId::zero(),
                last: TransferId::new(u64::from(received - 1)),
                settled: false,
                outcome: Some(Outcome::Accepted.to_symbol()),
            }],
        };
        connection.route(CHANNEL, settle.into()).await?;
    }
    connection.route(CHANNEL, End::default().into()).await?;

    let report = timeout(STEP_TIMEOUT, output.reports.recv())
        .await?
        .ok_or("connection dropped its report stream")?;
    while let Ok(out) = output.frames.try_recv() {
        print_frame(&out);
    }
    info!(
        "demo finished: exit={:?}, queue_depth={:?}",
        report.exit,
        broker.queue_depth(&cli.queue)
    );
    connection.wait().await;

    #[cfg(feature = "metrics")]
    if let Some(handle) = exporter {
        println!("{}", handle.render());
    }
    Ok(())
}

async fn next_frame(output: &mut ConnectionOutput) -> Result<OutboundFrame, Box<dyn Error>> {
    let out = timeout(STEP_TIMEOUT, output.frames.recv())
        .await?
        .ok_or("connection dropped its frame stream")?;
    print_frame(&out);
    Ok(out)
}

fn print_frame(out: &OutboundFrame) { println!("channel {} <- {:?}", out.channel, out.frame); }

fn sender_attach(address: &str) -> Attach {
    Attach {
        name: "demo-sender".into(),
        handle: SENDER,
        role: Role::Sender,
        linkage: Some(Linkage {
            source: None,
            target: Some(Target {
                address: Some(address.to_owned()),
                dynamic: false,
            }),
        }),
        flow_state: None,
        transfer_unit: None,
    }
}

fn receiver_attach(address: &str, session_credit: u32) -> Attach {
    Attach {
        name: "demo-receiver".into(),
        handle: RECEIVER,
        role: Role::Receiver,
        linkage: Some(Linkage {
            source: Some(Source {
                address: Some(address.to_owned()),
                ..Source::default()
            }),
            target: None,
        }),
        flow_state: Some(FlowState {
            session_credit: Some(session_credit),
            ..FlowState::default()
        }),
        transfer_unit: None,
    }
}
