//! Metrics Tail
//!
//! Subscribes to the agent metric topics and prints each sample, flagging
//! messages that break the wire contract.

mod inspect;

use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use colored::*;
use common::subscription_filter;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};

const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(short, long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// MQTT username
    #[arg(short, long, env = "MQTT_USER", default_value = "bridge_user")]
    username: String,

    /// MQTT password
    #[arg(long, env = "MQTT_PASS", default_value = "bridge_pass")]
    password: String,

    /// Only show metrics of this tenant
    #[arg(short, long)]
    tenant: Option<String>,

    /// Print the raw payload under each line
    #[arg(short, long, default_value_t = false)]
    raw: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut options = MqttOptions::new(
        format!("metrics-tail-{}", std::process::id()),
        args.host.clone(),
        args.port,
    );
    options.set_credentials(args.username.clone(), args.password.clone());
    options.set_keep_alive(Duration::from_secs(60));

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let filter = subscription_filter(args.tenant.as_deref());
    client
        .subscribe(filter.clone(), QoS::AtLeastOnce)
        .await
        .context("queue subscription")?;

    println!(
        "{} {}:{} {}",
        "Connecting to".bold(),
        args.host,
        args.port,
        format!("({filter})").dimmed()
    );

    let mut connected_once = false;
    let mut received = 0u64;
    let mut rejected = 0u64;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                // Clean sessions drop subscriptions across reconnects
                if connected_once && !ack.session_present {
                    client
                        .subscribe(filter.clone(), QoS::AtLeastOnce)
                        .await
                        .context("resubscribe")?;
                }
                connected_once = true;
                println!("{}", "Connected, listening for metrics...".green());
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                println!("{} {}", "Subscribed to".green(), filter);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                received += 1;
                match inspect::inspect(&publish.topic, &publish.payload) {
                    Ok(sample) => {
                        let name = if sample.canonical {
                            sample.metric.metric_name().cyan()
                        } else {
                            sample.metric.metric_name().yellow()
                        };
                        println!(
                            "{} {}/{} {} {}",
                            sample.metric.timestamp().format("%H:%M:%S%.3f").to_string().dimmed(),
                            sample.metric.tenant_id(),
                            sample.metric.agent_id(),
                            name,
                            sample.display_value().bold()
                        );
                    }
                    Err(e) => {
                        rejected += 1;
                        println!("{} {}: {}", "✗".red(), publish.topic, e.to_string().red());
                    }
                }
                if args.raw {
                    println!("  {}", String::from_utf8_lossy(&publish.payload).dimmed());
                }
            }
            Ok(_) => {}
            Err(e) if !connected_once => {
                bail!("MQTT connection to {}:{} failed: {}", args.host, args.port, e);
            }
            Err(e) => {
                println!("{} {}", "Connection lost:".yellow(), e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }

    if let Err(e) = disconnect(&client, &mut eventloop, DISCONNECT_GRACE).await {
        println!("{} {}", "Disconnect failed:".yellow(), e);
    }
    println!(
        "\n{} {} received, {} rejected",
        "Summary:".bold(),
        received,
        rejected
    );
    Ok(())
}

/// Queue a DISCONNECT and keep polling until it has been written.
async fn disconnect(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    grace: Duration,
) -> anyhow::Result<()> {
    client.disconnect().await.context("queue disconnect")?;

    let flushed = tokio::time::timeout(grace, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match flushed {
        Ok(result) => result.context("send disconnect"),
        Err(_) => bail!("DISCONNECT not sent within {grace:?}"),
    }
}
