use anyhow::{bail, Context, Result};
use clap::Parser;
use url::Url;

use fluent_forward::client::{Client, ClientConfig};
use fluent_forward::protocol::{EntryExt, EventTime, ForwardMessage, MessageExt, Record, Sendable};
use fluent_forward::transport::ConnFactory;
use fluent_forward::ws;

#[derive(Parser)]
#[command(name = "forward-send", version, about = "Ad-hoc Fluent Forward sender")]
struct Cli {
    /// Dotted tag for the events.
    #[arg(short = 't', long = "tag", default_value = "debug.ad-hoc")]
    tag: String,

    /// Collector address for the stream transport.
    #[arg(long = "addr", default_value = "127.0.0.1:24224")]
    addr: String,

    /// Connect over a WebSocket endpoint instead (e.g. ws://host/fluent).
    #[arg(long = "ws")]
    ws_url: Option<Url>,

    /// Request a per-chunk acknowledgement (stream transport only).
    #[arg(long = "ack")]
    ack: bool,

    /// JSON objects, one per event.
    #[arg(required = true)]
    records: Vec<String>,
}

fn json_to_value(json: serde_json::Value) -> rmpv::Value {
    match json {
        serde_json::Value::Null => rmpv::Value::Nil,
        serde_json::Value::Bool(b) => rmpv::Value::from(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rmpv::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                rmpv::Value::from(u)
            } else {
                rmpv::Value::from(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => rmpv::Value::from(s.as_str()),
        serde_json::Value::Array(items) => {
            rmpv::Value::Array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(fields) => rmpv::Value::Map(
            fields
                .into_iter()
                .map(|(k, v)| (rmpv::Value::from(k.as_str()), json_to_value(v)))
                .collect(),
        ),
    }
}

fn parse_record(raw: &str) -> Result<Record> {
    let json: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("invalid JSON record: {raw}"))?;
    let serde_json::Value::Object(fields) = json else {
        bail!("each record must be a JSON object: {raw}");
    };
    Ok(fields
        .into_iter()
        .map(|(k, v)| (k, json_to_value(v)))
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let records = cli
        .records
        .iter()
        .map(|raw| parse_record(raw))
        .collect::<Result<Vec<_>>>()?;

    let mut messages: Vec<Box<dyn Sendable>> = Vec::new();
    if records.len() == 1 {
        let record = records.into_iter().next().unwrap_or_default();
        messages.push(Box::new(MessageExt::new(&cli.tag, EventTime::now(), record)));
    } else {
        let entries = records
            .into_iter()
            .map(|record| EntryExt::new(EventTime::now(), record))
            .collect();
        messages.push(Box::new(ForwardMessage::new(&cli.tag, entries)));
    }

    if let Some(url) = cli.ws_url {
        let client = ws::Client::new(ws::ClientOptions::new(url));
        client.connect().await.context("websocket connect failed")?;
        for msg in &mut messages {
            client.send_message(msg.as_mut()).await.context("send failed")?;
        }
        client.disconnect().await?;
    } else {
        let config = ClientConfig {
            require_ack: cli.ack,
            ..Default::default()
        };
        let client = Client::new(ConnFactory::tcp(&cli.addr), config);
        client.connect().await.context("connect failed")?;
        for msg in &mut messages {
            client.send(msg.as_mut()).await.context("send failed")?;
        }
        client.disconnect().await?;
    }
    Ok(())
}
